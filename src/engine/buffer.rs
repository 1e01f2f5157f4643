use crate::engine::error::{ErrorKind, Result};
use crate::engine::types::ResponseMessage;
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::{Notify, Semaphore};

/// Lifecycle of the recovery buffer.
///
/// idle -> active -> draining -> closed, with shutdown_now() jumping to
/// closed from any state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    Idle,
    Active,
    Draining,
    Closed,
}

struct Inner {
    state: BufferState,
    queue: VecDeque<ResponseMessage>,
}

/// Bounded blocking FIFO between the recovery streams and the correlator.
///
/// Multi-producer (one per stream), single-consumer (the transfer task or
/// the post-stream drain loop). Producers block on backpressure; the
/// consumer blocks on empty. All blocking is async.
pub struct MessageBuffer {
    capacity: usize,
    inner: Mutex<Inner>,
    /// One permit per free slot; closed to fail producers fast.
    slots: Semaphore,
    not_empty: Notify,
    drained: Notify,
}

impl MessageBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        return MessageBuffer {
            capacity,
            inner: Mutex::new(Inner {
                state: BufferState::Idle,
                queue: VecDeque::new(),
            }),
            slots: Semaphore::new(capacity),
            not_empty: Notify::new(),
            drained: Notify::new(),
        };
    }

    pub fn capacity(&self) -> usize {
        return self.capacity;
    }

    pub fn len(&self) -> usize {
        return self.inner.lock().unwrap().queue.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.len() == 0;
    }

    pub fn state(&self) -> BufferState {
        return self.inner.lock().unwrap().state;
    }

    /// idle -> active. Fails on anything else (e.g. a second activate()).
    pub fn activate(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state != BufferState::Idle {
            return Err(ErrorKind::InvalidState
                .with_context(format!("cannot activate buffer in state {:?}", inner.state)));
        }
        inner.state = BufferState::Active;
        return Ok(());
    }

    /// Appends a message, waiting while the buffer is full.
    pub async fn enqueue(&self, message: ResponseMessage) -> Result<()> {
        {
            let inner = self.inner.lock().unwrap();
            if inner.state == BufferState::Idle {
                return Err(ErrorKind::BufferFailure.with_message("enqueue on inactive buffer"));
            }
        }
        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| ErrorKind::BufferFailure.with_message("enqueue on closed buffer"))?;

        let mut inner = self.inner.lock().unwrap();
        if inner.state != BufferState::Active {
            // The permit is dropped, not forgotten: a failed enqueue must
            // not consume a slot.
            return Err(ErrorKind::BufferFailure
                .with_context(format!("enqueue in state {:?}", inner.state)));
        }
        inner.queue.push_back(message);
        // The slot is handed over to the queued message and given back on
        // dequeue.
        permit.forget();
        drop(inner);
        self.not_empty.notify_one();
        return Ok(());
    }

    /// Removes the oldest message, waiting while the buffer is active and
    /// empty. Returns None once the buffer is closed and empty.
    pub async fn dequeue(&self) -> Result<Option<ResponseMessage>> {
        loop {
            let notified = self.not_empty.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(message) = inner.queue.pop_front() {
                    if inner.queue.is_empty() && inner.state == BufferState::Draining {
                        inner.state = BufferState::Closed;
                        self.slots.close();
                        self.drained.notify_waiters();
                    } else {
                        self.slots.add_permits(1);
                    }
                    return Ok(Some(message));
                }
                match inner.state {
                    BufferState::Active => {}
                    BufferState::Draining => {
                        inner.state = BufferState::Closed;
                        self.slots.close();
                        self.drained.notify_waiters();
                        return Ok(None);
                    }
                    BufferState::Closed => return Ok(None),
                    BufferState::Idle => {
                        return Err(
                            ErrorKind::BufferFailure.with_message("dequeue on inactive buffer")
                        );
                    }
                }
            }
            notified.await;
        }
    }

    /// active -> draining; waits until the consumer empties the queue, then
    /// closes. Returns once the buffer is closed.
    pub async fn shutdown(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                BufferState::Active => inner.state = BufferState::Draining,
                BufferState::Draining => {}
                BufferState::Closed => return Ok(()),
                BufferState::Idle => {
                    return Err(
                        ErrorKind::BufferFailure.with_message("shutdown on inactive buffer")
                    );
                }
            }
        }
        // Wake a consumer blocked on an empty queue so it can observe the
        // draining state.
        self.not_empty.notify_one();

        loop {
            let notified = self.drained.notified();
            {
                let mut inner = self.inner.lock().unwrap();
                if inner.state == BufferState::Closed {
                    return Ok(());
                }
                if inner.queue.is_empty() {
                    inner.state = BufferState::Closed;
                    self.slots.close();
                    return Ok(());
                }
            }
            notified.await;
        }
    }

    /// Force-closes from any state, discarding undelivered messages.
    pub fn shutdown_now(&self) {
        let discarded;
        {
            let mut inner = self.inner.lock().unwrap();
            discarded = inner.queue.len();
            inner.queue.clear();
            inner.state = BufferState::Closed;
        }
        self.slots.close();
        self.not_empty.notify_one();
        self.drained.notify_waiters();
        if discarded > 0 {
            log::debug!("Buffer force-closed, {} messages discarded", discarded);
        }
    }
}
