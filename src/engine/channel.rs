use crate::engine::buffer::MessageBuffer;
use crate::engine::error::{ErrorKind, Result};
use crate::engine::types::{DataRequest, ResponseMessage};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::Stream;
use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::task::JoinSet;

/// Frames of one server stream, already decoded.
pub type ResponseStream = Pin<Box<dyn Stream<Item = Result<ResponseMessage>> + Send>>;

/// Caller-owned connection to the archive. The engine never closes it; it
/// only opens streams on it, one per sub-request.
#[async_trait]
pub trait ArchiveConnection: Send + Sync {
    async fn open_stream(&self, request: &DataRequest) -> Result<ResponseStream>;
}

/// Cooperative cancellation flag shared by all streams of one request.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        return CancelFlag::default();
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        return self.flag.load(Ordering::SeqCst);
    }
}

/// Totals of one recovery run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    pub messages: u64,
    pub bytes: u64,
}

impl std::ops::AddAssign for RecoveryStats {
    fn add_assign(&mut self, other: RecoveryStats) {
        self.messages += other.messages;
        self.bytes += other.bytes;
    }
}

/// Drives sub-requests over a pool of concurrent server streams, funnelling
/// every decoded message into the shared buffer.
pub struct Channel {
    connection: Arc<dyn ArchiveConnection>,
    max_streams: usize,
    cancel: CancelFlag,
}

impl Channel {
    pub fn new(connection: Arc<dyn ArchiveConnection>, max_streams: usize, cancel: CancelFlag) -> Self {
        return Channel {
            connection,
            max_streams: max_streams.max(1),
            cancel,
        };
    }

    /// Runs all sub-requests, at most max_streams in flight at a time, and
    /// returns the totals once every stream completed.
    ///
    /// On the first stream failure the remaining streams are cancelled, the
    /// buffer is force-closed and that single failure is propagated.
    pub async fn recover_requests(
        &self,
        subs: &[DataRequest],
        buffer: &Arc<MessageBuffer>,
    ) -> Result<RecoveryStats> {
        let mut pending: VecDeque<DataRequest> = subs.iter().cloned().collect();
        let streams = pending.len().min(self.max_streams);
        log::debug!(
            "Recovering {} sub-request(s) over {} stream(s)",
            pending.len(),
            streams
        );

        let mut join: JoinSet<Result<RecoveryStats>> = JoinSet::new();
        for _ in 0..streams {
            self.spawn_stream(&mut join, &mut pending, buffer);
        }

        let mut total = RecoveryStats::default();
        while let Some(joined) = join.join_next().await {
            let result = joined
                .map_err(|e| {
                    if e.is_cancelled() {
                        return ErrorKind::Cancelled.with_message("stream task cancelled");
                    }
                    return ErrorKind::StreamFailure.with_context(e);
                })
                .and_then(|r| r);
            match result {
                Ok(stats) => {
                    total += stats;
                    self.spawn_stream(&mut join, &mut pending, buffer);
                }
                Err(err) => {
                    log::debug!("Stream failed ({}), cancelling recovery", err);
                    self.cancel.cancel();
                    buffer.shutdown_now();
                    join.abort_all();
                    while join.join_next().await.is_some() {}
                    return Err(err);
                }
            }
        }
        return Ok(total);
    }

    fn spawn_stream(
        &self,
        join: &mut JoinSet<Result<RecoveryStats>>,
        pending: &mut VecDeque<DataRequest>,
        buffer: &Arc<MessageBuffer>,
    ) {
        if let Some(sub) = pending.pop_front() {
            let connection = self.connection.clone();
            let buffer = buffer.clone();
            let cancel = self.cancel.clone();
            join.spawn(run_stream(connection, sub, buffer, cancel));
        }
    }
}

/// One worker: consumes a single server stream frame by frame. Cancellation
/// is observed between frames; a force-closed buffer fails the enqueue.
async fn run_stream(
    connection: Arc<dyn ArchiveConnection>,
    request: DataRequest,
    buffer: Arc<MessageBuffer>,
    cancel: CancelFlag,
) -> Result<RecoveryStats> {
    log::trace!(
        "Opening stream: {} source(s) over {}",
        request.sources.len(),
        request.range
    );
    let mut stream = connection.open_stream(&request).await?;
    let mut stats = RecoveryStats::default();
    while let Some(frame) = stream.next().await {
        if cancel.is_cancelled() {
            return Err(ErrorKind::Cancelled.with_message("recovery cancelled"));
        }
        let message = frame?;
        stats.messages += 1;
        stats.bytes += message.byte_size as u64;
        buffer.enqueue(message).await?;
    }
    log::trace!("Stream done: {} message(s)", stats.messages);
    return Ok(stats);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::types::{DataColumn, SupportedType, TimingKey, Value};
    use pretty_assertions::assert_eq;

    /// Serves one frame per requested source; fails the whole stream when a
    /// source named "boom" is requested.
    struct StubArchive;

    #[async_trait]
    impl ArchiveConnection for StubArchive {
        async fn open_stream(&self, request: &DataRequest) -> Result<ResponseStream> {
            let frames: Vec<Result<ResponseMessage>> = request
                .sources
                .iter()
                .map(|source| {
                    if source == "boom" {
                        return Err(ErrorKind::StreamFailure.with_message("stream reset"));
                    }
                    return Ok(ResponseMessage::new(
                        TimingKey::Clock {
                            start: request.range.begin(),
                            period_nanos: 1,
                            count: 1,
                        },
                        vec![DataColumn::new(
                            source.clone(),
                            SupportedType::Int64,
                            vec![Value::Int64(1)],
                        )],
                        100,
                    ));
                })
                .collect();
            return Ok(Box::pin(futures::stream::iter(frames)));
        }
    }

    fn sub(sources: &[&str]) -> DataRequest {
        return DataRequest::new(
            "req",
            sources.iter().map(|s| s.to_string()).collect(),
            crate::common::TimeInterval::new(0, 1000).unwrap(),
        );
    }

    async fn drain(buffer: Arc<MessageBuffer>) -> usize {
        let mut count = 0;
        while let Some(_message) = buffer.dequeue().await.unwrap() {
            count += 1;
        }
        return count;
    }

    #[tokio::test]
    async fn test_recovers_all_streams() {
        let buffer = Arc::new(MessageBuffer::new(64));
        buffer.activate().unwrap();
        let channel = Channel::new(Arc::new(StubArchive), 2, CancelFlag::new());
        let consumer = tokio::spawn(drain(buffer.clone()));

        let subs = [sub(&["A", "B"]), sub(&["C"]), sub(&["D", "E"])];
        let stats = channel.recover_requests(&subs, &buffer).await.unwrap();
        assert_eq!(stats.messages, 5);
        assert_eq!(stats.bytes, 500);

        buffer.shutdown().await.unwrap();
        assert_eq!(consumer.await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_failure_closes_buffer() {
        let buffer = Arc::new(MessageBuffer::new(64));
        buffer.activate().unwrap();
        let cancel = CancelFlag::new();
        let channel = Channel::new(Arc::new(StubArchive), 4, cancel.clone());

        let subs = [sub(&["A"]), sub(&["boom"]), sub(&["B"])];
        let err = channel.recover_requests(&subs, &buffer).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamFailure);
        assert!(cancel.is_cancelled());
        assert_eq!(
            buffer.state(),
            crate::engine::buffer::BufferState::Closed
        );
    }

    #[tokio::test]
    async fn test_empty_request_list() {
        let buffer = Arc::new(MessageBuffer::new(4));
        buffer.activate().unwrap();
        let channel = Channel::new(Arc::new(StubArchive), 4, CancelFlag::new());
        let stats = channel.recover_requests(&[], &buffer).await.unwrap();
        assert_eq!(stats, RecoveryStats::default());
    }
}
