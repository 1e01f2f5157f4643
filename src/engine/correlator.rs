use crate::engine::buffer::MessageBuffer;
use crate::engine::error::{ErrorKind, Result};
use crate::engine::types::{CorrelatedBlock, ResponseMessage, TimingKey};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinSet;

/// Groups response messages by timing key into correlated blocks.
///
/// Push model: every message is folded into the (key -> block) map as it
/// arrives. The map is guarded so that at most one block per key ever
/// exists and column appends are serialized within a block, which makes the
/// per-message step safe to run from a worker pool.
pub struct Correlator {
    blocks: RwLock<HashMap<TimingKey, Arc<Mutex<CorrelatedBlock>>>>,
    error_checking: bool,
}

impl Correlator {
    pub fn new(error_checking: bool) -> Self {
        return Correlator {
            blocks: RwLock::new(HashMap::new()),
            error_checking,
        };
    }

    /// Number of distinct timing keys seen so far.
    pub fn key_count(&self) -> usize {
        return self.blocks.read().unwrap().len();
    }

    /// Discards all correlated state. Invoked at the start of every request.
    pub fn reset(&self) {
        let mut blocks = self.blocks.write().unwrap();
        if !blocks.is_empty() {
            log::debug!("Discarding {} correlated blocks", blocks.len());
        }
        blocks.clear();
    }

    fn block_for(&self, key: &TimingKey) -> Arc<Mutex<CorrelatedBlock>> {
        {
            let blocks = self.blocks.read().unwrap();
            if let Some(block) = blocks.get(key) {
                return block.clone();
            }
        }
        let mut blocks = self.blocks.write().unwrap();
        return blocks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(CorrelatedBlock::new(key.clone()))))
            .clone();
    }

    /// Folds one message into the block set.
    pub fn correlate(&self, message: ResponseMessage) -> Result<()> {
        let key = message.timing()?.clone();
        if self.error_checking {
            let expected = key.count();
            for column in &message.columns {
                if column.values.len() != expected {
                    return Err(ErrorKind::SizeMismatch.with_message(format!(
                        "column {} carries {} values, timing key defines {}",
                        column.source,
                        column.values.len(),
                        expected
                    )));
                }
            }
        }

        let block = self.block_for(&key);
        let mut block = block.lock().unwrap();
        for column in message.columns {
            let source = column.source.clone();
            if !block.insert_column(column) {
                // First writer wins.
                log::trace!("Dropping duplicate column for source {}", source);
            }
        }
        return Ok(());
    }

    /// Drains the block set, ordered by key start time (ties broken by the
    /// structural key order, so the result is deterministic).
    pub fn take_sorted(&self) -> Vec<CorrelatedBlock> {
        let map = std::mem::take(&mut *self.blocks.write().unwrap());
        let mut blocks: Vec<CorrelatedBlock> = map
            .into_values()
            .map(|block| match Arc::try_unwrap(block) {
                Ok(inner) => inner.into_inner().unwrap(),
                Err(shared) => shared.lock().unwrap().clone(),
            })
            .collect();
        blocks.sort_by(|a, b| a.timing().cmp(b.timing()));
        return blocks;
    }

    /// Structural verification over the drained block set, gated on the
    /// error-checking flag by the caller.
    pub fn verify_blocks(blocks: &[CorrelatedBlock]) -> Result<()> {
        for block in blocks {
            block.verify()?;
        }
        return Ok(());
    }
}

/// Worker-pool settings for the transfer task.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    pub concurrency: bool,
    pub pivot: usize,
    pub threads: usize,
}

struct WorkerPool {
    tx: mpsc::Sender<ResponseMessage>,
    workers: JoinSet<Result<()>>,
}

impl WorkerPool {
    fn start(correlator: Arc<Correlator>, threads: usize) -> Self {
        let threads = threads.max(1);
        let (tx, rx) = mpsc::channel::<ResponseMessage>(threads * 2);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let mut workers = JoinSet::new();
        for _ in 0..threads {
            let rx = rx.clone();
            let correlator = correlator.clone();
            workers.spawn(async move {
                loop {
                    let message = rx.lock().await.recv().await;
                    match message {
                        Some(message) => correlator.correlate(message)?,
                        None => return Ok(()),
                    }
                }
            });
        }
        log::debug!("Correlator worker pool started ({} workers)", threads);
        return WorkerPool { tx, workers };
    }

    async fn submit(&self, message: ResponseMessage) -> Result<()> {
        return self
            .tx
            .send(message)
            .await
            .map_err(|_| ErrorKind::CorrelationFailure.with_message("worker pool stopped"));
    }

    async fn finish(mut self) -> Result<()> {
        drop(self.tx);
        let mut first_error = None;
        while let Some(joined) = self.workers.join_next().await {
            let result = joined
                .map_err(|e| ErrorKind::CorrelationFailure.with_context(e))
                .and_then(|r| r);
            if let Err(err) = result {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => return Err(err),
            None => return Ok(()),
        }
    }
}

/// Single-consumer drain loop: feeds the correlator from the buffer until
/// the buffer reports closed-and-empty. Switches to the worker pool once
/// the distinct-key count passes the pivot (when concurrency is enabled).
///
/// Returns the number of messages transferred.
pub async fn transfer(
    buffer: Arc<MessageBuffer>,
    correlator: Arc<Correlator>,
    options: TransferOptions,
) -> Result<u64> {
    let mut pool: Option<WorkerPool> = None;
    let mut transferred: u64 = 0;
    loop {
        let message = match buffer.dequeue().await? {
            Some(message) => message,
            None => break,
        };
        transferred += 1;
        if options.concurrency && pool.is_none() && correlator.key_count() > options.pivot {
            pool = Some(WorkerPool::start(correlator.clone(), options.threads));
        }
        match &pool {
            Some(pool) => pool.submit(message).await?,
            None => correlator.correlate(message)?,
        }
    }
    if let Some(pool) = pool {
        pool.finish().await?;
    }
    log::trace!("Transfer finished, {} messages", transferred);
    return Ok(transferred);
}
