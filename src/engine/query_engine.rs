use crate::engine::aggregate::SampledAggregate;
use crate::engine::assembler::{AssembleOptions, Assembler};
use crate::engine::buffer::MessageBuffer;
use crate::engine::channel::{ArchiveConnection, CancelFlag, Channel};
use crate::engine::correlator::{Correlator, TransferOptions, transfer};
use crate::engine::decomposer::{DecomposeParams, decompose};
use crate::engine::domain;
use crate::engine::error::{ErrorKind, Result};
use crate::engine::options::EngineOptions;
use crate::engine::types::DataRequest;
use size::Size;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Client-side query engine: decomposes a request, recovers it over
/// parallel server streams, correlates and coalesces the responses into a
/// sampled aggregate.
///
/// Overlapping calls on one engine serialize at the process entry point.
/// The connection is owned by the caller and never closed here.
pub struct QueryEngine {
    connection: Arc<dyn ArchiveConnection>,
    options: Mutex<EngineOptions>,
    /// Serializes process calls.
    process_lock: tokio::sync::Mutex<()>,
    /// Set while a request is running; configuration is frozen then.
    in_flight: AtomicBool,
    /// Teardown handles of the in-flight request, for cancel().
    active: Mutex<Option<ActiveRequest>>,
    cancel_requested: AtomicBool,
    messages: AtomicU64,
    bytes: AtomicU64,
    decomposed: Mutex<Vec<DataRequest>>,
    last_request_id: Mutex<String>,
}

struct ActiveRequest {
    cancel: CancelFlag,
    buffer: Arc<MessageBuffer>,
}

impl QueryEngine {
    pub fn new(connection: Arc<dyn ArchiveConnection>) -> Self {
        return QueryEngine::with_options(connection, EngineOptions::default());
    }

    pub fn with_options(connection: Arc<dyn ArchiveConnection>, options: EngineOptions) -> Self {
        return QueryEngine {
            connection,
            options: Mutex::new(options),
            process_lock: tokio::sync::Mutex::new(()),
            in_flight: AtomicBool::new(false),
            active: Mutex::new(None),
            cancel_requested: AtomicBool::new(false),
            messages: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
            decomposed: Mutex::new(Vec::new()),
            last_request_id: Mutex::new(String::new()),
        };
    }

    pub fn options(&self) -> EngineOptions {
        return self.options.lock().unwrap().clone();
    }

    fn update(&self, apply: impl FnOnce(&mut EngineOptions)) -> Result<()> {
        if self.in_flight.load(Ordering::SeqCst) {
            return Err(ErrorKind::InvalidState
                .with_message("configuration is frozen while a request is in flight"));
        }
        apply(&mut self.options.lock().unwrap());
        return Ok(());
    }

    pub fn set_multi_stream(&self, enabled: bool) -> Result<()> {
        return self.update(|o| o.multi_stream = enabled);
    }

    pub fn set_max_streams(&self, streams: usize) -> Result<()> {
        if streams == 0 {
            return Err(ErrorKind::InvalidState.with_message("max_streams must be positive"));
        }
        return self.update(|o| o.max_streams = streams);
    }

    pub fn set_trigger_domain(&self, domain: i64) -> Result<()> {
        if domain < 0 {
            return Err(ErrorKind::InvalidState.with_message("trigger_domain must not be negative"));
        }
        return self.update(|o| o.trigger_domain = domain);
    }

    pub fn set_max_sources(&self, sources: usize) -> Result<()> {
        if sources == 0 {
            return Err(ErrorKind::InvalidState.with_message("max_sources must be positive"));
        }
        return self.update(|o| o.max_sources = sources);
    }

    pub fn set_max_duration(&self, duration: Duration) -> Result<()> {
        if duration.is_zero() {
            return Err(ErrorKind::InvalidState.with_message("max_duration must be positive"));
        }
        return self.update(|o| o.max_duration = duration);
    }

    pub fn set_correlate_mid_stream(&self, enabled: bool) -> Result<()> {
        return self.update(|o| o.correlate_mid_stream = enabled);
    }

    pub fn set_correlate_concurrency(&self, enabled: bool) -> Result<()> {
        return self.update(|o| o.correlate_concurrency = enabled);
    }

    pub fn set_correlate_pivot(&self, pivot: usize) -> Result<()> {
        if pivot == 0 {
            return Err(ErrorKind::InvalidState.with_message("correlate_pivot must be positive"));
        }
        return self.update(|o| o.correlate_pivot = pivot);
    }

    pub fn set_correlate_threads(&self, threads: usize) -> Result<()> {
        if threads == 0 {
            return Err(ErrorKind::InvalidState.with_message("correlate_threads must be positive"));
        }
        return self.update(|o| o.correlate_threads = threads);
    }

    pub fn set_allow_domain_collisions(&self, allowed: bool) -> Result<()> {
        return self.update(|o| o.allow_domain_collisions = allowed);
    }

    pub fn set_assembler_concurrency(&self, enabled: bool) -> Result<()> {
        return self.update(|o| o.assembler_concurrency = enabled);
    }

    pub fn set_assembler_pivot(&self, pivot: usize) -> Result<()> {
        if pivot == 0 {
            return Err(ErrorKind::InvalidState.with_message("assembler_pivot must be positive"));
        }
        return self.update(|o| o.assembler_pivot = pivot);
    }

    pub fn set_error_checking(&self, enabled: bool) -> Result<()> {
        return self.update(|o| o.error_checking = enabled);
    }

    pub fn reset_config(&self) -> Result<()> {
        return self.update(|o| *o = EngineOptions::default());
    }

    /// Cancels the in-flight request, if any: all streams observe the
    /// cancel flag, the buffer is force-closed and the request surfaces a
    /// single cancelled error. Returns whether a request was in flight.
    pub fn cancel(&self) -> bool {
        let active = self.active.lock().unwrap();
        match &*active {
            Some(request) => {
                log::debug!("Cancelling in-flight request");
                self.cancel_requested.store(true, Ordering::SeqCst);
                request.cancel.cancel();
                request.buffer.shutdown_now();
                return true;
            }
            None => return false,
        }
    }

    /// Total messages processed by this engine so far.
    pub fn processed_message_count(&self) -> u64 {
        return self.messages.load(Ordering::SeqCst);
    }

    /// Total response bytes processed by this engine so far.
    pub fn processed_byte_count(&self) -> u64 {
        return self.bytes.load(Ordering::SeqCst);
    }

    /// Sub-requests of the most recent process call.
    pub fn decomposed_requests(&self) -> Vec<DataRequest> {
        return self.decomposed.lock().unwrap().clone();
    }

    /// Identifier of the most recent request.
    pub fn request_id(&self) -> String {
        return self.last_request_id.lock().unwrap().clone();
    }

    /// Runs the decomposer, then recovery, correlation and assembly.
    pub async fn process_request(&self, request: &DataRequest) -> Result<SampledAggregate> {
        return self.process_request_with_deadline(request, None).await;
    }

    pub async fn process_request_with_deadline(
        &self,
        request: &DataRequest,
        deadline: Option<Duration>,
    ) -> Result<SampledAggregate> {
        let _guard = self.process_lock.lock().await;
        let options = self.options();
        let subs = decompose(request, &DecomposeParams::from_options(&options));
        *self.decomposed.lock().unwrap() = subs.clone();
        *self.last_request_id.lock().unwrap() = request.request_id.clone();
        return self
            .run_guarded(&request.request_id, subs, options, deadline)
            .await;
    }

    /// Recovers an explicit sub-request list, skipping decomposition.
    pub async fn process_requests(&self, subs: &[DataRequest]) -> Result<SampledAggregate> {
        return self.process_requests_with_deadline(subs, None).await;
    }

    pub async fn process_requests_with_deadline(
        &self,
        subs: &[DataRequest],
        deadline: Option<Duration>,
    ) -> Result<SampledAggregate> {
        let _guard = self.process_lock.lock().await;
        let options = self.options();
        let request_id = subs
            .first()
            .map(|sub| sub.request_id.clone())
            .unwrap_or_default();
        *self.decomposed.lock().unwrap() = subs.to_vec();
        *self.last_request_id.lock().unwrap() = request_id.clone();
        return self.run_guarded(&request_id, subs.to_vec(), options, deadline).await;
    }

    async fn run_guarded(
        &self,
        request_id: &str,
        subs: Vec<DataRequest>,
        options: EngineOptions,
        deadline: Option<Duration>,
    ) -> Result<SampledAggregate> {
        self.in_flight.store(true, Ordering::SeqCst);
        let started = Instant::now();
        let result = self.run(request_id, subs, &options, deadline).await;
        self.in_flight.store(false, Ordering::SeqCst);

        match &result {
            Ok(aggregate) => log::debug!(
                "Request {} done: {} block(s), {} sample(s), took {} ms",
                request_id,
                aggregate.blocks().len(),
                aggregate.sample_count(),
                started.elapsed().as_millis()
            ),
            Err(err) => log::debug!(
                "Request {} failed after {} ms: {}",
                request_id,
                started.elapsed().as_millis(),
                err
            ),
        }
        return result;
    }

    async fn run(
        &self,
        request_id: &str,
        subs: Vec<DataRequest>,
        options: &EngineOptions,
        deadline: Option<Duration>,
    ) -> Result<SampledAggregate> {
        let cancel = CancelFlag::new();
        let buffer = Arc::new(MessageBuffer::new(options.buffer_capacity));
        let correlator = Arc::new(Correlator::new(options.error_checking));
        correlator.reset();
        buffer.activate()?;

        self.cancel_requested.store(false, Ordering::SeqCst);
        *self.active.lock().unwrap() = Some(ActiveRequest {
            cancel: cancel.clone(),
            buffer: buffer.clone(),
        });

        let pipeline = self.pipeline(request_id, &subs, options, &cancel, &buffer, &correlator);
        tokio::pin!(pipeline);
        let result = match deadline {
            None => pipeline.await,
            Some(limit) => {
                tokio::select! {
                    result = &mut pipeline => result,
                    _ = tokio::time::sleep(limit) => {
                        Err(ErrorKind::DeadlineExceeded
                            .with_message(format!("request exceeded {:?}", limit)))
                    }
                }
            }
        };

        *self.active.lock().unwrap() = None;
        match result {
            Ok(aggregate) => return Ok(aggregate),
            Err(err) => {
                // Partial results are discarded; whatever is still running
                // observes the cancel flag or the closed buffer and unwinds.
                cancel.cancel();
                buffer.shutdown_now();
                correlator.reset();
                log::trace!("Request {} torn down: {}", request_id, err);
                if self.cancel_requested.load(Ordering::SeqCst)
                    && err.kind() != ErrorKind::Cancelled
                {
                    return Err(ErrorKind::Cancelled.with_message("request cancelled by caller"));
                }
                return Err(err);
            }
        }
    }

    async fn pipeline(
        &self,
        request_id: &str,
        subs: &[DataRequest],
        options: &EngineOptions,
        cancel: &CancelFlag,
        buffer: &Arc<MessageBuffer>,
        correlator: &Arc<Correlator>,
    ) -> Result<SampledAggregate> {
        let channel = Channel::new(self.connection.clone(), options.max_streams, cancel.clone());
        let transfer_options = TransferOptions {
            concurrency: options.correlate_concurrency,
            pivot: options.correlate_pivot,
            threads: options.correlate_threads,
        };

        let stats;
        if options.correlate_mid_stream {
            let mut drainer = tokio::spawn(transfer(
                buffer.clone(),
                correlator.clone(),
                transfer_options,
            ));
            let recover = channel.recover_requests(subs, buffer);
            tokio::pin!(recover);

            stats = tokio::select! {
                recovered = &mut recover => {
                    match recovered {
                        Ok(stats) => stats,
                        Err(err) => {
                            // The channel already force-closed the buffer;
                            // the drainer sees it and terminates.
                            let _ = drainer.await;
                            return Err(err);
                        }
                    }
                }
                transferred = &mut drainer => {
                    // The drainer never terminates before shutdown unless
                    // correlation failed.
                    let err = match transferred {
                        Ok(Err(err)) => err,
                        Ok(Ok(_)) => {
                            ErrorKind::CorrelationFailure.with_message("transfer ended early")
                        }
                        Err(join_err) => ErrorKind::CorrelationFailure.with_context(join_err),
                    };
                    cancel.cancel();
                    buffer.shutdown_now();
                    let _ = recover.await;
                    return Err(err);
                }
            };
            buffer.shutdown().await?;
            drainer
                .await
                .map_err(|e| ErrorKind::CorrelationFailure.with_context(e))
                .and_then(|r| r)?;
        } else {
            // Post-stream correlation: recovery first, then a joint
            // shutdown + drain so draining still closes on empty.
            stats = channel.recover_requests(subs, buffer).await?;
            let drain = transfer(buffer.clone(), correlator.clone(), transfer_options);
            let (shutdown_result, drain_result) = tokio::join!(buffer.shutdown(), drain);
            shutdown_result?;
            drain_result?;
        }

        self.messages.fetch_add(stats.messages, Ordering::SeqCst);
        self.bytes.fetch_add(stats.bytes, Ordering::SeqCst);
        log::debug!(
            "Request {} recovered {} message(s), {}",
            request_id,
            stats.messages,
            Size::from_bytes(stats.bytes)
        );

        let blocks = correlator.take_sorted();
        if options.error_checking {
            Correlator::verify_blocks(&blocks)?;
        }
        let partition = domain::partition(blocks, options.allow_domain_collisions)?;
        let assembler = Assembler::new(AssembleOptions {
            concurrency: options.assembler_concurrency,
            pivot: options.assembler_pivot,
            error_checking: options.error_checking,
        });
        return assembler.assemble(request_id, partition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::{NANOS_PER_SEC, TimeInterval};
    use crate::engine::aggregate::SampledBlock;
    use crate::engine::archive::ScriptedArchive;
    use crate::engine::types::{DataColumn, ResponseMessage, SupportedType, TimingKey, Value};
    use pretty_assertions::assert_eq;

    fn clock(start_sec: i64, period_sec: i64, count: usize) -> TimingKey {
        return TimingKey::Clock {
            start: start_sec * NANOS_PER_SEC,
            period_nanos: period_sec * NANOS_PER_SEC,
            count,
        };
    }

    fn column(source: &str, data_type: SupportedType, values: Vec<Value>) -> DataColumn {
        return DataColumn::new(source, data_type, values);
    }

    fn int_values(n: usize) -> Vec<Value> {
        return (0..n as i32).map(Value::Int32).collect();
    }

    fn request(sources: &[&str], begin_sec: i64, end_sec: i64) -> DataRequest {
        return DataRequest::new(
            "req-1",
            sources.iter().map(|s| s.to_string()).collect(),
            TimeInterval::new(begin_sec * NANOS_PER_SEC, end_sec * NANOS_PER_SEC).unwrap(),
        );
    }

    /// Scenario: one small request, one message, one disjoint block.
    #[tokio::test]
    async fn test_single_small_request() {
        let archive = ScriptedArchive::new(|_request| {
            return vec![Ok(ResponseMessage::new(
                clock(0, 1, 10),
                vec![
                    column("A", SupportedType::Int32, int_values(10)),
                    column("B", SupportedType::Int32, int_values(10)),
                ],
                320,
            ))];
        });
        let engine = QueryEngine::new(Arc::new(archive));

        // Domain size 2 x 10 = 20, under the default trigger domain.
        let aggregate = engine.process_request(&request(&["A", "B"], 0, 10)).await.unwrap();
        assert_eq!(engine.decomposed_requests().len(), 1);
        assert_eq!(aggregate.blocks().len(), 1);
        assert!(matches!(aggregate.blocks()[0], SampledBlock::Disjoint(_)));
        assert_eq!(aggregate.sample_count(), 10);
        assert_eq!(aggregate.source_names().len(), 2);
        assert_eq!(aggregate.request_id(), "req-1");
        assert_eq!(aggregate.blocks()[0].request_id(), "req-1");
        assert_eq!(engine.processed_message_count(), 1);
        assert_eq!(engine.processed_byte_count(), 320);
    }

    /// Scenario: horizontal split into {A,B} and {C,D} over the full range.
    #[tokio::test]
    async fn test_horizontal_split() {
        let archive = ScriptedArchive::new(|request| {
            let count = 5;
            let columns = request
                .sources
                .iter()
                .map(|source| column(source, SupportedType::Int32, int_values(count)))
                .collect();
            return vec![Ok(ResponseMessage::new(
                TimingKey::Clock {
                    start: request.range.begin(),
                    period_nanos: NANOS_PER_SEC,
                    count,
                },
                columns,
                64,
            ))];
        });
        let engine = QueryEngine::new(Arc::new(archive));
        engine.set_max_streams(2).unwrap();
        engine.set_max_sources(2).unwrap();
        engine.set_trigger_domain(100).unwrap();

        let aggregate = engine
            .process_request(&request(&["A", "B", "C", "D"], 0, 100))
            .await
            .unwrap();

        let subs = engine.decomposed_requests();
        assert_eq!(subs.len(), 2);
        assert_eq!(subs[0].sources, vec!["A", "B"]);
        assert_eq!(subs[1].sources, vec!["C", "D"]);
        assert_eq!(subs[0].range, subs[1].range);
        assert_eq!(aggregate.source_names().len(), 4);
        // One message per sub-request.
        assert_eq!(engine.processed_message_count(), subs.len() as u64);
    }

    /// Scenario: two disjoint series become two disjoint sampled blocks.
    #[tokio::test]
    async fn test_disjoint_series() {
        let archive = ScriptedArchive::new(|_request| {
            return vec![
                Ok(ResponseMessage::new(
                    clock(0, 1, 5),
                    vec![column("A", SupportedType::Int32, int_values(5))],
                    80,
                )),
                Ok(ResponseMessage::new(
                    clock(10, 1, 5),
                    vec![column("A", SupportedType::Int32, int_values(5))],
                    80,
                )),
            ];
        });
        let engine = QueryEngine::new(Arc::new(archive));

        let aggregate = engine.process_request(&request(&["A"], 0, 14)).await.unwrap();
        assert_eq!(aggregate.blocks().len(), 2);
        assert!(matches!(aggregate.blocks()[0], SampledBlock::Disjoint(_)));
        assert!(matches!(aggregate.blocks()[1], SampledBlock::Disjoint(_)));
        assert_eq!(aggregate.sample_count(), 10);
    }

    fn colliding_archive() -> ScriptedArchive {
        return ScriptedArchive::new(|_request| {
            return vec![
                Ok(ResponseMessage::new(
                    clock(0, 1, 5),
                    vec![column("A", SupportedType::Int32, int_values(5))],
                    80,
                )),
                Ok(ResponseMessage::new(
                    clock(0, 2, 3),
                    vec![column("B", SupportedType::Int32, int_values(3))],
                    48,
                )),
            ];
        });
    }

    /// Scenario: collision coalesced onto the union grid.
    #[tokio::test]
    async fn test_collision_allowed() {
        let engine = QueryEngine::new(Arc::new(colliding_archive()));
        let aggregate = engine.process_request(&request(&["A", "B"], 0, 4)).await.unwrap();

        assert_eq!(aggregate.blocks().len(), 1);
        let merged = &aggregate.blocks()[0];
        assert!(matches!(merged, SampledBlock::SuperDomain(_)));
        let expected: Vec<i64> = (0..5).map(|i| i * NANOS_PER_SEC).collect();
        assert_eq!(merged.timestamps(), expected);
        assert_eq!(merged.value_at("B", 1), None);
        assert_eq!(merged.value_at("B", 3), None);
        assert_eq!(merged.value_at("B", 0), Some(&Value::Int32(0)));
    }

    /// Scenario: same input with collisions disallowed fails the request.
    #[tokio::test]
    async fn test_collision_disallowed() {
        let engine = QueryEngine::new(Arc::new(colliding_archive()));
        engine.set_allow_domain_collisions(false).unwrap();
        let err = engine.process_request(&request(&["A", "B"], 0, 4)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RangeError);
    }

    fn conflicting_archive() -> ScriptedArchive {
        return ScriptedArchive::new(|_request| {
            return vec![
                Ok(ResponseMessage::new(
                    clock(0, 1, 2),
                    vec![column("A", SupportedType::Int32, int_values(2))],
                    32,
                )),
                Ok(ResponseMessage::new(
                    clock(10, 1, 2),
                    vec![column(
                        "A",
                        SupportedType::Float64,
                        vec![Value::Float64(0.5), Value::Float64(1.5)],
                    )],
                    32,
                )),
            ];
        });
    }

    /// Scenario: a type conflict fails under error checking and is reduced
    /// to the unsupported sentinel without it.
    #[tokio::test]
    async fn test_type_conflict() {
        let engine = QueryEngine::new(Arc::new(conflicting_archive()));
        engine.set_error_checking(true).unwrap();
        let err = engine.process_request(&request(&["A"], 0, 14)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TypeConflict);

        let engine = QueryEngine::new(Arc::new(conflicting_archive()));
        let aggregate = engine.process_request(&request(&["A"], 0, 14)).await.unwrap();
        assert_eq!(aggregate.source_type("A"), Some(SupportedType::Unsupported));
    }

    /// Processing the same request twice yields equal aggregates, counters
    /// aside.
    #[tokio::test]
    async fn test_idempotence() {
        let engine = QueryEngine::new(Arc::new(colliding_archive()));
        let first = engine.process_request(&request(&["A", "B"], 0, 4)).await.unwrap();
        let second = engine.process_request(&request(&["A", "B"], 0, 4)).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.processed_message_count(), 4);
    }

    /// Post-stream correlation produces the same aggregate as mid-stream.
    #[tokio::test]
    async fn test_post_stream_correlation() {
        let engine = QueryEngine::new(Arc::new(colliding_archive()));
        let mid = engine.process_request(&request(&["A", "B"], 0, 4)).await.unwrap();
        engine.set_correlate_mid_stream(false).unwrap();
        let post = engine.process_request(&request(&["A", "B"], 0, 4)).await.unwrap();
        assert_eq!(mid, post);
    }

    /// process_requests skips the decomposer entirely.
    #[tokio::test]
    async fn test_process_requests_verbatim() {
        let archive = ScriptedArchive::new(|request| {
            return vec![Ok(ResponseMessage::new(
                TimingKey::Clock {
                    start: request.range.begin(),
                    period_nanos: NANOS_PER_SEC,
                    count: 2,
                },
                vec![column("A", SupportedType::Int32, int_values(2))],
                32,
            ))];
        });
        let engine = QueryEngine::new(Arc::new(archive));
        let subs = vec![request(&["A"], 0, 1), request(&["A"], 10, 11)];
        let aggregate = engine.process_requests(&subs).await.unwrap();
        assert_eq!(engine.decomposed_requests(), subs);
        assert_eq!(aggregate.blocks().len(), 2);
        assert_eq!(aggregate.sample_count(), 4);
    }

    /// A failing stream aborts the whole request with a single error.
    #[tokio::test]
    async fn test_stream_failure_aborts() {
        let archive = ScriptedArchive::new(|_request| {
            return vec![
                Ok(ResponseMessage::new(
                    clock(0, 1, 2),
                    vec![column("A", SupportedType::Int32, int_values(2))],
                    32,
                )),
                Err(ErrorKind::StreamFailure.with_message("connection reset")),
            ];
        });
        let engine = QueryEngine::new(Arc::new(archive));
        let err = engine.process_request(&request(&["A"], 0, 10)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamFailure);
    }

    /// A message without any timestamp specification fails correlation.
    #[tokio::test]
    async fn test_timing_missing() {
        let archive = ScriptedArchive::new(|_request| {
            return vec![Ok(ResponseMessage {
                timing: None,
                columns: vec![column("A", SupportedType::Int32, int_values(1))],
                byte_size: 16,
            })];
        });
        let engine = QueryEngine::new(Arc::new(archive));
        let err = engine.process_request(&request(&["A"], 0, 10)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TimingMissing);
    }

    /// Configuration is frozen while a request is in flight.
    #[tokio::test]
    async fn test_setters_frozen_in_flight() {
        let archive = ScriptedArchive::new(|_request| {
            return vec![Ok(ResponseMessage::new(
                clock(0, 1, 2),
                vec![column("A", SupportedType::Int32, int_values(2))],
                32,
            ))];
        });
        let engine = Arc::new(QueryEngine::new(Arc::new(archive)));

        // A stream that stalls long enough for the setter to race.
        struct Stalling;
        #[async_trait::async_trait]
        impl ArchiveConnection for Stalling {
            async fn open_stream(
                &self,
                _request: &DataRequest,
            ) -> crate::engine::error::Result<crate::engine::channel::ResponseStream> {
                tokio::time::sleep(Duration::from_millis(200)).await;
                return Ok(Box::pin(futures::stream::empty()));
            }
        }
        let stalled = Arc::new(QueryEngine::new(Arc::new(Stalling)));
        let runner = {
            let stalled = stalled.clone();
            tokio::spawn(async move { stalled.process_request(&request(&["A"], 0, 10)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        let err = stalled.set_max_streams(8).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        runner.await.unwrap().unwrap();
        // After completion the setter works again.
        stalled.set_max_streams(8).unwrap();
        engine.set_max_streams(8).unwrap();
    }

    /// A caller cancel tears the request down with a cancelled error.
    #[tokio::test]
    async fn test_caller_cancel() {
        // Endless producer: the request can only end through cancellation.
        struct Endless;
        #[async_trait::async_trait]
        impl ArchiveConnection for Endless {
            async fn open_stream(
                &self,
                _request: &DataRequest,
            ) -> crate::engine::error::Result<crate::engine::channel::ResponseStream> {
                let frames = futures::stream::repeat_with(|| {
                    return Ok(ResponseMessage::new(
                        TimingKey::Clock {
                            start: 0,
                            period_nanos: NANOS_PER_SEC,
                            count: 1,
                        },
                        vec![DataColumn::new("A", SupportedType::Int32, vec![Value::Int32(1)])],
                        16,
                    ));
                });
                return Ok(Box::pin(frames));
            }
        }
        let engine = Arc::new(QueryEngine::new(Arc::new(Endless)));
        let runner = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.process_request(&request(&["A"], 0, 10)).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.cancel(), true);
        let err = runner.await.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        // Nothing left to cancel afterwards.
        assert_eq!(engine.cancel(), false);
    }

    /// Deadline expiry returns a single canonical error.
    #[tokio::test]
    async fn test_deadline_exceeded() {
        struct Stuck;
        #[async_trait::async_trait]
        impl ArchiveConnection for Stuck {
            async fn open_stream(
                &self,
                _request: &DataRequest,
            ) -> crate::engine::error::Result<crate::engine::channel::ResponseStream> {
                return Ok(Box::pin(futures::stream::pending()));
            }
        }
        let engine = QueryEngine::new(Arc::new(Stuck));
        let err = engine
            .process_request_with_deadline(&request(&["A"], 0, 10), Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DeadlineExceeded);
    }

    /// Invalid setter values are rejected synchronously.
    #[tokio::test]
    async fn test_setter_validation() {
        let engine = QueryEngine::new(Arc::new(ScriptedArchive::new(|_| Vec::new())));
        assert_eq!(
            engine.set_max_streams(0).unwrap_err().kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            engine.set_trigger_domain(-1).unwrap_err().kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            engine.set_max_duration(Duration::ZERO).unwrap_err().kind(),
            ErrorKind::InvalidState
        );
        assert_eq!(
            engine.set_correlate_threads(0).unwrap_err().kind(),
            ErrorKind::InvalidState
        );
        engine.set_max_streams(16).unwrap();
        engine.reset_config().unwrap();
        assert_eq!(engine.options(), EngineOptions::default());
    }
}
