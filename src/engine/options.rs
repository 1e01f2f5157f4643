use std::time::Duration;

/// Per-engine configuration with process defaults.
///
/// One instance is owned by each engine; mutation goes through the engine
/// setters, which reject changes while a request is in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOptions {
    /// Master switch for request decomposition. Off means every request is
    /// recovered over a single stream, unsplit.
    pub multi_stream: bool,
    /// Upper bound on concurrent server streams (and on the number of
    /// sub-requests the decomposer may produce).
    pub max_streams: usize,
    /// Requests whose domain size (sources x seconds) is below this are not
    /// decomposed at all.
    pub trigger_domain: i64,
    /// Preferred-split bound on sources per sub-request.
    pub max_sources: usize,
    /// Preferred-split bound on the time span of one sub-request.
    pub max_duration: Duration,
    /// Correlate concurrently with recovery (a transfer task drains the
    /// buffer mid-stream) instead of after all streams complete.
    pub correlate_mid_stream: bool,
    /// Allow the correlator to spread messages over a worker pool.
    pub correlate_concurrency: bool,
    /// Distinct-key count beyond which the correlator goes concurrent.
    pub correlate_pivot: usize,
    /// Worker pool size for concurrent correlation.
    pub correlate_threads: usize,
    /// Coalesce colliding time domains instead of failing the request.
    pub allow_domain_collisions: bool,
    /// Build sampled blocks of one partition in parallel.
    pub assembler_concurrency: bool,
    /// Block count beyond which the assembler goes parallel.
    pub assembler_pivot: usize,
    /// Run structural verification on blocks and the final aggregate.
    pub error_checking: bool,
    /// Bound of the recovery message buffer. With post-stream correlation
    /// the whole response must fit here, so keep it generous.
    pub buffer_capacity: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        return EngineOptions {
            multi_stream: true,
            max_streams: 4,
            trigger_domain: 1000,
            max_sources: 25,
            max_duration: Duration::from_secs(600),
            correlate_mid_stream: true,
            correlate_concurrency: false,
            correlate_pivot: 100,
            correlate_threads: 4,
            allow_domain_collisions: true,
            assembler_concurrency: false,
            assembler_pivot: 100,
            error_checking: false,
            buffer_capacity: 1024,
        };
    }
}
