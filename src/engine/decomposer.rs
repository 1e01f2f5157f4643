use crate::common::{TimeInterval, div_ceil_i64};
use crate::engine::options::EngineOptions;
use crate::engine::types::DataRequest;

/// Bounds for one decomposition run, snapshotted from the engine options.
#[derive(Debug, Clone)]
pub struct DecomposeParams {
    pub enabled: bool,
    pub max_streams: usize,
    pub max_sources: usize,
    pub max_duration_nanos: i64,
    pub trigger_domain: i64,
}

impl DecomposeParams {
    pub fn from_options(options: &EngineOptions) -> Self {
        return DecomposeParams {
            enabled: options.multi_stream,
            max_streams: options.max_streams.max(1),
            max_sources: options.max_sources.max(1),
            max_duration_nanos: (options.max_duration.as_nanos() as i64).max(1),
            trigger_domain: options.trigger_domain,
        };
    }
}

/// Splits contiguous source chunks, nearly equal in size.
fn chunk_sources(sources: &[String], chunks: usize) -> Vec<Vec<String>> {
    let chunks = chunks.clamp(1, sources.len().max(1));
    let base = sources.len() / chunks;
    let extra = sources.len() % chunks;
    let mut out = Vec::with_capacity(chunks);
    let mut offset = 0;
    for i in 0..chunks {
        let take = base + usize::from(i < extra);
        out.push(sources[offset..offset + take].to_vec());
        offset += take;
    }
    return out;
}

/// Splits a closed interval into contiguous, disjoint sub-intervals whose
/// union equals the input. Boundaries are integer nanoseconds, so slice i
/// ends exactly one nanosecond before slice i+1 begins.
fn slice_range(range: TimeInterval, slices: usize) -> Vec<TimeInterval> {
    let span = range.duration_nanos() + 1;
    let slices = (slices as i64).clamp(1, span) as usize;
    let mut out = Vec::with_capacity(slices);
    let mut begin = range.begin();
    for i in 0..slices as i64 {
        let end = range.begin() + span * (i + 1) / slices as i64 - 1;
        // Slices are constructed monotone, new() cannot fail here.
        out.push(TimeInterval::new(begin, end).unwrap());
        begin = end + 1;
    }
    return out;
}

fn grid(request: &DataRequest, source_chunks: usize, time_slices: usize) -> Vec<DataRequest> {
    let mut out = Vec::new();
    for sources in chunk_sources(&request.sources, source_chunks) {
        for range in slice_range(request.range, time_slices) {
            out.push(DataRequest::new(
                request.request_id.clone(),
                sources.clone(),
                range,
            ));
        }
    }
    return out;
}

/// Splits one request into sub-requests whose union equals the original.
///
/// Decision procedure, first satisfied wins:
/// 1. small domain / single stream / disabled: no split;
/// 2. preferred grid bounded by max_sources x max_duration;
/// 3. horizontal source split;
/// 4. grid sized from the stream count;
/// 5. vertical time split.
pub fn decompose(request: &DataRequest, params: &DecomposeParams) -> Vec<DataRequest> {
    if !params.enabled || params.max_streams == 1 || request.domain_size() < params.trigger_domain
    {
        return vec![request.clone()];
    }

    let source_count = request.sources.len();

    // Preferred split: the smallest grid honoring both per-sub bounds.
    let preferred_sources = source_count.max(1).div_ceil(params.max_sources);
    let preferred_slices = div_ceil_i64(request.range.duration_nanos(), params.max_duration_nanos)
        .max(1) as usize;
    if preferred_sources * preferred_slices <= params.max_streams {
        log::debug!(
            "Decomposing {}: preferred grid {}x{}",
            request.request_id,
            preferred_sources,
            preferred_slices
        );
        return grid(request, preferred_sources, preferred_slices);
    }

    // Horizontal: enough sources to feed every stream.
    if source_count >= params.max_streams {
        log::debug!(
            "Decomposing {}: horizontal over {} streams",
            request.request_id,
            params.max_streams
        );
        return grid(request, params.max_streams, 1);
    }

    // Grid sized by the stream count: roughly sqrt(max_streams) source
    // chunks, time takes the complementary factor.
    if source_count > params.max_streams / 2 {
        let sources = ((params.max_streams as f64).sqrt().round() as usize)
            .clamp(1, source_count);
        let slices = (params.max_streams / sources).max(1);
        if sources * slices <= params.max_streams {
            log::debug!(
                "Decomposing {}: stream-count grid {}x{}",
                request.request_id,
                sources,
                slices
            );
            return grid(request, sources, slices);
        }
    }

    // Vertical: time only.
    log::debug!(
        "Decomposing {}: vertical over {} slices",
        request.request_id,
        params.max_streams
    );
    return grid(request, 1, params.max_streams);
}
