use crate::common::{Nanos, div_ceil_i64};
use crate::engine::channel::{ArchiveConnection, ResponseStream};
use crate::engine::error::Result;
use crate::engine::types::{DataColumn, DataRequest, ResponseMessage, SupportedType, TimingKey, Value};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::Duration;

type ValueFn = Box<dyn Fn(Nanos) -> Value + Send + Sync>;

struct SourceSeries {
    data_type: SupportedType,
    generate: ValueFn,
}

/// In-process archive serving synthetic clock-keyed frames.
///
/// Every source lives on the same uniform grid; a request is answered with
/// frames of at most `frame_rows` samples, each carrying one column per
/// requested source. Used by the demo binary and the end-to-end tests.
pub struct MemoryArchive {
    period_nanos: i64,
    frame_rows: usize,
    sources: BTreeMap<String, SourceSeries>,
}

impl MemoryArchive {
    pub fn new(period: Duration) -> Self {
        return MemoryArchive {
            period_nanos: (period.as_nanos() as i64).max(1),
            frame_rows: 256,
            sources: BTreeMap::new(),
        };
    }

    pub fn with_frame_rows(mut self, frame_rows: usize) -> Self {
        self.frame_rows = frame_rows.max(1);
        return self;
    }

    pub fn with_source(
        mut self,
        name: impl Into<String>,
        data_type: SupportedType,
        generate: impl Fn(Nanos) -> Value + Send + Sync + 'static,
    ) -> Self {
        self.sources.insert(
            name.into(),
            SourceSeries {
                data_type,
                generate: Box::new(generate),
            },
        );
        return self;
    }

    /// Grid timestamps covered by the request: multiples of the period
    /// within the closed range.
    fn grid(&self, request: &DataRequest) -> Vec<Nanos> {
        let first = div_ceil_i64(request.range.begin(), self.period_nanos) * self.period_nanos;
        let mut out = Vec::new();
        let mut ts = first;
        while ts <= request.range.end() {
            out.push(ts);
            ts += self.period_nanos;
        }
        return out;
    }
}

#[async_trait]
impl ArchiveConnection for MemoryArchive {
    async fn open_stream(&self, request: &DataRequest) -> Result<ResponseStream> {
        let known: Vec<(&String, &SourceSeries)> = request
            .sources
            .iter()
            .filter_map(|name| self.sources.get_key_value(name))
            .collect();
        let grid = self.grid(request);

        let mut frames: Vec<Result<ResponseMessage>> = Vec::new();
        for chunk in grid.chunks(self.frame_rows) {
            if known.is_empty() {
                break;
            }
            let columns: Vec<DataColumn> = known
                .iter()
                .map(|(name, series)| {
                    return DataColumn::new(
                        (*name).clone(),
                        series.data_type,
                        chunk.iter().map(|ts| (series.generate)(*ts)).collect(),
                    );
                })
                .collect();
            let byte_size = 64 + 16 * chunk.len() * columns.len();
            frames.push(Ok(ResponseMessage::new(
                TimingKey::Clock {
                    start: chunk[0],
                    period_nanos: self.period_nanos,
                    count: chunk.len(),
                },
                columns,
                byte_size,
            )));
        }
        log::trace!(
            "Memory archive answers {} with {} frame(s)",
            request.range,
            frames.len()
        );
        return Ok(Box::pin(futures::stream::iter(frames)));
    }
}

/// Archive double driven by a closure: maps every sub-request to a canned
/// frame list. Handy as a stub for engine users and for tests that need
/// exact control over keys, columns and failures.
pub struct ScriptedArchive {
    script: Box<dyn Fn(&DataRequest) -> Vec<Result<ResponseMessage>> + Send + Sync>,
}

impl ScriptedArchive {
    pub fn new(
        script: impl Fn(&DataRequest) -> Vec<Result<ResponseMessage>> + Send + Sync + 'static,
    ) -> Self {
        return ScriptedArchive {
            script: Box::new(script),
        };
    }
}

#[async_trait]
impl ArchiveConnection for ScriptedArchive {
    async fn open_stream(&self, request: &DataRequest) -> Result<ResponseStream> {
        return Ok(Box::pin(futures::stream::iter((self.script)(request))));
    }
}
