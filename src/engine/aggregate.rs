use crate::common::{Nanos, TimeInterval};
use crate::engine::error::{ErrorKind, Result};
use crate::engine::types::{SupportedType, Value};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// One source's sequence inside a sampled block. A None value at a
/// timestamp means the source did not report there.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampledColumn {
    pub source: String,
    pub data_type: SupportedType,
    pub values: Vec<Option<Value>>,
}

/// Shared representation of both sampled-block variants: a rectangular
/// timestamps x columns view, tagged with the originating request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampledSeries {
    request_id: String,
    timestamps: Vec<Nanos>,
    columns: Vec<SampledColumn>,
}

impl SampledSeries {
    /// Caller guarantees every column length equals the timestamp count.
    pub fn new(
        request_id: impl Into<String>,
        timestamps: Vec<Nanos>,
        columns: Vec<SampledColumn>,
    ) -> Self {
        debug_assert!(columns.iter().all(|c| c.values.len() == timestamps.len()));
        return SampledSeries {
            request_id: request_id.into(),
            timestamps,
            columns,
        };
    }

    pub fn request_id(&self) -> &str {
        return &self.request_id;
    }

    pub fn timestamps(&self) -> &[Nanos] {
        return &self.timestamps;
    }

    pub fn columns(&self) -> &[SampledColumn] {
        return &self.columns;
    }

    pub fn column(&self, source: &str) -> Option<&SampledColumn> {
        return self.columns.iter().find(|c| c.source == source);
    }
}

/// Coalesced output unit: one block of the final aggregate.
///
/// Disjoint blocks come from a single correlated block; super-domain blocks
/// coalesce a whole collision group onto the union timestamp grid. Both
/// expose the same accessors.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SampledBlock {
    Disjoint(SampledSeries),
    SuperDomain(SampledSeries),
}

impl SampledBlock {
    pub fn series(&self) -> &SampledSeries {
        match self {
            SampledBlock::Disjoint(series) => return series,
            SampledBlock::SuperDomain(series) => return series,
        }
    }

    pub fn request_id(&self) -> &str {
        return self.series().request_id();
    }

    pub fn begin(&self) -> Nanos {
        return self.series().timestamps.first().copied().unwrap_or(0);
    }

    pub fn end(&self) -> Nanos {
        return self.series().timestamps.last().copied().unwrap_or(0);
    }

    pub fn range(&self) -> TimeInterval {
        return TimeInterval::new(self.begin(), self.end()).unwrap_or_else(|| TimeInterval::at(0));
    }

    pub fn sample_count(&self) -> usize {
        return self.series().timestamps.len();
    }

    pub fn timestamps(&self) -> &[Nanos] {
        return self.series().timestamps();
    }

    pub fn source_names(&self) -> impl Iterator<Item = &str> {
        return self.series().columns.iter().map(|c| c.source.as_str());
    }

    pub fn source_type(&self, source: &str) -> Option<SupportedType> {
        return self.series().column(source).map(|c| c.data_type);
    }

    pub fn values(&self, source: &str) -> Option<&[Option<Value>]> {
        return self.series().column(source).map(|c| c.values.as_slice());
    }

    pub fn value_at(&self, source: &str, index: usize) -> Option<&Value> {
        return self
            .series()
            .column(source)
            .and_then(|c| c.values.get(index))
            .and_then(|v| v.as_ref());
    }
}

/// Ordered sequence of sampled blocks with globally disjoint time ranges;
/// the final product of one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampledAggregate {
    request_id: String,
    blocks: Vec<SampledBlock>,
    sources: BTreeSet<String>,
    types: BTreeMap<String, SupportedType>,
    sample_count: usize,
}

impl SampledAggregate {
    /// Assembles the aggregate metadata from finished blocks. Sorting by
    /// start time happens here, as a post-step, so parallel block building
    /// upstream cannot affect the final order.
    pub fn build(
        request_id: impl Into<String>,
        mut blocks: Vec<SampledBlock>,
        error_checking: bool,
    ) -> Result<Self> {
        blocks.sort_by_key(|block| (block.begin(), block.end()));

        let mut sources = BTreeSet::new();
        let mut types: BTreeMap<String, SupportedType> = BTreeMap::new();
        let mut sample_count = 0;
        for block in &blocks {
            sample_count += block.sample_count();
            for column in block.series().columns() {
                sources.insert(column.source.clone());
                match types.get(&column.source) {
                    None => {
                        types.insert(column.source.clone(), column.data_type);
                    }
                    Some(existing) if *existing == column.data_type => {}
                    Some(existing) => {
                        if error_checking {
                            return Err(ErrorKind::TypeConflict.with_message(format!(
                                "source {} reported as both {} and {}",
                                column.source, existing, column.data_type
                            )));
                        }
                        log::debug!(
                            "Source {} reported as both {} and {}, marking unsupported",
                            column.source,
                            existing,
                            column.data_type
                        );
                        types.insert(column.source.clone(), SupportedType::Unsupported);
                    }
                }
            }
        }

        let aggregate = SampledAggregate {
            request_id: request_id.into(),
            blocks,
            sources,
            types,
            sample_count,
        };
        if error_checking {
            aggregate.verify()?;
        }
        return Ok(aggregate);
    }

    /// Structural invariants: strictly increasing start times, pairwise
    /// disjoint ranges, no unsupported source types.
    pub fn verify(&self) -> Result<()> {
        for pair in self.blocks.windows(2) {
            if pair[0].begin() >= pair[1].begin() {
                return Err(ErrorKind::RangeError.with_context(format!(
                    "blocks out of order: {} before {}",
                    pair[0].range(),
                    pair[1].range()
                )));
            }
            if pair[0].range().intersects(&pair[1].range()) {
                return Err(ErrorKind::RangeError.with_context(format!(
                    "blocks {} and {} overlap",
                    pair[0].range(),
                    pair[1].range()
                )));
            }
        }
        for (source, data_type) in &self.types {
            if *data_type == SupportedType::Unsupported {
                return Err(ErrorKind::TypeConflict
                    .with_message(format!("source {} has no single supported type", source)));
            }
        }
        return Ok(());
    }

    pub fn request_id(&self) -> &str {
        return &self.request_id;
    }

    pub fn blocks(&self) -> &[SampledBlock] {
        return &self.blocks;
    }

    pub fn source_names(&self) -> &BTreeSet<String> {
        return &self.sources;
    }

    pub fn source_type(&self, source: &str) -> Option<SupportedType> {
        return self.types.get(source).copied();
    }

    pub fn sample_count(&self) -> usize {
        return self.sample_count;
    }

    pub fn first_timestamp(&self) -> Option<Nanos> {
        return self.blocks.first().map(|b| b.begin());
    }

    pub fn last_timestamp(&self) -> Option<Nanos> {
        return self.blocks.last().map(|b| b.end());
    }

    pub fn is_empty(&self) -> bool {
        return self.blocks.is_empty();
    }
}
