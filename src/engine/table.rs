use crate::common::Nanos;
use crate::engine::aggregate::{SampledAggregate, SampledColumn};
use crate::engine::types::{SupportedType, Value};
use chrono::DateTime;
use std::collections::HashMap;
use std::fmt;

/// Fully materialized table over an aggregate: one value sequence per
/// source across all blocks, nulls for gaps. O(rows x sources) memory.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticTableView {
    timestamps: Vec<Nanos>,
    columns: Vec<SampledColumn>,
}

impl StaticTableView {
    pub fn new(aggregate: &SampledAggregate) -> Self {
        let mut timestamps = Vec::with_capacity(aggregate.sample_count());
        for block in aggregate.blocks() {
            timestamps.extend_from_slice(block.timestamps());
        }

        let mut columns = Vec::new();
        for source in aggregate.source_names() {
            let mut values: Vec<Option<Value>> = Vec::with_capacity(timestamps.len());
            for block in aggregate.blocks() {
                match block.values(source) {
                    Some(present) => values.extend_from_slice(present),
                    None => values.extend(std::iter::repeat_n(None, block.sample_count())),
                }
            }
            columns.push(SampledColumn {
                source: source.clone(),
                data_type: aggregate
                    .source_type(source)
                    .unwrap_or(SupportedType::Unsupported),
                values,
            });
        }
        return StaticTableView {
            timestamps,
            columns,
        };
    }

    pub fn row_count(&self) -> usize {
        return self.timestamps.len();
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

    pub fn value_at(&self, row: usize, source: &str) -> Option<&Value> {
        return self
            .column(source)
            .and_then(|c| c.values.get(row))
            .and_then(|v| v.as_ref());
    }
}

impl fmt::Display for StaticTableView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<29}", "timestamp")?;
        for column in &self.columns {
            write!(f, " {:>16}", column.source)?;
        }
        writeln!(f)?;
        for (row, nanos) in self.timestamps.iter().enumerate() {
            let dt = DateTime::from_timestamp_nanos(*nanos);
            write!(f, "{:<29}", dt.format("%Y-%m-%dT%H:%M:%S%.6f"))?;
            for column in &self.columns {
                match column.values.get(row).and_then(|v| v.as_ref()) {
                    Some(value) => write!(f, " {:>16}", value.to_string())?,
                    None => write!(f, " {:>16}", "null")?,
                }
            }
            writeln!(f)?;
        }
        return Ok(());
    }
}

/// Lazy row-indexed view: answers point lookups without materializing
/// anything. Row resolution is a binary search over block offsets.
pub struct DynamicTableView<'a> {
    aggregate: &'a SampledAggregate,
    /// Global row index at which each block starts.
    offsets: Vec<usize>,
    /// Per block: source name -> column position.
    index: Vec<HashMap<&'a str, usize>>,
    row_count: usize,
}

impl<'a> DynamicTableView<'a> {
    pub fn new(aggregate: &'a SampledAggregate) -> Self {
        let mut offsets = Vec::with_capacity(aggregate.blocks().len());
        let mut index = Vec::with_capacity(aggregate.blocks().len());
        let mut rows = 0;
        for block in aggregate.blocks() {
            offsets.push(rows);
            rows += block.sample_count();
            index.push(
                block
                    .series()
                    .columns()
                    .iter()
                    .enumerate()
                    .map(|(i, c)| (c.source.as_str(), i))
                    .collect(),
            );
        }
        return DynamicTableView {
            aggregate,
            offsets,
            index,
            row_count: rows,
        };
    }

    pub fn row_count(&self) -> usize {
        return self.row_count;
    }

    fn locate(&self, row: usize) -> Option<(usize, usize)> {
        if row >= self.row_count {
            return None;
        }
        let block = self.offsets.partition_point(|offset| *offset <= row) - 1;
        return Some((block, row - self.offsets[block]));
    }

    pub fn timestamp_at(&self, row: usize) -> Option<Nanos> {
        let (block, local) = self.locate(row)?;
        return self.aggregate.blocks()[block].timestamps().get(local).copied();
    }

    /// Value of one source at one global row; None covers both "source not
    /// present in that block" and "source reported nothing there".
    pub fn value_at(&self, row: usize, source: &str) -> Option<&'a Value> {
        let (block, local) = self.locate(row)?;
        let column = *self.index[block].get(source)?;
        return self.aggregate.blocks()[block].series().columns()[column]
            .values
            .get(local)?
            .as_ref();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::NANOS_PER_SEC;
    use crate::engine::aggregate::{SampledBlock, SampledSeries};
    use pretty_assertions::assert_eq;

    fn aggregate() -> SampledAggregate {
        // Block 1: A over [0,2]s; block 2: B over [10,11]s.
        let first = SampledSeries::new(
            "req",
            vec![0, NANOS_PER_SEC, 2 * NANOS_PER_SEC],
            vec![SampledColumn {
                source: "A".to_string(),
                data_type: SupportedType::Int32,
                values: vec![Some(Value::Int32(1)), None, Some(Value::Int32(3))],
            }],
        );
        let second = SampledSeries::new(
            "req",
            vec![10 * NANOS_PER_SEC, 11 * NANOS_PER_SEC],
            vec![SampledColumn {
                source: "B".to_string(),
                data_type: SupportedType::Float64,
                values: vec![Some(Value::Float64(0.5)), Some(Value::Float64(1.5))],
            }],
        );
        return SampledAggregate::build(
            "req",
            vec![SampledBlock::Disjoint(first), SampledBlock::Disjoint(second)],
            true,
        )
        .unwrap();
    }

    #[test]
    fn test_static_view_fills_gaps() {
        let aggregate = aggregate();
        let view = StaticTableView::new(&aggregate);
        assert_eq!(view.row_count(), 5);
        assert_eq!(view.value_at(0, "A"), Some(&Value::Int32(1)));
        // A has a null inside its own block and nothing in block 2.
        assert_eq!(view.value_at(1, "A"), None);
        assert_eq!(view.value_at(3, "A"), None);
        assert_eq!(view.value_at(3, "B"), Some(&Value::Float64(0.5)));
        assert_eq!(view.value_at(0, "B"), None);
    }

    #[test]
    fn test_dynamic_view_matches_static() {
        let aggregate = aggregate();
        let fixed = StaticTableView::new(&aggregate);
        let lazy = DynamicTableView::new(&aggregate);
        assert_eq!(lazy.row_count(), fixed.row_count());
        for row in 0..fixed.row_count() {
            assert_eq!(lazy.timestamp_at(row), Some(fixed.timestamps()[row]));
            for source in ["A", "B"] {
                assert_eq!(lazy.value_at(row, source), fixed.value_at(row, source));
            }
        }
    }

    #[test]
    fn test_dynamic_view_out_of_range() {
        let aggregate = aggregate();
        let lazy = DynamicTableView::new(&aggregate);
        assert_eq!(lazy.value_at(99, "A"), None);
        assert_eq!(lazy.timestamp_at(99), None);
    }
}
