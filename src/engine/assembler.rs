use crate::engine::aggregate::{SampledAggregate, SampledBlock, SampledColumn, SampledSeries};
use crate::engine::domain::{DomainPartition, SuperDomainGroup};
use crate::engine::error::{ErrorKind, Result};
use crate::engine::types::{CorrelatedBlock, SupportedType};
use std::collections::{BTreeMap, HashMap};

/// Assembler settings, snapshotted from the engine options.
#[derive(Debug, Clone)]
pub struct AssembleOptions {
    pub concurrency: bool,
    pub pivot: usize,
    pub error_checking: bool,
}

/// One unit of block-building work.
enum Unit {
    Single(CorrelatedBlock),
    Group(SuperDomainGroup),
}

/// Coalesces a domain partition into the final sampled aggregate.
pub struct Assembler {
    options: AssembleOptions,
}

impl Assembler {
    pub fn new(options: AssembleOptions) -> Self {
        return Assembler { options };
    }

    pub fn assemble(
        &self,
        request_id: &str,
        partition: DomainPartition,
    ) -> Result<SampledAggregate> {
        let units: Vec<Unit> = partition
            .disjoint
            .into_iter()
            .map(Unit::Single)
            .chain(partition.groups.into_iter().map(Unit::Group))
            .collect();

        let blocks = if self.options.concurrency && units.len() > self.options.pivot {
            build_parallel(units, request_id, self.options.error_checking)?
        } else {
            units
                .into_iter()
                .map(|unit| build_unit(unit, request_id, self.options.error_checking))
                .collect::<Result<Vec<_>>>()?
        };
        return SampledAggregate::build(request_id, blocks, self.options.error_checking);
    }
}

fn build_unit(unit: Unit, request_id: &str, error_checking: bool) -> Result<SampledBlock> {
    match unit {
        Unit::Single(block) => return Ok(build_disjoint(block, request_id)),
        Unit::Group(group) => return build_super_domain(group, request_id, error_checking),
    }
}

/// Builds blocks over a scoped thread pool; the final order is restored by
/// index, so scheduling cannot leak into the result.
fn build_parallel(
    units: Vec<Unit>,
    request_id: &str,
    error_checking: bool,
) -> Result<Vec<SampledBlock>> {
    let workers = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .clamp(1, units.len().max(1));
    log::debug!("Assembling {} blocks over {} threads", units.len(), workers);

    let total = units.len();
    let indexed: Vec<(usize, Unit)> = units.into_iter().enumerate().collect();
    let chunk_size = total.div_ceil(workers);

    let mut slots: Vec<Option<Result<SampledBlock>>> = Vec::new();
    slots.resize_with(total, || None);

    std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(workers);
        let mut rest = indexed;
        while !rest.is_empty() {
            let chunk: Vec<(usize, Unit)> =
                rest.drain(..chunk_size.min(rest.len())).collect();
            handles.push(scope.spawn(move || {
                return chunk
                    .into_iter()
                    .map(|(index, unit)| (index, build_unit(unit, request_id, error_checking)))
                    .collect::<Vec<_>>();
            }));
        }
        for handle in handles {
            for (index, result) in handle.join().unwrap() {
                slots[index] = Some(result);
            }
        }
    });

    return slots
        .into_iter()
        .map(|slot| slot.unwrap())
        .collect::<Result<Vec<_>>>();
}

/// A disjoint sampled block: the correlated block's own grid and columns.
fn build_disjoint(block: CorrelatedBlock, request_id: &str) -> SampledBlock {
    let timestamps = block.timing().timestamps();
    let count = timestamps.len();
    let columns = block
        .into_columns()
        .into_iter()
        .map(|column| {
            let mut values: Vec<_> = column.values.into_iter().map(Some).take(count).collect();
            // A short column without error checking: pad rather than fail.
            values.resize(count, None);
            return SampledColumn {
                source: column.source,
                data_type: column.data_type,
                values,
            };
        })
        .collect();
    return SampledBlock::Disjoint(SampledSeries::new(request_id, timestamps, columns));
}

/// A super-domain block: every member block's columns aligned onto the
/// sorted union of the group's timestamps, nulls where a source did not
/// report. The first writer wins where two members cover the same
/// (source, timestamp) cell.
fn build_super_domain(
    group: SuperDomainGroup,
    request_id: &str,
    error_checking: bool,
) -> Result<SampledBlock> {
    let union = group.union_timestamps();
    let index: HashMap<i64, usize> = union.iter().enumerate().map(|(i, ts)| (*ts, i)).collect();

    let mut columns: BTreeMap<String, SampledColumn> = BTreeMap::new();
    for block in group.into_blocks() {
        let timestamps = block.timing().timestamps();
        for column in block.into_columns() {
            let entry = columns
                .entry(column.source.clone())
                .or_insert_with(|| SampledColumn {
                    source: column.source.clone(),
                    data_type: column.data_type,
                    values: vec![None; union.len()],
                });
            if entry.data_type != column.data_type
                && entry.data_type != SupportedType::Unsupported
            {
                if error_checking {
                    return Err(ErrorKind::TypeConflict.with_message(format!(
                        "source {} reported as both {} and {}",
                        column.source, entry.data_type, column.data_type
                    )));
                }
                log::debug!(
                    "Source {} reported as both {} and {}, marking unsupported",
                    column.source,
                    entry.data_type,
                    column.data_type
                );
                entry.data_type = SupportedType::Unsupported;
            }
            for (ts, value) in timestamps.iter().zip(column.values.into_iter()) {
                let Some(&i) = index.get(ts) else { continue };
                if entry.values[i].is_none() {
                    entry.values[i] = Some(value);
                }
            }
        }
    }

    return Ok(SampledBlock::SuperDomain(SampledSeries::new(
        request_id,
        union,
        columns.into_values().collect(),
    )));
}
