use crate::common::{Nanos, TimeInterval};
use crate::engine::error::{ErrorKind, Result};
use crate::engine::types::CorrelatedBlock;
use std::collections::BTreeSet;

/// A maximal run of correlated blocks whose closed time ranges pairwise
/// intersect when walked in start-time order. Carries the union range; the
/// union timestamp grid is computed on demand.
#[derive(Debug, Clone, PartialEq)]
pub struct SuperDomainGroup {
    blocks: Vec<CorrelatedBlock>,
    range: TimeInterval,
}

impl SuperDomainGroup {
    pub fn blocks(&self) -> &[CorrelatedBlock] {
        return &self.blocks;
    }

    pub fn into_blocks(self) -> Vec<CorrelatedBlock> {
        return self.blocks;
    }

    pub fn range(&self) -> TimeInterval {
        return self.range;
    }

    /// Sorted union of the distinct timestamps of all member blocks.
    pub fn union_timestamps(&self) -> Vec<Nanos> {
        let mut union = BTreeSet::new();
        for block in &self.blocks {
            union.extend(block.timing().timestamps());
        }
        return union.into_iter().collect();
    }
}

/// Result of collision detection: blocks whose ranges pairwise do not
/// intersect, plus the colliding groups.
#[derive(Debug, Default)]
pub struct DomainPartition {
    pub disjoint: Vec<CorrelatedBlock>,
    pub groups: Vec<SuperDomainGroup>,
}

/// Walks the start-time-ordered block set and separates disjoint blocks
/// from super-domain groups. A block joins the running group when its range
/// intersects the group's union range.
///
/// When collisions are disallowed, any group of two or more blocks fails
/// the request with a range error.
pub fn partition(blocks: Vec<CorrelatedBlock>, allow_collisions: bool) -> Result<DomainPartition> {
    let mut partition = DomainPartition::default();
    let mut group: Vec<CorrelatedBlock> = Vec::new();
    let mut group_range: Option<TimeInterval> = None;

    let mut flush = |group: &mut Vec<CorrelatedBlock>, range: TimeInterval| {
        if group.len() == 1 {
            partition.disjoint.push(group.pop().unwrap());
        } else {
            partition.groups.push(SuperDomainGroup {
                blocks: std::mem::take(group),
                range,
            });
        }
    };

    for block in blocks {
        let range = block.time_range();
        match group_range {
            None => {
                group.push(block);
                group_range = Some(range);
            }
            Some(running) if range.intersects(&running) => {
                group.push(block);
                group_range = Some(running.union(&range));
            }
            Some(running) => {
                flush(&mut group, running);
                group.push(block);
                group_range = Some(range);
            }
        }
    }
    if let Some(running) = group_range {
        flush(&mut group, running);
    }

    if !allow_collisions && !partition.groups.is_empty() {
        let first = &partition.groups[0];
        return Err(ErrorKind::RangeError.with_context(format!(
            "{} blocks collide within {}",
            first.blocks.len(),
            first.range
        )));
    }
    if !partition.groups.is_empty() {
        log::debug!(
            "Detected {} time-domain collision group(s), {} disjoint block(s)",
            partition.groups.len(),
            partition.disjoint.len()
        );
    }
    return Ok(partition);
}
