//! Commit positions for out-of-order settlement.
//!
//! The dispatcher settles deliveries concurrently, so offset 7 may complete
//! before offset 5. Committing 8 at that point would lose 5 on a crash. The
//! tracker only advances a partition's commit position past offsets that are
//! no longer in flight.
//!
//! A delivery whose settlement failed is released instead of settled. A
//! released offset holds the commit position back until the partition
//! delivers it again.

use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default)]
struct PartitionOffsets {
    in_flight: BTreeSet<i64>,
    released: BTreeSet<i64>,
    highest_settled: Option<i64>,
    committed: Option<i64>,
}

impl PartitionOffsets {
    fn position(&self) -> Option<i64> {
        let lowest_unsettled = match (self.in_flight.first(), self.released.first()) {
            (Some(&in_flight), Some(&released)) => Some(in_flight.min(released)),
            (in_flight, released) => in_flight.or(released).copied(),
        };
        lowest_unsettled.or_else(|| self.highest_settled.map(|offset| offset + 1))
    }
}

/// In-flight offsets per partition.
#[derive(Debug, Default)]
pub struct OffsetTracker {
    partitions: HashMap<i32, PartitionOffsets>,
}

impl OffsetTracker {
    /// Records a delivered offset.
    ///
    /// Offsets must be tracked in the order the partition delivers them.
    pub fn track(&mut self, partition: i32, offset: i64) {
        let offsets = self.partitions.entry(partition).or_default();
        offsets.committed.get_or_insert(offset);
        offsets.released.remove(&offset);
        offsets.in_flight.insert(offset);
    }

    /// Whether `offset` is awaiting settlement.
    #[must_use]
    pub fn is_in_flight(&self, partition: i32, offset: i64) -> bool {
        self.partitions
            .get(&partition)
            .is_some_and(|p| p.in_flight.contains(&offset))
    }

    /// Marks `offset` settled.
    ///
    /// Returns the new commit position (the next offset to read) when it
    /// advanced, `None` when nothing new can be committed. Returns `Err(())`
    /// if the offset was not in flight.
    #[allow(clippy::result_unit_err)]
    pub fn settle(&mut self, partition: i32, offset: i64) -> Result<Option<i64>, ()> {
        let offsets = self.partitions.get_mut(&partition).ok_or(())?;
        if !offsets.in_flight.remove(&offset) {
            return Err(());
        }
        offsets.highest_settled = Some(offsets.highest_settled.map_or(offset, |h| h.max(offset)));

        let position = offsets.position();
        if position > offsets.committed {
            offsets.committed = position;
            Ok(position)
        } else {
            Ok(None)
        }
    }

    /// Gives up on `offset` without settling it.
    ///
    /// The commit position stays at or below `offset` until it is tracked
    /// again. Returns `false` if the offset was not in flight.
    pub fn release(&mut self, partition: i32, offset: i64) -> bool {
        let Some(offsets) = self.partitions.get_mut(&partition) else {
            return false;
        };
        if !offsets.in_flight.remove(&offset) {
            return false;
        }
        offsets.released.insert(offset);
        true
    }
}
