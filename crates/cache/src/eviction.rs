//! Least-recently-used victim selection
//!
//! The policy scans every slot and picks the one with the smallest recency
//! clock, breaking ties by lowest slot index. Unused slots carry the initial
//! clock, so an empty cache fills front-to-back before anything resident is
//! evicted.
//!
//! The scan is linear in the slot count. Slot counts are small (tens to a
//! few hundred images), which keeps this cheaper than maintaining an ordered
//! index under the table lock.

use crate::arena::SlotIndex;
use crate::residency::ResidencyTable;

/// Pick the eviction victim among slots accepted by `eligible`
///
/// Returns `None` when no slot is eligible.
pub fn select_victim<F>(table: &ResidencyTable, mut eligible: F) -> Option<SlotIndex>
where
    F: FnMut(SlotIndex) -> bool,
{
    table
        .clocks()
        .iter()
        .enumerate()
        .filter(|&(slot, _)| eligible(slot))
        .min_by_key(|&(slot, &clock)| (clock, slot))
        .map(|(slot, _)| slot)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any(_: SlotIndex) -> bool {
        true
    }

    #[test]
    fn test_empty_cache_fills_front_to_back() {
        let mut table = ResidencyTable::new(10, 3);

        for id in 0..3 {
            let victim = select_victim(&table, any).unwrap();
            assert_eq!(victim, id);
            table.bind(id, victim);
        }
    }

    #[test]
    fn test_oldest_slot_is_chosen() {
        let mut table = ResidencyTable::new(10, 3);
        table.bind(0, 0);
        table.bind(1, 1);
        table.bind(2, 2);

        assert_eq!(select_victim(&table, any), Some(0));

        table.touch(0);
        assert_eq!(select_victim(&table, any), Some(1));
    }

    #[test]
    fn test_freed_slot_is_preferred() {
        let mut table = ResidencyTable::new(10, 3);
        table.bind(0, 0);
        table.bind(1, 1);
        table.bind(2, 2);
        table.unbind(2);

        assert_eq!(select_victim(&table, any), Some(2));
    }

    #[test]
    fn test_ineligible_slots_are_skipped() {
        let mut table = ResidencyTable::new(10, 3);
        table.bind(0, 0);
        table.bind(1, 1);
        table.bind(2, 2);

        assert_eq!(select_victim(&table, |slot| slot != 0), Some(1));
        assert_eq!(select_victim(&table, |_| false), None);
    }

    #[test]
    fn test_tie_breaks_on_lowest_index() {
        let table = ResidencyTable::new(10, 4);
        assert_eq!(select_victim(&table, |slot| slot >= 2), Some(2));
    }
}
