//! Slot Builder: projects a sparse set of cached states onto a dense,
//! stable slot list for the UI.

use std::collections::HashMap;

use crate::models::{StateCache, UnifiedStateEntry, AUTO_SLOT};
use crate::version;

/// Minimum slot count shown for emulators with no fixed slot limit.
const MIN_DYNAMIC_SLOTS: i32 = 10;

/// Build the ordered slot list for one game+channel: the auto slot first if
/// occupied, then slots `0..max_slots` each either populated or an empty
/// placeholder.
///
/// `max_slots < 0` means unbounded; the list then covers the highest used
/// slot + 1, with a floor of ten slots.
#[must_use]
pub fn build_slot_list(
    states: &[StateCache],
    max_slots: i32,
    current_core_id: Option<&str>,
    current_core_version: Option<&str>,
) -> Vec<UnifiedStateEntry> {
    let by_slot: HashMap<i32, &StateCache> = states.iter().map(|s| (s.slot, s)).collect();
    let mut result = Vec::new();

    if let Some(auto) = by_slot.get(&AUTO_SLOT) {
        result.push(populated_entry(auto, current_core_id, current_core_version));
    }

    let slots_to_show = if max_slots < 0 {
        let highest = states.iter().map(|s| s.slot).filter(|s| *s >= 0).max();
        highest.map_or(MIN_DYNAMIC_SLOTS, |h| (h + 1).max(MIN_DYNAMIC_SLOTS))
    } else {
        max_slots
    };

    for slot in 0..slots_to_show {
        match by_slot.get(&slot) {
            Some(state) => {
                result.push(populated_entry(state, current_core_id, current_core_version));
            }
            None => result.push(UnifiedStateEntry::empty(slot)),
        }
    }

    result
}

fn populated_entry(
    cache: &StateCache,
    current_core_id: Option<&str>,
    current_core_version: Option<&str>,
) -> UnifiedStateEntry {
    let version_status = version::check(
        cache.core_id.as_deref(),
        cache.core_version.as_deref(),
        current_core_id,
        current_core_version,
    );

    UnifiedStateEntry {
        local_cache_id: Some(cache.id),
        slot: cache.slot,
        timestamp: Some(cache.captured_at),
        size_bytes: cache.size_bytes,
        channel: cache.channel.clone(),
        core_id: cache.core_id.clone(),
        core_version: cache.core_version.clone(),
        screenshot_path: cache.screenshot_path.clone(),
        active: false,
        locked: cache.locked,
        version_status,
    }
}
