//! Entry Reconciler: read-only merge of local save cache rows and remote
//! saves into a single display-ready timeline per game.
//!
//! Pure functions of the two input lists; no I/O. Callers fetch both sides
//! and hand them over in full.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use regex::Regex;

use crate::models::{RemoteSave, SaveCache, SaveSource, UnifiedSaveEntry};

/// Remote saves whose timestamp falls within this window of a local capture
/// are treated as the same save event when no channel name links them.
const MATCH_WINDOW_MS: i64 = 60_000;

/// File stem the engine uploads the default "latest" stream under. Remote
/// saves carrying it belong to the default stream, not a named channel.
pub const DEFAULT_SAVE_NAME: &str = "quicksave-latest";

/// Channel/latest classification parsed from a remote save's file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRemoteName {
    pub channel: Option<String>,
    pub is_latest: bool,
}

/// Merge local cache rows and remote saves for one game into the sorted
/// unified timeline.
///
/// Matching, per local row: channel-name match (case-insensitive, remote
/// extension stripped), then a 60-second timestamp-window match for
/// channel-less rows, then a LOCAL-only entry. Unmatched remote saves are
/// emitted as SERVER entries. Only the most recently captured row per
/// channel is eligible to match and to occupy the channel slot; superseded
/// rows surface as unlocked timeline entries.
#[must_use]
pub fn merge_save_entries(
    local: &[SaveCache],
    remote: &[RemoteSave],
    rom_base_name: Option<&str>,
) -> Vec<UnifiedSaveEntry> {
    let mut entries = Vec::with_capacity(local.len() + remote.len());
    let mut used_remote_ids: HashSet<i64> = HashSet::new();

    let occupants = channel_occupants(local);
    let most_recent_default = local
        .iter()
        .filter(|c| c.channel.is_none())
        .max_by_key(|c| c.captured_at)
        .map(|c| c.id);

    for cache in local {
        let is_occupant = match cache.channel.as_deref() {
            Some(channel) => occupants.get(channel) == Some(&cache.id),
            None => most_recent_default == Some(cache.id),
        };

        let matching = if is_occupant {
            find_matching_remote(cache, remote, &used_remote_ids)
        } else {
            None
        };

        if let Some(remote_save) = matching {
            used_remote_ids.insert(remote_save.id);
            let parsed = parse_remote_channel(&remote_save.file_stem(), rom_base_name);
            let channel = cache.channel.clone().or(parsed.channel);
            // A named merge is always the channel slot occupant, even if the
            // local row was captured unlocked during a session.
            let locked = channel.is_some() || cache.locked;
            entries.push(UnifiedSaveEntry {
                local_cache_id: Some(cache.id),
                remote_save_id: Some(remote_save.id),
                timestamp: cache.captured_at,
                size_bytes: cache.size_bytes,
                channel,
                source: SaveSource::Both,
                remote_file_name: Some(remote_save.file_name.clone()),
                is_latest: parsed.is_latest,
                locked,
                hardcore: cache.hardcore,
                cheats_used: cache.cheats_used,
            });
        } else {
            entries.push(UnifiedSaveEntry {
                local_cache_id: Some(cache.id),
                remote_save_id: None,
                timestamp: cache.captured_at,
                size_bytes: cache.size_bytes,
                channel: cache.channel.clone(),
                source: SaveSource::Local,
                remote_file_name: None,
                is_latest: false,
                locked: is_occupant && cache.channel.is_some(),
                hardcore: cache.hardcore,
                cheats_used: cache.cheats_used,
            });
        }
    }

    for remote_save in remote {
        if used_remote_ids.contains(&remote_save.id) {
            continue;
        }
        let parsed = parse_remote_channel(&remote_save.file_stem(), rom_base_name);
        entries.push(UnifiedSaveEntry {
            local_cache_id: None,
            remote_save_id: Some(remote_save.id),
            // Unparsable server timestamps sort to the end of the dated
            // group rather than injecting "now" into a pure merge.
            timestamp: remote_save.updated_at_millis().unwrap_or(0),
            size_bytes: remote_save.size_bytes,
            channel: parsed.channel.clone(),
            source: SaveSource::Server,
            remote_file_name: Some(remote_save.file_name.clone()),
            is_latest: parsed.is_latest,
            locked: parsed.channel.is_some(),
            hardcore: false,
            cheats_used: false,
        });
    }

    sort_entries(&mut entries);
    entries
}

/// Classify a remote save's file stem: exact ROM-base match is the latest
/// stream; a `_########_######` suffix after the base is a dated autosave;
/// the engine's default upload name belongs to the default stream; anything
/// else is a named channel.
#[must_use]
pub fn parse_remote_channel(stem: &str, rom_base_name: Option<&str>) -> ParsedRemoteName {
    if let Some(base) = rom_base_name {
        if stem.eq_ignore_ascii_case(base) {
            return ParsedRemoteName {
                channel: None,
                is_latest: true,
            };
        }
        if let Some(suffix) = strip_prefix_ignore_case(stem, base) {
            if is_timestamp_tag(suffix) {
                return ParsedRemoteName {
                    channel: None,
                    is_latest: false,
                };
            }
        }
    }

    if stem.eq_ignore_ascii_case(DEFAULT_SAVE_NAME) {
        return ParsedRemoteName {
            channel: None,
            is_latest: false,
        };
    }

    ParsedRemoteName {
        channel: Some(stem.to_string()),
        is_latest: false,
    }
}

/// Most recently captured row id per channel name. Only these rows occupy
/// channel slots; older rows for the same channel stay in the timeline.
fn channel_occupants(local: &[SaveCache]) -> HashMap<String, i64> {
    let mut latest: HashMap<String, (i64, i64)> = HashMap::new();
    for cache in local {
        let Some(channel) = cache.channel.as_deref() else {
            continue;
        };
        let entry = latest.entry(channel.to_string()).or_insert((cache.captured_at, cache.id));
        if cache.captured_at > entry.0 {
            *entry = (cache.captured_at, cache.id);
        }
    }
    latest.into_iter().map(|(k, (_, id))| (k, id)).collect()
}

fn find_matching_remote<'a>(
    cache: &SaveCache,
    remote: &'a [RemoteSave],
    used: &HashSet<i64>,
) -> Option<&'a RemoteSave> {
    match cache.channel.as_deref() {
        Some(channel) => remote
            .iter()
            .find(|r| !used.contains(&r.id) && r.file_stem().eq_ignore_ascii_case(channel)),
        None => remote.iter().find(|r| {
            !used.contains(&r.id)
                && r.updated_at_millis()
                    .is_some_and(|ts| (ts - cache.captured_at).abs() <= MATCH_WINDOW_MS)
        }),
    }
}

fn is_timestamp_tag(suffix: &str) -> bool {
    let pattern = Regex::new(r"^_\d{8}_\d{6}$").expect("Invalid regex");
    pattern.is_match(suffix)
}

fn strip_prefix_ignore_case<'a>(value: &'a str, prefix: &str) -> Option<&'a str> {
    let head = value.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        Some(&value[prefix.len()..])
    } else {
        None
    }
}

/// Sort: the latest-stream entry first, then the dated timeline descending
/// by timestamp, then channel slots ascending by case-insensitive name.
fn sort_entries(entries: &mut [UnifiedSaveEntry]) {
    entries.sort_by(|a, b| {
        let group = group_rank(a).cmp(&group_rank(b));
        if group != Ordering::Equal {
            return group;
        }
        match group_rank(a) {
            1 => b.timestamp.cmp(&a.timestamp),
            2 => channel_sort_key(a).cmp(&channel_sort_key(b)),
            _ => Ordering::Equal,
        }
    });
}

fn group_rank(entry: &UnifiedSaveEntry) -> u8 {
    if entry.is_latest {
        0
    } else if entry.is_channel_slot() {
        2
    } else {
        1
    }
}

fn channel_sort_key(entry: &UnifiedSaveEntry) -> String {
    entry.channel.as_deref().unwrap_or_default().to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const ROM_BASE: &str = "Super Mario World (USA)";

    fn local(id: i64, channel: Option<&str>, captured_at: i64, locked: bool) -> SaveCache {
        SaveCache {
            id,
            game_id: 1,
            emulator_id: "retroarch".to_string(),
            captured_at,
            size_bytes: 32_768,
            cache_path: format!("/cache/saves/{id}.srm"),
            locked,
            channel: channel.map(ToString::to_string),
            content_hash: None,
            hardcore: false,
            cheats_used: false,
            needs_sync: false,
            last_synced_at: None,
            last_sync_error: None,
        }
    }

    fn server(id: i64, file_name: &str, updated_at: &str) -> RemoteSave {
        RemoteSave {
            id,
            remote_game_id: 100,
            emulator_id: Some("retroarch".to_string()),
            file_name: file_name.to_string(),
            size_bytes: 32_768,
            updated_at: updated_at.to_string(),
        }
    }

    #[test]
    fn channel_name_match_emits_single_both_entry() {
        let locals = vec![local(1, Some("checkpoint"), 5_000_000, true)];
        let servers = vec![server(10, "checkpoint.srm", "1709296200")];

        let entries = merge_save_entries(&locals, &servers, Some(ROM_BASE));

        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.source, SaveSource::Both);
        assert_eq!(entry.local_cache_id, Some(1));
        assert_eq!(entry.remote_save_id, Some(10));
        assert_eq!(entry.channel.as_deref(), Some("checkpoint"));
        assert!(entry.locked);
    }

    #[test]
    fn channel_match_is_case_insensitive() {
        let locals = vec![local(1, Some("Checkpoint"), 5_000_000, true)];
        let servers = vec![server(10, "CHECKPOINT.srm", "1709296200")];

        let entries = merge_save_entries(&locals, &servers, Some(ROM_BASE));

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, SaveSource::Both);
    }

    #[test]
    fn timestamp_window_match_emits_both_entry() {
        // 1709296200s epoch; local capture 45 s later.
        let locals = vec![local(1, None, 1_709_296_245_000, false)];
        let servers = vec![server(10, "Super Mario World (USA).srm", "1709296200")];

        let entries = merge_save_entries(&locals, &servers, Some(ROM_BASE));

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, SaveSource::Both);
        assert!(entries[0].is_latest);
    }

    #[test]
    fn timestamp_outside_window_emits_separate_entries() {
        let locals = vec![local(1, None, 1_709_296_200_000 + 61_000, false)];
        let servers = vec![server(10, "Super Mario World (USA).srm", "1709296200")];

        let entries = merge_save_entries(&locals, &servers, Some(ROM_BASE));

        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|e| e.source == SaveSource::Local));
        assert!(entries.iter().any(|e| e.source == SaveSource::Server));
    }

    #[test]
    fn both_entries_always_carry_both_ids() {
        let locals = vec![
            local(1, Some("checkpoint"), 5_000_000, true),
            local(2, None, 1_709_296_245_000, false),
        ];
        let servers = vec![
            server(10, "checkpoint.srm", "1709290000"),
            server(11, "Super Mario World (USA).srm", "1709296200"),
        ];

        for entry in merge_save_entries(&locals, &servers, Some(ROM_BASE)) {
            if entry.source == SaveSource::Both {
                assert!(entry.local_cache_id.is_some());
                assert!(entry.remote_save_id.is_some());
            }
        }
    }

    #[test]
    fn rom_base_file_name_is_latest_with_no_channel() {
        let servers = vec![server(10, "Super Mario World (USA).srm", "1709296200")];

        let entries = merge_save_entries(&[], &servers, Some(ROM_BASE));

        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_latest);
        assert_eq!(entries[0].channel, None);
        assert!(!entries[0].locked);
    }

    #[test]
    fn timestamped_autosave_is_dated_not_latest() {
        let servers = vec![server(
            10,
            "Super Mario World (USA)_20240301_123000.srm",
            "1709296200",
        )];

        let entries = merge_save_entries(&[], &servers, Some(ROM_BASE));

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].channel, None);
        assert!(!entries[0].is_latest);
    }

    #[test]
    fn default_upload_name_is_dated_when_rom_base_differs() {
        let servers = vec![server(10, "quicksave-latest.srm", "1709296200")];

        let entries = merge_save_entries(&[], &servers, Some(ROM_BASE));

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, SaveSource::Server);
        assert_eq!(entries[0].channel, None);
        assert!(!entries[0].is_latest);
        assert!(!entries[0].locked);
    }

    #[test]
    fn server_only_named_save_is_locked_channel() {
        let servers = vec![server(10, "checkpoint.srm", "1709296200")];

        let entries = merge_save_entries(&[], &servers, Some(ROM_BASE));

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].channel.as_deref(), Some("checkpoint"));
        assert!(entries[0].locked);
    }

    #[test]
    fn local_only_without_channel_stays_unlocked() {
        let locals = vec![local(1, None, 5_000_000, false)];

        let entries = merge_save_entries(&locals, &[], Some(ROM_BASE));

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, SaveSource::Local);
        assert!(!entries[0].locked);
        assert_eq!(entries[0].channel, None);
    }

    #[test]
    fn only_most_recent_channel_row_is_slot_occupant() {
        let locals = vec![
            local(1, Some("crono"), 1_000_000, true),
            local(2, Some("crono"), 2_000_000, true),
        ];

        let entries = merge_save_entries(&locals, &[], Some(ROM_BASE));

        assert_eq!(entries.len(), 2);
        let occupant = entries.iter().find(|e| e.locked).unwrap();
        assert_eq!(occupant.local_cache_id, Some(2));
        let superseded = entries.iter().find(|e| !e.locked).unwrap();
        assert_eq!(superseded.local_cache_id, Some(1));
        assert!(!superseded.is_channel_slot());
    }

    #[test]
    fn only_most_recent_channel_row_matches_server() {
        let locals = vec![
            local(1, Some("crono"), 1_000_000, true),
            local(2, Some("crono"), 2_000_000, true),
        ];
        let servers = vec![server(10, "crono.srm", "1709296200")];

        let entries = merge_save_entries(&locals, &servers, Some(ROM_BASE));

        assert_eq!(entries.len(), 2);
        let both = entries.iter().find(|e| e.source == SaveSource::Both).unwrap();
        assert_eq!(both.local_cache_id, Some(2));
        assert_eq!(both.remote_save_id, Some(10));
    }

    #[test]
    fn sort_puts_latest_then_dated_desc_then_channels_asc() {
        let locals = vec![
            local(1, Some("zelda"), 1_000, true),
            local(2, None, 9_000, false),
            local(3, None, 5_000, false),
            local(4, Some("alpha"), 2_000, true),
        ];
        let servers = vec![server(10, "Super Mario World (USA).srm", "1709296200")];

        let entries = merge_save_entries(&locals, &servers, Some(ROM_BASE));

        assert!(entries[0].is_latest);
        assert_eq!(entries[1].timestamp, 9_000);
        assert_eq!(entries[2].timestamp, 5_000);
        assert_eq!(entries[3].channel.as_deref(), Some("alpha"));
        assert_eq!(entries[4].channel.as_deref(), Some("zelda"));
    }

    #[test]
    fn merge_is_idempotent_on_unchanged_inputs() {
        let locals = vec![
            local(1, Some("crono"), 1_000_000, true),
            local(2, None, 2_000_000, false),
        ];
        let servers = vec![
            server(10, "crono.srm", "1709296200"),
            server(11, "Super Mario World (USA).srm", "1709290000"),
        ];

        let first = merge_save_entries(&locals, &servers, Some(ROM_BASE));
        let second = merge_save_entries(&locals, &servers, Some(ROM_BASE));
        assert_eq!(first, second);
    }

    #[test]
    fn unparsable_server_timestamp_sorts_last_in_dated_group() {
        let servers = vec![
            server(10, "Super Mario World (USA)_20240301_123000.srm", "bogus"),
            server(11, "Super Mario World (USA)_20240302_123000.srm", "1709296200"),
        ];

        let entries = merge_save_entries(&[], &servers, Some(ROM_BASE));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].remote_save_id, Some(11));
        assert_eq!(entries[1].remote_save_id, Some(10));
        assert_eq!(entries[1].timestamp, 0);
    }
}
