//! Version Compatibility Checker: advisory check of a cached state's
//! producing core against the currently active core.

use semver::Version;

use crate::models::VersionStatus;

/// Compare the core identity/version recorded with a cached state against
/// the active core.
///
/// Differing known core ids are a mismatch regardless of version. Version
/// strings that fail to parse yield `Unknown`; a major or minor difference
/// is save-incompatible; a patch-only difference is compatible. The result
/// is advisory; restore can be forced past a mismatch.
#[must_use]
pub fn check(
    saved_core_id: Option<&str>,
    saved_version: Option<&str>,
    current_core_id: Option<&str>,
    current_version: Option<&str>,
) -> VersionStatus {
    if let (Some(saved), Some(current)) = (saved_core_id, current_core_id) {
        if !saved.eq_ignore_ascii_case(current) {
            return VersionStatus::Mismatch;
        }
    }

    let (Some(saved), Some(current)) = (
        saved_version.and_then(parse_version),
        current_version.and_then(parse_version),
    ) else {
        return VersionStatus::Unknown;
    };

    if saved.major == current.major && saved.minor == current.minor {
        VersionStatus::Compatible
    } else {
        VersionStatus::Mismatch
    }
}

/// Lenient version parse: tolerates a leading `v` and missing minor/patch
/// components ("1.7" parses as 1.7.0). Returns `None` for anything else.
fn parse_version(raw: &str) -> Option<Version> {
    let trimmed = raw.trim().trim_start_matches(['v', 'V']);
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(version) = Version::parse(trimmed) {
        return Some(version);
    }

    let padded = match trimmed.matches('.').count() {
        0 => format!("{trimmed}.0.0"),
        1 => format!("{trimmed}.0"),
        _ => return None,
    };
    Version::parse(&padded).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn differing_core_ids_mismatch_regardless_of_version() {
        let status = check(Some("snes9x"), Some("1.62.3"), Some("bsnes"), Some("1.62.3"));
        assert_eq!(status, VersionStatus::Mismatch);
    }

    #[test]
    fn same_core_same_version_compatible() {
        let status = check(Some("snes9x"), Some("1.62.3"), Some("snes9x"), Some("1.62.3"));
        assert_eq!(status, VersionStatus::Compatible);
    }

    #[test]
    fn patch_difference_is_compatible() {
        let status = check(Some("snes9x"), Some("1.62.3"), Some("snes9x"), Some("1.62.9"));
        assert_eq!(status, VersionStatus::Compatible);
    }

    #[test]
    fn minor_difference_is_mismatch() {
        let status = check(Some("snes9x"), Some("1.61.0"), Some("snes9x"), Some("1.62.0"));
        assert_eq!(status, VersionStatus::Mismatch);
    }

    #[test]
    fn missing_version_is_unknown() {
        assert_eq!(
            check(Some("snes9x"), None, Some("snes9x"), Some("1.62.3")),
            VersionStatus::Unknown
        );
        assert_eq!(check(None, None, None, None), VersionStatus::Unknown);
    }

    #[test]
    fn unparsable_version_is_unknown() {
        let status = check(Some("snes9x"), Some("nightly"), Some("snes9x"), Some("1.62.3"));
        assert_eq!(status, VersionStatus::Unknown);
    }

    #[test]
    fn lenient_parse_accepts_short_and_v_prefixed() {
        let status = check(Some("mgba"), Some("v0.10"), Some("mgba"), Some("0.10.2"));
        assert_eq!(status, VersionStatus::Compatible);
    }

    #[test]
    fn unknown_core_ids_fall_through_to_version_compare() {
        let status = check(None, Some("1.0.0"), Some("snes9x"), Some("2.0.0"));
        assert_eq!(status, VersionStatus::Mismatch);
    }
}
