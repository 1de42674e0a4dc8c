//! Parsing of `Name=value` feature override lists.
//!
//! Operators can pass overrides as a single comma-separated string
//! (`SNATFullyRandom=false,MASQFullyRandom=true`), typically through the
//! `XTPROBE_FEATURE_OVERRIDE` environment variable, or one pair at a time on
//! the command line. Values are kept as strings: whether they are valid
//! booleans or known flag names is decided later, at detection time.

use std::collections::BTreeMap;
use xt_common::Error;

/// Override map keyed by flag name; sorted so iteration order is stable.
pub type OverrideMap = BTreeMap<String, String>;

/// Parse a single `Name=value` pair.
pub fn parse_override_pair(entry: &str) -> Result<(String, String), Error> {
    let (name, value) = entry.split_once('=').ok_or_else(|| Error::InvalidOverride {
        entry: entry.to_string(),
        reason: "expected Name=value".to_string(),
    })?;
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidOverride {
            entry: entry.to_string(),
            reason: "empty flag name".to_string(),
        });
    }
    Ok((name.to_string(), value.trim().to_string()))
}

/// Parse a comma-separated override list. Empty entries are skipped.
pub fn parse_override_list(list: &str) -> Result<OverrideMap, Error> {
    let mut map = OverrideMap::new();
    for entry in list.split(',') {
        if entry.trim().is_empty() {
            continue;
        }
        let (name, value) = parse_override_pair(entry)?;
        map.insert(name, value);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_list() {
        let map = parse_override_list("SNATFullyRandom=false, MASQFullyRandom = true").unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["SNATFullyRandom"], "false");
        assert_eq!(map["MASQFullyRandom"], "true");
    }

    #[test]
    fn later_entries_win() {
        let map = parse_override_list("SNATFullyRandom=false,SNATFullyRandom=true").unwrap();
        assert_eq!(map["SNATFullyRandom"], "true");
    }

    #[test]
    fn skips_empty_entries() {
        let map = parse_override_list(",,SNATFullyRandom=1,").unwrap();
        assert_eq!(map.len(), 1);
        assert!(parse_override_list("").unwrap().is_empty());
    }

    #[test]
    fn keeps_unvalidated_values() {
        // Validity is decided by the detector, not the parser.
        let map = parse_override_list("NoSuchFlag=maybe").unwrap();
        assert_eq!(map["NoSuchFlag"], "maybe");
    }

    #[test]
    fn rejects_missing_equals() {
        let err = parse_override_list("SNATFullyRandom").unwrap_err();
        assert!(matches!(err, Error::InvalidOverride { .. }));
    }

    #[test]
    fn rejects_empty_name() {
        assert!(parse_override_pair("=true").is_err());
    }
}
