//! Persistent source-revision → target-revision mapping (C4, §4.4).
//!
//! A [`RevMap`] is monotone: inserting `s -> t` is only ever done with
//! strictly increasing `s` and `t`, since the orchestrator replays source
//! revisions strictly in order. Lookups use nearest-less-or-equal semantics
//! so a copy-from pointing at an unchanged ancestor revision still resolves.

use std::collections::BTreeMap;

use crate::svn::parser::SvnLogEntry;

/// Percent-decode the three bytes `%XX` can spend on; this engine only ever
/// needs to round-trip URLs it percent-encoded itself with
/// [`encode_source_url`], so a minimal decoder is enough.
fn decode_source_url(encoded: &str) -> String {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(hex) = std::str::from_utf8(&bytes[i + 1..i + 3]) {
                if let Ok(value) = u8::from_str_radix(hex, 16) {
                    out.push(value);
                    i += 3;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Percent-encode a source URL for storage in the `svn2svn:source_url`
/// tracking revprop (§3, §6.2). Only reserved URL characters need escaping
/// here since the input is already a well-formed URL.
pub fn encode_source_url(url: &str) -> String {
    let mut out = String::with_capacity(url.len());
    for b in url.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b'/' | b':' => {
                out.push(b as char);
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

/// Monotone `source_rev -> target_rev` map (C4).
#[derive(Debug, Default, Clone)]
pub struct RevMap {
    map: BTreeMap<i64, i64>,
}

impl RevMap {
    pub fn new() -> Self {
        RevMap {
            map: BTreeMap::new(),
        }
    }

    /// Record that source revision `source_rev` replayed as target revision
    /// `target_rev`.
    pub fn set(&mut self, source_rev: i64, target_rev: i64) {
        self.map.insert(source_rev, target_rev);
    }

    /// `map[r]` for the largest `r <= source_rev` present, or `None` if
    /// `source_rev` precedes the first replayed revision.
    pub fn get(&self, source_rev: i64) -> Option<i64> {
        self.map
            .range(..=source_rev)
            .next_back()
            .map(|(_, &t)| t)
    }

    /// The largest source revision recorded, if any.
    pub fn max_source_rev(&self) -> Option<i64> {
        self.map.keys().next_back().copied()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// All recorded `(source_rev, target_rev)` pairs, ascending by source
    /// revision (used by the end-of-run full verify pass, §4.8/§8).
    pub fn entries(&self) -> impl Iterator<Item = (i64, i64)> + '_ {
        self.map.iter().map(|(&s, &t)| (s, t))
    }

    /// Rebuild from a target repository's log entries (resume mode, §4.4.1).
    /// Entries whose tracking revprops don't match `source_uuid`/`source_url`
    /// are silently ignored — the target may carry other history.
    pub fn rebuild_from_target_log(
        target_log: &[SvnLogEntry],
        source_uuid: &str,
        source_url: &str,
    ) -> Self {
        let expected_url = encode_source_url(source_url);
        let mut map = RevMap::new();
        for entry in target_log {
            let uuid = entry.revprops.get("svn2svn:source_uuid");
            let url = entry.revprops.get("svn2svn:source_url");
            let rev = entry.revprops.get("svn2svn:source_rev");
            if let (Some(uuid), Some(url), Some(rev)) = (uuid, url, rev) {
                if uuid == source_uuid && url == &expected_url {
                    if let Ok(source_rev) = rev.parse::<i64>() {
                        map.set(source_rev, entry.revision);
                    }
                }
            }
        }
        map
    }
}

/// Decode a `svn2svn:source_url` revprop value back to the literal URL.
/// Exposed for diagnostics/tests; production lookups only ever compare
/// encoded forms.
pub fn decode_tracking_url(encoded: &str) -> String {
    decode_source_url(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap as Map;

    fn entry_with_revprops(revision: i64, revprops: Map<String, String>) -> SvnLogEntry {
        SvnLogEntry {
            revision,
            author: "a".into(),
            date_raw: "2024-01-01T00:00:00.000000Z".into(),
            date_epoch: 0,
            message: String::new(),
            url: String::new(),
            changed_paths: Vec::new(),
            revprops,
        }
    }

    #[test]
    fn nearest_less_or_equal_lookup() {
        let mut m = RevMap::new();
        m.set(5, 105);
        m.set(10, 110);
        assert_eq!(m.get(5), Some(105));
        assert_eq!(m.get(7), Some(105));
        assert_eq!(m.get(10), Some(110));
        assert_eq!(m.get(11), Some(110));
        assert_eq!(m.get(4), None);
    }

    #[test]
    fn empty_map_has_no_entries() {
        let m = RevMap::new();
        assert_eq!(m.get(1), None);
        assert!(m.is_empty());
    }

    #[test]
    fn encode_decode_round_trips_url() {
        let url = "https://svn.example.com/repo/branches/foo bar";
        let encoded = encode_source_url(url);
        assert!(!encoded.contains(' '));
        assert_eq!(decode_tracking_url(&encoded), url);
    }

    #[test]
    fn rebuild_filters_by_uuid_and_url() {
        let source_uuid = "11111111-1111-1111-1111-111111111111";
        let source_url = "https://svn.example.com/repo/trunk";
        let mut matching_props = Map::new();
        matching_props.insert("svn2svn:source_uuid".to_string(), source_uuid.to_string());
        matching_props.insert(
            "svn2svn:source_url".to_string(),
            encode_source_url(source_url),
        );
        matching_props.insert("svn2svn:source_rev".to_string(), "42".to_string());

        let mut other_uuid_props = matching_props.clone();
        other_uuid_props.insert(
            "svn2svn:source_uuid".to_string(),
            "22222222-2222-2222-2222-222222222222".to_string(),
        );
        other_uuid_props.insert("svn2svn:source_rev".to_string(), "99".to_string());

        let target_log = vec![
            entry_with_revprops(100, matching_props),
            entry_with_revprops(101, other_uuid_props),
            entry_with_revprops(102, Map::new()),
        ];

        let rev_map = RevMap::rebuild_from_target_log(&target_log, source_uuid, source_url);
        assert_eq!(rev_map.get(42), Some(100));
        assert_eq!(rev_map.len(), 1);
        assert_eq!(rev_map.max_source_rev(), Some(42));
    }
}
