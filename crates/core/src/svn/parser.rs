//! Parsers for `svn --xml` output (C1, §6.3).
//!
//! SVN's XML is simple enough (flat-ish, no attribute namespaces, no CDATA
//! in the fragments this engine consumes) that a small hand-rolled scanner
//! is both simpler and faster to reason about than pulling in a full XML
//! crate for a handful of fixed shapes. Every entry point strips control
//! characters below 0x20 (except TAB/LF/CR) before scanning, per §6.3.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::SvnError;

/// Remove control characters SVN can legally embed in a log message but
/// that are not valid XML content, preserving TAB/LF/CR.
pub fn strip_forbidden_xml_chars(input: &str) -> String {
    input
        .chars()
        .filter(|&c| c == '\t' || c == '\n' || c == '\r' || (c as u32) >= 0x20)
        .collect()
}

/// `{path, kind}` from C1 `info`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SvnInfo {
    pub url: String,
    pub kind: String,
    pub revision: i64,
    pub repos_root: String,
    pub repos_uuid: String,
    pub last_changed_rev: i64,
}

/// A single changed-path entry within a log entry (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SvnChangedPath {
    pub path: String,
    /// Empty string means the server did not report a kind (pre-1.6); the
    /// caller must resolve it via `get_kind`.
    pub kind: String,
    pub action: char,
    pub copyfrom_path: Option<String>,
    pub copyfrom_rev: Option<i64>,
}

/// A single `svn status --xml` entry: a working-copy path and its
/// `wc-status item` attribute (`"normal"`, `"added"`, `"unversioned"`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub path: String,
    pub status: String,
}

/// One `svn log --xml` entry (§3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SvnLogEntry {
    pub revision: i64,
    pub author: String,
    pub date_raw: String,
    pub date_epoch: i64,
    pub message: String,
    /// The URL this entry was fetched relative to; stamped in by the log
    /// iterator (C2), not by the parser.
    #[serde(default)]
    pub url: String,
    /// Sorted ascending by `path` so parents precede children (§3 invariant).
    pub changed_paths: Vec<SvnChangedPath>,
    #[serde(default)]
    pub revprops: BTreeMap<String, String>,
}

/// Parse `svn info --xml` output into a single [`SvnInfo`].
pub fn parse_svn_info(xml: &str) -> Result<SvnInfo, SvnError> {
    let xml = strip_forbidden_xml_chars(xml);
    let entry = extract_tag_content(&xml, "entry")
        .ok_or_else(|| SvnError::XmlParseError("missing <entry> in info output".into()))?;
    let kind = extract_attribute(&xml, "entry", "kind")
        .ok_or_else(|| SvnError::XmlParseError("missing kind attribute on <entry>".into()))?;
    let url = extract_tag_content(&entry, "url")
        .ok_or_else(|| SvnError::XmlParseError("missing <url>".into()))?;
    let revision = extract_attribute(&xml, "entry", "revision")
        .ok_or_else(|| SvnError::XmlParseError("missing revision attribute".into()))?
        .parse::<i64>()
        .map_err(|e| SvnError::XmlParseError(format!("bad revision: {e}")))?;
    let repos_root = extract_tag_content(&entry, "root")
        .ok_or_else(|| SvnError::XmlParseError("missing <root>".into()))?;
    let repos_uuid = extract_tag_content(&entry, "uuid")
        .ok_or_else(|| SvnError::XmlParseError("missing <uuid>".into()))?;
    let commit = extract_tag_content(&entry, "commit")
        .ok_or_else(|| SvnError::XmlParseError("missing <commit>".into()))?;
    let last_changed_rev = extract_attribute(&entry, "commit", "revision")
        .ok_or_else(|| SvnError::XmlParseError("missing commit revision attribute".into()))?
        .parse::<i64>()
        .map_err(|e| SvnError::XmlParseError(format!("bad commit revision: {e}")))?;
    let _ = commit; // content already consumed via the attribute extraction above

    Ok(SvnInfo {
        url,
        kind,
        revision,
        repos_root,
        repos_uuid,
        last_changed_rev,
    })
}

/// Parse `svn log -v --xml` output into a list of [`SvnLogEntry`].
pub fn parse_svn_log(xml: &str) -> Result<Vec<SvnLogEntry>, SvnError> {
    let xml = strip_forbidden_xml_chars(xml);
    let mut entries = Vec::new();
    for (open_tag, entry_fragment) in extract_all_tags_with_open(&xml, "logentry") {
        let revision = extract_attr_from_str(&open_tag, &open_tag, "revision")
            .ok_or_else(|| SvnError::XmlParseError("missing logentry revision".into()))?
            .parse::<i64>()
            .map_err(|e| SvnError::XmlParseError(format!("bad logentry revision: {e}")))?;
        let author = extract_tag_content(&entry_fragment, "author").unwrap_or_default();
        let date_raw = extract_tag_content(&entry_fragment, "date").unwrap_or_default();
        let date_epoch = parse_svn_date_to_epoch(&date_raw).unwrap_or(0);
        let message = extract_tag_content(&entry_fragment, "msg").unwrap_or_default();
        let mut changed_paths = parse_changed_paths(&entry_fragment);
        changed_paths.sort_by(|a, b| a.path.cmp(&b.path));
        let revprops = parse_revprops(&entry_fragment);

        entries.push(SvnLogEntry {
            revision,
            author,
            date_raw,
            date_epoch,
            message,
            url: String::new(),
            changed_paths,
            revprops,
        });
    }
    debug!(count = entries.len(), "parsed svn log entries");
    Ok(entries)
}

fn parse_changed_paths(entry_fragment: &str) -> Vec<SvnChangedPath> {
    let mut out = Vec::new();
    let Some(paths_block) = extract_tag_content(entry_fragment, "paths") else {
        return out;
    };
    for (open_tag, path_fragment) in extract_all_tags_with_open(&paths_block, "path") {
        let path = path_fragment.trim().to_string();
        if path.is_empty() {
            continue;
        }
        let action = extract_attr_from_str(&open_tag, &open_tag, "action")
            .and_then(|s| s.chars().next())
            .unwrap_or('?');
        let kind = extract_attr_from_str(&open_tag, &open_tag, "kind").unwrap_or_default();
        let copyfrom_path = extract_attr_from_str(&open_tag, &open_tag, "copyfrom-path");
        let copyfrom_rev = extract_attr_from_str(&open_tag, &open_tag, "copyfrom-rev")
            .and_then(|s| s.parse::<i64>().ok());
        out.push(SvnChangedPath {
            path,
            kind,
            action,
            copyfrom_path,
            copyfrom_rev,
        });
    }
    out
}

fn parse_revprops(entry_fragment: &str) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    let Some(revprops_block) = extract_tag_content(entry_fragment, "revprops") else {
        return out;
    };
    for (open_tag, prop_fragment) in extract_all_tags_with_open(&revprops_block, "property") {
        if let Some(name) = extract_attr_from_str(&open_tag, &open_tag, "name") {
            out.insert(name, prop_fragment.trim().to_string());
        }
    }
    out
}

/// Parse `svn proplist --xml` / `svn propget --xml --verbose` output into a
/// `name -> value` map (`propget_all`, §4.1).
pub fn parse_svn_proplist(xml: &str) -> Result<BTreeMap<String, String>, SvnError> {
    let xml = strip_forbidden_xml_chars(xml);
    let mut out = BTreeMap::new();
    let Some(target) = extract_tag_content(&xml, "target") else {
        return Ok(out);
    };
    for (open_tag, prop_fragment) in extract_all_tags_with_open(&target, "property") {
        if let Some(name) = extract_attr_from_str(&open_tag, &open_tag, "name") {
            out.insert(name, prop_fragment.trim().to_string());
        }
    }
    Ok(out)
}

/// Parse `svn list --xml` output into an ordered `{path, kind}` list.
pub fn parse_svn_list(xml: &str) -> Result<Vec<(String, String)>, SvnError> {
    let xml = strip_forbidden_xml_chars(xml);
    let mut out = Vec::new();
    for (open_tag, entry_fragment) in extract_all_tags_with_open(&xml, "entry") {
        let kind = extract_attr_from_str(&open_tag, &open_tag, "kind").unwrap_or_default();
        let name = extract_tag_content(&entry_fragment, "name").unwrap_or_default();
        out.push((name, kind));
    }
    Ok(out)
}

/// Parse `svn status --xml -v` output into a list of [`StatusEntry`]. A
/// clean, already-tracked path still gets an entry (`item="normal"`); only
/// `-v` makes that distinction available (§4.1, §4.5 step 3).
pub fn parse_svn_status(xml: &str) -> Result<Vec<StatusEntry>, SvnError> {
    let xml = strip_forbidden_xml_chars(xml);
    let mut out = Vec::new();
    for (open_tag, entry_fragment) in extract_all_tags_with_open(&xml, "entry") {
        let Some(path) = extract_attr_from_str(&open_tag, &open_tag, "path") else {
            continue;
        };
        let status = extract_attribute(&entry_fragment, "wc-status", "item").unwrap_or_default();
        out.push(StatusEntry { path, status });
    }
    Ok(out)
}

/// Best-effort parse of an SVN ISO-8601 date into a Unix epoch. SVN always
/// emits UTC with a trailing `Z`.
fn parse_svn_date_to_epoch(date_raw: &str) -> Option<i64> {
    chrono::DateTime::parse_from_rfc3339(date_raw)
        .ok()
        .map(|dt| dt.timestamp())
}

// ---------------------------------------------------------------------------
// Minimal scanning helpers. These operate on well-formed SVN XML only; they
// are not a general-purpose XML parser.
// ---------------------------------------------------------------------------

fn extract_tag_content(xml: &str, tag: &str) -> Option<String> {
    let open_prefix = format!("<{tag}");
    let start_tag = xml.find(&open_prefix)?;
    let after_open_name = start_tag + open_prefix.len();
    let tag_close = xml[after_open_name..].find('>')? + after_open_name;
    if xml.as_bytes()[tag_close - 1] == b'/' {
        return Some(String::new());
    }
    let content_start = tag_close + 1;
    let close_tag = format!("</{tag}>");
    let content_end = xml[content_start..].find(&close_tag)? + content_start;
    Some(unescape_xml(&xml[content_start..content_end]))
}

/// Like [`extract_tag_content`]/loop but also returns each match's opening
/// tag text (attributes live there, not in the content), since a tag's own
/// content may recurse and contain unrelated same-named descendants.
fn extract_all_tags_with_open(xml: &str, tag: &str) -> Vec<(String, String)> {
    let open_prefix = format!("<{tag}");
    let close_tag = format!("</{tag}>");
    let mut out = Vec::new();
    let mut cursor = 0usize;
    while let Some(rel_start) = xml[cursor..].find(&open_prefix) {
        let start_tag = cursor + rel_start;
        let after_open_name = start_tag + open_prefix.len();
        let Some(rel_close) = xml[after_open_name..].find('>') else {
            break;
        };
        let tag_close = after_open_name + rel_close;
        let open_tag_text = xml[start_tag..=tag_close].to_string();
        if xml.as_bytes()[tag_close - 1] == b'/' {
            out.push((open_tag_text, String::new()));
            cursor = tag_close + 1;
            continue;
        }
        let content_start = tag_close + 1;
        let Some(rel_end) = xml[content_start..].find(&close_tag) else {
            break;
        };
        let content_end = content_start + rel_end;
        out.push((open_tag_text, xml[content_start..content_end].to_string()));
        cursor = content_end + close_tag.len();
    }
    out
}

fn extract_all_tag_contents(xml: &str, tag: &str) -> Vec<String> {
    extract_all_tags_with_open(xml, tag)
        .into_iter()
        .map(|(_, content)| content)
        .collect()
}

fn extract_attribute(xml: &str, tag: &str, attr: &str) -> Option<String> {
    let open_prefix = format!("<{tag}");
    let start_tag = xml.find(&open_prefix)?;
    let after_open_name = start_tag + open_prefix.len();
    let tag_close = xml[after_open_name..].find('>')? + after_open_name;
    extract_attr_from_str(xml, &xml[start_tag..tag_close], attr)
}

fn extract_attr_from_str(_xml: &str, haystack: &str, attr: &str) -> Option<String> {
    let needle = format!("{attr}=\"");
    let start = haystack.find(&needle)? + needle.len();
    let end = haystack[start..].find('"')? + start;
    Some(unescape_xml(&haystack[start..end]))
}

fn unescape_xml(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO_XML: &str = r#"<?xml version="1.0"?>
<info>
<entry kind="dir" path="trunk" revision="42">
<url>https://svn.example.com/repo/trunk</url>
<repository>
<root>https://svn.example.com/repo</root>
<uuid>abcd-1234-uuid</uuid>
</repository>
<commit revision="40">
<author>alice</author>
<date>2024-01-01T00:00:00.000000Z</date>
</commit>
</entry>
</info>"#;

    #[test]
    fn parses_info_xml() {
        let info = parse_svn_info(INFO_XML).unwrap();
        assert_eq!(info.kind, "dir");
        assert_eq!(info.revision, 42);
        assert_eq!(info.url, "https://svn.example.com/repo/trunk");
        assert_eq!(info.repos_root, "https://svn.example.com/repo");
        assert_eq!(info.repos_uuid, "abcd-1234-uuid");
        assert_eq!(info.last_changed_rev, 40);
    }

    const LOG_XML: &str = r#"<?xml version="1.0"?>
<log>
<logentry revision="3">
<author>bob</author>
<date>2024-02-01T12:00:00.000000Z</date>
<paths>
<path action="D" kind="file">/trunk/a</path>
<path action="A" kind="file" copyfrom-path="/trunk/a" copyfrom-rev="2">/trunk/b</path>
</paths>
<msg>rename a to b</msg>
</logentry>
<logentry revision="2">
<author>alice</author>
<date>2024-01-15T08:00:00.000000Z</date>
<paths>
<path action="M" kind="file">/trunk/a</path>
</paths>
<msg>tweak a</msg>
</logentry>
</log>"#;

    #[test]
    fn parses_log_entries_with_sorted_changed_paths() {
        let entries = parse_svn_log(LOG_XML).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].revision, 3);
        assert_eq!(entries[0].author, "bob");
        assert_eq!(entries[0].message, "rename a to b");
        // ascending by path: /trunk/a before /trunk/b
        assert_eq!(entries[0].changed_paths[0].path, "/trunk/a");
        assert_eq!(entries[0].changed_paths[0].action, 'D');
        assert_eq!(entries[0].changed_paths[1].path, "/trunk/b");
        assert_eq!(
            entries[0].changed_paths[1].copyfrom_path.as_deref(),
            Some("/trunk/a")
        );
        assert_eq!(entries[0].changed_paths[1].copyfrom_rev, Some(2));
    }

    #[test]
    fn strips_control_characters_before_parsing() {
        let noisy = format!("{LOG_XML}\u{0001}");
        let entries = parse_svn_log(&noisy).unwrap();
        assert_eq!(entries.len(), 2);
    }

    const PROPLIST_XML: &str = r#"<?xml version="1.0"?>
<properties>
<target path="/trunk/a.txt">
<property name="svn:eol-style">native</property>
<property name="svn:mergeinfo">/branches/x:1-5</property>
</target>
</properties>"#;

    #[test]
    fn parses_proplist() {
        let props = parse_svn_proplist(PROPLIST_XML).unwrap();
        assert_eq!(props.get("svn:eol-style").unwrap(), "native");
        assert_eq!(props.get("svn:mergeinfo").unwrap(), "/branches/x:1-5");
    }

    const LIST_XML: &str = r#"<?xml version="1.0"?>
<lists>
<list path="trunk">
<entry kind="file">
<name>a.txt</name>
</entry>
<entry kind="dir">
<name>sub</name>
</entry>
</list>
</lists>"#;

    const STATUS_XML: &str = r#"<?xml version="1.0"?>
<status>
<target path=".">
<entry path="trunk/a.txt">
<wc-status item="normal" revision="40" props="none">
<commit revision="38">
<author>alice</author>
<date>2024-01-01T00:00:00.000000Z</date>
</commit>
</wc-status>
</entry>
<entry path="trunk/b.txt">
<wc-status item="unversioned">
</wc-status>
</entry>
</target>
</status>"#;

    #[test]
    fn parses_status_entries_including_clean_paths() {
        let entries = parse_svn_status(STATUS_XML).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "trunk/a.txt");
        assert_eq!(entries[0].status, "normal");
        assert_eq!(entries[1].path, "trunk/b.txt");
        assert_eq!(entries[1].status, "unversioned");
    }

    #[test]
    fn parses_list_entries() {
        let entries = parse_svn_list(LIST_XML).unwrap();
        assert_eq!(
            entries,
            vec![
                ("a.txt".to_string(), "file".to_string()),
                ("sub".to_string(), "dir".to_string()),
            ]
        );
    }
}
