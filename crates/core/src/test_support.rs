//! An in-memory [`SvnOps`] fake standing in for a repository's history
//! (§10.5). Only present for tests; no production code depends on it.

#![cfg(test)]

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::SvnError;
use crate::svn::client::{RevArg, SvnOps};
use crate::svn::parser::{StatusEntry, SvnChangedPath, SvnInfo, SvnLogEntry};

/// A scripted revision history plus a mutable working-copy mirror, enough
/// to drive C3-C7 without a live `svn` binary.
#[derive(Default)]
pub struct FakeSvnClient {
    pub repos_root: String,
    pub repos_uuid: String,
    /// All log entries across the whole repository, oldest first.
    pub log_entries: Vec<SvnLogEntry>,
    /// path -> contents, as of whatever revision the test cares about;
    /// tests poke this directly to simulate `cat`/`export`/`add`/`remove`.
    pub tree: Mutex<BTreeMap<String, Vec<u8>>>,
    pub committed: Mutex<Vec<(Vec<String>, String, BTreeMap<String, String>)>>,
    pub next_commit_rev: Mutex<i64>,
}

impl FakeSvnClient {
    pub fn new(repos_root: &str, repos_uuid: &str) -> Self {
        FakeSvnClient {
            repos_root: repos_root.to_string(),
            repos_uuid: repos_uuid.to_string(),
            log_entries: Vec::new(),
            tree: Mutex::new(BTreeMap::new()),
            committed: Mutex::new(Vec::new()),
            next_commit_rev: Mutex::new(1),
        }
    }

    pub fn with_entry(mut self, entry: SvnLogEntry) -> Self {
        self.log_entries.push(entry);
        self
    }

    fn entries_at_or_before(&self, url_path: &str, rev: i64) -> Vec<&SvnLogEntry> {
        self.log_entries
            .iter()
            .filter(|e| e.revision <= rev && e.url == url_path)
            .collect()
    }
}

#[async_trait]
impl SvnOps for FakeSvnClient {
    async fn info(&self, url_or_wc: &str, rev: Option<RevArg>) -> Result<SvnInfo, SvnError> {
        let revision = match rev {
            Some(RevArg::Number(n)) => n,
            _ => self.log_entries.last().map(|e| e.revision).unwrap_or(0),
        };
        Ok(SvnInfo {
            url: url_or_wc.to_string(),
            kind: "dir".to_string(),
            revision,
            repos_root: self.repos_root.clone(),
            repos_uuid: self.repos_uuid.clone(),
            last_changed_rev: revision,
        })
    }

    async fn get_rev(&self, _url: &str, rev_spec: RevArg) -> Result<i64, SvnError> {
        match rev_spec {
            RevArg::Number(n) => Ok(n),
            RevArg::Head => Ok(self.log_entries.last().map(|e| e.revision).unwrap_or(0)),
            RevArg::Date(_) => Ok(1),
        }
    }

    async fn list(
        &self,
        _url_or_wc: &str,
        _rev: Option<i64>,
        _recursive: bool,
    ) -> Result<Vec<(String, String)>, SvnError> {
        Ok(Vec::new())
    }

    async fn log(
        &self,
        url: &str,
        rev_a: RevArg,
        rev_b: RevArg,
        limit: Option<u32>,
        _stop_on_copy: bool,
        _get_paths: bool,
        _get_revprops: bool,
    ) -> Result<Vec<SvnLogEntry>, SvnError> {
        let path = url.strip_prefix(&self.repos_root).unwrap_or(url);
        let (lo, hi) = match (rev_a, rev_b) {
            (RevArg::Number(a), RevArg::Number(b)) => {
                if a <= b {
                    (a, b)
                } else {
                    (b, a)
                }
            }
            _ => (0, i64::MAX),
        };
        let mut matched: Vec<SvnLogEntry> = self
            .entries_at_or_before(path, hi)
            .into_iter()
            .filter(|e| e.revision >= lo)
            .cloned()
            .collect();
        matched.sort_by_key(|e| e.revision);
        if let Some(n) = limit {
            matched.truncate(n as usize);
        }
        Ok(matched)
    }

    async fn cat(&self, url: &str, _rev: i64) -> Result<Vec<u8>, SvnError> {
        let tree = self.tree.lock().unwrap();
        tree.get(url)
            .cloned()
            .ok_or_else(|| SvnError::NotFound(url.to_string()))
    }

    async fn export(
        &self,
        _url: &str,
        _rev: i64,
        _dest: &str,
        _force: bool,
        _non_recursive: bool,
    ) -> Result<(), SvnError> {
        Ok(())
    }

    async fn checkout(&self, _url: &str, _dest: &str) -> Result<(), SvnError> {
        Ok(())
    }

    async fn update(&self, _path: &str, _non_recursive: bool) -> Result<(), SvnError> {
        Ok(())
    }

    async fn add(&self, _path: &str, _parents: bool) -> Result<(), SvnError> {
        Ok(())
    }

    async fn copy(&self, _src_url: &str, _src_rev: i64, _dest: &str) -> Result<(), SvnError> {
        Ok(())
    }

    async fn remove(&self, _path: &str, _force: bool) -> Result<(), SvnError> {
        Ok(())
    }

    async fn mkdir(&self, _path: &str) -> Result<(), SvnError> {
        Ok(())
    }

    async fn revert(&self, _path: &str, _recursive: bool) -> Result<(), SvnError> {
        Ok(())
    }

    async fn status(
        &self,
        _path: &str,
        _no_recursive: bool,
    ) -> Result<Vec<StatusEntry>, SvnError> {
        Ok(Vec::new())
    }

    async fn cleanup(&self, _path: Option<&str>) -> Result<(), SvnError> {
        Ok(())
    }

    async fn commit(
        &self,
        paths: &[String],
        message: &str,
        revprops: &BTreeMap<String, String>,
    ) -> Result<i64, SvnError> {
        let mut next = self.next_commit_rev.lock().unwrap();
        let rev = *next;
        *next += 1;
        self.committed
            .lock()
            .unwrap()
            .push((paths.to_vec(), message.to_string(), revprops.clone()));
        Ok(rev)
    }

    async fn propget_all(
        &self,
        _path_or_url: &str,
        _rev: Option<i64>,
    ) -> Result<BTreeMap<String, String>, SvnError> {
        Ok(BTreeMap::new())
    }

    async fn propset(&self, _prop: &str, _value: &str, _path: &str) -> Result<(), SvnError> {
        Ok(())
    }

    async fn propdel(&self, _prop: &str, _path: &str) -> Result<(), SvnError> {
        Ok(())
    }

    async fn propset_revprop(
        &self,
        _url_or_wc: &str,
        _rev: i64,
        _prop: &str,
        _value: &str,
    ) -> Result<(), SvnError> {
        Ok(())
    }
}

pub fn changed(
    path: &str,
    kind: &str,
    action: char,
    copyfrom_path: Option<&str>,
    copyfrom_rev: Option<i64>,
) -> SvnChangedPath {
    SvnChangedPath {
        path: path.to_string(),
        kind: kind.to_string(),
        action,
        copyfrom_path: copyfrom_path.map(|s| s.to_string()),
        copyfrom_rev,
    }
}

pub fn log_entry(revision: i64, url: &str, changed_paths: Vec<SvnChangedPath>) -> SvnLogEntry {
    SvnLogEntry {
        revision,
        author: "tester".to_string(),
        date_raw: "2024-01-01T00:00:00.000000Z".to_string(),
        date_epoch: 1_704_067_200,
        message: format!("r{revision}"),
        url: url.to_string(),
        changed_paths,
        revprops: BTreeMap::new(),
    }
}
