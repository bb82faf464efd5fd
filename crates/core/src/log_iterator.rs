//! Chunked log iterator (C2, §4.2).
//!
//! Produces a lazy, finite sequence of source log entries without ever
//! buffering the whole history: entries are fetched a chunk at a time, and
//! the chunk size adapts to how long each `log` call took so that neither
//! too many small requests nor one enormous one are made.
//!
//! When the caller supplies a precomputed ancestor chain (C3), the iterator
//! walks it segment by segment, switching the queried URL at each copy-from
//! boundary — the only correct way to traverse history across a path that
//! was deleted and later re-created under the same name (plain `svn log`
//! peg-revision following resolves ordinary renames on its own; it cannot
//! disambiguate two unrelated incarnations of the same path string).

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::ancestry::AncestorStep;
use crate::errors::SvnError;
use crate::svn::client::{RevArg, SvnOps};
use crate::svn::parser::SvnLogEntry;

const LOG_DURATION_THRESHOLD: Duration = Duration::from_secs(10);
const LOG_MIN_CHUNK_LENGTH: u32 = 10;
const LOG_MAX_CHUNK_LENGTH: u32 = 10_000;

/// One segment of the ancestor-aware walk: query `ancestors[idx].copyfrom_path`
/// until `cur_rev` reaches `ancestors[idx].copyfrom_rev`, then hop to
/// `ancestors[idx].revision` on the next segment inward (or the base path,
/// once `idx` reaches 0).
struct AncestorCursor<'a> {
    ancestors: &'a [AncestorStep],
    idx: Option<usize>,
    end_rev: Option<i64>,
}

/// Produces log entries for `(repos_root, url, first_rev, last_rev)` one
/// chunk at a time (§4.2).
pub struct LogIterator<'a> {
    svn: &'a dyn SvnOps,
    repos_root: String,
    last_rev: i64,
    cur_rev: i64,
    cur_url: String,
    chunk_length: u32,
    buffer: VecDeque<SvnLogEntry>,
    exhausted: bool,
    cursor: Option<AncestorCursor<'a>>,
    stop_on_copy: bool,
    get_revprops: bool,
}

impl<'a> LogIterator<'a> {
    /// Build an iterator over `first_rev..=last_rev` of `url`, without
    /// following any ancestor chain (the common case: a path known to have
    /// existed unbroken across the requested range, e.g. `/trunk`).
    pub fn new(
        svn: &'a dyn SvnOps,
        repos_root: &str,
        url: &str,
        first_rev: i64,
        last_rev: i64,
    ) -> Self {
        LogIterator {
            svn,
            repos_root: repos_root.to_string(),
            last_rev,
            cur_rev: first_rev,
            cur_url: url.to_string(),
            chunk_length: LOG_MIN_CHUNK_LENGTH,
            buffer: VecDeque::new(),
            exhausted: false,
            cursor: None,
            stop_on_copy: false,
            get_revprops: false,
        }
    }

    /// Iterate along a precomputed ancestor chain (§4.2 second paragraph),
    /// switching URLs at each copy-from boundary. `ancestors` is oldest-last
    /// (index 0 newest), matching [`crate::ancestry::find_ancestors`]'s
    /// output.
    pub fn with_ancestors(
        svn: &'a dyn SvnOps,
        repos_root: &str,
        base_path: &str,
        first_rev: i64,
        last_rev: i64,
        ancestors: &'a [AncestorStep],
    ) -> Self {
        let mut cur_url = format!("{repos_root}{base_path}");
        let mut idx = None;
        let mut end_rev = None;
        for i in (0..ancestors.len()).rev() {
            cur_url = format!("{repos_root}{}", ancestors[i].copyfrom_path);
            idx = Some(i);
            if first_rev < ancestors[i].copyfrom_rev {
                end_rev = Some(ancestors[i].copyfrom_rev);
                break;
            }
        }
        let cursor = if ancestors.is_empty() {
            None
        } else if end_rev.is_none() {
            cur_url = format!("{repos_root}{base_path}");
            Some(AncestorCursor {
                ancestors,
                idx: None,
                end_rev: None,
            })
        } else {
            Some(AncestorCursor {
                ancestors,
                idx,
                end_rev,
            })
        };

        LogIterator {
            svn,
            repos_root: repos_root.to_string(),
            last_rev,
            cur_rev: first_rev,
            cur_url,
            chunk_length: LOG_MIN_CHUNK_LENGTH,
            buffer: VecDeque::new(),
            exhausted: false,
            cursor,
            stop_on_copy: false,
            get_revprops: false,
        }
    }

    pub fn with_revprops(mut self, get_revprops: bool) -> Self {
        self.get_revprops = get_revprops;
        self
    }

    pub fn stop_on_copy(mut self, stop_on_copy: bool) -> Self {
        self.stop_on_copy = stop_on_copy;
        self
    }

    pub fn chunk_length(&self) -> u32 {
        self.chunk_length
    }

    fn advance_ancestor_cursor(&mut self) {
        let Some(cursor) = self.cursor.as_mut() else {
            return;
        };
        let Some(end_rev) = cursor.end_rev else {
            return;
        };
        if self.cur_rev < end_rev {
            return;
        }
        let idx = cursor.idx.expect("end_rev implies an active segment");
        self.cur_rev = cursor.ancestors[idx].revision;
        if idx == 0 {
            cursor.idx = None;
            cursor.end_rev = None;
            self.cur_url = format!("{}{}", self.repos_root, cursor.ancestors[0].path);
        } else {
            let next_idx = idx - 1;
            cursor.idx = Some(next_idx);
            cursor.end_rev = Some(cursor.ancestors[next_idx].copyfrom_rev);
            self.cur_url = format!(
                "{}{}",
                self.repos_root, cursor.ancestors[next_idx].copyfrom_path
            );
        }
    }

    /// Pull the next entry, fetching a new chunk as needed. Returns `None`
    /// once the sequence is exhausted.
    pub async fn next(&mut self) -> Result<Option<SvnLogEntry>, SvnError> {
        loop {
            if let Some(entry) = self.buffer.pop_front() {
                return Ok(Some(entry));
            }
            if self.exhausted || self.cur_rev > self.last_rev {
                return Ok(None);
            }
            self.advance_ancestor_cursor();

            let mut stop_rev = self.last_rev.min(self.cur_rev + self.chunk_length as i64 - 1);
            if let Some(cursor) = &self.cursor {
                if let Some(end_rev) = cursor.end_rev {
                    stop_rev = stop_rev.min(end_rev);
                }
            }

            let started = Instant::now();
            let entries = self
                .svn
                .log(
                    &self.cur_url,
                    RevArg::Number(self.cur_rev),
                    RevArg::Number(stop_rev),
                    Some(self.chunk_length),
                    self.stop_on_copy,
                    true,
                    self.get_revprops,
                )
                .await?;
            let elapsed = started.elapsed();

            let mut last_yielded = None;
            for mut entry in entries {
                if entry.revision > self.last_rev {
                    break;
                }
                entry.url = self.cur_url.clone();
                last_yielded = Some(entry.revision);
                self.buffer.push_back(entry);
            }

            match last_yielded {
                Some(rev) if rev >= self.last_rev => {
                    self.exhausted = true;
                }
                Some(rev) => {
                    self.cur_rev = rev + 1;
                }
                None => {
                    self.cur_rev = stop_rev + 1;
                }
            }

            if elapsed < LOG_DURATION_THRESHOLD {
                self.chunk_length = LOG_MAX_CHUNK_LENGTH.min(self.chunk_length.saturating_mul(2));
            } else if elapsed > LOG_DURATION_THRESHOLD * 2 {
                self.chunk_length = LOG_MIN_CHUNK_LENGTH.max(self.chunk_length / 2);
            }

            if self.buffer.is_empty() && self.exhausted {
                return Ok(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{changed, log_entry, FakeSvnClient};

    #[tokio::test]
    async fn yields_entries_in_order_across_chunks() {
        let repo_root = "file:///repo";
        let mut fake = FakeSvnClient::new(repo_root, "uuid-1");
        for rev in 1..=3 {
            fake = fake.with_entry(log_entry(
                rev,
                "/trunk",
                vec![changed("/trunk/a.txt", "file", 'M', None, None)],
            ));
        }

        let mut it = LogIterator::new(&fake, repo_root, "file:///repo/trunk", 1, 3);
        let mut seen = Vec::new();
        while let Some(entry) = it.next().await.unwrap() {
            seen.push(entry.revision);
        }
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn empty_repository_yields_nothing() {
        let repo_root = "file:///repo";
        let fake = FakeSvnClient::new(repo_root, "uuid-1");
        let mut it = LogIterator::new(&fake, repo_root, "file:///repo/trunk", 1, 100);
        assert!(it.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn chunk_length_grows_on_fast_in_memory_responses() {
        let repo_root = "file:///repo";
        let fake = FakeSvnClient::new(repo_root, "uuid-1").with_entry(log_entry(
            1,
            "/trunk",
            vec![changed("/trunk/a.txt", "file", 'M', None, None)],
        ));
        let mut it = LogIterator::new(&fake, repo_root, "file:///repo/trunk", 1, 1);
        assert_eq!(it.chunk_length(), LOG_MIN_CHUNK_LENGTH);
        let entry = it.next().await.unwrap();
        assert_eq!(entry.map(|e| e.revision), Some(1));
        assert_eq!(it.chunk_length(), LOG_MIN_CHUNK_LENGTH * 2);
    }

    #[tokio::test]
    async fn ancestor_chain_switches_url_at_copyfrom_boundary() {
        let repo_root = "file:///repo";
        let ancestors = vec![AncestorStep {
            path: "/trunk/b".into(),
            revision: 5,
            copyfrom_path: "/trunk/a".into(),
            copyfrom_rev: 3,
        }];
        let mut fake = FakeSvnClient::new(repo_root, "uuid-1");
        fake = fake.with_entry(log_entry(
            1,
            "/trunk/a",
            vec![changed("/trunk/a", "file", 'A', None, None)],
        ));
        fake = fake.with_entry(log_entry(
            5,
            "/trunk/b",
            vec![changed(
                "/trunk/b",
                "file",
                'A',
                Some("/trunk/a"),
                Some(3),
            )],
        ));

        let mut it =
            LogIterator::with_ancestors(&fake, repo_root, "/trunk/b", 1, 5, &ancestors);
        let mut seen = Vec::new();
        while let Some(entry) = it.next().await.unwrap() {
            seen.push(entry.revision);
        }
        assert_eq!(seen, vec![1, 5]);
    }
}
