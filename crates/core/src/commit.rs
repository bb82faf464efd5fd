//! Commit driver (C7, §4.7).
//!
//! Assembles and performs one target commit from a source log entry,
//! guarding the commit + revprop-set pair as a single critical section via
//! the break handler (C11), and implements revision-number padding
//! ("keep-revnum" mode) against a scratch working copy.

use std::collections::BTreeMap;

use tracing::{info, instrument};

use crate::break_handler::BreakHandler;
use crate::config::ReplayConfig;
use crate::errors::ReplayError;
use crate::rev_map::encode_source_url;
use crate::svn::client::SvnOps;
use crate::svn::parser::SvnLogEntry;

/// Build the three `svn2svn:*` tracking revprops for `source_rev` (§3, §6.2).
pub fn tracking_revprops(
    source_uuid: &str,
    source_url: &str,
    source_rev: i64,
) -> BTreeMap<String, String> {
    let mut props = BTreeMap::new();
    props.insert("svn2svn:source_uuid".to_string(), source_uuid.to_string());
    props.insert(
        "svn2svn:source_url".to_string(),
        encode_source_url(source_url),
    );
    props.insert("svn2svn:source_rev".to_string(), source_rev.to_string());
    props
}

const EXPLICIT_PATHS_THRESHOLD: usize = 100;

/// Commit the currently-staged target working-copy changes for `log_entry`,
/// as one atomic commit + tracking-revprop unit (§4.7). Returns the new
/// target revision, or `None` in dry-run mode (no commit performed).
#[instrument(skip(svn, cfg, log_entry, commit_paths, break_handler), fields(source_rev = log_entry.revision))]
pub async fn commit_from_log_entry(
    svn: &dyn SvnOps,
    cfg: &ReplayConfig,
    log_entry: &SvnLogEntry,
    commit_paths: &[String],
    source_uuid: &str,
    source_url: &str,
    target_wc: &str,
) -> Result<Option<i64>, ReplayError> {
    if cfg.dry_run {
        return Ok(None);
    }

    let mut message = log_entry.message.clone();
    if cfg.log_date {
        message.push_str("\nDate: ");
        message.push_str(&log_entry.date_raw);
    }
    if cfg.log_author {
        message.push_str("\nAuthor: ");
        message.push_str(&log_entry.author);
    }

    let mut revprops = log_entry.revprops.clone();
    for (k, v) in tracking_revprops(source_uuid, source_url, log_entry.revision) {
        revprops.insert(k, v);
    }

    let paths: Vec<String> = if commit_paths.len() < EXPLICIT_PATHS_THRESHOLD {
        commit_paths.to_vec()
    } else {
        Vec::new()
    };

    let mut break_handler = BreakHandler::new();
    break_handler.enable();

    let commit_result = svn.commit(&paths, &message, &revprops).await;
    let target_rev = match commit_result {
        Ok(rev) => rev,
        Err(e) => {
            break_handler.disable();
            return Err(e.into());
        }
    };

    if cfg.keep_date {
        svn.propset_revprop(target_wc, target_rev, "svn:date", &log_entry.date_raw)
            .await?;
    }
    if cfg.keep_author {
        svn.propset_revprop(target_wc, target_rev, "svn:author", &log_entry.author)
            .await?;
    }

    break_handler.disable();
    info!(target_rev, source_rev = log_entry.revision, "committed revision");

    if break_handler.trapped() {
        return Err(ReplayError::Interrupted {
            last_good_source_rev: log_entry.revision,
        });
    }

    Ok(Some(target_rev))
}

/// Pad the target with placeholder revisions so target revision numbers
/// catch up to `source_rev - 1`, committing `svn2svn:keep-revnum` property
/// changes against a scratch working copy checked out at empty depth
/// (§4.7). Returns the new `target_rev_last`.
#[instrument(skip(svn, target_url))]
pub async fn keep_revnum(
    svn: &dyn SvnOps,
    target_url: &str,
    scratch_wc: &str,
    source_rev: i64,
    target_rev_last: i64,
) -> Result<i64, ReplayError> {
    if source_rev <= target_rev_last {
        return Err(ReplayError::Internal(format!(
            "keep-revnum requires source_rev (r{source_rev}) > target_rev_last (r{target_rev_last})"
        )));
    }
    if target_rev_last >= source_rev - 1 {
        return Ok(target_rev_last);
    }

    svn.checkout(target_url, scratch_wc).await?;

    let mut last = target_rev_last;
    for rev_num in (target_rev_last + 1)..source_rev {
        svn.propset("svn2svn:keep-revnum", &rev_num.to_string(), scratch_wc)
            .await?;

        let mut break_handler = BreakHandler::new();
        break_handler.enable();
        let committed = svn
            .commit(&[scratch_wc.to_string()], "", &BTreeMap::new())
            .await;
        break_handler.disable();
        let committed = committed?;
        if committed != rev_num {
            return Err(ReplayError::Internal(format!(
                "keep-revnum padding committed r{committed}, expected r{rev_num}"
            )));
        }
        info!(target_rev = committed, "committed keep-revnum placeholder");
        if break_handler.trapped() {
            return Err(ReplayError::Interrupted {
                last_good_source_rev: rev_num - 1,
            });
        }
        last = committed;
    }
    Ok(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracking_revprops_contains_all_three_keys() {
        let props = tracking_revprops("uuid-1", "https://svn.example.com/repo/trunk", 42);
        assert_eq!(props.get("svn2svn:source_uuid").map(String::as_str), Some("uuid-1"));
        assert_eq!(props.get("svn2svn:source_rev").map(String::as_str), Some("42"));
        assert!(props.contains_key("svn2svn:source_url"));
    }

    #[tokio::test]
    async fn dry_run_never_commits() {
        use crate::test_support::FakeSvnClient;

        let fake = FakeSvnClient::new("file:///repo", "uuid-1");
        let mut cfg = base_config();
        cfg.dry_run = true;
        let entry = SvnLogEntry {
            revision: 5,
            author: "alice".into(),
            date_raw: "2024-01-01T00:00:00.000000Z".into(),
            date_epoch: 0,
            message: "hi".into(),
            url: String::new(),
            changed_paths: Vec::new(),
            revprops: BTreeMap::new(),
        };
        let result = commit_from_log_entry(
            &fake,
            &cfg,
            &entry,
            &[],
            "uuid-1",
            "https://svn.example.com/repo/trunk",
            "/tmp/wc",
        )
        .await
        .unwrap();
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn keep_revnum_rejects_source_rev_at_or_below_target() {
        use crate::test_support::FakeSvnClient;

        let fake = FakeSvnClient::new("file:///repo", "uuid-1");
        let result = keep_revnum(&fake, "file:///target", "/tmp/scratch", 5, 5).await;
        assert!(matches!(result, Err(ReplayError::Internal(_))));
    }

    #[tokio::test]
    async fn keep_revnum_is_noop_when_already_adjacent() {
        use crate::test_support::FakeSvnClient;

        let fake = FakeSvnClient::new("file:///repo", "uuid-1");
        let result = keep_revnum(&fake, "file:///target", "/tmp/scratch", 6, 5)
            .await
            .unwrap();
        assert_eq!(result, 5);
    }

    fn base_config() -> ReplayConfig {
        use crate::config::{RevisionRange, Verbosity};
        ReplayConfig {
            source_url: "https://svn.example.com/repo/trunk".into(),
            target_url: "https://svn.example.com/repo2/trunk".into(),
            revision: RevisionRange::default(),
            resume: false,
            force: false,
            keep_author: false,
            keep_date: false,
            keep_prop: false,
            keep_revnum: false,
            log_author: false,
            log_date: false,
            limit: None,
            dry_run: false,
            verify: None,
            pre_commit: None,
            verbosity: Verbosity::Normal,
            svn_username: None,
            svn_password: None,
            working_copy: None,
        }
    }
}
