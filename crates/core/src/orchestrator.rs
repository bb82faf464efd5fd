//! Orchestrator (C8, §4.8).
//!
//! Drives a whole replay run: resolves the source/target coordinates once,
//! performs the initial import or rebuilds the revision map for resume,
//! then iterates the source log with the chunked iterator (C2) and feeds
//! each entry through the processor (C6) and commit driver (C7), updating
//! the revision map (C4) after every successful commit.
//!
//! Owns the only mutable state of a run (§9 Design Notes): the working
//! copy path and the revision map, bundled in [`ReplayState`] and passed by
//! `&mut` rather than read from a global.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{info, instrument, warn};

use crate::ancestry::{find_ancestors, AncestorStep};
use crate::commit::{commit_from_log_entry, keep_revnum};
use crate::config::{ReplayConfig, RevisionSpec, VerifyMode};
use crate::errors::ReplayError;
use crate::log_iterator::LogIterator;
use crate::processor::{process_entry, ProcessContext};
use crate::rev_map::RevMap;
use crate::svn::client::{RevArg, SvnOps};

/// Cleanup cadence for purging pristine caches on SVN >= 1.7 (§4.8).
const CLEANUP_EVERY_N_COMMITS: u64 = 100;

/// The mutable state of one replay run: the working copy on disk plus the
/// in-memory revision map and running rev counters (§3 Lifecycle, §9).
pub struct ReplayState {
    pub working_copy: PathBuf,
    pub rev_map: RevMap,
    pub target_rev_last: i64,
}

/// Fixed repository coordinates resolved once at startup (§3).
struct Coordinates {
    source_repos_root: String,
    source_base: String,
    source_uuid: String,
    target_repos_root: String,
    target_base: String,
}

/// Outcome of a completed (non-interrupted) run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub last_source_rev: i64,
    pub last_target_rev: i64,
    pub commits_made: u64,
}

fn strip_repos_root<'a>(url: &'a str, repos_root: &str) -> &'a str {
    url.strip_prefix(repos_root).unwrap_or(url)
}

async fn resolve_rev(svn: &dyn SvnOps, url: &str, spec: &RevisionSpec) -> Result<i64, ReplayError> {
    let rev_arg = match spec {
        RevisionSpec::Number(n) => RevArg::Number(*n),
        RevisionSpec::Head => RevArg::Head,
        RevisionSpec::Date(d) => RevArg::Date(d.clone()),
    };
    Ok(svn.get_rev(url, rev_arg).await?)
}

/// Run a replay from scratch or resume, per §4.8. `working_copy` is the
/// directory to checkout into (or that already holds a prior run's
/// working copy, in resume mode).
#[instrument(skip(svn, cfg), fields(source_url = %cfg.source_url, target_url = %cfg.target_url))]
pub async fn run(
    svn: &dyn SvnOps,
    cfg: &ReplayConfig,
    working_copy: &Path,
) -> Result<RunReport, ReplayError> {
    cfg.validate()?;

    let source_info = svn.info(&cfg.source_url, None).await?;
    let target_info = svn.info(&cfg.target_url, None).await?;

    let coords = Coordinates {
        source_repos_root: source_info.repos_root.clone(),
        source_base: strip_repos_root(&cfg.source_url, &source_info.repos_root).to_string(),
        source_uuid: source_info.repos_uuid.clone(),
        target_repos_root: target_info.repos_root.clone(),
        target_base: strip_repos_root(&cfg.target_url, &target_info.repos_root).to_string(),
    };

    let rev_start = resolve_rev(svn, &cfg.source_url, &cfg.revision.start).await?;
    let rev_end = resolve_rev(svn, &cfg.source_url, &cfg.revision.end).await?;

    ensure_working_copy(svn, cfg, working_copy).await?;

    // Every subsequent SVN invocation that names a working-copy-relative
    // path (mkdir/add/export-dest/update/remove/copy-dest/propset/commit)
    // relies on this: the process cwd is the target working copy,
    // established once here and never mutated for the rest of the run
    // (§5). `keep_revnum`'s scratch working copy is always addressed by
    // its own absolute path rather than relying on cwd, so it is immune to
    // this pinning.
    let wc_str = working_copy
        .to_str()
        .ok_or_else(|| ReplayError::Internal("working copy path is not valid UTF-8".into()))?;
    std::env::set_current_dir(working_copy).map_err(|e| {
        ReplayError::Internal(format!("failed to change into working copy {wc_str}: {e}"))
    })?;

    let mut state = if cfg.resume {
        resume(svn, cfg, working_copy, &coords).await?
    } else {
        initial_import(svn, cfg, working_copy, &coords, rev_start, rev_end).await?
    };

    let result = main_loop(svn, cfg, &coords, &mut state, rev_end).await;

    match result {
        Ok(commits_made) => {
            if cfg.verify == Some(VerifyMode::All) {
                verify_all_replayed(svn, &coords, &state.rev_map).await?;
            }
            Ok(RunReport {
                last_source_rev: state.rev_map.max_source_rev().unwrap_or(rev_start),
                last_target_rev: state.target_rev_last,
                commits_made,
            })
        }
        Err(err) => {
            let last_good = state.rev_map.max_source_rev().unwrap_or(rev_start - 1);
            warn!(last_good_source_rev = last_good, "run interrupted, cleaning up working copy");
            let _ = svn.cleanup(working_copy.to_str()).await;
            let _ = svn.revert(working_copy.to_str().unwrap_or("."), true).await;
            match err {
                ReplayError::Interrupted { .. } => Err(ReplayError::Interrupted {
                    last_good_source_rev: last_good,
                }),
                other => Err(other),
            }
        }
    }
}

/// Ensure the target working copy exists before the process cwd is pinned
/// to it (§4.8 step 3-4): resume reuses an existing checkout verbatim;
/// a fresh run checks out if absent, or refuses a non-empty target unless
/// `force` is set.
async fn ensure_working_copy(
    svn: &dyn SvnOps,
    cfg: &ReplayConfig,
    working_copy: &Path,
) -> Result<(), ReplayError> {
    let wc_str = working_copy
        .to_str()
        .ok_or_else(|| ReplayError::Internal("working copy path is not valid UTF-8".into()))?;

    if cfg.resume {
        if !working_copy.exists() {
            return Err(ReplayError::Internal(format!(
                "resume requested but working copy {wc_str} does not exist"
            )));
        }
        return Ok(());
    }

    if !working_copy.exists() {
        svn.checkout(&cfg.target_url, wc_str).await?;
    } else if !cfg.force {
        let existing = svn.list(wc_str, None, false).await.unwrap_or_default();
        if !existing.is_empty() {
            return Err(ReplayError::Internal(format!(
                "target working copy {wc_str} is not empty; pass force to override"
            )));
        }
    }
    Ok(())
}

/// Initial import (§4.8 step 4): compute the replay's own ancestor chain
/// once, seed the target with the first in-scope revision, and commit it
/// with tracking revprops. The working copy itself is already checked out
/// and the process cwd already pinned to it by [`ensure_working_copy`] /
/// [`run`] by the time this runs.
async fn initial_import(
    svn: &dyn SvnOps,
    cfg: &ReplayConfig,
    working_copy: &Path,
    coords: &Coordinates,
    rev_start: i64,
    rev_end: i64,
) -> Result<ReplayState, ReplayError> {
    let wc_str = working_copy
        .to_str()
        .ok_or_else(|| ReplayError::Internal("working copy path is not valid UTF-8".into()))?;

    let mut log_it = LogIterator::new(
        svn,
        &coords.source_repos_root,
        &format!("{}{}", coords.source_repos_root, coords.source_base),
        rev_start,
        rev_end,
    )
    .with_revprops(true);
    let first_entry = log_it
        .next()
        .await?
        .ok_or_else(|| ReplayError::Ancestry(crate::errors::AncestryError::EmptyLog(
            coords.source_base.clone(),
        )))?;

    let mut rev_map = RevMap::new();

    let entries = svn
        .list(
            &format!("{}{}", coords.source_repos_root, coords.source_base),
            Some(first_entry.revision),
            false,
        )
        .await
        .unwrap_or_default();

    for (name, kind) in &entries {
        let is_dir = kind == "dir";
        if is_dir {
            svn.mkdir(name).await?;
        }
        let source_url = format!(
            "{}{}/{}",
            coords.source_repos_root, coords.source_base, name
        );
        svn.export(&source_url, first_entry.revision, name, true, !is_dir)
            .await?;
        if !is_dir {
            svn.add(name, true).await?;
        }
        if cfg.keep_prop {
            let mut props = svn
                .propget_all(&source_url, Some(first_entry.revision))
                .await
                .unwrap_or_default();
            props.remove("svn:mergeinfo");
            for (k, v) in props {
                svn.propset(&k, &v, name).await?;
            }
        }
    }

    let commit_paths: Vec<String> = entries.into_iter().map(|(name, _)| name).collect();
    let target_rev = commit_from_log_entry(
        svn,
        cfg,
        &first_entry,
        &commit_paths,
        &coords.source_uuid,
        &cfg.source_url,
        wc_str,
    )
    .await?
    .unwrap_or(0);

    if target_rev > 0 {
        rev_map.set(first_entry.revision, target_rev);
        info!(
            source_rev = first_entry.revision,
            target_rev, "initial import committed"
        );
    }

    Ok(ReplayState {
        working_copy: working_copy.to_path_buf(),
        rev_map,
        target_rev_last: target_rev,
    })
}

/// Resume (§4.8 step 5): reuse the working copy after cleanup + full
/// revert, rebuild the revision map from the target's own log (§4.4.1).
async fn resume(
    svn: &dyn SvnOps,
    _cfg: &ReplayConfig,
    working_copy: &Path,
    coords: &Coordinates,
) -> Result<ReplayState, ReplayError> {
    let wc_str = working_copy
        .to_str()
        .ok_or_else(|| ReplayError::Internal("working copy path is not valid UTF-8".into()))?;

    svn.cleanup(Some(wc_str)).await?;
    svn.revert(wc_str, true).await?;

    let target_url = format!("{}{}", coords.target_repos_root, coords.target_base);
    let target_log = svn
        .log(
            &target_url,
            RevArg::Number(1),
            RevArg::Head,
            None,
            false,
            true,
            true,
        )
        .await?;

    let source_url = format!("{}{}", coords.source_repos_root, coords.source_base);
    let rev_map = RevMap::rebuild_from_target_log(&target_log, &coords.source_uuid, &source_url);
    let target_rev_last = rev_map
        .max_source_rev()
        .and_then(|s| rev_map.get(s))
        .unwrap_or(0);

    info!(
        resumed_from_source_rev = rev_map.max_source_rev().unwrap_or(0),
        target_rev_last, "resumed from target tracking revprops"
    );

    Ok(ReplayState {
        working_copy: working_copy.to_path_buf(),
        rev_map,
        target_rev_last,
    })
}

/// Main replay loop (§4.8): iterate `start+1 ..= rev_end`, process and
/// commit each entry, updating the revision map. Returns the number of
/// commits made.
async fn main_loop(
    svn: &dyn SvnOps,
    cfg: &ReplayConfig,
    coords: &Coordinates,
    state: &mut ReplayState,
    rev_end: i64,
) -> Result<u64, ReplayError> {
    let start = state.rev_map.max_source_rev().unwrap_or(0);
    if start >= rev_end {
        return Ok(0);
    }

    let source_ancestors: Vec<AncestorStep> =
        find_ancestors(svn, &coords.source_repos_root, &coords.source_base, rev_end, None).await?;

    let wc_str = state
        .working_copy
        .to_str()
        .ok_or_else(|| ReplayError::Internal("working copy path is not valid UTF-8".into()))?
        .to_string();

    let mut log_it = LogIterator::new(
        svn,
        &coords.source_repos_root,
        &format!("{}{}", coords.source_repos_root, coords.source_base),
        start + 1,
        rev_end,
    )
    .with_revprops(true);

    let mut commits_made = 0u64;
    let mut processed = 0u64;
    let effective_limit = cfg.effective_limit();

    while let Some(entry) = log_it.next().await? {
        if let Some(limit) = effective_limit {
            if processed >= limit {
                break;
            }
        }

        if cfg.keep_revnum && entry.revision > state.target_rev_last + 1 {
            let scratch = format!("{wc_str}.keep-revnum-scratch");
            state.target_rev_last = keep_revnum(
                svn,
                &format!("{}{}", coords.target_repos_root, coords.target_base),
                &scratch,
                entry.revision,
                state.target_rev_last,
            )
            .await?;
        }

        let process_ctx = ProcessContext {
            svn,
            source_repos_root: &coords.source_repos_root,
            source_base: &coords.source_base,
            target_repos_root: &coords.target_repos_root,
            target_base: &coords.target_base,
            target_wc: &wc_str,
            source_ancestors: &source_ancestors,
            rev_map: &state.rev_map,
            keep_prop: cfg.keep_prop,
        };

        let commit_paths = process_entry(&process_ctx, &entry).await?;

        if let Some(pre_commit) = &cfg.pre_commit {
            run_pre_commit_hook(pre_commit, &entry, &wc_str)?;
        }

        let target_rev = commit_from_log_entry(
            svn,
            cfg,
            &entry,
            &commit_paths,
            &coords.source_uuid,
            &cfg.source_url,
            &wc_str,
        )
        .await?;

        if let Some(target_rev) = target_rev {
            state.rev_map.set(entry.revision, target_rev);
            state.target_rev_last = target_rev;
            commits_made += 1;

            if cfg.verify == Some(VerifyMode::Changed) {
                verify_entry(svn, coords, &entry, target_rev, VerifyMode::Changed).await?;
            }

            if commits_made % CLEANUP_EVERY_N_COMMITS == 0 {
                svn.cleanup(Some(&wc_str)).await?;
            }
        }

        processed += 1;
    }

    Ok(commits_made)
}

/// Best-effort shell hook invocation. Failures are reported as internal
/// errors rather than silently ignored, since a pre-commit gate that can't
/// run is indistinguishable from one that rejected the commit.
fn run_pre_commit_hook(
    command: &str,
    entry: &crate::svn::parser::SvnLogEntry,
    wc_str: &str,
) -> Result<(), ReplayError> {
    let status = std::process::Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("SVNREPLAY_SOURCE_REV", entry.revision.to_string())
        .env("SVNREPLAY_WC", wc_str)
        .status()
        .map_err(|e| ReplayError::Internal(format!("pre-commit hook failed to launch: {e}")))?;
    if !status.success() {
        return Err(ReplayError::Internal(format!(
            "pre-commit hook exited with {status}"
        )));
    }
    Ok(())
}

/// Verify that each changed file in `entry` replayed byte-for-byte into
/// the target at `target_rev` (§8 Testable Properties, §10.1 verify mode).
async fn verify_entry(
    svn: &dyn SvnOps,
    coords: &Coordinates,
    entry: &crate::svn::parser::SvnLogEntry,
    target_rev: i64,
    mode: VerifyMode,
) -> Result<(), ReplayError> {
    info!(source_rev = entry.revision, target_rev, ?mode, "verifying revision");
    for changed in &entry.changed_paths {
        if changed.kind != "file" || changed.action == 'D' {
            continue;
        }
        let Some(offset) = changed.path.strip_prefix(&format!("{}/", coords.source_base.trim_start_matches('/')))
            .or_else(|| changed.path.strip_prefix(&coords.source_base).map(|s| s.trim_start_matches('/')))
        else {
            continue;
        };
        let source_url = format!("{}{}", coords.source_repos_root, changed.path);
        let target_url = format!(
            "{}{}/{}",
            coords.target_repos_root,
            coords.target_base.trim_end_matches('/'),
            offset
        );
        let source_bytes = svn.cat(&source_url, entry.revision).await?;
        let target_bytes = svn.cat(&target_url, target_rev).await?;
        if source_bytes != target_bytes {
            return Err(ReplayError::VerificationFailed {
                path: offset.to_string(),
                source_rev: entry.revision,
                target_rev,
            });
        }
    }
    Ok(())
}

/// `verify=all`'s end-of-run full pass (§4.8, §10.1): re-fetch each
/// replayed revision's own log entry and verify it again, independent of
/// whatever the per-commit `verify=changed` check already did.
async fn verify_all_replayed(
    svn: &dyn SvnOps,
    coords: &Coordinates,
    rev_map: &RevMap,
) -> Result<(), ReplayError> {
    let source_url = format!("{}{}", coords.source_repos_root, coords.source_base);
    for (source_rev, target_rev) in rev_map.entries() {
        let mut entries = svn
            .log(
                &source_url,
                RevArg::Number(source_rev),
                RevArg::Number(source_rev),
                Some(1),
                false,
                true,
                false,
            )
            .await?;
        let Some(entry) = entries.pop() else {
            continue;
        };
        verify_entry(svn, coords, &entry, target_rev, VerifyMode::All).await?;
    }
    Ok(())
}

/// Build the tracking revprop map directly, for callers (e.g. the CLI's
/// `dry-run` summary) that want to preview what a commit would carry
/// without performing one.
pub fn preview_tracking_revprops(
    source_uuid: &str,
    source_url: &str,
    source_rev: i64,
) -> BTreeMap<String, String> {
    crate::commit::tracking_revprops(source_uuid, source_url, source_rev)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RevisionRange, Verbosity};
    use crate::test_support::{changed, log_entry, FakeSvnClient};

    fn base_config(source_url: &str, target_url: &str) -> ReplayConfig {
        ReplayConfig {
            source_url: source_url.to_string(),
            target_url: target_url.to_string(),
            revision: RevisionRange::default(),
            resume: false,
            force: true,
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

    #[tokio::test]
    async fn initial_import_seeds_rev_map_from_first_entry() {
        let repo_root = "file:///repo";
        let fake = FakeSvnClient::new(repo_root, "uuid-1").with_entry(log_entry(
            1,
            "file:///repo/trunk",
            vec![changed("/trunk/a.txt", "file", 'A', None, None)],
        ));
        let cfg = base_config(
            "file:///repo/trunk",
            "file:///repo2/trunk",
        );
        let tmp = tempfile::tempdir().unwrap();
        let wc = tmp.path().join("wc");

        let coords = Coordinates {
            source_repos_root: repo_root.to_string(),
            source_base: "/trunk".to_string(),
            source_uuid: "uuid-1".to_string(),
            target_repos_root: repo_root.to_string(),
            target_base: "/trunk".to_string(),
        };

        let state = initial_import(&fake, &cfg, &wc, &coords, 1, 1).await.unwrap();
        assert_eq!(state.rev_map.get(1), Some(1));
        assert_eq!(state.target_rev_last, 1);
    }

    #[tokio::test]
    async fn main_loop_is_noop_when_already_caught_up() {
        let repo_root = "file:///repo";
        let fake = FakeSvnClient::new(repo_root, "uuid-1");
        let cfg = base_config("file:///repo/trunk", "file:///repo2/trunk");
        let coords = Coordinates {
            source_repos_root: repo_root.to_string(),
            source_base: "/trunk".to_string(),
            source_uuid: "uuid-1".to_string(),
            target_repos_root: repo_root.to_string(),
            target_base: "/trunk".to_string(),
        };
        let mut rev_map = RevMap::new();
        rev_map.set(5, 5);
        let mut state = ReplayState {
            working_copy: PathBuf::from("/tmp/does-not-matter"),
            rev_map,
            target_rev_last: 5,
        };
        let commits = main_loop(&fake, &cfg, &coords, &mut state, 5).await.unwrap();
        assert_eq!(commits, 0);
    }
}
