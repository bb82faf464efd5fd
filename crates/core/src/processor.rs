//! Log entry processor (C6, §4.6).
//!
//! Replays one source log entry's changed-paths against the target working
//! copy, in the order SVN reports them (parents before children), dispatching
//! each to the add/copy planner (C5) or to plain update/export/remove calls.

use std::collections::BTreeSet;

use tracing::{instrument, warn};

use crate::errors::ReplayError;
use crate::planner::{plan_add, ExportPaths, PlanAddContext};
use crate::rev_map::RevMap;
use crate::svn::client::{get_kind, SvnOps};
use crate::svn::parser::SvnLogEntry;

/// Everything `process_entry` needs about the replay's static configuration,
/// independent of which log entry is being processed (mirrors
/// [`PlanAddContext`] but also carries the source ancestor chain owned by
/// the orchestrator for the lifetime of the whole replay).
pub struct ProcessContext<'a> {
    pub svn: &'a dyn SvnOps,
    pub source_repos_root: &'a str,
    pub source_base: &'a str,
    pub target_repos_root: &'a str,
    pub target_base: &'a str,
    pub target_wc: &'a str,
    pub source_ancestors: &'a [crate::ancestry::AncestorStep],
    pub rev_map: &'a RevMap,
    pub keep_prop: bool,
}

impl<'a> ProcessContext<'a> {
    fn plan_ctx(&self) -> PlanAddContext<'a> {
        PlanAddContext {
            svn: self.svn,
            source_repos_root: self.source_repos_root,
            source_base: self.source_base,
            target_repos_root: self.target_repos_root,
            target_base: self.target_base,
            target_wc: self.target_wc,
            source_ancestors: self.source_ancestors,
            rev_map: self.rev_map,
            keep_prop: self.keep_prop,
        }
    }
}

fn is_child_path(path: &str, parent: &str) -> bool {
    path == parent || path.starts_with(&format!("{parent}/"))
}

fn offset_of(path: &str, base: &str) -> Option<String> {
    if path == base {
        Some(String::new())
    } else {
        path.strip_prefix(&format!("{}/", base.trim_end_matches('/')))
            .map(|s| s.to_string())
    }
}

/// Replay one log entry's changed-paths onto the target working copy,
/// returning the explicit list of target paths touched (for the commit
/// driver's <100-paths threshold, §4.7) (§4.6).
#[instrument(skip(ctx, entry), fields(source_rev = entry.revision))]
pub async fn process_entry(
    ctx: &ProcessContext<'_>,
    entry: &SvnLogEntry,
) -> Result<Vec<String>, ReplayError> {
    let mut commit_paths = Vec::new();
    let mut export_paths: ExportPaths = Vec::new();

    let mut sorted_paths = entry.changed_paths.clone();
    sorted_paths.sort_by(|a, b| a.path.cmp(&b.path));

    for changed in &sorted_paths {
        let Some(path_offset) = offset_of(&changed.path, ctx.source_base) else {
            continue;
        };

        let kind = if changed.kind.is_empty() {
            get_kind(
                ctx.svn,
                ctx.source_repos_root,
                &changed.path,
                entry.revision,
                changed.action,
                &entry.changed_paths,
            )
            .await?
        } else {
            changed.kind.clone()
        };
        let is_dir = kind == "dir";

        commit_paths.push(path_offset.clone());

        let mut action = changed.action;
        if action == 'R' {
            if path_exists(ctx.target_wc, &path_offset) {
                if is_dir {
                    ctx.svn.update(&path_offset, false).await?;
                }
                ctx.svn.remove(&path_offset, true).await?;
            }
            action = 'A';
        }

        match action {
            'A' => {
                if changed.copyfrom_path.is_some() && changed.copyfrom_rev.is_some() {
                    let skip_paths = sibling_skip_paths(&changed.path, &sorted_paths);
                    let plan_ctx = ctx.plan_ctx();
                    plan_add(
                        &plan_ctx,
                        &path_offset,
                        entry.revision,
                        None,
                        is_dir,
                        &skip_paths,
                        &mut export_paths,
                    )
                    .await?;
                } else {
                    ensure_parents(ctx, &path_offset, is_dir).await?;
                    let already_versioned = path_exists(ctx.target_wc, &path_offset);
                    if !already_versioned {
                        if is_dir {
                            crate::planner::add_export_path(&mut export_paths, &path_offset);
                        } else {
                            let source_url = format!("{}{}", ctx.source_repos_root, changed.path);
                            ctx.svn
                                .export(&source_url, entry.revision, &path_offset, true, false)
                                .await?;
                        }
                        ctx.svn.add(&path_offset, true).await?;
                    }
                    if ctx.keep_prop {
                        sync_props(ctx, &changed.path, entry.revision, &path_offset).await?;
                    }
                }
            }
            'D' => {
                if is_dir {
                    ctx.svn.update(&path_offset, false).await?;
                }
                ctx.svn.remove(&path_offset, true).await?;
            }
            'M' => {
                if is_dir {
                    ctx.svn.update(&path_offset, true).await?;
                } else {
                    let source_url = format!("{}{}", ctx.source_repos_root, changed.path);
                    ctx.svn
                        .export(&source_url, entry.revision, &path_offset, true, true)
                        .await?;
                }
                if ctx.keep_prop {
                    sync_props(ctx, &changed.path, entry.revision, &path_offset).await?;
                }
            }
            other => {
                return Err(ReplayError::Internal(format!(
                    "unhandled changed-path action {other:?} for {path_offset}"
                )));
            }
        }
    }

    for path_offset in &export_paths {
        let source_url = format!(
            "{}{}",
            ctx.source_repos_root,
            join_path(ctx.source_base, path_offset)
        );
        ctx.svn
            .export(&source_url, entry.revision, path_offset, true, false)
            .await?;
    }
    if !export_paths.is_empty() {
        warn!(count = export_paths.len(), "flushed deferred directory exports");
    }

    Ok(commit_paths)
}

/// Sibling changed-paths under `path` whose action is `A`/`R`/`D` (explicitly
/// excluding `M` — a modify after a copy-from still needs the planner to
/// re-derive correct ancestry for that child, it isn't skippable) become
/// `skip_paths` for the planner's directory recursion, since they'll each be
/// handled by their own top-level iteration of this loop.
fn sibling_skip_paths(
    path: &str,
    sorted_paths: &[crate::svn::parser::SvnChangedPath],
) -> BTreeSet<String> {
    sorted_paths
        .iter()
        .filter(|d| d.path != path && is_child_path(&d.path, path))
        .filter(|d| matches!(d.action, 'A' | 'R' | 'D'))
        .filter_map(|d| {
            d.path
                .strip_prefix(&format!("{}/", path.trim_end_matches('/')))
                .map(|s| s.to_string())
        })
        .collect()
}

async fn ensure_parents(
    ctx: &ProcessContext<'_>,
    path_offset: &str,
    is_dir: bool,
) -> Result<(), ReplayError> {
    let parent = if is_dir {
        Some(path_offset.to_string())
    } else {
        path_offset.rfind('/').map(|idx| path_offset[..idx].to_string())
    };
    if let Some(parent) = parent {
        if !parent.is_empty() && !path_exists(ctx.target_wc, &parent) {
            ctx.svn.mkdir(&parent).await?;
        }
    }
    Ok(())
}

async fn sync_props(
    ctx: &ProcessContext<'_>,
    source_path: &str,
    source_rev: i64,
    path_offset: &str,
) -> Result<(), ReplayError> {
    let source_url = format!("{}{}", ctx.source_repos_root, source_path);
    let mut source_props = ctx.svn.propget_all(&source_url, Some(source_rev)).await?;
    source_props.remove("svn:mergeinfo");
    let target_props = ctx
        .svn
        .propget_all(path_offset, None)
        .await
        .unwrap_or_default();
    for name in target_props.keys() {
        if name != "svn:mergeinfo" && !source_props.contains_key(name) {
            ctx.svn.propdel(name, path_offset).await?;
        }
    }
    for (name, value) in &source_props {
        ctx.svn.propset(name, value, path_offset).await?;
    }
    Ok(())
}

fn join_path(base: &str, child: &str) -> String {
    if child.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), child)
    }
}

fn path_exists(target_wc: &str, path_offset: &str) -> bool {
    let full = if path_offset.is_empty() {
        target_wc.to_string()
    } else {
        format!("{}/{}", target_wc.trim_end_matches('/'), path_offset)
    };
    std::path::Path::new(&full).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::changed;

    #[test]
    fn sibling_skip_paths_excludes_modify_actions() {
        let paths = vec![
            changed("/trunk/a", "dir", 'A', Some("/trunk/old"), Some(1)),
            changed("/trunk/a/kept.txt", "file", 'M', None, None),
            changed("/trunk/a/removed.txt", "file", 'D', None, None),
            changed("/trunk/a/added.txt", "file", 'A', None, None),
        ];
        let skip: BTreeSet<String> = sibling_skip_paths("/trunk/a", &paths);
        assert!(skip.contains("removed.txt"));
        assert!(skip.contains("added.txt"));
        assert!(!skip.contains("kept.txt"));
    }

    #[test]
    fn offset_of_handles_exact_base_match() {
        assert_eq!(offset_of("/trunk", "/trunk"), Some(String::new()));
        assert_eq!(
            offset_of("/trunk/a/b.txt", "/trunk"),
            Some("a/b.txt".to_string())
        );
        assert_eq!(offset_of("/branches/x", "/trunk"), None);
    }
}
