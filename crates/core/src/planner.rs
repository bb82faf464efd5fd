//! Add/copy planner (C5, §4.5).
//!
//! For a single `A` (added) changed-path, decides whether the target should
//! `copy` (an ancestor was found and its source revision maps to a replayed
//! target revision) or fall back to `export+add` with no ancestry, then
//! recurses into directory children to reproduce their own ancestry.

use std::collections::BTreeSet;

use tracing::{debug, instrument};

use crate::ancestry::{find_ancestors, in_ancestors, AncestorStep};
use crate::errors::ReplayError;
use crate::rev_map::RevMap;
use crate::svn::client::SvnOps;

/// A directory `path_offset` whose final content export has been deferred
/// until after any child copies/adds have been planned, so that contents
/// end up matching the source exactly rather than being clobbered by a
/// subsequent child operation.
pub type ExportPaths = Vec<String>;

/// Append `path` to `paths` unless an existing entry is already its parent
/// (or itself) — mirrors the donor's `path_in_list`/`add_path` dedup helper.
pub fn add_export_path(paths: &mut ExportPaths, path: &str) {
    let already_covered = paths
        .iter()
        .any(|p| path == p || path.starts_with(&format!("{p}/")));
    if !already_covered {
        paths.push(path.to_string());
    }
}

/// Inputs to [`plan_add`], grouped since the recursive call threads most of
/// them through unchanged.
pub struct PlanAddContext<'a> {
    pub svn: &'a dyn SvnOps,
    pub source_repos_root: &'a str,
    pub source_base: &'a str,
    pub target_repos_root: &'a str,
    pub target_base: &'a str,
    pub target_wc: &'a str,
    pub source_ancestors: &'a [AncestorStep],
    pub rev_map: &'a RevMap,
    pub keep_prop: bool,
}

/// Plan (and immediately execute against `ctx.svn`) the reproduction of one
/// `A` changed-path, recursing into directory children (§4.5).
#[instrument(skip(ctx, export_paths, skip_paths), fields(path_offset = %path_offset, source_rev))]
#[allow(clippy::too_many_arguments)]
pub async fn plan_add(
    ctx: &PlanAddContext<'_>,
    path_offset: &str,
    source_rev: i64,
    parent_copyfrom: Option<(&str, i64)>,
    is_dir: bool,
    skip_paths: &BTreeSet<String>,
    export_paths: &mut ExportPaths,
) -> Result<(), ReplayError> {
    let source_full_path = join_path(ctx.source_base, path_offset);

    let ancestors = find_ancestors(
        ctx.svn,
        ctx.source_repos_root,
        &source_full_path,
        source_rev,
        Some(ctx.source_base),
    )
    .await?;
    let mut ancestor = ancestors.last().cloned();
    if let Some(a) = &ancestor {
        if !in_ancestors(ctx.source_ancestors, a) {
            ancestor = None;
        }
    }

    let tgt_rev = ancestor
        .as_ref()
        .and_then(|a| ctx.rev_map.get(a.copyfrom_rev));

    let (copyfrom_path, copyfrom_rev) = match (&ancestor, tgt_rev) {
        (Some(a), Some(tgt_rev)) => {
            debug!(copyfrom = %a.copyfrom_path, copyfrom_rev = a.copyfrom_rev, tgt_rev, "ancestor resolved");
            let target_path = join_path(
                ctx.target_base,
                a.copyfrom_path
                    .strip_prefix(ctx.source_base)
                    .unwrap_or(&a.copyfrom_path)
                    .trim_start_matches('/'),
            );
            let already_matches_parent = parent_copyfrom
                .map(|(p_path, p_rev)| {
                    is_child_path(&a.copyfrom_path, p_path) && a.copyfrom_rev == p_rev
                })
                .unwrap_or(false);

            let local_path = path_in_target_wc(ctx.target_wc, path_offset);
            let path_in_svn = path_exists(&local_path);
            let needs_copy = !(path_in_svn && already_matches_parent)
                && needs_replace_or_copy(ctx, path_offset, tgt_rev).await?;

            if needs_copy {
                if path_in_svn {
                    ctx.svn.update(path_offset, false).await?;
                    ctx.svn.remove(path_offset, true).await?;
                }
                let src_url = format!("{}{}", ctx.target_repos_root, target_path);
                ctx.svn.copy(&src_url, tgt_rev, path_offset).await?;
                if is_dir {
                    add_export_path(export_paths, path_offset);
                } else {
                    let source_url = format!("{}{}", ctx.source_repos_root, source_full_path);
                    ctx.svn
                        .export(&source_url, source_rev, path_offset, true, false)
                        .await?;
                }
                if ctx.keep_prop {
                    sync_props(ctx, &source_full_path, source_rev, path_offset).await?;
                }
            }
            (Some(a.copyfrom_path.clone()), Some(a.copyfrom_rev))
        }
        _ => {
            ensure_parent_dir(ctx, path_offset, is_dir).await?;
            if !path_exists(&path_in_target_wc(ctx.target_wc, path_offset)) {
                if is_dir {
                    add_export_path(export_paths, path_offset);
                } else {
                    let source_url = format!("{}{}", ctx.source_repos_root, source_full_path);
                    ctx.svn
                        .export(&source_url, source_rev, path_offset, true, false)
                        .await?;
                }
                ctx.svn.add(path_offset, true).await?;
            }
            if ctx.keep_prop {
                sync_props(ctx, &source_full_path, source_rev, path_offset).await?;
            }
            (None, None)
        }
    };

    if is_dir {
        recurse_into_dir(
            ctx,
            path_offset,
            source_rev,
            copyfrom_path.as_deref(),
            copyfrom_rev,
            skip_paths,
            export_paths,
        )
        .await?;
    }

    Ok(())
}

async fn needs_replace_or_copy(
    ctx: &PlanAddContext<'_>,
    path_offset: &str,
    tgt_rev: i64,
) -> Result<bool, ReplayError> {
    let status = ctx.svn.status(path_offset, true).await.unwrap_or_default();
    if status.is_empty() {
        return Ok(true);
    }
    let info = ctx.svn.info(path_offset, None).await;
    match info {
        Ok(info) => Ok(info.last_changed_rev != tgt_rev),
        Err(_) => Ok(true),
    }
}

#[allow(clippy::too_many_arguments)]
async fn recurse_into_dir(
    ctx: &PlanAddContext<'_>,
    path_offset: &str,
    source_rev: i64,
    parent_copyfrom_path: Option<&str>,
    parent_copyfrom_rev: Option<i64>,
    skip_paths: &BTreeSet<String>,
    export_paths: &mut ExportPaths,
) -> Result<(), ReplayError> {
    let source_dir_url = format!(
        "{}{}",
        ctx.source_repos_root,
        join_path(ctx.source_base, path_offset)
    );
    let remote_children = ctx.svn.list(&source_dir_url, Some(source_rev), false).await?;
    let local_children = ctx
        .svn
        .list(&path_in_target_wc(ctx.target_wc, path_offset), None, false)
        .await
        .unwrap_or_default();

    for (name, kind) in &remote_children {
        let child_offset = join_path(path_offset, name).trim_start_matches('/').to_string();
        if skip_paths.contains(&child_offset) {
            continue;
        }
        let parent_copyfrom = match (parent_copyfrom_path, parent_copyfrom_rev) {
            (Some(p), Some(r)) => Some((p, r)),
            _ => None,
        };
        Box::pin(plan_add(
            ctx,
            &child_offset,
            source_rev,
            parent_copyfrom,
            kind == "dir",
            skip_paths,
            export_paths,
        ))
        .await?;
    }

    for (name, _kind) in &local_children {
        let still_present = remote_children.iter().any(|(r_name, _)| r_name == name);
        if !still_present {
            let child_offset = join_path(path_offset, name).trim_start_matches('/').to_string();
            ctx.svn.update(&child_offset, false).await?;
            ctx.svn.remove(&child_offset, true).await?;
        }
    }

    Ok(())
}

async fn ensure_parent_dir(
    ctx: &PlanAddContext<'_>,
    path_offset: &str,
    is_dir: bool,
) -> Result<(), ReplayError> {
    let parent = if is_dir {
        Some(path_offset.to_string())
    } else {
        parent_of(path_offset)
    };
    if let Some(parent) = parent {
        if !parent.is_empty() && !path_exists(&path_in_target_wc(ctx.target_wc, &parent)) {
            ctx.svn.mkdir(&parent).await?;
        }
    }
    Ok(())
}

async fn sync_props(
    ctx: &PlanAddContext<'_>,
    source_full_path: &str,
    source_rev: i64,
    path_offset: &str,
) -> Result<(), ReplayError> {
    let source_url = format!("{}{}", ctx.source_repos_root, source_full_path);
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

fn parent_of(path_offset: &str) -> Option<String> {
    match path_offset.rfind('/') {
        Some(idx) => Some(path_offset[..idx].to_string()),
        None => None,
    }
}

fn join_path(base: &str, child: &str) -> String {
    if child.is_empty() {
        base.to_string()
    } else {
        format!("{}/{}", base.trim_end_matches('/'), child)
    }
}

fn is_child_path(path: &str, parent: &str) -> bool {
    path == parent || path.starts_with(&format!("{parent}/"))
}

fn path_in_target_wc(target_wc: &str, path_offset: &str) -> String {
    if path_offset.is_empty() {
        target_wc.to_string()
    } else {
        format!("{}/{}", target_wc.trim_end_matches('/'), path_offset)
    }
}

fn path_exists(path: &str) -> bool {
    std::path::Path::new(path).exists()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_export_path_dedups_against_existing_parent() {
        let mut paths = ExportPaths::new();
        add_export_path(&mut paths, "a/b");
        add_export_path(&mut paths, "a/b/c");
        assert_eq!(paths, vec!["a/b".to_string()]);
    }

    #[test]
    fn add_export_path_keeps_unrelated_siblings() {
        let mut paths = ExportPaths::new();
        add_export_path(&mut paths, "a/b");
        add_export_path(&mut paths, "a/c");
        assert_eq!(paths, vec!["a/b".to_string(), "a/c".to_string()]);
    }

    #[test]
    fn join_path_handles_empty_child() {
        assert_eq!(join_path("/trunk", ""), "/trunk");
        assert_eq!(join_path("/trunk", "a.txt"), "/trunk/a.txt");
    }
}
