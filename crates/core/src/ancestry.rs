//! Ancestry tracer (C3, §4.3).
//!
//! Walks an SVN path's history backward from `(start_path, start_rev)`,
//! following copy-from relationships, to discover whether and where it
//! originated from a path inside a given replay scope. Modeled as a state
//! machine over a tagged change action (§9 Design Notes): `Add`/`Replace`
//! with copy-from extend the chain, `Delete` and non-copy `Add`/`Replace`
//! terminate it, `Modify` advances the query revision without extending it.

use crate::errors::AncestryError;
use crate::svn::client::{RevArg, SvnOps};
use crate::svn::parser::SvnChangedPath;

/// One hop in an ancestor chain (§3): at `revision`, `path` was
/// created/replaced with copy-from `copyfrom_path@copyfrom_rev`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AncestorStep {
    pub path: String,
    pub revision: i64,
    pub copyfrom_path: String,
    pub copyfrom_rev: i64,
}

fn is_child_path(path: &str, parent: &str) -> bool {
    path == parent || path.starts_with(&format!("{parent}/"))
}

/// Substitute the `from` prefix of `path` with `to`, used to translate a
/// path into its copy-from source when the copy happened at an ancestor
/// directory rather than at `path` itself.
fn substitute_prefix(path: &str, from: &str, to: &str) -> String {
    if path == from {
        to.to_string()
    } else {
        format!("{to}{}", &path[from.len()..])
    }
}

/// Walk `start_path@start_rev` backward through the source repository's
/// history (§4.3).
///
/// If `stop_base` is `Some`, the walk terminates as soon as `cur_path`
/// becomes a descendant of it (after at least one hop), and the returned
/// chain is empty unless the walk actually reached that scope; the walk
/// ending on a delete or non-copy add/replace with `stop_base` set yields
/// an empty chain, since no ancestry connects the start path to that scope.
/// If `stop_base` is `None`, whatever chain was found (possibly empty) is
/// returned as-is.
pub async fn find_ancestors(
    svn: &dyn SvnOps,
    repo_root: &str,
    start_path: &str,
    start_rev: i64,
    stop_base: Option<&str>,
) -> Result<Vec<AncestorStep>, AncestryError> {
    let mut ancestors = Vec::new();
    let mut cur_path = start_path.to_string();
    let mut cur_rev = start_rev;
    let mut no_ancestry = false;
    let mut iterations = 0u32;

    loop {
        let url = format!("{repo_root}{cur_path}");
        let entries = svn
            .log(
                &url,
                RevArg::Number(cur_rev),
                RevArg::Number(1),
                Some(1),
                true,
                true,
                false,
            )
            .await
            .map_err(AncestryError::Svn)?;
        let entry = match entries.into_iter().next() {
            Some(e) => e,
            None => break,
        };

        if let Some(base) = stop_base {
            if iterations > 0 && is_child_path(&cur_path, base) {
                break;
            }
        }
        iterations += 1;

        let mut candidates: Vec<&SvnChangedPath> = entry
            .changed_paths
            .iter()
            .filter(|d| is_child_path(&cur_path, &d.path))
            .collect();
        if candidates.is_empty() {
            break;
        }
        // Deepest (most-granular) match wins; this is a string sort, which
        // orders a path before any shorter prefix of itself.
        candidates.sort_by(|a, b| b.path.cmp(&a.path));
        let selected = candidates[0];

        match selected.action {
            'D' => {
                if stop_base.is_some() {
                    no_ancestry = true;
                }
                break;
            }
            'A' | 'R' => {
                match (&selected.copyfrom_path, selected.copyfrom_rev) {
                    (Some(copyfrom_path), Some(copyfrom_rev)) => {
                        let substituted =
                            substitute_prefix(&cur_path, &selected.path, copyfrom_path);
                        ancestors.push(AncestorStep {
                            path: cur_path.clone(),
                            revision: entry.revision,
                            copyfrom_path: substituted.clone(),
                            copyfrom_rev,
                        });
                        cur_path = substituted;
                        cur_rev = copyfrom_rev;
                    }
                    _ => {
                        if stop_base.is_some() {
                            no_ancestry = true;
                        }
                        break;
                    }
                }
            }
            'M' => {
                cur_rev = entry.revision - 1;
            }
            other => {
                return Err(AncestryError::Svn(crate::errors::SvnError::UnsupportedAction(
                    format!("{other}"),
                )));
            }
        }
    }

    if stop_base.is_some() && no_ancestry {
        return Ok(Vec::new());
    }
    Ok(ancestors)
}

/// `in_ancestors` (§4.5, §9): is `candidate` a plausible ancestor step of
/// the replay's own ancestor chain `source_ancestors` (oldest-last, index 0
/// is the newest hop)?
///
/// Scans from the last index down to (but not including) index 0, stopping
/// at the first entry whose `revision` exceeds `candidate.revision` — chain
/// entries get older as the index decreases, so that is the first entry
/// that could no longer be an ancestor of `candidate`. The match test at
/// that point is `is_child_path(candidate.path, entry.path)`. If the scan
/// completes without finding such an entry, `candidate` is considered "in"
/// the chain by default.
pub fn in_ancestors(source_ancestors: &[AncestorStep], candidate: &AncestorStep) -> bool {
    if source_ancestors.len() <= 1 {
        return true;
    }
    for idx in (1..source_ancestors.len()).rev() {
        let entry = &source_ancestors[idx];
        if entry.revision > candidate.revision {
            return is_child_path(&candidate.path, &entry.path);
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{changed, log_entry, FakeSvnClient};

    #[tokio::test]
    async fn simple_rename_chain_stops_at_plain_add() {
        let repo_root = "file:///repo";
        let fake = FakeSvnClient::new(repo_root, "uuid-1")
            .with_entry(log_entry(
                2,
                "/trunk/b",
                vec![
                    changed("/trunk/a", "file", 'D', None, None),
                    changed("/trunk/b", "file", 'A', Some("/trunk/a"), Some(1)),
                ],
            ))
            .with_entry(log_entry(
                1,
                "/trunk/a",
                vec![changed("/trunk/a", "file", 'A', None, None)],
            ));

        let chain = find_ancestors(&fake, repo_root, "/trunk/b", 2, None)
            .await
            .unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].path, "/trunk/b");
        assert_eq!(chain[0].copyfrom_path, "/trunk/a");
        assert_eq!(chain[0].copyfrom_rev, 1);
    }

    #[tokio::test]
    async fn stop_base_reached_returns_chain() {
        let repo_root = "file:///repo";
        let fake = FakeSvnClient::new(repo_root, "uuid-1").with_entry(log_entry(
            10,
            "/branches/f/y.c",
            vec![changed(
                "/branches/f/y.c",
                "file",
                'A',
                Some("/trunk/x.c"),
                Some(2),
            )],
        ));

        let chain = find_ancestors(
            &fake,
            repo_root,
            "/branches/f/y.c",
            10,
            Some("/trunk"),
        )
        .await
        .unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].copyfrom_path, "/trunk/x.c");
    }

    #[tokio::test]
    async fn delete_with_stop_base_yields_empty_chain() {
        let repo_root = "file:///repo";
        let fake = FakeSvnClient::new(repo_root, "uuid-1").with_entry(log_entry(
            5,
            "/trunk/gone",
            vec![changed("/trunk/gone", "file", 'D', None, None)],
        ));

        let chain = find_ancestors(&fake, repo_root, "/trunk/gone", 5, Some("/trunk"))
            .await
            .unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn in_ancestors_defaults_true_when_scan_completes() {
        let ancestors = vec![
            AncestorStep {
                path: "/trunk/y.c".into(),
                revision: 12,
                copyfrom_path: "/branches/f/y.c".into(),
                copyfrom_rev: 11,
            },
            AncestorStep {
                path: "/branches/f/y.c".into(),
                revision: 11,
                copyfrom_path: "/trunk/x.c".into(),
                copyfrom_rev: 2,
            },
            AncestorStep {
                path: "/trunk/x.c".into(),
                revision: 5,
                copyfrom_path: "/trunk/x.c".into(),
                copyfrom_rev: 1,
            },
        ];
        // Every examined entry's revision (indices 1..len-1) is <= the
        // candidate's, so the scan never triggers and the default applies.
        let candidate = AncestorStep {
            path: "/unrelated/path.c".into(),
            revision: 15,
            copyfrom_path: "/unrelated/path.c".into(),
            copyfrom_rev: 14,
        };
        assert!(in_ancestors(&ancestors, &candidate));
    }

    #[test]
    fn in_ancestors_rejects_candidate_outside_chain_prefix() {
        let ancestors = vec![
            AncestorStep {
                path: "/trunk/y.c".into(),
                revision: 12,
                copyfrom_path: "/branches/f/y.c".into(),
                copyfrom_rev: 11,
            },
            AncestorStep {
                path: "/branches/f/y.c".into(),
                revision: 11,
                copyfrom_path: "/trunk/x.c".into(),
                copyfrom_rev: 2,
            },
            AncestorStep {
                path: "/trunk/x.c".into(),
                revision: 2,
                copyfrom_path: "/trunk/x.c".into(),
                copyfrom_rev: 1,
            },
        ];
        // revision 5 is older than ancestors[1] (rev 11), so the scan stops
        // there; candidate's path is unrelated to that entry's path.
        let candidate = AncestorStep {
            path: "/other/z.c".into(),
            revision: 5,
            copyfrom_path: "/other/z.c".into(),
            copyfrom_rev: 4,
        };
        assert!(!in_ancestors(&ancestors, &candidate));
    }
}
