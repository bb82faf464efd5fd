//! SVN client adapter (C1).
//!
//! [`SvnOps`] is the typed operation set the rest of the engine consumes
//! (§4.1). [`ProcessSvnClient`] implements it by spawning the external `svn`
//! binary via `tokio::process::Command`, forcing `C` locale so XML and
//! status output have a stable grammar (§5 process-wide state). Every
//! argument that names a path or URL is passed through [`safe_path`] first.
//!
//! The trait boundary exists so C3-C6's planning and processing logic can be
//! unit-tested against a [`FakeSvnClient`] standing in for a repository's
//! history, without a live SVN server (§10.5) — a seam this replay engine
//! needs that a tool which only ever talks to one live working copy would
//! not.

use std::collections::BTreeMap;
use std::process::Stdio;

use async_trait::async_trait;
use tracing::{debug, instrument};

use crate::errors::SvnError;
use crate::safe_path::safe_path;

use super::parser::{self, StatusEntry, SvnChangedPath, SvnInfo, SvnLogEntry};

/// A revision bound as accepted by `log`/`info`/`get_rev` (§4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevArg {
    Number(i64),
    Head,
    Date(String),
}

impl std::fmt::Display for RevArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevArg::Number(n) => write!(f, "{n}"),
            RevArg::Head => write!(f, "HEAD"),
            RevArg::Date(d) => write!(f, "{d}"),
        }
    }
}

impl From<i64> for RevArg {
    fn from(n: i64) -> Self {
        RevArg::Number(n)
    }
}

/// The typed SVN operation set the replay engine depends on (§4.1).
#[async_trait]
pub trait SvnOps: Send + Sync {
    async fn info(&self, url_or_wc: &str, rev: Option<RevArg>) -> Result<SvnInfo, SvnError>;
    async fn get_rev(&self, url: &str, rev_spec: RevArg) -> Result<i64, SvnError>;
    async fn list(
        &self,
        url_or_wc: &str,
        rev: Option<i64>,
        recursive: bool,
    ) -> Result<Vec<(String, String)>, SvnError>;
    #[allow(clippy::too_many_arguments)]
    async fn log(
        &self,
        url: &str,
        rev_a: RevArg,
        rev_b: RevArg,
        limit: Option<u32>,
        stop_on_copy: bool,
        get_paths: bool,
        get_revprops: bool,
    ) -> Result<Vec<SvnLogEntry>, SvnError>;
    async fn cat(&self, url: &str, rev: i64) -> Result<Vec<u8>, SvnError>;
    async fn export(
        &self,
        url: &str,
        rev: i64,
        dest: &str,
        force: bool,
        non_recursive: bool,
    ) -> Result<(), SvnError>;
    async fn checkout(&self, url: &str, dest: &str) -> Result<(), SvnError>;
    async fn update(&self, path: &str, non_recursive: bool) -> Result<(), SvnError>;
    async fn add(&self, path: &str, parents: bool) -> Result<(), SvnError>;
    async fn copy(&self, src_url: &str, src_rev: i64, dest: &str) -> Result<(), SvnError>;
    async fn remove(&self, path: &str, force: bool) -> Result<(), SvnError>;
    async fn mkdir(&self, path: &str) -> Result<(), SvnError>;
    async fn revert(&self, path: &str, recursive: bool) -> Result<(), SvnError>;
    async fn status(&self, path: &str, no_recursive: bool) -> Result<Vec<StatusEntry>, SvnError>;
    async fn cleanup(&self, path: Option<&str>) -> Result<(), SvnError>;
    async fn commit(
        &self,
        paths: &[String],
        message: &str,
        revprops: &BTreeMap<String, String>,
    ) -> Result<i64, SvnError>;
    async fn propget_all(
        &self,
        path_or_url: &str,
        rev: Option<i64>,
    ) -> Result<BTreeMap<String, String>, SvnError>;
    async fn propset(&self, prop: &str, value: &str, path: &str) -> Result<(), SvnError>;
    async fn propdel(&self, prop: &str, path: &str) -> Result<(), SvnError>;
    async fn propset_revprop(
        &self,
        url_or_wc: &str,
        rev: i64,
        prop: &str,
        value: &str,
    ) -> Result<(), SvnError>;
}

/// Resolve the `kind` of a changed-path entry when the server didn't report
/// one (pre-1.6 legacy server), per §4.1 and the resolved Open Question in
/// SPEC_FULL.md §9: ambiguity is a hard error, never a guess.
pub async fn get_kind(
    svn: &dyn SvnOps,
    repos_root: &str,
    path: &str,
    rev: i64,
    action: char,
    changed_paths_in_rev: &[SvnChangedPath],
) -> Result<String, SvnError> {
    if action != 'D' {
        let url = format!("{repos_root}{path}");
        let info = svn.info(&url, Some(RevArg::Number(rev))).await?;
        return Ok(info.kind);
    }

    let candidates: Vec<&SvnChangedPath> = changed_paths_in_rev
        .iter()
        .filter(|d| {
            d.copyfrom_path.is_some()
                && d.kind == "dir"
                && path != d.path
                && path.starts_with(&format!("{}/", d.path))
        })
        .collect();

    match candidates.len() {
        0 => {
            let url = format!("{repos_root}{path}");
            let info = svn.info(&url, Some(RevArg::Number(rev - 1))).await?;
            Ok(info.kind)
        }
        1 => {
            let d = candidates[0];
            let copyfrom_path = d.copyfrom_path.as_ref().unwrap();
            let copyfrom_rev = d.copyfrom_rev.unwrap_or(rev - 1);
            let suffix = &path[d.path.len()..];
            let resolved_path = format!("{copyfrom_path}{suffix}");
            let url = format!("{repos_root}{resolved_path}");
            let info = svn.info(&url, Some(RevArg::Number(copyfrom_rev))).await?;
            Ok(info.kind)
        }
        n => Err(SvnError::AmbiguousKind {
            path: path.to_string(),
            revision: rev,
            candidates: n,
        }),
    }
}

/// Implements [`SvnOps`] by spawning the external `svn` binary.
pub struct ProcessSvnClient {
    username: Option<String>,
    password: Option<String>,
}

impl ProcessSvnClient {
    pub fn new(username: Option<String>, password: Option<String>) -> Self {
        Self { username, password }
    }

    fn auth_args(&self) -> Vec<String> {
        let mut args = vec![
            "--non-interactive".to_string(),
            "--no-auth-cache".to_string(),
        ];
        if let Some(u) = &self.username {
            args.push("--username".to_string());
            args.push(u.clone());
        }
        if let Some(p) = &self.password {
            args.push("--password".to_string());
            args.push(p.clone());
        }
        args
    }

    #[instrument(skip(self, args, cwd), fields(argc = args.len()))]
    async fn exec(&self, mut args: Vec<String>, cwd: Option<&str>) -> Result<String, SvnError> {
        let display_args = args.join(" ");
        args.extend(self.auth_args());

        let mut command = tokio::process::Command::new("svn");
        command
            .args(&args)
            .env("LC_ALL", "C")
            .env_remove("LANG")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        debug!(command = %format!("svn {display_args}"), "invoking svn");

        let output = command.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SvnError::BinaryNotFound
            } else {
                SvnError::Io(e)
            }
        })?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

        if !output.status.success() {
            return Err(SvnError::CommandFailed {
                command: format!("svn {display_args}"),
                exit_code: output.status.code().unwrap_or(-1),
                stdout,
                stderr,
            });
        }
        Ok(stdout)
    }
}

#[async_trait]
impl SvnOps for ProcessSvnClient {
    async fn info(&self, url_or_wc: &str, rev: Option<RevArg>) -> Result<SvnInfo, SvnError> {
        let mut args = vec!["info".to_string(), "--xml".to_string()];
        if let Some(r) = rev {
            args.push("--revision".to_string());
            args.push(r.to_string());
        }
        args.push(safe_path(url_or_wc));
        let xml = self.exec(args, None).await?;
        parser::parse_svn_info(&xml)
    }

    async fn get_rev(&self, url: &str, rev_spec: RevArg) -> Result<i64, SvnError> {
        let info = self.info(url, Some(rev_spec)).await?;
        Ok(info.revision)
    }

    async fn list(
        &self,
        url_or_wc: &str,
        rev: Option<i64>,
        recursive: bool,
    ) -> Result<Vec<(String, String)>, SvnError> {
        let mut args = vec!["list".to_string(), "--xml".to_string()];
        if let Some(r) = rev {
            args.push("--revision".to_string());
            args.push(r.to_string());
        }
        if recursive {
            args.push("--recursive".to_string());
        }
        args.push(safe_path(url_or_wc));
        let xml = self.exec(args, None).await?;
        parser::parse_svn_list(&xml)
    }

    async fn log(
        &self,
        url: &str,
        rev_a: RevArg,
        rev_b: RevArg,
        limit: Option<u32>,
        stop_on_copy: bool,
        get_paths: bool,
        get_revprops: bool,
    ) -> Result<Vec<SvnLogEntry>, SvnError> {
        let mut args = vec![
            "log".to_string(),
            "--xml".to_string(),
            "--revision".to_string(),
            format!("{rev_a}:{rev_b}"),
        ];
        if let Some(l) = limit {
            args.push("--limit".to_string());
            args.push(l.to_string());
        }
        if stop_on_copy {
            args.push("--stop-on-copy".to_string());
        }
        if get_paths {
            args.push("--verbose".to_string());
        }
        if get_revprops {
            args.push("--with-all-revprops".to_string());
        }
        args.push(safe_path(url));
        let xml = self.exec(args, None).await?;
        let mut entries = parser::parse_svn_log(&xml)?;
        for e in &mut entries {
            e.url = url.to_string();
        }
        if entries.is_empty() {
            debug!(url, "log returned no entries");
        }
        Ok(entries)
    }

    async fn cat(&self, url: &str, rev: i64) -> Result<Vec<u8>, SvnError> {
        let args = vec![
            "cat".to_string(),
            "--revision".to_string(),
            rev.to_string(),
            safe_path(url),
        ];
        self.exec(args, None).await.map(|s| s.into_bytes())
    }

    async fn export(
        &self,
        url: &str,
        rev: i64,
        dest: &str,
        force: bool,
        non_recursive: bool,
    ) -> Result<(), SvnError> {
        let mut args = vec![
            "export".to_string(),
            "--revision".to_string(),
            rev.to_string(),
        ];
        if force {
            args.push("--force".to_string());
        }
        if non_recursive {
            args.push("--depth".to_string());
            args.push("files".to_string());
        }
        args.push(safe_path(url));
        args.push(safe_path(dest));
        self.exec(args, None).await.map(|_| ())
    }

    async fn checkout(&self, url: &str, dest: &str) -> Result<(), SvnError> {
        let args = vec!["checkout".to_string(), safe_path(url), safe_path(dest)];
        self.exec(args, None).await.map(|_| ())
    }

    async fn update(&self, path: &str, non_recursive: bool) -> Result<(), SvnError> {
        let mut args = vec!["update".to_string()];
        if non_recursive {
            args.push("--depth".to_string());
            args.push("immediates".to_string());
        }
        args.push(safe_path(path));
        self.exec(args, None).await.map(|_| ())
    }

    async fn add(&self, path: &str, parents: bool) -> Result<(), SvnError> {
        let mut args = vec!["add".to_string()];
        if parents {
            args.push("--parents".to_string());
        }
        args.push(safe_path(path));
        self.exec(args, None).await.map(|_| ())
    }

    async fn copy(&self, src_url: &str, src_rev: i64, dest: &str) -> Result<(), SvnError> {
        let args = vec![
            "copy".to_string(),
            "--revision".to_string(),
            src_rev.to_string(),
            safe_path(src_url),
            safe_path(dest),
        ];
        self.exec(args, None).await.map(|_| ())
    }

    async fn remove(&self, path: &str, force: bool) -> Result<(), SvnError> {
        let mut args = vec!["remove".to_string()];
        if force {
            args.push("--force".to_string());
        }
        args.push(safe_path(path));
        self.exec(args, None).await.map(|_| ())
    }

    async fn mkdir(&self, path: &str) -> Result<(), SvnError> {
        let args = vec!["mkdir".to_string(), "--parents".to_string(), safe_path(path)];
        self.exec(args, None).await.map(|_| ())
    }

    async fn revert(&self, path: &str, recursive: bool) -> Result<(), SvnError> {
        let mut args = vec!["revert".to_string()];
        if recursive {
            args.push("--recursive".to_string());
        }
        args.push(safe_path(path));
        self.exec(args, None).await.map(|_| ())
    }

    async fn status(&self, path: &str, no_recursive: bool) -> Result<Vec<StatusEntry>, SvnError> {
        let mut args = vec![
            "status".to_string(),
            "--xml".to_string(),
            "--ignore-externals".to_string(),
            "-v".to_string(),
        ];
        if no_recursive {
            args.push("--depth".to_string());
            args.push("immediates".to_string());
        }
        args.push(safe_path(path));
        let out = self.exec(args, None).await?;
        parser::parse_svn_status(&out)
    }

    async fn cleanup(&self, path: Option<&str>) -> Result<(), SvnError> {
        let mut args = vec!["cleanup".to_string()];
        if let Some(p) = path {
            args.push(safe_path(p));
        }
        self.exec(args, None).await.map(|_| ())
    }

    async fn commit(
        &self,
        paths: &[String],
        message: &str,
        revprops: &BTreeMap<String, String>,
    ) -> Result<i64, SvnError> {
        let mut args = vec![
            "commit".to_string(),
            "--force-log".to_string(),
            "--message".to_string(),
            message.to_string(),
        ];
        for (k, v) in revprops {
            args.push("--with-revprop".to_string());
            args.push(format!("{k}={v}"));
        }
        crate::safe_path::terminate_options_if_needed(&mut args, paths);
        for p in paths {
            args.push(safe_path(p));
        }
        let stdout = self.exec(args, None).await?;
        parse_committed_revision(&stdout).ok_or_else(|| {
            SvnError::CommandFailed {
                command: "svn commit".to_string(),
                exit_code: 0,
                stdout,
                stderr: "could not parse committed revision".to_string(),
            }
        })
    }

    async fn propget_all(
        &self,
        path_or_url: &str,
        rev: Option<i64>,
    ) -> Result<BTreeMap<String, String>, SvnError> {
        let mut args = vec!["proplist".to_string(), "--xml".to_string(), "--verbose".to_string()];
        if let Some(r) = rev {
            args.push("--revision".to_string());
            args.push(r.to_string());
        }
        args.push(safe_path(path_or_url));
        let xml = self.exec(args, None).await?;
        parser::parse_svn_proplist(&xml)
    }

    async fn propset(&self, prop: &str, value: &str, path: &str) -> Result<(), SvnError> {
        let args = vec![
            "propset".to_string(),
            prop.to_string(),
            value.to_string(),
            safe_path(path),
        ];
        self.exec(args, None).await.map(|_| ())
    }

    async fn propdel(&self, prop: &str, path: &str) -> Result<(), SvnError> {
        let args = vec!["propdel".to_string(), prop.to_string(), safe_path(path)];
        self.exec(args, None).await.map(|_| ())
    }

    async fn propset_revprop(
        &self,
        url_or_wc: &str,
        rev: i64,
        prop: &str,
        value: &str,
    ) -> Result<(), SvnError> {
        let args = vec![
            "propset".to_string(),
            "--revprop".to_string(),
            "--revision".to_string(),
            rev.to_string(),
            prop.to_string(),
            value.to_string(),
            safe_path(url_or_wc),
        ];
        self.exec(args, None).await.map(|_| ())
    }
}

fn parse_committed_revision(stdout: &str) -> Option<i64> {
    for line in stdout.lines().rev() {
        let line = line.trim();
        if let Some(rest) = line
            .strip_prefix("Committed revision ")
            .and_then(|s| s.strip_suffix('.'))
        {
            if let Ok(rev) = rest.parse::<i64>() {
                return Some(rev);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_committed_revision_line() {
        let stdout = "Adding         a.txt\nCommitted revision 42.\n";
        assert_eq!(parse_committed_revision(stdout), Some(42));
    }

    #[test]
    fn returns_none_when_no_such_line() {
        assert_eq!(parse_committed_revision("nothing changed\n"), None);
    }

    #[test]
    fn rev_arg_display() {
        assert_eq!(RevArg::Number(7).to_string(), "7");
        assert_eq!(RevArg::Head.to_string(), "HEAD");
        assert_eq!(RevArg::Date("{2024-01-01}".into()).to_string(), "{2024-01-01}");
    }
}
