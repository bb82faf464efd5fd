//! Run configuration for the replay engine (C9).
//!
//! A [`ReplayConfig`] is assembled once at process start, primarily from CLI
//! flags, and passed by reference to every component — there is no mutable
//! global state (§9 Design Notes). A [`ReplayDefaults`] file may supply
//! defaults for fields an operator wants to pin across invocations; any
//! field present on the CLI always overrides the file. Secrets follow the
//! established `_env`-suffixed pattern: a field named `*_env` names an
//! environment variable whose value is resolved once, at load time, into a
//! `#[serde(skip)]` field so the secret itself never appears in the TOML
//! file.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

/// A revision bound as the user may spell it on the command line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevisionSpec {
    Number(i64),
    Head,
    /// An SVN date specification, e.g. `{2024-01-01}`, resolved via
    /// `svn info --revision {DATE}`.
    Date(String),
}

impl std::fmt::Display for RevisionSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RevisionSpec::Number(n) => write!(f, "{n}"),
            RevisionSpec::Head => write!(f, "HEAD"),
            RevisionSpec::Date(d) => write!(f, "{d}"),
        }
    }
}

/// `r_start[:r_end]`, parsed from the `--revision` flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevisionRange {
    pub start: RevisionSpec,
    pub end: RevisionSpec,
}

impl Default for RevisionRange {
    fn default() -> Self {
        RevisionRange {
            start: RevisionSpec::Number(1),
            end: RevisionSpec::Head,
        }
    }
}

impl RevisionRange {
    /// Parse `"N"`, `"N:M"`, `"N:HEAD"`, or `"{DATE}[:{DATE}]"` forms.
    ///
    /// The split on `:` must ignore colons inside a brace-enclosed date
    /// spec (e.g. `{2024-01-01T12:00:00}:HEAD`), which is why this doesn't
    /// just call `str::split_once`.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let (start_raw, end_raw) = match split_top_level_colon(text) {
            Some((a, b)) => (a, b),
            None => (text, "HEAD"),
        };
        let start = parse_revision_spec(start_raw)
            .ok_or_else(|| invalid_range(text, format!("bad start revision {start_raw:?}")))?;
        let end = parse_revision_spec(end_raw)
            .ok_or_else(|| invalid_range(text, format!("bad end revision {end_raw:?}")))?;
        Ok(RevisionRange { start, end })
    }
}

/// Split `text` at the first `:` that is not inside a `{...}` date spec.
fn split_top_level_colon(text: &str) -> Option<(&str, &str)> {
    let mut depth = 0i32;
    for (idx, ch) in text.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => depth -= 1,
            ':' if depth <= 0 => return Some((&text[..idx], &text[idx + 1..])),
            _ => {}
        }
    }
    None
}

fn invalid_range(text: &str, detail: String) -> ConfigError {
    ConfigError::InvalidRevisionRange(text.to_string(), detail)
}

/// Matches SVN's `{DATE}` revision-spec grammar closely enough to reject
/// stray braces while accepting the forms `svn` itself documents: a bare
/// date, an ISO datetime, or either with a trailing `Z`/offset.
fn date_spec_pattern() -> &'static regex_lite::Regex {
    static PATTERN: std::sync::OnceLock<regex_lite::Regex> = std::sync::OnceLock::new();
    PATTERN.get_or_init(|| {
        regex_lite::Regex::new(
            r"^\{\d{4}-\d{2}-\d{2}([T ]\d{2}:\d{2}(:\d{2})?(\.\d+)?(Z|[+-]\d{2}:?\d{2})?)?\}$",
        )
        .expect("static date-spec pattern is valid")
    })
}

fn parse_revision_spec(raw: &str) -> Option<RevisionSpec> {
    let raw = raw.trim();
    if raw.eq_ignore_ascii_case("head") {
        return Some(RevisionSpec::Head);
    }
    if date_spec_pattern().is_match(raw) {
        return Some(RevisionSpec::Date(raw.to_string()));
    }
    raw.parse::<i64>().ok().map(RevisionSpec::Number)
}

/// How thoroughly to verify replayed content against the source (§4.8, §6.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    /// Verify only the paths touched by each commit, right after committing it.
    Changed,
    /// Verify every replayed path as a separate full pass at the end of the run.
    All,
}

/// Logging verbosity, mapped to an `EnvFilter` directive by the CLI (§10.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verbosity {
    Quiet,
    #[default]
    Normal,
    Verbose,
    Debug,
}

/// Immutable configuration for one replay run (C9).
#[derive(Debug, Clone)]
pub struct ReplayConfig {
    pub source_url: String,
    pub target_url: String,
    pub revision: RevisionRange,
    pub resume: bool,
    pub force: bool,
    pub keep_author: bool,
    pub keep_date: bool,
    pub keep_prop: bool,
    pub keep_revnum: bool,
    pub log_author: bool,
    pub log_date: bool,
    pub limit: Option<u64>,
    pub dry_run: bool,
    pub verify: Option<VerifyMode>,
    pub pre_commit: Option<String>,
    pub verbosity: Verbosity,
    pub svn_username: Option<String>,
    pub svn_password: Option<String>,
    pub working_copy: Option<PathBuf>,
}

impl ReplayConfig {
    /// Validate cross-field invariants that a `clap` derive can't express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_url == self.target_url {
            return Err(ConfigError::IdenticalUrls(self.source_url.clone()));
        }
        Ok(())
    }

    /// `dry_run` forces `limit = 1` and suppresses the commit (§6.1).
    pub fn effective_limit(&self) -> Option<u64> {
        if self.dry_run {
            Some(1)
        } else {
            self.limit
        }
    }
}

/// On-disk defaults, loaded from TOML, that seed fields of [`ReplayConfig`]
/// an operator hasn't passed explicitly on the command line.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplayDefaults {
    #[serde(default)]
    pub verbosity: Option<Verbosity>,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub svn_username: Option<String>,
    /// Name of an environment variable holding the SVN password. Resolved by
    /// [`ReplayDefaults::resolve`] into a value never written back to disk.
    #[serde(default)]
    pub svn_password_env: Option<String>,
    #[serde(skip)]
    pub svn_password: Option<String>,
}

impl ReplayDefaults {
    pub fn load_from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.display().to_string(),
            source,
        })?;
        let mut defaults: ReplayDefaults =
            toml::from_str(&text).map_err(|source| ConfigError::ParseFailed {
                path: path.display().to_string(),
                source,
            })?;
        defaults.resolve_env_vars()?;
        Ok(defaults)
    }

    fn resolve_env_vars(&mut self) -> Result<(), ConfigError> {
        if let Some(var_name) = &self.svn_password_env {
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::MissingEnvVar(var_name.clone()))?;
            self.svn_password = Some(value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ReplayConfig {
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

    #[test]
    fn parses_plain_number() {
        assert_eq!(
            RevisionRange::parse("42").unwrap(),
            RevisionRange {
                start: RevisionSpec::Number(42),
                end: RevisionSpec::Head,
            }
        );
    }

    #[test]
    fn parses_start_and_end() {
        assert_eq!(
            RevisionRange::parse("10:20").unwrap(),
            RevisionRange {
                start: RevisionSpec::Number(10),
                end: RevisionSpec::Number(20),
            }
        );
    }

    #[test]
    fn parses_head_end() {
        assert_eq!(
            RevisionRange::parse("5:HEAD").unwrap(),
            RevisionRange {
                start: RevisionSpec::Number(5),
                end: RevisionSpec::Head,
            }
        );
    }

    #[test]
    fn parses_date_spec() {
        let r = RevisionRange::parse("{2024-01-01}:HEAD").unwrap();
        assert_eq!(r.start, RevisionSpec::Date("{2024-01-01}".into()));
    }

    #[test]
    fn parses_date_spec_with_embedded_time_colon() {
        let r = RevisionRange::parse("{2024-01-01T12:00:00}:HEAD").unwrap();
        assert_eq!(
            r.start,
            RevisionSpec::Date("{2024-01-01T12:00:00}".into())
        );
        assert_eq!(r.end, RevisionSpec::Head);
    }

    #[test]
    fn parses_two_date_specs_with_embedded_times() {
        let r = RevisionRange::parse("{2024-01-01T00:00:00}:{2024-02-01T12:30:00}").unwrap();
        assert_eq!(
            r.start,
            RevisionSpec::Date("{2024-01-01T00:00:00}".into())
        );
        assert_eq!(r.end, RevisionSpec::Date("{2024-02-01T12:30:00}".into()));
    }

    #[test]
    fn rejects_garbage() {
        assert!(RevisionRange::parse("not-a-revision").is_err());
    }

    #[test]
    fn dry_run_forces_limit_one() {
        let mut cfg = base_config();
        cfg.dry_run = true;
        cfg.limit = Some(500);
        assert_eq!(cfg.effective_limit(), Some(1));
    }

    #[test]
    fn identical_urls_rejected() {
        let mut cfg = base_config();
        cfg.target_url = cfg.source_url.clone();
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::IdenticalUrls(_))
        ));
    }

    #[test]
    fn distinct_urls_accepted() {
        assert!(base_config().validate().is_ok());
    }
}
