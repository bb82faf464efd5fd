//! Layered error taxonomy for the replay engine.
//!
//! Each subsystem gets its own enum; [`ReplayError`] aggregates them behind a
//! single top-level type so callers deep in the engine can use `?` freely
//! while the CLI front end still gets a specific variant to match on for
//! exit-code selection.

use thiserror::Error;

/// Errors raised by the SVN client adapter (C1).
#[derive(Debug, Error)]
pub enum SvnError {
    #[error("svn binary not found on PATH")]
    BinaryNotFound,

    #[error("svn {command} failed (exit code {exit_code}):\nstdout: {stdout}\nstderr: {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("failed to parse svn XML output: {0}")]
    XmlParseError(String),

    #[error(
        "ambiguous kind resolution for {path}@{revision}: {candidates} competing copy-from parents in the same revision"
    )]
    AmbiguousKind {
        path: String,
        revision: i64,
        candidates: usize,
    },

    #[error("url unreachable: {0}")]
    Unreachable(String),

    #[error("path not found: {0}")]
    NotFound(String),

    #[error("unsupported svn action: {0}")]
    UnsupportedAction(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors raised while tracing ancestry (C3).
#[derive(Debug, Error)]
pub enum AncestryError {
    #[error(transparent)]
    Svn(#[from] SvnError),

    #[error("empty log for {0}")]
    EmptyLog(String),
}

/// Errors raised while loading/validating configuration (C9).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    ParseFailed {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("environment variable {0} referenced by config is not set")]
    MissingEnvVar(String),

    #[error("invalid revision range {0:?}: {1}")]
    InvalidRevisionRange(String, String),

    #[error("source_url and target_url must not be identical: {0}")]
    IdenticalUrls(String),
}

/// Top-level error type returned by every engine operation (C5-C8).
#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Svn(#[from] SvnError),

    #[error(transparent)]
    Ancestry(#[from] AncestryError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(
        "verification failed for {path}: source r{source_rev} does not match target r{target_rev}"
    )]
    VerificationFailed {
        path: String,
        source_rev: i64,
        target_rev: i64,
    },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("interrupted after replaying through source revision {last_good_source_rev}")]
    Interrupted { last_good_source_rev: i64 },
}

impl ReplayError {
    /// The source revision last known to have been fully and successfully
    /// replayed, if this error carries one. Used by the orchestrator to
    /// print the "last good revision" summary line (§7).
    pub fn last_good_source_rev(&self) -> Option<i64> {
        match self {
            ReplayError::Interrupted {
                last_good_source_rev,
            } => Some(*last_good_source_rev),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_failed_message_includes_exit_code_and_streams() {
        let err = SvnError::CommandFailed {
            command: "svn info".into(),
            exit_code: 1,
            stdout: "".into(),
            stderr: "E155007: not a working copy".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("exit code 1"));
        assert!(msg.contains("E155007"));
    }

    #[test]
    fn ancestry_error_wraps_svn_error_via_from() {
        let svn_err = SvnError::NotFound("/trunk/missing".into());
        let ancestry_err: AncestryError = svn_err.into();
        assert!(matches!(ancestry_err, AncestryError::Svn(_)));
    }

    #[test]
    fn replay_error_wraps_every_subsystem_via_from() {
        let e1: ReplayError = SvnError::BinaryNotFound.into();
        assert!(matches!(e1, ReplayError::Svn(_)));
        let e2: ReplayError = AncestryError::EmptyLog("x".into()).into();
        assert!(matches!(e2, ReplayError::Ancestry(_)));
        let e3: ReplayError = ConfigError::MissingEnvVar("SVN_PASSWORD".into()).into();
        assert!(matches!(e3, ReplayError::Config(_)));
    }

    #[test]
    fn interrupted_reports_last_good_rev() {
        let err = ReplayError::Interrupted {
            last_good_source_rev: 41,
        };
        assert_eq!(err.last_good_source_rev(), Some(41));
        assert_eq!(
            ReplayError::Internal("x".into()).last_good_source_rev(),
            None
        );
    }
}
