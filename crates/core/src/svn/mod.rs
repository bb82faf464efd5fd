//! External SVN command-line client adapter (C1, §4.1).

pub mod client;
pub mod parser;

pub use client::{get_kind, ProcessSvnClient, RevArg, SvnOps};
pub use parser::{StatusEntry, SvnChangedPath, SvnInfo, SvnLogEntry};
