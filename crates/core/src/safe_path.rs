//! Canonical argument-safety wrapper for every SVN invocation (§4.1, §9).
//!
//! Two independent hazards exist when handing arbitrary paths/URLs to the
//! `svn` binary:
//!
//! - A literal `@` in a path is interpreted by SVN as the start of a peg
//!   revision unless escaped with a trailing `@`.
//! - An argument that happens to start with `-` can be mistaken for an
//!   option by `svn`'s own argument parser.
//!
//! Rather than patch call sites individually (the bug class the donor
//! implementation fell into), every path-shaped argument passes through
//! [`safe_path`] and every command builder inserts a `--` terminator before
//! the first positional argument once any bulk/variadic paths are present.

/// Escape a single path or URL argument for safe use as an `svn` argument.
///
/// Appends a literal `@` when the input contains one, so SVN treats it as
/// part of the path rather than a peg-revision separator.
pub fn safe_path(arg: &str) -> String {
    if arg.contains('@') {
        format!("{arg}@")
    } else {
        arg.to_string()
    }
}

/// Append a `--` argument-list terminator to `args` if it is not already
/// present and `paths` contains anything that could be mistaken for an
/// option (starts with `-`). Mirrors the donor shell layer's `bulk_args`
/// convention of only emitting `--` when actually needed.
pub fn terminate_options_if_needed(args: &mut Vec<String>, paths: &[String]) {
    if paths.iter().any(|p| p.starts_with('-')) && !args.iter().any(|a| a == "--") {
        args.push("--".to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_path_is_unchanged() {
        assert_eq!(safe_path("/trunk/a.txt"), "/trunk/a.txt");
    }

    #[test]
    fn path_with_at_sign_gets_trailing_escape() {
        assert_eq!(safe_path("/trunk/file@2.txt"), "/trunk/file@2.txt@");
    }

    #[test]
    fn terminator_added_only_when_a_path_looks_like_an_option() {
        let mut args = vec!["commit".to_string(), "-m".to_string(), "msg".to_string()];
        terminate_options_if_needed(&mut args, &["-weird-name.txt".to_string()]);
        assert_eq!(args.last().unwrap(), "--");

        let mut args2 = vec!["add".to_string()];
        terminate_options_if_needed(&mut args2, &["normal.txt".to_string()]);
        assert!(!args2.contains(&"--".to_string()));
    }

    #[test]
    fn terminator_not_duplicated() {
        let mut args = vec!["commit".to_string(), "--".to_string()];
        terminate_options_if_needed(&mut args, &["-weird.txt".to_string()]);
        assert_eq!(args.iter().filter(|a| *a == "--").count(), 1);
    }
}
