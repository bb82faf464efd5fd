//! Command-line front end for the ancestry-preserving SVN replay engine (C10).
//!
//! Parses the flags in SPEC_FULL §6.1, builds a [`ReplayConfig`], and
//! drives the orchestrator (C8). Logging verbosity maps onto an
//! `EnvFilter` directive; the process exit code distinguishes success,
//! ordinary replay failure, and user interrupt.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use console::style;
use tracing_subscriber::EnvFilter;

use svnreplay_core::config::{
    ReplayConfig, ReplayDefaults, RevisionRange, VerifyMode, Verbosity,
};
use svnreplay_core::errors::ReplayError;
use svnreplay_core::svn::ProcessSvnClient;

/// Replay a path's commit history from one SVN repository into another,
/// preserving renames, copies, and branch merges as native SVN copies.
#[derive(Parser, Debug)]
#[command(name = "svnreplay", version, about)]
struct Cli {
    /// URL of the path to replay, inside the source repository.
    source_url: String,

    /// URL of the path to replay into, inside the target repository.
    target_url: String,

    /// Revision range to replay: `N`, `N:M`, `N:HEAD`, or `{DATE}` forms.
    #[arg(short = 'r', long = "revision")]
    revision: Option<String>,

    /// Resume a previous run: rebuild the revision map from the target's
    /// own tracking revprops and continue from the next source revision.
    #[arg(long = "continue")]
    resume: bool,

    /// Allow replaying into a target path that already has content.
    #[arg(long)]
    force: bool,

    /// Preserve the source commit author as `svn:author` on the target
    /// (requires a pre-commit hook on the target that allows it).
    #[arg(long)]
    keep_author: bool,

    /// Preserve the source commit timestamp as `svn:date` on the target.
    #[arg(long)]
    keep_date: bool,

    /// Mirror the source path's versioned properties onto the target.
    #[arg(long)]
    keep_prop: bool,

    /// Pad target revision numbers with placeholder commits so they stay
    /// numerically aligned with source revision numbers.
    #[arg(long)]
    keep_revnum: bool,

    /// Shorthand for `--keep-author --keep-date --keep-prop`.
    #[arg(long)]
    archive: bool,

    /// Append a `Date: ...` line to each commit message.
    #[arg(long)]
    log_date: bool,

    /// Append an `Author: ...` line to each commit message.
    #[arg(long)]
    log_author: bool,

    /// Stop after processing this many source revisions.
    #[arg(long)]
    limit: Option<u64>,

    /// Process a single revision and perform no commit.
    #[arg(long)]
    dry_run: bool,

    /// Verify replayed file content against the source: `changed` verifies
    /// only each commit's own paths; `all` additionally verifies every
    /// previously replayed path.
    #[arg(long, value_enum)]
    verify: Option<CliVerifyMode>,

    /// Shell command run before each commit; non-zero exit aborts the run.
    #[arg(long)]
    pre_commit: Option<String>,

    /// Directory to check out the target working copy into.
    #[arg(long)]
    working_copy: Option<PathBuf>,

    /// Path to a TOML file supplying defaults for flags not passed here.
    #[arg(long)]
    config: Option<PathBuf>,

    /// SVN username, if the repositories require authentication.
    #[arg(long)]
    svn_username: Option<String>,

    /// Increase logging verbosity; repeatable (`-v`, `-vv`, `-vvv`).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all logging except warnings and errors.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum CliVerifyMode {
    Changed,
    All,
}

impl From<CliVerifyMode> for VerifyMode {
    fn from(v: CliVerifyMode) -> Self {
        match v {
            CliVerifyMode::Changed => VerifyMode::Changed,
            CliVerifyMode::All => VerifyMode::All,
        }
    }
}

fn verbosity_from_flags(verbose: u8, quiet: bool) -> Verbosity {
    if quiet {
        Verbosity::Quiet
    } else {
        match verbose {
            0 => Verbosity::Normal,
            1 => Verbosity::Verbose,
            _ => Verbosity::Debug,
        }
    }
}

fn env_filter_for(verbosity: Verbosity) -> EnvFilter {
    let directive = match verbosity {
        Verbosity::Quiet => "warn",
        Verbosity::Normal => "warn,svnreplay_core=info",
        Verbosity::Verbose => "warn,svnreplay_core=debug",
        Verbosity::Debug => "trace",
    };
    EnvFilter::new(directive)
}

fn build_config(cli: &Cli, defaults: Option<ReplayDefaults>) -> Result<ReplayConfig> {
    let mut verbosity = verbosity_from_flags(cli.verbose, cli.quiet);
    let mut svn_username = cli.svn_username.clone();
    let mut svn_password = None;
    let mut limit = cli.limit;
    let mut revision_text = cli.revision.clone();

    if let Some(defaults) = defaults {
        if cli.verbose == 0 && !cli.quiet {
            if let Some(v) = defaults.verbosity {
                verbosity = v;
            }
        }
        if svn_username.is_none() {
            svn_username = defaults.svn_username;
        }
        svn_password = defaults.svn_password;
        if limit.is_none() {
            limit = defaults.limit;
        }
        if revision_text.is_none() {
            revision_text = defaults.revision;
        }
    }

    let revision = RevisionRange::parse(revision_text.as_deref().unwrap_or("1:HEAD"))
        .context("invalid --revision value")?;

    let (keep_author, keep_date, keep_prop) = if cli.archive {
        (true, true, true)
    } else {
        (cli.keep_author, cli.keep_date, cli.keep_prop)
    };

    let cfg = ReplayConfig {
        source_url: cli.source_url.clone(),
        target_url: cli.target_url.clone(),
        revision,
        resume: cli.resume,
        force: cli.force,
        keep_author,
        keep_date,
        keep_prop,
        keep_revnum: cli.keep_revnum,
        log_author: cli.log_author,
        log_date: cli.log_date,
        limit,
        dry_run: cli.dry_run,
        verify: cli.verify.map(VerifyMode::from),
        pre_commit: cli.pre_commit.clone(),
        verbosity,
        svn_username,
        svn_password,
        working_copy: cli.working_copy.clone(),
    };
    cfg.validate().context("invalid configuration")?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let defaults = match &cli.config {
        Some(path) => match ReplayDefaults::load_from_file(path) {
            Ok(d) => Some(d),
            Err(e) => {
                eprintln!("{} failed to load --config {}: {e}", style("error:").red().bold(), path.display());
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let verbosity = verbosity_from_flags(cli.verbose, cli.quiet);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter_for(verbosity))
        .with_target(false)
        .without_time()
        .init();

    let cfg = match build_config(&cli, defaults) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("{} {e:#}", style("error:").red().bold());
            return ExitCode::FAILURE;
        }
    };

    match run(cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<ReplayError>() {
                Some(ReplayError::Interrupted {
                    last_good_source_rev,
                }) => {
                    eprintln!(
                        "{} stopped by user after replaying through source revision {}",
                        style("warning:").yellow().bold(),
                        last_good_source_rev
                    );
                }
                _ => {
                    eprintln!("{} {e:#}", style("error:").red().bold());
                }
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: ReplayConfig) -> Result<()> {
    use indicatif::{ProgressBar, ProgressStyle};

    let svn = ProcessSvnClient::new(cfg.svn_username.clone(), cfg.svn_password.clone());

    let working_copy = cfg
        .working_copy
        .clone()
        .unwrap_or_else(default_working_copy_path);

    tracing::info!(
        source = %cfg.source_url,
        target = %cfg.target_url,
        working_copy = %working_copy.display(),
        "starting replay run"
    );

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.blue} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(120));
    spinner.set_message(format!(
        "replaying {} -> {}...",
        cfg.source_url, cfg.target_url
    ));

    let result = svnreplay_core::orchestrator::run(&svn, &cfg, &working_copy).await;
    spinner.finish_and_clear();

    let report = result.map_err(anyhow::Error::from)?;

    print_summary(&report, &working_copy);
    Ok(())
}

fn default_working_copy_path() -> PathBuf {
    std::env::temp_dir().join("svnreplay-wc")
}

fn print_summary(report: &svnreplay_core::RunReport, working_copy: &PathBuf) {
    use comfy_table::Table;

    let mut table = Table::new();
    table
        .set_header(vec!["field", "value"])
        .add_row(vec!["last source revision", &report.last_source_rev.to_string()])
        .add_row(vec!["last target revision", &report.last_target_rev.to_string()])
        .add_row(vec!["commits made", &report.commits_made.to_string()])
        .add_row(vec!["working copy", &working_copy.display().to_string()])
        .add_row(vec!["finished at", &Local::now().format("%Y-%m-%d %H:%M:%S").to_string()]);

    println!("{}", style("replay complete").green().bold());
    println!("{table}");
}
