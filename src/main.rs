use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use regraft::advisor::ClaudeAdvisor;
use regraft::error::ExitCodeError;
use regraft::hook::NoopHook;
use regraft::{lifecycle, open_repo, push, record, replay, save, status, telemetry};

/// Deterministic record and replay of forked source repositories
///
/// regraft maintains fork entries declared in forks.json: an upstream URL,
/// an optional personal fork remote, and an ordered list of refs to merge
/// (commit hashes, PR numbers, or branch names). `record` builds the fork
/// once, resolving merge conflicts with help from an LLM advisor when
/// needed, and pins the result; `replay` rebuilds the identical clone,
/// byte for byte, on any machine, without ever consulting the advisor.
///
/// QUICK START:
///
///   regraft record ccc          # build + pin from the configured refs
///   regraft replay ccc          # reproduce the pinned clone
///   regraft status ccc          # is the clone safe to wipe?
///   regraft save ccc "my fix"   # capture local edits as a patch pin
#[derive(Parser)]
#[command(name = "regraft")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'regraft <command> --help' for more on a specific command.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record an entry: clone, merge, resolve, pin
    ///
    /// Rebuilds the clone from upstream, merging each configured ref in
    /// order. Conflicts are resolved through the tiered pipeline
    /// (mechanical, reuse of prior resolutions, then the advisor) and
    /// written to res-N.resolution pins so replay never needs the oracle.
    /// Existing local patches are preserved and re-applied.
    Record {
        /// Entry name
        name: String,

        /// Refs to merge, overriding the configured list
        refs: Vec<String>,
    },

    /// Replay an entry from its pins
    ///
    /// Deterministically rebuilds the clone: base checkout, recorded
    /// merges, recorded resolutions, local patches. Fails if the final
    /// commit differs from the pinned HEAD. A no-op when the clone
    /// already exists.
    Replay {
        /// Entry name
        name: String,
    },

    /// Capture local wip changes as a numbered patch pin
    Save {
        /// Entry name
        name: String,

        /// Short description used in the patch filename
        desc: Option<String>,
    },

    /// Cherry-pick wip commits onto a PR branch
    ///
    /// Target defaults to the lexicographically last pr-* branch; pass it
    /// explicitly when several exist.
    Push {
        /// Entry name
        name: String,

        /// Target branch
        target: Option<String>,
    },

    /// Report whether the clone is safe to wipe (exit 0 clean, 1 dirty)
    Status {
        /// Entry name
        name: String,
    },

    /// Remove the clone (refuses when status is dirty)
    Clean {
        /// Entry name
        name: String,
    },

    /// Remove the clone and its pins (refuses when status is dirty)
    Reset {
        /// Entry name
        name: String,
    },

    /// Status of every entry (exit code ORs the individual verdicts)
    StatusAll,

    /// Clean every entry
    CleanAll,

    /// Replay every entry
    ReplayAll,
}

fn main() -> ExitCode {
    telemetry::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if let Some(ExitCodeError(code)) = err.downcast_ref::<ExitCodeError>() {
                return ExitCode::from(*code as u8);
            }
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let (layout, config) = open_repo()?;
    let hook = NoopHook;

    match cli.command {
        Commands::Record { name, refs } => {
            let advisor = ClaudeAdvisor::from_env();
            record::run(&layout, &config, &name, &refs, &advisor, &hook)
        }
        Commands::Replay { name } => replay::run(&layout, &config, &name, &hook),
        Commands::Save { name, desc } => save::run(&layout, &name, desc.as_deref()),
        Commands::Push { name, target } => push::run(&layout, &name, target.as_deref()),
        Commands::Status { name } => status::run(&layout, &config, &name),
        Commands::Clean { name } => lifecycle::clean(&layout, &config, &name),
        Commands::Reset { name } => lifecycle::reset(&layout, &config, &name),
        Commands::StatusAll => status::run_all(&layout, &config),
        Commands::CleanAll => lifecycle::clean_all(&layout, &config),
        Commands::ReplayAll => lifecycle::replay_all(&layout, &config, &hook),
    }
}
