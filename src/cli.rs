//! CLI struct definitions for the taskhive command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "taskhive",
    version = env!("CARGO_PKG_VERSION"),
    about = "Workflow state engine for features, plans and dependent tasks, backed by a ledger CLI or local files."
)]
pub(crate) struct Cli {
    /// Project root (defaults to the current directory).
    #[clap(long, global = true)]
    pub root: Option<PathBuf>,
    /// Backend: 'ledger' or 'local'. Overrides config and TASKHIVE_MODE.
    #[clap(long, global = true)]
    pub mode: Option<String>,
    /// Output format.
    #[clap(long, value_enum, default_value_t = OutputFormat::Text, global = true)]
    pub format: OutputFormat,
    /// Debug-level logging on stderr.
    #[clap(long, short = 'v', global = true)]
    pub verbose: bool,
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Create, inspect and move features
    Feature(FeatureCli),
    /// Write, review and approve a feature's plan
    Plan(PlanCli),
    /// Sync, inspect and update tasks
    Task(TaskCli),
}

#[derive(clap::Args, Debug)]
pub(crate) struct FeatureCli {
    #[clap(subcommand)]
    pub command: FeatureCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum FeatureCommand {
    /// Create a feature in the planning state
    Create {
        name: String,
        #[clap(long)]
        ticket: Option<String>,
        #[clap(long)]
        session_id: Option<String>,
        #[clap(long)]
        workflow_path: Option<String>,
    },
    /// Show one feature with its task partition
    Show { name: String },
    /// List all features
    List,
    /// Move a feature to another status (planning, approved, executing, completed)
    Status { name: String, status: String },
}

#[derive(clap::Args, Debug)]
pub(crate) struct PlanCli {
    #[clap(subcommand)]
    pub command: PlanCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum PlanCommand {
    /// Store the plan text (from --file, or stdin)
    Write {
        feature: String,
        #[clap(long)]
        file: Option<PathBuf>,
    },
    /// Show the plan, its approval state and comments
    Show { feature: String },
    /// Approve the current plan text
    Approve {
        feature: String,
        #[clap(long)]
        by: Option<String>,
    },
    /// Add a review comment to the plan
    Comment {
        feature: String,
        body: String,
        #[clap(long)]
        line: Option<u32>,
        #[clap(long)]
        author: Option<String>,
    },
    /// Drop all review comments
    ClearComments { feature: String },
}

#[derive(clap::Args, Debug)]
pub(crate) struct TaskCli {
    #[clap(subcommand)]
    pub command: TaskCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum TaskCommand {
    /// Create, keep or remove tasks to match the approved plan
    Sync { feature: String },
    /// List tasks in folder order
    List { feature: String },
    /// Partition tasks into runnable, blocked, in-progress and completed
    Runnable { feature: String },
    /// Add a task outside the plan
    Add {
        feature: String,
        name: String,
        /// Folder of a task this one depends on (repeatable)
        #[clap(long = "depends-on")]
        depends_on: Vec<String>,
    },
    /// Record a status change and its completion details
    Update {
        feature: String,
        folder: String,
        #[clap(long)]
        status: Option<String>,
        #[clap(long)]
        summary: Option<String>,
        #[clap(long)]
        base_commit: Option<String>,
        #[clap(long)]
        blocker: Option<String>,
        #[clap(long, requires = "blocker")]
        blocker_detail: Option<String>,
    },
    /// Record worker liveness without touching task status
    Heartbeat {
        feature: String,
        folder: String,
        #[clap(long)]
        session_id: Option<String>,
        #[clap(long)]
        attempt: Option<u32>,
        #[clap(long)]
        message_count: Option<u32>,
        #[clap(long)]
        worker_mode: Option<String>,
        #[clap(long)]
        idempotency_key: Option<String>,
    },
    /// Delete a task; tasks depending on it stay blocked
    Delete { feature: String, folder: String },
    /// Show or replace a task's spec
    Spec(DocArgs),
    /// Show or replace a task's report
    Report(DocArgs),
    /// Show or replace a task's worker prompt
    Prompt(DocArgs),
}

#[derive(clap::Args, Debug)]
pub(crate) struct DocArgs {
    pub feature: String,
    pub folder: String,
    /// Replace the document with this file's content ('-' for stdin)
    #[clap(long)]
    pub set: Option<PathBuf>,
}
