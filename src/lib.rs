//! taskhive: a workflow state engine for features, plans and dependent tasks.
//!
//! Work is organized as **features**, each with a markdown **plan** whose
//! `### N. Title` sections become **tasks** with declared dependencies.
//! State survives restarts, tolerates concurrent workers on the same
//! filesystem, and lives in one of two interchangeable backends.
//!
//! # Backends
//!
//! - **Ledger** (default): an external issue ledger CLI (`bd`) is canonical.
//!   Features are epics, tasks are child records, and structured state rides
//!   in a versioned artifact block inside each record's description.
//! - **Local**: canonical JSON and markdown under `.taskhive/features/`,
//!   mutated only under `<file>.lock` and replaced atomically.
//!
//! # Crate Structure
//!
//! - [`core`]: locks, atomic writes, patch merging, the artifact codec, the
//!   ledger gateway and repository, and the dependency graph engine
//! - [`stores`]: `FeatureStore`/`TaskStore`/`PlanStore` and both backends
//! - [`workflow`]: the [`workflow::Engine`] operations the CLI exposes
//!
//! # Examples
//!
//! ```bash
//! taskhive feature create auth
//! taskhive plan write auth --file plan.md
//! taskhive plan approve auth
//! taskhive task sync auth
//! taskhive task runnable auth --format json
//! ```

pub mod core;
pub mod stores;
pub mod workflow;

mod cli;

use crate::cli::{
    Cli, Command, DocArgs, FeatureCommand, OutputFormat, PlanCommand, TaskCommand,
};
use crate::core::config::EngineConfig;
use crate::core::error::Result;
use crate::core::graph::Partition;
use crate::core::logging::{self, LogConfig};
use crate::core::model::{Blocker, Feature, FeatureStatus, NewFeature, TaskRecord, TaskStatus};
use crate::core::repository::{Outcome, RepoError};
use crate::workflow::{Completion, Engine, Heartbeat};
use clap::Parser;
use colored::Colorize;
use serde::Serialize;
use serde_json::Value;
use std::io::Read;
use std::path::Path;

/// A command result in both output shapes.
struct Rendered {
    json: Value,
    text: String,
}

fn rendered<T: Serialize>(value: &T, text: String) -> Result<Rendered> {
    Ok(Rendered {
        json: serde_json::to_value(value)?,
        text,
    })
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    logging::init_logging(LogConfig {
        verbose: cli.verbose,
    });

    let root = match &cli.root {
        Some(root) => root.clone(),
        None => std::env::current_dir()?,
    };
    let format = cli.format;
    let result = open_engine(&root, cli.mode.as_deref())
        .and_then(|engine| dispatch(&engine, cli.command));

    match (format, result) {
        (OutputFormat::Json, Ok(out)) => {
            let outcome: Outcome<Value> = Outcome::Success(out.json);
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Ok(())
        }
        (OutputFormat::Json, Err(err)) => {
            let err = RepoError::from(err);
            let outcome: Outcome<Value> = Outcome::Failure(err.clone());
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            Err(err.into())
        }
        (OutputFormat::Text, result) => {
            let out = result?;
            if !out.text.is_empty() {
                println!("{}", out.text);
            }
            Ok(())
        }
    }
}

fn open_engine(root: &Path, mode: Option<&str>) -> Result<Engine> {
    let mut config = EngineConfig::load(root)?;
    if let Some(mode) = mode {
        config.mode = mode.parse()?;
    }
    Engine::open(config)
}

fn read_input(path: Option<&Path>) -> Result<String> {
    match path {
        Some(p) if p != Path::new("-") => Ok(std::fs::read_to_string(p)?),
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            Ok(buf)
        }
    }
}

fn dispatch(engine: &Engine, command: Command) -> Result<Rendered> {
    match command {
        Command::Feature(cli) => match cli.command {
            FeatureCommand::Create {
                name,
                ticket,
                session_id,
                workflow_path,
            } => {
                let feature = engine.create_feature(&NewFeature {
                    name,
                    ticket,
                    session_id,
                    workflow_path,
                })?;
                let text = format!("{} created {}", "✓".bright_green(), feature_line(&feature));
                rendered(&feature, text)
            }
            FeatureCommand::Show { name } => {
                let feature = engine.feature(&name)?;
                let partition = engine.runnable(&name)?;
                let text = format!("{}\n{}", feature_line(&feature), partition_text(&partition));
                rendered(
                    &serde_json::json!({ "feature": feature, "tasks": partition }),
                    text,
                )
            }
            FeatureCommand::List => {
                let features = engine.list_features()?;
                let text = if features.is_empty() {
                    "no features".dimmed().to_string()
                } else {
                    features.iter().map(feature_line).collect::<Vec<_>>().join("\n")
                };
                rendered(&features, text)
            }
            FeatureCommand::Status { name, status } => {
                let next: FeatureStatus = status.parse()?;
                let feature = engine.set_feature_status(&name, next)?;
                let text = feature_line(&feature);
                rendered(&feature, text)
            }
        },
        Command::Plan(cli) => match cli.command {
            PlanCommand::Write { feature, file } => {
                let content = read_input(file.as_deref())?;
                engine.write_plan(&feature, &content)?;
                rendered(
                    &serde_json::json!({ "feature": feature, "bytes": content.len() }),
                    format!("{} plan written for {}", "✓".bright_green(), feature.bold()),
                )
            }
            PlanCommand::Show { feature } => {
                let view = engine.plan(&feature)?;
                let state = if view.approved {
                    "approved".bright_green()
                } else if view.approval.is_some() {
                    "changed since approval".bright_yellow()
                } else {
                    "not approved".bright_yellow()
                };
                let mut text = format!(
                    "{}\n\n{} {}",
                    view.plan.as_deref().unwrap_or("(no plan)"),
                    "▸".bright_cyan(),
                    state
                );
                for c in &view.comments {
                    let line = c.line.map(|l| format!("L{l} ")).unwrap_or_default();
                    text.push_str(&format!("\n  {} {}{}", "•".dimmed(), line, c.body));
                }
                rendered(&view, text)
            }
            PlanCommand::Approve { feature, by } => {
                let approval = engine.approve_plan(&feature, by)?;
                let text = format!(
                    "{} plan approved for {} ({})",
                    "✓".bright_green(),
                    feature.bold(),
                    &approval.plan_hash[..12]
                );
                rendered(&approval, text)
            }
            PlanCommand::Comment {
                feature,
                body,
                line,
                author,
            } => {
                let comment = engine.add_plan_comment(&feature, &body, line, author)?;
                let text = format!("{} comment {}", "✓".bright_green(), comment.id);
                rendered(&comment, text)
            }
            PlanCommand::ClearComments { feature } => {
                engine.clear_plan_comments(&feature)?;
                rendered(
                    &serde_json::json!({ "feature": feature, "cleared": true }),
                    format!("{} comments cleared", "✓".bright_green()),
                )
            }
        },
        Command::Task(cli) => dispatch_task(engine, cli.command),
    }
}

fn dispatch_task(engine: &Engine, command: TaskCommand) -> Result<Rendered> {
    match command {
        TaskCommand::Sync { feature } => {
            let report = engine.sync_tasks(&feature)?;
            let text = format!(
                "{} synced {}: {} created, {} removed, {} kept",
                "✓".bright_green(),
                feature.bold(),
                report.created.len(),
                report.removed.len(),
                report.kept.len()
            );
            rendered(&report, text)
        }
        TaskCommand::List { feature } => {
            let tasks = engine.tasks(&feature)?;
            let text = if tasks.is_empty() {
                "no tasks".dimmed().to_string()
            } else {
                tasks.iter().map(task_line).collect::<Vec<_>>().join("\n")
            };
            rendered(&tasks, text)
        }
        TaskCommand::Runnable { feature } => {
            let partition = engine.runnable(&feature)?;
            let text = partition_text(&partition);
            rendered(&partition, text)
        }
        TaskCommand::Add {
            feature,
            name,
            depends_on,
        } => {
            let task = engine.create_manual_task(&feature, &name, depends_on)?;
            let text = format!("{} added {}", "✓".bright_green(), task_line(&task));
            rendered(&task, text)
        }
        TaskCommand::Update {
            feature,
            folder,
            status,
            summary,
            base_commit,
            blocker,
            blocker_detail,
        } => {
            let status = status.map(|s| s.parse::<TaskStatus>()).transpose()?;
            let blocker = blocker.map(|reason| Blocker {
                reason,
                detail: blocker_detail,
            });
            let task = engine.complete_task(
                &feature,
                &folder,
                Completion {
                    status,
                    summary,
                    base_commit,
                    blocker,
                },
            )?;
            let text = task_line(&task);
            rendered(&task, text)
        }
        TaskCommand::Heartbeat {
            feature,
            folder,
            session_id,
            attempt,
            message_count,
            worker_mode,
            idempotency_key,
        } => {
            let task = engine.record_heartbeat(
                &feature,
                &folder,
                Heartbeat {
                    session_id,
                    attempt,
                    message_count,
                    mode: worker_mode,
                    idempotency_key,
                },
            )?;
            let text = format!("{} heartbeat {}", "♥".bright_red(), task.folder);
            rendered(&task, text)
        }
        TaskCommand::Delete { feature, folder } => {
            engine.delete_task(&feature, &folder)?;
            rendered(
                &serde_json::json!({ "feature": feature, "deleted": folder }),
                format!("{} deleted {}", "✓".bright_green(), folder),
            )
        }
        TaskCommand::Spec(args) => document(
            args,
            |f, t| engine.task_spec(f, t),
            |f, t, c| engine.write_task_spec(f, t, c),
        ),
        TaskCommand::Report(args) => document(
            args,
            |f, t| engine.task_report(f, t),
            |f, t, c| engine.write_task_report(f, t, c),
        ),
        TaskCommand::Prompt(args) => document(
            args,
            |f, t| engine.worker_prompt(f, t),
            |f, t, c| engine.write_worker_prompt(f, t, c),
        ),
    }
}

fn document(
    args: DocArgs,
    read: impl Fn(&str, &str) -> Result<Option<String>>,
    write: impl Fn(&str, &str, &str) -> Result<()>,
) -> Result<Rendered> {
    if let Some(path) = args.set.as_deref() {
        let content = read_input(Some(path))?;
        write(&args.feature, &args.folder, &content)?;
    }
    let content = read(&args.feature, &args.folder)?;
    let text = content.clone().unwrap_or_else(|| "(empty)".dimmed().to_string());
    rendered(
        &serde_json::json!({ "folder": args.folder, "content": content }),
        text,
    )
}

fn feature_line(feature: &Feature) -> String {
    let status = match feature.status {
        FeatureStatus::Planning => feature.status.as_str().bright_yellow(),
        FeatureStatus::Approved => feature.status.as_str().bright_cyan(),
        FeatureStatus::Executing => feature.status.as_str().bright_blue(),
        FeatureStatus::Completed => feature.status.as_str().bright_green(),
    };
    format!(
        "{} {} [{}] {}",
        "●".bright_white(),
        feature.name.bold(),
        status,
        feature.external_id.dimmed()
    )
}

fn task_line(task: &TaskRecord) -> String {
    let status = match task.status {
        TaskStatus::Done => task.status.as_str().bright_green(),
        TaskStatus::InProgress => task.status.as_str().bright_blue(),
        TaskStatus::Pending => task.status.as_str().normal(),
        _ => task.status.as_str().bright_red(),
    };
    let deps = if task.depends_on.is_empty() {
        String::new()
    } else {
        format!(" ← {}", task.depends_on.join(", ")).dimmed().to_string()
    };
    format!("  {:<28} {:<12} {}{}", task.folder, status, task.name, deps)
}

fn partition_text(p: &Partition) -> String {
    let row = |label: &str, items: &[String]| {
        format!(
            "  {:<12} {}",
            label,
            if items.is_empty() {
                "-".to_string()
            } else {
                items.join(", ")
            }
        )
    };
    let mut lines = vec![
        row("runnable", &p.runnable),
        row("in progress", &p.in_progress),
        row("blocked", &p.blocked),
        row("completed", &p.completed),
    ];
    for (folder, unmet) in &p.unmet {
        lines.push(format!(
            "    {} {} waits on {}",
            "↳".dimmed(),
            folder,
            unmet.join(", ")
        ));
    }
    lines.join("\n")
}
