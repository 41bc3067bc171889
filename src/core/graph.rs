//! Task dependency graph: plan parsing, validation, folder resolution and
//! runnable/blocked partitioning.
//!
//! Everything here is pure. Validation runs before any task is persisted and
//! is all-or-nothing; partitioning runs on demand over a snapshot read from
//! either backend.

use crate::core::model::{TaskRecord, TaskStatus};
use regex::Regex;
use rustc_hash::FxHashMap;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DependencyDecl {
    /// No declaration: depends on the preceding task (none for the first).
    Implicit,
    /// Explicit "none".
    None,
    Explicit(Vec<u32>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTask {
    pub number: u32,
    pub name: String,
    pub depends: DependencyDecl,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanIssue {
    #[error("plan declares no tasks (expected headings like '### 1. Title')")]
    NoTasks,
    #[error("task {task} is declared more than once")]
    DuplicateNumber { task: u32 },
    #[error("heading '{heading}' has a task number that is out of range")]
    InvalidHeading { heading: String },
    #[error("task {task} has an unreadable dependency declaration '{raw}'")]
    InvalidDeclaration { task: u32, raw: String },
    #[error("task {task} depends on unknown task {reference}")]
    UnknownReference { task: u32, reference: u32 },
    #[error("task {task} depends on itself")]
    SelfReference { task: u32 },
    #[error("dependency cycle {}", format_path(.path))]
    Cycle { path: Vec<u32> },
}

fn format_path(path: &[u32]) -> String {
    path.iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

impl PlanIssue {
    pub fn task_numbers(&self) -> Vec<u32> {
        match self {
            PlanIssue::NoTasks | PlanIssue::InvalidHeading { .. } => vec![],
            PlanIssue::DuplicateNumber { task }
            | PlanIssue::InvalidDeclaration { task, .. }
            | PlanIssue::SelfReference { task } => vec![*task],
            PlanIssue::UnknownReference { task, reference } => vec![*task, *reference],
            PlanIssue::Cycle { path } => path.clone(),
        }
    }
}

/// Every problem found in one plan, reported together.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct PlanValidationError {
    /// Where the plan came from, named in the message.
    pub origin: String,
    pub issues: Vec<PlanIssue>,
}

impl fmt::Display for PlanValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid task dependencies in {}: ", self.origin)?;
        let issues: Vec<String> = self.issues.iter().map(|i| i.to_string()).collect();
        write!(f, "{}", issues.join("; "))?;
        write!(
            f,
            ". Fix the '### N. Title' headings or 'Depends on:' lines in {} and sync again",
            self.origin
        )
    }
}

impl PlanValidationError {
    fn new(origin: &str, issues: Vec<PlanIssue>) -> Self {
        Self {
            origin: origin.to_string(),
            issues,
        }
    }

    pub fn task_numbers(&self) -> BTreeSet<u32> {
        self.issues.iter().flat_map(|i| i.task_numbers()).collect()
    }
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^###\s+(\d+)\.\s+(.+?)\s*$").expect("valid heading regex"))
}

fn depends_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\s*(?:[-*]\s+)?\**depends\s+on\**\s*:\s*\**\s*(.*?)\s*$")
            .expect("valid depends regex")
    })
}

fn reference_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)^(?:task\s*)?#?(\d+)$").expect("valid reference regex"))
}

/// Extracts `### N. Title` sections and their `Depends on:` lines from a plan.
pub fn parse_plan(plan: &str, source: &str) -> Result<Vec<PlannedTask>, PlanValidationError> {
    let mut tasks: Vec<PlannedTask> = Vec::new();
    let mut issues = Vec::new();
    let mut in_fence = false;
    let mut in_task = false;

    for line in plan.lines() {
        if line.trim_start().starts_with("```") {
            in_fence = !in_fence;
            continue;
        }
        if in_fence {
            continue;
        }
        if let Some(caps) = heading_re().captures(line) {
            let Ok(number) = caps[1].parse::<u32>() else {
                issues.push(PlanIssue::InvalidHeading {
                    heading: line.trim().to_string(),
                });
                in_task = false;
                continue;
            };
            tasks.push(PlannedTask {
                number,
                name: caps[2].trim().to_string(),
                depends: DependencyDecl::Implicit,
            });
            in_task = true;
            continue;
        }
        if line.starts_with("## ") || line.starts_with("# ") {
            in_task = false;
            continue;
        }
        if !in_task {
            continue;
        }
        let Some(current) = tasks.last_mut() else {
            continue;
        };
        // First declaration wins.
        if current.depends != DependencyDecl::Implicit {
            continue;
        }
        if let Some(caps) = depends_re().captures(line) {
            match parse_declaration(&caps[1]) {
                Some(decl) => current.depends = decl,
                None => issues.push(PlanIssue::InvalidDeclaration {
                    task: current.number,
                    raw: caps[1].to_string(),
                }),
            }
        }
    }

    if tasks.is_empty() {
        issues.push(PlanIssue::NoTasks);
    }
    if issues.is_empty() {
        Ok(tasks)
    } else {
        Err(PlanValidationError::new(source, issues))
    }
}

fn parse_declaration(raw: &str) -> Option<DependencyDecl> {
    let cleaned = raw.trim().trim_matches('*').trim().trim_end_matches('.');
    let lowered = cleaned.to_ascii_lowercase();
    if lowered.is_empty() || lowered == "none" || lowered == "-" || lowered == "n/a" {
        return Some(DependencyDecl::None);
    }
    let mut refs = Vec::new();
    for token in cleaned
        .split(|c: char| c == ',' || c == ';')
        .flat_map(|part| part.split(" and "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
    {
        let caps = reference_re().captures(token)?;
        let n = caps[1].parse::<u32>().ok()?;
        if !refs.contains(&n) {
            refs.push(n);
        }
    }
    if refs.is_empty() {
        None
    } else {
        Some(DependencyDecl::Explicit(refs))
    }
}

/// Validated dependencies: task number -> numbers it depends on, in declaration order.
pub type ResolvedNumbers = BTreeMap<u32, Vec<u32>>;

/// Checks references and acyclicity, returning the effective dependency of every task.
pub fn validate(tasks: &[PlannedTask], source: &str) -> Result<ResolvedNumbers, PlanValidationError> {
    let mut issues = Vec::new();
    if tasks.is_empty() {
        return Err(PlanValidationError::new(source, vec![PlanIssue::NoTasks]));
    }

    let mut seen = BTreeSet::new();
    for task in tasks {
        if !seen.insert(task.number) {
            issues.push(PlanIssue::DuplicateNumber { task: task.number });
        }
    }

    let mut ordered: Vec<&PlannedTask> = tasks.iter().collect();
    ordered.sort_by_key(|t| t.number);

    let mut graph: ResolvedNumbers = BTreeMap::new();
    let mut previous: Option<u32> = None;
    for task in &ordered {
        let deps = match &task.depends {
            DependencyDecl::Implicit => previous.into_iter().collect(),
            DependencyDecl::None => Vec::new(),
            DependencyDecl::Explicit(refs) => refs.clone(),
        };
        for &reference in &deps {
            if reference == task.number {
                issues.push(PlanIssue::SelfReference { task: task.number });
            } else if !seen.contains(&reference) {
                issues.push(PlanIssue::UnknownReference {
                    task: task.number,
                    reference,
                });
            }
        }
        graph.insert(task.number, deps);
        previous = Some(task.number);
    }

    if issues.is_empty() {
        if let Some(path) = find_cycle(&graph) {
            issues.push(PlanIssue::Cycle { path });
        }
    }

    if issues.is_empty() {
        Ok(graph)
    } else {
        Err(PlanValidationError::new(source, issues))
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InPath,
    Finished,
}

/// Depth-first search with three node states. Returns the first cycle found
/// as a closed path (`[a, b, a]`), or `None` for a DAG.
pub fn find_cycle<K: Ord + Clone>(graph: &BTreeMap<K, Vec<K>>) -> Option<Vec<K>> {
    fn visit<K: Ord + Clone>(
        node: &K,
        graph: &BTreeMap<K, Vec<K>>,
        state: &mut BTreeMap<K, Visit>,
        path: &mut Vec<K>,
    ) -> Option<Vec<K>> {
        match state.get(node) {
            Some(Visit::Finished) => return None,
            Some(Visit::InPath) => {
                let start = path.iter().position(|n| n == node).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(node.clone());
                return Some(cycle);
            }
            None => {}
        }
        state.insert(node.clone(), Visit::InPath);
        path.push(node.clone());
        for next in graph.get(node).map(Vec::as_slice).unwrap_or_default() {
            if !graph.contains_key(next) {
                continue;
            }
            if let Some(cycle) = visit(next, graph, state, path) {
                return Some(cycle);
            }
        }
        path.pop();
        state.insert(node.clone(), Visit::Finished);
        None
    }

    let mut state = BTreeMap::new();
    let mut path = Vec::new();
    for node in graph.keys() {
        if let Some(cycle) = visit(node, graph, &mut state, &mut path) {
            return Some(cycle);
        }
    }
    None
}

/// Maps validated numeric references to folders. Called once, when tasks are created.
pub fn resolve(
    numbers: &ResolvedNumbers,
    folders: &BTreeMap<u32, String>,
) -> BTreeMap<u32, Vec<String>> {
    numbers
        .iter()
        .map(|(task, deps)| {
            let resolved = deps
                .iter()
                .filter_map(|d| folders.get(d).cloned())
                .collect();
            (*task, resolved)
        })
        .collect()
}

/// Lowercase ASCII slug; runs of anything else collapse to one `-`.
pub fn slugify(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut dash = false;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            dash = false;
        } else if !dash && !out.is_empty() {
            out.push('-');
            dash = true;
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "task".to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn folder_for(number: u32, name: &str) -> String {
    format!("{:02}-{}", number, slugify(name))
}

/// What the partitioner needs to know about a task.
pub trait GraphNode {
    fn folder(&self) -> &str;
    fn status(&self) -> TaskStatus;
    fn depends_on(&self) -> &[String];
}

impl GraphNode for TaskRecord {
    fn folder(&self) -> &str {
        &self.folder
    }
    fn status(&self) -> TaskStatus {
        self.status
    }
    fn depends_on(&self) -> &[String] {
        &self.depends_on
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    pub runnable: Vec<String>,
    pub blocked: Vec<String>,
    pub completed: Vec<String>,
    pub in_progress: Vec<String>,
    /// Pending tasks in `blocked`, keyed by folder, with the dependencies not yet done.
    pub unmet: BTreeMap<String, Vec<String>>,
}

/// Splits tasks into four disjoint sets.
///
/// A dependency counts as met only when its status is exactly `done`; a
/// dependency that no longer exists is never met.
pub fn partition<T: GraphNode>(tasks: &[T]) -> Partition {
    let status_of: FxHashMap<&str, TaskStatus> =
        tasks.iter().map(|t| (t.folder(), t.status())).collect();

    let mut out = Partition::default();
    for task in tasks {
        let folder = task.folder().to_string();
        match task.status() {
            TaskStatus::Done => out.completed.push(folder),
            TaskStatus::InProgress => out.in_progress.push(folder),
            TaskStatus::Blocked | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Partial => {
                out.blocked.push(folder)
            }
            TaskStatus::Pending => {
                let unmet: Vec<String> = task
                    .depends_on()
                    .iter()
                    .filter(|dep| status_of.get(dep.as_str()) != Some(&TaskStatus::Done))
                    .cloned()
                    .collect();
                if unmet.is_empty() {
                    out.runnable.push(folder);
                } else {
                    out.unmet.insert(folder.clone(), unmet);
                    out.blocked.push(folder);
                }
            }
        }
    }
    out
}
