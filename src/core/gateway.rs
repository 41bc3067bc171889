//! Subprocess gateway to the external ledger CLI.
//!
//! Every request is one child process with a hard timeout. Failures are
//! reduced to a [`GatewayError`] carrying the operation and a stable code;
//! subprocess output is logged at debug level and never placed in errors.

use crate::core::config::LedgerConfig;
use crate::core::error::{GatewayError, GatewayErrorCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

/// Directory whose presence shows the ledger was initialized in a workdir.
pub const LEDGER_STATE_DIR: &str = ".beads";

pub type GatewayResult<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub timeout: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }
}

/// Seam between the gateway and process spawning.
pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput>;
}

/// Spawns real processes, killing them when the timeout elapses.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take().map(spawn_reader);
        let stderr = child.stderr.take().map(spawn_reader);

        let started = Instant::now();
        let mut timed_out = false;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break Some(status);
            }
            if started.elapsed() >= invocation.timeout {
                timed_out = true;
                let _ = child.kill();
                let _ = child.wait();
                break None;
            }
            std::thread::sleep(Duration::from_millis(10));
        };

        let collect = |handle: Option<std::thread::JoinHandle<String>>| {
            handle.and_then(|h| h.join().ok()).unwrap_or_default()
        };
        Ok(CommandOutput {
            code: status.and_then(|s| s.code()),
            stdout: collect(stdout),
            stderr: collect(stderr),
            timed_out,
        })
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut pipe: R) -> std::thread::JoinHandle<String> {
    std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).to_string()
    })
}

/// Ledger priority, validated as 1 (highest) through 5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Priority(u8);

impl Priority {
    pub fn new(value: i64) -> GatewayResult<Self> {
        if (1..=5).contains(&value) {
            Ok(Self(value as u8))
        } else {
            Err(GatewayError::new(
                GatewayErrorCode::InvalidPriority,
                format!("set priority {value} (expected an integer 1-5)"),
            ))
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    /// The ledger counts priorities from 0.
    pub fn native(self) -> u8 {
        self.0 - 1
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(3)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    Epic,
    Task,
}

impl RecordKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::Epic => "epic",
            RecordKind::Task => "task",
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewRecord {
    pub title: String,
    pub kind: RecordKind,
    pub priority: Priority,
    pub parent: Option<String>,
    pub description: String,
}

/// A ledger record as reported by `show`/`list --json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerRecord {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, alias = "type")]
    pub issue_type: Option<String>,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    AlreadyInitialized,
    NotInitialized,
    NotFound,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    Retry,
}

/// Recognizes the ledger's error conventions in both structured
/// `{"error": {"code": ...}}` payloads and free-text stderr.
fn classify_failure(output: &CommandOutput) -> Signal {
    for stream in [&output.stdout, &output.stderr] {
        if let Ok(value) = serde_json::from_str::<Value>(stream.trim()) {
            if let Some(code) = value
                .get("error")
                .and_then(|e| e.get("code"))
                .and_then(Value::as_str)
            {
                match code.to_ascii_uppercase().as_str() {
                    "ALREADY_INITIALIZED" => return Signal::AlreadyInitialized,
                    "NOT_INITIALIZED" | "NO_DATABASE" => return Signal::NotInitialized,
                    "NOT_FOUND" | "ISSUE_NOT_FOUND" => return Signal::NotFound,
                    _ => {}
                }
            }
        }
    }
    let text = format!("{}\n{}", output.stdout, output.stderr).to_ascii_lowercase();
    if text.contains("already initialized") {
        Signal::AlreadyInitialized
    } else if text.contains("not initialized")
        || text.contains("no beads database")
        || text.contains("run 'bd init'")
        || text.contains("run `bd init`")
    {
        Signal::NotInitialized
    } else if text.contains("not found") || text.contains("no issue found") {
        Signal::NotFound
    } else {
        Signal::Other
    }
}

pub struct LedgerGateway {
    runner: Arc<dyn CommandRunner>,
    binary: String,
    workdir: PathBuf,
    timeout: Duration,
    initialized: AtomicBool,
}

impl LedgerGateway {
    pub fn new(config: &LedgerConfig, workdir: &Path) -> Self {
        Self::with_runner(Arc::new(ProcessRunner), config, workdir)
    }

    pub fn with_runner(runner: Arc<dyn CommandRunner>, config: &LedgerConfig, workdir: &Path) -> Self {
        Self {
            runner,
            binary: config.binary.clone(),
            workdir: workdir.to_path_buf(),
            timeout: Duration::from_millis(config.command_timeout_ms),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    fn invoke(&self, operation: &str, args: &[String]) -> GatewayResult<CommandOutput> {
        let invocation = Invocation {
            program: self.binary.clone(),
            args: args.to_vec(),
            cwd: self.workdir.clone(),
            timeout: self.timeout,
        };
        debug!(binary = %self.binary, ?args, "ledger invoke: {operation}");
        let output = self.runner.run(&invocation).map_err(|err| {
            let code = if err.kind() == io::ErrorKind::NotFound {
                GatewayErrorCode::ExecutableMissing
            } else {
                GatewayErrorCode::CommandError
            };
            GatewayError::new(code, operation)
        })?;
        if output.timed_out {
            warn!(timeout_ms = self.timeout.as_millis() as u64, "ledger {operation} timed out");
            return Err(GatewayError::new(GatewayErrorCode::Timeout, operation));
        }
        if !output.success() {
            debug!(
                code = ?output.code,
                stderr = %output.stderr.trim(),
                "ledger {operation} failed"
            );
        }
        Ok(output)
    }

    /// Checks the executable runs at all. Distinguishes a missing binary from a broken one.
    pub fn probe_version(&self) -> GatewayResult<String> {
        let output = self.invoke("version probe", &["--version".to_string()])?;
        if !output.success() {
            return Err(GatewayError::new(GatewayErrorCode::CommandError, "version probe"));
        }
        Ok(output.stdout.trim().to_string())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Initializes the ledger once per gateway, skipping it when the workdir already has ledger state.
    pub fn ensure_initialized(&self) -> GatewayResult<()> {
        if self.is_initialized() {
            return Ok(());
        }
        if self.workdir.join(LEDGER_STATE_DIR).is_dir() {
            self.initialized.store(true, Ordering::SeqCst);
            return Ok(());
        }
        self.initialize()
    }

    fn initialize(&self) -> GatewayResult<()> {
        let output = self.invoke("initialize", &["init".to_string(), "--quiet".to_string()])?;
        if output.success() || classify_failure(&output) == Signal::AlreadyInitialized {
            self.initialized.store(true, Ordering::SeqCst);
            return Ok(());
        }
        Err(GatewayError::new(GatewayErrorCode::CommandError, "initialize"))
    }

    /// Runs an operational command, re-initializing and retrying exactly once on "not initialized".
    pub fn exec(&self, operation: &str, args: &[String]) -> GatewayResult<String> {
        self.ensure_initialized()?;
        let mut attempt = Attempt::First;
        loop {
            let output = self.invoke(operation, args)?;
            if output.success() {
                return Ok(output.stdout);
            }
            match (classify_failure(&output), attempt) {
                (Signal::NotInitialized, Attempt::First) => {
                    warn!("ledger reported not initialized during {operation}; re-initializing once");
                    self.initialized.store(false, Ordering::SeqCst);
                    self.initialize()?;
                    attempt = Attempt::Retry;
                }
                (Signal::NotInitialized, Attempt::Retry) => {
                    return Err(GatewayError::new(GatewayErrorCode::NotInitialized, operation));
                }
                (Signal::NotFound, _) => {
                    return Err(GatewayError::new(GatewayErrorCode::NotFound, operation));
                }
                _ => return Err(GatewayError::new(GatewayErrorCode::CommandError, operation)),
            }
        }
    }

    pub fn exec_json<T: DeserializeOwned>(&self, operation: &str, args: &[String]) -> GatewayResult<T> {
        let stdout = self.exec(operation, args)?;
        serde_json::from_str(stdout.trim())
            .map_err(|_| GatewayError::new(GatewayErrorCode::ParseError, operation))
    }

    pub fn create(&self, record: &NewRecord) -> GatewayResult<String> {
        let operation = format!("create {} '{}'", record.kind.as_str(), record.title);
        let mut args = vec![
            "create".to_string(),
            record.title.clone(),
            "--type".to_string(),
            record.kind.as_str().to_string(),
            "--priority".to_string(),
            record.priority.native().to_string(),
        ];
        if let Some(parent) = &record.parent {
            args.push("--parent".to_string());
            args.push(parent.clone());
        }
        if !record.description.is_empty() {
            args.push("--description".to_string());
            args.push(record.description.clone());
        }
        args.push("--json".to_string());
        let value: Value = self.exec_json(&operation, &args)?;
        first_object(value)
            .and_then(|v| v.get("id").and_then(Value::as_str).map(str::to_string))
            .ok_or_else(|| GatewayError::new(GatewayErrorCode::ParseError, operation))
    }

    pub fn show(&self, id: &str) -> GatewayResult<LedgerRecord> {
        let operation = format!("show {id}");
        let value: Value = self.exec_json(
            &operation,
            &["show".to_string(), id.to_string(), "--json".to_string()],
        )?;
        let Some(obj) = first_object(value) else {
            return Err(GatewayError::new(GatewayErrorCode::NotFound, operation));
        };
        serde_json::from_value(obj).map_err(|_| GatewayError::new(GatewayErrorCode::ParseError, operation))
    }

    pub fn list_epics(&self) -> GatewayResult<Vec<LedgerRecord>> {
        self.list(
            "list epics",
            &["--type".to_string(), RecordKind::Epic.as_str().to_string()],
        )
    }

    pub fn list_children(&self, parent: &str) -> GatewayResult<Vec<LedgerRecord>> {
        let records = self.list(
            &format!("list children of {parent}"),
            &["--parent".to_string(), parent.to_string()],
        )?;
        Ok(records
            .into_iter()
            .filter(|r| r.parent.as_deref().is_none_or(|p| p == parent))
            .collect())
    }

    fn list(&self, operation: &str, filters: &[String]) -> GatewayResult<Vec<LedgerRecord>> {
        let mut args = vec!["list".to_string()];
        args.extend(filters.iter().cloned());
        args.push("--all".to_string());
        args.push("--json".to_string());
        let value: Value = self.exec_json(operation, &args)?;
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(serde_json::from_value)
                .collect::<Result<Vec<LedgerRecord>, _>>()
                .map_err(|_| GatewayError::new(GatewayErrorCode::ParseError, operation)),
            Value::Null => Ok(Vec::new()),
            _ => Err(GatewayError::new(GatewayErrorCode::ParseError, operation)),
        }
    }

    pub fn update_description(&self, id: &str, description: &str) -> GatewayResult<()> {
        self.exec(
            &format!("update description of {id}"),
            &[
                "update".to_string(),
                id.to_string(),
                "--description".to_string(),
                description.to_string(),
                "--json".to_string(),
            ],
        )
        .map(|_| ())
    }

    pub fn update_status(&self, id: &str, status: &str) -> GatewayResult<()> {
        self.exec(
            &format!("update status of {id}"),
            &[
                "update".to_string(),
                id.to_string(),
                "--status".to_string(),
                status.to_string(),
                "--json".to_string(),
            ],
        )
        .map(|_| ())
    }

    pub fn close(&self, id: &str, reason: &str) -> GatewayResult<()> {
        self.exec(
            &format!("close {id}"),
            &[
                "close".to_string(),
                id.to_string(),
                "--reason".to_string(),
                reason.to_string(),
                "--json".to_string(),
            ],
        )
        .map(|_| ())
    }

    pub fn delete(&self, id: &str) -> GatewayResult<()> {
        self.exec(
            &format!("delete {id}"),
            &[
                "delete".to_string(),
                id.to_string(),
                "--force".to_string(),
                "--json".to_string(),
            ],
        )
        .map(|_| ())
    }

    pub fn add_dependency(&self, id: &str, depends_on: &str) -> GatewayResult<()> {
        self.exec(
            &format!("add dependency {id} -> {depends_on}"),
            &[
                "dep".to_string(),
                "add".to_string(),
                id.to_string(),
                depends_on.to_string(),
                "--json".to_string(),
            ],
        )
        .map(|_| ())
    }

    /// Writes pending ledger mutations to its durable export.
    pub fn flush(&self) -> GatewayResult<()> {
        self.exec("flush", &["sync".to_string(), "--flush-only".to_string()])
            .map(|_| ())
    }

    /// Pulls the durable export back into the ledger's working database.
    pub fn import(&self) -> GatewayResult<()> {
        self.exec("import", &["sync".to_string(), "--import-only".to_string()])
            .map(|_| ())
    }
}

fn first_object(value: Value) -> Option<Value> {
    match value {
        Value::Object(_) => Some(value),
        Value::Array(items) => items.into_iter().find(Value::is_object),
        _ => None,
    }
}
