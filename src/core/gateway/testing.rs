//! In-memory stand-in for the ledger CLI, used by unit and integration tests.

use super::{CommandOutput, CommandRunner, Invocation, LEDGER_STATE_DIR, LedgerRecord};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct State {
    initialized: bool,
    refuse_init: bool,
    stay_uninitialized: bool,
    next_id: u64,
    records: BTreeMap<String, LedgerRecord>,
    dependencies: BTreeMap<String, Vec<String>>,
    calls: Vec<Vec<String>>,
    failures: HashMap<String, usize>,
}

/// Simulates the subset of `bd` the gateway speaks, including its
/// initialization handshake and JSON error payloads.
#[derive(Debug, Default)]
pub struct FakeLedger {
    state: Mutex<State>,
}

impl FakeLedger {
    /// Stderr used for injected failures; must never surface in errors.
    pub const INTERNAL_FAILURE_TEXT: &'static str = "database is locked: sqlite busy (code 5)";

    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set_initialized(&self, initialized: bool) {
        self.state().initialized = initialized;
    }

    pub fn refuse_init(&self, refuse: bool) {
        self.state().refuse_init = refuse;
    }

    /// `init` reports success but the ledger keeps answering "not initialized".
    pub fn stay_uninitialized(&self, stay: bool) {
        self.state().stay_uninitialized = stay;
    }

    /// The next `times` invocations of `subcommand` fail with an opaque error.
    pub fn fail_next(&self, subcommand: &str, times: usize) {
        self.state().failures.insert(subcommand.to_string(), times);
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state().calls.clone()
    }

    pub fn count_calls(&self, subcommand: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.first().map(String::as_str) == Some(subcommand))
            .count()
    }

    pub fn count_sync(&self, flag: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.first().map(String::as_str) == Some("sync") && c.iter().any(|a| a == flag))
            .count()
    }

    pub fn record(&self, id: &str) -> Option<LedgerRecord> {
        self.state().records.get(id).cloned()
    }

    pub fn records(&self) -> Vec<LedgerRecord> {
        self.state().records.values().cloned().collect()
    }

    pub fn dependencies(&self, id: &str) -> Vec<String> {
        self.state().dependencies.get(id).cloned().unwrap_or_default()
    }

    /// Seeds a record directly, as if written by another tool.
    pub fn insert(&self, record: LedgerRecord) {
        self.state().records.insert(record.id.clone(), record);
    }

    /// Replaces a description out-of-band, as a human editing the ledger would.
    pub fn set_description(&self, id: &str, description: &str) {
        if let Some(record) = self.state().records.get_mut(id) {
            record.description = description.to_string();
        }
    }

    fn handle(&self, invocation: &Invocation) -> CommandOutput {
        let args = &invocation.args;
        let mut state = self.state();
        state.calls.push(args.clone());
        let sub = args.first().cloned().unwrap_or_default();

        if sub == "--version" {
            return ok("bd version 0.9.0 (fake)\n");
        }
        if sub == "init" {
            if state.refuse_init {
                return fail("permission denied");
            }
            if state.initialized {
                return fail_json("ALREADY_INITIALIZED", "beads already initialized here");
            }
            state.initialized = !state.stay_uninitialized;
            let _ = std::fs::create_dir_all(invocation.cwd.join(LEDGER_STATE_DIR));
            return ok("");
        }
        if !state.initialized {
            return fail_json("NOT_INITIALIZED", "no beads database found; run 'bd init'");
        }
        if let Some(remaining) = state.failures.get_mut(&sub) {
            if *remaining > 0 {
                *remaining -= 1;
                return fail(Self::INTERNAL_FAILURE_TEXT);
            }
        }

        match sub.as_str() {
            "create" => create(&mut state, args),
            "show" => match state.records.get(arg(args, 1)) {
                Some(record) => ok(&json!([record]).to_string()),
                None => not_found(arg(args, 1)),
            },
            "list" => {
                let kind = flag(args, "--type");
                let parent = flag(args, "--parent");
                let items: Vec<&LedgerRecord> = state
                    .records
                    .values()
                    .filter(|r| kind.is_none_or(|k| r.issue_type.as_deref() == Some(k)))
                    .filter(|r| parent.is_none_or(|p| r.parent.as_deref() == Some(p)))
                    .collect();
                ok(&json!(items).to_string())
            }
            "update" => {
                let id = arg(args, 1).to_string();
                let description = flag(args, "--description").map(str::to_string);
                let status = flag(args, "--status").map(str::to_string);
                let title = flag(args, "--title").map(str::to_string);
                let Some(record) = state.records.get_mut(&id) else {
                    return not_found(&id);
                };
                if let Some(d) = description {
                    record.description = d;
                }
                if let Some(s) = status {
                    record.status = s;
                }
                if let Some(t) = title {
                    record.title = t;
                }
                ok(&json!(record).to_string())
            }
            "close" => {
                let id = arg(args, 1).to_string();
                match state.records.get_mut(&id) {
                    Some(record) => {
                        record.status = "closed".to_string();
                        ok(&json!(record).to_string())
                    }
                    None => not_found(&id),
                }
            }
            "delete" => {
                let id = arg(args, 1).to_string();
                if state.records.remove(&id).is_none() {
                    return not_found(&id);
                }
                state.dependencies.remove(&id);
                for deps in state.dependencies.values_mut() {
                    deps.retain(|d| d != &id);
                }
                ok("{}")
            }
            "dep" => {
                let id = arg(args, 2).to_string();
                let target = arg(args, 3).to_string();
                if !state.records.contains_key(&id) {
                    return not_found(&id);
                }
                if !state.records.contains_key(&target) {
                    return not_found(&target);
                }
                let deps = state.dependencies.entry(id).or_default();
                if !deps.contains(&target) {
                    deps.push(target);
                }
                ok("{}")
            }
            "sync" => ok("ok\n"),
            other => fail(&format!("unknown command \"{other}\"")),
        }
    }
}

impl CommandRunner for FakeLedger {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        Ok(self.handle(invocation))
    }
}

fn create(state: &mut State, args: &[String]) -> CommandOutput {
    state.next_id += 1;
    let id = format!("bd-{}", state.next_id);
    let parent = flag(args, "--parent").map(str::to_string);
    if let Some(p) = &parent {
        if !state.records.contains_key(p) {
            return not_found(p);
        }
    }
    let record = LedgerRecord {
        id: id.clone(),
        title: arg(args, 1).to_string(),
        status: "open".to_string(),
        description: flag(args, "--description").unwrap_or_default().to_string(),
        issue_type: flag(args, "--type").map(str::to_string),
        parent,
        priority: flag(args, "--priority").and_then(|p| p.parse().ok()),
        created_at: Some(crate::core::time::now_iso()),
    };
    let out = json!(record).to_string();
    state.records.insert(id, record);
    ok(&out)
}

fn arg(args: &[String], index: usize) -> &str {
    args.get(index).map(String::as_str).unwrap_or_default()
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn ok(stdout: &str) -> CommandOutput {
    CommandOutput {
        code: Some(0),
        stdout: stdout.to_string(),
        stderr: String::new(),
        timed_out: false,
    }
}

fn fail(stderr: &str) -> CommandOutput {
    CommandOutput {
        code: Some(1),
        stdout: String::new(),
        stderr: format!("Error: {stderr}\n"),
        timed_out: false,
    }
}

fn fail_json(code: &str, message: &str) -> CommandOutput {
    let body: Value = json!({ "error": { "code": code, "message": message } });
    CommandOutput {
        code: Some(1),
        stdout: String::new(),
        stderr: body.to_string(),
        timed_out: false,
    }
}

fn not_found(id: &str) -> CommandOutput {
    fail_json("NOT_FOUND", &format!("issue {id} not found"))
}
