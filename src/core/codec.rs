//! Versioned artifacts embedded in ledger free-text fields.
//!
//! A carrier is a record's description. Structured artifacts live in one
//! delimited block holding a JSON object keyed by artifact kind; whatever
//! precedes the block is the record's primary content (the spec of a task,
//! the plan of a feature). Writing one kind never drops the others.

use crate::core::error::{Result, TaskhiveError};
use crate::core::model::{Feature, TaskRecord, TASK_SCHEMA_VERSION};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

pub const BLOCK_BEGIN: &str = "<!-- taskhive:artifacts:begin -->";
pub const BLOCK_END: &str = "<!-- taskhive:artifacts:end -->";

const SCHEMA_KEY: &str = "schemaVersion";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    FeatureState,
    TaskState,
    PlanApproval,
    PlanComments,
    Report,
    Spec,
    WorkerPrompt,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactKind::FeatureState => "feature_state",
            ArtifactKind::TaskState => "task_state",
            ArtifactKind::PlanApproval => "plan_approval",
            ArtifactKind::PlanComments => "plan_comments",
            ArtifactKind::Report => "report",
            ArtifactKind::Spec => "spec",
            ArtifactKind::WorkerPrompt => "worker_prompt",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A payload that can be stored in a carrier under its kind.
pub trait Artifact: Serialize + DeserializeOwned {
    const KIND: ArtifactKind;
    const SCHEMA_VERSION: u32;
}

impl Artifact for TaskRecord {
    const KIND: ArtifactKind = ArtifactKind::TaskState;
    const SCHEMA_VERSION: u32 = TASK_SCHEMA_VERSION;
}

impl Artifact for Feature {
    const KIND: ArtifactKind = ArtifactKind::FeatureState;
    const SCHEMA_VERSION: u32 = 1;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanApproval {
    pub approved_at: String,
    pub plan_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
}

impl Artifact for PlanApproval {
    const KIND: ArtifactKind = ArtifactKind::PlanApproval;
    const SCHEMA_VERSION: u32 = 1;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanComment {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub body: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanComments {
    #[serde(default)]
    pub comments: Vec<PlanComment>,
}

impl Artifact for PlanComments {
    const KIND: ArtifactKind = ArtifactKind::PlanComments;
    const SCHEMA_VERSION: u32 = 1;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub content: String,
    pub updated_at: String,
}

impl Artifact for Report {
    const KIND: ArtifactKind = ArtifactKind::Report;
    const SCHEMA_VERSION: u32 = 1;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPrompt {
    pub content: String,
    pub updated_at: String,
}

impl Artifact for WorkerPrompt {
    const KIND: ArtifactKind = ArtifactKind::WorkerPrompt;
    const SCHEMA_VERSION: u32 = 1;
}

/// Marker stored for the `spec` kind; the spec text itself is the carrier prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpecMarker {
    #[serde(default)]
    pub length: usize,
}

impl Artifact for SpecMarker {
    const KIND: ArtifactKind = ArtifactKind::Spec;
    const SCHEMA_VERSION: u32 = 1;
}

pub fn encode<A: Artifact>(artifact: &A) -> Result<Value> {
    let mut value = serde_json::to_value(artifact)?;
    match value.as_object_mut() {
        Some(obj) => {
            obj.insert(SCHEMA_KEY.to_string(), Value::from(A::SCHEMA_VERSION));
        }
        None => {
            return Err(TaskhiveError::ValidationError(format!(
                "{} artifact must encode to an object",
                A::KIND
            )));
        }
    }
    Ok(value)
}

/// Decodes a payload, accepting any schema version up to the current one.
/// Payloads written before versioning carry no `schemaVersion` and count as v1.
pub fn decode<A: Artifact>(value: &Value) -> Result<A> {
    let version = value
        .get(SCHEMA_KEY)
        .and_then(Value::as_u64)
        .unwrap_or(1);
    if version > u64::from(A::SCHEMA_VERSION) {
        return Err(TaskhiveError::ValidationError(format!(
            "{} artifact has schema v{}, newer than supported v{}",
            A::KIND,
            version,
            A::SCHEMA_VERSION
        )));
    }
    Ok(serde_json::from_value(value.clone())?)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Carrier {
    prefix: String,
    artifacts: Map<String, Value>,
    has_block: bool,
    /// Text someone appended after the block; kept so rewrites don't drop it.
    suffix: String,
}

impl Carrier {
    pub fn parse(text: &str) -> Result<Self> {
        let Some(begin) = text.find(BLOCK_BEGIN) else {
            return Ok(Self {
                prefix: text.to_string(),
                ..Self::default()
            });
        };
        let body_start = begin + BLOCK_BEGIN.len();
        let Some(end_rel) = text[body_start..].find(BLOCK_END) else {
            return Err(TaskhiveError::ValidationError(
                "artifact block has no end marker".to_string(),
            ));
        };
        let body = text[body_start..body_start + end_rel].trim();
        let artifacts = if body.is_empty() {
            Map::new()
        } else {
            match serde_json::from_str::<Value>(body) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(TaskhiveError::ValidationError(
                        "artifact block must hold a JSON object".to_string(),
                    ));
                }
                Err(err) => {
                    return Err(TaskhiveError::ValidationError(format!(
                        "artifact block is not valid JSON: {err}"
                    )));
                }
            }
        };
        Ok(Self {
            prefix: text[..begin].trim_end().to_string(),
            artifacts,
            has_block: true,
            suffix: text[body_start + end_rel + BLOCK_END.len()..].trim().to_string(),
        })
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn set_prefix(&mut self, prefix: &str) {
        self.prefix = prefix.trim_end().to_string();
    }

    /// False for legacy carriers written before artifacts existed.
    pub fn has_block(&self) -> bool {
        self.has_block
    }

    pub fn kinds(&self) -> Vec<String> {
        self.artifacts.keys().cloned().collect()
    }

    pub fn contains(&self, kind: ArtifactKind) -> bool {
        self.artifacts.contains_key(kind.as_str())
    }

    pub fn get<A: Artifact>(&self) -> Result<Option<A>> {
        self.artifacts
            .get(A::KIND.as_str())
            .map(decode::<A>)
            .transpose()
    }

    pub fn put<A: Artifact>(&mut self, artifact: &A) -> Result<()> {
        self.artifacts
            .insert(A::KIND.as_str().to_string(), encode(artifact)?);
        self.has_block = true;
        Ok(())
    }

    pub fn remove(&mut self, kind: ArtifactKind) {
        self.artifacts.remove(kind.as_str());
    }

    /// Stores `content` as the primary text and marks it as a spec.
    pub fn put_spec(&mut self, content: &str) -> Result<()> {
        self.set_prefix(content);
        self.put(&SpecMarker {
            length: content.trim_end().len(),
        })
    }

    /// The spec text: the prefix when a spec was written through the codec,
    /// or the whole carrier when it predates artifact blocks.
    pub fn spec(&self) -> Option<String> {
        if !self.has_block {
            return (!self.prefix.trim().is_empty()).then(|| self.prefix.clone());
        }
        self.contains(ArtifactKind::Spec).then(|| self.prefix.clone())
    }

    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    pub fn render(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        if !self.prefix.is_empty() {
            parts.push(self.prefix.clone());
        }
        if !self.artifacts.is_empty() {
            let body = serde_json::to_string_pretty(&Value::Object(self.artifacts.clone()))
                .unwrap_or_else(|_| "{}".to_string());
            parts.push(format!("{BLOCK_BEGIN}\n{body}\n{BLOCK_END}"));
        }
        if !self.suffix.is_empty() {
            parts.push(self.suffix.clone());
        }
        let mut out = parts.join("\n\n");
        if !self.artifacts.is_empty() || !self.suffix.is_empty() {
            out.push('\n');
        }
        out
    }
}

/// Reads `kind` out of a carrier text.
pub fn read<A: Artifact>(text: &str) -> Result<Option<A>> {
    Carrier::parse(text)?.get::<A>()
}

/// Writes one artifact into a carrier text, keeping every other stored kind.
pub fn upsert<A: Artifact>(text: &str, artifact: &A) -> Result<String> {
    let mut carrier = Carrier::parse(text)?;
    carrier.put(artifact)?;
    Ok(carrier.render())
}

pub fn decode_spec(text: &str) -> Result<Option<String>> {
    Ok(Carrier::parse(text)?.spec())
}
