//! The wire-level `Event` sum type shipped to `/api/v1/ingest`.

use crate::metadata::Metadata;
use serde::{Deserialize, Serialize};

/// Whether an artifact fed a step as input, output, or neither
/// (minimal mode, via `capture`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactType {
    Input,
    Output,
}

/// A reference from a `step` event to a previously stored data blob.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "dataId")]
    pub data_id: String,
    #[serde(rename = "type")]
    pub artifact_type: Option<ArtifactType>,
}

/// A single event in the trace wire protocol. Events are value types:
/// once emitted they are never mutated.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "eventType", rename_all = "kebab-case")]
pub enum Event {
    TraceStart {
        #[serde(rename = "traceId")]
        trace_id: String,
        #[serde(rename = "projectId")]
        project_id: String,
        metadata: Metadata,
        #[serde(rename = "createdAt")]
        created_at: String,
    },
    TraceSuccess {
        #[serde(rename = "traceId")]
        trace_id: String,
        #[serde(rename = "projectId")]
        project_id: String,
        metadata: Metadata,
        #[serde(rename = "successMetadata")]
        success_metadata: Metadata,
        status: TraceEndStatus,
        #[serde(rename = "createdAt")]
        created_at: String,
        #[serde(rename = "endedAt")]
        ended_at: String,
    },
    TraceFailure {
        #[serde(rename = "traceId")]
        trace_id: String,
        #[serde(rename = "projectId")]
        project_id: String,
        metadata: Metadata,
        #[serde(rename = "successMetadata")]
        success_metadata: Metadata,
        status: TraceEndStatus,
        #[serde(rename = "createdAt")]
        created_at: String,
        #[serde(rename = "endedAt")]
        ended_at: String,
    },
    Step {
        #[serde(rename = "stepId")]
        step_id: String,
        #[serde(rename = "traceId")]
        trace_id: String,
        #[serde(rename = "projectId")]
        project_id: String,
        #[serde(rename = "stepName")]
        step_name: String,
        #[serde(rename = "stepNumber")]
        step_number: u64,
        artifacts: Vec<Artifact>,
        metadata: Metadata,
        timestamp: String,
    },
    Data {
        #[serde(rename = "dataId")]
        data_id: String,
        #[serde(rename = "traceId")]
        trace_id: String,
        #[serde(rename = "projectId")]
        project_id: String,
        key: String,
        metadata: Metadata,
        #[serde(rename = "dataPath")]
        data_path: Option<String>,
    },
}

/// Outcome of a trace's terminal `trace-success` / `trace-failure` event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceEndStatus {
    Success,
    Failure,
}
