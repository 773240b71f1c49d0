use std::{fmt, io};

use http::status::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Error as JsonError;
use thiserror::Error;

/// Coarse classification of a [`TraceGraphError`], stable across message changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotFound,
    DuplicateId,
    DuplicateName,
    DuplicateTraceEdge,
    DanglingTraceReference,
    SelfTrace,
    InvalidOperation,
    CycleDetected,
    StaleComputation,
    SyncConflict,
    Config,
    Io,
    Persistence,
    Serialization,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
pub enum TraceGraphError {
    #[error("Operation {op_index}: {entity} '{id}' not found")]
    NotFound {
        op_index: usize,
        entity: EntityKind,
        id: String,
    },
    #[error("Operation {op_index}: {entity} id '{id}' is already in use in this version")]
    DuplicateId {
        op_index: usize,
        entity: EntityKind,
        id: String,
    },
    #[error("Operation {op_index}: artifact name '{name}' is already used by '{existing}'")]
    DuplicateName {
        op_index: usize,
        name: String,
        existing: String,
    },
    #[error("Operation {op_index}: a trace link {source_id} -> {target_id} already exists ('{existing}')")]
    DuplicateTraceEdge {
        op_index: usize,
        source_id: String,
        target_id: String,
        existing: String,
    },
    #[error("Operation {op_index}: trace link '{trace_id}' references missing artifact '{artifact_id}'")]
    DanglingTraceReference {
        op_index: usize,
        trace_id: String,
        artifact_id: String,
    },
    #[error("Operation {op_index}: trace link '{trace_id}' links artifact '{artifact_id}' to itself")]
    SelfTrace {
        op_index: usize,
        trace_id: String,
        artifact_id: String,
    },
    #[error("Operation {op_index}: {reason}")]
    InvalidOperation { op_index: usize, reason: String },
    #[error("Hierarchy cycle through: {}", .0.join(", "))]
    CycleDetected(Vec<String>),
    #[error("Computation started at epoch {started_epoch}/generation {started_generation} is stale (now {epoch}/{generation})")]
    StaleComputation {
        started_epoch: u64,
        started_generation: u64,
        epoch: u64,
        generation: u64,
    },
    #[error("Remote change to '{0}' overwrote an unsynced local edit")]
    SyncConflict(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("File System error: {0}")]
    Io(String),
    #[error("Persistence service error: {0}")]
    Persistence(String),
    #[error("(De)Serialization error: {0}")]
    Serialization(String),
}

/// The entity family an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Artifact,
    TraceLink,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Artifact => write!(f, "artifact"),
            EntityKind::TraceLink => write!(f, "trace link"),
        }
    }
}

impl TraceGraphError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TraceGraphError::NotFound { .. } => ErrorKind::NotFound,
            TraceGraphError::DuplicateId { .. } => ErrorKind::DuplicateId,
            TraceGraphError::DuplicateName { .. } => ErrorKind::DuplicateName,
            TraceGraphError::DuplicateTraceEdge { .. } => ErrorKind::DuplicateTraceEdge,
            TraceGraphError::DanglingTraceReference { .. } => ErrorKind::DanglingTraceReference,
            TraceGraphError::SelfTrace { .. } => ErrorKind::SelfTrace,
            TraceGraphError::InvalidOperation { .. } => ErrorKind::InvalidOperation,
            TraceGraphError::CycleDetected(_) => ErrorKind::CycleDetected,
            TraceGraphError::StaleComputation { .. } => ErrorKind::StaleComputation,
            TraceGraphError::SyncConflict(_) => ErrorKind::SyncConflict,
            TraceGraphError::Config(_) => ErrorKind::Config,
            TraceGraphError::Io(_) => ErrorKind::Io,
            TraceGraphError::Persistence(_) => ErrorKind::Persistence,
            TraceGraphError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Index of the offending operation within the rejected batch, if the error came from
    /// batch validation.
    pub fn op_index(&self) -> Option<usize> {
        match self {
            TraceGraphError::NotFound { op_index, .. }
            | TraceGraphError::DuplicateId { op_index, .. }
            | TraceGraphError::DuplicateName { op_index, .. }
            | TraceGraphError::DuplicateTraceEdge { op_index, .. }
            | TraceGraphError::DanglingTraceReference { op_index, .. }
            | TraceGraphError::SelfTrace { op_index, .. }
            | TraceGraphError::InvalidOperation { op_index, .. } => Some(*op_index),
            _ => None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            TraceGraphError::NotFound { .. } => StatusCode::NOT_FOUND,
            TraceGraphError::DuplicateId { .. } => StatusCode::CONFLICT,
            TraceGraphError::DuplicateName { .. } => StatusCode::CONFLICT,
            TraceGraphError::DuplicateTraceEdge { .. } => StatusCode::CONFLICT,
            TraceGraphError::DanglingTraceReference { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            TraceGraphError::SelfTrace { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            TraceGraphError::InvalidOperation { .. } => StatusCode::BAD_REQUEST,
            TraceGraphError::CycleDetected(_) => StatusCode::OK,
            TraceGraphError::StaleComputation { .. } => StatusCode::NO_CONTENT,
            TraceGraphError::SyncConflict(_) => StatusCode::CONFLICT,
            TraceGraphError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TraceGraphError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
            TraceGraphError::Persistence(_) => StatusCode::BAD_GATEWAY,
            TraceGraphError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<toml::de::Error> for TraceGraphError {
    fn from(src: toml::de::Error) -> TraceGraphError {
        TraceGraphError::Config(format!("Toml deserialization error: {src}"))
    }
}

impl From<toml::ser::Error> for TraceGraphError {
    fn from(src: toml::ser::Error) -> TraceGraphError {
        TraceGraphError::Serialization(format!("Toml serialization error: {src}"))
    }
}

impl From<JsonError> for TraceGraphError {
    fn from(src: JsonError) -> TraceGraphError {
        TraceGraphError::Serialization(format!("JSON (de)serialization error: {src}"))
    }
}

impl From<io::Error> for TraceGraphError {
    fn from(x: io::Error) -> Self {
        TraceGraphError::Io(format!("IOError: {} ({x})", x.kind()))
    }
}
