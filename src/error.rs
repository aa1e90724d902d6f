use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Failure of an external media tool (ffmpeg / ffprobe) invocation.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("{tool} not found, install it or point the config at it")]
    NotFound { tool: String },

    #[error("failed to run {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} failed with code {code:?}: {stderr}")]
    Failed {
        operation: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("{operation} timed out after {}s", .timeout.as_secs())]
    TimedOut {
        operation: String,
        timeout: Duration,
    },

    #[error("{operation} produced no output at {path}")]
    MissingOutput { operation: String, path: String },

    #[error("could not parse probe output: {0}")]
    Parse(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Failure of the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("connection pool error: {0}")]
    Pool(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid stored value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Job-level failures surfaced by the orchestrator, dispatcher and stream generator.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("video {0} not found")]
    VideoNotFound(Uuid),

    #[error("video {0} is already being processed")]
    AlreadyProcessing(Uuid),

    #[error("video {id} is {status}, expected {expected}")]
    InvalidState {
        id: Uuid,
        status: String,
        expected: &'static str,
    },

    #[error("Insufficient disk space: {}MB free, {}MB required", .available / MB, .required / MB)]
    InsufficientDiskSpace { available: u64, required: u64 },

    #[error("{0} is not available")]
    ToolUnavailable(String),

    #[error("metadata extraction failed: {0}")]
    Metadata(String),

    #[error("no active encoding profiles")]
    NoProfiles,

    #[error("all encoding profiles failed")]
    AllProfilesFailed,

    #[error("queue error: {0}")]
    Queue(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

const MB: u64 = 1024 * 1024;

pub type Result<T, E = PipelineError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disk_space_message_is_in_megabytes() {
        let err = PipelineError::InsufficientDiskSpace {
            available: 512 * MB,
            required: 1024 * MB,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient disk space: 512MB free, 1024MB required"
        );
    }

    #[test]
    fn timeout_message_reports_seconds() {
        let err = ToolError::TimedOut {
            operation: "encode_720p".into(),
            timeout: Duration::from_secs(3600),
        };
        assert_eq!(err.to_string(), "encode_720p timed out after 3600s");
    }
}
