//! Uniform `{ success, data?, err? }` response envelope.

use crate::outcome::{failure_codes, JobOutcome};
use serde::{Deserialize, Serialize};

/// Response envelope for a finished job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Whether the job succeeded
    pub success: bool,
    /// Success payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub err: Option<EnvelopeError>,
}

/// Error part of a [`ResponseEnvelope`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeError {
    /// Error code
    pub code: i32,
    /// Human readable message
    pub msg: String,
    /// Extra data from the executor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl ResponseEnvelope {
    /// Successful envelope.
    pub fn success(data: serde_json::Value) -> Self {
        Self { success: true, data: Some(data), err: None }
    }

    /// Failed envelope.
    pub fn error(code: i32, msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            err: Some(EnvelopeError { code, msg: msg.into(), data: None }),
        }
    }
}

impl<T: Serialize> JobOutcome<T> {
    /// Convert into a response envelope.
    ///
    /// Fails only if the success value cannot be represented as JSON.
    pub fn to_envelope(&self) -> Result<ResponseEnvelope, serde_json::Error> {
        Ok(match self {
            JobOutcome::Succeeded(value) => ResponseEnvelope::success(serde_json::to_value(value)?),
            JobOutcome::Failed(failure) => ResponseEnvelope {
                success: false,
                data: None,
                err: Some(EnvelopeError {
                    code: failure.code,
                    msg: failure.message.clone(),
                    data: failure.data.clone(),
                }),
            },
            JobOutcome::TimedOut { after } => ResponseEnvelope::error(
                failure_codes::JOB_TIMEOUT,
                format!("job timed out after {}ms", after.as_millis()),
            ),
        })
    }
}
