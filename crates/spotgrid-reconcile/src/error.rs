//! Errors returned by external collaborators.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use spotgrid_core::AgentId;

pub type FleetResult<T> = Result<T, FleetApiError>;

pub type ServerResult<T> = Result<T, BuildServerError>;

/// Broad failure class, used to pick how a phase reports a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Authorization,
    NotFound,
    Client,
    Timeout,
}

/// Errors from the fleet provider.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum FleetApiError {
    #[error("provided credentials could not be validated: {0}")]
    AuthFailure(String),

    #[error("provided credentials lack permissions for operation: {0}")]
    Unauthorized(String),

    #[error("provided fleet ID does not match regex: {0}")]
    InvalidParameter(String),

    #[error("fleet ID not valid in current region: {0}")]
    NotFound(String),

    #[error("fleet service error {code}: {message}")]
    Service { code: String, message: String },

    #[error("fleet client error: {0}")]
    Client(String),
}

impl FleetApiError {
    /// Map a provider error code onto a variant.
    pub fn from_service_code(code: &str, message: &str) -> Self {
        let message = message.to_string();
        match code {
            "AuthFailure" => Self::AuthFailure(message),
            "UnauthorizedOperation" => Self::Unauthorized(message),
            "InvalidParameterValue" => Self::InvalidParameter(message),
            "InvalidSpotFleetRequestId.NotFound" => Self::NotFound(message),
            _ => Self::Service {
                code: code.to_string(),
                message,
            },
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AuthFailure(_) | Self::Unauthorized(_) => ErrorClass::Authorization,
            Self::InvalidParameter(_) | Self::NotFound(_) => ErrorClass::NotFound,
            Self::Service { .. } | Self::Client(_) => ErrorClass::Client,
        }
    }
}

/// Errors from the build server (queue, agent registry, execution tracker).
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum BuildServerError {
    #[error("timed out removing agent {agent_id}")]
    Timeout { agent_id: AgentId },

    #[error("build server unavailable: {0}")]
    Unavailable(String),
}

impl BuildServerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Timeout { .. } => ErrorClass::Timeout,
            Self::Unavailable(_) => ErrorClass::Client,
        }
    }
}
