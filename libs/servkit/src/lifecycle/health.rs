//! Health stages, probe contract and response payloads.

use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The three query stages served under `/health/{stage}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStage {
    Startup,
    Readiness,
    Liveliness,
}

/// Unrecognized stage names stay representable so the endpoint can answer
/// 500 instead of failing routing.
#[derive(Debug, thiserror::Error)]
#[error("unknown health check stage '{stage}'")]
pub struct UnknownStageError {
    pub stage: String,
}

impl FromStr for HealthStage {
    type Err = UnknownStageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "startup" => Ok(Self::Startup),
            "readiness" => Ok(Self::Readiness),
            "liveliness" => Ok(Self::Liveliness),
            other => Err(UnknownStageError {
                stage: other.to_owned(),
            }),
        }
    }
}

impl std::fmt::Display for HealthStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Startup => "startup",
            Self::Readiness => "readiness",
            Self::Liveliness => "liveliness",
        };
        f.write_str(name)
    }
}

/// Tri-state health verdict as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HealthState {
    Up,
    Down,
    Unknown,
}

/// What a probe reports back: a verdict plus free-form diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub state: HealthState,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl ProbeResult {
    #[must_use]
    pub fn up() -> Self {
        Self {
            state: HealthState::Up,
            data: serde_json::Value::Null,
        }
    }

    #[must_use]
    pub fn down(data: serde_json::Value) -> Self {
        Self {
            state: HealthState::Down,
            data,
        }
    }
}

/// Pluggable health check. Implementations must be side-effect free; the
/// orchestrator may call them at any frequency.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> anyhow::Result<ProbeResult>;
}

/// Default probe: always reports up.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysUpProbe;

#[async_trait]
impl HealthProbe for AlwaysUpProbe {
    async fn check(&self) -> anyhow::Result<ProbeResult> {
        Ok(ProbeResult::up())
    }
}

/// One line of a health response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckEntry {
    pub name: String,
    pub state: HealthState,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Body of every health endpoint answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthState,
    pub checks: Vec<HealthCheckEntry>,
}

impl HealthResponse {
    #[must_use]
    pub fn single(name: impl Into<String>, state: HealthState, data: serde_json::Value) -> Self {
        Self {
            status: state,
            checks: vec![HealthCheckEntry {
                name: name.into(),
                state,
                data,
            }],
        }
    }
}
