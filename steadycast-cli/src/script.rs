//! Scripted fault injection for simulated sessions.
//!
//! A script is a comma separated list of `kind@seconds` entries, e.g.
//! `net@3,media@5,other@9,stall@12`.

use std::str::FromStr;
use std::time::Duration;

use steadycast_engine::EngineEvent;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScriptError {
    #[error("entry `{0}` is not of the form kind@seconds")]
    Malformed(String),

    #[error("unknown fault kind `{0}` (expected net, media, other or stall)")]
    UnknownKind(String),

    #[error("invalid offset `{0}`")]
    InvalidOffset(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Network,
    Media,
    Other,
    /// Runtime pause of the sink without an engine event.
    Stall,
}

impl FaultKind {
    /// The engine event for this fault, if it is reported by the engine.
    pub fn event(&self, at: Duration) -> Option<EngineEvent> {
        let detail = format!("scripted fault at {:.1}s", at.as_secs_f64());
        match self {
            Self::Network => Some(EngineEvent::network(detail)),
            Self::Media => Some(EngineEvent::media(detail)),
            Self::Other => Some(EngineEvent::other(detail)),
            Self::Stall => None,
        }
    }
}

impl FromStr for FaultKind {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "net" | "network" => Ok(Self::Network),
            "media" => Ok(Self::Media),
            "other" => Ok(Self::Other),
            "stall" => Ok(Self::Stall),
            _ => Err(ScriptError::UnknownKind(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptedFault {
    pub at: Duration,
    pub kind: FaultKind,
}

/// Faults ordered by offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultScript {
    faults: Vec<ScriptedFault>,
}

impl FaultScript {
    pub fn faults(&self) -> &[ScriptedFault] {
        &self.faults
    }

    pub fn is_empty(&self) -> bool {
        self.faults.is_empty()
    }
}

impl FromStr for FaultScript {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut faults = s
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(parse_entry)
            .collect::<Result<Vec<_>, _>>()?;
        faults.sort_by_key(|fault| fault.at);
        Ok(Self { faults })
    }
}

fn parse_entry(entry: &str) -> Result<ScriptedFault, ScriptError> {
    let (kind, offset) = entry
        .split_once('@')
        .ok_or_else(|| ScriptError::Malformed(entry.to_string()))?;
    let secs: f64 = offset
        .trim()
        .parse()
        .map_err(|_| ScriptError::InvalidOffset(offset.to_string()))?;
    if !secs.is_finite() || secs < 0.0 {
        return Err(ScriptError::InvalidOffset(offset.to_string()));
    }
    Ok(ScriptedFault {
        at: Duration::from_secs_f64(secs),
        kind: kind.trim().parse()?,
    })
}
