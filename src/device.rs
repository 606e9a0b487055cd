//! Process-wide device state shared by every connection.
//!
//! The real instrument has a single point counter and a single record counter, so
//! a command on one connection is visible on all others. [`SharedDevice`] is a
//! cheap-to-clone handle; every read-modify-write runs under one lock, which makes
//! concurrent collections interleave record by record but never lose an increment.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

/// Point id after power-up and after `RESET_POINT`.
pub const INITIAL_POINT_ID: i64 = 1;
/// Record id of the first record emitted by the process.
pub const INITIAL_RECORD_ID: i64 = 1;
/// Point id advance per emitted record.
pub const POINT_STEP: i64 = 5;

/// Acquisition parameters reported by `GET_STATUS` and set by `SET_PARAMS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionParameters {
    /// Transmitter current in amps.
    pub send_current: f64,
    /// Receive sampling rate in Hz.
    pub sample_rate: i64,
    /// Number of stacked transients per record.
    pub stack_count: i64,
    /// Samples per transient window.
    pub sample_time: i64,
    /// Free-form operator text.
    pub custom: String,
}

impl Default for AcquisitionParameters {
    fn default() -> Self {
        Self {
            send_current: 10.0,
            sample_rate: 51200,
            stack_count: 16,
            sample_time: 2048,
            custom: String::new(),
        }
    }
}

/// Error returned when a `SET_PARAMS` payload is not a JSON object.
#[derive(Debug, thiserror::Error)]
pub enum ParameterParseError {
    /// Payload is not valid JSON.
    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload is valid JSON but not an object.
    #[error("Expected a JSON object, got {0}")]
    NotAnObject(&'static str),
}

/// Partial update of [`AcquisitionParameters`].
///
/// Only the recognized keys are represented. A field left as `None` is not
/// touched by [`AcquisitionParameters::apply`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterUpdate {
    /// New transmitter current.
    pub send_current: Option<f64>,
    /// New receive sampling rate.
    pub sample_rate: Option<i64>,
    /// New stack count.
    pub stack_count: Option<i64>,
    /// New samples per window.
    pub sample_time: Option<i64>,
    /// New operator text.
    pub custom: Option<String>,
}

impl ParameterUpdate {
    /// Parse a `SET_PARAMS` payload.
    ///
    /// Unknown keys are ignored. A recognized key whose value has the wrong type is
    /// skipped with a warning; the rest of the update still applies.
    pub fn parse(payload: &str) -> Result<Self, ParameterParseError> {
        let value: Value = serde_json::from_str(payload)?;
        match value {
            Value::Object(map) => Ok(Self::from_map(&map)),
            other => Err(ParameterParseError::NotAnObject(json_type_name(&other))),
        }
    }

    fn from_map(map: &Map<String, Value>) -> Self {
        let mut update = Self::default();
        for (key, value) in map {
            let accepted = match key.as_str() {
                "send_current" => value.as_f64().map(|v| update.send_current = Some(v)),
                "sample_rate" => as_integer(value).map(|v| update.sample_rate = Some(v)),
                "stack_count" => as_integer(value).map(|v| update.stack_count = Some(v)),
                "sample_time" => as_integer(value).map(|v| update.sample_time = Some(v)),
                "custom" => value.as_str().map(|v| update.custom = Some(v.to_string())),
                _ => continue,
            };
            if accepted.is_none() {
                warn!(key = %key, value = %value, "Ignoring parameter with unexpected type");
            }
        }
        update
    }

    /// True when no recognized key was present.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Accept integers, and floats with no fractional part.
fn as_integer(value: &Value) -> Option<i64> {
    value.as_i64().or_else(|| {
        value
            .as_f64()
            .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
            .map(|f| f as i64)
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl AcquisitionParameters {
    /// Overwrite every field present in `update`.
    pub fn apply(&mut self, update: ParameterUpdate) {
        if let Some(v) = update.send_current {
            self.send_current = v;
        }
        if let Some(v) = update.sample_rate {
            self.sample_rate = v;
        }
        if let Some(v) = update.stack_count {
            self.stack_count = v;
        }
        if let Some(v) = update.sample_time {
            self.sample_time = v;
        }
        if let Some(v) = update.custom {
            self.custom = v;
        }
    }
}

/// Values captured for one record before the counters advance.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSnapshot {
    /// Point id written to `Data_PointID`.
    pub point_id: i64,
    /// Record id written to `ID`.
    pub record_id: i64,
    /// Parameters in effect for the record.
    pub parameters: AcquisitionParameters,
}

/// Counters and parameters of the simulated instrument.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceState {
    /// Point id of the next record, reported by `NEXT_POINT`.
    pub current_point_id: i64,
    /// Id of the next record.
    pub next_record_id: i64,
    /// Current acquisition parameters.
    pub parameters: AcquisitionParameters,
}

impl DeviceState {
    /// Power-up state with the given parameters.
    pub fn new(parameters: AcquisitionParameters) -> Self {
        Self {
            current_point_id: INITIAL_POINT_ID,
            next_record_id: INITIAL_RECORD_ID,
            parameters,
        }
    }

    /// Capture the values for the next record, then advance both counters.
    pub fn snapshot_and_advance(&mut self) -> DeviceSnapshot {
        let snapshot = DeviceSnapshot {
            point_id: self.current_point_id,
            record_id: self.next_record_id,
            parameters: self.parameters.clone(),
        };
        self.next_record_id += 1;
        self.current_point_id += POINT_STEP;
        snapshot
    }

    /// Return the point counter to [`INITIAL_POINT_ID`]; record ids keep counting.
    pub fn reset_point(&mut self) {
        self.current_point_id = INITIAL_POINT_ID;
    }
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new(AcquisitionParameters::default())
    }
}

/// Shared handle to the single [`DeviceState`] of the process.
#[derive(Debug, Clone, Default)]
pub struct SharedDevice {
    state: Arc<RwLock<DeviceState>>,
}

impl SharedDevice {
    /// Fresh device state with the given parameters.
    pub fn new(parameters: AcquisitionParameters) -> Self {
        Self {
            state: Arc::new(RwLock::new(DeviceState::new(parameters))),
        }
    }

    /// See [`DeviceState::snapshot_and_advance`].
    pub async fn snapshot_and_advance(&self) -> DeviceSnapshot {
        self.state.write().await.snapshot_and_advance()
    }

    /// See [`DeviceState::reset_point`].
    pub async fn reset_point(&self) {
        self.state.write().await.reset_point();
    }

    /// Apply `update` and return the resulting parameters.
    pub async fn update_parameters(&self, update: ParameterUpdate) -> AcquisitionParameters {
        let mut state = self.state.write().await;
        state.parameters.apply(update);
        state.parameters.clone()
    }

    /// Point id the next record will carry.
    pub async fn current_point(&self) -> i64 {
        self.state.read().await.current_point_id
    }

    /// Copy of the current parameters.
    pub async fn parameters(&self) -> AcquisitionParameters {
        self.state.read().await.parameters.clone()
    }

    /// Copy of the whole state, for status reports and tests.
    pub async fn state(&self) -> DeviceState {
        self.state.read().await.clone()
    }
}
