//! Line-oriented command protocol of the simulated instrument.
//!
//! Every request is one text command; every response is one JSON object on its
//! own line. The protocol is strictly request/response: a command's responses are
//! fully written before the next command is read.
//!
//! | Request              | Response lines                                        |
//! |----------------------|-------------------------------------------------------|
//! | `START_COLLECT`      | one [`MeasurementRecord`] per collect iteration        |
//! | `NEXT_POINT`         | `{"status":"success","next_point":<id>}`              |
//! | `RESET_POINT`        | `{"status":"success","reset_point":1}`                |
//! | `GET_STATUS`         | `{"status":"connected",...,"params":{...}}`           |
//! | `SET_PARAMS:<json>`  | `{"status":"success","msg":"params_updated"}`         |
//! | anything else        | `{"error":"unknown_command"}`                         |

use crate::device::{AcquisitionParameters, ParameterUpdate, SharedDevice, INITIAL_POINT_ID};
use crate::error::SimResult;
use crate::noise::NoiseSource;
use crate::record::{build_record, MeasurementRecord};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

/// Run one acquisition sequence.
pub const CMD_START_COLLECT: &str = "START_COLLECT";
/// Report the point id of the next record.
pub const CMD_NEXT_POINT: &str = "NEXT_POINT";
/// Reset the point id to 1.
pub const CMD_RESET_POINT: &str = "RESET_POINT";
/// Report device status and parameters.
pub const CMD_GET_STATUS: &str = "GET_STATUS";
/// Prefix of a parameter update; the JSON payload follows it.
pub const CMD_SET_PARAMS_PREFIX: &str = "SET_PARAMS:";

const STATUS_SUCCESS: &str = "success";
const STATUS_CONNECTED: &str = "connected";

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `START_COLLECT`
    StartCollect,
    /// `NEXT_POINT`
    NextPoint,
    /// `RESET_POINT`
    ResetPoint,
    /// `GET_STATUS`
    GetStatus,
    /// Everything after the first `:` of a `SET_PARAMS:` line, untouched.
    SetParams(String),
    /// Any other non-empty line, kept for logging.
    Unknown(String),
}

impl Command {
    /// Parse one request line. Returns `None` for an empty line, which ends the
    /// session.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }
        let command = match line {
            CMD_START_COLLECT => Command::StartCollect,
            CMD_NEXT_POINT => Command::NextPoint,
            CMD_RESET_POINT => Command::ResetPoint,
            CMD_GET_STATUS => Command::GetStatus,
            _ => match line.strip_prefix(CMD_SET_PARAMS_PREFIX) {
                Some(payload) => Command::SetParams(payload.to_string()),
                None => Command::Unknown(line.to_string()),
            },
        };
        Some(command)
    }
}

/// Recoverable protocol failures, reported to the client as `{"error": ...}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    /// The line matched no command.
    UnknownCommand,
    /// The `SET_PARAMS` payload was not a JSON object.
    ParseFailed,
}

impl ProtocolError {
    /// Error code sent in the `error` field.
    pub fn code(self) -> &'static str {
        match self {
            ProtocolError::UnknownCommand => "unknown_command",
            ProtocolError::ParseFailed => "parse_failed",
        }
    }
}

/// Body of the `GET_STATUS` response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusReport {
    /// Always `"connected"`.
    pub status: &'static str,
    /// Point id the next record will carry.
    pub current_point: i64,
    /// Battery voltage, two decimals.
    pub battery_voltage: f64,
    /// Enclosure temperature in degrees Celsius, one decimal.
    pub temperature: f64,
    /// Current acquisition parameters.
    pub params: AcquisitionParameters,
}

/// One response line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    /// One `START_COLLECT` record.
    Record(Box<MeasurementRecord>),
    /// Reply to `NEXT_POINT`.
    NextPoint {
        /// Always `"success"`.
        status: &'static str,
        /// Point id the next record will carry.
        next_point: i64,
    },
    /// Reply to `RESET_POINT`.
    ResetPoint {
        /// Always `"success"`.
        status: &'static str,
        /// Point id after the reset.
        reset_point: i64,
    },
    /// Reply to `GET_STATUS`.
    Status(StatusReport),
    /// Reply to an accepted `SET_PARAMS`.
    ParamsUpdated {
        /// Always `"success"`.
        status: &'static str,
        /// Always `"params_updated"`.
        msg: &'static str,
    },
    /// Recoverable failure, see [`ProtocolError`].
    Error {
        /// [`ProtocolError::code`] of the failure.
        error: &'static str,
    },
}

impl Response {
    /// Serialize to a single JSON line, newline included.
    pub fn to_line(&self) -> serde_json::Result<String> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl std::error::Error for ProtocolError {}

impl From<ProtocolError> for Response {
    fn from(err: ProtocolError) -> Self {
        Response::Error { error: err.code() }
    }
}

/// Settings of the `START_COLLECT` sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectSettings {
    /// Records emitted per collection.
    pub iterations: u32,
    /// Simulated acquisition time before each record.
    pub interval: Duration,
}

impl Default for CollectSettings {
    fn default() -> Self {
        Self {
            iterations: 3,
            interval: Duration::from_millis(300),
        }
    }
}

/// Interprets commands against the shared device.
///
/// Cloning is cheap; each connection handler gets its own clone.
#[derive(Debug, Clone)]
pub struct CommandProtocol {
    device: SharedDevice,
    noise: Arc<NoiseSource>,
    collect: CollectSettings,
}

impl CommandProtocol {
    /// Protocol over `device`, drawing noise from `noise`.
    pub fn new(device: SharedDevice, noise: Arc<NoiseSource>, collect: CollectSettings) -> Self {
        Self {
            device,
            noise,
            collect,
        }
    }

    /// Execute `command`, writing every response line to `out` as it is produced.
    ///
    /// Only write failures are returned; protocol failures are answered on the wire.
    pub async fn execute<W>(&self, command: Command, out: &mut W) -> SimResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        match command {
            Command::StartCollect => self.start_collect(out).await,
            Command::NextPoint => {
                let next_point = self.device.current_point().await;
                debug!(next_point, "Next point requested");
                write_response(
                    out,
                    &Response::NextPoint {
                        status: STATUS_SUCCESS,
                        next_point,
                    },
                )
                .await
            }
            Command::ResetPoint => {
                self.device.reset_point().await;
                info!("Point id reset to {}", INITIAL_POINT_ID);
                write_response(
                    out,
                    &Response::ResetPoint {
                        status: STATUS_SUCCESS,
                        reset_point: INITIAL_POINT_ID,
                    },
                )
                .await
            }
            Command::GetStatus => {
                let report = self.status_report().await;
                write_response(out, &Response::Status(report)).await
            }
            Command::SetParams(payload) => {
                let response = match self.set_params(&payload).await {
                    Ok(()) => Response::ParamsUpdated {
                        status: STATUS_SUCCESS,
                        msg: "params_updated",
                    },
                    Err(err) => err.into(),
                };
                write_response(out, &response).await
            }
            Command::Unknown(text) => {
                debug!(command = %text, "Unknown command");
                write_response(out, &Response::from(ProtocolError::UnknownCommand)).await
            }
        }
    }

    async fn start_collect<W>(&self, out: &mut W) -> SimResult<()>
    where
        W: AsyncWrite + Unpin,
    {
        info!(iterations = self.collect.iterations, "Starting collection");
        for _ in 0..self.collect.iterations {
            if !self.collect.interval.is_zero() {
                tokio::time::sleep(self.collect.interval).await;
            }
            let snapshot = self.device.snapshot_and_advance().await;
            let record = build_record(&snapshot, &self.noise);
            debug!(
                id = record.id,
                point_id = record.point_id,
                "Record generated"
            );
            write_response(out, &Response::Record(Box::new(record))).await?;
        }
        info!("Collection finished");
        Ok(())
    }

    /// Build a `GET_STATUS` report with freshly drawn battery and temperature.
    pub async fn status_report(&self) -> StatusReport {
        let state = self.device.state().await;
        let battery: f64 = self.noise.gen_range(11.8..=12.5);
        let temperature: f64 = self.noise.gen_range(25.0..=35.0);
        StatusReport {
            status: STATUS_CONNECTED,
            current_point: state.current_point_id,
            battery_voltage: round_to(battery, 2),
            temperature: round_to(temperature, 1),
            params: state.parameters,
        }
    }

    async fn set_params(&self, payload: &str) -> Result<(), ProtocolError> {
        let update = ParameterUpdate::parse(payload).map_err(|e| {
            warn!(error = %e, "Failed to parse parameters");
            ProtocolError::ParseFailed
        })?;
        if update.is_empty() {
            debug!("SET_PARAMS carried no recognized parameters");
        }
        let params = self.device.update_parameters(update).await;
        info!(?params, "Parameters updated");
        Ok(())
    }
}

async fn write_response<W>(out: &mut W, response: &Response) -> SimResult<()>
where
    W: AsyncWrite + Unpin,
{
    let line = response.to_line().map_err(std::io::Error::from)?;
    out.write_all(line.as_bytes()).await?;
    out.flush().await?;
    Ok(())
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn protocol() -> CommandProtocol {
        CommandProtocol::new(
            SharedDevice::default(),
            Arc::new(NoiseSource::new(Some(42))),
            CollectSettings {
                iterations: 3,
                interval: Duration::ZERO,
            },
        )
    }

    async fn run(protocol: &CommandProtocol, line: &str) -> Vec<Value> {
        let mut out = Vec::new();
        let command = Command::parse(line).unwrap();
        protocol.execute(command, &mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with('\n'));
        text.lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect()
    }

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("START_COLLECT"), Some(Command::StartCollect));
        assert_eq!(Command::parse("  NEXT_POINT\r\n"), Some(Command::NextPoint));
        assert_eq!(Command::parse("RESET_POINT"), Some(Command::ResetPoint));
        assert_eq!(Command::parse("GET_STATUS\n"), Some(Command::GetStatus));
        assert_eq!(Command::parse(""), None);
        assert_eq!(Command::parse(" \r\n"), None);
        assert_eq!(
            Command::parse("start_collect"),
            Some(Command::Unknown("start_collect".to_string()))
        );
    }

    #[test]
    fn test_parse_set_params_splits_on_first_colon() {
        assert_eq!(
            Command::parse(r#"SET_PARAMS:{"custom": "a:b:c"}"#),
            Some(Command::SetParams(r#"{"custom": "a:b:c"}"#.to_string()))
        );
        assert_eq!(
            Command::parse("SET_PARAMS:"),
            Some(Command::SetParams(String::new()))
        );
        assert_eq!(
            Command::parse("SET_PARAMS"),
            Some(Command::Unknown("SET_PARAMS".to_string()))
        );
    }

    #[test]
    fn test_error_response_shape() {
        let line = Response::from(ProtocolError::UnknownCommand).to_line().unwrap();
        assert_eq!(line, "{\"error\":\"unknown_command\"}\n");
        let line = Response::from(ProtocolError::ParseFailed).to_line().unwrap();
        assert_eq!(line, "{\"error\":\"parse_failed\"}\n");

        for err in [ProtocolError::UnknownCommand, ProtocolError::ParseFailed] {
            assert_eq!(err.to_string(), err.code());
        }
    }

    #[tokio::test]
    async fn test_start_collect_emits_records_in_order() {
        let protocol = protocol();
        let records = run(&protocol, "START_COLLECT").await;

        assert_eq!(records.len(), 3);
        let points: Vec<i64> = records.iter().map(|r| r["Data_PointID"].as_i64().unwrap()).collect();
        let ids: Vec<i64> = records.iter().map(|r| r["ID"].as_i64().unwrap()).collect();
        assert_eq!(points, vec![1, 6, 11]);
        assert_eq!(ids, vec![1, 2, 3]);

        let next = run(&protocol, "NEXT_POINT").await;
        assert_eq!(next[0]["next_point"], 16);
    }

    #[tokio::test]
    async fn test_next_point_does_not_advance() {
        let protocol = protocol();
        for _ in 0..3 {
            let resp = run(&protocol, "NEXT_POINT").await;
            assert_eq!(resp[0]["status"], "success");
            assert_eq!(resp[0]["next_point"], 1);
        }
    }

    #[tokio::test]
    async fn test_reset_point() {
        let protocol = protocol();
        run(&protocol, "START_COLLECT").await;

        let resp = run(&protocol, "RESET_POINT").await;
        assert_eq!(resp[0]["status"], "success");
        assert_eq!(resp[0]["reset_point"], 1);

        let next = run(&protocol, "NEXT_POINT").await;
        assert_eq!(next[0]["next_point"], 1);

        // Record ids keep counting after a point reset
        let records = run(&protocol, "START_COLLECT").await;
        assert_eq!(records[0]["ID"], 4);
        assert_eq!(records[0]["Data_PointID"], 1);
    }

    #[tokio::test]
    async fn test_get_status() {
        let protocol = protocol();
        let resp = run(&protocol, "GET_STATUS").await;
        let status = &resp[0];

        assert_eq!(status["status"], "connected");
        assert_eq!(status["current_point"], 1);
        let battery = status["battery_voltage"].as_f64().unwrap();
        assert!((11.8..=12.5).contains(&battery));
        assert_eq!((battery * 100.0).round() / 100.0, battery);
        let temperature = status["temperature"].as_f64().unwrap();
        assert!((25.0..=35.0).contains(&temperature));
        assert_eq!((temperature * 10.0).round() / 10.0, temperature);

        let params = &status["params"];
        assert_eq!(params["send_current"], 10.0);
        assert_eq!(params["sample_rate"], 51200);
        assert_eq!(params["stack_count"], 16);
        assert_eq!(params["sample_time"], 2048);
        assert_eq!(params["custom"], "");
    }

    #[tokio::test]
    async fn test_set_params_then_status() {
        let protocol = protocol();
        let resp = run(&protocol, r#"SET_PARAMS:{"sample_rate": 204800, "unknown": true}"#).await;
        assert_eq!(resp[0]["status"], "success");
        assert_eq!(resp[0]["msg"], "params_updated");

        let status = run(&protocol, "GET_STATUS").await;
        assert_eq!(status[0]["params"]["sample_rate"], 204800);
        assert_eq!(status[0]["params"]["stack_count"], 16);

        // The new rate flows into emitted records
        let records = run(&protocol, "START_COLLECT").await;
        assert_eq!(records[0]["RecvFs"], 204800.0);
    }

    #[tokio::test]
    async fn test_set_params_parse_failure_keeps_params() {
        let protocol = protocol();
        run(&protocol, r#"SET_PARAMS:{"stack_count": 64}"#).await;

        let resp = run(&protocol, "SET_PARAMS:not-json").await;
        assert_eq!(resp.len(), 1);
        assert_eq!(resp[0], serde_json::json!({"error": "parse_failed"}));

        let status = run(&protocol, "GET_STATUS").await;
        assert_eq!(status[0]["params"]["stack_count"], 64);
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let protocol = protocol();
        let resp = run(&protocol, "FOO_BAR").await;
        assert_eq!(resp, vec![serde_json::json!({"error": "unknown_command"})]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_pauses_before_each_record() {
        let protocol = CommandProtocol::new(
            SharedDevice::default(),
            Arc::new(NoiseSource::new(Some(42))),
            CollectSettings::default(),
        );
        let started = tokio::time::Instant::now();
        let records = run(&protocol, "START_COLLECT").await;
        assert_eq!(records.len(), 3);
        assert!(started.elapsed() >= Duration::from_millis(900));
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(12.345_6, 2), 12.35);
        assert_eq!(round_to(27.04, 1), 27.0);
    }
}
