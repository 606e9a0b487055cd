//! Measurement record schema and waveform codec.
//!
//! Waveforms travel as base64 text of concatenated big-endian IEEE-754 doubles:
//!
//! ```text
//! +-----------+-----------+-----+-------------+
//! | f64 BE #0 | f64 BE #1 | ... | f64 BE #n-1 |  -> base64 (standard, padded)
//! +-----------+-----------+-----+-------------+
//! ```
//!
//! Field names of [`MeasurementRecord`] are part of the client compatibility
//! surface and are serialized verbatim, in declaration order.

use crate::device::DeviceSnapshot;
use crate::noise::NoiseSource;
use crate::waveform::{generate, WaveformClass};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Samples in the main receive window.
pub const RECV_SAMPLES: usize = 655;
/// Samples in each of the two auxiliary receive windows.
pub const RECV_AUX_SAMPLES: usize = 100;
/// Samples in the transmit and turn-off windows.
pub const SEND_SAMPLES: usize = 500;

/// `DeviceType` of every record.
pub const DEVICE_TYPE: i64 = 1;
/// `PERIOD` of every record.
pub const PERIOD: i64 = 500;
/// Turn-off window sampling rate in Hz.
pub const SAMPLE_OFF_FS: f64 = 2_000_000.0;
/// Transmit window sampling rate in Hz.
pub const SAMPLE_SEND_FS: f64 = 2_000_000.0;
/// Transmitter base frequency in Hz.
pub const SEND_FS: f64 = 25.0;
/// `TYPE` flag of every record.
pub const RECORD_TYPE: i64 = 1;
/// `USE` flag of every record.
pub const RECORD_USE: i64 = 1;

const SAMPLE_BYTES: usize = std::mem::size_of::<f64>();

/// Errors that can occur when decoding a waveform field.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Text is not standard padded base64.
    #[error("Invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Decoded byte count is not a whole number of samples.
    #[error("Decoded length {0} is not a multiple of 8 bytes")]
    Length(usize),
}

/// Encode samples as base64 text of big-endian doubles, without line breaks.
pub fn encode_waveform(samples: &[f64]) -> String {
    let mut bytes = Vec::with_capacity(samples.len() * SAMPLE_BYTES);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_be_bytes());
    }
    STANDARD.encode(bytes)
}

/// Inverse of [`encode_waveform`].
pub fn decode_waveform(text: &str) -> Result<Vec<f64>, CodecError> {
    let bytes = STANDARD.decode(text)?;
    if bytes.len() % SAMPLE_BYTES != 0 {
        return Err(CodecError::Length(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(SAMPLE_BYTES)
        .map(|chunk| {
            let mut raw = [0u8; SAMPLE_BYTES];
            raw.copy_from_slice(chunk);
            f64::from_be_bytes(raw)
        })
        .collect())
}

/// One synthesized acquisition, as sent to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementRecord {
    /// Main receive window, 655 samples.
    #[serde(rename = "DATA_RECV")]
    pub data_recv: String,
    /// First auxiliary receive window, 100 samples.
    #[serde(rename = "DATA_RECV_LEN")]
    pub data_recv_len: String,
    /// Second auxiliary receive window, 100 samples.
    #[serde(rename = "DATA_RECV_POS")]
    pub data_recv_pos: String,
    /// Transmitter current, 500 samples.
    #[serde(rename = "DATA_SEND")]
    pub data_send: String,
    /// Turn-off response, 500 samples.
    #[serde(rename = "DATA_SOFF")]
    pub data_soff: String,
    /// Measurement point id.
    #[serde(rename = "Data_PointID")]
    pub point_id: i64,
    /// Always [`DEVICE_TYPE`].
    #[serde(rename = "DeviceType")]
    pub device_type: i64,
    /// Process-wide record id.
    #[serde(rename = "ID")]
    pub id: i64,
    /// Always null on the wire.
    #[serde(rename = "NOTE")]
    pub note: Option<String>,
    /// Always [`PERIOD`].
    #[serde(rename = "PERIOD")]
    pub period: i64,
    /// Receive sampling rate in Hz.
    #[serde(rename = "RecvFs")]
    pub recv_fs: f64,
    /// Always [`SAMPLE_OFF_FS`].
    #[serde(rename = "SampleOffFs")]
    pub sample_off_fs: f64,
    /// Always [`SAMPLE_SEND_FS`].
    #[serde(rename = "SampleSendFs")]
    pub sample_send_fs: f64,
    /// Always [`SEND_FS`].
    #[serde(rename = "SendFs")]
    pub send_fs: f64,
    /// Transmitter current in amps.
    #[serde(rename = "SendCurrent")]
    pub send_current: f64,
    /// Stacked transients.
    #[serde(rename = "StackCount")]
    pub stack_count: i64,
    /// Acquisition start, milliseconds since the Unix epoch.
    #[serde(rename = "StartTime")]
    pub start_time: i64,
    /// Always [`RECORD_TYPE`].
    #[serde(rename = "TYPE")]
    pub record_type: i64,
    /// Always [`RECORD_USE`].
    #[serde(rename = "USE")]
    pub record_use: i64,
}

impl MeasurementRecord {
    /// Waveform fields paired with their wire names, in wire order.
    pub fn waveforms(&self) -> [(&'static str, &str); 5] {
        [
            ("DATA_RECV", self.data_recv.as_str()),
            ("DATA_RECV_LEN", self.data_recv_len.as_str()),
            ("DATA_RECV_POS", self.data_recv_pos.as_str()),
            ("DATA_SEND", self.data_send.as_str()),
            ("DATA_SOFF", self.data_soff.as_str()),
        ]
    }
}

/// Sample count and value bounds of one decoded waveform field.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformSummary {
    /// Wire name of the field.
    pub field: &'static str,
    /// Number of decoded samples.
    pub samples: usize,
    /// Smallest sample, `+inf` when empty.
    pub min: f64,
    /// Largest sample, `-inf` when empty.
    pub max: f64,
}

/// Decode every waveform of `record` and summarize it, in wire order.
///
/// Fails on the first field that does not decode.
pub fn summarize(record: &MeasurementRecord) -> Result<Vec<WaveformSummary>, CodecError> {
    record
        .waveforms()
        .into_iter()
        .map(|(field, text)| {
            let samples = decode_waveform(text)?;
            Ok(WaveformSummary {
                field,
                samples: samples.len(),
                min: samples.iter().copied().fold(f64::INFINITY, f64::min),
                max: samples.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            })
        })
        .collect()
}

/// Synthesize the five waveforms and assemble a record for `snapshot`.
pub fn build_record(snapshot: &DeviceSnapshot, noise: &NoiseSource) -> MeasurementRecord {
    let (recv, recv_len, recv_pos, send, soff) = noise.with_rng(|rng| {
        (
            generate(RECV_SAMPLES, WaveformClass::Recv, rng),
            generate(RECV_AUX_SAMPLES, WaveformClass::Recv, rng),
            generate(RECV_AUX_SAMPLES, WaveformClass::Recv, rng),
            generate(SEND_SAMPLES, WaveformClass::Send, rng),
            generate(SEND_SAMPLES, WaveformClass::Off, rng),
        )
    });

    MeasurementRecord {
        data_recv: encode_waveform(&recv),
        data_recv_len: encode_waveform(&recv_len),
        data_recv_pos: encode_waveform(&recv_pos),
        data_send: encode_waveform(&send),
        data_soff: encode_waveform(&soff),
        point_id: snapshot.point_id,
        device_type: DEVICE_TYPE,
        id: snapshot.record_id,
        note: None,
        period: PERIOD,
        recv_fs: snapshot.parameters.sample_rate as f64,
        sample_off_fs: SAMPLE_OFF_FS,
        sample_send_fs: SAMPLE_SEND_FS,
        send_fs: SEND_FS,
        send_current: snapshot.parameters.send_current,
        stack_count: snapshot.parameters.stack_count,
        start_time: Utc::now().timestamp_millis(),
        record_type: RECORD_TYPE,
        record_use: RECORD_USE,
    }
}
