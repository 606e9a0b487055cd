//! # TEM Device Simulator
//!
//! Emulates a transient-electromagnetic measurement instrument over its
//! line-based TCP command protocol, so control panels and acquisition pipelines
//! can be exercised without hardware. Records carry synthetic waveforms with the
//! same framing, schema and value ranges as genuine captures.
//!
//! ## Crate Structure
//!
//! - **`waveform`**: noise-free envelopes and noisy sample generation for the
//!   `recv`, `send` and `off` signal classes.
//! - **`noise`**: the seedable, shared randomness source.
//! - **`record`**: the `MeasurementRecord` wire schema and the base64 big-endian
//!   waveform codec.
//! - **`device`**: point/record counters and acquisition parameters shared by all
//!   connections.
//! - **`protocol`**: command parsing and the request/response state machine.
//! - **`server`**: TCP accept loop and per-connection handlers.
//! - **`config`**, **`logging`**, **`error`**: configuration loading, tracing
//!   setup and the crate error type.

pub mod config;
pub mod device;
pub mod error;
pub mod logging;
pub mod noise;
pub mod protocol;
pub mod record;
pub mod server;
pub mod waveform;

pub use config::SimConfig;
pub use device::{AcquisitionParameters, SharedDevice};
pub use error::{SimError, SimResult};
pub use protocol::{Command, CommandProtocol, Response};
pub use record::MeasurementRecord;
pub use server::SimulatorServer;
pub use waveform::WaveformClass;
