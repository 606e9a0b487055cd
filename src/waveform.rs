//! Synthetic waveform generation.
//!
//! Three signal classes are produced, matching the value ranges of real captures:
//!
//! | Class  | Shape                                  | Nominal range |
//! |--------|----------------------------------------|---------------|
//! | `recv` | decaying 5-cycle oscillation           | -1 ..= 10 V   |
//! | `send` | bipolar square wave, reversal at t=0.5 | -40 ..= 40 A  |
//! | `off`  | fast turn-off decay with undershoot    | -80 ..= 40 V  |
//!
//! Each sample is `envelope(class, t) + U(-a, a)` with `t = i / length` and
//! `a = noise_amplitude(class, t)`. The envelope is deterministic so it can be
//! checked analytically; the noise comes from an injected generator.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// Start of the `send` polarity transition, as a fraction of the window.
pub const SEND_EDGE_START: f64 = 0.45;
/// End of the `send` polarity transition.
pub const SEND_EDGE_END: f64 = 0.55;
/// Plateau amplitude of the drive current in amps.
pub const SEND_PLATEAU: f64 = 38.0;

/// Physical signal class of a waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaveformClass {
    /// Received voltage transient.
    Recv,
    /// Transmitter drive current.
    Send,
    /// Turn-off response.
    Off,
}

impl WaveformClass {
    /// All classes, in wire order.
    pub const ALL: [WaveformClass; 3] = [WaveformClass::Recv, WaveformClass::Send, WaveformClass::Off];

    /// Lowercase name, as accepted by [`FromStr`].
    pub fn as_str(self) -> &'static str {
        match self {
            WaveformClass::Recv => "recv",
            WaveformClass::Send => "send",
            WaveformClass::Off => "off",
        }
    }
}

impl fmt::Display for WaveformClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WaveformClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "recv" => Ok(WaveformClass::Recv),
            "send" => Ok(WaveformClass::Send),
            "off" => Ok(WaveformClass::Off),
            _ => Err(format!("Unknown waveform class: {}", s)),
        }
    }
}

/// Noise-free value of `class` at normalized position `t` in `[0, 1)`.
pub fn envelope(class: WaveformClass, t: f64) -> f64 {
    match class {
        WaveformClass::Recv => 10.0 * (-3.0 * t).exp() * (2.0 * PI * 5.0 * t).sin(),
        WaveformClass::Send => {
            if t < SEND_EDGE_START {
                SEND_PLATEAU
            } else if t < SEND_EDGE_END {
                // Linear ramp from +38 down to -38 across the edge window
                let progress = (t - SEND_EDGE_START) / (SEND_EDGE_END - SEND_EDGE_START);
                SEND_PLATEAU * (1.0 - progress) * 2.0 - SEND_PLATEAU
            } else {
                -SEND_PLATEAU
            }
        }
        WaveformClass::Off => {
            38.0 * (-8.0 * t).exp() - 77.0 * (1.0 - (-2.0 * t).exp()) * (-5.0 * t).exp()
        }
    }
}

/// Half-width of the uniform noise added to `class` at position `t`.
pub fn noise_amplitude(class: WaveformClass, t: f64) -> f64 {
    match class {
        WaveformClass::Recv => 0.3,
        WaveformClass::Send if (SEND_EDGE_START..SEND_EDGE_END).contains(&t) => 2.0,
        WaveformClass::Send => 1.0,
        WaveformClass::Off => 2.0,
    }
}

/// Generate `length` samples of `class`, drawing noise from `rng`.
///
/// `length == 0` yields an empty vector.
pub fn generate<R: Rng + ?Sized>(length: usize, class: WaveformClass, rng: &mut R) -> Vec<f64> {
    (0..length)
        .map(|i| {
            let t = i as f64 / length as f64;
            let a = noise_amplitude(class, t);
            envelope(class, t) + rng.gen_range(-a..a)
        })
        .collect()
}
