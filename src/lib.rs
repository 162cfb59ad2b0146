//! Flux radiometer telemetry parsing and dark current correction.
//!
//! The instrument records four spectrometer channels (zenith/nadir viewing
//! directions, Si/InGaAs detectors) into fixed-layout binary acquisition
//! files, alternating between shutter-open (light) and shutter-closed (dark)
//! cycles. This crate decodes the files into quality-flagged time series and
//! subtracts the dark current baseline interpolated from the dark cycles
//! bracketing each light cycle, per channel and per integration time.

pub mod channel;
pub mod correction;
pub mod cycles;
mod error;
pub mod frame;
pub mod telemetry;

pub use channel::{Channel, Detector, ViewDirection};
pub use correction::{
    dark_correction, CorrectionConfig, CorrectionError, CorrectionMode, DarkCorrection,
    GroupCorrection, SeriesCorrection,
};
pub use cycles::{segment, CycleError, DarkCycles, Segmentation};
pub use error::Error;
pub use frame::{
    Frame, FrameError, TimeStamp, HEADER_LEN, NUM_CHANNELS, NUM_SAMPLES, NUM_TEMPERATURES,
    RECORD_LEN,
};
pub use telemetry::{Telemetry, TelemetryError, TelemetryLoader, TimeSource};
