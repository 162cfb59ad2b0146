use crate::{
    correction::CorrectionError, cycles::CycleError, frame::FrameError, telemetry::TelemetryError,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Error in the `frame` module")]
    Frame(#[from] FrameError),
    #[error("Error in the `telemetry` module")]
    Telemetry(#[from] TelemetryError),
    #[error("Error in the `cycles` module")]
    Cycle(#[from] CycleError),
    #[error("Error in the `correction` module")]
    Correction(#[from] CorrectionError),
}
