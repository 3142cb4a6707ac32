pub mod connection;
pub mod helpers;
mod migrations;
pub mod models;
pub mod repositories;

pub use connection::Database;
pub use models::{
    IntervalSource, Measurement, MeasurementStatus, ModeId, NewWalkingMode, StepInterval,
    WalkingMode,
};
