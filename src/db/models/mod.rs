pub mod measurement;
pub mod step_interval;
pub mod walking_mode;

pub use measurement::{Measurement, MeasurementStatus};
pub use step_interval::{IntervalSource, StepInterval};
pub use walking_mode::{ModeId, NewWalkingMode, WalkingMode};
