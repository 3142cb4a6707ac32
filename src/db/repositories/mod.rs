pub mod measurements;
pub mod step_intervals;
pub mod walking_modes;
