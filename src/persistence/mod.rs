pub mod controller;
pub mod flush_worker;

pub use controller::FlushController;
