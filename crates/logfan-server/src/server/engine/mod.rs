//! The streaming engine: one reader per run feeding worker groups of
//! emitters that deliver into a shared sink.

pub mod controller;
pub mod emitter;
pub mod memory;
pub mod metrics;
pub mod reader;
pub mod sink;
pub mod state;

pub use controller::{ControllerSettings, RunController, StopReport};
