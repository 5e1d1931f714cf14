pub mod audit;
pub mod compat;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod freeze;
pub mod memory_backend;
pub mod orchestrator;
pub mod payload;
pub mod profile;
pub mod reliability;
pub mod sdk;
pub mod selected_unit;
pub mod session;
pub mod telemetry;
pub mod types;

pub use error::{Result, TrainerError};
