pub mod compat;
pub mod config;
pub mod reliability;
pub mod sdk_ops;
