#![forbid(unsafe_code)]

pub mod backend;
pub mod config;
pub mod console;
pub mod delivery;
pub mod errors;
pub mod models;
pub mod policy;
pub mod realtime;
pub mod workflow;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
