pub mod addr;
pub mod cli;
pub mod config;
pub mod db;
pub mod engine;
pub mod models;
pub mod probes;
pub mod report;
pub mod web;

pub use crate::config::{ConfigError, GameConfig, ServiceConfig, TeamConfig, VmConfig};
pub use crate::db::Db;
pub use crate::engine::{Engine, EngineError, EngineStatus};
pub use crate::probes::ProbeContext;
