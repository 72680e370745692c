pub mod api;
pub mod api_keys;
pub mod cli;
pub mod clock;
pub mod config;
pub mod job;
pub mod localization;
pub mod media;
pub mod metrics;
pub mod node;
pub mod orchestrator;
pub mod persistence;
pub mod platform;
pub mod policy;
pub mod provider;
pub mod rate_limit;
pub mod reply;
pub mod scheduler;
pub mod setup;
pub mod tables;
pub mod telemetry;
pub mod utils;
