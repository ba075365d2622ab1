pub mod api;
pub mod badge;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod init;
pub mod model;
pub mod report;
pub mod rule_engine;
pub mod scheduler;
pub mod server;
pub mod stats;
pub mod store;
