pub mod app;
pub mod commands;
pub mod config;
pub mod context;
pub mod dispatch;
pub mod env;
pub mod info;
pub mod metrics;
pub mod output;
pub mod plan;
pub mod simulate;
