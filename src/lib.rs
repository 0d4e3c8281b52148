//! Taskpilot coordinates browser-automation tasks across connected extension agents.
//!
//! The heavy lifting lives in the workspace crates; this crate wires them into an
//! application (`app_context`), speaks the agent protocol (`gateway`) and hosts the CLI.

pub mod app_context;
pub mod config;
pub mod gateway;
pub mod metrics;
pub mod runtime;
pub mod simulate;

pub use app_context::AppContext;
pub use config::AppConfig;
pub use gateway::{AgentGateway, GatewayError};
pub use simulate::SimulatedAgent;
