pub mod api;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod state;

pub use api::WorkerRegistry;
pub use errors::RegistryError;
pub use model::{SessionStatus, WorkerSession};
pub use state::SessionRegistry;
