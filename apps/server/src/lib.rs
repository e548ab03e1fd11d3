//! Gantry Server - HTTP front end for the job orchestrators.

pub mod api;
pub mod shutdown;
pub mod state;

pub use api::router;
pub use state::AppState;
