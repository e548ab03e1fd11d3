//! In-memory job stores.
//!
//! Both stores guard their state with a single mutex and never perform I/O
//! while holding it, so backend calls are always made outside the lock.

mod history;
mod inference;
mod training;

pub use history::{HistoryLog, HistoryRetention};
pub use inference::InferenceJobStore;
pub use training::TrainingJobStore;
