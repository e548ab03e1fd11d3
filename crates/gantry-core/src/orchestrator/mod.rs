//! Job orchestrators.
//!
//! [`TrainingJobOrchestrator`] places training jobs on the container backend
//! while it has free capacity and on the remote batch backend otherwise, then
//! tracks them to completion. [`InferenceJobOrchestrator`] provisions a remote
//! service environment per job and hands back its endpoint.

mod inference;
mod training;

use serde::{Deserialize, Serialize};

pub use inference::InferenceJobOrchestrator;
pub use training::TrainingJobOrchestrator;

/// Which job a training delete removes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// While any container job is active, delete the requested id from the
    /// container partition only; otherwise from the remote partition.
    #[default]
    ContainerFirst,
    /// While any container job is active, delete the earliest-admitted
    /// container job whatever id was requested; otherwise the requested id
    /// from the remote partition.
    OldestContainer,
    /// Delete the requested id from whichever active partition holds it.
    ById,
}
