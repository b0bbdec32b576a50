use thiserror::Error;

use crate::incremental::ResolutionPhase;

#[derive(Error, Debug)]
pub enum ResolveError {
    #[error(transparent)]
    Graph(#[from] neo4rs::Error),

    #[error("resolution phase mismatch: expected {expected}, found {found}")]
    Phase {
        expected: ResolutionPhase,
        found: ResolutionPhase,
    },
}
