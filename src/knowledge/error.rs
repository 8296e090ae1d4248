//! Error type owned by the knowledge-store components (B-F).

use thiserror::Error;

pub type KnowledgeResult<T> = Result<T, KnowledgeError>;

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("capacity invariant violated for {what}: {detail}")]
    CapacityInvariant { what: &'static str, detail: String },

    #[error("{resource} lock was poisoned")]
    LockPoisoned { resource: &'static str },
}

impl KnowledgeError {
    pub fn capacity(what: &'static str, detail: impl Into<String>) -> Self {
        Self::CapacityInvariant {
            what,
            detail: detail.into(),
        }
    }
}
