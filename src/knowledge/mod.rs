//! The in-process knowledge store: argument graph (B), command history (C),
//! sequence predictor (D), workflow learner (E), and context analyzer (F).
//!
//! Each sub-module owns its data structure and its own lock; the
//! [`crate::daemon::Daemon`] constructs one of each and hands out `Arc`
//! clones as a capability, per the no-global-state design note.

pub mod argument_graph;
pub mod context;
pub mod error;
pub mod history;
pub mod sequence;
pub mod workflow;

pub use argument_graph::ArgumentGraph;
pub use context::ContextAnalyzer;
pub use error::{KnowledgeError, KnowledgeResult};
pub use history::CommandHistory;
pub use sequence::SequencePredictor;
pub use workflow::WorkflowLearner;
