//! Core library for the completion/prediction daemon: parsing, the
//! in-process knowledge store, the PCD directory-completion engine,
//! persistence, caching, IPC, sensitivity filtering, and feedback ingest.
//!
//! [`daemon::Daemon`] is the composition root; `main.rs` is a thin
//! entrypoint that builds a [`config::Config`], constructs a `Daemon`, and
//! wires it to process signals.

pub mod cache;
pub mod config;
pub mod daemon;
pub mod ingest;
pub mod ipc;
pub mod knowledge;
pub mod parser;
pub mod pcd;
pub mod sensitivity;
pub mod storage;
