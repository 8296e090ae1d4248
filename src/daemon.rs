//! Owning construction and lifecycle for every component.
//!
//! Deliberately not a `OnceLock`-backed global singleton: every component is
//! constructed once in [`Daemon::new`] and handed down as an explicit `Arc`,
//! so tests can build an isolated daemon and nothing in this crate reaches
//! for ambient global state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::cache::CompletionCache;
use crate::config::Config;
use crate::ingest::FeedbackIngest;
use crate::ipc::IpcServer;
use crate::knowledge::argument_graph::ArgumentGraph;
use crate::knowledge::context::ContextAnalyzer;
use crate::knowledge::history::CommandHistory;
use crate::knowledge::sequence::SequencePredictor;
use crate::knowledge::workflow::WorkflowLearner;
use crate::pcd::PcdEngine;
use crate::sensitivity::SensitivityFilter;
use crate::storage::database::{DatabaseManager, DatabaseOptions};
use crate::storage::error::StorageResult;
use crate::storage::paths::StoragePaths;
use crate::storage::repo::CompletionRepo;

/// How often the background persistence task flushes learner deltas to
/// disk, independent of the explicit flush on shutdown.
const PERSIST_INTERVAL: Duration = Duration::from_secs(60);

pub struct Daemon {
    config: Arc<Config>,
    db: Arc<DatabaseManager>,
    argument_graph: Arc<ArgumentGraph>,
    history: Arc<CommandHistory>,
    sequence: Arc<SequencePredictor>,
    workflow: Arc<WorkflowLearner>,
    #[allow(dead_code)]
    context_analyzer: Arc<ContextAnalyzer>,
    ingest: Arc<FeedbackIngest>,
    ipc: Arc<IpcServer>,
}

/// Order of n-gram prediction (bigram): fixed per §4.D, not configurable.
const SEQUENCE_ORDER: usize = 2;
const MAX_CONCURRENT_CONNECTIONS: usize = 64;

impl Daemon {
    pub async fn new(config: Config, app_dir: PathBuf, socket_path: PathBuf) -> StorageResult<Self> {
        let config = Arc::new(config);

        let paths = StoragePaths::new(app_dir)?;
        let db_options = DatabaseOptions {
            wal: true,
            busy_timeout: config.wal_busy_timeout,
            ..DatabaseOptions::default()
        };
        let db = Arc::new(DatabaseManager::new(&paths, &db_options).await?);

        let argument_graph = Arc::new(ArgumentGraph::new(config.max_commands, config.max_arguments_per_command));
        let history = Arc::new(CommandHistory::new(config.history_capacity));
        let sequence = Arc::new(SequencePredictor::new(SEQUENCE_ORDER, config.sequence_f_min));
        let workflow = Arc::new(WorkflowLearner::new(
            config.workflow_max_time_delta,
            config.workflow_min_confidence,
            config.argument_decay_days,
        ));
        let context_analyzer = Arc::new(ContextAnalyzer::new(10));
        let pcd = Arc::new(PcdEngine::new(Arc::clone(&config)));
        let cache = Arc::new(CompletionCache::new(config.cache_capacity));
        let sensitivity = Arc::new(SensitivityFilter::new(config.ignore_patterns.clone()));

        {
            let repo = CompletionRepo::new(&db);
            repo.load_argument_graph(&argument_graph).await?;
            repo.load_history(&history, config.history_capacity).await?;
            repo.load_sequences(&sequence).await?;
            repo.load_workflows(&workflow).await?;
        }

        let ingest = FeedbackIngest::new(
            Arc::clone(&argument_graph),
            Arc::clone(&history),
            Arc::clone(&sequence),
            Arc::clone(&workflow),
            sensitivity,
            SEQUENCE_ORDER,
        );

        let ipc = Arc::new(IpcServer::new(
            socket_path,
            Arc::clone(&cache),
            Arc::clone(&argument_graph),
            Arc::clone(&history),
            Arc::clone(&sequence),
            Arc::clone(&workflow),
            Arc::clone(&context_analyzer),
            Arc::clone(&pcd),
            Arc::clone(&config),
            MAX_CONCURRENT_CONNECTIONS,
        ));

        Ok(Self {
            config,
            db,
            argument_graph,
            history,
            sequence,
            workflow,
            context_analyzer,
            ingest,
            ipc,
        })
    }

    pub fn ingest(&self) -> &Arc<FeedbackIngest> {
        &self.ingest
    }

    /// Run the IPC server and periodic persistence task until `shutdown` is
    /// signalled via the returned handle's future completing, or the process
    /// receives a termination signal (handled by the caller in `main`).
    pub async fn run(self: Arc<Self>) {
        let ipc = Arc::clone(&self.ipc);
        let ipc_task = tokio::spawn(async move {
            if let Err(err) = ipc.serve().await {
                warn!(%err, "ipc server exited with error");
            }
        });

        let persist_handle = Arc::clone(&self);
        let persist_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PERSIST_INTERVAL);
            loop {
                ticker.tick().await;
                persist_handle.persist().await;
            }
        });

        let _ = tokio::join!(ipc_task, persist_task);
    }

    /// Flush every learner's delta to disk. Safe to call repeatedly; errors
    /// are logged and never propagated, matching §7's `PersistenceBusy`
    /// recovery (learning continues in memory regardless of save failures).
    pub async fn persist(&self) {
        let repo = CompletionRepo::new(&self.db);
        if let Err(err) = repo.save_argument_graph(&self.argument_graph).await {
            warn!(%err, "failed to persist argument graph");
        }
        if let Err(err) = repo.save_history(&self.history, self.config.history_capacity).await {
            warn!(%err, "failed to persist history");
        }
        if let Err(err) = repo.save_sequences(&self.sequence).await {
            warn!(%err, "failed to persist sequence predictor");
        }
        if let Err(err) = repo.save_workflows(&self.workflow).await {
            warn!(%err, "failed to persist workflow learner");
        }
        if let Err(err) = repo.enforce_command_cap(self.config.max_commands as i64).await {
            warn!(%err, "failed to enforce command cap");
        }
        info!("persisted learner state");
    }

    /// Orderly shutdown: stop accepting IPC connections, wait for in-flight
    /// handlers, then persist once more so the last session's learning
    /// survives the process exit.
    pub async fn shutdown(&self) {
        self.ipc.dispose().await;
        self.persist().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn seed_sql(sql_dir: &std::path::Path) {
        tokio::fs::create_dir_all(sql_dir).await.unwrap();
        tokio::fs::copy(
            concat!(env!("CARGO_MANIFEST_DIR"), "/sql/0001_schema.sql"),
            sql_dir.join("0001_schema.sql"),
        )
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn constructs_and_shuts_down_cleanly() {
        let root = TempDir::new().unwrap();
        let app_dir = root.path().join("app");
        seed_sql(&app_dir.join("sql")).await;
        let socket_path = root.path().join("pscued.sock");

        let daemon = Daemon::new(Config::default(), app_dir, socket_path).await.unwrap();
        daemon.persist().await;
    }
}
