//! Unix-domain-socket request server (component J).
//!
//! Reimagines `completion::engine`'s orchestration shape (cache-check ->
//! provider fan-out -> aggregate/filter/cache) as a raw socket loop: one
//! task per connection, cache-check first, a single provider call on miss
//! (the argument graph or, for directory-family commands, the PCD engine),
//! then prefix-filter before replying.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Notify, Semaphore};
use tracing::{debug, info, warn};

use crate::cache::{cache_key, CompletionCache, CompletionItem};
use crate::config::Config;
use crate::ipc::error::IpcResult;
use crate::ipc::protocol::{
    read_frame, write_completion_response, write_debug_response, CompletionItemWire, CompletionRequest,
    CompletionResponse, DebugRequest, DebugRequestType, DebugResponse, InboundFrame,
};
use crate::knowledge::argument_graph::ArgumentGraph;
use crate::knowledge::context::ContextAnalyzer;
use crate::knowledge::history::CommandHistory;
use crate::knowledge::sequence::SequencePredictor;
use crate::knowledge::workflow::WorkflowLearner;
use crate::parser;
use crate::pcd::{LearnedDir, PcdEngine};

/// Command families that name directories; these delegate the cache miss
/// to the PCD engine instead of the argument graph's generic suggestions.
const CD_FAMILY_COMMANDS: &[&str] = &["cd", "pushd", "z", "zi", "j"];

pub struct IpcServer {
    socket_path: PathBuf,
    cache: Arc<CompletionCache>,
    argument_graph: Arc<ArgumentGraph>,
    history: Arc<CommandHistory>,
    sequence: Arc<SequencePredictor>,
    workflow: Arc<WorkflowLearner>,
    context_analyzer: Arc<ContextAnalyzer>,
    pcd: Arc<PcdEngine>,
    config: Arc<Config>,
    connection_limit: Arc<Semaphore>,
    disposed: Arc<std::sync::atomic::AtomicBool>,
    in_flight: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl IpcServer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        socket_path: PathBuf,
        cache: Arc<CompletionCache>,
        argument_graph: Arc<ArgumentGraph>,
        history: Arc<CommandHistory>,
        sequence: Arc<SequencePredictor>,
        workflow: Arc<WorkflowLearner>,
        context_analyzer: Arc<ContextAnalyzer>,
        pcd: Arc<PcdEngine>,
        config: Arc<Config>,
        max_concurrent_connections: usize,
    ) -> Self {
        Self {
            socket_path,
            cache,
            argument_graph,
            history,
            sequence,
            workflow,
            context_analyzer,
            pcd,
            config,
            connection_limit: Arc::new(Semaphore::new(max_concurrent_connections.max(1))),
            disposed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Bind and serve until `dispose` is called. Removes a stale socket file
    /// left by a prior crashed instance before binding.
    pub async fn serve(&self) -> IpcResult<()> {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
        let listener = UnixListener::bind(&self.socket_path).map_err(crate::ipc::error::IpcError::Io)?;
        info!(path = %self.socket_path.display(), "ipc server listening");

        loop {
            if self.disposed.load(Ordering::Acquire) {
                break;
            }
            let (stream, _addr) = match listener.accept().await {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(%err, "ipc accept failed");
                    continue;
                }
            };
            if self.disposed.load(Ordering::Acquire) {
                break;
            }

            let permit = match Arc::clone(&self.connection_limit).try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    debug!("ipc connection limit reached, queuing via blocking acquire");
                    match Arc::clone(&self.connection_limit).acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => continue,
                    }
                }
            };

            self.in_flight.fetch_add(1, Ordering::AcqRel);
            let cache = Arc::clone(&self.cache);
            let argument_graph = Arc::clone(&self.argument_graph);
            let history = Arc::clone(&self.history);
            let sequence = Arc::clone(&self.sequence);
            let workflow = Arc::clone(&self.workflow);
            let context_analyzer = Arc::clone(&self.context_analyzer);
            let pcd = Arc::clone(&self.pcd);
            let config = Arc::clone(&self.config);
            let in_flight = Arc::clone(&self.in_flight);
            let idle = Arc::clone(&self.idle);

            tokio::spawn(async move {
                let _permit = permit;
                if let Err(err) = handle_connection(
                    stream,
                    &cache,
                    &argument_graph,
                    &history,
                    &sequence,
                    &workflow,
                    &context_analyzer,
                    &pcd,
                    &config,
                )
                .await
                {
                    debug!(%err, "ipc connection closed with error");
                }
                if in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
                    idle.notify_waiters();
                }
            });
        }

        Ok(())
    }

    /// Refuse new connections and wait for in-flight handlers to finish.
    /// Idempotent: a second call is a no-op.
    pub async fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = std::fs::remove_file(&self.socket_path);
        while self.in_flight.load(Ordering::Acquire) > 0 {
            self.idle.notified().await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_connection(
    mut stream: UnixStream,
    cache: &CompletionCache,
    argument_graph: &ArgumentGraph,
    history: &CommandHistory,
    sequence: &SequencePredictor,
    workflow: &WorkflowLearner,
    context_analyzer: &ContextAnalyzer,
    pcd: &PcdEngine,
    config: &Config,
) -> IpcResult<()> {
    loop {
        let frame = match read_frame(&mut stream).await {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(()),
            Err(err) => {
                debug!(%err, "ipc frame rejected, closing connection");
                return Err(err);
            }
        };

        match frame {
            InboundFrame::Completion(request) => {
                let response = handle_completion(
                    &request,
                    cache,
                    argument_graph,
                    history,
                    sequence,
                    workflow,
                    context_analyzer,
                    pcd,
                    config,
                )
                .await;
                write_completion_response(&mut stream, &response).await?;
            }
            InboundFrame::Debug(request) => {
                let response = handle_debug(&request, cache);
                write_debug_response(&mut stream, &response).await?;
            }
        }
    }
}

/// Serves both real-time query kinds over one request shape: tab-completion
/// (`request.command` names a known verb) and inline prediction of the next
/// whole command line (`request.command` is empty, i.e. nothing typed yet at
/// the prompt). There is no separate wire message for the second kind; it
/// reuses the completion response with predicted full command lines as items.
#[allow(clippy::too_many_arguments)]
async fn handle_completion(
    request: &CompletionRequest,
    cache: &CompletionCache,
    argument_graph: &ArgumentGraph,
    history: &CommandHistory,
    sequence: &SequencePredictor,
    workflow: &WorkflowLearner,
    context_analyzer: &ContextAnalyzer,
    pcd: &PcdEngine,
    config: &Config,
) -> CompletionResponse {
    let key = cache_key(&request.command_line, &request.word_to_complete);

    if let Some(items) = cache.try_get(&key) {
        return finalize(items, &request.word_to_complete, true);
    }

    let items = if is_cd_family(&request.command) {
        directory_candidates(&request.command, &request.word_to_complete, pcd, argument_graph, config).await
    } else if request.command.trim().is_empty() {
        inline_predictions(history, sequence, workflow, argument_graph, pcd, config).await
    } else {
        let recent = history.recent(Some(10));
        let analysis = context_analyzer.analyze(&recent, &request.command_line);
        let already_typed = already_typed_args(&request.command_line);
        generic_candidates(&request.command, argument_graph, &already_typed, &analysis.context_boosts)
    };

    cache.set(&key, items.clone());
    finalize(items, &request.word_to_complete, false)
}

/// Argument texts the user has already typed on this command line, used to
/// exclude already-present arguments from generic suggestions.
fn already_typed_args(command_line: &str) -> Vec<String> {
    parser::parse(command_line).args.into_iter().map(|a| a.text).collect()
}

fn is_cd_family(command: &str) -> bool {
    CD_FAMILY_COMMANDS.iter().any(|c| c.eq_ignore_ascii_case(command))
}

/// Generic (non-directory) argument suggestions, excluding arguments already
/// present on the command line, with each score multiplied by the context
/// analyzer's per-argument boost (default 1.0 when absent).
fn generic_candidates(
    command: &str,
    argument_graph: &ArgumentGraph,
    already_typed: &[String],
    context_boosts: &HashMap<String, f64>,
) -> Vec<CompletionItem> {
    argument_graph
        .suggestions(command, already_typed, 50, 14.0, 0.4, 0.3)
        .into_iter()
        .map(|(text, score)| {
            let boost = context_boosts.get(&text).copied().unwrap_or(1.0);
            CompletionItem {
                text,
                description: None,
                score: Some(score * boost),
            }
        })
        .collect()
}

async fn directory_candidates(
    command: &str,
    word_to_complete: &str,
    pcd: &PcdEngine,
    argument_graph: &ArgumentGraph,
    config: &Config,
) -> Vec<CompletionItem> {
    let current_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let learned: Vec<LearnedDir> = argument_graph
        .learned_arguments(command, 100)
        .into_iter()
        .map(|(path, usage_count, last_used)| LearnedDir {
            path: PathBuf::from(path),
            usage_count,
            last_used,
        })
        .collect();

    pcd.complete(word_to_complete, &current_dir, &learned, 50, config.pcd_max_depth)
        .await
        .into_iter()
        .map(CompletionItem::from)
        .collect()
}

/// Predict the next whole command line from recent history, blending the
/// sequence predictor's n-gram continuations with the workflow learner's
/// timed transitions. When the top prediction names a "cd family" command,
/// resolve its most likely argument via PCD (using the inline-prediction
/// probe depth, distinct from the interactive tab-completion depth) so the
/// prediction is a complete, directly runnable line rather than a bare verb.
async fn inline_predictions(
    history: &CommandHistory,
    sequence: &SequencePredictor,
    workflow: &WorkflowLearner,
    argument_graph: &ArgumentGraph,
    pcd: &PcdEngine,
    config: &Config,
) -> Vec<CompletionItem> {
    if !config.partial_command_predictions {
        return Vec::new();
    }
    let recent = history.recent(Some(2));
    let Some(last) = recent.first() else {
        return Vec::new();
    };

    let tail: Vec<String> = recent.iter().rev().map(|e| e.command_line.clone()).collect();
    let mut scored: HashMap<String, f64> = HashMap::new();
    for (cmd, score) in sequence.predictions(&tail, 10) {
        *scored.entry(cmd).or_insert(0.0) += score;
    }

    let current_dt = chrono::Utc::now().signed_duration_since(last.timestamp).to_std().ok();
    for (cmd, score) in workflow.predictions(&last.command_line, current_dt, 10) {
        *scored.entry(cmd).or_insert(0.0) += score;
    }

    let mut ranked: Vec<(String, f64)> = scored.into_iter().collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ranked.truncate(10);

    let mut items = Vec::with_capacity(ranked.len());
    for (text, score) in ranked {
        let predicted_command = text.split_whitespace().next().unwrap_or("").to_string();
        if is_cd_family(&predicted_command) {
            if let Some(item) =
                predicted_directory_line(&predicted_command, score, argument_graph, pcd, config).await
            {
                items.push(item);
                continue;
            }
        }
        items.push(CompletionItem {
            text,
            description: Some("predicted".to_string()),
            score: Some(score),
        });
    }
    items
}

async fn predicted_directory_line(
    command: &str,
    score: f64,
    argument_graph: &ArgumentGraph,
    pcd: &PcdEngine,
    config: &Config,
) -> Option<CompletionItem> {
    let current_dir = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let learned: Vec<LearnedDir> = argument_graph
        .learned_arguments(command, 20)
        .into_iter()
        .map(|(path, usage_count, last_used)| LearnedDir {
            path: PathBuf::from(path),
            usage_count,
            last_used,
        })
        .collect();
    let top = pcd
        .complete("", &current_dir, &learned, 1, config.pcd_predictor_max_depth)
        .await
        .into_iter()
        .next()?;
    Some(CompletionItem {
        text: format!("{command} {}", top.short_path),
        description: Some("predicted".to_string()),
        score: Some(score),
    })
}

/// Prefix-filter the unfiltered cached/fresh list by `word_to_complete`
/// (case-insensitive) before handing it to the shell; never mutates cache.
fn finalize(items: Vec<CompletionItem>, word_to_complete: &str, cached: bool) -> CompletionResponse {
    let needle = word_to_complete.to_ascii_lowercase();
    let completions: Vec<CompletionItemWire> = items
        .into_iter()
        .filter(|item| needle.is_empty() || item.text.to_ascii_lowercase().starts_with(&needle))
        .map(CompletionItemWire::from)
        .collect();
    CompletionResponse { completions, cached }
}

fn handle_debug(request: &DebugRequest, cache: &CompletionCache) -> DebugResponse {
    match request.request_type {
        DebugRequestType::Ping => DebugResponse {
            success: true,
            message: Some("pong".to_string()),
        },
        DebugRequestType::Clear => {
            cache.clear();
            DebugResponse {
                success: true,
                message: None,
            }
        }
        DebugRequestType::Stats => DebugResponse {
            success: true,
            message: Some(format!("cache_entries={}", cache.len())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cd_family_is_case_insensitive() {
        assert!(is_cd_family("CD"));
        assert!(!is_cd_family("git"));
    }

    #[test]
    fn finalize_filters_by_prefix_case_insensitively() {
        let items = vec![
            CompletionItem { text: "Status".into(), description: None, score: None },
            CompletionItem { text: "commit".into(), description: None, score: None },
        ];
        let response = finalize(items, "st", false);
        assert_eq!(response.completions.len(), 1);
        assert_eq!(response.completions[0].text, "Status");
    }

    #[test]
    fn debug_ping_reports_success() {
        let cache = CompletionCache::new(4);
        let response = handle_debug(&DebugRequest { request_type: DebugRequestType::Ping }, &cache);
        assert!(response.success);
    }

    #[test]
    fn generic_candidates_apply_context_boost() {
        let graph = ArgumentGraph::new(16, 16);
        graph.record_usage("git", &["-m".into()], None);
        graph.record_usage("git", &["--amend".into()], None);

        let unboosted = generic_candidates("git", &graph, &[], &HashMap::new());
        let mut boosts = HashMap::new();
        boosts.insert("-m".to_string(), 2.0);
        let boosted = generic_candidates("git", &graph, &[], &boosts);

        let unboosted_score = unboosted.iter().find(|i| i.text == "-m").unwrap().score.unwrap();
        let boosted_score = boosted.iter().find(|i| i.text == "-m").unwrap().score.unwrap();
        assert!(boosted_score > unboosted_score);
    }

    #[test]
    fn generic_candidates_exclude_already_typed() {
        let graph = ArgumentGraph::new(16, 16);
        graph.record_usage("git", &["commit".into(), "-m".into()], None);

        let already_typed = vec!["commit".to_string()];
        let items = generic_candidates("git", &graph, &already_typed, &HashMap::new());
        assert!(items.iter().all(|i| i.text != "commit"));
    }

    #[test]
    fn already_typed_args_extracts_argument_texts() {
        let already_typed = already_typed_args("git commit -m first");
        assert!(already_typed.contains(&"commit".to_string()));
        assert!(already_typed.contains(&"-m".to_string()));
        assert!(already_typed.contains(&"first".to_string()));
    }

    #[tokio::test]
    async fn inline_predictions_respects_config_gate() {
        use crate::knowledge::history::HistoryEntry;

        let history = CommandHistory::new(16);
        history.add(HistoryEntry {
            command: "git".into(),
            command_line: "git add .".into(),
            args: Vec::new(),
            success: true,
            timestamp: chrono::Utc::now(),
            working_dir: None,
        });
        let sequence = SequencePredictor::new(2, 1.0);
        sequence.record_sequence(&["git add .".into(), "git commit".into()]);
        let workflow = WorkflowLearner::new(std::time::Duration::from_secs(600), 0.0, 14.0);
        let graph = ArgumentGraph::new(16, 16);
        let mut config = Config::default();
        config.partial_command_predictions = false;
        let config = Arc::new(config);
        let pcd = PcdEngine::new(Arc::clone(&config));

        let items = inline_predictions(&history, &sequence, &workflow, &graph, &pcd, &config).await;
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn inline_predictions_surfaces_sequence_continuation() {
        use crate::knowledge::history::HistoryEntry;

        let history = CommandHistory::new(16);
        history.add(HistoryEntry {
            command: "git".into(),
            command_line: "git add .".into(),
            args: Vec::new(),
            success: true,
            timestamp: chrono::Utc::now(),
            working_dir: None,
        });
        let sequence = SequencePredictor::new(2, 1.0);
        sequence.record_sequence(&["git add .".into(), "git commit".into()]);
        let workflow = WorkflowLearner::new(std::time::Duration::from_secs(600), 0.0, 14.0);
        let graph = ArgumentGraph::new(16, 16);
        let config = Arc::new(Config::default());
        let pcd = PcdEngine::new(Arc::clone(&config));

        let items = inline_predictions(&history, &sequence, &workflow, &graph, &pcd, &config).await;
        assert!(items.iter().any(|i| i.text == "git commit"));
    }
}
