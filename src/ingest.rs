//! Feedback ingest (component L): the write path from a finished shell
//! command into every learner.
//!
//! Grounded on `completion::learning`'s lazily-started background task:
//! the first call spins up an unbounded-channel worker (so construction
//! never needs a tokio reactor), and all mutation happens on that single
//! task, serializing writes without a lock held across an await point.

use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::knowledge::argument_graph::ArgumentGraph;
use crate::knowledge::history::{CommandHistory, HistoryEntry};
use crate::knowledge::sequence::SequencePredictor;
use crate::knowledge::workflow::WorkflowLearner;
use crate::parser::{self, ParseHints};
use crate::sensitivity::SensitivityFilter;

/// A finished shell command, as reported by the shell integration.
#[derive(Debug, Clone)]
pub struct CommandFinishedEvent {
    pub command_line: String,
    pub exit_status: Option<i32>,
    pub working_dir: Option<String>,
    pub finished_at: DateTime<Utc>,
}

struct LastAccepted {
    command_line: String,
    at: DateTime<Utc>,
}

pub struct FeedbackIngest {
    argument_graph: Arc<ArgumentGraph>,
    history: Arc<CommandHistory>,
    sequence: Arc<SequencePredictor>,
    workflow: Arc<WorkflowLearner>,
    sensitivity: Arc<SensitivityFilter>,
    sequence_order: usize,
    sender: OnceLock<mpsc::UnboundedSender<CommandFinishedEvent>>,
    last_accepted: Mutex<Option<LastAccepted>>,
}

impl FeedbackIngest {
    pub fn new(
        argument_graph: Arc<ArgumentGraph>,
        history: Arc<CommandHistory>,
        sequence: Arc<SequencePredictor>,
        workflow: Arc<WorkflowLearner>,
        sensitivity: Arc<SensitivityFilter>,
        sequence_order: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            argument_graph,
            history,
            sequence,
            workflow,
            sensitivity,
            sequence_order,
            sender: OnceLock::new(),
            last_accepted: Mutex::new(None),
        })
    }

    /// Enqueue `event` for background processing. Never blocks the caller.
    pub fn record_finished(self: &Arc<Self>, event: CommandFinishedEvent) {
        let sender = self.ensure_started();
        let _ = sender.send(event);
    }

    fn ensure_started(self: &Arc<Self>) -> mpsc::UnboundedSender<CommandFinishedEvent> {
        self.sender
            .get_or_init(|| {
                let (sender, mut receiver) = mpsc::unbounded_channel::<CommandFinishedEvent>();
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    while let Some(event) = receiver.recv().await {
                        this.apply(event);
                    }
                });
                sender
            })
            .clone()
    }

    fn apply(&self, event: CommandFinishedEvent) {
        if self.sensitivity.is_sensitive(&event.command_line) {
            return;
        }

        let parsed = parser::parse_with_hints(&event.command_line, &ParseHints::default());
        let Some(command) = parsed.command.clone() else {
            return;
        };
        let success = event.exit_status.map(|code| code == 0).unwrap_or(false);
        let args: Vec<String> = parsed.args.iter().map(|a| a.text.clone()).collect();

        self.history.add(HistoryEntry {
            command: command.clone(),
            command_line: event.command_line.clone(),
            args: args.clone(),
            success,
            timestamp: event.finished_at,
            working_dir: event.working_dir.clone(),
        });

        if !success {
            return;
        }

        let working_dir = event.working_dir.as_ref().map(std::path::Path::new);
        self.argument_graph.record_parsed_usage(&command, &parsed, working_dir);

        if self.sequence_order >= 2 {
            let tail = self.history.recent(Some(self.sequence_order));
            let ordered: Vec<String> = tail.into_iter().rev().map(|e| e.command).collect();
            self.sequence.record_sequence(&ordered);
        }

        let mut last = self.last_accepted.lock();
        if let Some(prev) = last.as_ref() {
            let dt = event
                .finished_at
                .signed_duration_since(prev.at)
                .to_std()
                .unwrap_or_default();
            self.workflow.record_transition(&prev.command_line, &event.command_line, dt);
        }
        *last = Some(LastAccepted {
            command_line: event.command_line,
            at: event.finished_at,
        });
    }
}

impl std::fmt::Debug for FeedbackIngest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedbackIngest").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn ingest() -> Arc<FeedbackIngest> {
        FeedbackIngest::new(
            Arc::new(ArgumentGraph::new(16, 16)),
            Arc::new(CommandHistory::new(16)),
            Arc::new(SequencePredictor::new(2, 1.0)),
            Arc::new(WorkflowLearner::new(Duration::from_secs(600), 0.0, 14.0)),
            Arc::new(SensitivityFilter::new(vec![])),
            2,
        )
    }

    fn event(line: &str, success: bool, at: DateTime<Utc>) -> CommandFinishedEvent {
        CommandFinishedEvent {
            command_line: line.to_string(),
            exit_status: Some(if success { 0 } else { 1 }),
            working_dir: None,
            finished_at: at,
        }
    }

    #[tokio::test]
    async fn failed_command_reaches_history_but_not_argument_graph() {
        let ingest = ingest();
        ingest.apply(event("git push", false, Utc::now()));
        assert_eq!(ingest.history.len(), 1);
        assert_eq!(ingest.argument_graph.total_usage("git"), 0);
    }

    #[tokio::test]
    async fn successful_command_updates_argument_graph() {
        let ingest = ingest();
        ingest.apply(event("git commit -m x", true, Utc::now()));
        assert_eq!(ingest.argument_graph.total_usage("git"), 1);
    }

    #[tokio::test]
    async fn sensitive_command_is_dropped_entirely() {
        let ingest = ingest();
        ingest.apply(event("export API_KEY=abc123", true, Utc::now()));
        assert_eq!(ingest.history.len(), 0);
    }

    #[tokio::test]
    async fn two_successful_commands_record_a_workflow_transition() {
        let ingest = ingest();
        let t0 = Utc::now();
        ingest.apply(event("git add .", true, t0));
        ingest.apply(event("git commit -m x", true, t0 + chrono::Duration::seconds(5)));
        let preds = ingest.workflow.predictions("git add", None, 5);
        assert_eq!(preds.first().map(|(c, _)| c.as_str()), Some("git commit"));
    }
}
