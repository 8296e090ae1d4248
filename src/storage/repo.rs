//! Additive-merge persistence operations against the 8 knowledge tables.
//!
//! Grounded on `completion_model.rs`'s `upsert_command_key` /
//! `upsert_transition` idiom: every write is an `INSERT ... ON CONFLICT DO
//! UPDATE` that sums counters and keeps the later of two timestamps, so
//! concurrent writers and process restarts never lose history.

use chrono::{DateTime, TimeZone, Utc};
use sqlx::SqlitePool;

use crate::knowledge::argument_graph::{ArgumentGraph, ArgumentStats, CommandSnapshot};
use crate::knowledge::history::{CommandHistory, HistoryEntry};
use crate::knowledge::sequence::{SequenceEntry, SequencePredictor, Table as SequenceTable};
use crate::knowledge::workflow::{WorkflowLearner, WorkflowTransition};
use crate::storage::database::DatabaseManager;
use crate::storage::error::RepositoryResult;

pub struct CompletionRepo<'a> {
    db: &'a DatabaseManager,
}

fn to_rfc3339(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339()
}

fn parse_ts(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc.timestamp_opt(0, 0).single().unwrap_or_else(Utc::now))
}

impl<'a> CompletionRepo<'a> {
    pub fn new(db: &'a DatabaseManager) -> Self {
        Self { db }
    }

    fn pool(&self) -> &SqlitePool {
        self.db.pool()
    }

    /// Persist every increment accumulated by `graph` since the last call,
    /// summing into existing command/argument/co-occurrence/parameter-value/
    /// flag-combination counters rather than overwriting them, so two
    /// concurrent daemon processes both contribute instead of clobbering each
    /// other's counts. Clears the graph's delta buffer on success.
    pub async fn save_argument_graph(&self, graph: &ArgumentGraph) -> RepositoryResult<()> {
        for delta in graph.delta() {
            self.save_command_delta(&delta).await?;
        }
        graph.clear_delta();
        Ok(())
    }

    async fn save_command_delta(&self, delta: &CommandSnapshot) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO commands (command, total_usage, first_seen, last_used)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(command) DO UPDATE SET
                total_usage = total_usage + excluded.total_usage,
                last_used = CASE WHEN excluded.last_used > last_used THEN excluded.last_used ELSE last_used END
            "#,
        )
        .bind(&delta.command)
        .bind(delta.total_usage as i64)
        .bind(to_rfc3339(delta.first_seen))
        .bind(to_rfc3339(delta.last_used))
        .execute(self.pool())
        .await?;

        for arg in &delta.arguments {
            sqlx::query(
                r#"
                INSERT INTO arguments (command, argument, usage_count, first_seen, last_used, is_flag)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(command, argument) DO UPDATE SET
                    usage_count = usage_count + excluded.usage_count,
                    last_used = CASE WHEN excluded.last_used > last_used THEN excluded.last_used ELSE last_used END,
                    is_flag = excluded.is_flag
                "#,
            )
            .bind(&delta.command)
            .bind(&arg.text)
            .bind(arg.usage_count as i64)
            .bind(to_rfc3339(arg.first_seen))
            .bind(to_rfc3339(arg.last_used))
            .bind(arg.is_flag as i64)
            .execute(self.pool())
            .await?;

            for (peer, count) in &arg.co_occurrences {
                self.upsert_cooccurrence(&delta.command, &arg.text, peer, *count).await?;
            }
            for (value, count) in &arg.parameter_values {
                self.upsert_parameter_value(&delta.command, &arg.text, value, *count).await?;
            }
        }

        for (combo, count) in &delta.flag_combinations {
            sqlx::query(
                r#"
                INSERT INTO flag_combinations (command, combo, count)
                VALUES (?, ?, ?)
                ON CONFLICT(command, combo) DO UPDATE SET count = count + excluded.count
                "#,
            )
            .bind(&delta.command)
            .bind(combo)
            .bind(*count as i64)
            .execute(self.pool())
            .await?;
        }

        Ok(())
    }

    async fn upsert_cooccurrence(&self, command: &str, arg_a: &str, arg_b: &str, count: u64) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cooccurrences (command, arg_a, arg_b, count)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(command, arg_a, arg_b) DO UPDATE SET count = count + excluded.count
            "#,
        )
        .bind(command)
        .bind(arg_a)
        .bind(arg_b)
        .bind(count as i64)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn upsert_parameter_value(&self, command: &str, parameter: &str, value: &str, count: u64) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            INSERT INTO parameter_values (command, parameter, value, count)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(command, parameter, value) DO UPDATE SET count = count + excluded.count
            "#,
        )
        .bind(command)
        .bind(parameter)
        .bind(value)
        .bind(count as i64)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Rebuild `graph` from persisted rows. Called once at startup; the
    /// graph is assumed empty (LRU cache freshly constructed).
    pub async fn load_argument_graph(&self, graph: &ArgumentGraph) -> RepositoryResult<()> {
        let commands: Vec<(String, i64, String, String)> =
            sqlx::query_as("SELECT command, total_usage, first_seen, last_used FROM commands")
                .fetch_all(self.pool())
                .await?;

        for (command, total_usage, first_seen, last_used) in commands {
            graph.seed_command(&command, total_usage as u64, parse_ts(&first_seen), parse_ts(&last_used));

            let args: Vec<(String, i64, String, String, i64)> = sqlx::query_as(
                "SELECT argument, usage_count, first_seen, last_used, is_flag FROM arguments WHERE command = ?",
            )
            .bind(&command)
            .fetch_all(self.pool())
            .await?;

            for (argument, usage_count, arg_first_seen, arg_last_used, is_flag) in args {
                let mut stats = ArgumentStats::seeded(
                    &argument,
                    usage_count as u64,
                    parse_ts(&arg_first_seen),
                    parse_ts(&arg_last_used),
                    is_flag != 0,
                );

                let co: Vec<(String, i64)> = sqlx::query_as(
                    "SELECT arg_b, count FROM cooccurrences WHERE command = ? AND arg_a = ?",
                )
                .bind(&command)
                .bind(&argument)
                .fetch_all(self.pool())
                .await?;
                for (peer, count) in co {
                    stats.add_co_occurrence(&peer, count as u64);
                }

                let values: Vec<(String, i64)> = sqlx::query_as(
                    "SELECT value, count FROM parameter_values WHERE command = ? AND parameter = ?",
                )
                .bind(&command)
                .bind(&argument)
                .fetch_all(self.pool())
                .await?;
                for (value, count) in values {
                    stats.add_parameter_value(&value, count as u64);
                }

                graph.seed_argument(&command, stats);
            }

            let combos: Vec<(String, i64)> =
                sqlx::query_as("SELECT combo, count FROM flag_combinations WHERE command = ?")
                    .bind(&command)
                    .fetch_all(self.pool())
                    .await?;
            for (combo, count) in combos {
                graph.seed_flag_combination(&command, &combo, count as u64);
            }
        }

        Ok(())
    }

    /// Append one entry, then prune to the same FIFO cap the in-memory
    /// `CommandHistory` enforces, so the table never grows unbounded.
    pub async fn append_history(&self, entry: &HistoryEntry, max_size: usize) -> RepositoryResult<()> {
        let args_json = serde_json::to_string(&entry.args).unwrap_or_default();
        sqlx::query(
            r#"
            INSERT INTO history (command, command_line, args_json, success, ts, working_dir)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&entry.command)
        .bind(&entry.command_line)
        .bind(args_json)
        .bind(entry.success as i64)
        .bind(to_rfc3339(entry.timestamp))
        .bind(&entry.working_dir)
        .execute(self.pool())
        .await?;

        sqlx::query(
            r#"
            DELETE FROM history
            WHERE id NOT IN (SELECT id FROM history ORDER BY ts DESC LIMIT ?)
            "#,
        )
        .bind(max_size as i64)
        .execute(self.pool())
        .await?;

        Ok(())
    }

    /// Load up to `max_size` most recent history rows, newest first, into
    /// `history`.
    pub async fn load_history(&self, history: &CommandHistory, max_size: usize) -> RepositoryResult<()> {
        let rows: Vec<(String, String, String, i64, String, Option<String>)> = sqlx::query_as(
            "SELECT command, command_line, args_json, success, ts, working_dir FROM history ORDER BY ts ASC LIMIT ?",
        )
        .bind(max_size as i64)
        .fetch_all(self.pool())
        .await?;

        for (command, command_line, args_json, success, ts, working_dir) in rows {
            let args: Vec<String> = serde_json::from_str(&args_json).unwrap_or_default();
            history.add(HistoryEntry {
                command,
                command_line,
                args,
                success: success != 0,
                timestamp: parse_ts(&ts),
                working_dir,
            });
        }
        Ok(())
    }

    /// Replace the history table wholesale with `history`'s current
    /// contents, capped at `max_size` most-recent rows. Simpler than
    /// incremental appends and matches the "REPLACE, keep last maxEntries
    /// rows" ring semantics directly.
    pub async fn save_history(&self, history: &CommandHistory, max_size: usize) -> RepositoryResult<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query("DELETE FROM history").execute(&mut *tx).await?;

        for entry in history.recent(Some(max_size)).into_iter().rev() {
            let args_json = serde_json::to_string(&entry.args).unwrap_or_default();
            sqlx::query(
                r#"
                INSERT INTO history (command, command_line, args_json, success, ts, working_dir)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&entry.command)
            .bind(&entry.command_line)
            .bind(args_json)
            .bind(entry.success as i64)
            .bind(to_rfc3339(entry.timestamp))
            .bind(&entry.working_dir)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn save_sequences(&self, predictor: &SequencePredictor) -> RepositoryResult<()> {
        let delta = predictor.delta();
        for (prefix, next_map) in &delta {
            for (next, entry) in next_map {
                sqlx::query(
                    r#"
                    INSERT INTO sequences (prev, next, frequency, last_seen)
                    VALUES (?, ?, ?, ?)
                    ON CONFLICT(prev, next) DO UPDATE SET
                        frequency = frequency + excluded.frequency,
                        last_seen = CASE WHEN excluded.last_seen > last_seen THEN excluded.last_seen ELSE last_seen END
                    "#,
                )
                .bind(prefix)
                .bind(next)
                .bind(entry.frequency as i64)
                .bind(to_rfc3339(entry.last_seen))
                .execute(self.pool())
                .await?;
            }
        }
        predictor.clear_delta();
        Ok(())
    }

    pub async fn load_sequences(&self, predictor: &SequencePredictor) -> RepositoryResult<()> {
        let rows: Vec<(String, String, i64, String)> =
            sqlx::query_as("SELECT prev, next, frequency, last_seen FROM sequences")
                .fetch_all(self.pool())
                .await?;

        let mut table: SequenceTable = SequenceTable::new();
        for (prev, next, frequency, last_seen) in rows {
            table.entry(prev).or_default().insert(
                next,
                SequenceEntry {
                    frequency: frequency as u64,
                    last_seen: parse_ts(&last_seen),
                },
            );
        }
        predictor.initialize(table);
        Ok(())
    }

    /// Persist increments accumulated by `learner` since the last call,
    /// summing frequency and inter-arrival totals into existing rows rather
    /// than overwriting them. Clears the learner's delta buffer on success.
    pub async fn save_workflows(&self, learner: &WorkflowLearner) -> RepositoryResult<()> {
        for (prev, transition) in learner.delta() {
            sqlx::query(
                r#"
                INSERT INTO workflows (prev, next, frequency, total_dt_ms, first_seen, last_seen)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(prev, next) DO UPDATE SET
                    frequency = frequency + excluded.frequency,
                    total_dt_ms = total_dt_ms + excluded.total_dt_ms,
                    last_seen = CASE WHEN excluded.last_seen > last_seen THEN excluded.last_seen ELSE last_seen END
                "#,
            )
            .bind(&prev)
            .bind(&transition.next)
            .bind(transition.frequency as i64)
            .bind(transition.total_inter_arrival_ms as i64)
            .bind(to_rfc3339(transition.first_seen))
            .bind(to_rfc3339(transition.last_seen))
            .execute(self.pool())
            .await?;
        }
        learner.clear_delta();
        Ok(())
    }

    pub async fn load_workflows(&self, learner: &WorkflowLearner) -> RepositoryResult<()> {
        let rows: Vec<(String, String, i64, i64, String, String)> = sqlx::query_as(
            "SELECT prev, next, frequency, total_dt_ms, first_seen, last_seen FROM workflows",
        )
        .fetch_all(self.pool())
        .await?;

        for (prev, next, frequency, total_dt_ms, first_seen, last_seen) in rows {
            learner.seed_transition(
                &prev,
                WorkflowTransition {
                    next,
                    frequency: frequency as u64,
                    total_inter_arrival_ms: total_dt_ms as u64,
                    first_seen: parse_ts(&first_seen),
                    last_seen: parse_ts(&last_seen),
                },
            );
        }
        Ok(())
    }

    /// Keep only the `max_commands` most recently used commands (and their
    /// dependent rows), mirroring `enforce_command_key_limit`'s LRU eviction.
    pub async fn enforce_command_cap(&self, max_commands: i64) -> RepositoryResult<()> {
        sqlx::query(
            r#"
            DELETE FROM commands
            WHERE command IN (
                SELECT command FROM commands
                ORDER BY last_used ASC
                LIMIT (SELECT CASE WHEN COUNT(*) > ? THEN COUNT(*) - ? ELSE 0 END FROM commands)
            )
            "#,
        )
        .bind(max_commands)
        .bind(max_commands)
        .execute(self.pool())
        .await?;

        for table in ["arguments", "cooccurrences", "flag_combinations", "parameter_values"] {
            let sql = format!(
                "DELETE FROM {table} WHERE command NOT IN (SELECT command FROM commands)"
            );
            sqlx::query(&sql).execute(self.pool()).await?;
        }
        Ok(())
    }

    /// Wipe every table. Used by the explicit "forget everything" ingest
    /// path; never called automatically.
    pub async fn clear_all(&self) -> RepositoryResult<()> {
        for table in [
            "commands",
            "arguments",
            "cooccurrences",
            "flag_combinations",
            "parameter_values",
            "history",
            "sequences",
            "workflows",
        ] {
            let sql = format!("DELETE FROM {table}");
            sqlx::query(&sql).execute(self.pool()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::{DatabaseManager, DatabaseOptions};
    use crate::storage::paths::StoragePaths;
    use tempfile::TempDir;

    async fn test_db(root: &TempDir) -> DatabaseManager {
        let app_dir = root.path().join("app");
        let paths = StoragePaths::new(app_dir).unwrap();
        tokio::fs::create_dir_all(&paths.sql_dir).await.unwrap();
        tokio::fs::copy(
            concat!(env!("CARGO_MANIFEST_DIR"), "/sql/0001_schema.sql"),
            paths.sql_dir.join("0001_schema.sql"),
        )
        .await
        .unwrap();
        DatabaseManager::new(&paths, &DatabaseOptions::default()).await.unwrap()
    }

    #[tokio::test]
    async fn round_trips_argument_graph() {
        let root = TempDir::new().unwrap();
        let db = test_db(&root).await;
        let repo = CompletionRepo::new(&db);

        let graph = ArgumentGraph::new(16, 16);
        graph.record_usage("git", &["commit".into(), "-m".into()], None);
        repo.save_argument_graph(&graph).await.unwrap();

        let reloaded = ArgumentGraph::new(16, 16);
        repo.load_argument_graph(&reloaded).await.unwrap();
        assert_eq!(reloaded.total_usage("git"), 1);
        let suggestions = reloaded.suggestions("git", &[], 10, 14.0, 0.5, 0.5);
        assert!(suggestions.iter().any(|(t, _)| t == "commit"));
    }

    #[tokio::test]
    async fn history_append_enforces_cap() {
        let root = TempDir::new().unwrap();
        let db = test_db(&root).await;
        let repo = CompletionRepo::new(&db);

        for i in 0..5 {
            let entry = HistoryEntry {
                command: format!("cmd{i}"),
                command_line: format!("cmd{i}"),
                args: vec![],
                success: true,
                timestamp: Utc::now(),
                working_dir: None,
            };
            repo.append_history(&entry, 3).await.unwrap();
        }

        let history = CommandHistory::new(10);
        repo.load_history(&history, 10).await.unwrap();
        assert_eq!(history.len(), 3);
    }

    #[tokio::test]
    async fn sequence_delta_persists_and_clears() {
        let root = TempDir::new().unwrap();
        let db = test_db(&root).await;
        let repo = CompletionRepo::new(&db);

        let predictor = SequencePredictor::new(2, 1.0);
        predictor.record_sequence(&["git add".into(), "git commit".into()]);
        repo.save_sequences(&predictor).await.unwrap();
        assert!(predictor.delta().is_empty());

        let reloaded = SequencePredictor::new(2, 1.0);
        repo.load_sequences(&reloaded).await.unwrap();
        let preds = reloaded.predictions(&["git add".into()], 5);
        assert_eq!(preds.first().map(|(c, _)| c.as_str()), Some("git commit"));
    }

    #[tokio::test]
    async fn workflow_round_trips() {
        let root = TempDir::new().unwrap();
        let db = test_db(&root).await;
        let repo = CompletionRepo::new(&db);

        let learner = WorkflowLearner::new(std::time::Duration::from_secs(600), 0.0, 14.0);
        learner.record_transition("git add", "git commit", std::time::Duration::from_secs(5));
        repo.save_workflows(&learner).await.unwrap();

        let reloaded = WorkflowLearner::new(std::time::Duration::from_secs(600), 0.0, 14.0);
        repo.load_workflows(&reloaded).await.unwrap();
        let preds = reloaded.predictions("git add", None, 5);
        assert_eq!(preds.first().map(|(c, _)| c.as_str()), Some("git commit"));
    }

    #[tokio::test]
    async fn save_history_replaces_table_and_respects_cap() {
        let root = TempDir::new().unwrap();
        let db = test_db(&root).await;
        let repo = CompletionRepo::new(&db);

        let history = CommandHistory::new(10);
        for line in ["git status", "git add .", "git commit -m x"] {
            history.add(HistoryEntry {
                command: "git".into(),
                command_line: line.into(),
                args: Vec::new(),
                success: true,
                timestamp: Utc::now(),
                working_dir: None,
            });
        }
        repo.save_history(&history, 2).await.unwrap();

        let reloaded = CommandHistory::new(10);
        repo.load_history(&reloaded, 10).await.unwrap();
        assert_eq!(reloaded.len(), 2);
        assert_eq!(
            reloaded.most_recent().map(|e| e.command_line),
            Some("git commit -m x".to_string())
        );

        repo.save_history(&history, 2).await.unwrap();
        let reloaded_again = CommandHistory::new(10);
        repo.load_history(&reloaded_again, 10).await.unwrap();
        assert_eq!(reloaded_again.len(), 2);
    }
}
