//! Feedback ledger - reviews, vouches and slashes for registered agents.
//!
//! Stored next to the registration queue in `SQLite`. Values are restricted
//! to the four signals the reputation views understand.

use std::collections::BTreeMap;

use chrono::{SecondsFormat, Utc};
use itertools::Itertools;
use serde::Serialize;
use sqlx::SqlitePool;

use crate::{Error, Result};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS feedbacks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    agent_name TEXT NOT NULL,
    reviewer_name TEXT NOT NULL,
    value INTEGER NOT NULL CHECK(value IN (1, -1, 100, -100)),
    comment TEXT NOT NULL DEFAULT '',
    tx_hash TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_feedbacks_agent ON feedbacks(agent_name);
";

const DEFAULT_REVIEWER: &str = "Anonymous";
const AGENT_FEEDBACK_LIMIT: i64 = 20;

/// The signal carried by a feedback value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackSignal {
    Positive,
    Negative,
    Vouch,
    Slash,
}

impl FeedbackSignal {
    /// # Errors
    ///
    /// Returns `Error::Validation` for any value other than +1, -1, 100, -100.
    pub fn from_value(value: i64) -> Result<Self> {
        match value {
            1 => Ok(Self::Positive),
            -1 => Ok(Self::Negative),
            100 => Ok(Self::Vouch),
            -100 => Ok(Self::Slash),
            other => Err(Error::Validation(format!(
                "feedback value must be 1, -1, 100 (vouch) or -100 (slash), got {other}"
            ))),
        }
    }

    #[must_use]
    pub const fn value(self) -> i64 {
        match self {
            Self::Positive => 1,
            Self::Negative => -1,
            Self::Vouch => 100,
            Self::Slash => -100,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewFeedback {
    pub agent_name: String,
    pub reviewer_name: Option<String>,
    pub value: i64,
    pub comment: Option<String>,
    pub tx_hash: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: i64,
    pub agent_name: String,
    pub reviewer_name: String,
    pub value: i64,
    pub comment: String,
    pub tx_hash: Option<String>,
    pub created_at: String,
}

/// Aggregate for one agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FeedbackStats {
    pub count: usize,
    pub total: i64,
}

#[derive(Debug, Clone)]
pub struct FeedbackLedger {
    pool: SqlitePool,
}

impl FeedbackLedger {
    /// Use `pool`, creating the `feedbacks` table if needed.
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Failed to initialize feedback schema: {e}")))?;
        Ok(Self { pool })
    }

    /// Record a feedback entry and return its id.
    ///
    /// # Errors
    ///
    /// `Error::Validation` for an empty agent name or an unsupported value.
    pub async fn submit_feedback(&self, feedback: NewFeedback) -> Result<i64> {
        let agent_name = feedback.agent_name.trim();
        if agent_name.is_empty() {
            return Err(Error::Validation("agent name cannot be empty".to_string()));
        }
        let signal = FeedbackSignal::from_value(feedback.value)?;
        let reviewer = feedback
            .reviewer_name
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| DEFAULT_REVIEWER.to_string());

        let result = sqlx::query(
            "INSERT INTO feedbacks (agent_name, reviewer_name, value, comment, tx_hash, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(agent_name)
        .bind(&reviewer)
        .bind(signal.value())
        .bind(feedback.comment.unwrap_or_default())
        .bind(feedback.tx_hash.filter(|hash| !hash.is_empty()))
        .bind(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::StoreUnavailable(format!("Failed to insert feedback: {e}")))?;

        tracing::info!(agent_name, reviewer = %reviewer, signal = ?signal, "Feedback recorded");
        Ok(result.last_insert_rowid())
    }

    /// Most recent feedback for one agent, newest first.
    pub async fn feedbacks_for_agent(&self, agent_name: &str) -> Result<Vec<Feedback>> {
        sqlx::query_as::<_, Feedback>(
            "SELECT id, agent_name, reviewer_name, value, comment, tx_hash, created_at \
             FROM feedbacks WHERE agent_name = ? ORDER BY created_at DESC, id DESC LIMIT ?",
        )
        .bind(agent_name)
        .bind(AGENT_FEEDBACK_LIMIT)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::StoreUnavailable(format!("Failed to list feedback for {agent_name}: {e}")))
    }

    /// Count and sum of values per agent.
    pub async fn feedback_stats(&self) -> Result<BTreeMap<String, FeedbackStats>> {
        let rows: Vec<(String, i64)> = sqlx::query_as("SELECT agent_name, value FROM feedbacks")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::StoreUnavailable(format!("Failed to read feedback stats: {e}")))?;

        Ok(rows
            .into_iter()
            .into_grouping_map()
            .fold(FeedbackStats::default(), |acc, _agent, value| FeedbackStats {
                count: acc.count + 1,
                total: acc.total + value,
            })
            .into_iter()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;

    async fn ledger() -> FeedbackLedger {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        FeedbackLedger::new(pool).await.unwrap()
    }

    fn feedback(agent: &str, value: i64) -> NewFeedback {
        NewFeedback {
            agent_name: agent.to_string(),
            value,
            ..NewFeedback::default()
        }
    }

    #[tokio::test]
    async fn test_reviewer_defaults_to_anonymous() {
        let ledger = ledger().await;
        ledger.submit_feedback(feedback("Alice", 1)).await.unwrap();

        let entries = ledger.feedbacks_for_agent("Alice").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].reviewer_name, "Anonymous");
        assert_eq!(entries[0].comment, "");
        assert_eq!(entries[0].tx_hash, None);
    }

    #[tokio::test]
    async fn test_unsupported_values_are_rejected() {
        let ledger = ledger().await;
        for value in [0, 2, 5, -99, 101] {
            let result = ledger.submit_feedback(feedback("Alice", value)).await;
            assert!(matches!(result, Err(Error::Validation(_))), "value {value}");
        }
        assert!(ledger.submit_feedback(feedback("  ", 1)).await.is_err());
    }

    #[tokio::test]
    async fn test_stats_group_by_agent() {
        let ledger = ledger().await;
        for (agent, value) in [("Alice", 1), ("Alice", 100), ("Alice", -1), ("Bob", -100)] {
            ledger.submit_feedback(feedback(agent, value)).await.unwrap();
        }

        let stats = ledger.feedback_stats().await.unwrap();
        assert_eq!(stats.get("Alice"), Some(&FeedbackStats { count: 3, total: 100 }));
        assert_eq!(stats.get("Bob"), Some(&FeedbackStats { count: 1, total: -100 }));
    }

    #[tokio::test]
    async fn test_agent_listing_is_newest_first_and_limited() {
        let ledger = ledger().await;
        for i in 0..25 {
            let mut entry = feedback("Alice", 1);
            entry.comment = Some(format!("review {i}"));
            ledger.submit_feedback(entry).await.unwrap();
        }
        ledger.submit_feedback(feedback("Bob", 1)).await.unwrap();

        let entries = ledger.feedbacks_for_agent("Alice").await.unwrap();
        assert_eq!(entries.len(), 20);
        assert_eq!(entries[0].comment, "review 24");
        assert!(entries.iter().all(|e| e.agent_name == "Alice"));
    }

    #[test]
    fn test_signal_values() {
        assert_eq!(FeedbackSignal::from_value(100).ok(), Some(FeedbackSignal::Vouch));
        assert_eq!(FeedbackSignal::Slash.value(), -100);
    }
}
