use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A parsed `every <N> minute[s]` schedule. The wire format is a single
/// string; `Schedule` is the validated, comparable form of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    pub every_secs: u64,
}

impl Schedule {
    /// Next fire time strictly after `from`.
    pub fn next(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        from + chrono::Duration::seconds(self.every_secs as i64)
    }
}

/// A scheduled job: fires an `Inbound` envelope on the `"cron"` channel
/// every time its schedule elapses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub name: String,
    pub schedule: Schedule,
    /// `chat_id` of the synthetic inbound envelope this job fires.
    pub target_chat: String,
    /// `content` of the synthetic inbound envelope this job fires.
    pub task: String,
    pub next_run: DateTime<Utc>,
    pub run_count: u64,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied job definition; `id` is assigned by the engine unless
/// the caller already knows it (e.g. restoring a job across a restart).
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: Option<String>,
    pub name: String,
    pub schedule: Schedule,
    pub target_chat: String,
    pub task: String,
}
