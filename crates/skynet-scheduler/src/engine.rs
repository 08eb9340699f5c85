use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use skynet_bus::MessageBus;
use skynet_core::types::InboundEnvelope;
use tokio::sync::watch;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::{Result, SchedulerError};
use crate::types::{Job, JobSpec};

/// Shared handle for job management (add/remove/list) usable from any
/// task — the gateway's method registry, tests, or the engine's own run
/// loop all go through the same `DashMap`.
#[derive(Clone)]
pub struct SchedulerHandle {
    jobs: Arc<DashMap<String, Job>>,
}

impl SchedulerHandle {
    fn new(jobs: Arc<DashMap<String, Job>>) -> Self {
        Self { jobs }
    }

    /// Add a job. `spec.id` is rejected if it is `Some("")`; `None` assigns
    /// a fresh UUID.
    pub fn add_job(&self, spec: JobSpec) -> Result<Job> {
        let id = match spec.id {
            Some(id) if id.is_empty() => {
                return Err(SchedulerError::InvalidJob("job id must not be empty".into()));
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };
        let now = Utc::now();
        let job = Job {
            id: id.clone(),
            name: spec.name,
            schedule: spec.schedule,
            target_chat: spec.target_chat,
            task: spec.task,
            next_run: spec.schedule.next(now),
            run_count: 0,
            created_at: now,
        };
        self.jobs.insert(id, job.clone());
        info!(job_id = %job.id, name = %job.name, "cron job added");
        Ok(job)
    }

    pub fn remove_job(&self, id: &str) -> Result<()> {
        self.jobs
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| SchedulerError::JobNotFound { id: id.to_string() })
    }

    pub fn list_jobs(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.iter().map(|e| e.value().clone()).collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs
    }

    pub fn get_job(&self, id: &str) -> Option<Job> {
        self.jobs.get(id).map(|e| e.value().clone())
    }
}

/// In-memory cron engine: holds no persistence (jobs are re-registered on
/// process start by whatever owns the config), ticks every second, and
/// publishes a synthetic `Inbound` envelope on the `"cron"` channel for
/// every job whose `next_run` has passed.
pub struct SchedulerEngine {
    jobs: Arc<DashMap<String, Job>>,
    bus: Arc<MessageBus>,
}

impl SchedulerEngine {
    pub fn new(bus: Arc<MessageBus>) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            bus,
        }
    }

    /// A clonable handle sharing this engine's job table.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle::new(self.jobs.clone())
    }

    /// Main event loop. Polls every second until `shutdown` broadcasts
    /// `true`. Calling this again after a prior `true` is a no-op since
    /// `shutdown.changed()` will immediately observe the latched value —
    /// callers that need to restart the engine should construct a fresh
    /// `watch` channel, mirroring the channel runtime's restart discipline.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!("cron scheduler started");
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("cron scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn tick(&self) {
        let now = Utc::now();
        let due: Vec<String> = self
            .jobs
            .iter()
            .filter(|e| e.value().next_run <= now)
            .map(|e| e.key().clone())
            .collect();

        for id in due {
            let Some(mut entry) = self.jobs.get_mut(&id) else {
                continue;
            };
            let job = entry.value_mut();
            let envelope = InboundEnvelope::new(
                "cron",
                "",
                job.id.clone(),
                job.target_chat.clone(),
                job.task.clone(),
            );
            job.run_count += 1;
            job.next_run = job.schedule.next(now);
            let job_id = job.id.clone();
            drop(entry);

            if let Err(e) = self.bus.publish_inbound(envelope).await {
                error!(job_id = %job_id, error = %e, "failed to publish cron envelope, bus closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule;

    fn spec(name: &str, every: &str) -> JobSpec {
        JobSpec {
            id: None,
            name: name.to_string(),
            schedule: schedule::parse(every).unwrap(),
            target_chat: "chat1".to_string(),
            task: "say hi".to_string(),
        }
    }

    #[test]
    fn add_job_assigns_an_id_when_none_given() {
        let bus = Arc::new(MessageBus::new(10));
        let engine = SchedulerEngine::new(bus);
        let handle = engine.handle();
        let job = handle.add_job(spec("reminder", "every 5 minutes")).unwrap();
        assert!(!job.id.is_empty());
        assert_eq!(handle.list_jobs().len(), 1);
    }

    #[test]
    fn add_job_rejects_empty_id() {
        let bus = Arc::new(MessageBus::new(10));
        let engine = SchedulerEngine::new(bus);
        let handle = engine.handle();
        let mut s = spec("x", "every 1 minute");
        s.id = Some(String::new());
        assert!(handle.add_job(s).is_err());
    }

    #[test]
    fn remove_missing_job_errs() {
        let bus = Arc::new(MessageBus::new(10));
        let engine = SchedulerEngine::new(bus);
        let handle = engine.handle();
        assert!(matches!(
            handle.remove_job("nope"),
            Err(SchedulerError::JobNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn due_job_publishes_cron_envelope_and_reschedules() {
        let bus = Arc::new(MessageBus::new(10));
        let engine = SchedulerEngine::new(bus.clone());
        let handle = engine.handle();
        let job = handle.add_job(spec("ping", "every 1 minute")).unwrap();

        // Force the job due immediately.
        handle.jobs.get_mut(&job.id).unwrap().next_run = Utc::now() - chrono::Duration::seconds(1);
        engine.tick().await;

        let envelope = bus.consume_inbound().await.unwrap();
        assert_eq!(envelope.channel, "cron");
        assert_eq!(envelope.sender_id, job.id);
        assert_eq!(envelope.chat_id, "chat1");
        assert_eq!(envelope.content, "say hi");

        let updated = handle.get_job(&job.id).unwrap();
        assert_eq!(updated.run_count, 1);
        assert!(updated.next_run > Utc::now());
    }
}
