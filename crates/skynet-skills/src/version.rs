use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::broadcast;

use crate::types::SkillsChangeEvent;

const CHANGE_CHANNEL_CAPACITY: usize = 64;

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Tracks a global version and a per-workspace version, both strictly
/// monotonic across the process lifetime. Bumping either fires a change
/// event to every subscriber.
pub struct SnapshotVersionManager {
    last: AtomicI64,
    global: AtomicI64,
    workspaces: Mutex<HashMap<String, i64>>,
    tx: broadcast::Sender<SkillsChangeEvent>,
}

impl Default for SnapshotVersionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotVersionManager {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            last: AtomicI64::new(0),
            global: AtomicI64::new(0),
            workspaces: Mutex::new(HashMap::new()),
            tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SkillsChangeEvent> {
        self.tx.subscribe()
    }

    /// Bump the version for `workspace` (or the global version if `None`)
    /// and broadcast a change event. Returns the new version.
    pub fn bump(
        &self,
        workspace: Option<&str>,
        reason: impl Into<String>,
        changed_path: Option<PathBuf>,
    ) -> i64 {
        let version = self.next_version();
        match workspace {
            Some(ws) => {
                self.workspaces.lock().unwrap().insert(ws.to_string(), version);
            }
            None => {
                self.global.store(version, Ordering::SeqCst);
            }
        }
        let _ = self.tx.send(SkillsChangeEvent {
            workspace: workspace.map(str::to_string),
            reason: reason.into(),
            changed_path,
            version,
        });
        version
    }

    /// The version a workspace should observe: the max of the global version
    /// and that workspace's own version.
    pub fn get(&self, workspace: Option<&str>) -> i64 {
        let global = self.global.load(Ordering::SeqCst);
        let ws_version = workspace
            .and_then(|ws| self.workspaces.lock().unwrap().get(ws).copied())
            .unwrap_or(0);
        global.max(ws_version)
    }

    fn next_version(&self) -> i64 {
        loop {
            let current = self.last.load(Ordering::SeqCst);
            let candidate = (current + 1).max(now_ms());
            if self
                .last
                .compare_exchange(current, candidate, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return candidate;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bumps_are_strictly_monotonic() {
        let mgr = SnapshotVersionManager::new();
        let mut last = 0;
        for _ in 0..5 {
            let v = mgr.bump(None, "test", None);
            assert!(v > last);
            last = v;
        }
    }

    #[test]
    fn workspace_version_is_independent_until_global_bump() {
        let mgr = SnapshotVersionManager::new();
        let ws_version = mgr.bump(Some("ws1"), "change", None);
        assert_eq!(mgr.get(Some("ws1")), ws_version);
        assert_eq!(mgr.get(Some("ws2")), mgr.get(None));
    }

    #[test]
    fn get_returns_max_of_global_and_workspace() {
        let mgr = SnapshotVersionManager::new();
        mgr.bump(Some("ws1"), "first", None);
        let global_version = mgr.bump(None, "global bump", None);
        assert_eq!(mgr.get(Some("ws1")), global_version);
    }

    #[test]
    fn subscribers_observe_bump_events() {
        let mgr = SnapshotVersionManager::new();
        let mut rx = mgr.subscribe();
        mgr.bump(Some("ws1"), "created", None);
        let event = rx.try_recv().expect("expected a change event");
        assert_eq!(event.workspace.as_deref(), Some("ws1"));
        assert_eq!(event.reason, "created");
    }
}
