use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, watch};
use tracing::warn;

use crate::error::{Result, SkillError};
use crate::version::SnapshotVersionManager;

pub const DEFAULT_DEBOUNCE_MS: u64 = 250;

const IGNORED_DIRS: &[&str] = &[".git", "node_modules", "dist"];

/// Watches a set of skill roots for `*.md` changes and bumps the workspace's
/// snapshot version, debounced, on each burst of activity.
pub struct SkillWatcher {
    _watcher: RecommendedWatcher,
    stop_tx: watch::Sender<bool>,
}

impl SkillWatcher {
    pub fn start(
        paths: Vec<PathBuf>,
        workspace: Option<String>,
        versions: Arc<SnapshotVersionManager>,
        debounce_ms: u64,
    ) -> Result<Self> {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            if let Ok(event) = res {
                let _ = event_tx.send(event);
            }
        })
        .map_err(|e| SkillError::Watch(e.to_string()))?;

        for path in &paths {
            watcher
                .watch(path, RecursiveMode::Recursive)
                .map_err(|e| SkillError::Watch(e.to_string()))?;
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let debounce = Duration::from_millis(debounce_ms.max(1));

        tokio::spawn(async move {
            loop {
                let first = tokio::select! {
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() { return; }
                        continue;
                    }
                    event = event_rx.recv() => event,
                };
                let Some(event) = first else { return };
                let Some(mut pending) = relevant_path(&event) else { continue };

                loop {
                    tokio::select! {
                        _ = stop_rx.changed() => {
                            if *stop_rx.borrow() { return; }
                        }
                        _ = tokio::time::sleep(debounce) => break,
                        next = event_rx.recv() => {
                            match next {
                                None => return,
                                Some(event) => {
                                    if let Some(path) = relevant_path(&event) {
                                        pending = path;
                                    }
                                }
                            }
                        }
                    }
                }

                versions.bump(workspace.as_deref(), "fs_change", Some(pending));
            }
        });

        Ok(Self { _watcher: watcher, stop_tx })
    }

    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }
}

fn relevant_path(event: &Event) -> Option<PathBuf> {
    event.paths.iter().find(|p| is_relevant(p)).cloned()
}

fn is_relevant(path: &Path) -> bool {
    let in_ignored_dir = path.components().any(|c| {
        c.as_os_str()
            .to_str()
            .is_some_and(|s| IGNORED_DIRS.contains(&s))
    });
    if in_ignored_dir {
        return false;
    }
    if path.extension().map_or(true, |e| e != "md") {
        return false;
    }
    // A loose .md file sitting next to a SKILL.md is supplementary
    // documentation for that skill, not a skill of its own — only SKILL.md
    // itself (and loose .md files in directories that have no SKILL.md)
    // trigger a version bump.
    let is_skill_md = path.file_name().is_some_and(|f| f == "SKILL.md");
    if is_skill_md {
        return true;
    }
    let sibling_has_skill_md = path
        .parent()
        .is_some_and(|dir| dir.join("SKILL.md").is_file());
    !sibling_has_skill_md
}

/// Keyed by a stable join of sorted watch paths so repathing (a config
/// change that alters the resolved skill roots) can tell whether the new
/// set actually differs from what's already being watched.
pub struct WatcherManager {
    current: Mutex<Option<(String, SkillWatcher)>>,
}

impl Default for WatcherManager {
    fn default() -> Self {
        Self::new()
    }
}

impl WatcherManager {
    pub fn new() -> Self {
        Self { current: Mutex::new(None) }
    }

    fn key_for(paths: &[PathBuf]) -> String {
        let mut parts: Vec<String> = paths.iter().map(|p| p.to_string_lossy().to_string()).collect();
        parts.sort();
        parts.join("\u{1}")
    }

    /// Close the current watcher (if the resolved path set changed) and
    /// start a fresh one. A no-op if the path set is unchanged.
    pub fn repath(
        &self,
        paths: Vec<PathBuf>,
        workspace: Option<String>,
        versions: Arc<SnapshotVersionManager>,
        debounce_ms: u64,
    ) -> Result<()> {
        let key = Self::key_for(&paths);
        let mut guard = self.current.lock().unwrap();
        if let Some((existing_key, _)) = guard.as_ref() {
            if existing_key == &key {
                return Ok(());
            }
        }
        if let Some((_, old)) = guard.take() {
            old.stop();
        }
        match SkillWatcher::start(paths, workspace, versions, debounce_ms) {
            Ok(watcher) => {
                *guard = Some((key, watcher));
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "skill watcher: failed to start");
                Err(e)
            }
        }
    }

    pub fn disable(&self) {
        if let Some((_, old)) = self.current.lock().unwrap().take() {
            old.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignores_files_under_excluded_directories() {
        assert!(!is_relevant(Path::new("/repo/node_modules/pkg/SKILL.md")));
        assert!(!is_relevant(Path::new("/repo/.git/SKILL.md")));
        assert!(!is_relevant(Path::new("/repo/dist/SKILL.md")));
    }

    #[test]
    fn tracks_only_markdown_files() {
        assert!(is_relevant(Path::new("/repo/skills/deploy/SKILL.md")));
        assert!(!is_relevant(Path::new("/repo/skills/deploy/script.sh")));
    }

    #[test]
    fn loose_md_sibling_of_skill_md_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("deploy");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("SKILL.md"), "---\nname: deploy\n---\n").unwrap();
        std::fs::write(dir.join("notes.md"), "scratch").unwrap();

        assert!(is_relevant(&dir.join("SKILL.md")));
        assert!(!is_relevant(&dir.join("notes.md")));
    }

    #[test]
    fn loose_md_without_a_sibling_skill_md_is_tracked() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("quick-note.md"), "---\nname: quick-note\n---\n").unwrap();
        assert!(is_relevant(&tmp.path().join("quick-note.md")));
    }

    #[test]
    fn key_for_is_order_independent() {
        let a = WatcherManager::key_for(&[PathBuf::from("/b"), PathBuf::from("/a")]);
        let b = WatcherManager::key_for(&[PathBuf::from("/a"), PathBuf::from("/b")]);
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn repath_is_a_no_op_for_an_unchanged_path_set() {
        let manager = WatcherManager::new();
        let tmp = tempfile::tempdir().unwrap();
        let versions = Arc::new(SnapshotVersionManager::new());
        manager
            .repath(vec![tmp.path().to_path_buf()], None, versions.clone(), 10)
            .unwrap();
        manager
            .repath(vec![tmp.path().to_path_buf()], None, versions, 10)
            .unwrap();
        assert!(manager.current.lock().unwrap().is_some());
    }
}
