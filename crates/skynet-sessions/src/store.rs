use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use skynet_core::types::Message;
use tracing::{debug, instrument};

use crate::error::{Result, SessionError};
use crate::types::{SessionHeader, SessionRecord, SessionSummary};

const MAX_COLLISION_SUFFIX: u32 = 1000;

/// Replace filesystem-unsafe characters with `_`. Distinct keys can still
/// collide on the sanitized form (e.g. `"a/b"` and `"a:b"` both sanitize to
/// `"a_b"`); collisions are resolved by trying numbered suffixes and
/// verifying each candidate file's stored header key.
fn sanitize(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn candidate_path(root: &Path, base: &str, suffix: u32) -> PathBuf {
    if suffix == 0 {
        root.join(format!("{base}.jsonl"))
    } else {
        root.join(format!("{base}-{suffix}.jsonl"))
    }
}

fn read_header(path: &Path) -> Result<SessionHeader> {
    let file = fs::File::open(path)?;
    let mut first_line = String::new();
    BufReader::new(file).read_line(&mut first_line)?;
    serde_json::from_str(first_line.trim_end())
        .map_err(|e| SessionError::Corrupt(format!("{}: {e}", path.display())))
}

/// Disk-backed JSONL session store. Each session is one file: a header line
/// (`SessionHeader`) followed by one JSON object per message.
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Find the file backing `key`, if one already exists. Walks numbered
    /// suffixes of the sanitized base name, verifying each candidate's
    /// stored header key until a match is found or no more files exist.
    fn find_existing(&self, key: &str) -> Result<Option<PathBuf>> {
        let base = sanitize(key);
        for suffix in 0..MAX_COLLISION_SUFFIX {
            let path = candidate_path(&self.root, &base, suffix);
            if !path.exists() {
                return Ok(None);
            }
            match read_header(&path) {
                Ok(header) if header.key == key => return Ok(Some(path)),
                _ => continue,
            }
        }
        Err(SessionError::CollisionLimitExceeded {
            key: key.to_string(),
        })
    }

    /// Find the file backing `key`, allocating a fresh suffixed path if none
    /// exists yet (the first unused suffix in the chain).
    fn resolve_or_allocate(&self, key: &str) -> Result<PathBuf> {
        if let Some(path) = self.find_existing(key)? {
            return Ok(path);
        }
        let base = sanitize(key);
        for suffix in 0..MAX_COLLISION_SUFFIX {
            let path = candidate_path(&self.root, &base, suffix);
            if !path.exists() {
                return Ok(path);
            }
        }
        Err(SessionError::CollisionLimitExceeded {
            key: key.to_string(),
        })
    }

    /// Persist the full message log for `key`, replacing whatever was
    /// there. Writes to a temp file in the same directory and renames over
    /// the target, so a concurrent reader never observes a partial file;
    /// concurrent writers racing on the same key are last-writer-wins.
    #[instrument(skip(self, messages), fields(key))]
    pub fn save(&self, key: &str, messages: &[Message]) -> Result<()> {
        let path = self.resolve_or_allocate(key)?;
        let created_at = match read_header(&path) {
            Ok(h) => h.created_at,
            Err(_) => chrono::Utc::now(),
        };
        let header = SessionHeader {
            key: key.to_string(),
            created_at,
            updated_at: chrono::Utc::now(),
        };

        let mut tmp = tempfile::NamedTempFile::new_in(&self.root)?;
        serde_json::to_writer(&mut tmp, &header)?;
        tmp.write_all(b"\n")?;
        for message in messages {
            serde_json::to_writer(&mut tmp, message)?;
            tmp.write_all(b"\n")?;
        }
        tmp.flush()?;
        tmp.persist(&path).map_err(|e| SessionError::Io(e.error))?;
        debug!(path = %path.display(), messages = messages.len(), "session saved");
        Ok(())
    }

    #[instrument(skip(self), fields(key))]
    pub fn load(&self, key: &str) -> Result<Option<SessionRecord>> {
        let Some(path) = self.find_existing(key)? else {
            return Ok(None);
        };
        let file = fs::File::open(&path)?;
        let mut lines = BufReader::new(file).lines();
        let header_line = lines
            .next()
            .ok_or_else(|| SessionError::Corrupt(format!("{}: empty file", path.display())))??;
        let header: SessionHeader = serde_json::from_str(&header_line)
            .map_err(|e| SessionError::Corrupt(format!("{}: {e}", path.display())))?;

        let mut messages = Vec::new();
        for line in lines {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let message: Message = serde_json::from_str(&line)
                .map_err(|e| SessionError::Corrupt(format!("{}: {e}", path.display())))?;
            messages.push(message);
        }

        Ok(Some(SessionRecord { header, messages }))
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        match self.find_existing(key)? {
            Some(path) => {
                fs::remove_file(path)?;
                Ok(())
            }
            None => Err(SessionError::NotFound {
                key: key.to_string(),
            }),
        }
    }

    /// List every known session as a lightweight summary, newest first.
    pub fn list(&self) -> Result<Vec<SessionSummary>> {
        let mut summaries = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("jsonl") {
                continue;
            }
            let header = match read_header(&path) {
                Ok(h) => h,
                Err(_) => continue,
            };
            let message_count = {
                let file = fs::File::open(&path)?;
                BufReader::new(file).lines().count().saturating_sub(1)
            };
            summaries.push(SessionSummary {
                key: header.key,
                created_at: header.created_at,
                updated_at: header.updated_at,
                message_count,
            });
        }
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use skynet_core::types::Message;

    fn store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(dir.path()).unwrap();
        (store, dir)
    }

    #[test]
    fn save_then_load_round_trips_messages() {
        let (store, _dir) = store();
        let messages = vec![Message::user("hi"), Message::assistant("hello")];
        store.save("telegram:chat1", &messages).unwrap();

        let loaded = store.load("telegram:chat1").unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[0].content, "hi");
        assert_eq!(loaded.header.key, "telegram:chat1");
    }

    #[test]
    fn load_missing_session_returns_none() {
        let (store, _dir) = store();
        assert!(store.load("no:such").unwrap().is_none());
    }

    #[test]
    fn colliding_sanitized_keys_get_distinct_files() {
        let (store, _dir) = store();
        // Both sanitize to "a_b".
        store.save("a/b", &[Message::user("first")]).unwrap();
        store.save("a:b", &[Message::user("second")]).unwrap();

        let a = store.load("a/b").unwrap().unwrap();
        let b = store.load("a:b").unwrap().unwrap();
        assert_eq!(a.messages[0].content, "first");
        assert_eq!(b.messages[0].content, "second");
    }

    #[test]
    fn save_is_idempotent_on_same_key() {
        let (store, _dir) = store();
        store.save("k", &[Message::user("v1")]).unwrap();
        store.save("k", &[Message::user("v1"), Message::user("v2")]).unwrap();
        let loaded = store.load("k").unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 2);
    }

    #[test]
    fn list_returns_summaries_for_all_sessions() {
        let (store, _dir) = store();
        store.save("s1", &[Message::user("a")]).unwrap();
        store.save("s2", &[Message::user("a"), Message::user("b")]).unwrap();
        let summaries = store.list().unwrap();
        assert_eq!(summaries.len(), 2);
        let s2 = summaries.iter().find(|s| s.key == "s2").unwrap();
        assert_eq!(s2.message_count, 2);
    }

    #[test]
    fn delete_removes_session() {
        let (store, _dir) = store();
        store.save("k", &[Message::user("v")]).unwrap();
        store.delete("k").unwrap();
        assert!(store.load("k").unwrap().is_none());
    }

    #[test]
    fn delete_missing_session_errs() {
        let (store, _dir) = store();
        assert!(matches!(store.delete("nope"), Err(SessionError::NotFound { .. })));
    }
}
