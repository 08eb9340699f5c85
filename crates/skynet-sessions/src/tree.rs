use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::error::{Result, SessionError};
use crate::types::SessionRecord;

pub const ROOT_BRANCH_ID: &str = "root";

/// Branch metadata carried alongside a tree node's materialized session.
#[derive(Debug, Clone)]
pub struct BranchInfo {
    pub name: String,
    pub is_main: bool,
    pub is_merged: bool,
    pub merged_from: Vec<String>,
    pub base_message_count: usize,
}

/// One node in a session's branching tree. `session.messages` is always the
/// node's own full materialized history (cloned from the parent at branch
/// creation time, not re-derived by walking ancestors on every read).
pub struct SessionTreeNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub child_ids: Vec<String>,
    pub session: SessionRecord,
    pub branch_info: BranchInfo,
}

/// Branching conversation tree layered over a single root session.
/// `CreateBranch` forks a child node; `MergeBranch` folds a child's delta
/// (everything past its recorded `base_message_count`) back into its
/// parent, never the parent's full history, so repeat merges are no-ops.
pub struct SessionTree {
    nodes: Mutex<HashMap<String, SessionTreeNode>>,
    max_depth: usize,
}

impl SessionTree {
    pub fn new(root_session: SessionRecord) -> Self {
        Self::with_max_depth(root_session, usize::MAX)
    }

    pub fn with_max_depth(root_session: SessionRecord, max_depth: usize) -> Self {
        let mut nodes = HashMap::new();
        nodes.insert(
            ROOT_BRANCH_ID.to_string(),
            SessionTreeNode {
                id: ROOT_BRANCH_ID.to_string(),
                parent_id: None,
                child_ids: Vec::new(),
                session: root_session,
                branch_info: BranchInfo {
                    name: "main".to_string(),
                    is_main: true,
                    is_merged: false,
                    merged_from: Vec::new(),
                    base_message_count: 0,
                },
            },
        );
        Self {
            nodes: Mutex::new(nodes),
            max_depth,
        }
    }

    fn depth_of_locked(nodes: &HashMap<String, SessionTreeNode>, id: &str) -> usize {
        let mut depth = 0;
        let mut cur = id.to_string();
        while let Some(node) = nodes.get(&cur) {
            match &node.parent_id {
                Some(parent) => {
                    depth += 1;
                    cur = parent.clone();
                }
                None => break,
            }
        }
        depth
    }

    /// Fork a new branch from `parent_id`. When `session` is `None`, the
    /// parent's current messages are cloned and `base_message_count` is set
    /// to the parent's length (so only the delta merges back later). When
    /// `session` is provided its key must be non-empty and unique across
    /// the tree.
    pub fn create_branch(
        &self,
        parent_id: &str,
        session: Option<SessionRecord>,
        name: impl Into<String>,
        _by: impl Into<String>,
    ) -> Result<String> {
        let mut nodes = self.nodes.lock().unwrap();
        if !nodes.contains_key(parent_id) {
            return Err(SessionError::BranchNotFound {
                branch_id: parent_id.to_string(),
            });
        }
        if Self::depth_of_locked(&nodes, parent_id) + 1 >= self.max_depth {
            return Err(SessionError::DepthExceeded {
                parent_id: parent_id.to_string(),
            });
        }

        let (new_session, base_message_count) = match session {
            Some(s) => {
                if s.header.key.trim().is_empty() {
                    return Err(SessionError::InvalidArgument(
                        "branch session key must not be empty".to_string(),
                    ));
                }
                if nodes.values().any(|n| n.session.header.key == s.header.key) {
                    return Err(SessionError::InvalidArgument(format!(
                        "session key already used in this tree: {}",
                        s.header.key
                    )));
                }
                (s, 0)
            }
            None => {
                let parent = nodes.get(parent_id).unwrap();
                (parent.session.clone(), parent.session.messages.len())
            }
        };

        let id = Uuid::new_v4().to_string();
        nodes.insert(
            id.clone(),
            SessionTreeNode {
                id: id.clone(),
                parent_id: Some(parent_id.to_string()),
                child_ids: Vec::new(),
                session: new_session,
                branch_info: BranchInfo {
                    name: name.into(),
                    is_main: false,
                    is_merged: false,
                    merged_from: Vec::new(),
                    base_message_count,
                },
            },
        );
        nodes.get_mut(parent_id).unwrap().child_ids.push(id.clone());
        Ok(id)
    }

    /// Append a message to a branch's own session log.
    pub fn append(&self, branch_id: &str, message: skynet_core::types::Message) -> Result<()> {
        let mut nodes = self.nodes.lock().unwrap();
        let node = nodes
            .get_mut(branch_id)
            .ok_or_else(|| SessionError::BranchNotFound {
                branch_id: branch_id.to_string(),
            })?;
        node.session.messages.push(message);
        node.session.header.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Fold `id`'s delta (messages past its `base_message_count`) into its
    /// parent. Idempotent: a second call after `is_merged` latches is a
    /// no-op success. Merging the main branch (it has no parent) errors.
    pub fn merge_branch(&self, id: &str) -> Result<()> {
        let mut nodes = self.nodes.lock().unwrap();
        let (parent_id, is_merged, is_main) = {
            let node = nodes
                .get(id)
                .ok_or_else(|| SessionError::BranchNotFound {
                    branch_id: id.to_string(),
                })?;
            (node.parent_id.clone(), node.branch_info.is_merged, node.branch_info.is_main)
        };
        if is_main {
            return Err(SessionError::MergeOfMainBranch);
        }
        if is_merged {
            return Ok(());
        }
        let parent_id = parent_id.ok_or(SessionError::MergeOfMainBranch)?;

        let (delta, base) = {
            let node = nodes.get(id).unwrap();
            (
                node.session.messages[node.branch_info.base_message_count..].to_vec(),
                node.branch_info.base_message_count,
            )
        };
        let _ = base;

        {
            let parent = nodes
                .get_mut(&parent_id)
                .ok_or_else(|| SessionError::BranchNotFound {
                    branch_id: parent_id.clone(),
                })?;
            parent.session.messages.extend(delta);
            parent.session.header.updated_at = chrono::Utc::now();
            if !parent.branch_info.merged_from.contains(&id.to_string()) {
                parent.branch_info.merged_from.push(id.to_string());
            }
        }
        nodes.get_mut(id).unwrap().branch_info.is_merged = true;
        Ok(())
    }

    /// Root-to-`id` chain of branch ids. Fails if any parent link is broken.
    pub fn get_path(&self, id: &str) -> Result<Vec<String>> {
        let nodes = self.nodes.lock().unwrap();
        let mut path = vec![id.to_string()];
        let mut cur = id.to_string();
        loop {
            let node = nodes
                .get(&cur)
                .ok_or_else(|| SessionError::BranchNotFound { branch_id: cur.clone() })?;
            match &node.parent_id {
                Some(parent) => {
                    path.push(parent.clone());
                    cur = parent.clone();
                }
                None => break,
            }
        }
        path.reverse();
        Ok(path)
    }

    /// Succeeds only when `from` and `to` share a common ancestor (always
    /// true within a single tree rooted at one node; fails if either id is
    /// unknown, or if the two live in a forest with no shared root).
    pub fn switch_branch(&self, from: &str, to: &str) -> Result<()> {
        let from_path = self.get_path(from)?;
        let to_path = self.get_path(to)?;
        if from_path.first() == to_path.first() {
            Ok(())
        } else {
            Err(SessionError::NoCommonAncestor {
                a: from.to_string(),
                b: to.to_string(),
            })
        }
    }

    /// Materialized messages for a branch (root-inherited prefix + own delta).
    pub fn session(&self, id: &str) -> Result<SessionRecord> {
        let nodes = self.nodes.lock().unwrap();
        nodes
            .get(id)
            .map(|n| n.session.clone())
            .ok_or_else(|| SessionError::BranchNotFound {
                branch_id: id.to_string(),
            })
    }

    /// Tail-only comparison: how many messages `b` added/removed relative
    /// to `a`, without diffing message content.
    pub fn compare_sessions(&self, a_id: &str, b_id: &str) -> Result<SessionComparison> {
        let nodes = self.nodes.lock().unwrap();
        let a = nodes
            .get(a_id)
            .ok_or_else(|| SessionError::BranchNotFound { branch_id: a_id.to_string() })?;
        let b = nodes
            .get(b_id)
            .ok_or_else(|| SessionError::BranchNotFound { branch_id: b_id.to_string() })?;
        let a_len = a.session.messages.len();
        let b_len = b.session.messages.len();
        Ok(SessionComparison {
            added: b_len.saturating_sub(a_len),
            removed: a_len.saturating_sub(b_len),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionComparison {
    pub added: usize,
    pub removed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use skynet_core::types::Message;

    fn tree() -> SessionTree {
        SessionTree::new(SessionRecord::new("root-key"))
    }

    #[test]
    fn root_branch_starts_empty_and_is_main() {
        let t = tree();
        let s = t.session(ROOT_BRANCH_ID).unwrap();
        assert!(s.messages.is_empty());
    }

    #[test]
    fn branch_clone_then_merge_appends_delta_only() {
        let t = tree();
        t.append(ROOT_BRANCH_ID, Message::user("m1")).unwrap();
        t.append(ROOT_BRANCH_ID, Message::user("m2")).unwrap();

        let branch_id = t.create_branch(ROOT_BRANCH_ID, None, "feat", "user").unwrap();
        assert_eq!(t.session(&branch_id).unwrap().messages.len(), 2);

        t.append(&branch_id, Message::user("b1")).unwrap();
        t.merge_branch(&branch_id).unwrap();
        assert_eq!(t.session(ROOT_BRANCH_ID).unwrap().messages.len(), 3);

        // Second merge is a no-op: no duplication.
        t.merge_branch(&branch_id).unwrap();
        assert_eq!(t.session(ROOT_BRANCH_ID).unwrap().messages.len(), 3);
    }

    #[test]
    fn explicit_session_branch_requires_unique_nonempty_key() {
        let t = tree();
        let err = t
            .create_branch(ROOT_BRANCH_ID, Some(SessionRecord::new("")), "x", "user")
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));

        t.create_branch(ROOT_BRANCH_ID, Some(SessionRecord::new("dup")), "x", "user")
            .unwrap();
        let err = t
            .create_branch(ROOT_BRANCH_ID, Some(SessionRecord::new("dup")), "y", "user")
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument(_)));
    }

    #[test]
    fn merge_of_main_branch_errors() {
        let t = tree();
        assert!(matches!(
            t.merge_branch(ROOT_BRANCH_ID),
            Err(SessionError::MergeOfMainBranch)
        ));
    }

    #[test]
    fn depth_exceeded_rejects_too_deep_branches() {
        let t = SessionTree::with_max_depth(SessionRecord::new("root-key"), 2);
        let b1 = t.create_branch(ROOT_BRANCH_ID, None, "b1", "user").unwrap();
        let err = t.create_branch(&b1, None, "b2", "user").unwrap_err();
        assert!(matches!(err, SessionError::DepthExceeded { .. }));
    }

    #[test]
    fn get_path_returns_root_to_tip_chain() {
        let t = tree();
        let b1 = t.create_branch(ROOT_BRANCH_ID, None, "b1", "user").unwrap();
        let path = t.get_path(&b1).unwrap();
        assert_eq!(path, vec![ROOT_BRANCH_ID.to_string(), b1]);
    }

    #[test]
    fn get_path_of_unknown_branch_errs() {
        let t = tree();
        assert!(matches!(
            t.get_path("missing"),
            Err(SessionError::BranchNotFound { .. })
        ));
    }

    #[test]
    fn switch_branch_succeeds_for_siblings_sharing_root() {
        let t = tree();
        let b1 = t.create_branch(ROOT_BRANCH_ID, None, "b1", "user").unwrap();
        let b2 = t.create_branch(ROOT_BRANCH_ID, None, "b2", "user").unwrap();
        assert!(t.switch_branch(&b1, &b2).is_ok());
    }

    #[test]
    fn compare_sessions_counts_tail_delta() {
        let t = tree();
        t.append(ROOT_BRANCH_ID, Message::user("m1")).unwrap();
        let b1 = t.create_branch(ROOT_BRANCH_ID, None, "b1", "user").unwrap();
        t.append(&b1, Message::user("b-only-1")).unwrap();
        t.append(&b1, Message::user("b-only-2")).unwrap();

        let cmp = t.compare_sessions(ROOT_BRANCH_ID, &b1).unwrap();
        assert_eq!(cmp.added, 2);
        assert_eq!(cmp.removed, 0);
    }

    #[test]
    fn branch_of_unknown_parent_errs() {
        let t = tree();
        assert!(matches!(
            t.create_branch("missing", None, "x", "user"),
            Err(SessionError::BranchNotFound { .. })
        ));
    }
}
