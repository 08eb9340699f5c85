use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Where a skill was discovered from, in ascending priority order. Later
/// sources override earlier ones on a name collision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SkillSource {
    ExtraDir = 0,
    Plugin = 1,
    Bundled = 2,
    User = 3,
    Workspace = 4,
}

/// Whether a skill can be explicitly invoked by a user command and/or
/// offered to the model for autonomous invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationPolicy {
    pub user_invocable: bool,
    pub disable_model_invocation: bool,
}

impl InvocationPolicy {
    /// `false` when frontmatter set `disable-model-invocation` or a
    /// `requires` check failed; `user_invocable` is unaffected by either.
    pub fn model_invocable(&self) -> bool {
        !self.disable_model_invocation
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Skill {
    pub name: String,
    pub description: String,
    pub file_path: PathBuf,
    pub base_dir: PathBuf,
    pub source: SkillSource,
    /// Frontmatter-stripped body text.
    pub content: String,
    /// Raw frontmatter key/value pairs, including any not otherwise surfaced
    /// as a dedicated field (the spec calls this out as an "openclaw" bag of
    /// caller-defined metadata).
    pub frontmatter: HashMap<String, String>,
    pub metadata: HashMap<String, String>,
    pub invocation_policy: InvocationPolicy,
    pub requires: Vec<String>,
}

impl Skill {
    /// Convenience: eligible for model invocation (frontmatter didn't
    /// disable it, and its `requires` check passed). Still listed even when
    /// `false` — only actual dispatch is gated.
    pub fn invocable(&self) -> bool {
        self.invocation_policy.model_invocable()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillsChangeEvent {
    pub workspace: Option<String>,
    pub reason: String,
    pub changed_path: Option<PathBuf>,
    pub version: i64,
}
