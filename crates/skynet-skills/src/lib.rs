pub mod error;
pub mod frontmatter;
pub mod plugin;
pub mod registry;
pub mod types;
pub mod version;
pub mod watcher;

pub use error::SkillError;
pub use plugin::{discover_and_load, load_plugin, HooksConfig, LoadedPlugin, McpServer};
pub use registry::SkillRegistry;
pub use types::{Skill, SkillSource, SkillsChangeEvent};
pub use version::SnapshotVersionManager;
pub use watcher::{SkillWatcher, WatcherManager, DEFAULT_DEBOUNCE_MS};
