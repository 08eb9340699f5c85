//! Central shared state for the gateway's HTTP/WS surface.
//!
//! One [`AppState`] is constructed per process and passed as `Arc<AppState>`
//! to every axum handler and every JSON-RPC method handler.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use skynet_bus::MessageBus;
use skynet_channels::adapters::{dingtalk, feishu, google_chat, qq, slack, teams, whatsapp, wework};
use skynet_channels::{AllowList, Channel, ChannelManager};
use skynet_core::config::{ChannelAccountEntry, ChannelConfigEntry, SkillsConfig, SkynetConfig};
use skynet_core::{AgentHandler, BrowserHandler, EchoAgent, NullBrowser};
use skynet_discord::DiscordAdapter;
use skynet_scheduler::{SchedulerEngine, SchedulerHandle};
use skynet_sessions::{SessionCache, SessionStore};
use skynet_skills::{SkillRegistry, SkillSource, SnapshotVersionManager, WatcherManager};
use skynet_telegram::TelegramAdapter;
use tracing::warn;

use crate::gateway_channel::GatewayChannel;
use crate::logging::LogRing;
use crate::rpc::MethodRegistry;
use crate::ws::notifier::SessionNotifier;

const DEFAULT_SESSION_CACHE_TTL_SECS: u64 = 3600;
const DEFAULT_SESSION_CACHE_MAX_ENTRIES: usize = 1000;
const BUS_BUFFER_SIZE: usize = 256;
const BUNDLED_SKILLS_DIR_ENV: &str = "SKYNET_BUNDLED_SKILLS_DIR";

pub struct AppState {
    pub config: RwLock<SkynetConfig>,
    pub bus: Arc<MessageBus>,
    pub sessions: SessionCache,
    pub channels: Arc<ChannelManager>,
    pub gateway_channel: Arc<GatewayChannel>,
    pub skills: SkillRegistry,
    pub skill_versions: Arc<SnapshotVersionManager>,
    pub skill_watcher: WatcherManager,
    pub scheduler: SchedulerHandle,
    pub agent: Arc<dyn AgentHandler>,
    pub browser: Arc<dyn BrowserHandler>,
    pub log_ring: Arc<LogRing>,
    pub notifier: Arc<SessionNotifier>,
    pub registry: Arc<MethodRegistry>,
}

impl AppState {
    /// Assemble the full application from a loaded config: bus, session
    /// cache (rooted at `workspace.path/sessions`), the gateway's own
    /// pseudo-channel, and every enabled channel adapter the config names.
    /// Returns the constructed state plus the [`SchedulerEngine`] driving
    /// `scheduler`, which the caller (`main.rs`) is responsible for running.
    pub fn build(config: SkynetConfig, log_ring: Arc<LogRing>) -> (Arc<Self>, SchedulerEngine) {
        let bus = Arc::new(MessageBus::new(BUS_BUFFER_SIZE));

        let sessions_root = format!("{}/sessions", config.workspace.expanded_path());
        let store = SessionStore::new(sessions_root).unwrap_or_else(|e| {
            warn!(error = %e, "failed to open session store at configured path, falling back to a temp dir");
            SessionStore::new(std::env::temp_dir().join("skynet-sessions"))
                .expect("temp dir session store must be constructible")
        });
        let sessions = SessionCache::new(
            store,
            std::time::Duration::from_secs(DEFAULT_SESSION_CACHE_TTL_SECS),
            DEFAULT_SESSION_CACHE_MAX_ENTRIES,
        );

        let gateway_channel = Arc::new(GatewayChannel::new());
        let channels = Arc::new(ChannelManager::new());
        if let Err(e) = channels.register(gateway_channel.clone()) {
            warn!(error = %e, "failed to register the gateway's own pseudo-channel");
        }
        register_channels_from_config(&channels, &config);

        let scheduler_engine = SchedulerEngine::new(bus.clone());
        let scheduler = scheduler_engine.handle();

        let skills = SkillRegistry::new();
        let workspace_path = config.workspace.expanded_path();
        let roots = resolve_skill_roots(&config.skills, &workspace_path);
        if let Err(e) = skills.load_all(&roots) {
            warn!(error = %e, "failed to load skill registry on startup");
        }

        let skill_versions = Arc::new(SnapshotVersionManager::new());
        let skill_watcher = WatcherManager::new();
        if config.skills.watch {
            // Only roots that exist yet are worth a watch handle — most
            // installs won't have all five resolved directories present.
            let paths: Vec<PathBuf> = roots.into_iter().map(|(_, path)| path).filter(|p| p.is_dir()).collect();
            if !paths.is_empty() {
                if let Err(e) = skill_watcher.repath(paths, None, skill_versions.clone(), config.skills.debounce_ms) {
                    warn!(error = %e, "failed to start skill filesystem watcher");
                }
            }
        }

        let state = Arc::new(Self {
            config: RwLock::new(config),
            bus,
            sessions,
            channels,
            gateway_channel,
            skills,
            skill_versions,
            skill_watcher,
            scheduler,
            agent: Arc::new(EchoAgent),
            browser: Arc::new(NullBrowser),
            log_ring,
            notifier: Arc::new(SessionNotifier::new()),
            registry: Arc::new(MethodRegistry::build()),
        });
        (state, scheduler_engine)
    }

    /// A fully in-memory/tempdir-backed instance for unit tests: no real
    /// channel adapters, `EchoAgent`/`NullBrowser` defaults, a fresh bus.
    #[cfg(test)]
    pub fn for_test() -> Arc<Self> {
        let config = test_config();
        let bus = Arc::new(MessageBus::new(BUS_BUFFER_SIZE));
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SessionStore::new(dir.path()).expect("session store");
        std::mem::forget(dir); // kept alive for the life of the test process

        let gateway_channel = Arc::new(GatewayChannel::new());
        let channels = Arc::new(ChannelManager::new());
        let _ = channels.register(gateway_channel.clone());

        let scheduler = SchedulerEngine::new(bus.clone()).handle();

        Arc::new(Self {
            config: RwLock::new(config),
            bus,
            sessions: SessionCache::new(store, std::time::Duration::from_secs(60), 100),
            channels,
            gateway_channel,
            skills: SkillRegistry::new(),
            skill_versions: Arc::new(SnapshotVersionManager::new()),
            skill_watcher: WatcherManager::new(),
            scheduler,
            agent: Arc::new(EchoAgent),
            browser: Arc::new(NullBrowser),
            log_ring: Arc::new(LogRing::default()),
            notifier: Arc::new(SessionNotifier::new()),
            registry: Arc::new(MethodRegistry::build()),
        })
    }
}

#[cfg(test)]
fn test_config() -> SkynetConfig {
    use skynet_core::config::{AgentsConfig, ApiKeyProvider, ChannelsConfig, GatewayConfig, LoggingConfig, ProvidersConfig, SkillsConfig, ToolsConfig, WorkspaceConfig};
    SkynetConfig {
        agents: AgentsConfig::default(),
        providers: ProvidersConfig {
            anthropic: Some(ApiKeyProvider { api_key: "sk-ant-test-0000000000".into() }),
            ..Default::default()
        },
        gateway: GatewayConfig::default(),
        channels: ChannelsConfig::default(),
        tools: ToolsConfig::default(),
        workspace: WorkspaceConfig::default(),
        logging: LoggingConfig::default(),
        skills: SkillsConfig::default(),
    }
}

/// Resolve every skill root in ascending priority order (later entries
/// override earlier ones on a name collision): config extra-dirs, plugin-
/// provided skill dirs, the bundled directory, the user-managed directory,
/// then the workspace directory.
fn resolve_skill_roots(config: &SkillsConfig, workspace_path: &str) -> Vec<(SkillSource, PathBuf)> {
    let mut roots = Vec::new();

    for dir in &config.extra_dirs {
        roots.push((SkillSource::ExtraDir, PathBuf::from(dir)));
    }

    let mut plugin_search_dirs: Vec<PathBuf> = config.plugin_dirs.iter().map(PathBuf::from).collect();
    if let Some(home) = std::env::var_os("HOME") {
        plugin_search_dirs.push(PathBuf::from(home).join(".claude/plugins"));
    }
    plugin_search_dirs.push(PathBuf::from(workspace_path).join(".claude/plugins"));
    match skynet_skills::discover_and_load(&plugin_search_dirs, std::path::Path::new(workspace_path)) {
        Ok(plugins) => {
            for plugin in plugins {
                for dir in plugin.skill_dirs {
                    roots.push((SkillSource::Plugin, dir));
                }
            }
        }
        Err(e) => warn!(error = %e, "failed to discover plugins"),
    }

    roots.push((SkillSource::Bundled, bundled_skills_dir()));

    let user_dir = std::env::var_os("HOME")
        .map(|home| PathBuf::from(home).join(".skynet/skills"))
        .unwrap_or_else(|| PathBuf::from(".skynet/skills"));
    roots.push((SkillSource::User, user_dir));

    roots.push((SkillSource::Workspace, PathBuf::from(workspace_path).join("skills")));

    roots
}

/// Bundled skills directory: `SKYNET_BUNDLED_SKILLS_DIR` env var, then a
/// `skills/` directory next to the running executable, then `./skills`.
fn bundled_skills_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(BUNDLED_SKILLS_DIR_ENV) {
        return PathBuf::from(dir);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(parent) = exe.parent() {
            return parent.join("skills");
        }
    }
    PathBuf::from("skills")
}

/// Register one adapter per enabled channel (or per enabled account, when
/// the channel config names an `accounts` map), pulling shared webhook
/// security fields down from the channel-level entry and leaving adapter
/// construction to whichever adapter the channel name resolves to. This is
/// the composition-root counterpart of what `ChannelManager` itself cannot
/// do: `skynet-channels` has no dependency on `skynet-discord`/
/// `skynet-telegram`, so only the binary that depends on every adapter
/// crate can wire concrete adapters from config.
fn register_channels_from_config(manager: &ChannelManager, config: &SkynetConfig) {
    for (name, entry) in &config.channels.entries {
        if !entry.enabled {
            continue;
        }
        if entry.accounts.is_empty() {
            register_one(manager, name, "default", entry, None);
        } else {
            for (account_id, account) in &entry.accounts {
                if !account.enabled {
                    continue;
                }
                register_one(manager, name, account_id, entry, Some(account));
            }
        }
    }
}

fn register_one(
    manager: &ChannelManager,
    channel: &str,
    account_id: &str,
    entry: &ChannelConfigEntry,
    account: Option<&ChannelAccountEntry>,
) {
    let allowed_ids = account
        .filter(|a| !a.allowed_ids.is_empty())
        .map(|a| a.allowed_ids.clone())
        .unwrap_or_else(|| entry.allowed_ids.clone());
    let allowlist = AllowList::new(allowed_ids);

    let credential = |key: &str| -> Option<String> {
        account
            .and_then(|a| a.credentials.get(key))
            .or_else(|| entry.credentials.get(key))
            .cloned()
    };

    let adapter: Option<Arc<dyn Channel>> = match channel {
        "telegram" => credential("bot_token").and_then(|tok| {
            match TelegramAdapter::new(account_id, tok, allowlist) {
                Ok(a) => Some(Arc::new(a) as Arc<dyn Channel>),
                Err(e) => {
                    warn!(channel, account_id, error = %e, "telegram adapter rejected its config");
                    None
                }
            }
        }),
        "discord" => credential("bot_token")
            .map(|tok| Arc::new(DiscordAdapter::new(account_id, tok, allowlist)) as Arc<dyn Channel>),
        "whatsapp" => credential("bridge_url")
            .map(|url| Arc::new(whatsapp::WhatsappAdapter::new(account_id, url, allowlist)) as Arc<dyn Channel>),
        "dingtalk" => credential("stream_ws_url")
            .map(|url| Arc::new(dingtalk::DingtalkAdapter::new(account_id, url, allowlist)) as Arc<dyn Channel>),
        "qq" => {
            let gateway_url = credential("gateway_url");
            let bot_token = credential("bot_token");
            gateway_url.zip(bot_token).map(|(url, tok)| {
                Arc::new(qq::QqAdapter::new(account_id, url, tok, qq::QQ_INTENTS, allowlist)) as Arc<dyn Channel>
            })
        }
        "feishu" => credential("webhook_url")
            .map(|url| Arc::new(feishu::new(account_id, url, allowlist)) as Arc<dyn Channel>),
        "wework" => credential("webhook_url")
            .map(|url| Arc::new(wework::new(account_id, url, allowlist)) as Arc<dyn Channel>),
        "slack" => credential("webhook_url")
            .map(|url| Arc::new(slack::new(account_id, url, allowlist)) as Arc<dyn Channel>),
        "teams" => credential("webhook_url")
            .map(|url| Arc::new(teams::new(account_id, url, allowlist)) as Arc<dyn Channel>),
        "google_chat" => credential("webhook_url")
            .map(|url| Arc::new(google_chat::new(account_id, url, allowlist)) as Arc<dyn Channel>),
        _ => {
            warn!(channel, "no adapter known for this channel name, skipping");
            None
        }
    };

    match adapter {
        Some(adapter) => {
            if let Err(e) = manager.register(adapter) {
                warn!(channel, account_id, error = %e, "failed to register channel adapter");
            }
        }
        None => warn!(channel, account_id, "missing required credentials, adapter not registered"),
    }
}

#[cfg(test)]
mod skill_root_tests {
    use super::*;

    #[test]
    fn roots_are_resolved_in_ascending_priority_order() {
        let config = SkillsConfig {
            extra_dirs: vec!["/extra".into()],
            plugin_dirs: vec![],
            watch: true,
            debounce_ms: 250,
        };
        let roots = resolve_skill_roots(&config, "/workspace");
        let sources: Vec<SkillSource> = roots.iter().map(|(s, _)| *s).collect();
        assert_eq!(sources.first(), Some(&SkillSource::ExtraDir));
        assert_eq!(sources.last(), Some(&SkillSource::Workspace));
        assert!(sources.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn bundled_dir_prefers_the_env_var_override() {
        std::env::set_var(BUNDLED_SKILLS_DIR_ENV, "/custom/skills");
        assert_eq!(bundled_skills_dir(), PathBuf::from("/custom/skills"));
        std::env::remove_var(BUNDLED_SKILLS_DIR_ENV);
    }
}
