// JSON-RPC method names the gateway's method registry dispatches on.

pub const HEALTH: &str = "health";

pub const CONFIG_GET: &str = "config.get";
pub const CONFIG_SET: &str = "config.set";

pub const LOGS_GET: &str = "logs.get";

pub const AGENT: &str = "agent";
pub const AGENT_WAIT: &str = "agent.wait";
pub const AGENT_STREAM: &str = "agent.stream";

pub const SESSIONS_LIST: &str = "sessions.list";
pub const SESSIONS_GET: &str = "sessions.get";
pub const SESSIONS_CLEAR: &str = "sessions.clear";

pub const CHANNELS_LIST: &str = "channels.list";
pub const CHANNELS_STATUS: &str = "channels.status";

pub const SEND: &str = "send";
pub const CHAT_SEND: &str = "chat.send";

pub const BROWSER_REQUEST: &str = "browser.request";

/// All method names the gateway's registry knows how to dispatch, used to
/// build the initial registry and in tests asserting coverage.
pub const ALL: &[&str] = &[
    HEALTH,
    CONFIG_GET,
    CONFIG_SET,
    LOGS_GET,
    AGENT,
    AGENT_WAIT,
    AGENT_STREAM,
    SESSIONS_LIST,
    SESSIONS_GET,
    SESSIONS_CLEAR,
    CHANNELS_LIST,
    CHANNELS_STATUS,
    SEND,
    CHAT_SEND,
    BROWSER_REQUEST,
];
