pub mod agent;
pub mod browser;
pub mod config;
pub mod error;
pub mod types;

pub use agent::{AgentError, AgentHandler, EchoAgent};
pub use browser::{BrowserError, BrowserHandler, BrowserRequest, BrowserResponse, NullBrowser};
pub use config::SkynetConfig;
pub use error::{Result, SkynetError};
