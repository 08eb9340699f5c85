pub mod adapters;
pub mod channel;
pub mod error;
pub mod manager;
pub mod types;
pub mod verify;

pub use channel::{BaseRuntime, Channel};
pub use error::ChannelError;
pub use manager::ChannelManager;
pub use types::{AllowList, ChannelStatus};
