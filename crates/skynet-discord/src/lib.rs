pub mod adapter;

pub use adapter::DiscordAdapter;
