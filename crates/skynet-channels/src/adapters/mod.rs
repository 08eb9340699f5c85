pub mod dingtalk;
pub mod feishu;
pub mod google_chat;
pub mod qq;
pub mod slack;
pub mod teams;
pub mod webhook_common;
pub mod wework;
pub mod whatsapp;
