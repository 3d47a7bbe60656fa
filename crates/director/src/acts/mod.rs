//! Concrete Acts.

pub mod group_chat;

pub use group_chat::GroupChatAct;
