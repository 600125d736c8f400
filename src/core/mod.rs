pub mod builtin_providers;
pub mod chat;
pub mod chat_stream;
pub mod config;
pub mod context;
pub mod message;
pub mod providers;
pub mod session;
pub mod store;
