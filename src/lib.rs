pub mod agent;
pub mod agent_sdk;
pub mod client;
pub mod codec;
pub mod config;
pub mod conversation;
pub mod normalizer;
pub mod protocol;
pub mod pump;
pub mod recorder;
pub mod render;
pub mod server;
pub mod stream_parser;
