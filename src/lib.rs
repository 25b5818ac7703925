//! Code execution relay: forwards snippets to a remote sandbox, falls back to a
//! restricted local `python3` child process for Python, and logs every attempt.

pub mod capabilities;
pub mod config;
pub mod error;
pub mod fallback;
pub mod http_server;
pub mod language;
pub mod orchestrator;
pub mod sandbox;
pub mod state;
pub mod store;
