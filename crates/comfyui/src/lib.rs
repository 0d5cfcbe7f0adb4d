//! ComfyUI WebSocket and REST client library.
//!
//! Provides the workflow template builder, typed message parsing, the
//! job monitor state machine, HTTP API wrappers, retry logic, and the
//! [`Engine`](engine::Engine) seam the pose pipeline is written against.

pub mod api;
pub mod client;
pub mod engine;
pub mod error;
pub mod history;
pub mod job;
pub mod messages;
pub mod monitor;
pub mod retry;
pub mod workflow;

pub use engine::{ComfyUIEngine, Engine, EngineConfig};
pub use error::EngineError;
pub use job::JobHandle;
