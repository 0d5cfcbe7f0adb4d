//! Pure domain values for pose generation.
//!
//! Nothing in this crate performs I/O. The engine client lives in
//! `texture-comfyui` and the orchestration in `texture-pipeline`.

pub mod error;
pub mod poses;
pub mod prompt;
pub mod types;
