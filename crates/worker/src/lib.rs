//! `viewfarm-worker` library crate.
//!
//! The render dispatcher, its GPU-pinned workers and the adapter that
//! launches the rendering application. The binary entrypoint lives in
//! `main.rs`; modules are public for integration testing.

pub mod config;
pub mod dispatcher;
pub mod gpu;
pub mod renderer;
pub mod worker;

pub use dispatcher::{DispatchConfig, DispatchError, DispatchSummary, Dispatcher};
pub use renderer::{BlenderRenderer, RenderBackend, RenderReport, RenderRequest};
