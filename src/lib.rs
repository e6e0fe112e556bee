pub mod api;
pub mod core;
pub mod crawler;
pub mod discovery;
pub mod embedder;
pub mod fingerprint;
pub mod frontier;
pub mod jobs;
pub mod keyword_index;
pub mod learned_web;
pub mod normalize;
pub mod pending_worker;
pub mod pipeline;
pub mod search;
pub mod vector_store;

pub use core::types;
pub use core::types::*;
pub use core::{AppState, Config, Paths};
