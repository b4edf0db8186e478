// src/acquisition/mod.rs
//! Streaming block acquisition

pub mod engine;

pub use engine::{Consumer, RunStats, StreamingEngine};
