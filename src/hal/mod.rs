// src/hal/mod.rs
//! Hardware Abstraction Layer for amplifier backends

pub mod traits;
pub mod types;
pub mod simulator;

pub use traits::*;
pub use types::*;
