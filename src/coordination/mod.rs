//! Coordination of atomic transactions and the swaps built from them
//!
//! The coordination layer:
//! 1. Drives each atomic transaction through custody signing and broadcast
//! 2. Builds export legs and, once they confirm, the matching import legs
//! 3. Polls the store and advances every record that still has work left

pub mod engine;
pub mod lifecycle;
pub mod swap;

pub use engine::CoordinationEngine;
pub use lifecycle::AtomicTxProcessor;
pub use swap::{SwapOrchestrator, SwapRequest};
