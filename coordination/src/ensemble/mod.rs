//! Execution, arbitration and synthesis stages
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                  ExecutionCoordinator                      │
//! │  • Dispatches routed subtasks concurrently                 │
//! │  • Per-mode and process-wide concurrency bounds            │
//! │  • Timeout, one transient retry, one breaker report        │
//! └─────────────────────────┬─────────────────────────────────┘
//!                           │ ExecutionResult per subtask
//!                           ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │                   ArbitrationLayer                         │
//! │  • Groups overlapping answers of the same task type        │
//! │  • Keeps the most confident, records every decision        │
//! └─────────────────────────┬─────────────────────────────────┘
//!                           │ ArbitrationOutcome
//!                           ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │                    SynthesisLayer                          │
//! │  • Composes pieces in subtask order                        │
//! │  • Aggregate confidence, cost and models used              │
//! └───────────────────────────────────────────────────────────┘
//! ```

pub mod arbitration;
pub mod coordinator;
pub mod synthesis;

pub use arbitration::{
    similarity, ArbitratedPiece, ArbitrationDecision, ArbitrationLayer, ArbitrationOutcome,
    DecisionOutcome,
};
pub use coordinator::{ExecutionCoordinator, SharedExecutionCoordinator};
pub use synthesis::{
    aggregate_confidence, aggregate_cost, models_used, SynthesisLayer, SynthesisOutput,
};
