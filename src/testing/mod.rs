//! Testing utilities and mock implementations
//!
//! Mock adapters (agent runner, issue board, workspace, clock) so the engine,
//! hub, and poller can be exercised without external services.

pub mod mocks;

pub use mocks::*;
