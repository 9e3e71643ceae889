//! Integration tests for the genjob orchestrator

mod batch_scenarios;
mod cancellation;
mod materialization;
