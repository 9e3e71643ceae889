//! Property-based tests for batch ordering and ladder invariants
