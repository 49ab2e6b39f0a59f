//! Integration tests for the graph cache and unit-of-work layer

mod aggregate_cache;
mod config_integration;
mod cycle_safety;
mod edit_context;
mod full_cache;
mod propagation;
mod sled_store;
mod test_utils;
