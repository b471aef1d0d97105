pub mod category;
pub mod cycle;
pub mod diff;
pub mod engine;
pub mod result_aggregator;
pub mod scope;
pub mod state;
pub mod target_manager;
pub mod throttle;
