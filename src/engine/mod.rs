// Windowed alert counting and the Entry/Cancel decision
pub mod aggregator;

pub use aggregator::{AggregatorConfig, AlertAggregator};
