// Per-symbol level-crossing detection
pub mod level_monitor;

pub use level_monitor::LevelMonitor;
