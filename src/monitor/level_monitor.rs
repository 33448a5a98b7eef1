use std::collections::{HashMap, HashSet};

use crate::models::{Alert, Direction, PriceTick, TriggerLevels};

/// Turns a price stream into latched, one-shot crossing alerts.
///
/// A long alert fires when the price falls from strictly above the long
/// level to at-or-below it; a short alert fires when the price rises from
/// strictly below the short level to at-or-above it. Each (symbol,
/// direction) pair alerts at most once per monitoring session.
pub struct LevelMonitor {
    levels: HashMap<String, TriggerLevels>,
    prev_prices: HashMap<String, f64>,
    latched: HashSet<(String, Direction)>,
}

impl LevelMonitor {
    pub fn new(levels: Vec<TriggerLevels>) -> Self {
        tracing::info!("Monitoring levels for {} symbols", levels.len());
        for entry in &levels {
            tracing::info!(
                "  {} | long: {:?} | short: {:?}",
                entry.symbol,
                entry.long_level,
                entry.short_level
            );
        }

        Self {
            levels: levels
                .into_iter()
                .map(|entry| (entry.symbol.clone(), entry))
                .collect(),
            prev_prices: HashMap::new(),
            latched: HashSet::new(),
        }
    }

    /// Process one price observation. Returns the alerts it produced
    /// (usually none, at most one per direction).
    pub fn on_tick(&mut self, tick: &PriceTick) -> Vec<Alert> {
        let Some(levels) = self.levels.get(&tick.symbol) else {
            // No configured levels for this symbol
            return Vec::new();
        };
        let levels = levels.clone();

        // Store the current price unconditionally; the first observation
        // only seeds the previous price, there is nothing to cross yet.
        let Some(prev) = self.prev_prices.insert(tick.symbol.clone(), tick.price) else {
            return Vec::new();
        };

        let mut alerts = Vec::new();

        if let Some(level) = levels.long_level {
            if prev > level
                && tick.price <= level
                && self.latch(&tick.symbol, Direction::Long)
            {
                tracing::info!(
                    "LONG level crossed for {}: price {} <= {}",
                    tick.symbol,
                    tick.price,
                    level
                );
                alerts.push(Alert {
                    symbol: tick.symbol.clone(),
                    direction: Direction::Long,
                    price: tick.price,
                    level,
                    timestamp: tick.observed_at,
                });
            }
        }

        if let Some(level) = levels.short_level {
            if prev < level
                && tick.price >= level
                && self.latch(&tick.symbol, Direction::Short)
            {
                tracing::info!(
                    "SHORT level crossed for {}: price {} >= {}",
                    tick.symbol,
                    tick.price,
                    level
                );
                alerts.push(Alert {
                    symbol: tick.symbol.clone(),
                    direction: Direction::Short,
                    price: tick.price,
                    level,
                    timestamp: tick.observed_at,
                });
            }
        }

        alerts
    }

    /// Set the latch for (symbol, direction). Returns false if it was
    /// already set, in which case the crossing is silently ignored.
    fn latch(&mut self, symbol: &str, direction: Direction) -> bool {
        self.latched.insert((symbol.to_string(), direction))
    }

    /// Symbols this monitor has levels for
    pub fn symbols(&self) -> Vec<String> {
        self.levels.keys().cloned().collect()
    }
}
