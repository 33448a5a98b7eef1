use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::models::{Alert, Direction, ScenarioSignal};

/// Thresholds and timing of the alert windows
#[derive(Debug, Clone, Copy)]
pub struct AggregatorConfig {
    /// Distinct symbols needed to open a window
    pub open_threshold: usize,
    /// Extra distinct symbols (beyond the open threshold) that cancel the
    /// scenario when they pile on before the timeout
    pub cancel_overflow: usize,
    /// Grace period a window must survive before an Entry fires
    pub alert_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            open_threshold: 3,
            cancel_overflow: 5,
            alert_timeout: Duration::minutes(60),
        }
    }
}

/// Accumulation state for one direction. `opened_at` doubles as the
/// Idle/Accumulating flag: it is set exactly when the open threshold of
/// distinct symbols is first reached, and unset when a decision fires.
#[derive(Debug, Default)]
struct AlertWindow {
    opened_at: Option<DateTime<Utc>>,
    seen: HashMap<String, Vec<DateTime<Utc>>>,
}

enum WindowDecision {
    Entry,
    Cancel,
}

impl AlertWindow {
    fn record(&mut self, symbol: &str, timestamp: DateTime<Utc>, open_threshold: usize) {
        self.seen
            .entry(symbol.to_string())
            .or_default()
            .push(timestamp);

        if self.opened_at.is_none() && self.seen.len() >= open_threshold {
            // The alert that brought in the Nth distinct symbol starts the clock
            self.opened_at = Some(timestamp);
        }
    }

    /// Evaluate Entry then Cancel, in that order. Once the timeout has
    /// elapsed only Entry can fire, even with the cancel count reached;
    /// that ordering is deliberate and load-bearing.
    fn evaluate(&mut self, now: DateTime<Utc>, config: &AggregatorConfig) -> Option<WindowDecision> {
        let opened_at = self.opened_at?;
        let elapsed = now - opened_at;

        if self.seen.len() >= config.open_threshold && elapsed >= config.alert_timeout {
            self.reset();
            return Some(WindowDecision::Entry);
        }

        if self.seen.len() >= config.open_threshold + config.cancel_overflow
            && elapsed <= config.alert_timeout
        {
            self.reset();
            return Some(WindowDecision::Cancel);
        }

        None
    }

    fn reset(&mut self) {
        self.seen.clear();
        self.opened_at = None;
    }
}

/// Converts the stream of crossing alerts for each direction into exactly
/// one Entry or Cancel signal per scenario, then resets. The Long and Short
/// windows never interact.
pub struct AlertAggregator {
    config: AggregatorConfig,
    long: AlertWindow,
    short: AlertWindow,
}

impl AlertAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            long: AlertWindow::default(),
            short: AlertWindow::default(),
        }
    }

    fn window_mut(&mut self, direction: Direction) -> &mut AlertWindow {
        match direction {
            Direction::Long => &mut self.long,
            Direction::Short => &mut self.short,
        }
    }

    /// Append an alert to its direction's window and evaluate the
    /// thresholds as one atomic step, at the alert's own timestamp.
    pub fn apply(&mut self, alert: &Alert) -> Option<ScenarioSignal> {
        let config = self.config;
        let window = self.window_mut(alert.direction);

        let was_idle = window.opened_at.is_none();
        window.record(&alert.symbol, alert.timestamp, config.open_threshold);
        if was_idle {
            if let Some(opened_at) = window.opened_at {
                tracing::info!(
                    "{} window opened at {} ({} distinct symbols)",
                    alert.direction,
                    opened_at,
                    window.seen.len()
                );
            }
        }

        let decision = window.evaluate(alert.timestamp, &config);
        self.signal(alert.direction, decision)
    }

    /// Wall-clock re-evaluation. Entry depends on elapsed time, not just on
    /// alert arrival, so this must run periodically even when no alerts come.
    pub fn evaluate_at(&mut self, now: DateTime<Utc>) -> Vec<ScenarioSignal> {
        let config = self.config;
        let mut signals = Vec::new();

        for direction in [Direction::Long, Direction::Short] {
            let decision = self.window_mut(direction).evaluate(now, &config);
            if let Some(signal) = self.signal(direction, decision) {
                signals.push(signal);
            }
        }

        signals
    }

    fn signal(
        &self,
        direction: Direction,
        decision: Option<WindowDecision>,
    ) -> Option<ScenarioSignal> {
        match decision {
            Some(WindowDecision::Entry) => {
                tracing::info!("Entry signal for {} scenario", direction);
                Some(ScenarioSignal::Entry(direction))
            }
            Some(WindowDecision::Cancel) => {
                tracing::info!("Cancel signal for {} scenario", direction);
                Some(ScenarioSignal::Cancel(direction))
            }
            None => None,
        }
    }

    #[cfg(test)]
    fn distinct_symbols(&self, direction: Direction) -> usize {
        match direction {
            Direction::Long => self.long.seen.len(),
            Direction::Short => self.short.seen.len(),
        }
    }

    #[cfg(test)]
    fn opened_at(&self, direction: Direction) -> Option<DateTime<Utc>> {
        match direction {
            Direction::Long => self.long.opened_at,
            Direction::Short => self.short.opened_at,
        }
    }
}
