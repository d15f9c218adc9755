//! Emission and caller throttling.

use crate::config::SharedConfig;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Timestamps of accepted hits inside a rolling window.
///
/// Not synchronized itself; owners keep it behind a lock.
#[derive(Debug, Clone)]
pub struct SlidingWindowCounter {
    window: Duration,
    limit: usize,
    hits: VecDeque<Instant>,
}

impl SlidingWindowCounter {
    pub fn new(limit: usize, window: Duration) -> Self {
        Self {
            window,
            limit,
            hits: VecDeque::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(&oldest) = self.hits.front() {
            if now.saturating_duration_since(oldest) >= self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    /// Hits still inside the window.
    pub fn count(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.hits.len()
    }

    /// Hits within the last `span`, which may be shorter than the window.
    pub fn count_within(&mut self, now: Instant, span: Duration) -> usize {
        self.prune(now);
        self.hits
            .iter()
            .rev()
            .take_while(|&&t| now.saturating_duration_since(t) < span)
            .count()
    }

    /// Whether another hit would stay within the limit.
    pub fn has_capacity(&mut self, now: Instant) -> bool {
        self.count(now) < self.limit
    }

    pub fn record(&mut self, now: Instant) {
        self.hits.push_back(now);
    }

    /// Record a hit if there is room.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        if self.has_capacity(now) {
            self.record(now);
            true
        } else {
            false
        }
    }

    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit;
    }

    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    pub fn last_hit(&self) -> Option<Instant> {
        self.hits.back().copied()
    }
}

const EMISSION_WINDOW: Duration = Duration::from_secs(3600);

/// Caps emitted directives per scope and requests per caller.
pub struct RateLimiter {
    config: Arc<SharedConfig>,
    emissions: DashMap<String, SlidingWindowCounter>,
    commands: DashMap<String, SlidingWindowCounter>,
}

impl RateLimiter {
    pub fn new(config: Arc<SharedConfig>) -> Arc<Self> {
        Arc::new(Self {
            config,
            emissions: DashMap::new(),
            commands: DashMap::new(),
        })
    }

    /// Whether one more directive may be emitted in `scope` this hour.
    pub fn allow_emission(&self, scope: &str) -> bool {
        self.allow_emission_at(scope, Instant::now())
    }

    pub fn allow_emission_at(&self, scope: &str, now: Instant) -> bool {
        let limit = self.config.snapshot().rate_limit.max_signals_per_hour;
        let mut counter = self
            .emissions
            .entry(scope.to_string())
            .or_insert_with(|| SlidingWindowCounter::new(limit, EMISSION_WINDOW));
        counter.set_limit(limit);

        let allowed = counter.try_acquire(now);
        if !allowed {
            debug!("Emission limit reached for {} ({}/h)", scope, limit);
        }
        allowed
    }

    /// Whether a caller may issue another command in the current window.
    pub fn allow_command(&self, caller_id: &str) -> bool {
        self.allow_command_at(caller_id, Instant::now())
    }

    pub fn allow_command_at(&self, caller_id: &str, now: Instant) -> bool {
        let cfg = self.config.snapshot();
        let limit = cfg.rate_limit.max_user_commands_per_minute;
        let window = Duration::from_secs(cfg.rate_limit.command_window_secs);

        let mut counter = self
            .commands
            .entry(caller_id.to_string())
            .or_insert_with(|| SlidingWindowCounter::new(limit, window));
        counter.set_limit(limit);
        counter.set_window(window);

        let allowed = counter.try_acquire(now);
        if !allowed {
            debug!("Command limit reached for caller {}", caller_id);
        }
        allowed
    }

    /// Forget callers idle longer than the configured purge age.
    pub fn purge_idle(&self) -> usize {
        self.purge_idle_at(Instant::now())
    }

    pub fn purge_idle_at(&self, now: Instant) -> usize {
        let idle = Duration::from_secs(self.config.snapshot().rate_limit.idle_purge_secs);
        let before = self.commands.len();
        self.commands.retain(|_, counter| {
            counter
                .last_hit()
                .map(|t| now.saturating_duration_since(t) < idle)
                .unwrap_or(false)
        });
        let purged = before.saturating_sub(self.commands.len());
        if purged > 0 {
            debug!("Purged {} idle caller windows", purged);
        }
        purged
    }

    pub fn tracked_callers(&self) -> usize {
        self.commands.len()
    }
}
