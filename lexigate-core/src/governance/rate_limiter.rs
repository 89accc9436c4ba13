//! Per-client fixed-window rate limiting.
//!
//! Each client key gets a [`ClientWindow`] created lazily on its first
//! request. Windows live in a sharded `DashMap`; the entry guard serialises
//! concurrent admits for the same client, so no update is lost. Stale
//! windows are removed by [`RateLimiter::sweep`], normally driven by the
//! task from [`RateLimiter::spawn_sweeper`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::config::ConfigError;
use crate::config::defaults;
use crate::telemetry::{MetricDescriptor, MetricRegistry};

/// Key shared by every request without a usable client ID.
///
/// Not a valid network address, so it never merges with a real client.
pub const ANONYMOUS_CLIENT: &str = "__anonymous__";

/// Gauge of the current window count, labelled by `client`.
pub const CLIENT_REQUESTS: &str = "ratelimit_client_requests";
/// Counter of admit decisions, labelled by `outcome`.
pub const REQUESTS: &str = "ratelimit_requests";
/// Counter of rejected requests.
pub const REJECTED: &str = "ratelimit_rejected";
/// Counter of windows removed by the sweep.
pub const CLEANUP: &str = "ratelimit_cleanup";
/// Gauge of client windows currently held.
pub const TRACKED_CLIENTS: &str = "ratelimit_tracked_clients";
/// Counter of client gauge updates skipped because the gauge was full.
pub const CLIENT_GAUGE_OVERFLOW: &str = "ratelimit_client_gauge_overflow";

/// Limiter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimiterConfig {
    /// Requests admitted per client per window. Zero rejects everything.
    pub requests_per_window: u32,
    /// Window length. Must be non-zero.
    pub window: Duration,
    /// Distinct clients exported through `ratelimit_client_requests`.
    pub client_gauge_limit: usize,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            requests_per_window: defaults::REQUESTS_PER_WINDOW,
            window: defaults::WINDOW_DURATION,
            client_gauge_limit: defaults::CLIENT_GAUGE_LIMIT,
        }
    }
}

/// Decision for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmitResult {
    pub allowed: bool,
    /// Time until the client's window resets. Zero when allowed.
    pub retry_after: Duration,
}

/// Request count of one client in its current window.
#[derive(Debug, Clone, Copy)]
struct ClientWindow {
    count: u64,
    window_start: Instant,
    last_seen: Instant,
}

impl ClientWindow {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
            last_seen: now,
        }
    }

    /// Count one request at `now`, starting a fresh window if the current
    /// one has expired. Returns the count including this request.
    fn record(&mut self, now: Instant, window: Duration) -> u64 {
        if now.saturating_duration_since(self.window_start) >= window {
            self.window_start = now;
            self.count = 0;
        }
        self.count = self.count.saturating_add(1);
        self.last_seen = self.last_seen.max(now);
        self.count
    }

    fn remaining(&self, now: Instant, window: Duration) -> Duration {
        window.saturating_sub(now.saturating_duration_since(self.window_start))
    }
}

/// Per-client fixed-window limiter.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, ClientWindow>,
    config: RateLimiterConfig,
    clock: SharedClock,
    registry: Arc<MetricRegistry>,
}

impl RateLimiter {
    /// Create a limiter and declare its metrics.
    ///
    /// Fails with [`ConfigError::InvalidWindow`] on a zero window.
    pub fn new(
        config: RateLimiterConfig,
        clock: SharedClock,
        registry: Arc<MetricRegistry>,
    ) -> Result<Self, ConfigError> {
        if config.window.is_zero() {
            return Err(ConfigError::InvalidWindow);
        }

        registry.register(
            MetricDescriptor::gauge(CLIENT_REQUESTS, "Requests by client in the current window")
                .with_labels(&["client"])
                .with_max_label_values(config.client_gauge_limit),
        )?;
        registry.register(
            MetricDescriptor::counter(REQUESTS, "Rate limiter decisions by outcome")
                .with_labels(&["outcome"])
                .with_max_label_values(2),
        )?;
        registry.register(MetricDescriptor::counter(REJECTED, "Requests rejected by the rate limiter"))?;
        registry.register(MetricDescriptor::counter(CLEANUP, "Stale client windows removed"))?;
        registry.register(MetricDescriptor::gauge(TRACKED_CLIENTS, "Client windows currently tracked"))?;
        registry.register(MetricDescriptor::counter(
            CLIENT_GAUGE_OVERFLOW,
            "Client gauge updates skipped once client_gauge_limit clients are exported",
        ))?;

        info!(
            limit = config.requests_per_window,
            window_ms = config.window.as_millis() as u64,
            client_gauge_limit = config.client_gauge_limit,
            "Rate limiter configured"
        );

        Ok(Self {
            windows: DashMap::new(),
            config,
            clock,
            registry,
        })
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    /// Decide whether `client_id` may proceed.
    ///
    /// IDs are trimmed; an empty ID maps to [`ANONYMOUS_CLIENT`].
    ///
    /// Metrics are written after the shard guard is released. Two admits
    /// for the same client racing past that point may leave the client
    /// gauge one request behind until the next admit; the decision itself
    /// is always exact.
    ///
    /// Once `client_gauge_limit` clients are exported, further clients are
    /// not given a gauge. That is expected saturation, counted in
    /// `ratelimit_client_gauge_overflow` rather than as a dropped write.
    pub fn admit(&self, client_id: &str) -> AdmitResult {
        let key = client_key(client_id);
        let now = self.clock.now();
        let window = self.config.window;
        let limit = u64::from(self.config.requests_per_window);

        // The guard is dropped at the end of this block, before any metric write.
        let (count, result) = {
            let mut entry = match self.windows.get_mut(key) {
                Some(entry) => entry,
                None => self
                    .windows
                    .entry(key.to_string())
                    .or_insert_with(|| ClientWindow::new(now)),
            };
            let count = entry.record(now, window);
            let result = if count <= limit {
                AdmitResult {
                    allowed: true,
                    retry_after: Duration::ZERO,
                }
            } else {
                AdmitResult {
                    allowed: false,
                    retry_after: entry.remaining(now, window),
                }
            };
            (count, result)
        };

        let outcome = if result.allowed { "allowed" } else { "rejected" };
        if !self
            .registry
            .set_gauge_if_room(CLIENT_REQUESTS, count as f64, &[("client", key)])
        {
            self.registry.inc_counter(CLIENT_GAUGE_OVERFLOW, &[]);
        }
        self.registry.inc_counter(REQUESTS, &[("outcome", outcome)]);
        if !result.allowed {
            self.registry.inc_counter(REJECTED, &[]);
            debug!(
                client = key,
                count,
                retry_after_ms = result.retry_after.as_millis() as u64,
                "Request rate limited"
            );
        }
        self.registry
            .set_gauge(TRACKED_CLIENTS, self.windows.len() as f64, &[]);

        result
    }

    /// Remove windows idle for more than twice the window length.
    ///
    /// Returns the number of windows removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let stale_after = self.config.window.saturating_mul(2);

        let mut removed = Vec::new();
        self.windows.retain(|client, window| {
            let keep = now.saturating_duration_since(window.last_seen) <= stale_after;
            if !keep {
                removed.push(client.clone());
            }
            keep
        });

        for client in &removed {
            self.registry
                .remove_series(CLIENT_REQUESTS, &[("client", client.as_str())]);
        }
        self.registry.add_counter(CLEANUP, removed.len() as f64, &[]);
        self.registry
            .set_gauge(TRACKED_CLIENTS, self.windows.len() as f64, &[]);

        if !removed.is_empty() {
            debug!(
                removed = removed.len(),
                remaining = self.windows.len(),
                "Swept stale client windows"
            );
        }
        removed.len()
    }

    /// Number of client windows held.
    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }

    /// Spawn the periodic sweep. The task stops when `shutdown` is cancelled.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let limiter = Arc::clone(self);
        // tokio::time::interval panics on a zero period.
        let period = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick.tick().await; // first tick is immediate
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        limiter.sweep();
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Rate limiter sweeper shutting down");
                        break;
                    }
                }
            }
        })
    }
}

fn client_key(client_id: &str) -> &str {
    let trimmed = client_id.trim();
    if trimmed.is_empty() {
        ANONYMOUS_CLIENT
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter(limit: u32, window: Duration) -> (RateLimiter, Arc<ManualClock>, Arc<MetricRegistry>) {
        let clock = Arc::new(ManualClock::new());
        let registry = Arc::new(MetricRegistry::default());
        let config = RateLimiterConfig {
            requests_per_window: limit,
            window,
            client_gauge_limit: 100,
        };
        let limiter = RateLimiter::new(config, clock.clone(), registry.clone()).unwrap();
        (limiter, clock, registry)
    }

    #[test]
    fn test_allows_up_to_limit_then_rejects() {
        let (limiter, _clock, _registry) = limiter(2, Duration::from_secs(1));

        let results: Vec<_> = (0..3).map(|_| limiter.admit("c1")).collect();

        assert!(results[0].allowed);
        assert!(results[1].allowed);
        assert!(!results[2].allowed);
        assert_eq!(results[2].retry_after, Duration::from_secs(1));
    }

    #[test]
    fn test_window_reset_admits_again() {
        let (limiter, clock, _registry) = limiter(2, Duration::from_secs(1));
        for _ in 0..3 {
            limiter.admit("c1");
        }

        clock.advance(Duration::from_millis(1100));

        let result = limiter.admit("c1");
        assert!(result.allowed);
        assert_eq!(result.retry_after, Duration::ZERO);
    }

    #[test]
    fn test_retry_after_shrinks_within_window() {
        let (limiter, clock, _registry) = limiter(1, Duration::from_secs(10));
        limiter.admit("c1");
        clock.advance(Duration::from_secs(4));
        assert_eq!(limiter.admit("c1").retry_after, Duration::from_secs(6));
    }

    #[test]
    fn test_limit_plus_k_rejects_exactly_k() {
        let (limiter, _clock, _registry) = limiter(5, Duration::from_secs(60));
        let admitted: Vec<bool> = (0..8).map(|_| limiter.admit("c1").allowed).collect();
        assert_eq!(admitted, [true, true, true, true, true, false, false, false]);
    }

    #[test]
    fn test_clients_are_independent() {
        let (limiter, _clock, _registry) = limiter(1, Duration::from_secs(60));
        assert!(limiter.admit("10.0.0.1").allowed);
        assert!(!limiter.admit("10.0.0.1").allowed);
        assert!(limiter.admit("10.0.0.2").allowed);
        assert_eq!(limiter.tracked_clients(), 2);
    }

    #[test]
    fn test_zero_limit_always_rejects() {
        let (limiter, _clock, _registry) = limiter(0, Duration::from_secs(30));
        let result = limiter.admit("c1");
        assert!(!result.allowed);
        assert_eq!(result.retry_after, Duration::from_secs(30));
        assert!(!limiter.admit("c2").allowed);
    }

    #[test]
    fn test_zero_window_is_config_error() {
        let err = RateLimiter::new(
            RateLimiterConfig {
                window: Duration::ZERO,
                ..Default::default()
            },
            Arc::new(ManualClock::new()),
            Arc::new(MetricRegistry::default()),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWindow));
    }

    #[test]
    fn test_empty_client_ids_share_anonymous_bucket() {
        let (limiter, _clock, registry) = limiter(2, Duration::from_secs(60));
        assert!(limiter.admit("").allowed);
        assert!(limiter.admit("   ").allowed);
        assert!(!limiter.admit("").allowed);

        // A real client is unaffected.
        assert!(limiter.admit("127.0.0.1").allowed);

        let snapshot = registry.gather();
        assert_eq!(
            snapshot.gauge(CLIENT_REQUESTS, &[("client", ANONYMOUS_CLIENT)]),
            Some(3.0)
        );
    }

    #[test]
    fn test_client_ids_are_trimmed() {
        let (limiter, _clock, _registry) = limiter(1, Duration::from_secs(60));
        assert!(limiter.admit("c1").allowed);
        assert!(!limiter.admit(" c1 ").allowed);
        assert_eq!(limiter.tracked_clients(), 1);
    }

    #[test]
    fn test_records_metrics() {
        let (limiter, _clock, registry) = limiter(1, Duration::from_secs(60));
        limiter.admit("c1");
        limiter.admit("c1");
        limiter.admit("c1");

        let snapshot = registry.gather();
        assert_eq!(snapshot.counter(REQUESTS, &[("outcome", "allowed")]), Some(1.0));
        assert_eq!(snapshot.counter(REQUESTS, &[("outcome", "rejected")]), Some(2.0));
        assert_eq!(snapshot.counter(REJECTED, &[]), Some(2.0));
        assert_eq!(snapshot.gauge(CLIENT_REQUESTS, &[("client", "c1")]), Some(3.0));
        assert_eq!(snapshot.gauge(TRACKED_CLIENTS, &[]), Some(1.0));
    }

    #[test]
    fn test_client_gauge_is_cardinality_bounded() {
        let clock = Arc::new(ManualClock::new());
        let registry = Arc::new(MetricRegistry::default());
        let config = RateLimiterConfig {
            requests_per_window: 10,
            window: Duration::from_secs(60),
            client_gauge_limit: 2,
        };
        let limiter = RateLimiter::new(config, clock, registry.clone()).unwrap();

        for client in ["a", "b", "c"] {
            assert!(limiter.admit(client).allowed);
        }

        let snapshot = registry.gather();
        assert_eq!(snapshot.gauge(CLIENT_REQUESTS, &[("client", "c")]), None);
        assert_eq!(snapshot.counter(CLIENT_GAUGE_OVERFLOW, &[]), Some(1.0));
        // Saturation is not a caller fault.
        assert_eq!(registry.dropped_writes(), 0.0);
        // Admission itself is unaffected by the dropped gauge write.
        assert_eq!(limiter.tracked_clients(), 3);
    }

    #[test]
    fn test_sweep_removes_only_stale_windows() {
        let (limiter, clock, registry) = limiter(5, Duration::from_secs(1));
        limiter.admit("old");
        clock.advance(Duration::from_millis(1500));
        limiter.admit("fresh");

        // "old" is idle for exactly 2 windows: kept.
        clock.advance(Duration::from_millis(500));
        assert_eq!(limiter.sweep(), 0);

        clock.advance(Duration::from_millis(1));
        assert_eq!(limiter.sweep(), 1);
        assert_eq!(limiter.tracked_clients(), 1);

        let snapshot = registry.gather();
        assert_eq!(snapshot.counter(CLEANUP, &[]), Some(1.0));
        assert_eq!(snapshot.gauge(CLIENT_REQUESTS, &[("client", "old")]), None);
        assert_eq!(snapshot.gauge(CLIENT_REQUESTS, &[("client", "fresh")]), Some(1.0));
        assert_eq!(snapshot.gauge(TRACKED_CLIENTS, &[]), Some(1.0));
    }

    #[test]
    fn test_swept_client_starts_fresh() {
        let (limiter, clock, _registry) = limiter(1, Duration::from_secs(1));
        limiter.admit("c1");
        clock.advance(Duration::from_secs(3));
        limiter.sweep();
        assert!(limiter.admit("c1").allowed);
    }

    #[test]
    fn test_concurrent_admits_respect_limit() {
        let (limiter, _clock, registry) = limiter(100, Duration::from_secs(60));

        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| (0..50).filter(|_| limiter.admit("shared").allowed).count())
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(admitted, 100);
        let snapshot = registry.gather();
        assert_eq!(snapshot.counter(REQUESTS, &[("outcome", "allowed")]), Some(100.0));
        assert_eq!(snapshot.counter(REJECTED, &[]), Some(300.0));
    }

    #[test]
    fn test_sweep_concurrent_with_admits_loses_no_live_window() {
        let (limiter, clock, registry) = limiter(100, Duration::from_secs(60));
        // Stale clients for the sweeper to find while admits run.
        for i in 0..200 {
            limiter.admit(&format!("stale-{i}"));
        }
        clock.advance(Duration::from_secs(121));

        let admitted: usize = std::thread::scope(|scope| {
            let sweeper = scope.spawn(|| (0..200).map(|_| limiter.sweep()).sum::<usize>());
            let handles: Vec<_> = (0..8)
                .map(|_| {
                    scope.spawn(|| (0..50).filter(|_| limiter.admit("shared").allowed).count())
                })
                .collect();
            let admitted = handles.into_iter().map(|h| h.join().unwrap()).sum();
            assert_eq!(sweeper.join().unwrap(), 200);
            admitted
        });

        // A lost window would have restarted the count and admitted more.
        assert_eq!(admitted, 100);
        assert_eq!(limiter.tracked_clients(), 1);
        assert!(!limiter.admit("shared").allowed);

        let snapshot = registry.gather();
        assert_eq!(snapshot.counter(CLEANUP, &[]), Some(200.0));
        assert_eq!(snapshot.counter(REQUESTS, &[("outcome", "allowed")]), Some(300.0));
        assert_eq!(snapshot.gauge(CLIENT_REQUESTS, &[("client", "stale-0")]), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_task_runs_and_stops() {
        let clock = Arc::new(ManualClock::new());
        let limiter = Arc::new(
            RateLimiter::new(
                RateLimiterConfig {
                    requests_per_window: 1,
                    window: Duration::from_secs(1),
                    client_gauge_limit: 10,
                },
                clock.clone(),
                Arc::new(MetricRegistry::default()),
            )
            .unwrap(),
        );
        limiter.admit("c1");
        clock.advance(Duration::from_secs(5));

        let shutdown = CancellationToken::new();
        let handle = limiter.spawn_sweeper(Duration::from_secs(1), shutdown.clone());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(limiter.tracked_clients(), 0);

        shutdown.cancel();
        handle.await.unwrap();
    }
}
