//! Process and runtime resource gauges.
//!
//! A [`ResourceMonitor`] samples the process (resident and virtual memory,
//! CPU) and host memory through `sysinfo`, plus the tokio runtime's worker
//! and live task counts, and writes them as plain gauges. The task from
//! [`ResourceMonitor::spawn`] refreshes them every `metrics.resourceInterval`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{MetricDescriptor, MetricRegistry};
use crate::clock::SharedClock;
use crate::config::ConfigError;

pub const RESIDENT_MEMORY: &str = "process_resident_memory_bytes";
pub const VIRTUAL_MEMORY: &str = "process_virtual_memory_bytes";
pub const CPU_USAGE: &str = "process_cpu_usage_percent";
pub const UPTIME: &str = "process_uptime_seconds";
pub const SYSTEM_MEMORY_USED: &str = "system_memory_used_bytes";
pub const SYSTEM_MEMORY_TOTAL: &str = "system_memory_total_bytes";
pub const RUNTIME_WORKERS: &str = "runtime_workers";
pub const RUNTIME_ALIVE_TASKS: &str = "runtime_alive_tasks";

/// One reading. Fields are `None` when the platform or context cannot
/// provide them; those gauges keep their previous value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResourceSample {
    pub resident_memory_bytes: Option<u64>,
    pub virtual_memory_bytes: Option<u64>,
    pub cpu_usage_percent: Option<f32>,
    pub system_memory_used_bytes: Option<u64>,
    pub system_memory_total_bytes: Option<u64>,
    pub runtime_workers: Option<usize>,
    pub runtime_alive_tasks: Option<usize>,
    pub uptime: Duration,
}

/// Samples process and runtime resources into a registry.
#[derive(Debug)]
pub struct ResourceMonitor {
    registry: Arc<MetricRegistry>,
    clock: SharedClock,
    started: Instant,
    pid: Option<Pid>,
    system: Mutex<System>,
}

impl ResourceMonitor {
    pub fn new(registry: Arc<MetricRegistry>, clock: SharedClock) -> Result<Self, ConfigError> {
        for (name, help) in [
            (RESIDENT_MEMORY, "Resident set size of the process"),
            (VIRTUAL_MEMORY, "Virtual memory size of the process"),
            (CPU_USAGE, "Process CPU usage since the previous sample, in percent of one core"),
            (UPTIME, "Seconds since the resource monitor started"),
            (SYSTEM_MEMORY_USED, "Host memory in use"),
            (SYSTEM_MEMORY_TOTAL, "Host memory installed"),
            (RUNTIME_WORKERS, "Tokio runtime worker threads"),
            (RUNTIME_ALIVE_TASKS, "Tokio tasks currently alive"),
        ] {
            registry.register(MetricDescriptor::gauge(name, help))?;
        }

        let pid = sysinfo::get_current_pid()
            .inspect_err(|e| warn!(error = %e, "Process metrics unavailable"))
            .ok();
        let started = clock.now();
        Ok(Self {
            registry,
            clock,
            started,
            pid,
            system: Mutex::new(System::new()),
        })
    }

    /// Read current values without recording them.
    pub fn sample(&self) -> ResourceSample {
        let mut sample = ResourceSample {
            uptime: self.clock.now().saturating_duration_since(self.started),
            ..Default::default()
        };

        {
            let mut system = self.system.lock();
            system.refresh_memory();
            sample.system_memory_used_bytes = Some(system.used_memory());
            sample.system_memory_total_bytes = Some(system.total_memory());

            if let Some(pid) = self.pid {
                system.refresh_processes_specifics(
                    ProcessesToUpdate::Some(&[pid]),
                    true,
                    ProcessRefreshKind::nothing().with_memory().with_cpu(),
                );
                if let Some(process) = system.process(pid) {
                    sample.resident_memory_bytes = Some(process.memory());
                    sample.virtual_memory_bytes = Some(process.virtual_memory());
                    sample.cpu_usage_percent = Some(process.cpu_usage());
                }
            }
        }

        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let metrics = handle.metrics();
            sample.runtime_workers = Some(metrics.num_workers());
            sample.runtime_alive_tasks = Some(metrics.num_alive_tasks());
        }
        sample
    }

    /// Write `sample` to the gauges.
    pub fn record(&self, sample: &ResourceSample) {
        let gauges = [
            (RESIDENT_MEMORY, sample.resident_memory_bytes.map(|v| v as f64)),
            (VIRTUAL_MEMORY, sample.virtual_memory_bytes.map(|v| v as f64)),
            (CPU_USAGE, sample.cpu_usage_percent.map(f64::from)),
            (UPTIME, Some(sample.uptime.as_secs_f64())),
            (SYSTEM_MEMORY_USED, sample.system_memory_used_bytes.map(|v| v as f64)),
            (SYSTEM_MEMORY_TOTAL, sample.system_memory_total_bytes.map(|v| v as f64)),
            (RUNTIME_WORKERS, sample.runtime_workers.map(|v| v as f64)),
            (RUNTIME_ALIVE_TASKS, sample.runtime_alive_tasks.map(|v| v as f64)),
        ];
        for (name, value) in gauges {
            if let Some(value) = value {
                self.registry.set_gauge(name, value, &[]);
            }
        }
    }

    /// Sample and record in one step.
    pub fn refresh(&self) -> ResourceSample {
        let sample = self.sample();
        self.record(&sample);
        sample
    }

    /// Spawn the periodic refresh. The first sample is taken immediately;
    /// the task stops when `shutdown` is cancelled.
    pub fn spawn(self: &Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        // tokio::time::interval panics on a zero period.
        let period = interval.max(Duration::from_millis(1));
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let sample = monitor.refresh();
                        debug!(
                            rss = sample.resident_memory_bytes,
                            tasks = sample.runtime_alive_tasks,
                            "Resource gauges refreshed"
                        );
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Resource monitor shutting down");
                        break;
                    }
                }
            }
        })
    }
}
