//! Periodic sampling of host and process statistics.

use parking_lot::Mutex;
use std::sync::Arc;
use sysinfo::{Pid, System};
use tally_core::Store;
use tracing::{debug, warn};

/// Counter bumped once per poll
pub const POLL_COUNT: &str = "PollCount";

/// Gauge refreshed with a fresh random value on every poll
pub const RANDOM_VALUE: &str = "RandomValue";

/// Samples statistics into its own store
pub struct Collector {
    store: Arc<Store>,
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector {
    pub fn new() -> Self {
        let pid = match sysinfo::get_current_pid() {
            Ok(pid) => Some(pid),
            Err(e) => {
                warn!("Process statistics unavailable: {}", e);
                None
            }
        };
        Self {
            store: Arc::new(Store::new()),
            system: Mutex::new(System::new_all()),
            pid,
        }
    }

    /// Store the reporter reads from
    pub fn store(&self) -> Arc<Store> {
        self.store.clone()
    }

    /// Take one sample of every statistic
    pub fn poll(&self) {
        let gauges = self.sample();
        let count = gauges.len();
        for (name, value) in gauges {
            if let Err(e) = self.store.set_gauge(&name, value) {
                warn!(name = %name, error = %e, "Dropped sample");
            }
        }

        if let Err(e) = self.store.set_gauge(RANDOM_VALUE, rand::random::<f64>()) {
            warn!(error = %e, "Dropped random value");
        }
        if let Err(e) = self.store.add_counter(POLL_COUNT, 1) {
            warn!(error = %e, "Dropped poll count");
        }
        debug!(gauges = count + 1, "Polled statistics");
    }

    fn sample(&self) -> Vec<(String, f64)> {
        let mut system = self.system.lock();
        system.refresh_memory();
        system.refresh_cpu();

        let mut gauges = vec![
            ("TotalMemory".to_string(), system.total_memory() as f64),
            ("FreeMemory".to_string(), system.free_memory() as f64),
            ("UsedMemory".to_string(), system.used_memory() as f64),
            ("AvailableMemory".to_string(), system.available_memory() as f64),
            ("TotalSwap".to_string(), system.total_swap() as f64),
            ("FreeSwap".to_string(), system.free_swap() as f64),
            (
                "CPUutilization".to_string(),
                system.global_cpu_info().cpu_usage() as f64,
            ),
        ];

        let load = System::load_average();
        gauges.push(("LoadAverage1".to_string(), load.one));
        gauges.push(("LoadAverage5".to_string(), load.five));
        gauges.push(("LoadAverage15".to_string(), load.fifteen));

        for (index, cpu) in system.cpus().iter().enumerate() {
            gauges.push((
                format!("CPUutilization{}", index + 1),
                cpu.cpu_usage() as f64,
            ));
        }

        if let Some(pid) = self.pid {
            if system.refresh_process(pid) {
                if let Some(process) = system.process(pid) {
                    gauges.push(("ProcessResidentMemory".to_string(), process.memory() as f64));
                    gauges.push((
                        "ProcessVirtualMemory".to_string(),
                        process.virtual_memory() as f64,
                    ));
                    gauges.push(("ProcessCPUUsage".to_string(), process.cpu_usage() as f64));
                    gauges.push(("ProcessRunTime".to_string(), process.run_time() as f64));
                }
            }
        }

        gauges
    }
}
