//! Process resource sampling
//!
//! On Linux the sampler reads resident memory from `/proc/self/status` and CPU
//! time from `/proc/self/stat`. Other platforms report nothing.

use std::sync::{Mutex, PoisonError};

use super::metrics::ResourceUsage;

/// Source of process memory and CPU usage
pub trait ResourceSampler: Send + Sync {
    fn sample(&self) -> ResourceUsage;
}

/// Sampler with fixed values
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticResourceSampler {
    usage: ResourceUsage,
}

impl StaticResourceSampler {
    pub fn new(memory_bytes: Option<u64>, cpu_percent: Option<f64>) -> Self {
        Self {
            usage: ResourceUsage {
                memory_bytes,
                cpu_percent,
            },
        }
    }
}

impl ResourceSampler for StaticResourceSampler {
    fn sample(&self) -> ResourceUsage {
        self.usage
    }
}

// ----------------------------------------------------------------------------
// procfs Sampler
// ----------------------------------------------------------------------------

/// `sysconf(_SC_CLK_TCK)` on every mainstream Linux target
const CLOCK_TICKS_PER_SEC: f64 = 100.0;

/// Samples the current process through procfs
#[derive(Debug, Default)]
pub struct ProcessSampler {
    /// Wall-clock instant and cumulative CPU ticks of the previous sample
    previous: Mutex<Option<(std::time::Instant, u64)>>,
}

impl ProcessSampler {
    pub fn new() -> Self {
        Self::default()
    }

    fn cpu_percent(&self) -> Option<f64> {
        let ticks = read_cpu_ticks()?;
        let now = std::time::Instant::now();
        let mut previous = self.previous.lock().unwrap_or_else(PoisonError::into_inner);
        let percent = previous.and_then(|(at, prev_ticks)| {
            let wall = now.duration_since(at).as_secs_f64();
            if wall <= 0.0 {
                return None;
            }
            let cpu_secs = ticks.saturating_sub(prev_ticks) as f64 / CLOCK_TICKS_PER_SEC;
            Some(cpu_secs / wall * 100.0)
        });
        *previous = Some((now, ticks));
        percent
    }
}

impl ResourceSampler for ProcessSampler {
    fn sample(&self) -> ResourceUsage {
        ResourceUsage {
            memory_bytes: read_resident_memory(),
            cpu_percent: self.cpu_percent(),
        }
    }
}

#[cfg(target_os = "linux")]
fn read_resident_memory() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_vm_rss(&status)
}

#[cfg(not(target_os = "linux"))]
fn read_resident_memory() -> Option<u64> {
    None
}

#[cfg(target_os = "linux")]
fn read_cpu_ticks() -> Option<u64> {
    let stat = std::fs::read_to_string("/proc/self/stat").ok()?;
    parse_cpu_ticks(&stat)
}

#[cfg(not(target_os = "linux"))]
fn read_cpu_ticks() -> Option<u64> {
    None
}

/// Extract `VmRSS` (reported in kB) as bytes
fn parse_vm_rss(status: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with("VmRSS:"))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|kb| kb.parse::<u64>().ok())
        .map(|kb| kb * 1024)
}

/// Sum of `utime` and `stime` from a `/proc/<pid>/stat` line.
///
/// The command name may contain spaces, so fields are counted from the last
/// closing parenthesis: `state` is the first field after it.
fn parse_cpu_ticks(stat: &str) -> Option<u64> {
    let rest = &stat[stat.rfind(')')? + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    let utime = fields.get(11)?.parse::<u64>().ok()?;
    let stime = fields.get(12)?.parse::<u64>().ok()?;
    Some(utime + stime)
}
