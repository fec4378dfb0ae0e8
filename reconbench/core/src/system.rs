//! Host and process resource sampling.
//!
//! Readings come from `/proc` and `statvfs`. On hosts where a source is missing
//! the corresponding section is reported as zeroes instead of failing.

use reconbench_schemas::{CpuInfo, DiskInfo, GpuStatus, MemoryInfo, SystemInfo};
use std::{path::Path, time::Duration};
use tracing::debug;

/// Interval between the two `/proc/stat` samples used for CPU usage.
const CPU_SAMPLE_INTERVAL: Duration = Duration::from_millis(200);

/// Resident set size of the current process in bytes.
pub fn process_rss_bytes() -> Option<u64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    parse_kb_field(&status, "VmRSS:").map(|kb| kb * 1024)
}

/// Snapshot of CPU, memory and disk usage alongside the accelerator status.
pub async fn collect(gpu: GpuStatus, disk_path: &Path) -> SystemInfo {
    let disk_path = disk_path.to_path_buf();
    let disk = tokio::task::spawn_blocking(move || disk_usage(&disk_path))
        .await
        .unwrap_or_default();

    SystemInfo {
        gpu,
        cpu: cpu_usage().await,
        memory: memory_usage(),
        disk,
    }
}

async fn cpu_usage() -> CpuInfo {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);

    let Some(first) = read_cpu_times() else {
        return CpuInfo { cores, usage: 0.0 };
    };
    tokio::time::sleep(CPU_SAMPLE_INTERVAL).await;
    let Some(second) = read_cpu_times() else {
        return CpuInfo { cores, usage: 0.0 };
    };

    let total = second.total.saturating_sub(first.total);
    let idle = second.idle.saturating_sub(first.idle);
    let usage = if total == 0 {
        0.0
    } else {
        round1((total - idle.min(total)) as f64 / total as f64 * 100.0)
    };

    CpuInfo { cores, usage }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CpuTimes {
    total: u64,
    idle: u64,
}

fn read_cpu_times() -> Option<CpuTimes> {
    let stat = std::fs::read_to_string("/proc/stat").ok()?;
    parse_cpu_times(&stat)
}

/// Aggregate `cpu` line of `/proc/stat`; idle includes iowait.
fn parse_cpu_times(stat: &str) -> Option<CpuTimes> {
    let line = stat.lines().find(|line| line.starts_with("cpu "))?;
    let values: Vec<u64> = line
        .split_whitespace()
        .skip(1)
        .filter_map(|value| value.parse().ok())
        .collect();
    if values.len() < 4 {
        return None;
    }

    Some(CpuTimes {
        total: values.iter().sum(),
        idle: values[3] + values.get(4).copied().unwrap_or(0),
    })
}

fn memory_usage() -> MemoryInfo {
    let Ok(meminfo) = std::fs::read_to_string("/proc/meminfo") else {
        debug!("/proc/meminfo unavailable");
        return MemoryInfo::default();
    };
    parse_meminfo(&meminfo)
}

fn parse_meminfo(meminfo: &str) -> MemoryInfo {
    let total = parse_kb_field(meminfo, "MemTotal:").unwrap_or(0) * 1024;
    let available = parse_kb_field(meminfo, "MemAvailable:").unwrap_or(0) * 1024;

    MemoryInfo {
        total,
        available,
        percent: percent_used(total, available),
    }
}

fn disk_usage(path: &Path) -> DiskInfo {
    #[cfg(unix)]
    {
        use std::ffi::CString;
        use std::mem::MaybeUninit;
        use std::os::unix::ffi::OsStrExt;

        let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
            return DiskInfo::default();
        };
        let mut stat = MaybeUninit::<libc::statvfs>::uninit();

        // SAFETY: `c_path` is a valid NUL-terminated string and `stat` is writable.
        let ret = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
        if ret == 0 {
            // SAFETY: statvfs returned success, so the struct is initialised.
            let stat = unsafe { stat.assume_init() };
            let block_size = stat.f_frsize as u64;
            let total = stat.f_blocks as u64 * block_size;
            let free = stat.f_bavail as u64 * block_size;

            return DiskInfo {
                total,
                free,
                percent: percent_used(total, free),
            };
        }
        debug!(path = %path.display(), "statvfs failed");
    }

    DiskInfo::default()
}

fn parse_kb_field(content: &str, field: &str) -> Option<u64> {
    content
        .lines()
        .find_map(|line| line.strip_prefix(field))
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse().ok())
}

fn percent_used(total: u64, free: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round1(total.saturating_sub(free) as f64 / total as f64 * 100.0)
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_meminfo() {
        let meminfo = "MemTotal:       16000000 kB\nMemFree:         1000000 kB\nMemAvailable:    4000000 kB\n";
        let memory = parse_meminfo(meminfo);
        assert_eq!(memory.total, 16_000_000 * 1024);
        assert_eq!(memory.available, 4_000_000 * 1024);
        assert_eq!(memory.percent, 75.0);
    }

    #[test]
    fn parses_cpu_line() {
        let stat = "cpu  100 0 50 800 50 0 0 0 0 0\ncpu0 50 0 25 400 25 0 0 0 0 0\n";
        assert_eq!(
            parse_cpu_times(stat),
            Some(CpuTimes {
                total: 1000,
                idle: 850
            })
        );
        assert_eq!(parse_cpu_times("intr 1 2 3\n"), None);
    }

    #[test]
    fn percent_handles_empty_totals() {
        assert_eq!(percent_used(0, 0), 0.0);
        assert_eq!(percent_used(200, 50), 75.0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn reads_own_rss() {
        assert!(process_rss_bytes().unwrap() > 0);
    }

    #[cfg(unix)]
    #[test]
    fn disk_usage_of_root() {
        let disk = disk_usage(Path::new("/"));
        assert!(disk.total > 0);
        assert!(disk.free <= disk.total);
    }

    #[tokio::test]
    async fn collect_reports_gpu_snapshot() {
        let info = collect(GpuStatus::unavailable(), Path::new("/")).await;
        assert!(!info.gpu.available);
        assert!(info.cpu.cores >= 1);
    }
}
