//! Host resource sampling for heartbeat reports.

use callguard_license::protocol::ResourceUsage;
use std::net::UdpSocket;

/// Source of the host metrics attached to heartbeats.
pub trait ResourceProbe: Send + Sync {
    /// Current CPU, RAM and disk utilisation in percent.
    fn sample(&self) -> ResourceUsage;

    /// Address this host uses for outbound traffic, if known.
    fn local_ip(&self) -> Option<String>;
}

/// Reads metrics from the running host.
///
/// Values that cannot be read are reported as zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostResources;

impl ResourceProbe for HostResources {
    fn sample(&self) -> ResourceUsage {
        ResourceUsage {
            cpu: cpu_percent().unwrap_or(0.0),
            ram: ram_percent().unwrap_or(0.0),
            disk: disk_percent().unwrap_or(0.0),
        }
    }

    fn local_ip(&self) -> Option<String> {
        // Connecting a UDP socket only selects a route; nothing is sent.
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect("192.0.2.1:9").ok()?;
        let addr = socket.local_addr().ok()?;
        (!addr.ip().is_unspecified()).then(|| addr.ip().to_string())
    }
}

/// Fixed metrics, for tests and hosts without probes.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticResources {
    pub usage: ResourceUsage,
    pub ip: Option<&'static str>,
}

impl ResourceProbe for StaticResources {
    fn sample(&self) -> ResourceUsage {
        self.usage
    }

    fn local_ip(&self) -> Option<String> {
        self.ip.map(str::to_string)
    }
}

/// One-minute load average scaled by CPU count.
fn cpu_percent() -> Option<f32> {
    let loadavg = std::fs::read_to_string("/proc/loadavg").ok()?;
    let load: f32 = loadavg.split_whitespace().next()?.parse().ok()?;
    let cpus = std::thread::available_parallelism().map_or(1, |n| n.get()) as f32;
    Some(clamp_percent(load / cpus * 100.0))
}

fn ram_percent() -> Option<f32> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    parse_meminfo_percent(&meminfo)
}

fn disk_percent() -> Option<f32> {
    let output = std::process::Command::new("df").args(["-P", "/"]).output().ok()?;
    if !output.status.success() {
        return None;
    }
    parse_df_percent(&String::from_utf8_lossy(&output.stdout))
}

/// Used memory from `/proc/meminfo` contents, as a percentage.
pub fn parse_meminfo_percent(meminfo: &str) -> Option<f32> {
    let field = |name: &str| -> Option<f32> {
        meminfo
            .lines()
            .find(|line| line.starts_with(name))?
            .split_whitespace()
            .nth(1)?
            .parse()
            .ok()
    };
    let total = field("MemTotal:")?;
    let available = field("MemAvailable:")?;
    if total <= 0.0 {
        return None;
    }
    Some(clamp_percent((total - available) / total * 100.0))
}

/// Capacity column of `df -P` output for the first filesystem.
pub fn parse_df_percent(df: &str) -> Option<f32> {
    let line = df.lines().nth(1)?;
    let capacity = line.split_whitespace().nth(4)?;
    capacity.trim_end_matches('%').parse().ok().map(clamp_percent)
}

fn clamp_percent(value: f32) -> f32 {
    value.clamp(0.0, 100.0)
}
