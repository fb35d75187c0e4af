//! Host resource probing.
//!
//! `sysinfo` reports memory in bytes. Committed memory is approximated as
//! used physical memory plus used swap, which is what the OS has promised to
//! back.

use std::collections::VecDeque;

use sysinfo::System;

/// One reading of host resources. Memory values in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HostReading {
    pub cpu_percent: f32,
    pub physical_total: u64,
    pub physical_available: u64,
    pub committed: u64,
}

impl HostReading {
    /// Free physical memory as a percentage of total. Zero when the total
    /// is unknown.
    pub fn free_percent(&self) -> f64 {
        if self.physical_total == 0 {
            return 0.0;
        }
        self.physical_available as f64 / self.physical_total as f64 * 100.0
    }

    pub fn occupied_percent(&self) -> f64 {
        if self.physical_total == 0 {
            return 0.0;
        }
        100.0 - self.free_percent()
    }
}

/// Source of host readings. Implementations may keep state between reads
/// (CPU usage is a delta between two refreshes).
pub trait HostProbe: Send {
    fn read(&mut self) -> HostReading;
}

/// Probe backed by `sysinfo`.
pub struct SysinfoProbe {
    system: System,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        let mut system = System::new();
        // Prime the CPU counters so the first read has a baseline
        system.refresh_cpu();
        system.refresh_memory();
        Self { system }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl HostProbe for SysinfoProbe {
    fn read(&mut self) -> HostReading {
        self.system.refresh_cpu();
        self.system.refresh_memory();
        HostReading {
            cpu_percent: self.system.global_cpu_info().cpu_usage(),
            physical_total: self.system.total_memory(),
            physical_available: self.system.available_memory(),
            committed: self
                .system
                .used_memory()
                .saturating_add(self.system.used_swap()),
        }
    }
}

/// Replays a fixed sequence of readings, repeating the last one.
/// Used in place of the real host where readings must be deterministic.
pub struct StaticProbe {
    queued: VecDeque<HostReading>,
    last: HostReading,
}

impl StaticProbe {
    pub fn new(readings: impl IntoIterator<Item = HostReading>) -> Self {
        Self {
            queued: readings.into_iter().collect(),
            last: HostReading::default(),
        }
    }

    pub fn constant(reading: HostReading) -> Self {
        Self {
            queued: VecDeque::new(),
            last: reading,
        }
    }
}

impl HostProbe for StaticProbe {
    fn read(&mut self) -> HostReading {
        if let Some(next) = self.queued.pop_front() {
            self.last = next;
        }
        self.last
    }
}
