// src/utils/system.rs: System functions

use anyhow::{anyhow, Result};
use log::debug;
use sysinfo::{MemoryRefreshKind, RefreshKind, System};

/// Finds the amount of total and available RAM.
pub fn detect_ram() -> Result<(u64, u64)> {
    let refresh_kind = RefreshKind::nothing().with_memory(MemoryRefreshKind::everything());
    let mut system = System::new_with_specifics(refresh_kind);
    system.refresh_memory();
    let total = system.total_memory();
    let available = system.available_memory().max(total.saturating_sub(system.used_memory()));

    if total == 0 {
        return Err(anyhow!("Failed to detect valid RAM values"));
    }
    Ok((total, available))
}

/// Sizes the inter-stage channels from available RAM. Channels carry 64 KiB
/// byte chunks; the capacity bounds how far a producer can run ahead of its
/// consumer, so the total is held well under the available memory even with
/// several samples in flight.
pub fn compute_channel_capacity(available_ram: u64, concurrent_samples: usize) -> usize {
    const CHUNK_BYTES: u64 = 65_536;
    const CHANNELS_PER_SAMPLE: u64 = 8;
    const RAM_FRACTION: f64 = 0.25;

    let budget = (available_ram as f64 * RAM_FRACTION) as u64;
    let per_channel = budget / (CHANNELS_PER_SAMPLE * concurrent_samples.max(1) as u64);
    let capacity = (per_channel / CHUNK_BYTES).clamp(16, 4_096) as usize;
    debug!(
        "channel capacity: {} chunks (~{} MiB/channel)",
        capacity,
        capacity as u64 * CHUNK_BYTES / 1_048_576
    );
    capacity
}

/// Threads handed to the external tools; 0 means all physical cores.
pub fn effective_threads(requested: usize) -> usize {
    if requested == 0 {
        num_cpus::get_physical().max(1)
    } else {
        requested
    }
}
