//! Batch size and concurrency hints derived from host capability.

use serde::{Deserialize, Serialize};

/// Logical cores assumed when the host does not report them.
pub const DEFAULT_LOGICAL_CORES: usize = 4;

/// Memory in GB assumed when the host does not report it.
pub const DEFAULT_MEMORY_GB: f64 = 4.0;

/// Average input size in MB above which both hints are lowered.
pub const LARGE_FILE_MB: f64 = 5.0;

const MAX_BATCH_SIZE: usize = 5;
const MAX_CONCURRENCY: usize = 10;

/// What the host reports about itself. `None` means unknown.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct HostCapabilities {
    /// Logical CPU cores.
    pub logical_cores: Option<usize>,
    /// Approximate total memory in GB.
    pub memory_gb: Option<f64>,
}

impl HostCapabilities {
    /// Probe the current machine.
    #[must_use]
    pub fn detect() -> Self {
        let logical_cores = std::thread::available_parallelism()
            .ok()
            .map(std::num::NonZeroUsize::get);
        #[allow(clippy::cast_precision_loss)]
        let memory_gb = sys_info::mem_info()
            .ok()
            .map(|m| m.total as f64 / (1024.0 * 1024.0));
        tracing::debug!(?logical_cores, ?memory_gb, "probed host capabilities");
        Self {
            logical_cores,
            memory_gb,
        }
    }

    /// Hints for inputs averaging `avg_file_size_mb`, with defaults filled in.
    #[must_use]
    pub fn suggest(&self, avg_file_size_mb: f64) -> BatchHints {
        suggest(
            avg_file_size_mb,
            self.logical_cores.unwrap_or(DEFAULT_LOGICAL_CORES),
            self.memory_gb.unwrap_or(DEFAULT_MEMORY_GB),
        )
    }
}

/// Suggested batch parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchHints {
    /// Images per batch, `1..=5`.
    pub batch_size: usize,
    /// Worker threads, `1..=10`.
    pub concurrency: usize,
}

/// Derive batch size and concurrency from core count, memory and input size.
#[must_use]
pub fn suggest(avg_file_size_mb: f64, logical_cores: usize, approx_memory_gb: f64) -> BatchHints {
    let mut batch_size = (logical_cores / 2).clamp(1, MAX_BATCH_SIZE);

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let from_memory = (approx_memory_gb * 2.0).floor().max(0.0) as usize;
    let mut concurrency = from_memory.clamp(1, MAX_CONCURRENCY);

    if avg_file_size_mb > LARGE_FILE_MB {
        batch_size = batch_size.saturating_sub(1).max(1);
        concurrency = concurrency.saturating_sub(2).max(1);
    }

    BatchHints {
        batch_size,
        concurrency,
    }
}
