// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Engine configuration.
//!
//! Loading this from a file or environment is an external collaborator's job (CLI glue,
//! config-file parsing); this module only defines the in-memory shape the rest of the
//! engine is built against, with defaults a caller can override field-by-field.

use std::time::Duration;

/// Tuning knobs for the correlator's parallel insertion strategy.
#[derive(Clone, Copy, Debug)]
pub struct ConcurrencyConfig {
    /// Whether the correlator is allowed to use the two-phase concurrent insert at all.
    pub active: bool,
    /// Size of the bounded worker pool used for parallel bucket matching.
    pub thread_count: usize,
    /// Minimum `|S|` before the correlator considers switching to the concurrent path.
    pub pivot_size: usize,
    /// Hard deadline for a single pool task (see `timeout.limit`/`timeout.unit`).
    pub timeout_limit: Duration,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            active: true,
            thread_count: 4,
            pivot_size: 64,
            timeout_limit: Duration::from_secs(30),
        }
    }
}

/// Caps applied by the request decomposer.
#[derive(Clone, Copy, Debug)]
pub struct DecompositionConfig {
    /// Ceiling on concurrently open transport streams for a single logical request.
    pub max_streams: usize,
    /// Ceiling on PVs carried by a single sub-request.
    pub max_pvs_per_sub: usize,
    /// Ceiling on wall-clock span carried by a single sub-request.
    pub max_range_per_sub: Duration,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            max_streams: 16,
            max_pvs_per_sub: 256,
            max_range_per_sub: Duration::from_secs(3600),
        }
    }
}

/// Policy governing whether the assembler materializes a static or dynamic table.
#[derive(Clone, Copy, Debug)]
pub struct TableConfig {
    /// Default table kind requested when a caller doesn't specify one.
    pub static_default: bool,
    /// Byte ceiling under which a static table is produced even when `static_default` is set.
    pub static_max: u64,
    /// Whether dynamic (lazy) tables may be produced at all.
    pub dynamic_enabled: bool,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            static_default: true,
            static_max: 256 * 1024 * 1024,
            dynamic_enabled: true,
        }
    }
}

/// Top-level engine configuration, covering the named keys from the interface contract:
/// `timeout.*`, `concurrency.*`, `multistream.max_streams`, `decomp.*`, `table.*`, and
/// `logging.active`.
#[derive(Clone, Copy, Debug, Default)]
pub struct EngineConfig {
    pub concurrency: ConcurrencyConfig,
    pub decomposition: DecompositionConfig,
    pub table: TableConfig,
    /// Gates structured event emission (not span-level tracing, which is always-on and
    /// zero-cost with no subscriber installed). Never required for correctness.
    pub logging_active: bool,
}
