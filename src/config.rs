//! Runtime-configurable strategy selection and tuning parameters.
//!
//! All values have sensible defaults. Override via environment variables
//! (prefixed `CONCORD_`) or by constructing a custom `ConcordConfig`.

use std::collections::HashMap;

use crate::types::CollectiveKind;

/// Thresholds consulted when a collective kind is configured as
/// `"automatic"`. Message size is measured in bytes per participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoThresholds {
    /// At or below this size a message counts as "small" and log-round
    /// algorithms win on latency.
    pub small_msg_bytes: usize,
    /// At or above this size a message counts as "large" and
    /// bandwidth-oriented ring/pairwise algorithms win.
    pub large_msg_bytes: usize,
    /// Group sizes below this count as "small" and linear algorithms
    /// have the lowest constant overhead.
    pub small_world: u32,
}

impl Default for AutoThresholds {
    fn default() -> Self {
        Self {
            small_msg_bytes: 2048,
            large_msg_bytes: 512 * 1024,
            small_world: 8,
        }
    }
}

/// Strategy names and tuning parameters, read once at process start.
#[derive(Debug, Clone)]
pub struct ConcordConfig {
    /// Strategy name per collective kind; `"automatic"` selects per call.
    pub broadcast: String,
    pub barrier: String,
    pub allgather: String,
    pub allreduce: String,
    pub alltoall: String,
    pub alltoallv: String,
    pub reduce: String,

    /// Number of ranks per local group for the SMP-hierarchical
    /// algorithms.
    pub smp_group_size: u32,
    /// Arity of the process tree used by the nary-tree barrier.
    pub tree_arity: u32,
    /// Segment size for the pipelined flat broadcast.
    pub pipeline_segment_bytes: usize,

    /// Default automatic-selection thresholds.
    pub auto: AutoThresholds,
    /// Per-kind overrides of the automatic-selection thresholds.
    pub auto_overrides: HashMap<CollectiveKind, AutoThresholds>,
}

impl Default for ConcordConfig {
    fn default() -> Self {
        Self {
            broadcast: "automatic".into(),
            barrier: "automatic".into(),
            allgather: "automatic".into(),
            allreduce: "automatic".into(),
            alltoall: "automatic".into(),
            alltoallv: "automatic".into(),
            reduce: "automatic".into(),
            smp_group_size: 4,
            tree_arity: 4,
            pipeline_segment_bytes: 8192,
            auto: AutoThresholds::default(),
            auto_overrides: HashMap::new(),
        }
    }
}

impl ConcordConfig {
    /// Load config from environment variables, falling back to defaults.
    ///
    /// Recognized variables:
    /// - `CONCORD_BROADCAST`, `CONCORD_BARRIER`, `CONCORD_ALLGATHER`,
    ///   `CONCORD_ALLREDUCE`, `CONCORD_ALLTOALL`, `CONCORD_ALLTOALLV`,
    ///   `CONCORD_REDUCE` (strategy names)
    /// - `CONCORD_SMP_GROUP_SIZE`
    /// - `CONCORD_TREE_ARITY`
    /// - `CONCORD_PIPELINE_SEGMENT_BYTES`
    /// - `CONCORD_SMALL_MSG_BYTES`, `CONCORD_LARGE_MSG_BYTES`,
    ///   `CONCORD_SMALL_WORLD`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        for (var, slot) in [
            ("CONCORD_BROADCAST", &mut cfg.broadcast),
            ("CONCORD_BARRIER", &mut cfg.barrier),
            ("CONCORD_ALLGATHER", &mut cfg.allgather),
            ("CONCORD_ALLREDUCE", &mut cfg.allreduce),
            ("CONCORD_ALLTOALL", &mut cfg.alltoall),
            ("CONCORD_ALLTOALLV", &mut cfg.alltoallv),
            ("CONCORD_REDUCE", &mut cfg.reduce),
        ] {
            if let Ok(v) = std::env::var(var) {
                if !v.is_empty() {
                    *slot = v;
                }
            }
        }

        if let Ok(v) = std::env::var("CONCORD_SMP_GROUP_SIZE") {
            if let Ok(n) = v.parse::<u32>() {
                if n >= 1 {
                    cfg.smp_group_size = n;
                }
            }
        }
        if let Ok(v) = std::env::var("CONCORD_TREE_ARITY") {
            if let Ok(n) = v.parse::<u32>() {
                if n >= 1 {
                    cfg.tree_arity = n;
                }
            }
        }
        if let Ok(v) = std::env::var("CONCORD_PIPELINE_SEGMENT_BYTES") {
            if let Ok(n) = v.parse::<usize>() {
                if n >= 1 {
                    cfg.pipeline_segment_bytes = n;
                }
            }
        }
        if let Ok(v) = std::env::var("CONCORD_SMALL_MSG_BYTES") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.auto.small_msg_bytes = n;
            }
        }
        if let Ok(v) = std::env::var("CONCORD_LARGE_MSG_BYTES") {
            if let Ok(n) = v.parse::<usize>() {
                cfg.auto.large_msg_bytes = n;
            }
        }
        if let Ok(v) = std::env::var("CONCORD_SMALL_WORLD") {
            if let Ok(n) = v.parse::<u32>() {
                cfg.auto.small_world = n;
            }
        }

        cfg
    }

    /// The configured strategy name for a collective kind.
    pub fn strategy_for(&self, kind: CollectiveKind) -> &str {
        match kind {
            CollectiveKind::Broadcast => &self.broadcast,
            CollectiveKind::Barrier => &self.barrier,
            CollectiveKind::Allgather => &self.allgather,
            CollectiveKind::Allreduce => &self.allreduce,
            CollectiveKind::Alltoall => &self.alltoall,
            CollectiveKind::Alltoallv => &self.alltoallv,
            CollectiveKind::Reduce => &self.reduce,
        }
    }

    /// Automatic-selection thresholds for a kind, honoring overrides.
    pub fn thresholds_for(&self, kind: CollectiveKind) -> AutoThresholds {
        self.auto_overrides.get(&kind).copied().unwrap_or(self.auto)
    }
}
