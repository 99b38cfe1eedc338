use std::time::Duration;

/// How far below a stale sync head the store is rewound when the chain no longer
/// contains it.
pub const DEFAULT_REORG_DEPTH: u64 = 64;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// First block worth reading; used when no cursor exists yet.
    pub upload_block: u64,
    /// Blocks below the head treated as final.
    pub finality_depth: u64,
    pub poll_interval: Duration,
    pub reorg_depth: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            upload_block: 0,
            finality_depth: 0,
            poll_interval: Duration::from_secs(5),
            reorg_depth: DEFAULT_REORG_DEPTH,
        }
    }
}
