use std::collections::BTreeMap;

/// When a checkpoint closes. Chunks always end on a block boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    pub max_span: u64,
    pub max_events: Option<u64>,
}

impl Default for ChunkPolicy {
    fn default() -> Self {
        Self {
            max_span: 10_000,
            max_events: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedChunk {
    pub begin: u64,
    pub end: u64,
    pub event_count: u64,
    /// Closed by a limit. The last chunk of a pass is unsealed when it stopped at the tip.
    pub sealed: bool,
}

/// Splits `[from, to]` into contiguous chunks using per-block event counts.
#[must_use]
pub fn plan_chunks(
    from: u64,
    to: u64,
    counts: &BTreeMap<u64, u64>,
    policy: ChunkPolicy,
) -> Vec<PlannedChunk> {
    let max_span = policy.max_span.max(1);
    let mut chunks = Vec::new();
    let mut begin = from;
    while begin <= to {
        let span_end = begin.saturating_add(max_span - 1);
        let limit = span_end.min(to);

        let mut event_count = 0;
        let mut closed_at = None;
        for (block, count) in counts.range(begin..=limit) {
            event_count += count;
            if policy.max_events.is_some_and(|max| event_count >= max) {
                closed_at = Some(*block);
                break;
            }
        }

        let (end, sealed) = match closed_at {
            Some(block) => (block, true),
            None => (limit, span_end <= to),
        };
        chunks.push(PlannedChunk {
            begin,
            end,
            event_count,
            sealed,
        });
        if end == u64::MAX {
            break;
        }
        begin = end + 1;
    }
    chunks
}
