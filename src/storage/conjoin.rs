//! Conjoin planning
//!
//! Works out how to merge several tables into one: which bytes to copy from
//! each source, in what order, and the index describing the result. The
//! persister executes the plan.

use std::sync::Arc;

use crate::address::Address;
use crate::error::Result;
use crate::table::{merge_indexes, TableIndex};

use super::ChunkSource;

/// One source of a conjoin and the length of its data section
#[derive(Clone)]
pub struct SourceWithSize {
    pub source: Arc<dyn ChunkSource>,
    pub data_len: u64,
}

/// Everything needed to write a conjoined table
#[derive(Clone)]
pub struct ConjoinPlan {
    /// Name of the new table (order independent over the source names)
    pub name: Address,
    /// Unique chunks in the new table
    pub chunk_count: u32,
    /// Serialized index of the new table (entries + footer)
    pub merged_index: Vec<u8>,
    /// Copy instructions, in output order
    pub sources: Vec<SourceWithSize>,
    /// Addresses present in more than one source, resolved to their first copy
    pub duplicates: Vec<Address>,
}

impl ConjoinPlan {
    /// Bytes copied from sources
    pub fn data_len(&self) -> u64 {
        self.sources.iter().map(|s| s.data_len).sum()
    }

    /// Names of the merged tables, in copy order
    pub fn source_names(&self) -> Vec<Address> {
        self.sources.iter().map(|s| s.source.name()).collect()
    }
}

/// Plan a merge of every non-empty table in `sources`.
///
/// Sources are copied largest first (by chunk count, then name) so the plan
/// is the same however the caller ordered them. A table presented twice is
/// merged once.
pub fn plan_conjoin(sources: &[Arc<dyn ChunkSource>]) -> Result<ConjoinPlan> {
    let mut inputs: Vec<(SourceWithSize, Arc<TableIndex>)> = Vec::with_capacity(sources.len());
    for source in sources.iter().filter(|s| s.chunk_count() > 0) {
        let index = source.index()?;
        inputs.push((
            SourceWithSize {
                source: Arc::clone(source),
                data_len: index.data_len(),
            },
            index,
        ));
    }

    inputs.sort_by(|(a, _), (b, _)| {
        b.source
            .chunk_count()
            .cmp(&a.source.chunk_count())
            .then_with(|| a.source.name().cmp(&b.source.name()))
    });
    inputs.dedup_by_key(|(sws, _)| sws.source.name());

    let merged = merge_indexes(inputs.iter().map(|(_, index)| index.as_ref()))?;

    let name = if merged.index.is_empty() {
        Address::EMPTY
    } else {
        Address::of_set(inputs.iter().map(|(sws, _)| sws.source.name()))
    };

    Ok(ConjoinPlan {
        name,
        chunk_count: merged.index.chunk_count(),
        merged_index: merged.to_bytes(),
        sources: inputs.into_iter().map(|(sws, _)| sws).collect(),
        duplicates: merged.duplicates,
    })
}

// =============================================================================
// Policies
// =============================================================================

/// Decides which tables a conjoin should merge
pub trait ConjoinPolicy: Send + Sync {
    /// Positions in `sources` to merge; fewer than two means "nothing to do"
    fn choose(&self, sources: &[Arc<dyn ChunkSource>]) -> Vec<usize>;
}

/// Merge every table
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeAll;

impl ConjoinPolicy for MergeAll {
    fn choose(&self, sources: &[Arc<dyn ChunkSource>]) -> Vec<usize> {
        if sources.len() < 2 {
            return Vec::new();
        }
        (0..sources.len()).collect()
    }
}

/// Keep at most `max_tables` tables by merging the smallest ones
#[derive(Debug, Clone, Copy)]
pub struct SizeTiered {
    pub max_tables: usize,
}

impl ConjoinPolicy for SizeTiered {
    fn choose(&self, sources: &[Arc<dyn ChunkSource>]) -> Vec<usize> {
        let max_tables = self.max_tables.max(1);
        if sources.len() <= max_tables {
            return Vec::new();
        }

        // Merging k tables removes k - 1 of them
        let merge = sources.len() - max_tables + 1;

        let mut order: Vec<usize> = (0..sources.len()).collect();
        order.sort_by_key(|&i| (sources[i].chunk_count(), sources[i].name()));
        order.truncate(merge);
        order.sort_unstable();
        order
    }
}
