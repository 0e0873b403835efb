//! Per-block aggregated statistics
//!
//! One `ChainStats` record is persisted for every confirmed block. Per-block
//! counters start at zero for each block; running aggregates are seeded from
//! the previous tip's record and adjusted by the block's delta.

use serde::{Deserialize, Serialize};

use crate::types::{Block, Currency, ValidationContext};

/// Aggregated statistics about the chain as of a specific block
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChainStats {
    /// The block the record describes
    pub block: Block,
    /// Post-block validation context
    pub validation_context: ValidationContext,

    /// Type-S elements spent in this block
    pub spent_siacoins_count: u64,
    /// Type-F elements spent in this block
    pub spent_siafunds_count: u64,
    /// Type-S elements created in this block
    pub new_siacoins_count: u64,
    /// Type-F elements created in this block
    pub new_siafunds_count: u64,
    /// File contracts created in this block
    pub new_file_contracts_count: u64,
    /// File contracts revised in this block
    pub revised_file_contracts_count: u64,
    /// File contracts resolved in this block
    pub resolved_file_contracts_count: u64,

    /// Sum of payouts locked in currently active contracts
    pub active_contract_cost: Currency,
    /// Number of currently active contracts
    pub active_contract_count: u64,
    /// Sum of filesizes across currently active contracts
    pub active_contract_size: u64,
    /// Sum of payouts across all contracts ever created
    pub total_contract_cost: Currency,
    /// Sum of filesizes across all contract creations and revisions
    pub total_contract_size: u64,
    /// Sum of filesizes across all revisions
    pub total_revision_volume: u64,
}

impl ChainStats {
    /// Seed the record for a new block from the previous tip's record:
    /// running aggregates carry over, per-block counters reset to zero.
    pub fn next(prev: &ChainStats, block: Block, context: ValidationContext) -> ChainStats {
        ChainStats {
            block,
            validation_context: context,
            active_contract_cost: prev.active_contract_cost,
            active_contract_count: prev.active_contract_count,
            active_contract_size: prev.active_contract_size,
            total_contract_cost: prev.total_contract_cost,
            total_contract_size: prev.total_contract_size,
            total_revision_volume: prev.total_revision_volume,
            ..ChainStats::default()
        }
    }

    /// The all-zero record for the empty chain, before any block is applied
    pub fn genesis(context: ValidationContext) -> ChainStats {
        ChainStats {
            validation_context: context,
            ..ChainStats::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_carries_aggregates_and_resets_counters() {
        let prev = ChainStats {
            new_siacoins_count: 7,
            spent_siafunds_count: 3,
            active_contract_cost: Currency::new(500),
            active_contract_count: 2,
            active_contract_size: 1000,
            total_contract_cost: Currency::new(900),
            total_contract_size: 4000,
            total_revision_volume: 1500,
            ..ChainStats::default()
        };
        let next = ChainStats::next(&prev, Block::default(), ValidationContext::default());
        assert_eq!(next.new_siacoins_count, 0);
        assert_eq!(next.spent_siafunds_count, 0);
        assert_eq!(next.active_contract_cost, Currency::new(500));
        assert_eq!(next.active_contract_count, 2);
        assert_eq!(next.active_contract_size, 1000);
        assert_eq!(next.total_contract_cost, Currency::new(900));
        assert_eq!(next.total_contract_size, 4000);
        assert_eq!(next.total_revision_volume, 1500);
    }
}
