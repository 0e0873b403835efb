//! Read-only query surface over the explorer index
//!
//! `Explorer` wires the store and the update engine together and exposes
//! the queries the surrounding daemon serves: element lookups, unspent
//! enumeration, balances, per-address transaction listings and per-block
//! statistics. Queries read committed state only; a delta being folded by
//! the engine is never observable.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::engine::UpdateEngine;
use crate::error::{Error, Result};
use crate::stats::ChainStats;
use crate::store::ChainStore;
use crate::types::{
    Address, ChainIndex, Currency, ElementID, FileContractElement, FundAmount, SiacoinElement,
    SiafundElement, Transaction, TransactionID, ValidationContext,
};

/// The explorer index: persistent store, update engine and query surface
pub struct Explorer {
    store: Arc<ChainStore>,
    engine: Arc<UpdateEngine>,
}

impl Explorer {
    /// Open the index in `dir`.
    ///
    /// An index populated by an earlier run resumes at its recorded tip;
    /// an empty one starts from `genesis_context`.
    pub fn open<P: AsRef<Path>>(dir: P, genesis_context: ValidationContext) -> Result<Self> {
        let store = Arc::new(ChainStore::open(dir)?);
        let engine = Arc::new(UpdateEngine::new(store.clone(), genesis_context)?);
        info!("Explorer opened at tip {}", engine.tip());
        Ok(Self { store, engine })
    }

    /// The subscriber to register with the chain manager
    pub fn subscriber(&self) -> Arc<UpdateEngine> {
        self.engine.clone()
    }

    /// The current tip index
    pub fn tip(&self) -> ChainIndex {
        self.engine.tip()
    }

    /// Look up a type-S element by ID
    pub fn siacoin_element(&self, id: &ElementID) -> Result<Option<SiacoinElement>> {
        self.store.siacoin_element(id)
    }

    /// Look up a type-F element by ID
    pub fn siafund_element(&self, id: &ElementID) -> Result<Option<SiafundElement>> {
        self.store.siafund_element(id)
    }

    /// Look up a file contract element by ID
    pub fn file_contract_element(&self, id: &ElementID) -> Result<Option<FileContractElement>> {
        self.store.file_contract_element(id)
    }

    /// IDs of the unspent type-S elements owned by an address
    pub fn unspent_siacoin_elements(&self, address: &Address) -> Result<Vec<ElementID>> {
        self.store.unspent_siacoin_elements(address)
    }

    /// IDs of the unspent type-F elements owned by an address
    pub fn unspent_siafund_elements(&self, address: &Address) -> Result<Vec<ElementID>> {
        self.store.unspent_siafund_elements(address)
    }

    /// Total type-S value held by an address.
    ///
    /// Computed by enumerating the address's unspent element IDs and
    /// summing the element values. A dangling ID is a consistency failure:
    /// the unspent mirror and the element relation move in the same
    /// transaction, so they cannot legitimately disagree.
    pub fn siacoin_balance(&self, address: &Address) -> Result<Currency> {
        let mut balance = Currency::ZERO;
        for id in self.store.unspent_siacoin_elements(address)? {
            let element = self.store.siacoin_element(&id)?.ok_or_else(|| {
                Error::Consistency(format!("unspent row {} has no siacoin element", id))
            })?;
            balance = balance.checked_add(element.value).ok_or_else(|| {
                Error::Consistency(format!("siacoin balance of {} overflows", address))
            })?;
        }
        Ok(balance)
    }

    /// Total type-F value held by an address
    pub fn siafund_balance(&self, address: &Address) -> Result<FundAmount> {
        let mut balance: FundAmount = 0;
        for id in self.store.unspent_siafund_elements(address)? {
            let element = self.store.siafund_element(&id)?.ok_or_else(|| {
                Error::Consistency(format!("unspent row {} has no siafund element", id))
            })?;
            balance = balance.checked_add(element.value).ok_or_else(|| {
                Error::Consistency(format!("siafund balance of {} overflows", address))
            })?;
        }
        Ok(balance)
    }

    /// Look up a confirmed transaction by ID
    pub fn transaction(&self, id: &TransactionID) -> Result<Option<Transaction>> {
        self.store.transaction(id)
    }

    /// IDs of the transactions touching an address, oldest first, paginated
    /// by `(limit, offset)`.
    pub fn transactions(
        &self,
        address: &Address,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransactionID>> {
        self.store.address_transactions(address, limit, offset)
    }

    /// Per-block statistics for the block at the given index
    pub fn chain_stats(&self, index: &ChainIndex) -> Result<Option<ChainStats>> {
        self.store.chain_stats(index)
    }

    /// Statistics at the current tip
    pub fn chain_stats_latest(&self) -> ChainStats {
        let (_, stats) = self.engine.tip_state();
        stats
    }

    /// Shut the index down: roll back any open batch, refuse further
    /// deltas and flush buffered writes.
    pub fn close(&self) -> Result<()> {
        self.engine.close();
        self.store.flush()
    }
}

impl std::fmt::Debug for Explorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Explorer").field("tip", &self.tip()).finish()
    }
}
