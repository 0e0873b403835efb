//! Persistent storage of the explorer's four relations
//!
//! `ChainStore` owns the database and serves committed reads. All writes go
//! through a `StoreTx` obtained from [`ChainStore::begin_tx`]: mutations are
//! staged in memory and become visible only when the transaction commits as
//! one atomic, fsynced batch. Readers therefore never observe a partially
//! applied delta, and a rollback (or drop) leaves no trace.
//!
//! The store admits one writer at a time. Concurrent readers are unaffected;
//! they read committed state directly.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rocksdb::WriteBatch;
use tracing::{debug, info};

use crate::codec;
use crate::db::{
    Database, CF_ADDR_TXNS, CF_CHAIN_STATS, CF_ELEMENTS, CF_META, CF_TRANSACTIONS, CF_UNSPENT,
};
use crate::error::{Error, Result};
use crate::keys;
use crate::stats::ChainStats;
use crate::types::{
    Address, ChainIndex, ElementID, ElementKind, FileContractElement, SiacoinElement,
    SiafundElement, Transaction, TransactionID,
};

/// Durable store for elements, unspent mirrors, transactions and per-block
/// statistics
pub struct ChainStore {
    db: Arc<Database>,
    /// Single-writer gate; set while a `StoreTx` is live
    write_active: Arc<AtomicBool>,
    #[cfg(test)]
    faults: Arc<FaultPlan>,
}

impl ChainStore {
    /// Open or create the store in the given directory
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Arc::new(Database::open(path)?);
        info!("Chain store opened at {}", db.path().display());
        Ok(Self {
            db,
            write_active: Arc::new(AtomicBool::new(false)),
            #[cfg(test)]
            faults: Arc::new(FaultPlan::default()),
        })
    }

    /// Begin a write transaction.
    ///
    /// At most one writer may be active; a second call before the first
    /// transaction commits, rolls back or is dropped returns [`Error::Busy`].
    pub fn begin_tx(&self) -> Result<StoreTx> {
        if self
            .write_active
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            return Err(Error::Busy);
        }
        debug!("Write transaction opened");
        Ok(StoreTx {
            db: self.db.clone(),
            gate: self.write_active.clone(),
            staged: BTreeMap::new(),
            #[cfg(test)]
            faults: self.faults.clone(),
        })
    }

    /// Look up a type-S element by ID
    pub fn siacoin_element(&self, id: &ElementID) -> Result<Option<SiacoinElement>> {
        self.get_decoded(CF_ELEMENTS, &keys::element_key(ElementKind::Siacoin, id))
    }

    /// Look up a type-F element by ID
    pub fn siafund_element(&self, id: &ElementID) -> Result<Option<SiafundElement>> {
        self.get_decoded(CF_ELEMENTS, &keys::element_key(ElementKind::Siafund, id))
    }

    /// Look up a file contract element by ID
    pub fn file_contract_element(&self, id: &ElementID) -> Result<Option<FileContractElement>> {
        self.get_decoded(CF_ELEMENTS, &keys::element_key(ElementKind::FileContract, id))
    }

    /// IDs of the unspent type-S elements owned by an address
    pub fn unspent_siacoin_elements(&self, address: &Address) -> Result<Vec<ElementID>> {
        self.unspent(address, ElementKind::Siacoin)
    }

    /// IDs of the unspent type-F elements owned by an address
    pub fn unspent_siafund_elements(&self, address: &Address) -> Result<Vec<ElementID>> {
        self.unspent(address, ElementKind::Siafund)
    }

    fn unspent(&self, address: &Address, kind: ElementKind) -> Result<Vec<ElementID>> {
        let rows = self
            .db
            .scan_prefix(CF_UNSPENT, &keys::unspent_prefix(address, kind))?;
        rows.iter()
            .map(|(_, value)| codec::decode(value))
            .collect()
    }

    /// Look up a confirmed transaction by ID
    pub fn transaction(&self, id: &TransactionID) -> Result<Option<Transaction>> {
        self.get_decoded(CF_TRANSACTIONS, &keys::transaction_key(id))
    }

    /// IDs of the transactions touching an address, in block-application
    /// order (oldest first), paginated by `(limit, offset)`.
    pub fn address_transactions(
        &self,
        address: &Address,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransactionID>> {
        let rows = self
            .db
            .scan_prefix(CF_ADDR_TXNS, &keys::address_transaction_prefix(address))?;
        rows.iter()
            .skip(offset)
            .take(limit)
            .map(|(_, value)| {
                let (id, _index): (TransactionID, ChainIndex) = codec::decode(value)?;
                Ok(id)
            })
            .collect()
    }

    /// Per-block statistics for the block at the given index
    pub fn chain_stats(&self, index: &ChainIndex) -> Result<Option<ChainStats>> {
        self.get_decoded(CF_CHAIN_STATS, &keys::chain_stats_key(index))
    }

    /// The most recently committed tip, if any block has been applied
    pub fn tip_index(&self) -> Result<Option<ChainIndex>> {
        self.get_decoded(CF_META, &keys::tip_key())
    }

    /// Flush all buffered writes to disk
    pub fn flush(&self) -> Result<()> {
        self.db.flush()
    }

    fn get_decoded<T: serde::de::DeserializeOwned>(
        &self,
        cf: &'static str,
        key: &[u8],
    ) -> Result<Option<T>> {
        match self.db.get(cf, key)? {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Arrange for the `n + 1`-th staged write of subsequent transactions to
    /// fail with a storage error. One-shot: after firing, writes succeed
    /// again.
    #[cfg(test)]
    pub(crate) fn fail_after_writes(&self, n: i64) {
        self.faults.remaining_writes.store(n, Ordering::SeqCst);
    }

    /// Arrange for the next commit to fail with a storage error. One-shot.
    #[cfg(test)]
    pub(crate) fn fail_next_commit(&self) {
        self.faults.fail_commit.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for ChainStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainStore")
            .field("path", &self.db.path())
            .finish()
    }
}

/// Injected failures for exercising abort paths in tests
#[cfg(test)]
struct FaultPlan {
    /// Staged writes allowed before the next one fails; negative = disabled
    remaining_writes: std::sync::atomic::AtomicI64,
    /// Whether the next commit fails
    fail_commit: AtomicBool,
}

#[cfg(test)]
impl Default for FaultPlan {
    fn default() -> Self {
        FaultPlan {
            remaining_writes: std::sync::atomic::AtomicI64::new(-1),
            fail_commit: AtomicBool::new(false),
        }
    }
}

#[cfg(test)]
impl FaultPlan {
    fn check_write(&self) -> Result<()> {
        if self.remaining_writes.load(Ordering::SeqCst) < 0 {
            return Ok(());
        }
        if self.remaining_writes.fetch_sub(1, Ordering::SeqCst) == 0 {
            return Err(Error::Storage("injected write failure".into()));
        }
        Ok(())
    }

    fn check_commit(&self) -> Result<()> {
        if self.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(Error::Storage("injected commit failure".into()));
        }
        Ok(())
    }
}

/// A write transaction over the store.
///
/// Mutations are staged in per-key order and applied as a single atomic
/// RocksDB batch on [`commit`](StoreTx::commit). Reads through the
/// transaction observe staged state first, then committed state, so a
/// coalesced multi-block batch can read rows it wrote earlier in the same
/// transaction. Dropping the transaction without committing discards every
/// staged operation.
pub struct StoreTx {
    db: Arc<Database>,
    gate: Arc<AtomicBool>,
    /// Staged operations: `Some` = put, `None` = delete. Later operations on
    /// the same key replace earlier ones.
    staged: BTreeMap<(&'static str, Vec<u8>), Option<Vec<u8>>>,
    #[cfg(test)]
    faults: Arc<FaultPlan>,
}

impl StoreTx {
    fn stage(&mut self, cf: &'static str, key: Vec<u8>, op: Option<Vec<u8>>) -> Result<()> {
        #[cfg(test)]
        self.faults.check_write()?;
        self.staged.insert((cf, key), op);
        Ok(())
    }

    fn staged_get(&self, cf: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if let Some(op) = self.staged.get(&(cf, key.to_vec())) {
            return Ok(op.clone());
        }
        self.db.get(cf, key)
    }

    /// Stage insertion of a type-S element and its unspent mirror row
    pub fn add_siacoin_element(&mut self, element: &SiacoinElement) -> Result<()> {
        self.stage(
            CF_ELEMENTS,
            keys::element_key(ElementKind::Siacoin, &element.id),
            Some(codec::encode(element)?),
        )?;
        self.stage(
            CF_UNSPENT,
            keys::unspent_key(&element.address, ElementKind::Siacoin, &element.id),
            Some(codec::encode(&element.id)?),
        )
    }

    /// Stage insertion of a type-F element and its unspent mirror row
    pub fn add_siafund_element(&mut self, element: &SiafundElement) -> Result<()> {
        self.stage(
            CF_ELEMENTS,
            keys::element_key(ElementKind::Siafund, &element.id),
            Some(codec::encode(element)?),
        )?;
        self.stage(
            CF_UNSPENT,
            keys::unspent_key(&element.address, ElementKind::Siafund, &element.id),
            Some(codec::encode(&element.id)?),
        )
    }

    /// Stage insertion (or in-place replacement, for revisions) of a file
    /// contract element. Contracts have no unspent mirror row.
    pub fn add_file_contract_element(&mut self, element: &FileContractElement) -> Result<()> {
        self.stage(
            CF_ELEMENTS,
            keys::element_key(ElementKind::FileContract, &element.id),
            Some(codec::encode(element)?),
        )
    }

    /// Stage removal of a spent type-S element and its unspent mirror row
    pub fn remove_siacoin_element(&mut self, element: &SiacoinElement) -> Result<()> {
        self.stage(
            CF_ELEMENTS,
            keys::element_key(ElementKind::Siacoin, &element.id),
            None,
        )?;
        self.stage(
            CF_UNSPENT,
            keys::unspent_key(&element.address, ElementKind::Siacoin, &element.id),
            None,
        )
    }

    /// Stage removal of a spent type-F element and its unspent mirror row
    pub fn remove_siafund_element(&mut self, element: &SiafundElement) -> Result<()> {
        self.stage(
            CF_ELEMENTS,
            keys::element_key(ElementKind::Siafund, &element.id),
            None,
        )?;
        self.stage(
            CF_UNSPENT,
            keys::unspent_key(&element.address, ElementKind::Siafund, &element.id),
            None,
        )
    }

    /// Stage removal of a file contract element
    pub fn remove_file_contract_element(&mut self, id: &ElementID) -> Result<()> {
        self.stage(
            CF_ELEMENTS,
            keys::element_key(ElementKind::FileContract, id),
            None,
        )
    }

    /// Look up a file contract element, observing staged state first.
    ///
    /// Revision folding reads the stored payload through this before
    /// replacing it, so repeated revisions within one batch stay exact.
    pub fn file_contract_element(&self, id: &ElementID) -> Result<Option<FileContractElement>> {
        match self.staged_get(CF_ELEMENTS, &keys::element_key(ElementKind::FileContract, id))? {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Whether an element currently exists, observing staged state first
    pub fn contains_element(&self, kind: ElementKind, id: &ElementID) -> Result<bool> {
        let key = keys::element_key(kind, id);
        if let Some(op) = self.staged.get(&(CF_ELEMENTS, key.clone())) {
            return Ok(op.is_some());
        }
        self.db.exists(CF_ELEMENTS, &key)
    }

    /// Stage insertion of a confirmed transaction and one row per touched
    /// address.
    ///
    /// # Arguments
    /// * `txn` - The transaction
    /// * `addresses` - The distinct addresses the transaction touches
    /// * `index` - The confirming block's chain index
    /// * `position` - The transaction's position within the block
    pub fn add_transaction(
        &mut self,
        txn: &Transaction,
        addresses: &BTreeSet<Address>,
        index: &ChainIndex,
        position: u32,
    ) -> Result<()> {
        let id = txn.id();
        self.stage(
            CF_TRANSACTIONS,
            keys::transaction_key(&id),
            Some(codec::encode(txn)?),
        )?;
        for address in addresses {
            self.stage(
                CF_ADDR_TXNS,
                keys::address_transaction_key(address, index.height, position),
                Some(codec::encode(&(id, *index))?),
            )?;
        }
        Ok(())
    }

    /// Stage removal of a reverted transaction and its address rows.
    ///
    /// The address rows are keyed by `(address, height, position)`, all of
    /// which are recomputable from the reverted block, so removal needs no
    /// auxiliary index.
    pub fn remove_transaction(
        &mut self,
        txn: &Transaction,
        addresses: &BTreeSet<Address>,
        height: u64,
        position: u32,
    ) -> Result<()> {
        self.stage(CF_TRANSACTIONS, keys::transaction_key(&txn.id()), None)?;
        for address in addresses {
            self.stage(
                CF_ADDR_TXNS,
                keys::address_transaction_key(address, height, position),
                None,
            )?;
        }
        Ok(())
    }

    /// Stage insertion of a per-block statistics row
    pub fn add_chain_stats(&mut self, index: &ChainIndex, stats: &ChainStats) -> Result<()> {
        self.stage(
            CF_CHAIN_STATS,
            keys::chain_stats_key(index),
            Some(codec::encode(stats)?),
        )
    }

    /// Stage removal of a per-block statistics row
    pub fn remove_chain_stats(&mut self, index: &ChainIndex) -> Result<()> {
        self.stage(CF_CHAIN_STATS, keys::chain_stats_key(index), None)
    }

    /// Per-block statistics, observing staged state first.
    ///
    /// Inside a coalesced batch this returns rows staged by earlier deltas
    /// of the same transaction, which revert seeding depends on.
    pub fn chain_stats(&self, index: &ChainIndex) -> Result<Option<ChainStats>> {
        match self.staged_get(CF_CHAIN_STATS, &keys::chain_stats_key(index))? {
            Some(bytes) => Ok(Some(codec::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Stage an update of the tip marker
    pub fn set_tip(&mut self, index: &ChainIndex) -> Result<()> {
        self.stage(CF_META, keys::tip_key(), Some(codec::encode(index)?))
    }

    /// Number of staged operations
    pub fn len(&self) -> usize {
        self.staged.len()
    }

    /// Whether no operations are staged
    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    /// Apply every staged operation as one atomic, fsynced batch.
    ///
    /// On failure nothing is applied and the write gate is released; the
    /// store still holds the pre-transaction state.
    pub fn commit(self) -> Result<()> {
        #[cfg(test)]
        self.faults.check_commit()?;

        let mut batch = WriteBatch::default();
        for ((cf, key), op) in &self.staged {
            match op {
                Some(value) => self.db.batch_put(&mut batch, cf, key, value),
                None => self.db.batch_delete(&mut batch, cf, key),
            }
        }
        let count = self.staged.len();
        self.db.write_batch(batch)?;
        debug!("Write transaction committed ({} operations)", count);
        Ok(())
    }

    /// Discard every staged operation
    pub fn rollback(self) {
        debug!(
            "Write transaction rolled back ({} staged operations discarded)",
            self.staged.len()
        );
    }
}

impl Drop for StoreTx {
    fn drop(&mut self) {
        self.gate.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for StoreTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreTx")
            .field("staged", &self.staged.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BlockID, Currency, Hash256};
    use tempfile::TempDir;

    fn open_store() -> (TempDir, ChainStore) {
        let dir = TempDir::new().expect("temp dir");
        let store = ChainStore::open(dir.path().join("db")).expect("open store");
        (dir, store)
    }

    fn addr(n: u8) -> Address {
        Address(Hash256([n; 32]))
    }

    fn coin(source: u8, index: u64, owner: u8, value: u128) -> SiacoinElement {
        SiacoinElement {
            id: ElementID::new(Hash256([source; 32]), index),
            address: addr(owner),
            value: Currency::new(value),
            maturity_height: 0,
        }
    }

    fn index(height: u64, id: u8) -> ChainIndex {
        ChainIndex::new(height, BlockID(Hash256([id; 32])))
    }

    #[test]
    fn test_commit_makes_writes_visible() {
        let (_dir, store) = open_store();
        let element = coin(1, 0, 7, 100);

        let mut tx = store.begin_tx().unwrap();
        assert!(tx.is_empty());
        tx.add_siacoin_element(&element).unwrap();
        tx.set_tip(&index(1, 0xaa)).unwrap();
        assert_eq!(tx.len(), 3); // element + unspent mirror + tip marker
        tx.commit().unwrap();

        assert_eq!(store.siacoin_element(&element.id).unwrap(), Some(element.clone()));
        assert_eq!(
            store.unspent_siacoin_elements(&addr(7)).unwrap(),
            vec![element.id]
        );
        assert_eq!(store.tip_index().unwrap(), Some(index(1, 0xaa)));
    }

    #[test]
    fn test_uncommitted_writes_invisible_and_rollback_discards() {
        let (_dir, store) = open_store();
        let element = coin(2, 0, 8, 50);

        let mut tx = store.begin_tx().unwrap();
        tx.add_siacoin_element(&element).unwrap();
        assert_eq!(store.siacoin_element(&element.id).unwrap(), None);
        tx.rollback();

        assert_eq!(store.siacoin_element(&element.id).unwrap(), None);
        assert!(store.unspent_siacoin_elements(&addr(8)).unwrap().is_empty());
    }

    #[test]
    fn test_single_writer_gate() {
        let (_dir, store) = open_store();

        let tx = store.begin_tx().unwrap();
        assert!(matches!(store.begin_tx(), Err(Error::Busy)));
        drop(tx);
        // released on drop
        let tx = store.begin_tx().unwrap();
        tx.rollback();
        store.begin_tx().unwrap().commit().unwrap();
    }

    #[test]
    fn test_tx_reads_own_staged_stats() {
        let (_dir, store) = open_store();
        let idx = index(3, 0x33);
        let stats = ChainStats {
            new_siacoins_count: 4,
            ..ChainStats::default()
        };

        let mut tx = store.begin_tx().unwrap();
        tx.add_chain_stats(&idx, &stats).unwrap();
        assert_eq!(tx.chain_stats(&idx).unwrap(), Some(stats.clone()));
        // staged removal shadows the staged insert
        tx.remove_chain_stats(&idx).unwrap();
        assert_eq!(tx.chain_stats(&idx).unwrap(), None);
        tx.rollback();

        assert_eq!(store.chain_stats(&idx).unwrap(), None);
    }

    #[test]
    fn test_remove_element_clears_mirror_row() {
        let (_dir, store) = open_store();
        let element = coin(4, 1, 9, 75);

        let mut tx = store.begin_tx().unwrap();
        tx.add_siacoin_element(&element).unwrap();
        tx.commit().unwrap();

        let mut tx = store.begin_tx().unwrap();
        assert!(tx.contains_element(ElementKind::Siacoin, &element.id).unwrap());
        tx.remove_siacoin_element(&element).unwrap();
        assert!(!tx.contains_element(ElementKind::Siacoin, &element.id).unwrap());
        tx.commit().unwrap();

        assert_eq!(store.siacoin_element(&element.id).unwrap(), None);
        assert!(store.unspent_siacoin_elements(&addr(9)).unwrap().is_empty());
    }

    #[test]
    fn test_address_transactions_order_and_pagination() {
        let (_dir, store) = open_store();
        let address = addr(5);

        let mut ids = Vec::new();
        let mut tx = store.begin_tx().unwrap();
        for height in 1..=3u64 {
            for position in 0..2u32 {
                let txn = Transaction {
                    arbitrary_data: vec![height as u8, position as u8],
                    ..Transaction::default()
                };
                ids.push(txn.id());
                let addresses = [address].into_iter().collect();
                tx.add_transaction(&txn, &addresses, &index(height, height as u8), position)
                    .unwrap();
            }
        }
        tx.commit().unwrap();

        let all = store.address_transactions(&address, usize::MAX, 0).unwrap();
        assert_eq!(all, ids);

        let page = store.address_transactions(&address, 2, 3).unwrap();
        assert_eq!(page, ids[3..5].to_vec());

        let tail = store.address_transactions(&address, 10, 5).unwrap();
        assert_eq!(tail, ids[5..].to_vec());
    }

    #[test]
    fn test_injected_write_failure_fires_once() {
        let (_dir, store) = open_store();
        store.fail_after_writes(1);

        let mut tx = store.begin_tx().unwrap();
        // element + mirror = two staged writes; the second fails
        let err = tx.add_siacoin_element(&coin(6, 0, 1, 10)).unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        tx.rollback();

        // one-shot: a retried transaction succeeds
        let mut tx = store.begin_tx().unwrap();
        tx.add_siacoin_element(&coin(6, 0, 1, 10)).unwrap();
        tx.commit().unwrap();
    }

    #[test]
    fn test_injected_commit_failure_leaves_state_unchanged() {
        let (_dir, store) = open_store();
        store.fail_next_commit();

        let mut tx = store.begin_tx().unwrap();
        tx.add_siacoin_element(&coin(7, 0, 2, 10)).unwrap();
        assert!(matches!(tx.commit(), Err(Error::Storage(_))));

        assert_eq!(
            store
                .siacoin_element(&ElementID::new(Hash256([7; 32]), 0))
                .unwrap(),
            None
        );
        // gate released despite the failed commit
        store.begin_tx().unwrap().rollback();
    }
}
