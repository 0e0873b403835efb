//! The update engine: exactly-once, in-order folding of chain deltas
//!
//! The engine registers with the chain manager as a subscriber and turns
//! each apply or revert delta into one store transaction. A delta either
//! commits in full — advancing the in-memory tip — or rolls back in full,
//! leaving both the store and the tip untouched. Successive applies with
//! `may_commit = false` coalesce into a single transaction that commits
//! atomically on the first delta allowed to commit (or on a revert).

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::stats::ChainStats;
use crate::store::{ChainStore, StoreTx};
use crate::types::{
    ApplyUpdate, ChainIndex, Currency, ElementKind, FileContractElement, RevertUpdate,
    ValidationContext,
};

/// The capability the chain manager requires of a subscriber
pub trait ChainSubscriber {
    /// Fold one newly confirmed block into the index. With
    /// `may_commit = false` the writes are staged but the commit is
    /// deferred until a later delta allows it.
    fn process_chain_apply_update(&self, update: &ApplyUpdate, may_commit: bool) -> Result<()>;

    /// Undo the most recently applied block
    fn process_chain_revert_update(&self, update: &RevertUpdate) -> Result<()>;
}

/// A coalesced batch of applied-but-uncommitted deltas
struct OpenBatch {
    tx: StoreTx,
    /// Context of the last staged delta — the tip the store will have once
    /// the batch commits
    context: ValidationContext,
    /// Statistics of the last staged delta
    stats: ChainStats,
    /// Number of deltas staged so far
    deltas: usize,
}

/// Mutable engine state, guarded by the engine's lock
struct EngineState {
    /// Validation context of the committed tip
    context: ValidationContext,
    /// Statistics of the committed tip
    tip_stats: ChainStats,
    /// Open coalesced batch, if any
    batch: Option<OpenBatch>,
    closed: bool,
}

impl EngineState {
    /// Tip as the next delta will see it: the pending batch tip when a
    /// batch is open, the committed tip otherwise.
    fn pending_tip(&self) -> (&ValidationContext, &ChainStats) {
        match &self.batch {
            Some(batch) => (&batch.context, &batch.stats),
            None => (&self.context, &self.tip_stats),
        }
    }
}

/// Folds chain deltas into the store and maintains the tip
pub struct UpdateEngine {
    store: Arc<ChainStore>,
    state: RwLock<EngineState>,
}

impl UpdateEngine {
    /// Create the engine, recovering the tip from storage when the index
    /// has been populated before, and starting from `genesis_context`
    /// otherwise.
    pub fn new(store: Arc<ChainStore>, genesis_context: ValidationContext) -> Result<Self> {
        let (context, tip_stats) = match store.tip_index()? {
            Some(index) if index != ChainIndex::default() => {
                let stats = store.chain_stats(&index)?.ok_or_else(|| {
                    Error::Consistency(format!("tip marker {} has no statistics row", index))
                })?;
                info!("Recovered tip {} from storage", index);
                (stats.validation_context.clone(), stats)
            }
            _ => {
                debug!("Starting from empty index at {}", genesis_context.index);
                (
                    genesis_context.clone(),
                    ChainStats::genesis(genesis_context),
                )
            }
        };
        Ok(Self {
            store,
            state: RwLock::new(EngineState {
                context,
                tip_stats,
                batch: None,
                closed: false,
            }),
        })
    }

    /// The committed tip index
    pub fn tip(&self) -> ChainIndex {
        self.state.read().context.index
    }

    /// The committed tip's validation context and statistics, read
    /// atomically.
    pub fn tip_state(&self) -> (ValidationContext, ChainStats) {
        let state = self.state.read();
        (state.context.clone(), state.tip_stats.clone())
    }

    /// Roll back any open batch and refuse all further deltas.
    ///
    /// Idempotent; queries against the committed tip keep working.
    pub fn close(&self) {
        let mut state = self.state.write();
        if state.closed {
            return;
        }
        state.closed = true;
        if let Some(batch) = state.batch.take() {
            warn!(
                "Closing with an open batch of {} deltas; rolling back",
                batch.deltas
            );
            batch.tx.rollback();
        }
        info!("Update engine closed");
    }

    fn apply(&self, update: &ApplyUpdate, may_commit: bool) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(Error::Closed);
        }

        let (seed_context, seed_stats) = state.pending_tip();
        debug!(
            "Applying block {} on top of {}",
            update.context.index, seed_context.index
        );
        let seed = ChainStats::next(seed_stats, update.block.clone(), update.context.clone());

        let (mut tx, deltas) = match state.batch.take() {
            Some(batch) => (batch.tx, batch.deltas),
            None => (self.store.begin_tx()?, 0),
        };

        let stats = match fold_apply(&mut tx, update, seed) {
            Ok(stats) => stats,
            Err(e) => {
                error!("Apply of block {} aborted: {}", update.context.index, e);
                tx.rollback();
                return Err(e);
            }
        };

        if may_commit {
            tx.commit()?;
            state.context = update.context.clone();
            state.tip_stats = stats;
            info!(
                "Tip advanced to {} ({} deltas committed)",
                update.context.index,
                deltas + 1
            );
        } else {
            debug!(
                "Delta for block {} staged; commit deferred",
                update.context.index
            );
            state.batch = Some(OpenBatch {
                tx,
                context: update.context.clone(),
                stats,
                deltas: deltas + 1,
            });
        }
        Ok(())
    }

    fn revert(&self, update: &RevertUpdate) -> Result<()> {
        let mut state = self.state.write();
        if state.closed {
            return Err(Error::Closed);
        }

        // a revert always closes out the open batch, if any
        let (mut tx, reverted) = match state.batch.take() {
            Some(batch) => (batch.tx, batch.context.index),
            None => (self.store.begin_tx()?, state.context.index),
        };

        let stats = match fold_revert(&mut tx, update, &reverted) {
            Ok(stats) => stats,
            Err(e) => {
                error!("Revert of block {} aborted: {}", reverted, e);
                tx.rollback();
                return Err(e);
            }
        };

        tx.commit()?;
        state.context = update.context.clone();
        state.tip_stats = stats;
        info!("Reverted block {}; tip now {}", reverted, update.context.index);
        Ok(())
    }
}

impl ChainSubscriber for UpdateEngine {
    fn process_chain_apply_update(&self, update: &ApplyUpdate, may_commit: bool) -> Result<()> {
        self.apply(update, may_commit)
    }

    fn process_chain_revert_update(&self, update: &RevertUpdate) -> Result<()> {
        self.revert(update)
    }
}

impl std::fmt::Debug for UpdateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateEngine")
            .field("tip", &self.tip())
            .finish()
    }
}

/// Fold one apply delta into the transaction, returning the block's
/// statistics record.
///
/// Ordering is fixed: transactions are recorded first, removals precede
/// insertions, and revisions precede contract creations, so each element
/// key sees at most one kind of operation per block and a contract created
/// and revised in the same block ends up stored with its final payload.
fn fold_apply(tx: &mut StoreTx, update: &ApplyUpdate, mut stats: ChainStats) -> Result<ChainStats> {
    for (position, txn) in update.block.transactions.iter().enumerate() {
        let addresses = txn.addresses();
        tx.add_transaction(txn, &addresses, &update.context.index, position as u32)?;
    }

    let resolved_ids: std::collections::BTreeSet<_> = update
        .resolved_file_contracts
        .iter()
        .map(|contract| contract.id)
        .collect();

    for element in &update.spent_siacoins {
        tx.remove_siacoin_element(element)?;
        stats.spent_siacoins_count += 1;
    }
    for element in &update.spent_siafunds {
        tx.remove_siafund_element(element)?;
        stats.spent_siafunds_count += 1;
    }
    for contract in &update.resolved_file_contracts {
        tx.remove_file_contract_element(&contract.id)?;
        stats.resolved_file_contracts_count += 1;
        let payout = contract_payout(contract)?;
        stats.active_contract_count = sub_u64(
            stats.active_contract_count,
            1,
            "active contract count",
        )?;
        stats.active_contract_cost =
            sub_currency(stats.active_contract_cost, payout, "active contract cost")?;
        stats.active_contract_size = sub_u64(
            stats.active_contract_size,
            contract.filesize,
            "active contract size",
        )?;
    }

    for element in &update.new_siacoins {
        tx.add_siacoin_element(element)?;
        stats.new_siacoins_count += 1;
    }
    for element in &update.new_siafunds {
        tx.add_siafund_element(element)?;
        stats.new_siafunds_count += 1;
    }
    for contract in &update.revised_file_contracts {
        // active aggregates track the stored payload, so a revision adjusts
        // them by its delta. A contract with no stored payload was either
        // created later in this same block (the creation loop counts it
        // once, with its final payload) or resolved earlier in it (nothing
        // to store or count).
        if let Some(prev) = tx.file_contract_element(&contract.id)? {
            let prev_payout = contract_payout(&prev)?;
            let payout = contract_payout(contract)?;
            stats.active_contract_cost = add_currency(
                sub_currency(stats.active_contract_cost, prev_payout, "active contract cost")?,
                payout,
                "active contract cost",
            )?;
            stats.active_contract_size = add_u64(
                sub_u64(
                    stats.active_contract_size,
                    prev.filesize,
                    "active contract size",
                )?,
                contract.filesize,
                "active contract size",
            )?;
            tx.add_file_contract_element(contract)?;
        } else if !resolved_ids.contains(&contract.id) {
            tx.add_file_contract_element(contract)?;
        }
        stats.revised_file_contracts_count += 1;
        stats.total_contract_size = add_u64(
            stats.total_contract_size,
            contract.filesize,
            "total contract size",
        )?;
        stats.total_revision_volume = add_u64(
            stats.total_revision_volume,
            contract.filesize,
            "total revision volume",
        )?;
    }
    for contract in &update.new_file_contracts {
        tx.add_file_contract_element(contract)?;
        stats.new_file_contracts_count += 1;
        stats.active_contract_count += 1;
        let payout = contract_payout(contract)?;
        stats.active_contract_cost =
            add_currency(stats.active_contract_cost, payout, "active contract cost")?;
        stats.active_contract_size = add_u64(
            stats.active_contract_size,
            contract.filesize,
            "active contract size",
        )?;
        stats.total_contract_cost =
            add_currency(stats.total_contract_cost, payout, "total contract cost")?;
        stats.total_contract_size = add_u64(
            stats.total_contract_size,
            contract.filesize,
            "total contract size",
        )?;
    }

    tx.add_chain_stats(&update.context.index, &stats)?;
    tx.set_tip(&update.context.index)?;
    Ok(stats)
}

/// Fold one revert delta into the transaction, returning the statistics of
/// the new (post-revert) tip.
///
/// The new tip's running aggregates are read back from its stored
/// statistics row wholesale rather than re-derived from the delta, which
/// keeps reverts exact under repeated in-block revisions and rules out
/// underflow.
fn fold_revert(
    tx: &mut StoreTx,
    update: &RevertUpdate,
    reverted: &ChainIndex,
) -> Result<ChainStats> {
    for (position, txn) in update.block.transactions.iter().enumerate() {
        let addresses = txn.addresses();
        tx.remove_transaction(txn, &addresses, reverted.height, position as u32)?;
    }

    for element in &update.spent_siacoins {
        tx.add_siacoin_element(element)?;
    }
    for element in &update.spent_siafunds {
        tx.add_siafund_element(element)?;
    }
    for contract in &update.resolved_file_contracts {
        tx.add_file_contract_element(contract)?;
    }

    // revisions roll back before created-element removal so that a contract
    // created and revised in the reverted block still ends up removed
    for revision in &update.revised_file_contracts {
        if revision.parent.id != revision.revision.id {
            return Err(Error::Consistency(format!(
                "revision of {} carries mismatched parent {}",
                revision.revision.id, revision.parent.id
            )));
        }
        if !tx.contains_element(ElementKind::FileContract, &revision.revision.id)? {
            return Err(Error::Consistency(format!(
                "revert references unknown file contract {}",
                revision.revision.id
            )));
        }
        tx.add_file_contract_element(&revision.parent)?;
    }

    for element in &update.new_siacoins {
        if !tx.contains_element(ElementKind::Siacoin, &element.id)? {
            return Err(Error::Consistency(format!(
                "revert references unknown siacoin element {}",
                element.id
            )));
        }
        tx.remove_siacoin_element(element)?;
    }
    for element in &update.new_siafunds {
        if !tx.contains_element(ElementKind::Siafund, &element.id)? {
            return Err(Error::Consistency(format!(
                "revert references unknown siafund element {}",
                element.id
            )));
        }
        tx.remove_siafund_element(element)?;
    }
    for contract in &update.new_file_contracts {
        if !tx.contains_element(ElementKind::FileContract, &contract.id)? {
            return Err(Error::Consistency(format!(
                "revert references unknown file contract {}",
                contract.id
            )));
        }
        tx.remove_file_contract_element(&contract.id)?;
    }

    tx.remove_chain_stats(reverted)?;

    let stats = match tx.chain_stats(&update.context.index)? {
        Some(stats) => stats,
        None if update.context.index == ChainIndex::default() => {
            ChainStats::genesis(update.context.clone())
        }
        None => {
            return Err(Error::Consistency(format!(
                "no statistics recorded for tip {}",
                update.context.index
            )))
        }
    };

    tx.set_tip(&update.context.index)?;
    Ok(stats)
}

fn contract_payout(contract: &FileContractElement) -> Result<Currency> {
    contract
        .payout()
        .ok_or_else(|| Error::Consistency(format!("payout of {} overflows", contract.id)))
}

fn add_currency(a: Currency, b: Currency, what: &str) -> Result<Currency> {
    a.checked_add(b)
        .ok_or_else(|| Error::Consistency(format!("{} would overflow", what)))
}

fn sub_currency(a: Currency, b: Currency, what: &str) -> Result<Currency> {
    a.checked_sub(b)
        .ok_or_else(|| Error::Consistency(format!("{} would underflow", what)))
}

fn add_u64(a: u64, b: u64, what: &str) -> Result<u64> {
    a.checked_add(b)
        .ok_or_else(|| Error::Consistency(format!("{} would overflow", what)))
}

fn sub_u64(a: u64, b: u64, what: &str) -> Result<u64> {
    a.checked_sub(b)
        .ok_or_else(|| Error::Consistency(format!("{} would underflow", what)))
}
