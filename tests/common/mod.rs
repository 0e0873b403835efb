//! Shared helpers for the integration suites

#![allow(dead_code)]

use chain_explorer::{
    Address, ApplyUpdate, Block, BlockID, ChainIndex, ChainStats, Currency, ElementID, Explorer,
    FileContractElement, Hash256, SiacoinElement, SiafundElement, Transaction, TransactionID,
    ValidationContext,
};
use tempfile::TempDir;

/// Open a fresh explorer over a scratch database, starting from the empty
/// pre-genesis tip.
pub fn open_explorer() -> (TempDir, Explorer) {
    let dir = TempDir::new().expect("failed to create temp directory");
    let explorer = Explorer::open(dir.path().join("db"), ValidationContext::default())
        .expect("failed to open explorer");
    (dir, explorer)
}

pub fn hash(n: u8) -> Hash256 {
    Hash256([n; 32])
}

pub fn addr(n: u8) -> Address {
    Address(hash(n))
}

pub fn context_at(height: u64, id: u8) -> ValidationContext {
    ValidationContext {
        index: ChainIndex::new(height, BlockID(hash(id))),
        ..ValidationContext::default()
    }
}

pub fn coin(source: Hash256, index: u64, owner: Address, value: u128) -> SiacoinElement {
    SiacoinElement {
        id: ElementID::new(source, index),
        address: owner,
        value: Currency::new(value),
        maturity_height: 0,
    }
}

pub fn contract(
    source: Hash256,
    filesize: u64,
    missed_host_value: u128,
    total_collateral: u128,
) -> FileContractElement {
    FileContractElement {
        id: ElementID::new(source, 0),
        filesize,
        file_merkle_root: Hash256::ZERO,
        window_start: 10,
        window_end: 20,
        missed_host_value: Currency::new(missed_host_value),
        total_collateral: Currency::new(total_collateral),
    }
}

/// An apply update whose block carries the given transactions
pub fn update_with(
    height: u64,
    id: u8,
    transactions: Vec<Transaction>,
) -> ApplyUpdate {
    ApplyUpdate {
        block: Block {
            transactions,
            ..Block::default()
        },
        context: context_at(height, id),
        ..ApplyUpdate::default()
    }
}

/// Everything an address's owner can observe about it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressView {
    pub unspent_siacoins: Vec<(ElementID, SiacoinElement)>,
    pub unspent_siafunds: Vec<(ElementID, SiafundElement)>,
    pub siacoin_balance: Currency,
    pub siafund_balance: u64,
    pub transactions: Vec<TransactionID>,
}

/// The full observable state over a fixed address universe, used to assert
/// that apply-then-revert round-trips exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub tip: ChainIndex,
    pub latest: ChainStats,
    pub addresses: Vec<AddressView>,
}

pub fn snapshot(explorer: &Explorer, universe: &[Address]) -> Snapshot {
    let addresses = universe
        .iter()
        .map(|address| {
            let unspent_siacoins = explorer
                .unspent_siacoin_elements(address)
                .unwrap()
                .into_iter()
                .map(|id| {
                    let element = explorer
                        .siacoin_element(&id)
                        .unwrap()
                        .expect("unspent row without element");
                    (id, element)
                })
                .collect();
            let unspent_siafunds = explorer
                .unspent_siafund_elements(address)
                .unwrap()
                .into_iter()
                .map(|id| {
                    let element = explorer
                        .siafund_element(&id)
                        .unwrap()
                        .expect("unspent row without element");
                    (id, element)
                })
                .collect();
            AddressView {
                unspent_siacoins,
                unspent_siafunds,
                siacoin_balance: explorer.siacoin_balance(address).unwrap(),
                siafund_balance: explorer.siafund_balance(address).unwrap(),
                transactions: explorer.transactions(address, usize::MAX, 0).unwrap(),
            }
        })
        .collect();
    Snapshot {
        tip: explorer.tip(),
        latest: explorer.chain_stats_latest(),
        addresses,
    }
}
