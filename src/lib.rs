//! # Chain Explorer
//!
//! Persistent explorer index for a UTXO-style chain with coin, fund and
//! file-contract elements.
//!
//! This crate provides:
//! - A transactional RocksDB-backed store for elements, unspent mirrors,
//!   transactions and per-block statistics
//! - An update engine that folds chain apply/revert deltas into the store,
//!   one atomic batch per (possibly coalesced) delta
//! - A read-only query surface for element lookups, balances, per-address
//!   transaction listings and aggregated statistics

#![warn(missing_docs, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod codec;
pub mod db;
pub mod engine;
pub mod error;
pub mod explorer;
pub mod keys;
pub mod stats;
pub mod store;
pub mod types;

pub use engine::{ChainSubscriber, UpdateEngine};
pub use error::{Error, Result};
pub use explorer::Explorer;
pub use stats::ChainStats;
pub use store::{ChainStore, StoreTx};
pub use types::{
    Address, ApplyUpdate, Block, BlockHeader, BlockID, ChainIndex, Currency, ElementID,
    ElementKind, FileContractElement, FileContractRevision, FundAmount, Hash256, RevertUpdate,
    SiacoinElement, SiacoinInput, SiacoinOutput, SiafundElement, SiafundInput, SiafundOutput,
    Transaction, TransactionID, ValidationContext,
};
