//! Storage key formatting functions
//!
//! One function per relation key. Numeric components are zero-padded decimal
//! so that lexicographic key order equals numeric order; address-partitioned
//! relations lead with the address so per-address rows form one contiguous,
//! prefix-scannable range.

use crate::types::{Address, ChainIndex, ElementID, ElementKind, TransactionID};

/// Format key for an element row
///
/// # Arguments
/// * `kind` - Element kind partition tag
/// * `id` - Element ID
pub fn element_key(kind: ElementKind, id: &ElementID) -> Vec<u8> {
    format!("{}:{}:{:020}", kind.as_str(), id.source, id.index).into_bytes()
}

/// Format key for an unspent-by-address row
///
/// # Arguments
/// * `address` - Owning address
/// * `kind` - Element kind partition tag
/// * `id` - Element ID
pub fn unspent_key(address: &Address, kind: ElementKind, id: &ElementID) -> Vec<u8> {
    format!(
        "{}:{}:{}:{:020}",
        address,
        kind.as_str(),
        id.source,
        id.index
    )
    .into_bytes()
}

/// Prefix covering every unspent row of one kind under one address
pub fn unspent_prefix(address: &Address, kind: ElementKind) -> Vec<u8> {
    format!("{}:{}:", address, kind.as_str()).into_bytes()
}

/// Format key for a transaction row
pub fn transaction_key(id: &TransactionID) -> Vec<u8> {
    id.to_string().into_bytes()
}

/// Format key for an address-transaction row.
///
/// The `(height, position)` components order rows by block application, so a
/// forward scan yields transactions oldest-first, and the exact key is
/// recomputable from a reverted block without an auxiliary index.
///
/// # Arguments
/// * `address` - Touched address
/// * `height` - Height of the confirming block
/// * `position` - Position of the transaction within the block
pub fn address_transaction_key(address: &Address, height: u64, position: u32) -> Vec<u8> {
    format!("{}:{:020}:{:010}", address, height, position).into_bytes()
}

/// Prefix covering every address-transaction row under one address
pub fn address_transaction_prefix(address: &Address) -> Vec<u8> {
    format!("{}:", address).into_bytes()
}

/// Format key for a per-block statistics row
pub fn chain_stats_key(index: &ChainIndex) -> Vec<u8> {
    format!("{:020}:{}", index.height, index.id).into_bytes()
}

/// Format key for the tip marker
///
/// The tip marker is a singleton, so the key is fixed.
pub fn tip_key() -> Vec<u8> {
    b"tip".to_vec()
}
