//! Core domain types for the explorer index
//!
//! Everything the index persists or folds over is defined here: primitive
//! identifiers, the three element kinds, transactions, blocks, and the
//! apply/revert deltas delivered by the chain manager.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

/// A 32-byte identifier (block IDs, transaction IDs, addresses, output sources)
#[derive(
    Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    /// The all-zero hash
    pub const ZERO: Hash256 = Hash256([0u8; 32]);

    /// Raw bytes of the hash
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self)
    }
}

impl From<[u8; 32]> for Hash256 {
    fn from(bytes: [u8; 32]) -> Self {
        Hash256(bytes)
    }
}

macro_rules! hash_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
            Serialize, Deserialize,
        )]
        pub struct $name(pub Hash256);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                $name(Hash256(bytes))
            }
        }
    };
}

hash_newtype! {
    /// 32-byte opaque identifier of a value recipient
    Address
}
hash_newtype! {
    /// Unique identifier of a block
    BlockID
}
hash_newtype! {
    /// Unique identifier of a transaction
    TransactionID
}

/// Amount of type-S value (coins), an unsigned 128-bit scalar.
///
/// Arithmetic is checked everywhere it feeds a persisted aggregate; an
/// underflow there is a consistency violation, never a wrap.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct Currency(pub u128);

impl Currency {
    /// Zero coins
    pub const ZERO: Currency = Currency(0);

    /// Construct from a raw scalar
    pub const fn new(value: u128) -> Self {
        Currency(value)
    }

    /// Checked addition, `None` on overflow
    pub fn checked_add(self, other: Currency) -> Option<Currency> {
        self.0.checked_add(other.0).map(Currency)
    }

    /// Checked subtraction, `None` on underflow
    pub fn checked_sub(self, other: Currency) -> Option<Currency> {
        self.0.checked_sub(other.0).map(Currency)
    }

    /// Whether this is the zero amount
    pub fn is_zero(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Amount of type-F value (funds), an unsigned 64-bit scalar
pub type FundAmount = u64;

/// Uniquely names any chain element: the transaction or block that created
/// it, plus the output index within that source.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ElementID {
    /// ID of the transaction or block that created the element
    pub source: Hash256,
    /// Output index within the source
    pub index: u64,
}

impl ElementID {
    /// Construct an element ID
    pub const fn new(source: Hash256, index: u64) -> Self {
        ElementID { source, index }
    }
}

impl fmt::Display for ElementID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source, self.index)
    }
}

/// A `(height, block ID)` pair locating a block on the canonical chain
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct ChainIndex {
    /// Block height
    pub height: u64,
    /// Block ID at that height
    pub id: BlockID,
}

impl ChainIndex {
    /// Construct a chain index
    pub const fn new(height: u64, id: BlockID) -> Self {
        ChainIndex { height, id }
    }
}

impl fmt::Display for ChainIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.height, self.id)
    }
}

/// Storage partition tag for the three element kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ElementKind {
    /// Type-S fungible coin output
    Siacoin,
    /// Type-F fungible governance output
    Siafund,
    /// File-storage contract
    FileContract,
}

impl ElementKind {
    /// Stable string tag used in storage keys
    pub fn as_str(self) -> &'static str {
        match self {
            ElementKind::Siacoin => "siacoin",
            ElementKind::Siafund => "siafund",
            ElementKind::FileContract => "contract",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unspent type-S output
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SiacoinElement {
    /// Element ID
    pub id: ElementID,
    /// Owning address
    pub address: Address,
    /// Coin value
    pub value: Currency,
    /// Height before which the element cannot be spent
    pub maturity_height: u64,
}

/// An unspent type-F output
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SiafundElement {
    /// Element ID
    pub id: ElementID,
    /// Owning address
    pub address: Address,
    /// Fund value
    pub value: FundAmount,
}

/// An active file-storage contract
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileContractElement {
    /// Element ID
    pub id: ElementID,
    /// Size of the stored file in bytes
    pub filesize: u64,
    /// Merkle root of the stored file
    pub file_merkle_root: Hash256,
    /// First height of the proof window
    pub window_start: u64,
    /// Last height of the proof window
    pub window_end: u64,
    /// Value paid to the host if the proof is missed
    pub missed_host_value: Currency,
    /// Collateral locked by the host
    pub total_collateral: Currency,
}

impl FileContractElement {
    /// The contract's payout: missed host value plus total collateral.
    ///
    /// Returns `None` on overflow.
    pub fn payout(&self) -> Option<Currency> {
        self.missed_host_value.checked_add(self.total_collateral)
    }
}

/// A transaction input spending a type-S output.
///
/// Carries the full parent element so the consumed address and value are
/// available without a lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiacoinInput {
    /// The element being spent
    pub parent: SiacoinElement,
}

/// A transaction output creating type-S value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiacoinOutput {
    /// Recipient
    pub address: Address,
    /// Coin value
    pub value: Currency,
}

/// A transaction input spending a type-F output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiafundInput {
    /// The element being spent
    pub parent: SiafundElement,
}

/// A transaction output creating type-F value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SiafundOutput {
    /// Recipient
    pub address: Address,
    /// Fund value
    pub value: FundAmount,
}

/// A confirmed transaction as the index sees it
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Transaction {
    /// Type-S inputs
    pub siacoin_inputs: Vec<SiacoinInput>,
    /// Type-S outputs
    pub siacoin_outputs: Vec<SiacoinOutput>,
    /// Type-F inputs
    pub siafund_inputs: Vec<SiafundInput>,
    /// Type-F outputs
    pub siafund_outputs: Vec<SiafundOutput>,
    /// Opaque payload carried alongside the value transfer
    pub arbitrary_data: Vec<u8>,
}

impl Transaction {
    /// Compute the transaction's ID: a SHA3-256 digest over its contents.
    pub fn id(&self) -> TransactionID {
        let mut hasher = Sha3_256::new();
        hasher.update(b"txn/id");
        hasher.update((self.siacoin_inputs.len() as u64).to_le_bytes());
        for input in &self.siacoin_inputs {
            hasher.update(input.parent.id.source.as_bytes());
            hasher.update(input.parent.id.index.to_le_bytes());
        }
        hasher.update((self.siacoin_outputs.len() as u64).to_le_bytes());
        for output in &self.siacoin_outputs {
            hasher.update(output.address.0.as_bytes());
            hasher.update(output.value.0.to_le_bytes());
        }
        hasher.update((self.siafund_inputs.len() as u64).to_le_bytes());
        for input in &self.siafund_inputs {
            hasher.update(input.parent.id.source.as_bytes());
            hasher.update(input.parent.id.index.to_le_bytes());
        }
        hasher.update((self.siafund_outputs.len() as u64).to_le_bytes());
        for output in &self.siafund_outputs {
            hasher.update(output.address.0.as_bytes());
            hasher.update(output.value.to_le_bytes());
        }
        hasher.update((self.arbitrary_data.len() as u64).to_le_bytes());
        hasher.update(&self.arbitrary_data);
        TransactionID(Hash256(hasher.finalize().into()))
    }

    /// The distinct addresses this transaction touches: every type-S or
    /// type-F input parent and every output recipient.
    pub fn addresses(&self) -> BTreeSet<Address> {
        let mut set = BTreeSet::new();
        for input in &self.siacoin_inputs {
            set.insert(input.parent.address);
        }
        for output in &self.siacoin_outputs {
            set.insert(output.address);
        }
        for input in &self.siafund_inputs {
            set.insert(input.parent.address);
        }
        for output in &self.siafund_outputs {
            set.insert(output.address);
        }
        set
    }
}

/// Block header
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BlockHeader {
    /// ID of the parent block
    pub parent_id: BlockID,
    /// Proof-of-work nonce
    pub nonce: u64,
    /// Unix timestamp
    pub timestamp: u64,
    /// Recipient of the block reward
    pub miner_address: Address,
}

/// A confirmed block: header plus transactions
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Block {
    /// Block header
    pub header: BlockHeader,
    /// Transactions confirmed by the block
    pub transactions: Vec<Transaction>,
}

impl Block {
    /// Compute the block's ID: a SHA3-256 digest over the header.
    pub fn id(&self) -> BlockID {
        let mut hasher = Sha3_256::new();
        hasher.update(b"block/id");
        hasher.update(self.header.parent_id.0.as_bytes());
        hasher.update(self.header.nonce.to_le_bytes());
        hasher.update(self.header.timestamp.to_le_bytes());
        hasher.update(self.header.miner_address.0.as_bytes());
        BlockID(Hash256(hasher.finalize().into()))
    }
}

/// Consensus state after applying a block.
///
/// The index treats this as opaque apart from `index`, which names the tip
/// the context corresponds to. The remaining fields are carried through into
/// the per-block statistics so callers can read them back later.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationContext {
    /// Tip the context corresponds to
    pub index: ChainIndex,
    /// Cumulative work on the chain
    pub total_work: u128,
    /// Current difficulty target
    pub difficulty: u128,
    /// Timestamp of the genesis block
    pub genesis_timestamp: u64,
    /// Accumulated fund claim pool
    pub fund_pool: Currency,
    /// Address controlling the subsidy
    pub foundation_address: Address,
}

/// The set of mutations introduced by confirming one block.
///
/// Every element referenced carries its full payload, so the index never has
/// to ask the chain manager for reversal data.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ApplyUpdate {
    /// The newly confirmed block
    pub block: Block,
    /// Post-block validation context (includes the new tip index)
    pub context: ValidationContext,
    /// Type-S elements consumed by the block
    pub spent_siacoins: Vec<SiacoinElement>,
    /// Type-F elements consumed by the block
    pub spent_siafunds: Vec<SiafundElement>,
    /// Type-S elements created by the block
    pub new_siacoins: Vec<SiacoinElement>,
    /// Type-F elements created by the block
    pub new_siafunds: Vec<SiafundElement>,
    /// File contracts created by the block.
    ///
    /// A contract both created and revised in the same block appears here
    /// with its final in-block payload, and in `revised_file_contracts` too.
    pub new_file_contracts: Vec<FileContractElement>,
    /// File contracts revised by the block (post-revision payloads)
    pub revised_file_contracts: Vec<FileContractElement>,
    /// File contracts resolved by the block
    pub resolved_file_contracts: Vec<FileContractElement>,
}

/// A revision entry in a revert delta: the post-revision element plus a
/// snapshot of the pre-revision payload to restore.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileContractRevision {
    /// Pre-revision payload
    pub parent: FileContractElement,
    /// Post-revision payload (the element as currently stored)
    pub revision: FileContractElement,
}

/// The set of mutations undoing one block.
///
/// Field names describe the block being reverted: `new_siacoins` are the
/// elements that block created (to be removed now), `spent_siacoins` the
/// elements it consumed (to be restored now).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RevertUpdate {
    /// The block being reverted
    pub block: Block,
    /// Post-revert validation context (the parent tip)
    pub context: ValidationContext,
    /// Type-S elements the block consumed, restored by the revert
    pub spent_siacoins: Vec<SiacoinElement>,
    /// Type-F elements the block consumed, restored by the revert
    pub spent_siafunds: Vec<SiafundElement>,
    /// Type-S elements the block created, removed by the revert
    pub new_siacoins: Vec<SiacoinElement>,
    /// Type-F elements the block created, removed by the revert
    pub new_siafunds: Vec<SiafundElement>,
    /// File contracts the block created, removed by the revert
    pub new_file_contracts: Vec<FileContractElement>,
    /// File contracts the block revised, rolled back to their parents
    pub revised_file_contracts: Vec<FileContractRevision>,
    /// File contracts the block resolved, restored by the revert
    pub resolved_file_contracts: Vec<FileContractElement>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(n: u8) -> Address {
        Address(Hash256([n; 32]))
    }

    #[test]
    fn test_transaction_id_deterministic() {
        let txn = Transaction {
            siacoin_outputs: vec![SiacoinOutput {
                address: addr(1),
                value: Currency::new(100),
            }],
            ..Transaction::default()
        };
        assert_eq!(txn.id(), txn.clone().id());
        assert_ne!(txn.id(), Transaction::default().id());
    }

    #[test]
    fn test_transaction_addresses_distinct() {
        let parent = SiacoinElement {
            id: ElementID::new(Hash256([9; 32]), 0),
            address: addr(1),
            value: Currency::new(100),
            maturity_height: 0,
        };
        // spends from addr(1) and pays addr(1) change plus addr(2)
        let txn = Transaction {
            siacoin_inputs: vec![SiacoinInput { parent }],
            siacoin_outputs: vec![
                SiacoinOutput {
                    address: addr(1),
                    value: Currency::new(30),
                },
                SiacoinOutput {
                    address: addr(2),
                    value: Currency::new(70),
                },
            ],
            ..Transaction::default()
        };
        let set = txn.addresses();
        assert_eq!(set.len(), 2);
        assert!(set.contains(&addr(1)));
        assert!(set.contains(&addr(2)));
    }

    #[test]
    fn test_currency_checked_arithmetic() {
        let a = Currency::new(100);
        let b = Currency::new(70);
        assert_eq!(a.checked_sub(b), Some(Currency::new(30)));
        assert_eq!(b.checked_sub(a), None);
        assert_eq!(Currency::new(u128::MAX).checked_add(Currency::new(1)), None);
        assert!(Currency::ZERO.is_zero());
        assert!(!a.is_zero());
    }

    #[test]
    fn test_contract_payout() {
        let fce = FileContractElement {
            missed_host_value: Currency::new(200),
            total_collateral: Currency::new(300),
            ..FileContractElement::default()
        };
        assert_eq!(fce.payout(), Some(Currency::new(500)));
    }
}
