//! Application node built on the optimistic parallel block executor.
//!
//! This crate wires concrete transaction handlers (signed bank transfers,
//! counters, contract storage) into [`occ_executor`] and provides the
//! tooling to generate, execute and compare blocks of them.
//!
//! # Architecture
//!
//! - **Workload**: pre-generated accounts and signed transactions
//! - **Handlers**: the business logic, registered by message kind
//! - **AccountStore**: the authoritative state a block commits into
//! - **Executor**: a strategy for executing a block (sequential or OCC)
//!
//! # Quick Start
//!
//! ```
//! use occ_node::{Executor, OccExecutor, TransferConfig, Workload, WorkloadConfig};
//!
//! let config = WorkloadConfig {
//!     num_accounts: 100,
//!     num_transactions: 50,
//!     ..Default::default()
//! };
//!
//! // Generate workload (signs all transactions upfront)
//! let workload = Workload::generate(config).unwrap();
//! let store = workload.create_store();
//!
//! let executor = OccExecutor::new(4, TransferConfig::default()).unwrap();
//! let (_store, result) = executor.execute(store, &workload.transactions).unwrap();
//!
//! println!("Successful: {}", result.successful);
//! ```

pub mod error;
pub mod executor;
pub mod handlers;
pub mod store;

pub use error::NodeError;
pub use executor::{ExecutionResult, Executor, OccExecutor, SequentialExecutor};
pub use handlers::{registry, TransferConfig};
pub use store::AccountStore;

use alloy_primitives::{keccak256, Address, Bytes, Signature, B256, U256};
use k256::ecdsa::{SigningKey, VerifyingKey};
use occ_executor::{MessageKind, Transaction};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::collections::HashMap;

// ============================================================================
// Account & Key Management
// ============================================================================

/// An account with its signing key for transaction signing.
#[derive(Clone)]
pub struct Account {
    /// The secp256k1 signing key.
    pub signing_key: SigningKey,
    /// The address derived from the public key.
    pub address: Address,
}

impl Account {
    /// Creates a new account from a signing key.
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let verifying_key = VerifyingKey::from(&signing_key);
        let address = public_key_to_address(&verifying_key);
        Self {
            signing_key,
            address,
        }
    }

    /// Generates a deterministic account from a seed.
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        Self::from_signing_key(SigningKey::random(&mut rng))
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("address", &self.address)
            .finish()
    }
}

/// Derives an address from a secp256k1 public key.
fn public_key_to_address(verifying_key: &VerifyingKey) -> Address {
    let public_key_bytes = verifying_key.to_encoded_point(false);
    // Skip the 0x04 prefix byte, hash the rest.
    let hash = keccak256(&public_key_bytes.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

// ============================================================================
// Signed Transfer
// ============================================================================

/// Message kind of signed transfers.
pub const BANK_SEND: &str = "bank/send";

/// Length of an encoded transfer payload: to, value, nonce, r, s, parity.
const TRANSFER_PAYLOAD_LEN: usize = 20 + 32 + 8 + 32 + 32 + 1;

/// A signed value transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransfer {
    /// The sender's address.
    pub from: Address,
    /// The recipient's address.
    pub to: Address,
    /// The amount to transfer.
    pub value: U256,
    /// The sender's nonce.
    pub nonce: u64,
    /// The ECDSA signature over [`SignedTransfer::signing_hash`].
    pub signature: Signature,
}

impl SignedTransfer {
    /// Creates and signs a transfer.
    pub fn new(
        account: &Account,
        to: Address,
        value: U256,
        nonce: u64,
        chain_id: u64,
    ) -> Result<Self, NodeError> {
        let hash = Self::signing_hash(account.address, to, value, nonce, chain_id);
        let signature = Self::sign(&account.signing_key, hash)?;

        Ok(Self {
            from: account.address,
            to,
            value,
            nonce,
            signature,
        })
    }

    /// Hash of (from, to, value, nonce, chain_id) that the sender signs.
    pub fn signing_hash(from: Address, to: Address, value: U256, nonce: u64, chain_id: u64) -> B256 {
        let mut data = Vec::with_capacity(20 + 20 + 32 + 8 + 8);
        data.extend_from_slice(from.as_slice());
        data.extend_from_slice(to.as_slice());
        data.extend_from_slice(&value.to_be_bytes::<32>());
        data.extend_from_slice(&nonce.to_be_bytes());
        data.extend_from_slice(&chain_id.to_be_bytes());
        keccak256(&data)
    }

    fn sign(signing_key: &SigningKey, hash: B256) -> Result<Signature, NodeError> {
        let (sig, recovery_id) = signing_key.sign_prehash_recoverable(hash.as_slice())?;
        Ok(Signature::from_signature_and_parity(sig, recovery_id.is_y_odd()))
    }

    /// Recovers the signer for the given chain, or `None` if the signature
    /// does not recover.
    pub fn recover_signer(&self, chain_id: u64) -> Option<Address> {
        let hash = Self::signing_hash(self.from, self.to, self.value, self.nonce, chain_id);
        self.signature.recover_address_from_prehash(&hash).ok()
    }

    /// Returns true if the signature was made by `from` for this chain.
    pub fn verify(&self, chain_id: u64) -> bool {
        self.recover_signer(chain_id) == Some(self.from)
    }

    /// Encodes the transfer as an engine transaction.
    pub fn to_transaction(&self) -> Transaction {
        let mut payload = Vec::with_capacity(TRANSFER_PAYLOAD_LEN);
        payload.extend_from_slice(self.to.as_slice());
        payload.extend_from_slice(&self.value.to_be_bytes::<32>());
        payload.extend_from_slice(&self.nonce.to_be_bytes());
        payload.extend_from_slice(&self.signature.r().to_be_bytes::<32>());
        payload.extend_from_slice(&self.signature.s().to_be_bytes::<32>());
        payload.push(self.signature.v() as u8);
        Transaction::new(MessageKind::new(BANK_SEND), self.from, Bytes::from(payload))
    }

    /// Decodes a transfer from an engine transaction. Returns `None` if the
    /// payload is malformed.
    pub fn from_transaction(tx: &Transaction) -> Option<Self> {
        let payload = tx.payload.as_ref();
        if payload.len() != TRANSFER_PAYLOAD_LEN {
            return None;
        }
        let (to, rest) = payload.split_at(20);
        let (value, rest) = rest.split_at(32);
        let (nonce, rest) = rest.split_at(8);
        let (r, rest) = rest.split_at(32);
        let (s, parity) = rest.split_at(32);
        let parity = match parity[0] {
            0 => false,
            1 => true,
            _ => return None,
        };

        Some(Self {
            from: tx.sender,
            to: Address::from_slice(to),
            value: U256::from_be_slice(value),
            nonce: u64::from_be_bytes(nonce.try_into().ok()?),
            signature: Signature::new(U256::from_be_slice(r), U256::from_be_slice(s), parity),
        })
    }
}

// ============================================================================
// Workload Configuration & Generation
// ============================================================================

/// Configuration for workload generation.
#[derive(Debug, Clone)]
pub struct WorkloadConfig {
    /// Total number of accounts in the system.
    pub num_accounts: usize,
    /// Number of transactions to generate.
    pub num_transactions: usize,
    /// Conflict factor: 0.0 = no conflicts, 1.0 = all transactions touch same accounts.
    pub conflict_factor: f64,
    /// Random seed for reproducibility.
    pub seed: u64,
    /// Chain ID for transaction signing.
    pub chain_id: u64,
    /// Balance every account starts with.
    pub initial_balance: U256,
    /// Amount moved by each transfer.
    pub amount: U256,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            num_accounts: 1000,
            num_transactions: 100,
            conflict_factor: 0.0,
            seed: 42,
            chain_id: 1,
            initial_balance: U256::from(1_000_000_000_000_000_000_000u128), // 1000 ETH
            amount: U256::from(1_000_000_000_000_000u64),                  // 0.001 ETH
        }
    }
}

/// A complete workload with pre-generated accounts and signed transactions.
#[derive(Debug, Clone)]
pub struct Workload {
    /// The accounts (with signing keys) participating in this workload.
    pub accounts: Vec<Account>,
    /// The signed transfers, in block order.
    pub transfers: Vec<SignedTransfer>,
    /// The encoded block.
    pub transactions: Vec<Transaction>,
    /// The configuration used to generate this workload.
    pub config: WorkloadConfig,
}

impl Workload {
    /// Generates a new workload from the given configuration.
    /// All transactions are pre-signed during generation.
    pub fn generate(config: WorkloadConfig) -> Result<Self, NodeError> {
        if config.num_accounts < 2 {
            return Err(NodeError::InvalidConfig(
                "workload needs at least two accounts".to_string(),
            ));
        }
        let mut rng = StdRng::seed_from_u64(config.seed);

        // Generate accounts with deterministic keys.
        let accounts: Vec<Account> = (0..config.num_accounts)
            .map(|i| Account::from_seed(config.seed.wrapping_add(i as u64)))
            .collect();

        // Track nonces per account for proper transaction sequencing.
        let mut nonces: HashMap<usize, u64> = HashMap::new();

        // Calculate "hot" account range for conflict simulation.
        let hot_account_count = if config.conflict_factor > 0.0 {
            (2.0 + (1.0 - config.conflict_factor) * (config.num_accounts as f64 - 2.0))
                .max(2.0) as usize
        } else {
            config.num_accounts
        };

        let mut transfers = Vec::with_capacity(config.num_transactions);
        for _ in 0..config.num_transactions {
            let pool = if rng.gen::<f64>() < config.conflict_factor {
                hot_account_count
            } else {
                config.num_accounts
            };
            let from = rng.gen_range(0..pool);
            let mut to = rng.gen_range(0..pool);
            while to == from {
                to = rng.gen_range(0..pool);
            }

            let nonce = nonces.entry(from).or_insert(0);
            transfers.push(SignedTransfer::new(
                &accounts[from],
                accounts[to].address,
                config.amount,
                *nonce,
                config.chain_id,
            )?);
            *nonce += 1;
        }

        let transactions = transfers.iter().map(SignedTransfer::to_transaction).collect();
        Ok(Self {
            accounts,
            transfers,
            transactions,
            config,
        })
    }

    /// Creates a store pre-funded with all accounts in this workload.
    pub fn create_store(&self) -> AccountStore {
        let mut store = AccountStore::new();
        for account in &self.accounts {
            store.fund(account.address, self.config.initial_balance);
        }
        store
    }
}

// ============================================================================
// Tests
// ============================================================================
