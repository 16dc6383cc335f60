//! Transaction handlers registered with the engine.
//!
//! Each handler owns one message kind. Failures a user can cause are
//! reported as [`ApplicationError`]s with stable codes so that a failing
//! transaction reports the same thing no matter how the block was executed.

pub mod bank;
pub mod contract;
pub mod counter;

pub use bank::BankSendHandler;
pub use contract::{ContractStoreHandler, StoreOp};
pub use counter::CounterHandler;

use alloy_primitives::{Address, U256};
use occ_executor::{
    ApplicationError, HandlerError, HandlerRegistry, ReadError, StateKey, StateValue,
    StorageError, TxContext,
};
use std::collections::BTreeSet;

/// Codespace shared by the standard account errors.
pub const SDK_CODESPACE: &str = "sdk";

/// Signature does not belong to the sender.
pub const CODE_UNAUTHORIZED: u32 = 4;

/// Not enough balance to move the requested amount.
pub const CODE_INSUFFICIENT_FUNDS: u32 = 5;

/// Not enough balance to pay the fee.
pub const CODE_INSUFFICIENT_FEE: u32 = 13;

/// The payload could not be decoded.
pub const CODE_INVALID_REQUEST: u32 = 18;

/// Nonce does not match the account's next nonce.
pub const CODE_INVALID_SEQUENCE: u32 = 32;

/// Configuration of the bank module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferConfig {
    /// Chain ID transfers must be signed for.
    pub chain_id: u64,
    /// Flat fee charged per transfer.
    pub fee: U256,
    /// Account that receives fees.
    pub fee_collector: Address,
    /// Senders exempt from the fee.
    pub gasless: BTreeSet<Address>,
    /// Whether to verify signatures during execution.
    pub verify_signatures: bool,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            fee: U256::ZERO,
            fee_collector: Address::repeat_byte(0xfe),
            gasless: BTreeSet::new(),
            verify_signatures: true,
        }
    }
}

/// Builds the registry with every handler this node knows.
pub fn registry(config: TransferConfig) -> HandlerRegistry {
    HandlerRegistry::new()
        .with(bank::BANK_SEND, BankSendHandler::new(config))
        .with(counter::COUNTER_INCR, CounterHandler)
        .with(contract::CONTRACT_STORE, ContractStoreHandler)
}

pub(crate) fn sdk_error(code: u32, log: impl Into<String>) -> HandlerError {
    ApplicationError::new(SDK_CODESPACE, code, log).into()
}

fn type_mismatch(key: &StateKey, value: &StateValue) -> HandlerError {
    HandlerError::Read(ReadError::Storage(StorageError::TypeMismatch(format!(
        "{key} holds {value:?}"
    ))))
}

pub(crate) fn read_balance(ctx: &mut dyn TxContext, address: Address) -> Result<U256, HandlerError> {
    let key = StateKey::Balance(address);
    match ctx.get(&key)? {
        None => Ok(U256::ZERO),
        Some(value) => value.as_balance().ok_or_else(|| type_mismatch(&key, &value)),
    }
}

pub(crate) fn read_nonce(ctx: &mut dyn TxContext, address: Address) -> Result<u64, HandlerError> {
    let key = StateKey::Nonce(address);
    match ctx.get(&key)? {
        None => Ok(0),
        Some(value) => value.as_nonce().ok_or_else(|| type_mismatch(&key, &value)),
    }
}

pub(crate) fn read_slot(
    ctx: &mut dyn TxContext,
    contract: Address,
    slot: U256,
) -> Result<U256, HandlerError> {
    let key = StateKey::Storage(contract, slot);
    match ctx.get(&key)? {
        None => Ok(U256::ZERO),
        Some(value) => value.as_storage().ok_or_else(|| type_mismatch(&key, &value)),
    }
}
