//! Minimal contract storage operations.
//!
//! A `contract/store` transaction carries the target contract followed by a
//! list of slot operations. Operations apply in order; the first failing one
//! stops the list, and the writes of the operations before it are kept.

use super::read_slot;
use alloy_primitives::{Address, Bytes, U256};
use occ_executor::{
    ApplicationError, HandlerError, MessageKind, StateKey, StateValue, Transaction,
    TransactionHandler, TxContext, TxResponse,
};

pub const CONTRACT_STORE: &str = "contract/store";

pub const CONTRACT_CODESPACE: &str = "contract";
pub const CODE_MALFORMED: u32 = 1;
pub const CODE_OVERFLOW: u32 = 2;

/// Gas charged per applied operation.
pub const OP_GAS: u64 = 5_000;

const TAG_SET: u8 = 0;
const TAG_ADD: u8 = 1;
const TAG_CLEAR: u8 = 2;

/// One storage operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOp {
    Set { slot: U256, value: U256 },
    Add { slot: U256, delta: U256 },
    Clear { slot: U256 },
}

impl StoreOp {
    fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            StoreOp::Set { slot, value } => {
                out.push(TAG_SET);
                out.extend_from_slice(&slot.to_be_bytes::<32>());
                out.extend_from_slice(&value.to_be_bytes::<32>());
            }
            StoreOp::Add { slot, delta } => {
                out.push(TAG_ADD);
                out.extend_from_slice(&slot.to_be_bytes::<32>());
                out.extend_from_slice(&delta.to_be_bytes::<32>());
            }
            StoreOp::Clear { slot } => {
                out.push(TAG_CLEAR);
                out.extend_from_slice(&slot.to_be_bytes::<32>());
            }
        }
    }
}

/// Builds a `contract/store` transaction.
pub fn store_tx(sender: Address, contract: Address, ops: &[StoreOp]) -> Transaction {
    let mut payload = contract.to_vec();
    for op in ops {
        op.encode_into(&mut payload);
    }
    Transaction::new(MessageKind::new(CONTRACT_STORE), sender, Bytes::from(payload))
}

/// Decodes a payload into the contract and its operations.
pub fn decode(payload: &[u8]) -> Option<(Address, Vec<StoreOp>)> {
    if payload.len() < 20 {
        return None;
    }
    let (contract, mut rest) = payload.split_at(20);
    let mut ops = Vec::new();
    while let Some((&tag, tail)) = rest.split_first() {
        let word = |bytes: &[u8], at: usize| bytes.get(at..at + 32).map(U256::from_be_slice);
        let (op, used) = match tag {
            TAG_SET => (
                StoreOp::Set {
                    slot: word(tail, 0)?,
                    value: word(tail, 32)?,
                },
                64,
            ),
            TAG_ADD => (
                StoreOp::Add {
                    slot: word(tail, 0)?,
                    delta: word(tail, 32)?,
                },
                64,
            ),
            TAG_CLEAR => (StoreOp::Clear { slot: word(tail, 0)? }, 32),
            _ => return None,
        };
        ops.push(op);
        rest = &tail[used..];
    }
    Some((Address::from_slice(contract), ops))
}

/// Executes `contract/store`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContractStoreHandler;

impl TransactionHandler for ContractStoreHandler {
    fn execute(&self, tx: &Transaction, ctx: &mut dyn TxContext) -> Result<TxResponse, HandlerError> {
        let (contract, ops) = decode(&tx.payload).ok_or_else(|| {
            ApplicationError::new(CONTRACT_CODESPACE, CODE_MALFORMED, "malformed store payload")
        })?;

        for (idx, op) in ops.iter().enumerate() {
            match *op {
                StoreOp::Set { slot, value } => {
                    ctx.set(StateKey::Storage(contract, slot), StateValue::Storage(value));
                }
                StoreOp::Add { slot, delta } => {
                    let current = read_slot(ctx, contract, slot)?;
                    let sum = current.checked_add(delta).ok_or_else(|| {
                        ApplicationError::new(
                            CONTRACT_CODESPACE,
                            CODE_OVERFLOW,
                            format!("op {idx}: slot {slot} overflows"),
                        )
                    })?;
                    ctx.set(StateKey::Storage(contract, slot), StateValue::Storage(sum));
                }
                StoreOp::Clear { slot } => ctx.delete(StateKey::Storage(contract, slot)),
            }
        }

        Ok(TxResponse {
            gas_used: OP_GAS * ops.len() as u64,
            data: Bytes::new(),
            log: format!("applied {} ops to {contract}", ops.len()),
        })
    }
}
