//! Named counters in the module key space.

use alloy_primitives::{Address, Bytes};
use occ_executor::{
    ApplicationError, HandlerError, MessageKind, StateKey, StateValue, Transaction,
    TransactionHandler, TxContext, TxResponse,
};

pub const COUNTER_INCR: &str = "counter/incr";

const COUNTER_CODESPACE: &str = "counter";
const CODE_CORRUPT: u32 = 1;
const CODE_OVERFLOW: u32 = 2;

/// Key of the counter called `name`.
pub fn counter_key(name: &[u8]) -> StateKey {
    let mut key = b"counter/".to_vec();
    key.extend_from_slice(name);
    StateKey::Kv(Bytes::from(key))
}

/// Builds a transaction incrementing the counter called `name`.
pub fn incr_tx(sender: Address, name: &str) -> Transaction {
    Transaction::new(
        MessageKind::new(COUNTER_INCR),
        sender,
        Bytes::copy_from_slice(name.as_bytes()),
    )
}

/// Decodes a stored counter value.
pub fn decode(value: &StateValue) -> Option<u64> {
    let bytes = <[u8; 8]>::try_from(&value.as_bytes()?[..]).ok()?;
    Some(u64::from_be_bytes(bytes))
}

/// Executes `counter/incr`: read-modify-write of one counter.
#[derive(Debug, Clone, Copy, Default)]
pub struct CounterHandler;

impl TransactionHandler for CounterHandler {
    fn execute(&self, tx: &Transaction, ctx: &mut dyn TxContext) -> Result<TxResponse, HandlerError> {
        let key = counter_key(&tx.payload);
        let current = match ctx.get(&key)? {
            None => 0,
            Some(value) => decode(&value).ok_or_else(|| {
                ApplicationError::new(COUNTER_CODESPACE, CODE_CORRUPT, format!("corrupt counter at {key}"))
            })?,
        };
        let next = current.checked_add(1).ok_or_else(|| {
            ApplicationError::new(COUNTER_CODESPACE, CODE_OVERFLOW, "counter overflow")
        })?;

        let encoded = Bytes::copy_from_slice(&next.to_be_bytes());
        ctx.set(key, StateValue::Bytes(encoded.clone()));
        Ok(TxResponse {
            gas_used: 1_000,
            data: encoded,
            log: format!("counter = {next}"),
        })
    }
}
