//! Shared handlers and helpers for the engine integration tests.

#![allow(dead_code)]

use alloy_primitives::{Address, Bytes, U256};
use occ_executor::{
    ApplicationError, BlockOutput, HandlerError, HandlerRegistry, InMemoryState, MessageKind,
    StateKey, StateValue, Transaction, TxContext, TxResponse,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

pub const TRANSFER: &str = "test/transfer";
pub const INCR: &str = "test/incr";
pub const CLEAR: &str = "test/clear";
pub const SUM: &str = "test/sum";
pub const PANIC: &str = "test/panic";
pub const PLAIN_TRANSFER: &str = "test/plain_transfer";
pub const SLOW_SET: &str = "test/slow_set";
pub const GUARDED: &str = "test/guarded";

pub const FEE: u64 = 1;

pub fn addr(n: u8) -> Address {
    Address::repeat_byte(n)
}

pub fn fee_collector() -> Address {
    Address::repeat_byte(0xfe)
}

pub fn balance_key(a: Address) -> StateKey {
    StateKey::Balance(a)
}

pub fn counter_key(n: u8) -> StateKey {
    StateKey::Kv(Bytes::from(vec![b'c', n]))
}

fn read_balance(ctx: &mut dyn TxContext, a: Address) -> Result<U256, HandlerError> {
    Ok(ctx
        .get(&balance_key(a))?
        .and_then(|v| v.as_balance())
        .unwrap_or_default())
}

/// Transfer payload: recipient (20 bytes) followed by a big-endian u64 amount.
pub fn transfer(from: Address, to: Address, amount: u64) -> Transaction {
    let mut payload = to.to_vec();
    payload.extend_from_slice(&amount.to_be_bytes());
    Transaction::new(MessageKind::new(TRANSFER), from, Bytes::from(payload))
}

/// Moves funds; a flat fee is charged to the collector before the balance
/// check and kept even when the transfer fails.
fn transfer_handler(tx: &Transaction, ctx: &mut dyn TxContext) -> Result<TxResponse, HandlerError> {
    if tx.payload.len() != 28 {
        return Err(ApplicationError::new("bank", 1, "malformed transfer").into());
    }
    let to = Address::from_slice(&tx.payload[..20]);
    let mut amount_bytes = [0u8; 8];
    amount_bytes.copy_from_slice(&tx.payload[20..]);
    let amount = U256::from(u64::from_be_bytes(amount_bytes));
    let fee = U256::from(FEE);

    let mut from_balance = read_balance(ctx, tx.sender)?;
    if from_balance >= fee {
        from_balance -= fee;
        ctx.set(balance_key(tx.sender), StateValue::Balance(from_balance));
        let collected = read_balance(ctx, fee_collector())?;
        ctx.set(balance_key(fee_collector()), StateValue::Balance(collected + fee));
    }

    if from_balance < amount {
        return Err(ApplicationError::new(
            "bank",
            5,
            format!("insufficient funds: {from_balance} < {amount}"),
        )
        .into());
    }

    let to_balance = read_balance(ctx, to)?;
    ctx.set(balance_key(tx.sender), StateValue::Balance(from_balance - amount));
    ctx.set(balance_key(to), StateValue::Balance(to_balance + amount));
    Ok(TxResponse {
        gas_used: 21_000,
        data: Bytes::new(),
        log: format!("transferred {amount}"),
    })
}

/// Transfer without a fee; fails with `insufficient funds` and no writes.
pub fn plain_transfer(from: Address, to: Address, amount: u64) -> Transaction {
    let mut tx = transfer(from, to, amount);
    tx.kind = MessageKind::new(PLAIN_TRANSFER);
    tx
}

fn plain_transfer_handler(tx: &Transaction, ctx: &mut dyn TxContext) -> Result<TxResponse, HandlerError> {
    let to = Address::from_slice(&tx.payload[..20]);
    let mut amount_bytes = [0u8; 8];
    amount_bytes.copy_from_slice(&tx.payload[20..28]);
    let amount = U256::from(u64::from_be_bytes(amount_bytes));

    let from_balance = read_balance(ctx, tx.sender)?;
    if from_balance < amount {
        return Err(ApplicationError::new("bank", 5, "insufficient funds").into());
    }
    let to_balance = read_balance(ctx, to)?;
    ctx.set(balance_key(tx.sender), StateValue::Balance(from_balance - amount));
    ctx.set(balance_key(to), StateValue::Balance(to_balance + amount));
    Ok(TxResponse::default())
}

/// Sleeps `millis`, then sets the counter to `value`.
pub fn slow_set(counter: u8, value: u8, millis: u8) -> Transaction {
    Transaction::new(
        MessageKind::new(SLOW_SET),
        Address::ZERO,
        Bytes::from(vec![counter, value, millis]),
    )
}

fn slow_set_handler(tx: &Transaction, ctx: &mut dyn TxContext) -> Result<TxResponse, HandlerError> {
    thread::sleep(Duration::from_millis(u64::from(tx.payload[2])));
    ctx.set(counter_key(tx.payload[0]), StateValue::Storage(U256::from(tx.payload[1])));
    Ok(TxResponse::default())
}

/// Reads `flag`, and only when it is absent reads `fallback` as well.
pub fn guarded(flag: u8, fallback: u8) -> Transaction {
    Transaction::new(MessageKind::new(GUARDED), Address::ZERO, Bytes::from(vec![flag, fallback]))
}

fn guarded_handler(tx: &Transaction, ctx: &mut dyn TxContext) -> Result<TxResponse, HandlerError> {
    let value = match ctx.get(&counter_key(tx.payload[0]))? {
        Some(flag) => flag,
        None => ctx
            .get(&counter_key(tx.payload[1]))?
            .unwrap_or(StateValue::Storage(U256::ZERO)),
    };
    Ok(TxResponse {
        gas_used: 1,
        data: Bytes::new(),
        log: format!("{value:?}"),
    })
}

pub fn incr(counter: u8) -> Transaction {
    Transaction::new(MessageKind::new(INCR), Address::ZERO, Bytes::from(vec![counter]))
}

fn incr_handler(tx: &Transaction, ctx: &mut dyn TxContext) -> Result<TxResponse, HandlerError> {
    let key = counter_key(tx.payload[0]);
    let current = ctx
        .get(&key)?
        .and_then(|v| v.as_storage())
        .unwrap_or_default();
    let next = current + U256::from(1);
    ctx.set(key, StateValue::Storage(next));
    Ok(TxResponse {
        gas_used: 1,
        data: Bytes::from(next.to_be_bytes::<32>().to_vec()),
        log: String::new(),
    })
}

pub fn clear(counter: u8) -> Transaction {
    Transaction::new(MessageKind::new(CLEAR), Address::ZERO, Bytes::from(vec![counter]))
}

fn clear_handler(tx: &Transaction, ctx: &mut dyn TxContext) -> Result<TxResponse, HandlerError> {
    ctx.delete(counter_key(tx.payload[0]));
    Ok(TxResponse::default())
}

/// Reads every listed counter and fails if their sum is odd.
pub fn sum(counters: &[u8]) -> Transaction {
    Transaction::new(MessageKind::new(SUM), Address::ZERO, Bytes::from(counters.to_vec()))
}

fn sum_handler(tx: &Transaction, ctx: &mut dyn TxContext) -> Result<TxResponse, HandlerError> {
    let mut total = U256::ZERO;
    for &counter in tx.payload.iter() {
        total += ctx
            .get(&counter_key(counter))?
            .and_then(|v| v.as_storage())
            .unwrap_or_default();
    }
    if total.bit(0) {
        return Err(ApplicationError::new("sum", 3, format!("odd total {total}")).into());
    }
    Ok(TxResponse {
        gas_used: tx.payload.len() as u64,
        data: Bytes::new(),
        log: format!("total {total}"),
    })
}

pub fn panicking(counter: u8) -> Transaction {
    Transaction::new(MessageKind::new(PANIC), Address::ZERO, Bytes::from(vec![counter]))
}

/// Writes its counter, then panics.
fn panic_handler(tx: &Transaction, ctx: &mut dyn TxContext) -> Result<TxResponse, HandlerError> {
    ctx.set(counter_key(tx.payload[0]), StateValue::Storage(U256::from(42)));
    panic!("handler for counter {} gave up", tx.payload[0]);
}

pub fn registry() -> Arc<HandlerRegistry> {
    Arc::new(
        HandlerRegistry::new()
            .with(TRANSFER, transfer_handler)
            .with(INCR, incr_handler)
            .with(CLEAR, clear_handler)
            .with(SUM, sum_handler)
            .with(PANIC, panic_handler)
            .with(PLAIN_TRANSFER, plain_transfer_handler)
            .with(SLOW_SET, slow_set_handler)
            .with(GUARDED, guarded_handler),
    )
}

pub fn funded_state(accounts: &[(Address, u64)]) -> InMemoryState {
    accounts
        .iter()
        .map(|&(a, v)| (balance_key(a), StateValue::Balance(U256::from(v))))
        .collect()
}

pub fn balance_of(output: &BlockOutput, base: &InMemoryState, a: Address) -> U256 {
    let key = balance_key(a);
    let value = match output.write_set.get(&key) {
        Some(written) => written.clone(),
        None => occ_executor::StateView::get(base, &key).ok().flatten(),
    };
    value.and_then(|v| v.as_balance()).unwrap_or_default()
}

/// Random conflict-heavy block over a small set of accounts and counters.
pub fn random_block(seed: u64, len: usize, num_accounts: u8, num_counters: u8) -> Vec<Transaction> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..len)
        .map(|_| match rng.gen_range(0..10) {
            0..=4 => {
                let from = addr(rng.gen_range(1..=num_accounts));
                let to = addr(rng.gen_range(1..=num_accounts));
                transfer(from, to, rng.gen_range(0..60))
            }
            5..=7 => incr(rng.gen_range(0..num_counters)),
            8 => clear(rng.gen_range(0..num_counters)),
            _ => {
                let picks: Vec<u8> = (0..rng.gen_range(1..4))
                    .map(|_| rng.gen_range(0..num_counters))
                    .collect();
                sum(&picks)
            }
        })
        .collect()
}

pub fn random_state(num_accounts: u8) -> InMemoryState {
    let accounts: Vec<_> = (1..=num_accounts).map(|n| (addr(n), 100)).collect();
    funded_state(&accounts)
}

/// Compares everything observable about two block outputs.
pub fn assert_same_output(expected: &BlockOutput, actual: &BlockOutput, context: &str) {
    assert_eq!(
        expected.responses.len(),
        actual.responses.len(),
        "{context}: response count"
    );
    for (idx, (e, a)) in expected.responses.iter().zip(&actual.responses).enumerate() {
        assert_eq!(e, a, "{context}: response {idx}");
    }
    assert_eq!(expected.write_set, actual.write_set, "{context}: write set");
}
