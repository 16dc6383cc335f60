//! Signed value transfers.

use super::{
    read_balance, read_nonce, sdk_error, TransferConfig, CODE_INSUFFICIENT_FEE,
    CODE_INSUFFICIENT_FUNDS, CODE_INVALID_REQUEST, CODE_INVALID_SEQUENCE, CODE_UNAUTHORIZED,
};
use crate::SignedTransfer;
use alloy_primitives::{Bytes, U256};
use occ_executor::{
    HandlerError, StateKey, StateValue, Transaction, TransactionHandler, TxContext, TxResponse,
};

pub use crate::BANK_SEND;

/// Gas charged for a transfer.
pub const TRANSFER_GAS: u64 = 21_000;

/// Executes `bank/send`.
///
/// Order of effects: signature and nonce checks touch nothing; then the fee
/// is charged and the nonce bumped, both of which stick even if the sender
/// cannot cover the amount.
#[derive(Debug, Clone)]
pub struct BankSendHandler {
    config: TransferConfig,
}

impl BankSendHandler {
    pub fn new(config: TransferConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }
}

impl TransactionHandler for BankSendHandler {
    fn execute(&self, tx: &Transaction, ctx: &mut dyn TxContext) -> Result<TxResponse, HandlerError> {
        let transfer = SignedTransfer::from_transaction(tx)
            .ok_or_else(|| sdk_error(CODE_INVALID_REQUEST, "malformed transfer payload"))?;
        let sender = transfer.from;

        if self.config.verify_signatures && !transfer.verify(self.config.chain_id) {
            return Err(sdk_error(
                CODE_UNAUTHORIZED,
                format!("signature does not match sender {sender}"),
            ));
        }

        let nonce = read_nonce(ctx, sender)?;
        if nonce != transfer.nonce {
            return Err(sdk_error(
                CODE_INVALID_SEQUENCE,
                format!("account sequence mismatch, expected {nonce}, got {}", transfer.nonce),
            ));
        }

        let mut balance = read_balance(ctx, sender)?;
        let fee = if self.config.gasless.contains(&sender) {
            U256::ZERO
        } else {
            self.config.fee
        };
        if !fee.is_zero() {
            if balance < fee {
                return Err(sdk_error(
                    CODE_INSUFFICIENT_FEE,
                    format!("insufficient fee: {balance} < {fee}"),
                ));
            }
            balance -= fee;
            ctx.set(StateKey::Balance(sender), StateValue::Balance(balance));

            let collector = self.config.fee_collector;
            let collected = read_balance(ctx, collector)?;
            ctx.set(StateKey::Balance(collector), StateValue::Balance(collected + fee));
            if collector == sender {
                balance = collected + fee;
            }
        }
        ctx.set(StateKey::Nonce(sender), StateValue::Nonce(nonce + 1));

        if balance < transfer.value {
            return Err(sdk_error(
                CODE_INSUFFICIENT_FUNDS,
                format!("insufficient funds: {balance} < {}", transfer.value),
            ));
        }

        if transfer.to != sender {
            let to_balance = read_balance(ctx, transfer.to)?;
            let credited = to_balance
                .checked_add(transfer.value)
                .ok_or_else(|| sdk_error(CODE_INVALID_REQUEST, "recipient balance overflow"))?;
            ctx.set(StateKey::Balance(sender), StateValue::Balance(balance - transfer.value));
            ctx.set(StateKey::Balance(transfer.to), StateValue::Balance(credited));
        }

        Ok(TxResponse {
            gas_used: TRANSFER_GAS,
            data: Bytes::new(),
            log: format!("sent {} from {sender} to {}", transfer.value, transfer.to),
        })
    }
}
