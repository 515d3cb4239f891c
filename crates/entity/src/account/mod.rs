//! Bank account entity: a small, complete example of an entity description.
//!
//! Accounts are opened by a creation command, move money with `deposit` and
//! `withdraw`, and can be closed once empty. Zero amounts are accepted and
//! append nothing.

mod commands;
mod events;
mod state;

pub use commands::{ChangeBalance, CloseAccount, OpenAccount};
pub use events::{
    ACCOUNT_CLOSED, ACCOUNT_OPENED, AccountClosedData, AccountOpenedData, AmountData,
    MONEY_DEPOSITED, MONEY_WITHDRAWN,
};
pub use state::{Account, AccountStatus};

use thiserror::Error;

use crate::description::EntityDescription;
use crate::schema::{FieldType, PayloadSchema};

/// Entity type name accounts are stored under.
pub const ACCOUNT: &str = "account";

/// Business rules an account command can violate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AccountError {
    /// The account already exists.
    #[error("Account already open")]
    AlreadyOpen,

    /// Owner is required.
    #[error("Owner is required")]
    OwnerRequired,

    /// Amounts must not be negative.
    #[error("Invalid amount: {amount} (must not be negative)")]
    InvalidAmount { amount: i64 },

    /// Not enough money for a withdrawal.
    #[error("Insufficient balance: {balance} available, {requested} requested")]
    InsufficientBalance { balance: i64, requested: i64 },

    /// The account is closed.
    #[error("Account is closed")]
    Closed,

    /// The deposit would take the balance past the largest representable amount.
    #[error("Deposit of {amount} would overflow balance {balance}")]
    BalanceOverflow { balance: i64, amount: i64 },

    /// Only empty accounts can be closed.
    #[error("Cannot close account with balance {balance}")]
    NonZeroBalance { balance: i64 },
}

/// Builds the account entity description.
pub fn description() -> EntityDescription<Account, AccountError> {
    EntityDescription::builder(ACCOUNT)
        .state_schema(
            PayloadSchema::object()
                .require("owner", FieldType::String)
                .require("balance", FieldType::Integer)
                .require("status", FieldType::String),
        )
        .event(ACCOUNT_OPENED, events::opened_schema())
        .event(MONEY_DEPOSITED, events::amount_schema())
        .event(MONEY_WITHDRAWN, events::amount_schema())
        .event(ACCOUNT_CLOSED, events::closed_schema())
        .initializer(ACCOUNT_OPENED, |data: AccountOpenedData| Account {
            owner: data.owner,
            balance: data.initial_deposit,
            status: AccountStatus::Open,
        })
        .reducer(MONEY_DEPOSITED, |account: Account, data: AmountData| Account {
            balance: account.balance.saturating_add(data.amount),
            ..account
        })
        .reducer(MONEY_WITHDRAWN, |account: Account, data: AmountData| Account {
            balance: account.balance.saturating_sub(data.amount),
            ..account
        })
        .reducer(ACCOUNT_CLOSED, |account: Account, _: AccountClosedData| Account {
            status: AccountStatus::Closed,
            ..account
        })
        .creation_command("open", commands::open_schema(), commands::open)
        .command("deposit", commands::change_balance_schema(), commands::deposit)
        .command("withdraw", commands::change_balance_schema(), commands::withdraw)
        .command("close", commands::close_schema(), commands::close)
        .build()
}
