//! Account command payloads and handlers.

use serde::{Deserialize, Serialize};

use crate::dispatcher::CommandEnv;
use crate::entity::Entity;
use crate::error::CommandError;
use crate::schema::{FieldType, PayloadSchema};

use super::events::{
    ACCOUNT_CLOSED, ACCOUNT_OPENED, AccountClosedData, AccountOpenedData, AmountData,
    MONEY_DEPOSITED, MONEY_WITHDRAWN,
};
use super::{Account, AccountError};

type HandlerResult = Result<(), CommandError<AccountError>>;

/// Payload of the `open` command.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAccount {
    pub owner: String,
    #[serde(default)]
    pub initial_deposit: i64,
}

/// Payload of the `deposit` and `withdraw` commands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChangeBalance {
    pub amount: i64,
}

/// Payload of the `close` command.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloseAccount {
    pub reason: Option<String>,
}

pub(super) fn open_schema() -> PayloadSchema {
    PayloadSchema::object()
        .require("owner", FieldType::String)
        .optional("initial_deposit", FieldType::Integer)
}

pub(super) fn change_balance_schema() -> PayloadSchema {
    PayloadSchema::object().require("amount", FieldType::Integer)
}

pub(super) fn close_schema() -> PayloadSchema {
    PayloadSchema::object().optional("reason", FieldType::String)
}

fn ensure_valid_amount(amount: i64) -> HandlerResult {
    if amount < 0 {
        return Err(CommandError::Rejected(AccountError::InvalidAmount { amount }));
    }
    Ok(())
}

fn ensure_open(account: &Entity<Account>) -> HandlerResult {
    if !account.state.is_open() {
        return Err(CommandError::Rejected(AccountError::Closed));
    }
    Ok(())
}

pub(super) async fn open(
    env: CommandEnv,
    existing: Option<Entity<Account>>,
    cmd: OpenAccount,
) -> HandlerResult {
    if existing.is_some() {
        return Err(CommandError::Rejected(AccountError::AlreadyOpen));
    }
    if cmd.owner.trim().is_empty() {
        return Err(CommandError::Rejected(AccountError::OwnerRequired));
    }
    ensure_valid_amount(cmd.initial_deposit)?;

    env.append_event(
        ACCOUNT_OPENED,
        &AccountOpenedData {
            owner: cmd.owner,
            initial_deposit: cmd.initial_deposit,
        },
    )
    .await?;
    Ok(())
}

pub(super) async fn deposit(
    env: CommandEnv,
    account: Entity<Account>,
    cmd: ChangeBalance,
) -> HandlerResult {
    ensure_open(&account)?;
    ensure_valid_amount(cmd.amount)?;
    if cmd.amount == 0 {
        return Ok(());
    }
    if account.state.balance.checked_add(cmd.amount).is_none() {
        return Err(CommandError::Rejected(AccountError::BalanceOverflow {
            balance: account.state.balance,
            amount: cmd.amount,
        }));
    }

    env.append_event(MONEY_DEPOSITED, &AmountData { amount: cmd.amount })
        .await?;
    Ok(())
}

pub(super) async fn withdraw(
    env: CommandEnv,
    account: Entity<Account>,
    cmd: ChangeBalance,
) -> HandlerResult {
    ensure_open(&account)?;
    ensure_valid_amount(cmd.amount)?;
    if cmd.amount == 0 {
        return Ok(());
    }
    if cmd.amount > account.state.balance {
        return Err(CommandError::Rejected(AccountError::InsufficientBalance {
            balance: account.state.balance,
            requested: cmd.amount,
        }));
    }

    env.append_event(MONEY_WITHDRAWN, &AmountData { amount: cmd.amount })
        .await?;
    Ok(())
}

pub(super) async fn close(
    env: CommandEnv,
    account: Entity<Account>,
    cmd: CloseAccount,
) -> HandlerResult {
    // Closing twice is a no-op.
    if !account.state.is_open() {
        return Ok(());
    }
    if account.state.balance != 0 {
        return Err(CommandError::Rejected(AccountError::NonZeroBalance {
            balance: account.state.balance,
        }));
    }

    env.append_event(ACCOUNT_CLOSED, &AccountClosedData { reason: cmd.reason })
        .await?;
    Ok(())
}
