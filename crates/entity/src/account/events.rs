//! Account events and their payloads.

use serde::{Deserialize, Serialize};

use crate::schema::{FieldType, PayloadSchema};

pub const ACCOUNT_OPENED: &str = "AccountOpened";
pub const MONEY_DEPOSITED: &str = "MoneyDeposited";
pub const MONEY_WITHDRAWN: &str = "MoneyWithdrawn";
pub const ACCOUNT_CLOSED: &str = "AccountClosed";

/// Data for the AccountOpened event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOpenedData {
    pub owner: String,
    pub initial_deposit: i64,
}

/// Data for the MoneyDeposited and MoneyWithdrawn events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountData {
    pub amount: i64,
}

/// Data for the AccountClosed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountClosedData {
    pub reason: Option<String>,
}

pub(super) fn opened_schema() -> PayloadSchema {
    PayloadSchema::object()
        .require("owner", FieldType::String)
        .require("initial_deposit", FieldType::Integer)
}

pub(super) fn amount_schema() -> PayloadSchema {
    PayloadSchema::object().require("amount", FieldType::Integer)
}

pub(super) fn closed_schema() -> PayloadSchema {
    PayloadSchema::object().optional("reason", FieldType::String)
}
