//! Account state.

use serde::{Deserialize, Serialize};

/// Lifecycle of an account.
///
/// ```text
/// Open ──► Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AccountStatus {
    #[default]
    Open,
    Closed,
}

/// State folded from an account's events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub owner: String,

    /// Balance in minor units.
    pub balance: i64,

    pub status: AccountStatus,
}

impl Account {
    pub fn is_open(&self) -> bool {
        self.status == AccountStatus::Open
    }
}
