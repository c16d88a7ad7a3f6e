// ============================================================================
// Account Business Rule Errors
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AccountError {
    #[error("Invalid amount {amount}: {reason}")]
    InvalidAmount { amount: i64, reason: String },

    #[error("Insufficient coins: balance {balance}, requested {requested}")]
    InsufficientFunds { balance: i64, requested: i64 },

    #[error("Account {0} has been deleted")]
    AccountDeleted(String),

    #[error("Account {0} does not exist")]
    NotFound(String),

    #[error("Account {0} already exists")]
    AlreadyExists(String),

    #[error("Cannot transfer coins from account {0} to itself")]
    SelfTransfer(String),
}

impl AccountError {
    pub fn invalid_amount(amount: i64, reason: impl Into<String>) -> Self {
        AccountError::InvalidAmount {
            amount,
            reason: reason.into(),
        }
    }
}
