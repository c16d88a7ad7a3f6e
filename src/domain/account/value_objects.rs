use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Account Value Objects
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AccountStatus {
    #[default]
    Absent,
    Active,
    Deleted,
}

/// What to do when a command touches an account with no history.
///
/// `Some(opening_balance)` records an `AccountCreated` with that balance
/// before the command's own event; `None` rejects with `NotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountPolicy {
    /// Applies to AddCoins, SetCoins and the receiving side of a transfer.
    pub credit_auto_create: Option<i64>,
    /// Applies to DeductCoins.
    pub debit_auto_create: Option<i64>,
}

impl Default for AccountPolicy {
    fn default() -> Self {
        Self {
            credit_auto_create: Some(0),
            debit_auto_create: Some(0),
        }
    }
}

impl AccountPolicy {
    /// Every command except CreateAccount requires an existing account.
    pub fn strict() -> Self {
        Self {
            credit_auto_create: None,
            debit_auto_create: None,
        }
    }
}

/// Read-side snapshot of one account, built by replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub account_id: String,
    pub coins: i64,
    pub status: AccountStatus,
    pub version: i64,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// One page of accounts, newest first. `page` is 1-based.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPage {
    pub accounts: Vec<AccountView>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_auto_creates_empty_accounts() {
        let policy = AccountPolicy::default();
        assert_eq!(policy.credit_auto_create, Some(0));
        assert_eq!(policy.debit_auto_create, Some(0));
        assert_eq!(AccountPolicy::strict().credit_auto_create, None);
    }

    #[test]
    fn test_view_uses_camel_case() {
        let view = AccountView {
            account_id: "acc-1".to_string(),
            coins: 5,
            status: AccountStatus::Active,
            version: 2,
            created_at: None,
            updated_at: None,
        };

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["accountId"], "acc-1");
        assert_eq!(json["status"], "Active");
    }
}
