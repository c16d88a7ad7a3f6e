use crate::error::LedgerResult;
use crate::event_sourcing::core::{Aggregate, AggregateRoot, EventEnvelope};
use super::errors::AccountError;
use super::events::*;
use super::value_objects::{AccountPolicy, AccountStatus};

// ============================================================================
// Account Aggregate - Domain Logic
// ============================================================================
//
// `Account` is the replayed state. `AccountAggregate` wraps the generic
// `AggregateRoot` and carries the ledger rules: every method validates
// first and records events only once all checks pass, so a rejected
// command leaves the buffer untouched.
//
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Account {
    pub status: AccountStatus,
    pub coins: i64,
}

impl Aggregate for Account {
    type Event = AccountEvent;

    const AGGREGATE_TYPE: &'static str = "Account";

    fn apply(&mut self, event: &AccountEvent) {
        match event {
            AccountEvent::AccountCreated(e) => {
                self.status = AccountStatus::Active;
                self.coins = e.initial_coins;
            }
            AccountEvent::CoinsAdded(e) => self.coins = e.new_balance,
            AccountEvent::CoinsDeducted(e) => self.coins = e.new_balance,
            AccountEvent::CoinsSet(e) => self.coins = e.new_balance,
            AccountEvent::CoinsTransferred(e) => self.coins = e.new_balance,
            AccountEvent::CoinsReceived(e) => self.coins = e.new_balance,
            AccountEvent::AccountDeleted(_) => {
                self.status = AccountStatus::Deleted;
                self.coins = 0;
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccountAggregate {
    root: AggregateRoot<Account>,
    policy: AccountPolicy,
}

impl AccountAggregate {
    pub fn new(id: impl Into<String>, policy: AccountPolicy) -> LedgerResult<Self> {
        Ok(Self {
            root: AggregateRoot::new(id)?,
            policy,
        })
    }

    pub fn from_root(root: AggregateRoot<Account>, policy: AccountPolicy) -> Self {
        Self { root, policy }
    }

    pub fn root(&self) -> &AggregateRoot<Account> {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut AggregateRoot<Account> {
        &mut self.root
    }

    pub fn id(&self) -> &str {
        self.root.id()
    }

    pub fn coins(&self) -> i64 {
        self.root.state().coins
    }

    pub fn status(&self) -> AccountStatus {
        self.root.state().status
    }

    pub fn version(&self) -> i64 {
        self.root.version()
    }

    pub fn uncommitted(&self) -> &[EventEnvelope] {
        self.root.uncommitted()
    }

    // ========================================================================
    // Business Operations
    // ========================================================================

    pub fn create(&mut self, initial_coins: i64) -> LedgerResult<&[EventEnvelope]> {
        if self.status() != AccountStatus::Absent {
            return Err(AccountError::AlreadyExists(self.id().to_string()).into());
        }
        if initial_coins < 0 {
            return Err(AccountError::invalid_amount(initial_coins, "initial coins must not be negative").into());
        }

        let created = self.created_event(initial_coins);
        self.record(vec![created])
    }

    pub fn add_coins(&mut self, amount: i64) -> LedgerResult<&[EventEnvelope]> {
        ensure_positive(amount)?;
        let opening = self.opening_balance(self.policy.credit_auto_create)?;
        let previous_balance = opening.unwrap_or(self.coins());
        let new_balance = credit(previous_balance, amount)?;

        let mut events = self.creation_prefix(opening);
        events.push(AccountEvent::CoinsAdded(CoinsAdded {
            amount,
            previous_balance,
            new_balance,
        }));
        self.record(events)
    }

    pub fn deduct_coins(&mut self, amount: i64) -> LedgerResult<&[EventEnvelope]> {
        ensure_positive(amount)?;
        let opening = self.opening_balance(self.policy.debit_auto_create)?;
        let previous_balance = opening.unwrap_or(self.coins());
        let new_balance = debit(previous_balance, amount)?;

        let mut events = self.creation_prefix(opening);
        events.push(AccountEvent::CoinsDeducted(CoinsDeducted {
            amount,
            previous_balance,
            new_balance,
        }));
        self.record(events)
    }

    /// Overwrite the balance.
    pub fn set_coins(&mut self, coins: i64) -> LedgerResult<&[EventEnvelope]> {
        if coins < 0 {
            return Err(AccountError::invalid_amount(coins, "balance must not be negative").into());
        }
        let opening = self.opening_balance(self.policy.credit_auto_create)?;
        let previous_balance = opening.unwrap_or(self.coins());

        let mut events = self.creation_prefix(opening);
        events.push(AccountEvent::CoinsSet(CoinsSet {
            previous_balance,
            new_balance: coins,
        }));
        self.record(events)
    }

    /// Debit side of a transfer. The destination is credited separately
    /// through `receive`.
    pub fn transfer_out(&mut self, to_account_id: &str, amount: i64) -> LedgerResult<&[EventEnvelope]> {
        match self.status() {
            AccountStatus::Absent => return Err(AccountError::NotFound(self.id().to_string()).into()),
            AccountStatus::Deleted => return Err(AccountError::AccountDeleted(self.id().to_string()).into()),
            AccountStatus::Active => {}
        }
        if to_account_id == self.id() {
            return Err(AccountError::SelfTransfer(self.id().to_string()).into());
        }
        ensure_positive(amount)?;
        let previous_balance = self.coins();
        let new_balance = debit(previous_balance, amount)?;

        self.record(vec![AccountEvent::CoinsTransferred(CoinsTransferred {
            to_account_id: to_account_id.to_string(),
            amount,
            previous_balance,
            new_balance,
        })])
    }

    /// Credit side of a transfer.
    pub fn receive(&mut self, from_account_id: &str, amount: i64) -> LedgerResult<&[EventEnvelope]> {
        if from_account_id == self.id() {
            return Err(AccountError::SelfTransfer(self.id().to_string()).into());
        }
        ensure_positive(amount)?;
        let opening = self.opening_balance(self.policy.credit_auto_create)?;
        let previous_balance = opening.unwrap_or(self.coins());
        let new_balance = credit(previous_balance, amount)?;

        let mut events = self.creation_prefix(opening);
        events.push(AccountEvent::CoinsReceived(CoinsReceived {
            from_account_id: from_account_id.to_string(),
            amount,
            previous_balance,
            new_balance,
        }));
        self.record(events)
    }

    pub fn delete(&mut self) -> LedgerResult<&[EventEnvelope]> {
        match self.status() {
            AccountStatus::Absent => Err(AccountError::NotFound(self.id().to_string()).into()),
            AccountStatus::Deleted => Err(AccountError::AccountDeleted(self.id().to_string()).into()),
            AccountStatus::Active => {
                let final_balance = self.coins();
                self.record(vec![AccountEvent::AccountDeleted(AccountDeleted { final_balance })])
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// `Some(balance)` when the account must be created first,
    /// `None` when it is already active.
    fn opening_balance(&self, auto_create: Option<i64>) -> Result<Option<i64>, AccountError> {
        match self.status() {
            AccountStatus::Active => Ok(None),
            AccountStatus::Deleted => Err(AccountError::AccountDeleted(self.id().to_string())),
            AccountStatus::Absent => match auto_create {
                Some(balance) if balance < 0 => {
                    Err(AccountError::invalid_amount(balance, "opening balance must not be negative"))
                }
                Some(balance) => Ok(Some(balance)),
                None => Err(AccountError::NotFound(self.id().to_string())),
            },
        }
    }

    fn created_event(&self, initial_coins: i64) -> AccountEvent {
        AccountEvent::AccountCreated(AccountCreated {
            account_id: self.id().to_string(),
            initial_coins,
        })
    }

    fn creation_prefix(&self, opening: Option<i64>) -> Vec<AccountEvent> {
        match opening {
            Some(balance) => {
                tracing::debug!(account_id = %self.id(), opening_balance = balance, "Auto-creating account");
                vec![self.created_event(balance)]
            }
            None => Vec::new(),
        }
    }

    /// Emit events in order and return the slice recorded by this call.
    fn record(&mut self, events: Vec<AccountEvent>) -> LedgerResult<&[EventEnvelope]> {
        let start = self.root.uncommitted().len();
        for event in events {
            self.root.emit(event)?;
        }
        Ok(&self.root.uncommitted()[start..])
    }
}

fn ensure_positive(amount: i64) -> Result<(), AccountError> {
    if amount <= 0 {
        return Err(AccountError::invalid_amount(amount, "must be positive"));
    }
    Ok(())
}

fn credit(balance: i64, amount: i64) -> Result<i64, AccountError> {
    balance
        .checked_add(amount)
        .ok_or_else(|| AccountError::invalid_amount(amount, "balance would overflow"))
}

fn debit(balance: i64, amount: i64) -> Result<i64, AccountError> {
    if balance < amount {
        return Err(AccountError::InsufficientFunds {
            balance,
            requested: amount,
        });
    }
    Ok(balance - amount)
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LedgerError;

    fn active(id: &str, coins: i64) -> AccountAggregate {
        let mut account = AccountAggregate::new(id, AccountPolicy::default()).unwrap();
        account.create(coins).unwrap();
        account.root_mut().mark_committed();
        account
    }

    fn validation(err: LedgerError) -> AccountError {
        match err {
            LedgerError::Validation(e) => e,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn test_create_then_add() {
        let mut account = active("acc-1", 100);

        let events = account.add_coins(25).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "CoinsAdded");
        assert_eq!(events[0].sequence_number, 2);
        assert_eq!(account.coins(), 125);
        assert_eq!(account.version(), 1);
    }

    #[test]
    fn test_create_twice_rejected() {
        let mut account = active("acc-1", 0);

        let err = validation(account.create(5).unwrap_err());
        assert_eq!(err, AccountError::AlreadyExists("acc-1".to_string()));
        assert!(account.uncommitted().is_empty());
    }

    #[test]
    fn test_non_positive_amounts_rejected() {
        let mut account = active("acc-1", 10);

        for amount in [0, -5] {
            assert!(matches!(
                validation(account.add_coins(amount).unwrap_err()),
                AccountError::InvalidAmount { .. }
            ));
            assert!(matches!(
                validation(account.deduct_coins(amount).unwrap_err()),
                AccountError::InvalidAmount { .. }
            ));
        }
        assert!(account.uncommitted().is_empty());
    }

    #[test]
    fn test_add_auto_creates_with_explicit_event() {
        let mut account = AccountAggregate::new("acc-new", AccountPolicy::default()).unwrap();

        let types: Vec<String> = account
            .add_coins(40)
            .unwrap()
            .iter()
            .map(|e| e.event_type.clone())
            .collect();

        assert_eq!(types, vec!["AccountCreated", "CoinsAdded"]);
        assert_eq!(account.status(), AccountStatus::Active);
        assert_eq!(account.coins(), 40);
    }

    #[test]
    fn test_strict_policy_rejects_absent_account() {
        let mut account = AccountAggregate::new("acc-new", AccountPolicy::strict()).unwrap();

        let err = validation(account.add_coins(10).unwrap_err());
        assert_eq!(err, AccountError::NotFound("acc-new".to_string()));
        assert!(account.uncommitted().is_empty());
    }

    #[test]
    fn test_auto_create_not_recorded_when_deduct_fails() {
        let mut account = AccountAggregate::new("acc-new", AccountPolicy::default()).unwrap();

        let err = validation(account.deduct_coins(10).unwrap_err());
        assert_eq!(err, AccountError::InsufficientFunds { balance: 0, requested: 10 });
        assert!(account.uncommitted().is_empty());
        assert_eq!(account.status(), AccountStatus::Absent);
    }

    #[test]
    fn test_overflow_is_invalid_amount() {
        let mut account = active("acc-1", i64::MAX - 1);

        let err = validation(account.add_coins(2).unwrap_err());
        assert!(matches!(err, AccountError::InvalidAmount { amount: 2, .. }));
        assert_eq!(account.coins(), i64::MAX - 1);
    }

    #[test]
    fn test_transfer_out_rules() {
        let mut absent = AccountAggregate::new("ghost", AccountPolicy::default()).unwrap();
        assert_eq!(
            validation(absent.transfer_out("acc-2", 1).unwrap_err()),
            AccountError::NotFound("ghost".to_string())
        );

        let mut account = active("acc-1", 50);
        assert_eq!(
            validation(account.transfer_out("acc-1", 1).unwrap_err()),
            AccountError::SelfTransfer("acc-1".to_string())
        );
        assert_eq!(
            validation(account.transfer_out("acc-2", 51).unwrap_err()),
            AccountError::InsufficientFunds { balance: 50, requested: 51 }
        );

        account.transfer_out("acc-2", 20).unwrap();
        assert_eq!(account.coins(), 30);
    }

    #[test]
    fn test_receive_credits_and_auto_creates() {
        let mut account = AccountAggregate::new("acc-2", AccountPolicy::default()).unwrap();

        let events = account.receive("acc-1", 15).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].event_type, "CoinsReceived");
        assert_eq!(events[1].payload["fromAccountId"], "acc-1");
        assert_eq!(account.coins(), 15);
    }

    #[test]
    fn test_set_coins_overwrites() {
        let mut account = active("acc-1", 70);

        let events = account.set_coins(5).unwrap();
        assert_eq!(events[0].payload["previousBalance"], 70);
        assert_eq!(account.coins(), 5);

        assert!(matches!(
            validation(account.set_coins(-1).unwrap_err()),
            AccountError::InvalidAmount { .. }
        ));
    }

    #[test]
    fn test_delete_lifecycle() {
        let mut absent = AccountAggregate::new("ghost", AccountPolicy::default()).unwrap();
        assert_eq!(
            validation(absent.delete().unwrap_err()),
            AccountError::NotFound("ghost".to_string())
        );

        let mut account = active("acc-1", 9);
        let events = account.delete().unwrap();
        assert_eq!(events[0].payload["finalBalance"], 9);
        assert_eq!(account.status(), AccountStatus::Deleted);

        assert_eq!(
            validation(account.delete().unwrap_err()),
            AccountError::AccountDeleted("acc-1".to_string())
        );
        assert_eq!(
            validation(account.add_coins(1).unwrap_err()),
            AccountError::AccountDeleted("acc-1".to_string())
        );
    }

    #[test]
    fn test_replay_reproduces_balance() {
        let mut account = active("acc-1", 10);
        account.add_coins(5).unwrap();
        account.deduct_coins(3).unwrap();
        account.root_mut().mark_committed();

        let mut history = Vec::new();
        let mut fresh = AccountAggregate::new("acc-1", AccountPolicy::default()).unwrap();
        fresh.create(10).unwrap();
        fresh.add_coins(5).unwrap();
        fresh.deduct_coins(3).unwrap();
        history.extend_from_slice(fresh.uncommitted());

        let first = AggregateRoot::<Account>::rehydrate("acc-1", &history).unwrap();
        let second = AggregateRoot::<Account>::rehydrate("acc-1", &history).unwrap();

        assert_eq!(first.state(), second.state());
        assert_eq!(first.state().coins, account.coins());
        assert_eq!(first.version(), account.version());
    }
}
