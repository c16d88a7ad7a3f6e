use futures_util::future::try_join_all;
use std::sync::Arc;

use crate::error::{LedgerError, LedgerResult};
use crate::event_sourcing::core::{AggregateRoot, EventEnvelope};
use crate::event_sourcing::store::EventStore;

use super::aggregate::Account;
use super::errors::AccountError;
use super::value_objects::{AccountPage, AccountStatus, AccountView};

// ============================================================================
// Account Query Handler
// ============================================================================
//
// Reads replay the stream on every call. There is no projection.
//
// ============================================================================

pub struct AccountQueryHandler {
    event_store: Arc<EventStore>,
}

impl AccountQueryHandler {
    pub fn new(event_store: Arc<EventStore>) -> Self {
        Self { event_store }
    }

    pub async fn get_events(&self, stream_id: &str) -> LedgerResult<Vec<EventEnvelope>> {
        self.event_store.get_events(stream_id).await
    }

    /// Current state of an account, or `None` when the stream is empty.
    /// Deleted accounts are returned with `AccountStatus::Deleted`.
    pub async fn get_account(&self, stream_id: &str) -> LedgerResult<Option<AccountView>> {
        let events = self.event_store.get_events(stream_id).await?;
        let (Some(first), Some(last)) = (events.first(), events.last()) else {
            return Ok(None);
        };

        let root = AggregateRoot::<Account>::rehydrate(stream_id, &events)?;
        Ok(Some(AccountView {
            account_id: stream_id.to_string(),
            coins: root.state().coins,
            status: root.state().status,
            version: root.version(),
            created_at: Some(first.occurred_at),
            updated_at: Some(last.occurred_at),
        }))
    }

    /// True for accounts that exist and are not deleted.
    pub async fn account_exists(&self, stream_id: &str) -> LedgerResult<bool> {
        Ok(self
            .get_account(stream_id)
            .await?
            .is_some_and(|view| view.status == AccountStatus::Active))
    }

    pub async fn get_balance(&self, stream_id: &str) -> LedgerResult<i64> {
        match self.get_account(stream_id).await? {
            None => Err(AccountError::NotFound(stream_id.to_string()).into()),
            Some(view) if view.status == AccountStatus::Deleted => {
                Err(AccountError::AccountDeleted(stream_id.to_string()).into())
            }
            Some(view) => Ok(view.coins),
        }
    }

    /// Every active account, ordered by id.
    pub async fn list_accounts(&self) -> LedgerResult<Vec<AccountView>> {
        let ids = self.event_store.stream_ids().await?;
        let views = try_join_all(ids.iter().map(|id| self.get_account(id))).await?;

        Ok(views
            .into_iter()
            .flatten()
            .filter(|view| view.status == AccountStatus::Active)
            .collect())
    }

    pub async fn account_count(&self) -> LedgerResult<usize> {
        Ok(self.list_accounts().await?.len())
    }

    /// Richest accounts first.
    pub async fn top_accounts_by_coins(&self, limit: usize) -> LedgerResult<Vec<AccountView>> {
        let mut accounts = self.list_accounts().await?;
        accounts.sort_by(|a, b| b.coins.cmp(&a.coins).then_with(|| a.account_id.cmp(&b.account_id)));
        accounts.truncate(limit);
        Ok(accounts)
    }

    /// Active accounts newest first, cut into pages of `limit`.
    pub async fn list_accounts_paginated(&self, page: usize, limit: usize) -> LedgerResult<AccountPage> {
        if page == 0 || limit == 0 {
            return Err(LedgerError::invalid_argument("page and limit must be at least 1"));
        }

        let mut accounts = self.list_accounts().await?;
        newest_first(&mut accounts);

        let total = accounts.len();
        let skip = (page - 1).saturating_mul(limit);
        let accounts: Vec<AccountView> = accounts.into_iter().skip(skip).take(limit).collect();

        Ok(AccountPage {
            accounts,
            total,
            page,
            limit,
            total_pages: total.div_ceil(limit),
        })
    }

    /// Active accounts whose id contains `term`, ignoring case. Newest first.
    pub async fn search_accounts(&self, term: &str) -> LedgerResult<Vec<AccountView>> {
        let needle = term.to_lowercase();
        let mut matches: Vec<AccountView> = self
            .list_accounts()
            .await?
            .into_iter()
            .filter(|view| view.account_id.to_lowercase().contains(&needle))
            .collect();
        newest_first(&mut matches);
        Ok(matches)
    }

    pub async fn total_coins(&self) -> LedgerResult<i64> {
        let accounts = self.list_accounts().await?;
        let total = accounts.iter().fold(0i64, |sum, view| sum.saturating_add(view.coins));

        tracing::debug!(account_count = accounts.len(), total_coins = total, "Computed ledger total");
        Ok(total)
    }
}

fn newest_first(accounts: &mut [AccountView]) {
    accounts.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.account_id.cmp(&b.account_id))
    });
}
