//! In-process account ledger and approver directory.

use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::domain::Currency;
use crate::error::PaymentError;
use crate::ports::{AccountService, Approver, FundingAccount, IdentityProvider};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BalanceSnapshot {
    pub total: BigDecimal,
    pub held: BigDecimal,
}

impl BalanceSnapshot {
    pub fn available(&self) -> BigDecimal {
        &self.total - &self.held
    }
}

struct AccountRecord {
    account: FundingAccount,
    balances: HashMap<Currency, BalanceSnapshot>,
}

#[derive(Default)]
pub struct InMemoryDirectory {
    accounts: RwLock<HashMap<String, AccountRecord>>,
    approvers: RwLock<HashMap<String, Approver>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_account(&self, account: FundingAccount, balances: &[(Currency, BigDecimal)]) {
        let balances = balances
            .iter()
            .map(|(currency, total)| {
                (
                    *currency,
                    BalanceSnapshot {
                        total: total.clone(),
                        held: BigDecimal::zero(),
                    },
                )
            })
            .collect();
        self.accounts
            .write()
            .await
            .insert(account.id.clone(), AccountRecord { account, balances });
    }

    pub async fn add_approver(&self, approver: Approver) {
        self.approvers
            .write()
            .await
            .insert(approver.id.clone(), approver);
    }

    pub async fn snapshot(&self, account_id: &str, currency: Currency) -> Option<BalanceSnapshot> {
        self.accounts
            .read()
            .await
            .get(account_id)
            .map(|record| record.balances.get(&currency).cloned().unwrap_or_default())
    }

    async fn with_balance<T>(
        &self,
        account_id: &str,
        currency: Currency,
        f: impl FnOnce(&mut BalanceSnapshot) -> Result<T, PaymentError>,
    ) -> Result<T, PaymentError> {
        let mut accounts = self.accounts.write().await;
        let record = accounts
            .get_mut(account_id)
            .ok_or_else(|| PaymentError::AccountNotFound(account_id.to_string()))?;
        let balance = record.balances.entry(currency).or_default();
        f(balance)
    }
}

#[async_trait]
impl AccountService for InMemoryDirectory {
    async fn get(&self, account_id: &str) -> Result<FundingAccount, PaymentError> {
        self.accounts
            .read()
            .await
            .get(account_id)
            .map(|record| record.account.clone())
            .ok_or_else(|| PaymentError::AccountNotFound(account_id.to_string()))
    }

    async fn available(
        &self,
        account_id: &str,
        currency: Currency,
    ) -> Result<BigDecimal, PaymentError> {
        self.snapshot(account_id, currency)
            .await
            .map(|balance| balance.available())
            .ok_or_else(|| PaymentError::AccountNotFound(account_id.to_string()))
    }

    async fn reserve(
        &self,
        account_id: &str,
        currency: Currency,
        amount: &BigDecimal,
    ) -> Result<(), PaymentError> {
        self.with_balance(account_id, currency, |balance| {
            let available = balance.available();
            if available < *amount {
                return Err(PaymentError::InsufficientBalance {
                    requested: amount.clone(),
                    available,
                });
            }
            balance.held = &balance.held + amount;
            Ok(())
        })
        .await
    }

    async fn release(
        &self,
        account_id: &str,
        currency: Currency,
        amount: &BigDecimal,
    ) -> Result<(), PaymentError> {
        self.with_balance(account_id, currency, |balance| {
            balance.held = (&balance.held - amount).max(BigDecimal::zero());
            Ok(())
        })
        .await
    }

    async fn capture(
        &self,
        account_id: &str,
        currency: Currency,
        amount: &BigDecimal,
    ) -> Result<(), PaymentError> {
        self.with_balance(account_id, currency, |balance| {
            balance.held = (&balance.held - amount).max(BigDecimal::zero());
            balance.total = &balance.total - amount;
            Ok(())
        })
        .await
    }

    async fn credit(
        &self,
        account_id: &str,
        currency: Currency,
        amount: &BigDecimal,
    ) -> Result<(), PaymentError> {
        self.with_balance(account_id, currency, |balance| {
            balance.total = &balance.total + amount;
            Ok(())
        })
        .await
    }
}

#[async_trait]
impl IdentityProvider for InMemoryDirectory {
    async fn approver(&self, approver_id: &str) -> Option<Approver> {
        self.approvers.read().await.get(approver_id).cloned()
    }
}
