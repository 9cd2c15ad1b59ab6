use async_trait::async_trait;
use bigdecimal::BigDecimal;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::{
    Asset, BroadcastResult, CustodyError, CustodyService, CustodyStatus, CustodyTransaction,
    NewCustodyTransaction, SignatureResult, Vault, VaultBalances,
};

type Breaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

/// Guarded access to a custody backend.
///
/// Every call is bounded by `timeout`; timeouts and backend faults feed a
/// consecutive-failures circuit breaker. Request-level rejections
/// (duplicate signature, unknown id, ...) pass through without tripping it.
#[derive(Clone)]
pub struct CustodyClient {
    inner: Arc<dyn CustodyService>,
    timeout: Duration,
    settlement_timeout: Duration,
    circuit_breaker: Breaker,
}

impl CustodyClient {
    pub fn new(inner: Arc<dyn CustodyService>, timeout: Duration) -> Self {
        Self::with_circuit_breaker(inner, timeout, 3, 60)
    }

    pub fn with_circuit_breaker(
        inner: Arc<dyn CustodyService>,
        timeout: Duration,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        CustodyClient {
            inner,
            timeout,
            settlement_timeout: Duration::from_secs(300),
            circuit_breaker,
        }
    }

    pub fn with_settlement_timeout(mut self, settlement_timeout: Duration) -> Self {
        self.settlement_timeout = settlement_timeout;
        self
    }

    /// Returns the current state of the circuit breaker
    pub fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }

    async fn guarded<T, F>(&self, operation: &'static str, call: F) -> Result<T, CustodyError>
    where
        F: Future<Output = Result<T, CustodyError>>,
    {
        let limit = self.timeout;
        let result = self
            .circuit_breaker
            .call_with(is_transient, async move {
                match tokio::time::timeout(limit, call).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(CustodyError::Timeout {
                        operation,
                        after: limit,
                    }),
                }
            })
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(FailsafeError::Rejected) => {
                tracing::warn!(operation, "Custody call rejected: circuit breaker open");
                Err(CustodyError::CircuitOpen)
            }
            Err(FailsafeError::Inner(e)) => {
                if e.is_transient() {
                    tracing::warn!(operation, error = %e, "Custody call failed");
                }
                Err(e)
            }
        }
    }
}

fn is_transient(error: &CustodyError) -> bool {
    error.is_transient()
}

#[async_trait]
impl CustodyService for CustodyClient {
    async fn create_vault(&self, owner_id: &str) -> Result<Vault, CustodyError> {
        self.guarded("create_vault", self.inner.create_vault(owner_id))
            .await
    }

    async fn get_vault(&self, vault_id: &str) -> Result<Vault, CustodyError> {
        self.guarded("get_vault", self.inner.get_vault(vault_id)).await
    }

    async fn vault_balance(&self, vault_id: &str) -> Result<VaultBalances, CustodyError> {
        self.guarded("vault_balance", self.inner.vault_balance(vault_id))
            .await
    }

    async fn deposit(
        &self,
        vault_id: &str,
        asset: Asset,
        amount: BigDecimal,
    ) -> Result<VaultBalances, CustodyError> {
        self.guarded("deposit", self.inner.deposit(vault_id, asset, amount))
            .await
    }

    async fn create_transaction(
        &self,
        request: NewCustodyTransaction,
    ) -> Result<CustodyTransaction, CustodyError> {
        self.guarded("create_transaction", self.inner.create_transaction(request))
            .await
    }

    async fn get_transaction(&self, id: &str) -> Result<CustodyTransaction, CustodyError> {
        self.guarded("get_transaction", self.inner.get_transaction(id))
            .await
    }

    async fn sign(
        &self,
        id: &str,
        approver_id: &str,
        key_share_proof: &str,
    ) -> Result<SignatureResult, CustodyError> {
        self.guarded("sign", self.inner.sign(id, approver_id, key_share_proof))
            .await
    }

    async fn broadcast(&self, id: &str) -> Result<BroadcastResult, CustodyError> {
        self.guarded("broadcast", self.inner.broadcast(id)).await
    }

    async fn cancel(&self, id: &str) -> Result<CustodyTransaction, CustodyError> {
        self.guarded("cancel", self.inner.cancel(id)).await
    }

    /// Bounded by the settlement timeout rather than the per-call timeout,
    /// and kept out of the circuit breaker: a long confirmation is not a fault.
    async fn wait_for_settlement(&self, id: &str) -> Result<CustodyStatus, CustodyError> {
        match tokio::time::timeout(self.settlement_timeout, self.inner.wait_for_settlement(id)).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(CustodyError::Timeout {
                operation: "wait_for_settlement",
                after: self.settlement_timeout,
            }),
        }
    }
}
