//! Deterministic stand-in for a threshold-signature custody backend.
//!
//! Latency is simulated on every call before any state is touched, so a
//! caller that times out never leaves a half-applied operation behind.
//! Randomness (fees, balances, addresses, jitter) comes from an injected RNG.

use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};

use super::store::EntityStore;
use super::{
    Asset, BroadcastResult, CustodyError, CustodyService, CustodyStatus, CustodyTransaction,
    NewCustodyTransaction, SignatureRecord, SignatureResult, Vault, VaultBalances, VaultStatus,
};
use crate::services::scheduler::TaskRegistry;

const ESTIMATED_CONFIRMATION: &str = "2-5 minutes";
const FEE_JITTER_CENTS: i64 = 50;

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub latency: Duration,
    pub latency_jitter: Duration,
    pub confirmation_delay: Duration,
    pub threshold: u32,
    pub total_signers: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(100),
            latency_jitter: Duration::from_millis(50),
            confirmation_delay: Duration::from_secs(30),
            threshold: 2,
            total_signers: 3,
        }
    }
}

struct CustodyEntry {
    record: CustodyTransaction,
    status_tx: watch::Sender<CustodyStatus>,
}

impl CustodyEntry {
    fn set_status(&mut self, status: CustodyStatus) {
        self.record.status = status;
        self.status_tx.send_replace(status);
    }
}

pub struct SimulatedCustody {
    config: SimulatorConfig,
    vaults: EntityStore<Vault>,
    transactions: EntityStore<CustodyEntry>,
    rng: Mutex<Box<dyn RngCore + Send>>,
    confirmations: TaskRegistry<String>,
}

impl SimulatedCustody {
    pub fn new(config: SimulatorConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    pub fn with_rng<R>(config: SimulatorConfig, rng: R) -> Self
    where
        R: RngCore + Send + 'static,
    {
        Self {
            config,
            vaults: EntityStore::new("vault"),
            transactions: EntityStore::new("ctx"),
            rng: Mutex::new(Box::new(rng)),
            confirmations: TaskRegistry::new("custody-confirmations"),
        }
    }

    /// Confirmation timers that have not fired yet.
    pub fn pending_confirmations(&self) -> usize {
        self.confirmations.in_flight()
    }

    /// Aborts pending confirmation timers; affected transactions stay `SUBMITTED`.
    pub fn shutdown(&self) {
        self.confirmations.shutdown();
    }

    fn with_rng_mut<T>(&self, f: impl FnOnce(&mut Box<dyn RngCore + Send>) -> T) -> T {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut rng)
    }

    async fn simulate_latency(&self) {
        let jitter_ms = self.config.latency_jitter.as_millis() as u64;
        let extra = if jitter_ms == 0 {
            0
        } else {
            self.with_rng_mut(|rng| rng.gen_range(0..=jitter_ms))
        };
        let delay = self.config.latency + Duration::from_millis(extra);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn network_fee(&self, asset: Asset) -> BigDecimal {
        let jitter = self.with_rng_mut(|rng| rng.gen_range(-FEE_JITTER_CENTS..=FEE_JITTER_CENTS));
        cents(asset.base_fee_cents() + jitter)
    }

    fn random_hex(&self, bytes: usize) -> String {
        let mut buf = vec![0u8; bytes];
        self.with_rng_mut(|rng| rng.fill_bytes(&mut buf));
        hex::encode(buf)
    }

    fn vault(&self, vault_id: &str) -> Result<Arc<AsyncMutex<Vault>>, CustodyError> {
        self.vaults
            .get(vault_id)
            .ok_or_else(|| CustodyError::VaultNotFound(vault_id.to_string()))
    }

    fn entry(&self, id: &str) -> Result<Arc<AsyncMutex<CustodyEntry>>, CustodyError> {
        self.transactions
            .get(id)
            .ok_or_else(|| CustodyError::CustodyTransactionNotFound(id.to_string()))
    }

    fn schedule_confirmation(
        &self,
        id: String,
        entry: Arc<AsyncMutex<CustodyEntry>>,
        vault: Arc<AsyncMutex<Vault>>,
    ) {
        let delay = self.config.confirmation_delay;
        let key = id.clone();
        self.confirmations.spawn(key, async move {
            tokio::time::sleep(delay).await;

            let mut vault = vault.lock().await;
            let mut entry = entry.lock().await;
            if entry.record.status != CustodyStatus::Submitted {
                return;
            }

            let total = &entry.record.amount + &entry.record.network_fee;
            let balance = vault
                .balances
                .entry(entry.record.asset)
                .or_insert_with(BigDecimal::zero);

            if *balance >= total {
                *balance = &*balance - &total;
                entry.set_status(CustodyStatus::Completed);
                tracing::info!(custody_transaction_id = %id, "Custody transaction confirmed");
            } else {
                entry.set_status(CustodyStatus::Failed);
                tracing::warn!(
                    custody_transaction_id = %id,
                    required = %total,
                    available = %balance,
                    "Custody transaction failed on chain: vault balance too low"
                );
            }
        });
    }
}

#[async_trait]
impl CustodyService for SimulatedCustody {
    async fn create_vault(&self, owner_id: &str) -> Result<Vault, CustodyError> {
        self.simulate_latency().await;

        let id = self.vaults.next_id();
        let address = format!("0x{}", self.random_hex(20));
        let (usdc, usdt) = self.with_rng_mut(|rng| {
            (rng.gen_range(0..=10_000_000i64), rng.gen_range(0..=5_000_000i64))
        });

        let mut balances = BTreeMap::new();
        balances.insert(Asset::Usdc, cents(usdc));
        balances.insert(Asset::Usdt, cents(usdt));

        let vault = Vault {
            id: id.clone(),
            owner_id: owner_id.to_string(),
            address,
            threshold: self.config.threshold,
            total_signers: self.config.total_signers,
            status: VaultStatus::Active,
            balances,
            created_at: Utc::now(),
        };
        self.vaults.insert(id, vault.clone());

        tracing::info!(vault_id = %vault.id, owner_id, "Vault created");
        Ok(vault)
    }

    async fn get_vault(&self, vault_id: &str) -> Result<Vault, CustodyError> {
        self.simulate_latency().await;
        let vault = self.vault(vault_id)?;
        let vault = vault.lock().await;
        Ok(vault.clone())
    }

    async fn vault_balance(&self, vault_id: &str) -> Result<VaultBalances, CustodyError> {
        self.simulate_latency().await;
        let vault = self.vault(vault_id)?;
        let vault = vault.lock().await;
        Ok(vault.balances.clone())
    }

    async fn deposit(
        &self,
        vault_id: &str,
        asset: Asset,
        amount: BigDecimal,
    ) -> Result<VaultBalances, CustodyError> {
        self.simulate_latency().await;
        let vault = self.vault(vault_id)?;
        let mut vault = vault.lock().await;
        let balance = vault.balances.entry(asset).or_insert_with(BigDecimal::zero);
        *balance = &*balance + &amount;
        Ok(vault.balances.clone())
    }

    async fn create_transaction(
        &self,
        request: NewCustodyTransaction,
    ) -> Result<CustodyTransaction, CustodyError> {
        self.simulate_latency().await;

        let required_signatures = {
            let vault = self.vault(&request.vault_id)?;
            let vault = vault.lock().await;
            vault.threshold
        };

        let id = self.transactions.next_id();
        let record = CustodyTransaction {
            id: id.clone(),
            vault_id: request.vault_id,
            status: CustodyStatus::PendingSignature,
            required_signatures,
            collected_signatures: 0,
            signatures: Vec::new(),
            amount: request.amount,
            destination: request.destination,
            asset: request.asset,
            network_fee: self.network_fee(request.asset),
            blockchain_reference: None,
            estimated_time: None,
            created_at: Utc::now(),
        };
        let (status_tx, _) = watch::channel(record.status);
        self.transactions.insert(
            id.clone(),
            CustodyEntry {
                record: record.clone(),
                status_tx,
            },
        );

        tracing::info!(
            custody_transaction_id = %id,
            vault_id = %record.vault_id,
            asset = %record.asset,
            network_fee = %record.network_fee,
            "Custody transaction created"
        );
        Ok(record)
    }

    async fn get_transaction(&self, id: &str) -> Result<CustodyTransaction, CustodyError> {
        self.simulate_latency().await;
        let entry = self.entry(id)?;
        let entry = entry.lock().await;
        Ok(entry.record.clone())
    }

    async fn sign(
        &self,
        id: &str,
        approver_id: &str,
        key_share_proof: &str,
    ) -> Result<SignatureResult, CustodyError> {
        self.simulate_latency().await;
        let entry = self.entry(id)?;
        let mut entry = entry.lock().await;

        if entry.record.status != CustodyStatus::PendingSignature {
            return Err(CustodyError::NotPendingSignature {
                id: id.to_string(),
                status: entry.record.status,
            });
        }
        if entry.record.has_signature(approver_id) {
            return Err(CustodyError::DuplicateSignature {
                id: id.to_string(),
                approver_id: approver_id.to_string(),
            });
        }

        entry.record.signatures.push(SignatureRecord {
            approver_id: approver_id.to_string(),
            signed_at: Utc::now(),
            key_share_proof: key_share_proof.to_string(),
        });
        entry.record.collected_signatures = entry.record.signatures.len() as u32;
        if entry.record.collected_signatures >= entry.record.required_signatures {
            entry.set_status(CustodyStatus::ReadyToBroadcast);
        }

        tracing::debug!(
            custody_transaction_id = %id,
            approver_id,
            collected = entry.record.collected_signatures,
            "Custody signature added"
        );

        Ok(SignatureResult {
            custody_transaction_id: id.to_string(),
            signature_added: true,
            collected_signatures: entry.record.collected_signatures,
            status: entry.record.status,
        })
    }

    async fn broadcast(&self, id: &str) -> Result<BroadcastResult, CustodyError> {
        self.simulate_latency().await;
        let handle = self.entry(id)?;
        let mut entry = handle.lock().await;

        if entry.record.status != CustodyStatus::ReadyToBroadcast {
            return Err(CustodyError::NotReadyToBroadcast {
                id: id.to_string(),
                status: entry.record.status,
            });
        }
        let vault = self.vault(&entry.record.vault_id)?;

        let reference = format!("0x{}", self.random_hex(32));
        entry.record.blockchain_reference = Some(reference.clone());
        entry.record.estimated_time = Some(ESTIMATED_CONFIRMATION.to_string());
        entry.set_status(CustodyStatus::Submitted);
        drop(entry);

        self.schedule_confirmation(id.to_string(), handle, vault);

        tracing::info!(custody_transaction_id = %id, blockchain_reference = %reference, "Custody transaction submitted");
        Ok(BroadcastResult {
            custody_transaction_id: id.to_string(),
            blockchain_reference: reference,
            status: CustodyStatus::Submitted,
            estimated_time: ESTIMATED_CONFIRMATION.to_string(),
        })
    }

    async fn cancel(&self, id: &str) -> Result<CustodyTransaction, CustodyError> {
        self.simulate_latency().await;
        let entry = self.entry(id)?;
        let mut entry = entry.lock().await;

        if entry.record.status.is_terminal() {
            return Err(CustodyError::NotCancellable {
                id: id.to_string(),
                status: entry.record.status,
            });
        }

        self.confirmations.cancel(&id.to_string());
        entry.set_status(CustodyStatus::Failed);
        tracing::info!(custody_transaction_id = %id, "Custody transaction cancelled");
        Ok(entry.record.clone())
    }

    async fn wait_for_settlement(&self, id: &str) -> Result<CustodyStatus, CustodyError> {
        let mut status_rx = {
            let entry = self.entry(id)?;
            let entry = entry.lock().await;
            entry.status_tx.subscribe()
        };

        let status = status_rx
            .wait_for(|status| status.is_terminal())
            .await
            .map_err(|_| CustodyError::Unavailable(format!("settlement feed for {} closed", id)))?;
        Ok(*status)
    }
}

fn cents(value: i64) -> BigDecimal {
    BigDecimal::new(value.into(), 2)
}
