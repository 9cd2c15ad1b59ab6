//! Authorization orchestrator: the entry point request handlers call.
//!
//! Every change to a transaction happens inside its per-transaction critical
//! section. The next state is computed on a copy, custody calls run against
//! that copy, and only when they succeed is the approval appended together
//! with the advanced transaction. A custody failure therefore leaves the
//! stored transaction exactly where it was.

use bigdecimal::{BigDecimal, Zero};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::locks::TransactionLocks;
use super::scheduler::TaskRegistry;
use crate::custody::{
    CustodyError, CustodyService, CustodyStatus, CustodyTransaction, NewCustodyTransaction, Vault,
    VaultBalances,
};
use crate::domain::approval::has_signed;
use crate::domain::state_machine::{self, PaymentDraft, SettlementOutcome};
use crate::domain::{
    Approval, Currency, PaymentReferences, Recipient, Settlement, Transaction, TransactionKind,
    TransactionStatus,
};
use crate::error::PaymentError;
use crate::ledger::ApprovalLedger;
use crate::ports::{AccountService, Approver, IdentityProvider, PaymentRepository, RepositoryError};
use crate::validation;

const STATUS_CHANNEL_CAPACITY: usize = 100;
const RECENT_TRANSACTIONS: usize = 5;

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PaymentPolicy {
    /// Quorum for outbound payments.
    pub required_signatures: u32,
    pub service_fee_bps: u32,
}

impl Default for PaymentPolicy {
    fn default() -> Self {
        Self {
            required_signatures: 2,
            service_fee_bps: 25,
        }
    }
}

impl PaymentPolicy {
    /// Basis points of `amount`, truncated to cents.
    pub fn service_fee(&self, amount: &BigDecimal) -> BigDecimal {
        (amount * BigDecimal::from(self.service_fee_bps) / BigDecimal::from(10_000)).with_scale(2)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreatePaymentRequest {
    pub account_id: String,
    pub currency: Currency,
    pub amount: BigDecimal,
    pub recipient: Recipient,
    #[serde(default)]
    pub references: PaymentReferences,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IncomingPaymentRequest {
    pub account_id: String,
    pub currency: Currency,
    pub amount: BigDecimal,
    pub sender: Recipient,
    #[serde(default)]
    pub references: PaymentReferences,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignAction {
    Approve,
    Reject,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentReceipt {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub collected_signatures: u32,
    pub required_signatures: u32,
    pub service_fee: BigDecimal,
    pub network_fee: BigDecimal,
    pub custody_transaction_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignatureReceipt {
    pub transaction_id: Uuid,
    pub status: TransactionStatus,
    pub collected_signatures: u32,
    pub required_signatures: u32,
    pub blockchain_reference: Option<String>,
    pub message: String,
}

/// Summary row for approval queues and wallet views.
#[derive(Debug, Clone, Serialize)]
pub struct PendingPayment {
    pub transaction_id: Uuid,
    pub currency: Currency,
    pub amount: BigDecimal,
    pub recipient_name: String,
    pub status: TransactionStatus,
    pub collected_signatures: u32,
    pub required_signatures: u32,
    pub initiated_by: String,
    pub created_at: DateTime<Utc>,
}

impl From<&Transaction> for PendingPayment {
    fn from(tx: &Transaction) -> Self {
        Self {
            transaction_id: tx.id,
            currency: tx.currency,
            amount: tx.amount.clone(),
            recipient_name: tx.recipient.name.clone(),
            status: tx.status,
            collected_signatures: tx.collected_signatures,
            required_signatures: tx.required_signatures,
            initiated_by: tx.initiated_by.clone(),
            created_at: tx.created_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TransactionDetails {
    pub transaction: Transaction,
    pub approvals: Vec<Approval>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletStatus {
    pub account_id: String,
    pub vault: Vault,
    pub balances: VaultBalances,
    pub in_flight: Vec<PendingPayment>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrencyBalance {
    pub currency: Currency,
    /// Balance minus outstanding reservations.
    pub available: BigDecimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentTransaction {
    pub kind: TransactionKind,
    #[serde(flatten)]
    pub payment: PendingPayment,
    /// Approver names in signature order.
    pub approved_by: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountOverview {
    pub account_id: String,
    pub name: String,
    pub balances: Vec<CurrencyBalance>,
    /// Outbound payments still collecting signatures.
    pub pending_payments: usize,
    /// Newest first.
    pub recent: Vec<RecentTransaction>,
}

/// Published on every status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentStatusUpdate {
    pub transaction_id: Uuid,
    pub account_id: String,
    pub status: TransactionStatus,
    pub collected_signatures: u32,
    pub required_signatures: u32,
    pub blockchain_reference: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub message: Option<String>,
}

#[derive(Clone)]
pub struct AuthorizationOrchestrator {
    repository: Arc<dyn PaymentRepository>,
    ledger: ApprovalLedger,
    accounts: Arc<dyn AccountService>,
    identity: Arc<dyn IdentityProvider>,
    custody: Arc<dyn CustodyService>,
    locks: Arc<TransactionLocks>,
    settlements: Arc<TaskRegistry<Uuid>>,
    updates: broadcast::Sender<PaymentStatusUpdate>,
    policy: PaymentPolicy,
}

impl AuthorizationOrchestrator {
    pub fn new(
        repository: Arc<dyn PaymentRepository>,
        accounts: Arc<dyn AccountService>,
        identity: Arc<dyn IdentityProvider>,
        custody: Arc<dyn CustodyService>,
        policy: PaymentPolicy,
    ) -> Self {
        let (updates, _) = broadcast::channel(STATUS_CHANNEL_CAPACITY);
        Self {
            ledger: ApprovalLedger::new(repository.clone()),
            repository,
            accounts,
            identity,
            custody,
            locks: Arc::new(TransactionLocks::new()),
            settlements: Arc::new(TaskRegistry::new("settlement-watchers")),
            updates,
            policy,
        }
    }

    pub fn policy(&self) -> PaymentPolicy {
        self.policy
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PaymentStatusUpdate> {
        self.updates.subscribe()
    }

    /// Settlement watchers still waiting on the custody backend.
    pub fn in_flight_settlements(&self) -> usize {
        self.settlements.in_flight()
    }

    /// Aborts settlement watchers; their transactions stay `broadcasting`.
    pub fn shutdown(&self) {
        self.settlements.shutdown();
    }

    /// Opens an outbound payment and registers the initiator's signature as
    /// level 1.
    ///
    /// Funds (amount plus fees) are reserved on the account for the life of
    /// the payment. Chain-settled currencies also open a custody transaction,
    /// whose network fee becomes the payment's network fee.
    pub async fn create_payment(
        &self,
        initiator_id: &str,
        request: CreatePaymentRequest,
    ) -> Result<PaymentReceipt, PaymentError> {
        let initiator = self.approver(initiator_id).await?;
        authorize(&initiator, &request.account_id)?;

        if request.amount <= BigDecimal::zero() {
            return Err(PaymentError::InvalidAmount(format!(
                "amount must be greater than 0, got {}",
                request.amount
            )));
        }
        let (recipient, references) =
            validation::normalize_payment(request.currency, &request.recipient, &request.references)?;

        let account = self.accounts.get(&request.account_id).await?;
        let available = self
            .accounts
            .available(&account.id, request.currency)
            .await?;
        let service_fee = self.policy.service_fee(&request.amount);

        let custody_tx = match request.currency.settlement() {
            Settlement::Instant => None,
            Settlement::Chain(asset) => {
                let vault_id = account
                    .vault_id
                    .clone()
                    .ok_or_else(|| PaymentError::VaultNotFound(account.id.clone()))?;
                let vault = self.custody.get_vault(&vault_id).await?;
                if self.policy.required_signatures < vault.threshold {
                    return Err(PaymentError::QuorumBelowThreshold {
                        required: self.policy.required_signatures,
                        threshold: vault.threshold,
                    });
                }

                let before_network_fee = &request.amount + &service_fee;
                if available < before_network_fee {
                    return Err(PaymentError::InsufficientBalance {
                        requested: before_network_fee,
                        available,
                    });
                }

                Some(
                    self.custody
                        .create_transaction(NewCustodyTransaction {
                            vault_id,
                            amount: request.amount.clone(),
                            destination: recipient.account.clone(),
                            asset,
                        })
                        .await?,
                )
            }
        };
        let custody_id = custody_tx.as_ref().map(|ctx| ctx.id.clone());

        let draft = PaymentDraft {
            account_id: account.id.clone(),
            kind: TransactionKind::Send,
            currency: request.currency,
            amount: request.amount,
            recipient,
            references,
            service_fee,
            network_fee: custody_tx
                .as_ref()
                .map(|ctx| ctx.network_fee.clone())
                .unwrap_or_else(BigDecimal::zero),
            initiated_by: initiator.id.clone(),
            custody_transaction_id: custody_id.clone(),
        };

        let tx = match self.open(draft, &available).await {
            Ok(tx) => tx,
            Err(e) => {
                if let Some(custody_id) = custody_id.as_deref() {
                    self.abandon_custody(custody_id).await;
                }
                return Err(e);
            }
        };

        tracing::info!(
            transaction_id = %tx.id,
            account_id = %tx.account_id,
            currency = %tx.currency,
            amount = %tx.amount,
            custody_transaction_id = ?tx.custody_transaction_id,
            "Payment created"
        );
        self.publish(&tx, Some("Payment created".to_string()));

        match self.sign_payment(tx.id, &initiator.id, SignAction::Approve).await {
            Ok(signed) => Ok(PaymentReceipt {
                transaction_id: tx.id,
                status: signed.status,
                collected_signatures: signed.collected_signatures,
                required_signatures: signed.required_signatures,
                service_fee: tx.service_fee,
                network_fee: tx.network_fee,
                custody_transaction_id: tx.custody_transaction_id,
                message: signed.message,
            }),
            Err(e) => {
                // The payment exists and the initiator can sign it again.
                tracing::warn!(
                    transaction_id = %tx.id,
                    approver_id = %initiator.id,
                    error = %e,
                    "Initiator signature not recorded"
                );
                Ok(PaymentReceipt {
                    transaction_id: tx.id,
                    status: tx.status,
                    collected_signatures: tx.collected_signatures,
                    required_signatures: tx.required_signatures,
                    service_fee: tx.service_fee,
                    network_fee: tx.network_fee,
                    custody_transaction_id: tx.custody_transaction_id,
                    message: format!("Payment created but initiator signature failed: {}", e),
                })
            }
        }
    }

    /// Initiates, reserves and stores a new outbound transaction. Undoes the
    /// reservation when the transaction cannot be stored.
    async fn open(&self, draft: PaymentDraft, available: &BigDecimal) -> Result<Transaction, PaymentError> {
        let tx = state_machine::initiate(draft, self.policy.required_signatures, available)?;
        let total = tx.total_debit();
        self.accounts.reserve(&tx.account_id, tx.currency, &total).await?;

        if let Err(e) = self.repository.insert(&tx).await {
            if let Err(release) = self.accounts.release(&tx.account_id, tx.currency, &total).await {
                tracing::error!(transaction_id = %tx.id, error = %release, "Failed to release reservation");
            }
            return Err(e.into());
        }
        Ok(tx)
    }

    async fn abandon_custody(&self, custody_id: &str) {
        match self.custody.cancel(custody_id).await {
            Ok(_) => tracing::info!(custody_transaction_id = custody_id, "Custody transaction cancelled"),
            Err(e) => tracing::warn!(
                custody_transaction_id = custody_id,
                error = %e,
                "Could not cancel custody transaction"
            ),
        }
    }

    /// Applies one approver's decision to a transaction.
    ///
    /// Approve counts a signature; the quorum-completing signature settles
    /// fiat immediately or broadcasts through custody. Reject fails the
    /// payment outright and releases its reservation.
    pub async fn sign_payment(
        &self,
        transaction_id: Uuid,
        approver_id: &str,
        action: SignAction,
    ) -> Result<SignatureReceipt, PaymentError> {
        let approver = self.approver(approver_id).await?;
        let guard = self.locks.acquire(transaction_id).await;

        let tx = self.load(transaction_id).await?;
        let key_share = authorize(&approver, &tx.account_id)?;
        let approvals = self.ledger.list_approvals(transaction_id).await?;

        let receipt = match action {
            SignAction::Approve => self.approve(tx, &approver, key_share, &approvals).await?,
            SignAction::Reject => self.reject(tx, &approver, &approvals).await?,
        };
        drop(guard);

        if receipt.status.is_terminal() {
            self.locks.forget(transaction_id);
        }
        Ok(receipt)
    }

    async fn approve(
        &self,
        tx: Transaction,
        approver: &Approver,
        key_share: &str,
        approvals: &[Approval],
    ) -> Result<SignatureReceipt, PaymentError> {
        let mut advanced = tx.clone();
        state_machine::record_signature(&mut advanced, &approver.id, approvals)
            .map_err(already_signed)?;

        if advanced.currency.is_chain_settled() {
            advanced.blockchain_reference = self
                .forward_to_custody(&tx, &advanced, approver, key_share, approvals)
                .await?;
        } else if advanced.status == TransactionStatus::Broadcasting {
            state_machine::finalize(&mut advanced, SettlementOutcome::Confirmed)?;
        }

        let level = advanced.collected_signatures;
        self.ledger
            .add_approval(&advanced, &approver.id, key_share, level)
            .await?;

        tracing::info!(
            transaction_id = %advanced.id,
            approver_id = %approver.id,
            signature_level = level,
            status = %advanced.status,
            "Signature recorded"
        );

        match advanced.status {
            TransactionStatus::Complete => {
                self.settle_funds(&advanced, SettlementOutcome::Confirmed)
                    .await
            }
            TransactionStatus::Broadcasting => self.watch_settlement(&advanced),
            _ => {}
        }

        let message = progress_message(&advanced);
        self.publish(&advanced, Some(message.clone()));
        Ok(signature_receipt(&advanced, message))
    }

    /// Brings the custody transaction level with this approval and, once the
    /// quorum is met, broadcasts it. Returns the blockchain reference.
    ///
    /// Safe to repeat after a failure: a signature the custody side already
    /// holds is not sent again and an existing broadcast is reused.
    ///
    /// Custody signers must stay within the ledger's approvers plus this
    /// approver. A signature left behind by another approver's failed call
    /// blocks everyone else until that approver retries or someone rejects.
    async fn forward_to_custody(
        &self,
        tx: &Transaction,
        advanced: &Transaction,
        approver: &Approver,
        key_share: &str,
        approvals: &[Approval],
    ) -> Result<Option<String>, PaymentError> {
        let custody_id = tx
            .custody_transaction_id
            .as_deref()
            .ok_or(PaymentError::InvalidTransition {
                transaction_id: tx.id,
                from: tx.status,
                event: "sign without a custody transaction",
            })?;

        let mut custody_tx = self.custody.get_transaction(custody_id).await?;
        let unrecorded = unrecorded_signers(&custody_tx, approvals, &approver.id);
        if !unrecorded.is_empty() {
            tracing::warn!(
                transaction_id = %tx.id,
                custody_transaction_id = custody_id,
                approver_id = %approver.id,
                signers = ?unrecorded,
                "Custody holds signatures the ledger does not"
            );
            return Err(PaymentError::CustodySignersDiverged {
                transaction_id: tx.id,
                signers: unrecorded,
            });
        }

        if custody_tx.status == CustodyStatus::PendingSignature && !custody_tx.has_signature(&approver.id) {
            let signed = self.custody.sign(custody_id, &approver.id, key_share).await?;
            tracing::debug!(
                transaction_id = %tx.id,
                custody_transaction_id = custody_id,
                collected = signed.collected_signatures,
                status = %signed.status,
                "Custody signature forwarded"
            );
            custody_tx.status = signed.status;
        }

        if advanced.status != TransactionStatus::Broadcasting {
            return Ok(None);
        }

        match custody_tx.status {
            CustodyStatus::ReadyToBroadcast => {
                let broadcast = self.custody.broadcast(custody_id).await?;
                tracing::info!(
                    transaction_id = %tx.id,
                    custody_transaction_id = custody_id,
                    blockchain_reference = %broadcast.blockchain_reference,
                    "Custody transaction broadcast"
                );
                Ok(Some(broadcast.blockchain_reference))
            }
            CustodyStatus::Submitted | CustodyStatus::Completed => custody_tx
                .blockchain_reference
                .map(Some)
                .ok_or_else(|| {
                    CustodyError::NotReadyToBroadcast {
                        id: custody_id.to_string(),
                        status: custody_tx.status,
                    }
                    .into()
                }),
            status => Err(CustodyError::NotReadyToBroadcast {
                id: custody_id.to_string(),
                status,
            }
            .into()),
        }
    }

    async fn reject(
        &self,
        tx: Transaction,
        approver: &Approver,
        approvals: &[Approval],
    ) -> Result<SignatureReceipt, PaymentError> {
        let mut rejected = tx.clone();
        state_machine::reject(&mut rejected, &approver.id, approvals).map_err(already_signed)?;

        if let Some(custody_id) = tx.custody_transaction_id.as_deref() {
            match self.custody.cancel(custody_id).await {
                Ok(_) | Err(CustodyError::NotCancellable { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }

        self.repository.update(&rejected).await?;
        self.settle_funds(&rejected, SettlementOutcome::Failed).await;

        tracing::info!(
            transaction_id = %rejected.id,
            approver_id = %approver.id,
            collected = rejected.collected_signatures,
            "Payment rejected"
        );

        let message = format!("Payment rejected by {}", approver.name);
        self.publish(&rejected, Some(message.clone()));
        Ok(signature_receipt(&rejected, message))
    }

    /// Captures or releases the reservation of a transaction whose terminal
    /// status is already stored. A failure here is logged, not returned: the
    /// payment outcome stands and the hold is left for reconciliation.
    async fn settle_funds(&self, tx: &Transaction, outcome: SettlementOutcome) {
        let total = tx.total_debit();
        let result = match outcome {
            SettlementOutcome::Confirmed => {
                self.accounts
                    .capture(&tx.account_id, tx.currency, &total)
                    .await
            }
            SettlementOutcome::Failed => {
                self.accounts
                    .release(&tx.account_id, tx.currency, &total)
                    .await
            }
        };
        if let Err(e) = result {
            tracing::error!(
                transaction_id = %tx.id,
                account_id = %tx.account_id,
                outcome = ?outcome,
                amount = %total,
                error = %e,
                "Reservation not settled; hold left in place"
            );
        }
    }

    fn watch_settlement(&self, tx: &Transaction) {
        let Some(custody_id) = tx.custody_transaction_id.clone() else {
            return;
        };
        let transaction_id = tx.id;
        let this = self.clone();

        self.settlements.spawn(transaction_id, async move {
            let outcome = match this.custody.wait_for_settlement(&custody_id).await {
                Ok(CustodyStatus::Completed) => SettlementOutcome::Confirmed,
                Ok(_) => SettlementOutcome::Failed,
                Err(e) => {
                    tracing::warn!(
                        transaction_id = %transaction_id,
                        custody_transaction_id = %custody_id,
                        error = %e,
                        "Settlement not observed; payment stays broadcasting"
                    );
                    return;
                }
            };

            if let Err(e) = this.finalize(transaction_id, outcome).await {
                tracing::error!(transaction_id = %transaction_id, error = %e, "Finalize failed");
            }
        });
    }

    /// Settles a broadcasting transaction: `complete` captures the
    /// reservation, `failed` releases it.
    pub async fn finalize(
        &self,
        transaction_id: Uuid,
        outcome: SettlementOutcome,
    ) -> Result<Transaction, PaymentError> {
        let guard = self.locks.acquire(transaction_id).await;
        let mut tx = self.load(transaction_id).await?;

        state_machine::finalize(&mut tx, outcome)?;
        self.repository.update(&tx).await?;
        self.settle_funds(&tx, outcome).await;

        tracing::info!(
            transaction_id = %tx.id,
            status = %tx.status,
            blockchain_reference = ?tx.blockchain_reference,
            "Payment settled"
        );
        self.publish(&tx, Some(progress_message(&tx)));
        drop(guard);

        self.locks.forget(transaction_id);
        Ok(tx)
    }

    /// Waits for the settlement watcher of `transaction_id`, if any, and
    /// returns the transaction as stored afterwards.
    pub async fn wait_for_settlement(&self, transaction_id: Uuid) -> Result<Transaction, PaymentError> {
        self.settlements.wait(&transaction_id).await;
        self.load(transaction_id).await
    }

    /// Outbound payments of `account_id` still waiting for this approver.
    pub async fn list_pending_for(
        &self,
        approver_id: &str,
        account_id: &str,
    ) -> Result<Vec<PendingPayment>, PaymentError> {
        self.member(approver_id, account_id).await?;

        let mut pending = Vec::new();
        for tx in self.repository.list_for_account(account_id).await? {
            if tx.kind != TransactionKind::Send || !tx.status.is_pending() {
                continue;
            }
            let approvals = self.ledger.list_approvals(tx.id).await?;
            if !has_signed(&approvals, approver_id) {
                pending.push(PendingPayment::from(&tx));
            }
        }
        Ok(pending)
    }

    /// Books money received by the account. Needs no signatures and is
    /// credited immediately. Only members of the account may record it.
    pub async fn record_incoming(
        &self,
        user_id: &str,
        request: IncomingPaymentRequest,
    ) -> Result<Transaction, PaymentError> {
        self.member(user_id, &request.account_id).await?;
        let account = self.accounts.get(&request.account_id).await?;

        let name = validation::sanitize_string(&request.sender.name);
        validation::validate_required("sender_name", &name)?;
        validation::validate_max_len("sender_name", &name, validation::RECIPIENT_NAME_MAX_LEN)?;
        let sender = Recipient {
            name,
            account: validation::sanitize_string(&request.sender.account),
        };

        let tx = state_machine::initiate(
            PaymentDraft {
                account_id: account.id.clone(),
                kind: TransactionKind::Receive,
                currency: request.currency,
                amount: request.amount,
                recipient: sender,
                references: request.references,
                service_fee: BigDecimal::zero(),
                network_fee: BigDecimal::zero(),
                initiated_by: account.id.clone(),
                custody_transaction_id: None,
            },
            0,
            &BigDecimal::zero(),
        )?;

        self.repository.insert(&tx).await?;
        self.accounts.credit(&tx.account_id, tx.currency, &tx.amount).await?;

        tracing::info!(
            transaction_id = %tx.id,
            account_id = %tx.account_id,
            currency = %tx.currency,
            amount = %tx.amount,
            "Incoming payment recorded"
        );
        self.publish(&tx, Some("Payment received".to_string()));
        Ok(tx)
    }

    pub async fn get_transaction(
        &self,
        user_id: &str,
        transaction_id: Uuid,
    ) -> Result<TransactionDetails, PaymentError> {
        let user = self.approver(user_id).await?;
        let transaction = self.load(transaction_id).await?;
        ensure_member(&user, &transaction.account_id)?;
        let approvals = self.ledger.list_approvals(transaction_id).await?;
        Ok(TransactionDetails {
            transaction,
            approvals,
        })
    }

    /// Vault descriptor, vault balances and the account's chain payments that
    /// have not settled yet.
    pub async fn wallet_status(
        &self,
        user_id: &str,
        account_id: &str,
    ) -> Result<WalletStatus, PaymentError> {
        self.member(user_id, account_id).await?;
        let account = self.accounts.get(account_id).await?;
        let vault_id = account
            .vault_id
            .ok_or_else(|| PaymentError::VaultNotFound(account.id.clone()))?;

        let vault = self.custody.get_vault(&vault_id).await?;
        let balances = self.custody.vault_balance(&vault_id).await?;
        let in_flight = self
            .repository
            .list_for_account(&account.id)
            .await?
            .iter()
            .filter(|tx| tx.currency.is_chain_settled() && !tx.status.is_terminal())
            .map(PendingPayment::from)
            .collect();

        Ok(WalletStatus {
            account_id: account.id,
            vault,
            balances,
            in_flight,
        })
    }

    /// Balances, pending count and the most recent transactions of an
    /// account, with the names of the approvers who signed each.
    pub async fn account_overview(
        &self,
        user_id: &str,
        account_id: &str,
    ) -> Result<AccountOverview, PaymentError> {
        self.member(user_id, account_id).await?;
        let account = self.accounts.get(account_id).await?;

        let mut balances = Vec::with_capacity(Currency::ALL.len());
        for currency in Currency::ALL {
            balances.push(CurrencyBalance {
                currency,
                available: self.accounts.available(&account.id, currency).await?,
            });
        }

        let transactions = self.repository.list_for_account(&account.id).await?;
        let pending_payments = transactions
            .iter()
            .filter(|tx| tx.kind == TransactionKind::Send && tx.status.is_pending())
            .count();

        let mut recent = Vec::with_capacity(RECENT_TRANSACTIONS);
        for tx in transactions.iter().take(RECENT_TRANSACTIONS) {
            let mut approved_by = Vec::new();
            for approval in self.ledger.list_approvals(tx.id).await? {
                let name = match self.identity.approver(&approval.approver_id).await {
                    Some(approver) => approver.name,
                    None => approval.approver_id,
                };
                approved_by.push(name);
            }
            recent.push(RecentTransaction {
                kind: tx.kind,
                payment: PendingPayment::from(tx),
                approved_by,
            });
        }

        Ok(AccountOverview {
            account_id: account.id,
            name: account.name,
            balances,
            pending_payments,
            recent,
        })
    }

    async fn approver(&self, approver_id: &str) -> Result<Approver, PaymentError> {
        self.identity
            .approver(approver_id)
            .await
            .ok_or_else(|| PaymentError::NotAuthorized(format!("unknown user {}", approver_id)))
    }

    /// The user exists and belongs to `account_id`.
    async fn member(&self, user_id: &str, account_id: &str) -> Result<Approver, PaymentError> {
        let user = self.approver(user_id).await?;
        ensure_member(&user, account_id)?;
        Ok(user)
    }

    async fn load(&self, transaction_id: Uuid) -> Result<Transaction, PaymentError> {
        self.repository.get(transaction_id).await.map_err(|e| match e {
            RepositoryError::NotFound(_) => PaymentError::TransactionNotFound(transaction_id),
            other => PaymentError::Repository(other),
        })
    }

    fn publish(&self, tx: &Transaction, message: Option<String>) {
        // No subscribers is fine.
        let _ = self.updates.send(PaymentStatusUpdate {
            transaction_id: tx.id,
            account_id: tx.account_id.clone(),
            status: tx.status,
            collected_signatures: tx.collected_signatures,
            required_signatures: tx.required_signatures,
            blockchain_reference: tx.blockchain_reference.clone(),
            timestamp: Utc::now(),
            message,
        });
    }
}

fn ensure_member(user: &Approver, account_id: &str) -> Result<(), PaymentError> {
    if user.account_id != account_id {
        return Err(PaymentError::NotAuthorized(format!(
            "{} is not a member of account {}",
            user.id, account_id
        )));
    }
    Ok(())
}

/// The approver may sign for `account_id`. Returns their key share.
fn authorize<'a>(approver: &'a Approver, account_id: &str) -> Result<&'a str, PaymentError> {
    ensure_member(approver, account_id)?;
    if !approver.can_approve {
        return Err(PaymentError::NotAuthorized(format!(
            "{} is not allowed to approve payments",
            approver.id
        )));
    }
    approver.key_share.as_deref().ok_or_else(|| {
        PaymentError::NotAuthorized(format!("{} holds no key share", approver.id))
    })
}

/// Custody signers that are neither recorded approvers nor `approver_id`.
fn unrecorded_signers(
    custody_tx: &CustodyTransaction,
    approvals: &[Approval],
    approver_id: &str,
) -> Vec<String> {
    custody_tx
        .signatures
        .iter()
        .map(|s| s.approver_id.as_str())
        .filter(|signer| *signer != approver_id && !has_signed(approvals, signer))
        .map(str::to_string)
        .collect()
}

fn already_signed(e: PaymentError) -> PaymentError {
    match e {
        PaymentError::DuplicateSignature {
            transaction_id,
            approver_id,
        } => PaymentError::AlreadySigned {
            transaction_id,
            approver_id,
        },
        other => other,
    }
}

fn progress_message(tx: &Transaction) -> String {
    match tx.status {
        TransactionStatus::PendingSignature(_) => format!(
            "Signature recorded ({}/{}); waiting for {} more",
            tx.collected_signatures,
            tx.required_signatures,
            tx.remaining_signatures()
        ),
        TransactionStatus::Broadcasting => {
            "Quorum reached; transfer broadcast and awaiting confirmation".to_string()
        }
        TransactionStatus::Complete => "Payment complete".to_string(),
        TransactionStatus::Failed => "Payment failed".to_string(),
    }
}

fn signature_receipt(tx: &Transaction, message: String) -> SignatureReceipt {
    SignatureReceipt {
        transaction_id: tx.id,
        status: tx.status,
        collected_signatures: tx.collected_signatures,
        required_signatures: tx.required_signatures,
        blockchain_reference: tx.blockchain_reference.clone(),
        message,
    }
}
