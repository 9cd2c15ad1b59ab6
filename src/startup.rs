//! Wires configuration into a running `AppState`.

use anyhow::{Context, Result};
use bigdecimal::BigDecimal;
use rand::RngCore;
use std::sync::Arc;

use crate::adapters::{InMemoryDirectory, InMemoryPaymentRepository, PostgresPaymentRepository};
use crate::config::Config;
use crate::custody::{Asset, CustodyClient, CustodyService, SimulatedCustody};
use crate::domain::Currency;
use crate::ports::{Approver, FundingAccount, PaymentRepository};
use crate::services::AuthorizationOrchestrator;
use crate::AppState;

pub const DEMO_ACCOUNT_ID: &str = "acct_demo";
pub const DEMO_COMPANY_ID: &str = "company_demo";
pub const DEMO_APPROVERS: [(&str, &str); 3] = [
    ("user_ana", "Ana Ribeiro"),
    ("user_bruno", "Bruno Tavares"),
    ("user_carla", "Carla Mendes"),
];

/// Everything `main` needs to serve and later shut down.
pub struct Services {
    pub state: AppState,
    pub simulator: Arc<SimulatedCustody>,
    pub directory: Arc<InMemoryDirectory>,
}

impl Services {
    pub fn shutdown(&self) {
        self.state.orchestrator.shutdown();
        self.simulator.shutdown();
    }
}

pub async fn build(config: &Config) -> Result<Services> {
    let repository: Arc<dyn PaymentRepository> = match config.database_url.as_deref() {
        Some(url) => {
            let pool = crate::db::create_pool(url)
                .await
                .context("connecting to DATABASE_URL")?;
            crate::db::run_migrations(&pool).await?;
            tracing::info!("Payments persist in Postgres");
            Arc::new(PostgresPaymentRepository::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set; payments are kept in memory");
            Arc::new(InMemoryPaymentRepository::new())
        }
    };

    let simulator = Arc::new(SimulatedCustody::new(config.simulator()));
    let custody = CustodyClient::with_circuit_breaker(
        simulator.clone(),
        config.custody_timeout(),
        config.custody_failure_threshold,
        config.custody_reset_timeout_secs,
    )
    .with_settlement_timeout(config.settlement_timeout());

    let directory = Arc::new(InMemoryDirectory::new());
    if config.seed_demo_data {
        seed_demo(&directory, &custody).await?;
    }

    let orchestrator = AuthorizationOrchestrator::new(
        repository,
        directory.clone(),
        directory.clone(),
        Arc::new(custody.clone()),
        config.policy(),
    );

    Ok(Services {
        state: AppState {
            orchestrator,
            custody,
        },
        simulator,
        directory,
    })
}

/// One company with a payment account, a custody vault funded to match the
/// USD balance, and three approvers.
pub async fn seed_demo(directory: &InMemoryDirectory, custody: &dyn CustodyService) -> Result<()> {
    let usd_balance = BigDecimal::from(125_000);
    let vault = custody
        .create_vault(DEMO_COMPANY_ID)
        .await
        .context("creating demo vault")?;
    custody
        .deposit(&vault.id, Asset::Usdc, usd_balance.clone())
        .await
        .context("funding demo vault")?;

    directory
        .add_account(
            FundingAccount {
                id: DEMO_ACCOUNT_ID.to_string(),
                name: "Logcomex Comercio Exterior".to_string(),
                vault_id: Some(vault.id.clone()),
            },
            &[
                (Currency::Brl, BigDecimal::from(850_000)),
                (Currency::Usd, usd_balance),
            ],
        )
        .await;

    for (id, name) in DEMO_APPROVERS {
        directory
            .add_approver(Approver {
                id: id.to_string(),
                name: name.to_string(),
                account_id: DEMO_ACCOUNT_ID.to_string(),
                can_approve: true,
                key_share: Some(key_share()),
            })
            .await;
    }

    tracing::info!(
        account_id = DEMO_ACCOUNT_ID,
        vault_id = %vault.id,
        vault_address = %vault.address,
        approvers = DEMO_APPROVERS.len(),
        "Demo data seeded"
    );
    Ok(())
}

fn key_share() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("ks_{}", hex::encode(bytes))
}
