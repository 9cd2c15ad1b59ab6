use clap::{Parser, Subcommand};

use crate::config::Config;

#[derive(Parser)]
#[command(name = "quorum-pay")]
#[command(about = "Quorum Pay - multi-signature payment authorization engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Print the validated configuration
    Config,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let Some(database_url) = config.database_url.as_deref() else {
        anyhow::bail!("DATABASE_URL is not set; payments are kept in memory");
    };

    let pool = crate::db::create_pool(database_url).await?;
    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    println!("✓ Database migrations completed");
    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");
    config.validate()?;

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    match &config.database_url {
        Some(url) => println!("  Database URL: {}", mask_password(url)),
        None => println!("  Database URL: (unset, in-memory storage)"),
    }
    println!("  Required Signatures: {}", config.required_signatures);
    println!("  Service Fee: {} bps", config.service_fee_bps);
    println!("  Custody Timeout: {} ms", config.custody_timeout_ms);
    println!(
        "  Custody Latency: {} ms (+{} ms jitter)",
        config.custody_latency_ms, config.custody_latency_jitter_ms
    );
    println!(
        "  Confirmation Delay: {} s",
        config.custody_confirmation_delay_secs
    );
    println!(
        "  Circuit Breaker: {} failures, {} s reset",
        config.custody_failure_threshold, config.custody_reset_timeout_secs
    );
    println!("  Settlement Timeout: {} s", config.settlement_timeout_secs);
    println!("  Seed Demo Data: {}", config.seed_demo_data);
    println!("  Log Format: {:?}", config.log_format);

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}
