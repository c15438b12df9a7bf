//! FleetHub Background Worker
//!
//! Runs scheduled housekeeping jobs, currently:
//! - Trial lifecycle sweep (hourly by default): suspends or migrates the
//!   trial projects of teams whose trial window has closed

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use fleethub_billing::{
    BillingService, PostgresStore, StripeClient, StripeGateway, TrialHousekeeper,
};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Default sweep schedule: hourly at minute 5
const DEFAULT_TRIAL_SWEEP_SCHEDULE: &str = "0 5 * * * *";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    dotenvy::dotenv().ok();

    info!("Starting FleetHub worker");

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = fleethub_shared::db::create_pool(&database_url).await?;
    info!("Database pool created");

    let stripe = match StripeClient::from_env() {
        Ok(client) => client,
        Err(err) => {
            // Without Stripe there is nothing to reconcile; stay alive so
            // deployments keep a healthy process
            warn!(error = %err, "Stripe is not configured - worker idle");
            loop {
                tokio::time::sleep(Duration::from_secs(60)).await;
                info!("Worker heartbeat (billing disabled)");
            }
        }
    };

    let config = stripe.config().clone();
    let billing = BillingService::new(
        PostgresStore::new(pool.clone()),
        StripeGateway::new(stripe),
        config,
    );
    let housekeeper = Arc::new(TrialHousekeeper::new(billing));

    let scheduler = JobScheduler::new().await?;

    let schedule = std::env::var("TRIAL_SWEEP_SCHEDULE")
        .unwrap_or_else(|_| DEFAULT_TRIAL_SWEEP_SCHEDULE.to_string());

    let sweeper = housekeeper.clone();
    scheduler
        .add(Job::new_async(schedule.as_str(), move |_uuid, _lock| {
            let housekeeper = sweeper.clone();
            Box::pin(async move {
                info!("Running trial lifecycle sweep");
                if let Err(err) = housekeeper.run().await {
                    error!(error = %err, "Trial sweep failed");
                }
            })
        })?)
        .await?;

    scheduler.start().await?;
    info!(schedule = %schedule, "Worker started");

    tokio::signal::ctrl_c().await?;
    info!("Shutting down worker");
    Ok(())
}
