//! planvault CLI entry point.

mod cli;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use planvault::repository::{BaseRepository, SavedPlanKeys, SavedPlanRepository};
use planvault::storage::dynamodb::{AwsConfig, DynamoDbStore};
use planvault::Config;
use planvault_core::metrics::OperationMetrics;
use planvault_core::saved_plan::{table_schema, SavedPlan};
use planvault_core::storage::PageRequest;
use serde::Serialize;
use serde_json::json;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "planvault=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let mut config = Config::from_env();
    if let Some(table) = cli.table {
        config.saved_plans_table = table;
    }
    if cli.endpoint_url.is_some() {
        config.endpoint_url = cli.endpoint_url;
    }

    let aws = AwsConfig::from(&config);
    tracing::info!(
        store = %aws.target_display(),
        table = %config.saved_plans_table,
        "Connecting"
    );
    let store = DynamoDbStore::connect(&aws).await;

    let schema = table_schema(config.saved_plans_table.as_str());
    if config.create_tables || matches!(cli.command, Commands::CreateTable) {
        let created = store.ensure_table(&schema).await?;
        if created {
            tracing::info!(table = %schema.table_name, "Created table");
        }
        if matches!(cli.command, Commands::CreateTable) {
            return print(
                &json!({ "table": schema.table_name, "created": created }),
                cli.compact,
            );
        }
    }

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let metrics = Arc::new(OperationMetrics::new());
    let repository = SavedPlanRepository::from_base(
        BaseRepository::new(
            Arc::new(store),
            config.saved_plans_table.as_str(),
            SavedPlanKeys,
            metrics.clone(),
        )
        .with_retry_policy(config.retry_policy())
        .with_batch_limits(config.batch_limits())
        .with_read_consistency(config.read_consistency())
        .with_cancellation(cancel),
    );

    let result = run(&repository, cli.command, cli.compact).await;
    metrics.log_summary();
    result
}

async fn run(repository: &SavedPlanRepository, command: Commands, compact: bool) -> Result<()> {
    match command {
        Commands::Save {
            user_id,
            plan_id,
            notes,
            favorite,
            no_notifications,
        } => {
            let mut plan = SavedPlan::new(user_id, plan_id)
                .with_favorite(favorite)
                .with_notifications(!no_notifications);
            if let Some(notes) = notes {
                plan = plan.with_notes(notes);
            }
            let plan = repository.create(plan).await?;
            print(&plan, compact)
        }
        Commands::Get { user_id, plan_id } => {
            let plan = repository
                .find_by_owner_and_target(&user_id, &plan_id)
                .await?;
            print(&plan, compact)
        }
        Commands::List {
            user_id,
            page,
            size,
        } => {
            let page = repository
                .find_by_owner(&user_id, PageRequest::new(page, size))
                .await?;
            print(&page, compact)
        }
        Commands::Count { user_id } => {
            let count = match &user_id {
                Some(user_id) => repository.count_by_owner(user_id).await?,
                None => repository.count().await?,
            };
            print(&json!({ "userId": user_id, "count": count }), compact)
        }
        Commands::Remove { user_id, plan_id } => {
            let removed = repository
                .delete_by_owner_and_target(&user_id, &plan_id)
                .await?;
            print(&json!({ "removed": removed }), compact)
        }
        Commands::PurgeUser { user_id } => {
            let removed = repository.delete_all_by_owner(&user_id).await?;
            print(&json!({ "userId": user_id, "removed": removed }), compact)
        }
        Commands::PurgePlan { plan_id } => {
            let removed = repository.delete_all_by_target(&plan_id).await?;
            print(&json!({ "travelPlanId": plan_id, "removed": removed }), compact)
        }
        // Handled before the repository is built.
        Commands::CreateTable => Ok(()),
    }
}

fn print<T: Serialize>(value: &T, compact: bool) -> Result<()> {
    let output = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    println!("{}", output);
    Ok(())
}

/// Cancels in-flight store calls and backoffs on Ctrl+C.
async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    if let Err(e) = signal::ctrl_c().await {
        tracing::error!("Failed to install Ctrl+C handler: {}", e);
        return;
    }
    tracing::info!("Received Ctrl+C, cancelling");
    cancel.cancel();
}
