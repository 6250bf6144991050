//! CLI command definitions.

use clap::{Parser, Subcommand};

/// Inspect and maintain saved travel plans.
#[derive(Debug, Parser)]
#[command(name = "planvault")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Saved-plan table name.
    #[arg(long, env = "PLANVAULT_SAVED_PLANS_TABLE")]
    pub table: Option<String>,

    /// Custom endpoint URL, e.g. for local DynamoDB.
    #[arg(long, env = "AWS_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,

    /// Print compact JSON instead of pretty JSON.
    #[arg(long)]
    pub compact: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Save a travel plan for a user. Fails if it is already saved.
    Save {
        user_id: String,
        plan_id: String,
        /// Free-form notes.
        #[arg(long)]
        notes: Option<String>,
        /// Mark as favourite.
        #[arg(long)]
        favorite: bool,
        /// Do not notify the user about changes to the plan.
        #[arg(long)]
        no_notifications: bool,
    },
    /// Show the association between a user and a travel plan.
    Get { user_id: String, plan_id: String },
    /// List a user's saved plans.
    List {
        user_id: String,
        /// Zero-based page number.
        #[arg(long, default_value_t = 0)]
        page: usize,
        /// Page size.
        #[arg(long, default_value_t = 20)]
        size: usize,
    },
    /// Count saved plans for a user, or in the whole table (full scan).
    Count { user_id: Option<String> },
    /// Remove a travel plan from a user's saved plans.
    Remove { user_id: String, plan_id: String },
    /// Remove every saved plan of a user.
    PurgeUser { user_id: String },
    /// Remove every reference to a travel plan (full scan).
    PurgePlan { plan_id: String },
    /// Create the saved-plan table if it does not exist.
    CreateTable,
}
