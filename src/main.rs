use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use finance_tracker::{
    build_policy, commit_import, init_tracing, preview_import, statistics, Gateway, ImportDefaults,
    Settings, SqliteGateway, StatementFormat, StatisticsQuery,
};

#[derive(Parser, Debug)]
#[command(name = "finance-tracker", version, about = "Personal finance ledger")]
struct Cli {
    /// JSON settings file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database file, overrides settings
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Preview an MT940 statement import, or persist it with --commit
    Import {
        file: PathBuf,

        #[arg(long)]
        owner: String,

        /// Wallet assigned to every imported record
        #[arg(long)]
        wallet: i64,

        /// Category assigned to every imported record
        #[arg(long)]
        category: i64,

        #[arg(long)]
        commit: bool,
    },

    /// Print a statistics envelope as JSON
    Stats {
        #[arg(long)]
        owner: String,

        /// DAILY, MONTHLY, CATEGORY_MONTHLY or MONTH_STATUS
        #[arg(long = "type")]
        kind: String,

        #[arg(long)]
        month: Option<String>,

        #[arg(long)]
        year: Option<String>,
    },

    /// Create a user
    InitUser { username: String },

    /// Create a wallet for an existing user
    AddWallet {
        name: String,

        #[arg(long)]
        owner: String,
    },

    /// Create a category for an existing user
    AddCategory {
        name: String,

        #[arg(long)]
        owner: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }
    init_tracing(&settings.log_filter);

    let gateway: Arc<dyn Gateway> = Arc::new(
        SqliteGateway::open(&settings.db_path)
            .with_context(|| format!("Failed to open database {}", settings.db_path.display()))?,
    );

    match cli.command {
        Command::Import {
            file,
            owner,
            wallet,
            category,
            commit,
        } => {
            if !file.exists() {
                bail!("Statement not found: {}", file.display());
            }
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let defaults = ImportDefaults {
                wallet_id: wallet,
                category_id: category,
            };

            let preview = preview_import(gateway.as_ref(), &owner, StatementFormat::Mt940, &bytes, defaults)?;
            for report in &preview.reconciliation {
                println!("{}", report.summary());
            }
            for skipped in &preview.skipped {
                println!("skipped line {}: {}", skipped.line, skipped.reason);
            }
            println!(
                "{} new record(s), {} already imported",
                preview.records.len(),
                preview.already_imported
            );

            if commit {
                let created = commit_import(gateway.as_ref(), &owner, &preview.records)?;
                println!("Committed {} record(s)", created.len());
            } else {
                println!("{}", serde_json::to_string_pretty(&preview.records)?);
            }
        }

        Command::Stats {
            owner,
            kind,
            month,
            year,
        } => {
            let request = StatisticsQuery {
                kind: Some(kind),
                month,
                year,
            }
            .validate()?;
            let policy = build_policy(settings.closure_policy, Arc::clone(&gateway));
            let result = statistics::compute(gateway.as_ref(), policy.as_ref(), &owner, request)?;
            println!("{}", serde_json::to_string_pretty(&result)?);
        }

        Command::InitUser { username } => {
            let user = gateway.create_user(&username)?;
            println!("Created user '{}'", user.username);
        }

        Command::AddWallet { name, owner } => {
            let wallet = gateway.create_wallet(&owner, &name)?;
            println!("Created wallet '{}' with id {}", wallet.name, wallet.id);
        }

        Command::AddCategory { name, owner } => {
            let category = gateway.create_category(&owner, &name)?;
            println!("Created category '{}' with id {}", category.name, category.id);
        }
    }

    Ok(())
}
