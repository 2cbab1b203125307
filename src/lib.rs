// Finance Tracker - Core Library
// Exposes all modules for use in CLI, API server, and tests

pub mod closure;
pub mod config;
pub mod db;
pub mod deduplication;
pub mod error;
pub mod export;
pub mod gateway;
pub mod import;
pub mod models;
pub mod parser;
pub mod reconciliation;
pub mod statistics;

#[cfg(feature = "server")]
pub mod api;

use std::sync::Once;

// Re-export commonly used types
pub use closure::{
    build_policy, ClosurePolicyKind, CloseMarkerPolicy, ElapsedMonthPolicy, MonthClosurePolicy,
};
pub use config::Settings;
pub use db::{setup_database, SqliteGateway};
pub use deduplication::{filter_already_imported, DedupOutcome};
pub use error::{FinanceError, Result};
pub use gateway::Gateway;
pub use import::{commit_import, preview_import, ImportPreview};
pub use models::{Category, NewRecord, Record, RecordPatch, User, Wallet, Window};
pub use parser::{
    get_parser, ImportDefaults, Mt940Parser, ParseOutcome, StatementFormat, StatementParser,
};
pub use reconciliation::{reconcile, ReconciliationReport, ReconciliationResult};
pub use statistics::{
    StatisticsQuery, StatisticsRequest, StatisticsResult, StatisticsType,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

static TRACING_INIT: Once = Once::new();

/// Install the global fmt subscriber. `RUST_LOG` overrides `default_filter`.
/// Safe to call more than once.
pub fn init_tracing(default_filter: &str) {
    TRACING_INIT.call_once(|| {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_filter));

        fmt().with_env_filter(filter).init();
    });
}
