// Statement import: parse → drop already-imported → reconcile → preview.
// Commit is a separate step, after the user has reviewed and edited the preview.

use serde::Serialize;
use tracing::info;

use crate::deduplication::filter_already_imported;
use crate::error::{FinanceError, Result};
use crate::gateway::Gateway;
use crate::models::{NewRecord, Record};
use crate::parser::{get_parser, ImportDefaults, SkippedGroup, StatementFormat};
use crate::reconciliation::{reconcile_all, ReconciliationReport};

/// Not-yet-persisted candidates returned for review.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportPreview {
    pub records: Vec<NewRecord>,
    pub already_imported: usize,
    pub skipped: Vec<SkippedGroup>,
    pub reconciliation: Vec<ReconciliationReport>,
}

fn ensure_defaults_owned(gateway: &dyn Gateway, owner: &str, defaults: ImportDefaults) -> Result<()> {
    if !gateway
        .list_wallets(owner)?
        .iter()
        .any(|w| w.id == defaults.wallet_id)
    {
        return Err(FinanceError::not_found("wallet", defaults.wallet_id));
    }
    if !gateway
        .list_categories(owner)?
        .iter()
        .any(|c| c.id == defaults.category_id)
    {
        return Err(FinanceError::not_found("category", defaults.category_id));
    }
    Ok(())
}

pub fn preview_import(
    gateway: &dyn Gateway,
    owner: &str,
    format: StatementFormat,
    bytes: &[u8],
    defaults: ImportDefaults,
) -> Result<ImportPreview> {
    ensure_defaults_owned(gateway, owner, defaults)?;

    let parser = get_parser(format);
    let outcome = parser.parse(bytes, defaults)?;
    let parsed = outcome.candidates.len();

    let dedup = filter_already_imported(outcome.candidates, |references| {
        gateway.existing_references(owner, references)
    })?;

    let reconciliation = reconcile_all(&outcome.statements);

    info!(
        owner,
        format = format.name(),
        parsed,
        fresh = dedup.fresh.len(),
        already_imported = dedup.already_imported,
        skipped = outcome.skipped.len(),
        balanced = reconciliation.iter().filter(|r| r.result.is_balanced()).count(),
        "import preview ready"
    );

    Ok(ImportPreview {
        records: dedup.fresh,
        already_imported: dedup.already_imported,
        skipped: outcome.skipped,
        reconciliation,
    })
}

/// Persist reviewed candidates. Any reference imported meanwhile fails the
/// whole batch with `Conflict`; nothing is retried.
pub fn commit_import(gateway: &dyn Gateway, owner: &str, records: &[NewRecord]) -> Result<Vec<Record>> {
    if records.is_empty() {
        return Ok(Vec::new());
    }
    let created = gateway.create_many(owner, records)?;
    info!(owner, committed = created.len(), "import committed");
    Ok(created)
}
