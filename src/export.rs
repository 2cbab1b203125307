// CSV export of a user's records

use serde::Serialize;
use std::io::Write;

use crate::error::{FinanceError, Result};
use crate::models::{format_timestamp, Record};

#[derive(Serialize)]
struct CsvRow<'a> {
    id: i64,
    timestamp: String,
    description: &'a str,
    value: String,
    wallet_id: i64,
    category_id: i64,
    external_reference: &'a str,
}

pub fn write_csv<W: Write>(records: &[Record], writer: W) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for record in records {
        wtr.serialize(CsvRow {
            id: record.id,
            timestamp: format_timestamp(&record.timestamp),
            description: &record.description,
            value: record.value.to_string(),
            wallet_id: record.wallet_id,
            category_id: record.category_id,
            external_reference: record.external_reference.as_deref().unwrap_or_default(),
        })?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn to_csv_string(records: &[Record]) -> Result<String> {
    let mut buffer = Vec::new();
    write_csv(records, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| FinanceError::Internal(e.to_string()))
}
