// Statement Parser - bank statement bytes → import candidates
//
// MT940 layout handled here:
//   :20: statement reference   :25: account       :28C: sequence
//   :60F:/:60M: opening        :62F:/:62M: closing
//   :61: one transaction line, followed by an optional :86: description
//        and untagged continuation lines
// Statements end at `-}` / `-` or at the next :20:.

use chrono::{Datelike, NaiveDate, NaiveTime, TimeZone, Utc};
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::error::{FinanceError, Result};
use crate::models::NewRecord;

// ============================================================================
// CORE TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementFormat {
    Mt940,
}

impl StatementFormat {
    /// Human-readable name for display
    pub fn name(&self) -> &str {
        match self {
            StatementFormat::Mt940 => "MT940",
        }
    }
}

impl FromStr for StatementFormat {
    type Err = FinanceError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "mt940" => Ok(StatementFormat::Mt940),
            other => Err(FinanceError::invalid(
                "format",
                format!("unsupported statement format '{other}'"),
            )),
        }
    }
}

/// Wallet and category every parsed candidate starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportDefaults {
    pub wallet_id: i64,
    pub category_id: i64,
}

/// Signed balance line (:60F:, :62F:).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub date: NaiveDate,
    pub amount: Decimal,
    pub currency: String,
}

/// Statement-level facts, used for balance reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedStatement {
    pub reference: Option<String>,
    pub account: Option<String>,
    pub sequence: Option<String>,
    pub opening: Option<Balance>,
    pub closing: Option<Balance>,
    /// Sum of every transaction whose amount could be read, kept or skipped.
    pub entries_total: Decimal,
    pub entry_count: usize,
}

impl ParsedStatement {
    fn has_content(&self) -> bool {
        self.reference.is_some()
            || self.account.is_some()
            || self.opening.is_some()
            || self.closing.is_some()
            || self.entry_count > 0
    }
}

/// A transaction group that was dropped, with the line it started on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedGroup {
    pub line: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParseOutcome {
    pub candidates: Vec<NewRecord>,
    pub statements: Vec<ParsedStatement>,
    pub skipped: Vec<SkippedGroup>,
}

/// StatementParser - one implementation per interchange format.
pub trait StatementParser: Send + Sync {
    /// Parse a whole file. Only an unreadable file is an error; bad
    /// transaction groups land in `ParseOutcome::skipped`.
    fn parse(&self, bytes: &[u8], defaults: ImportDefaults) -> Result<ParseOutcome>;

    fn format(&self) -> StatementFormat;

    /// Parser version (for provenance in logs)
    fn version(&self) -> &str {
        "1.0.0"
    }
}

pub fn get_parser(format: StatementFormat) -> Box<dyn StatementParser> {
    match format {
        StatementFormat::Mt940 => Box::new(Mt940Parser),
    }
}

// ============================================================================
// DATE & AMOUNT HELPERS
// ============================================================================

/// YYMMDD with a fixed century pivot: 00–69 → 20YY, 70–99 → 19YY.
pub fn expand_yymmdd(raw: &str) -> Option<NaiveDate> {
    if raw.len() != 6 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let yy: i32 = raw[0..2].parse().ok()?;
    let month: u32 = raw[2..4].parse().ok()?;
    let day: u32 = raw[4..6].parse().ok()?;
    let year = if yy <= 69 { 2000 + yy } else { 1900 + yy };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// MMDD entry date next to a value date; crosses the year boundary when the
/// two dates sit on opposite sides of New Year.
fn entry_date(value_date: NaiveDate, mmdd: &str) -> Option<NaiveDate> {
    let month: u32 = mmdd.get(0..2)?.parse().ok()?;
    let day: u32 = mmdd.get(2..4)?.parse().ok()?;
    let year = match (value_date.month(), month) {
        (12, 1) => value_date.year() + 1,
        (1, 12) => value_date.year() - 1,
        _ => value_date.year(),
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// MT940 amounts carry at most 15 characters including the comma.
const MAX_AMOUNT_DIGITS: usize = 15;

/// "1234,5" → 1234.5 (MT940 uses a comma and may omit decimals).
fn parse_amount(raw: &str) -> Option<Decimal> {
    if raw.chars().filter(char::is_ascii_digit).count() > MAX_AMOUNT_DIGITS {
        return None;
    }
    let normalized = raw.replace(',', ".");
    let normalized = normalized.trim_end_matches('.');
    if normalized.is_empty() {
        return None;
    }
    Decimal::from_str(normalized).ok()
}

/// D/C + YYMMDD + currency + amount
fn parse_balance(value: &str) -> std::result::Result<Balance, String> {
    let value = value.trim();
    if value.len() < 11 || !value.is_char_boundary(1) {
        return Err(format!("balance too short: '{value}'"));
    }
    let (mark, rest) = value.split_at(1);
    let date = rest
        .get(0..6)
        .and_then(expand_yymmdd)
        .ok_or_else(|| format!("bad balance date in '{value}'"))?;
    let currency = rest
        .get(6..9)
        .ok_or_else(|| format!("missing currency in '{value}'"))?;
    let amount = rest
        .get(9..)
        .and_then(parse_amount)
        .ok_or_else(|| format!("bad balance amount in '{value}'"))?;

    let amount = match mark {
        "C" => amount,
        "D" => -amount,
        other => return Err(format!("bad balance mark '{other}'")),
    };
    Ok(Balance {
        date,
        amount,
        currency: currency.to_string(),
    })
}

fn decode(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        // Latin-1: every byte maps to the code point of the same value
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}

// ============================================================================
// :61: LINE
// ============================================================================

fn line_61_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"^(?P<val>\d{6})(?P<book>\d{4})?(?P<mark>RC|RD|C|D)(?P<funds>[A-Z])?(?P<amt>\d{1,15},\d{0,2})(?P<code>[NSF][A-Z0-9]{3})(?P<rest>.*)$",
        )
        .expect("static :61: pattern compiles")
    })
}

#[derive(Debug, Clone, PartialEq)]
struct Line61 {
    value_date: String,
    entry_date: Option<String>,
    mark: String,
    amount: String,
    customer_reference: String,
    bank_reference: String,
}

fn split_61(value: &str) -> std::result::Result<Line61, String> {
    let caps = line_61_regex()
        .captures(value.trim())
        .ok_or_else(|| format!("unrecognised :61: layout '{}'", value.trim()))?;

    let rest = caps.name("rest").map(|m| m.as_str()).unwrap_or_default();
    let (customer, bank) = match rest.split_once("//") {
        Some((customer, bank)) => (customer, bank),
        None => (rest, ""),
    };

    Ok(Line61 {
        value_date: caps["val"].to_string(),
        entry_date: caps.name("book").map(|m| m.as_str().to_string()),
        mark: caps["mark"].to_string(),
        amount: caps["amt"].to_string(),
        customer_reference: customer.trim().to_string(),
        bank_reference: bank.trim().to_string(),
    })
}

// ============================================================================
// :86: DESCRIPTION
// ============================================================================

/// Structured :86: starts with a 3-digit business code and uses `?NN` subfields.
fn is_structured(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() > 4 && bytes[..3].iter().all(u8::is_ascii_digit) && bytes[3] == b'?'
}

fn structured_subfields(text: &str) -> Vec<(u32, String)> {
    let mut fields: Vec<(u32, String)> = Vec::new();
    let mut rest = text;
    while let Some(pos) = rest.find('?') {
        let after = &rest[pos + 1..];
        let code = after.get(0..2).and_then(|c| c.parse::<u32>().ok());
        match code {
            Some(code) => {
                let body = &after[2..];
                let end = body.find('?').unwrap_or(body.len());
                fields.push((code, body[..end].to_string()));
                rest = &body[end..];
            }
            None => rest = after,
        }
    }
    fields
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn describe(info: &[String]) -> String {
    if info.is_empty() {
        return String::new();
    }

    // Subfields wrap at arbitrary points, so rejoin lines before splitting
    let joined: String = info.concat();
    if is_structured(&joined) {
        let fields = structured_subfields(&joined);
        let purpose: String = fields
            .iter()
            .filter(|(code, _)| (20..=29).contains(code) || (60..=63).contains(code))
            .map(|(_, text)| text.as_str())
            .collect();
        let counterparty: String = fields
            .iter()
            .filter(|(code, _)| *code == 32 || *code == 33)
            .map(|(_, text)| text.as_str())
            .collect();
        return collapse_whitespace(&format!("{purpose} {counterparty}"));
    }

    collapse_whitespace(&info.join(" "))
}

// ============================================================================
// MT940 PARSER
// ============================================================================

pub struct Mt940Parser;

/// One :61: line and what follows it until the next tag.
#[derive(Debug, Default)]
struct PendingGroup {
    line: usize,
    raw_61: String,
    supplementary: Vec<String>,
    info: Vec<String>,
    in_86: bool,
}

#[derive(Default)]
struct ParseState {
    outcome: ParseOutcome,
    statement: ParsedStatement,
    group: Option<PendingGroup>,
    saw_content: bool,
    /// Occurrences of each reference tuple, so identical rows stay distinct
    ordinals: HashMap<String, u32>,
}

impl ParseState {
    fn flush_group(&mut self, defaults: ImportDefaults) {
        let Some(group) = self.group.take() else {
            return;
        };
        match self.build_candidate(&group, defaults) {
            Ok(candidate) => self.outcome.candidates.push(candidate),
            Err(reason) => {
                warn!(line = group.line, %reason, "skipping statement entry");
                self.outcome.skipped.push(SkippedGroup {
                    line: group.line,
                    reason,
                });
            }
        }
    }

    fn finish_statement(&mut self, defaults: ImportDefaults) {
        self.flush_group(defaults);
        let statement = std::mem::take(&mut self.statement);
        if statement.has_content() {
            self.outcome.statements.push(statement);
        }
    }

    fn build_candidate(
        &mut self,
        group: &PendingGroup,
        defaults: ImportDefaults,
    ) -> std::result::Result<NewRecord, String> {
        let line = split_61(&group.raw_61)?;

        let value_date = expand_yymmdd(&line.value_date)
            .ok_or_else(|| format!("invalid value date '{}'", line.value_date))?;
        let booking_date = match &line.entry_date {
            Some(mmdd) => entry_date(value_date, mmdd)
                .ok_or_else(|| format!("invalid entry date '{mmdd}'"))?,
            None => value_date,
        };
        let magnitude = parse_amount(&line.amount)
            .ok_or_else(|| format!("invalid amount '{}'", line.amount))?;
        let value = match line.mark.as_str() {
            "D" | "RC" => -magnitude,
            _ => magnitude,
        };

        // The amount is known from here on, so the entry counts toward the balance
        self.statement.entries_total = self
            .statement
            .entries_total
            .checked_add(value)
            .ok_or_else(|| "statement total overflows".to_string())?;
        self.statement.entry_count += 1;

        let external_reference = self.reference_for(&line);

        let mut description = describe(&group.info);
        if description.is_empty() {
            description = collapse_whitespace(&group.supplementary.join(" "));
        }
        if description.is_empty() && line.customer_reference != "NONREF" {
            description = line.customer_reference.clone();
        }
        if description.is_empty() {
            return Err("missing description".to_string());
        }

        Ok(NewRecord {
            description,
            value,
            timestamp: Utc.from_utc_datetime(&booking_date.and_time(NaiveTime::MIN)),
            wallet_id: defaults.wallet_id,
            category_id: defaults.category_id,
            external_reference: Some(external_reference),
        })
    }

    fn reference_for(&mut self, line: &Line61) -> String {
        let key = format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.statement.account.as_deref().unwrap_or_default(),
            self.statement.reference.as_deref().unwrap_or_default(),
            line.value_date,
            line.entry_date.as_deref().unwrap_or_default(),
            line.mark,
            line.amount,
            line.customer_reference,
            line.bank_reference,
        );
        let ordinal = self.ordinals.entry(key.clone()).or_insert(0);
        *ordinal += 1;

        let mut hasher = Sha256::new();
        hasher.update(format!("{key}|{ordinal}"));
        format!("{:x}", hasher.finalize())
    }
}

/// Split `:TAG:value`; `None` when the line is not a tag line.
fn split_tag(line: &str) -> Option<(&str, &str)> {
    let body = line.strip_prefix(':')?;
    let end = body.find(':')?;
    let tag = &body[..end];
    if tag.is_empty() || tag.len() > 3 || !tag.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    Some((tag, &body[end + 1..]))
}

impl StatementParser for Mt940Parser {
    fn parse(&self, bytes: &[u8], defaults: ImportDefaults) -> Result<ParseOutcome> {
        let text = decode(bytes);
        let mut state = ParseState::default();

        for (index, raw_line) in text.lines().enumerate() {
            let line_no = index + 1;
            let mut line = raw_line.trim_end_matches('\r');

            // SWIFT envelope: only the text block {4: carries statement data
            if line.starts_with('{') {
                match line.find("{4:") {
                    Some(pos) => line = &line[pos + 3..],
                    None => continue,
                }
            }

            let trimmed = line.trim();
            if trimmed == "-" || trimmed.starts_with("-}") {
                state.finish_statement(defaults);
                continue;
            }
            if trimmed.is_empty() {
                continue;
            }

            let Some((tag, value)) = split_tag(trimmed) else {
                // Continuation of the current transaction
                if let Some(group) = state.group.as_mut() {
                    if group.in_86 {
                        group.info.push(trimmed.to_string());
                    } else {
                        group.supplementary.push(trimmed.to_string());
                    }
                }
                continue;
            };

            match tag {
                "20" => {
                    state.finish_statement(defaults);
                    state.statement.reference = Some(value.trim().to_string());
                    state.saw_content = true;
                }
                "25" => {
                    state.flush_group(defaults);
                    state.statement.account = Some(value.trim().to_string());
                    state.saw_content = true;
                }
                "28" | "28C" => {
                    state.flush_group(defaults);
                    state.statement.sequence = Some(value.trim().to_string());
                }
                "60F" | "60M" => {
                    state.flush_group(defaults);
                    match parse_balance(value) {
                        Ok(balance) => state.statement.opening = Some(balance),
                        Err(reason) => warn!(line = line_no, %reason, "ignoring opening balance"),
                    }
                }
                "62F" | "62M" => {
                    state.flush_group(defaults);
                    match parse_balance(value) {
                        Ok(balance) => state.statement.closing = Some(balance),
                        Err(reason) => warn!(line = line_no, %reason, "ignoring closing balance"),
                    }
                }
                "61" => {
                    state.flush_group(defaults);
                    state.saw_content = true;
                    state.group = Some(PendingGroup {
                        line: line_no,
                        raw_61: value.to_string(),
                        ..PendingGroup::default()
                    });
                }
                "86" => {
                    let attaches = matches!(
                        state.group.as_ref(),
                        Some(group) if !group.in_86 && group.info.is_empty()
                    );
                    if !attaches {
                        // Statement-level information; not part of any entry
                        state.flush_group(defaults);
                    } else if let Some(group) = state.group.as_mut() {
                        group.info.push(value.trim().to_string());
                        group.in_86 = true;
                    }
                }
                other => {
                    state.flush_group(defaults);
                    debug!(line = line_no, tag = other, "ignoring tag");
                }
            }
        }

        state.finish_statement(defaults);

        if !state.saw_content {
            return Err(FinanceError::Parse(
                "no MT940 statement content found".to_string(),
            ));
        }

        debug!(
            parser = self.version(),
            candidates = state.outcome.candidates.len(),
            skipped = state.outcome.skipped.len(),
            "statement parsed"
        );
        Ok(state.outcome)
    }

    fn format(&self) -> StatementFormat {
        StatementFormat::Mt940
    }
}
