// Persistence Gateway - the only door to stored records, wallets, categories and users
//
// Core logic (import, statistics) depends on this trait, never on SQLite.
// The single implementation lives in `db::SqliteGateway`.

use crate::error::Result;
use crate::models::{Category, NewRecord, Record, RecordPatch, User, Wallet, Window};

pub trait Gateway: Send + Sync {
    // ========================================================================
    // RECORDS
    // ========================================================================

    /// Owner's records inside `window`, newest first.
    fn list(&self, owner: &str, window: Window) -> Result<Vec<Record>>;

    /// Newest-first page of the owner's records.
    fn list_page(&self, owner: &str, from: u32, count: u32) -> Result<Vec<Record>>;

    /// Owner's records booked to one of their wallets, newest first.
    fn list_by_wallet(&self, owner: &str, wallet_id: i64) -> Result<Vec<Record>>;

    fn get(&self, owner: &str, id: i64) -> Result<Record>;

    /// Subset of `references` already stored for `owner`.
    fn existing_references(&self, owner: &str, references: &[String]) -> Result<Vec<String>>;

    fn create(&self, owner: &str, record: &NewRecord) -> Result<Record>;

    /// All-or-nothing insert. A duplicate external reference fails the whole
    /// batch with `Conflict`.
    fn create_many(&self, owner: &str, records: &[NewRecord]) -> Result<Vec<Record>>;

    fn update(&self, owner: &str, id: i64, patch: &RecordPatch) -> Result<Record>;

    fn delete(&self, owner: &str, id: i64) -> Result<()>;

    // ========================================================================
    // WALLETS & CATEGORIES
    // ========================================================================

    fn list_wallets(&self, owner: &str) -> Result<Vec<Wallet>>;

    fn create_wallet(&self, owner: &str, name: &str) -> Result<Wallet>;

    fn list_categories(&self, owner: &str) -> Result<Vec<Category>>;

    fn create_category(&self, owner: &str, name: &str) -> Result<Category>;

    // ========================================================================
    // USERS
    // ========================================================================

    fn create_user(&self, username: &str) -> Result<User>;

    fn get_user(&self, username: &str) -> Result<User>;

    // ========================================================================
    // MONTH CLOSE MARKERS
    // ========================================================================

    fn set_month_closed(&self, owner: &str, year: i32, month: u32, closed: bool) -> Result<()>;

    fn is_month_marked_closed(&self, owner: &str, year: i32, month: u32) -> Result<bool>;
}
