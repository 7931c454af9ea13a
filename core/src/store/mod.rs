//! SQLite persistence layer.
//!
//! RULE: Only store/ talks to the database.
//! Components call store methods; they never execute SQL directly.
//!
//! Every multi-statement mutation runs inside `immediate()`, which takes the
//! database write lock up front. Writers therefore serialize at the store,
//! and balance changes are SQL increments, never read-modify-write.

use crate::{
    error::{DuesError, DuesResult},
    event::{DuesEvent, EventLogEntry},
    types::{
        Amount, AmountMode, ChurchId, DueAmountPolicy, DueId, EntityKind, EntityRef, ObligationId,
        ObligationKind, PaymentMethod, TargetScope, TargetType, TransactionId, TransactionKind,
    },
};
use chrono::{DateTime, Utc};
use rusqlite::{
    params,
    types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef},
    Connection, Transaction, TransactionBehavior,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod contributor;
mod due;
mod obligation;
mod population;
mod transaction;
mod wallet;

const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_millis(5_000);

pub struct DuesStore {
    conn: Connection,
    path: Option<String>, // None for :memory:, Some(path) for file
    busy_timeout: Duration,
}

impl DuesStore {
    pub fn open(path: &str) -> DuesResult<Self> {
        Self::open_with_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open (or create) a file database. Concurrent writers wait up to
    /// `busy_timeout` for the write lock before failing with SQLITE_BUSY.
    pub fn open_with_timeout(path: &str, busy_timeout: Duration) -> DuesResult<Self> {
        if path == ":memory:" {
            return Self::in_memory();
        }
        let conn = Connection::open_with_flags(
            path,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_WRITE
                | rusqlite::OpenFlags::SQLITE_OPEN_CREATE
                | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        // WAL mode only for real files (shared-memory and :memory: ignore it).
        let _ = conn.execute_batch("PRAGMA journal_mode=WAL;");
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.busy_timeout(busy_timeout)?;
        Ok(Self {
            conn,
            path: Some(path.to_string()),
            busy_timeout,
        })
    }

    /// Open an in-memory database (used in tests).
    pub fn in_memory() -> DuesResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        Ok(Self {
            conn,
            path: None,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        })
    }

    /// Reopen a new connection to the same database.
    /// For in-memory databases, this returns a new in-memory database (isolated).
    /// For file-based databases, this opens the same file.
    pub fn reopen(&self) -> DuesResult<Self> {
        match &self.path {
            Some(p) => Self::open_with_timeout(p, self.busy_timeout),
            None => Self::in_memory(),
        }
    }

    /// File path when the database can be shared across connections.
    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }

    pub fn busy_timeout(&self) -> Duration {
        self.busy_timeout
    }

    /// Apply all schema migrations in order. Safe to call on every open.
    pub fn migrate(&self) -> DuesResult<()> {
        self.conn
            .execute_batch(include_str!("../../../migrations/001_foundation.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/002_population.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/003_obligations.sql"))?;
        self.conn
            .execute_batch(include_str!("../../../migrations/004_ledger.sql"))?;
        Ok(())
    }

    /// Run `f` inside a `BEGIN IMMEDIATE` transaction.
    ///
    /// Commits when `f` returns `Ok`, rolls back otherwise. Must not be
    /// nested: SQLite has no nested BEGIN.
    pub fn immediate<T>(&self, f: impl FnOnce(&Self) -> DuesResult<T>) -> DuesResult<T> {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let out = f(self)?;
        tx.commit()?;
        Ok(out)
    }

    // ── Event log ──────────────────────────────────────────────

    pub fn append_event(&self, event: &DuesEvent, at: DateTime<Utc>) -> DuesResult<()> {
        self.conn.execute(
            "INSERT INTO event_log (event_type, obligation_id, payload, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                event.type_name(),
                event.obligation_id(),
                serde_json::to_string(event)?,
                at,
            ],
        )?;
        Ok(())
    }

    pub fn events_for_obligation(&self, obligation_id: &str) -> DuesResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_type, obligation_id, payload, created_at
             FROM event_log WHERE obligation_id = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![obligation_id], Self::map_event_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn events_of_type(&self, event_type: &str) -> DuesResult<Vec<EventLogEntry>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, event_type, obligation_id, payload, created_at
             FROM event_log WHERE event_type = ?1
             ORDER BY id ASC",
        )?;
        let entries = stmt
            .query_map(params![event_type], Self::map_event_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    fn map_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventLogEntry> {
        Ok(EventLogEntry {
            id: Some(row.get(0)?),
            event_type: row.get(1)?,
            obligation_id: row.get(2)?,
            payload: row.get(3)?,
            created_at: row.get(4)?,
        })
    }
}

// ── Text enums as SQL TEXT columns ─────────────────────────────────

macro_rules! sql_text {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl ToSql for $ty {
                fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                    Ok(ToSqlOutput::from(self.as_str()))
                }
            }

            impl FromSql for $ty {
                fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                    value
                        .as_str()?
                        .parse()
                        .map_err(|e: DuesError| FromSqlError::Other(Box::new(e)))
                }
            }
        )+
    };
}

sql_text!(
    EntityKind,
    ObligationKind,
    AmountMode,
    TargetType,
    TargetScope,
    DueAmountPolicy,
    PaymentMethod,
    TransactionKind,
);

// ─────────────────────────────────────────────────────────────────────────────
// Row types
// ─────────────────────────────────────────────────────────────────────────────

/// An obligation: a one-off campaign or a recurring weekly collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObligationRow {
    pub obligation_id: ObligationId,
    pub church_id: ChurchId,
    pub name: String,
    pub kind: ObligationKind,
    pub amount_mode: AmountMode,
    pub target_type: TargetType,
    pub target_scope: TargetScope,
    /// Campaign backfill amount, or a collection's default amount.
    pub minimum_amount: Amount,
    pub due_amount_policy: DueAmountPolicy,
    pub start_at: DateTime<Utc>,
    /// Due date. Contributions close here; the sweep picks it up after.
    pub end_at: DateTime<Utc>,
    pub is_active: bool,
    pub processed: bool,
    pub processed_at: Option<DateTime<Utc>>,
    pub total_collected: Amount,
    pub participant_count: i64,
    pub week_year: Option<i32>,
    pub week_number: Option<u32>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetRow {
    pub obligation_id: ObligationId,
    pub entity: EntityRef,
    pub custom_amount: Amount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContributorRow {
    pub obligation_id: ObligationId,
    pub entity: EntityRef,
    pub contributed_amount: Amount,
    pub contributed_at: DateTime<Utc>,
}

/// A materialized, payable balance owed by one entity for one obligation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DueRow {
    pub due_id: DueId,
    pub obligation_id: ObligationId,
    pub obligation_name: String,
    pub entity: EntityRef,
    pub name_snapshot: String,
    pub amount: Amount,
    pub paid_amount: Amount,
    pub balance: Amount,
    pub is_paid: bool,
    pub transaction_id: Option<TransactionId>,
    pub due_date: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletRow {
    pub entity: EntityRef,
    /// Positive means the entity owes money.
    pub balance: Amount,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletEntryRow {
    pub entry_id: Option<i64>,
    pub entity: EntityRef,
    pub transaction_id: Option<TransactionId>,
    pub obligation_id: Option<ObligationId>,
    pub amount: Amount,
    pub entry_type: String,
    pub created_at: DateTime<Utc>,
}

/// Immutable receipt of money movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub transaction_id: TransactionId,
    pub church_id: ChurchId,
    pub entity: EntityRef,
    pub amount: Amount,
    pub obligation_id: ObligationId,
    pub due_id: Option<DueId>,
    pub method: PaymentMethod,
    pub kind: TransactionKind,
    /// Due payments only: the obligation aggregate has been updated.
    pub obligation_applied: bool,
    /// Due payments only: the wallet has been decremented.
    pub wallet_applied: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRow {
    pub member_id: String,
    pub church_id: ChurchId,
    pub house_id: Option<String>,
    pub name: String,
    pub status: String, // "active" | "inactive"
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HouseRow {
    pub house_id: String,
    pub group_id: String,
    pub name: String,
}

/// Cached-vs-derived comparison for one obligation, computed in SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObligationTotalsRow {
    pub obligation_id: ObligationId,
    pub total_collected: Amount,
    pub participant_count: i64,
    pub contributor_sum: Amount,
    pub contributor_count: i64,
    pub receipt_sum: Amount,
}

/// Cached-vs-derived comparison for one wallet, computed in SQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletTotalsRow {
    pub entity: EntityRef,
    pub balance: Amount,
    pub entry_sum: Amount,
}

pub(crate) fn entity_from_row(
    row: &rusqlite::Row<'_>,
    kind_idx: usize,
    id_idx: usize,
) -> rusqlite::Result<EntityRef> {
    Ok(EntityRef {
        kind: row.get(kind_idx)?,
        id: row.get(id_idx)?,
    })
}
