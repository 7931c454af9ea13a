use super::{entity_from_row, DuesStore, WalletEntryRow, WalletRow, WalletTotalsRow};
use crate::{
    error::DuesResult,
    types::EntityRef,
};
use rusqlite::{params, OptionalExtension};

impl DuesStore {
    // ── Wallet ledger ─────────────────────────────────────────────

    /// Post one signed entry: upsert the wallet with an in-SQL increment and
    /// append the matching ledger row. Call inside `immediate()` so the
    /// balance and the entry land together.
    pub fn post_wallet_entry(&self, entry: &WalletEntryRow) -> DuesResult<()> {
        self.conn.execute(
            "INSERT INTO wallet (entity_kind, entity_id, balance, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (entity_kind, entity_id)
             DO UPDATE SET balance = balance + excluded.balance,
                           updated_at = excluded.updated_at",
            params![entry.entity.kind, entry.entity.id, entry.amount, entry.created_at],
        )?;
        self.conn.execute(
            "INSERT INTO wallet_entry
             (entity_kind, entity_id, transaction_id, obligation_id, amount, entry_type, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                entry.entity.kind,
                entry.entity.id,
                entry.transaction_id,
                entry.obligation_id,
                entry.amount,
                entry.entry_type,
                entry.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_wallet(&self, entity: &EntityRef) -> DuesResult<Option<WalletRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT entity_kind, entity_id, balance, updated_at
                 FROM wallet WHERE entity_kind = ?1 AND entity_id = ?2",
                params![entity.kind, entity.id],
                |row| {
                    Ok(WalletRow {
                        entity: entity_from_row(row, 0, 1)?,
                        balance: row.get(2)?,
                        updated_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    pub fn wallet_entries(&self, entity: &EntityRef) -> DuesResult<Vec<WalletEntryRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT entry_id, entity_kind, entity_id, transaction_id, obligation_id,
                    amount, entry_type, created_at
             FROM wallet_entry WHERE entity_kind = ?1 AND entity_id = ?2
             ORDER BY entry_id ASC",
        )?;
        let rows = stmt.query_map(params![entity.kind, entity.id], |row| {
            Ok(WalletEntryRow {
                entry_id: Some(row.get(0)?),
                entity: entity_from_row(row, 1, 2)?,
                transaction_id: row.get(3)?,
                obligation_id: row.get(4)?,
                amount: row.get(5)?,
                entry_type: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Every wallet's cached balance next to the sum of its entries.
    pub fn wallet_totals(&self) -> DuesResult<Vec<WalletTotalsRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT w.entity_kind, w.entity_id, w.balance,
                    (SELECT COALESCE(SUM(e.amount), 0) FROM wallet_entry e
                      WHERE e.entity_kind = w.entity_kind AND e.entity_id = w.entity_id)
             FROM wallet w
             ORDER BY w.entity_kind ASC, w.entity_id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(WalletTotalsRow {
                entity: entity_from_row(row, 0, 1)?,
                balance: row.get(2)?,
                entry_sum: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
