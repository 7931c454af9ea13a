use super::{entity_from_row, DueRow, DuesStore};
use crate::{
    error::DuesResult,
    types::{Amount, EntityRef},
};
use rusqlite::{params, OptionalExtension};

const DUE_COLUMNS: &str = "due_id, obligation_id, obligation_name, entity_kind, entity_id,
     name_snapshot, amount, paid_amount, balance, is_paid, transaction_id, due_date, created_at";

impl DuesStore {
    // ── Due registry ──────────────────────────────────────────────

    /// Create-if-absent on the unique (obligation_id, entity_kind, entity_id) key.
    /// Returns true only when this call created the row; the caller uses
    /// that to decide whether the wallet increment is owed.
    pub fn insert_due_if_absent(&self, d: &DueRow) -> DuesResult<bool> {
        let created = self.conn.execute(
            &format!(
                "INSERT INTO due ({DUE_COLUMNS})
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13)
                 ON CONFLICT (obligation_id, entity_kind, entity_id) DO NOTHING"
            ),
            params![
                d.due_id,
                d.obligation_id,
                d.obligation_name,
                d.entity.kind,
                d.entity.id,
                d.name_snapshot,
                d.amount,
                d.paid_amount,
                d.balance,
                d.is_paid,
                d.transaction_id,
                d.due_date,
                d.created_at,
            ],
        )?;
        Ok(created == 1)
    }

    pub fn get_due(&self, due_id: &str) -> DuesResult<Option<DueRow>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {DUE_COLUMNS} FROM due WHERE due_id = ?1"),
                params![due_id],
                Self::map_due_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn due_for(&self, obligation_id: &str, entity: &EntityRef) -> DuesResult<Option<DueRow>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {DUE_COLUMNS} FROM due
                     WHERE obligation_id = ?1 AND entity_kind = ?2 AND entity_id = ?3"
                ),
                params![obligation_id, entity.kind, entity.id],
                Self::map_due_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn dues_for_entity(&self, entity: &EntityRef) -> DuesResult<Vec<DueRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DUE_COLUMNS} FROM due
             WHERE entity_kind = ?1 AND entity_id = ?2
             ORDER BY due_date DESC, created_at DESC"
        ))?;
        let rows = stmt.query_map(params![entity.kind, entity.id], Self::map_due_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn dues_for_obligation(&self, obligation_id: &str) -> DuesResult<Vec<DueRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DUE_COLUMNS} FROM due WHERE obligation_id = ?1
             ORDER BY entity_kind ASC, entity_id ASC"
        ))?;
        let rows = stmt.query_map(params![obligation_id], Self::map_due_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Apply a payment to a due. The balance guard makes the update a
    /// no-op (returns false) if the balance no longer covers `amount`.
    pub fn apply_due_payment(
        &self,
        due_id: &str,
        amount: Amount,
        transaction_id: &str,
    ) -> DuesResult<bool> {
        let changed = self.conn.execute(
            "UPDATE due
             SET paid_amount = paid_amount + ?1,
                 balance = balance - ?1,
                 is_paid = (balance - ?1 = 0),
                 transaction_id = ?2
             WHERE due_id = ?3 AND balance >= ?1",
            params![amount, transaction_id, due_id],
        )?;
        Ok(changed == 1)
    }

    /// Dues whose stored balance or paid flag disagrees with their amounts.
    pub fn inconsistent_dues(&self) -> DuesResult<Vec<DueRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DUE_COLUMNS} FROM due
             WHERE balance != amount - paid_amount OR is_paid != (balance = 0)"
        ))?;
        let rows = stmt.query_map([], Self::map_due_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn map_due_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<DueRow> {
        Ok(DueRow {
            due_id: row.get(0)?,
            obligation_id: row.get(1)?,
            obligation_name: row.get(2)?,
            entity: entity_from_row(row, 3, 4)?,
            name_snapshot: row.get(5)?,
            amount: row.get(6)?,
            paid_amount: row.get(7)?,
            balance: row.get(8)?,
            is_paid: row.get(9)?,
            transaction_id: row.get(10)?,
            due_date: row.get(11)?,
            created_at: row.get(12)?,
        })
    }
}
