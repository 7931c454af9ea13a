use super::{entity_from_row, DuesStore, TransactionRow};
use crate::error::DuesResult;
use rusqlite::{params, OptionalExtension};

const TRANSACTION_COLUMNS: &str = "transaction_id, church_id, entity_kind, entity_id, amount,
     obligation_id, due_id, method, kind, obligation_applied, wallet_applied, created_at";

impl DuesStore {
    // ── Transaction receipts ──────────────────────────────────────

    pub fn insert_transaction(&self, t: &TransactionRow) -> DuesResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO payment_transaction ({TRANSACTION_COLUMNS})
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)"
            ),
            params![
                t.transaction_id,
                t.church_id,
                t.entity.kind,
                t.entity.id,
                t.amount,
                t.obligation_id,
                t.due_id,
                t.method,
                t.kind,
                t.obligation_applied,
                t.wallet_applied,
                t.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn get_transaction(&self, transaction_id: &str) -> DuesResult<Option<TransactionRow>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM payment_transaction
                     WHERE transaction_id = ?1"
                ),
                params![transaction_id],
                Self::map_transaction_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn transactions_for_obligation(&self, obligation_id: &str) -> DuesResult<Vec<TransactionRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transaction
             WHERE obligation_id = ?1
             ORDER BY created_at ASC, transaction_id ASC"
        ))?;
        let rows = stmt.query_map(params![obligation_id], Self::map_transaction_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Receipts whose follow-up steps have not all landed.
    pub fn pending_payment_applications(&self) -> DuesResult<Vec<TransactionRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM payment_transaction
             WHERE obligation_applied = 0 OR wallet_applied = 0
             ORDER BY created_at ASC, transaction_id ASC"
        ))?;
        let rows = stmt.query_map([], Self::map_transaction_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Returns false if the flag was already set (step applied earlier).
    pub fn mark_obligation_applied(&self, transaction_id: &str) -> DuesResult<bool> {
        let changed = self.conn.execute(
            "UPDATE payment_transaction SET obligation_applied = 1
             WHERE transaction_id = ?1 AND obligation_applied = 0",
            params![transaction_id],
        )?;
        Ok(changed == 1)
    }

    /// Returns false if the flag was already set (step applied earlier).
    pub fn mark_wallet_applied(&self, transaction_id: &str) -> DuesResult<bool> {
        let changed = self.conn.execute(
            "UPDATE payment_transaction SET wallet_applied = 1
             WHERE transaction_id = ?1 AND wallet_applied = 0",
            params![transaction_id],
        )?;
        Ok(changed == 1)
    }

    fn map_transaction_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransactionRow> {
        Ok(TransactionRow {
            transaction_id: row.get(0)?,
            church_id: row.get(1)?,
            entity: entity_from_row(row, 2, 3)?,
            amount: row.get(4)?,
            obligation_id: row.get(5)?,
            due_id: row.get(6)?,
            method: row.get(7)?,
            kind: row.get(8)?,
            obligation_applied: row.get(9)?,
            wallet_applied: row.get(10)?,
            created_at: row.get(11)?,
        })
    }
}
