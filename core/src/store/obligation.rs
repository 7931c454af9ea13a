use super::{entity_from_row, DuesStore, ObligationRow, ObligationTotalsRow, TargetRow};
use crate::{error::DuesResult, types::Amount};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

const OBLIGATION_COLUMNS: &str = "obligation_id, church_id, name, kind, amount_mode, target_type,
     target_scope, minimum_amount, due_amount_policy, start_at, end_at, is_active,
     processed, processed_at, total_collected, participant_count, week_year,
     week_number, created_at";

impl DuesStore {
    // ── Obligation registry ───────────────────────────────────────

    pub fn insert_obligation(&self, o: &ObligationRow) -> DuesResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO obligation ({OBLIGATION_COLUMNS})
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)"
            ),
            params![
                o.obligation_id,
                o.church_id,
                o.name,
                o.kind,
                o.amount_mode,
                o.target_type,
                o.target_scope,
                o.minimum_amount,
                o.due_amount_policy,
                o.start_at,
                o.end_at,
                o.is_active,
                o.processed,
                o.processed_at,
                o.total_collected,
                o.participant_count,
                o.week_year,
                o.week_number,
                o.created_at,
            ],
        )?;
        Ok(())
    }

    pub fn insert_target(&self, t: &TargetRow) -> DuesResult<()> {
        self.conn.execute(
            "INSERT INTO obligation_target (obligation_id, entity_kind, entity_id, custom_amount)
             VALUES (?1, ?2, ?3, ?4)",
            params![t.obligation_id, t.entity.kind, t.entity.id, t.custom_amount],
        )?;
        Ok(())
    }

    pub fn get_obligation(&self, obligation_id: &str) -> DuesResult<Option<ObligationRow>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {OBLIGATION_COLUMNS} FROM obligation WHERE obligation_id = ?1"),
                params![obligation_id],
                Self::map_obligation_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn weekly_collection(
        &self,
        church_id: &str,
        year: i32,
        week: u32,
    ) -> DuesResult<Option<ObligationRow>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {OBLIGATION_COLUMNS} FROM obligation
                     WHERE church_id = ?1 AND week_year = ?2 AND week_number = ?3"
                ),
                params![church_id, year, week],
                Self::map_obligation_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn obligation_targets(&self, obligation_id: &str) -> DuesResult<Vec<TargetRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT obligation_id, entity_kind, entity_id, custom_amount
             FROM obligation_target WHERE obligation_id = ?1
             ORDER BY entity_kind ASC, entity_id ASC",
        )?;
        let rows = stmt.query_map(params![obligation_id], |row| {
            Ok(TargetRow {
                obligation_id: row.get(0)?,
                entity: entity_from_row(row, 1, 2)?,
                custom_amount: row.get(3)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Active, unprocessed obligations. The caller applies the due-date
    /// filter; fixed obligations are returned regardless of date because
    /// their dues belong to creation time.
    pub fn unprocessed_obligations(&self) -> DuesResult<Vec<ObligationRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {OBLIGATION_COLUMNS} FROM obligation
             WHERE processed = 0 AND is_active = 1
             ORDER BY end_at ASC, obligation_id ASC"
        ))?;
        let rows = stmt.query_map([], Self::map_obligation_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Flip the sweep-level idempotency gate. Returns false if another
    /// caller already flipped it.
    pub fn mark_obligation_processed(
        &self,
        obligation_id: &str,
        at: DateTime<Utc>,
    ) -> DuesResult<bool> {
        let changed = self.conn.execute(
            "UPDATE obligation SET processed = 1, processed_at = ?1
             WHERE obligation_id = ?2 AND processed = 0",
            params![at, obligation_id],
        )?;
        Ok(changed == 1)
    }

    pub fn set_obligation_active(&self, obligation_id: &str, active: bool) -> DuesResult<bool> {
        let changed = self.conn.execute(
            "UPDATE obligation SET is_active = ?1 WHERE obligation_id = ?2",
            params![active, obligation_id],
        )?;
        Ok(changed == 1)
    }

    /// Increment the cached aggregates. `new_participant` bumps the count.
    pub fn add_to_obligation_totals(
        &self,
        obligation_id: &str,
        amount: Amount,
        new_participant: bool,
    ) -> DuesResult<()> {
        self.conn.execute(
            "UPDATE obligation
             SET total_collected = total_collected + ?1,
                 participant_count = participant_count + ?2
             WHERE obligation_id = ?3",
            params![amount, i64::from(new_participant), obligation_id],
        )?;
        Ok(())
    }

    /// Cached aggregates next to the values derived from the contributor
    /// rows and from the applied receipts, for every obligation.
    pub fn obligation_totals(&self) -> DuesResult<Vec<ObligationTotalsRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT o.obligation_id, o.total_collected, o.participant_count,
                    (SELECT COALESCE(SUM(c.contributed_amount), 0) FROM contributor c
                      WHERE c.obligation_id = o.obligation_id),
                    (SELECT COUNT(*) FROM contributor c
                      WHERE c.obligation_id = o.obligation_id),
                    (SELECT COALESCE(SUM(t.amount), 0) FROM payment_transaction t
                      WHERE t.obligation_id = o.obligation_id AND t.obligation_applied = 1)
             FROM obligation o
             ORDER BY o.obligation_id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(ObligationTotalsRow {
                obligation_id: row.get(0)?,
                total_collected: row.get(1)?,
                participant_count: row.get(2)?,
                contributor_sum: row.get(3)?,
                contributor_count: row.get(4)?,
                receipt_sum: row.get(5)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    fn map_obligation_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ObligationRow> {
        Ok(ObligationRow {
            obligation_id: row.get(0)?,
            church_id: row.get(1)?,
            name: row.get(2)?,
            kind: row.get(3)?,
            amount_mode: row.get(4)?,
            target_type: row.get(5)?,
            target_scope: row.get(6)?,
            minimum_amount: row.get(7)?,
            due_amount_policy: row.get(8)?,
            start_at: row.get(9)?,
            end_at: row.get(10)?,
            is_active: row.get(11)?,
            processed: row.get(12)?,
            processed_at: row.get(13)?,
            total_collected: row.get(14)?,
            participant_count: row.get(15)?,
            week_year: row.get(16)?,
            week_number: row.get(17)?,
            created_at: row.get(18)?,
        })
    }
}
