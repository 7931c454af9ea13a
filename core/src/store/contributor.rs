use super::{entity_from_row, ContributorRow, DuesStore};
use crate::{
    error::DuesResult,
    types::{Amount, EntityRef},
};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

impl DuesStore {
    // ── Contributor set ───────────────────────────────────────────

    /// Fails with a constraint error if the entity is already a contributor.
    pub fn insert_contributor(&self, c: &ContributorRow) -> DuesResult<()> {
        self.conn.execute(
            "INSERT INTO contributor
             (obligation_id, entity_kind, entity_id, contributed_amount, contributed_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                c.obligation_id,
                c.entity.kind,
                c.entity.id,
                c.contributed_amount,
                c.contributed_at,
            ],
        )?;
        Ok(())
    }

    pub fn contributor(
        &self,
        obligation_id: &str,
        entity: &EntityRef,
    ) -> DuesResult<Option<ContributorRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT obligation_id, entity_kind, entity_id, contributed_amount, contributed_at
                 FROM contributor
                 WHERE obligation_id = ?1 AND entity_kind = ?2 AND entity_id = ?3",
                params![obligation_id, entity.kind, entity.id],
                Self::map_contributor_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn contributors(&self, obligation_id: &str) -> DuesResult<Vec<ContributorRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT obligation_id, entity_kind, entity_id, contributed_amount, contributed_at
             FROM contributor WHERE obligation_id = ?1
             ORDER BY contributed_at ASC, entity_id ASC",
        )?;
        let rows = stmt.query_map(params![obligation_id], Self::map_contributor_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Add `amount` to an existing contributor entry.
    /// Returns false when the entity has no entry yet.
    pub fn increment_contributor(
        &self,
        obligation_id: &str,
        entity: &EntityRef,
        amount: Amount,
        at: DateTime<Utc>,
    ) -> DuesResult<bool> {
        let changed = self.conn.execute(
            "UPDATE contributor
             SET contributed_amount = contributed_amount + ?1, contributed_at = ?2
             WHERE obligation_id = ?3 AND entity_kind = ?4 AND entity_id = ?5",
            params![amount, at, obligation_id, entity.kind, entity.id],
        )?;
        Ok(changed == 1)
    }

    fn map_contributor_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ContributorRow> {
        Ok(ContributorRow {
            obligation_id: row.get(0)?,
            entity: entity_from_row(row, 1, 2)?,
            contributed_amount: row.get(3)?,
            contributed_at: row.get(4)?,
        })
    }
}
