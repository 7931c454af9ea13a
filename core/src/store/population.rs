use super::{DuesStore, HouseRow, MemberRow};
use crate::{
    error::DuesResult,
    types::{EntityKind, EntityRef},
};
use rusqlite::{params, OptionalExtension};

impl DuesStore {
    // ── Population mirror (church → unit → group → house → member) ─────
    //
    // Insert-only: the hierarchy service owns edits; the engine only needs
    // to resolve who is obligated.

    pub fn register_church(&self, church_id: &str, name: &str) -> DuesResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO church (church_id, name) VALUES (?1, ?2)",
            params![church_id, name],
        )?;
        Ok(())
    }

    pub fn register_unit(&self, unit_id: &str, church_id: &str, name: &str) -> DuesResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO unit (unit_id, church_id, name) VALUES (?1, ?2, ?3)",
            params![unit_id, church_id, name],
        )?;
        Ok(())
    }

    pub fn register_group(&self, group_id: &str, unit_id: &str, name: &str) -> DuesResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO family_group (group_id, unit_id, name) VALUES (?1, ?2, ?3)",
            params![group_id, unit_id, name],
        )?;
        Ok(())
    }

    pub fn register_house(&self, house_id: &str, group_id: &str, name: &str) -> DuesResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO house (house_id, group_id, name) VALUES (?1, ?2, ?3)",
            params![house_id, group_id, name],
        )?;
        Ok(())
    }

    pub fn register_member(
        &self,
        member_id: &str,
        church_id: &str,
        house_id: Option<&str>,
        name: &str,
    ) -> DuesResult<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO member (member_id, church_id, house_id, name, status)
             VALUES (?1, ?2, ?3, ?4, 'active')",
            params![member_id, church_id, house_id, name],
        )?;
        Ok(())
    }

    pub fn set_member_status(&self, member_id: &str, active: bool) -> DuesResult<()> {
        self.conn.execute(
            "UPDATE member SET status = ?1 WHERE member_id = ?2",
            params![if active { "active" } else { "inactive" }, member_id],
        )?;
        Ok(())
    }

    pub fn church_ids(&self) -> DuesResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT church_id FROM church ORDER BY church_id ASC")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub fn active_members(&self, church_id: &str) -> DuesResult<Vec<MemberRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT member_id, church_id, house_id, name, status
             FROM member WHERE church_id = ?1 AND status = 'active'
             ORDER BY member_id ASC",
        )?;
        let rows = stmt.query_map(params![church_id], |row| {
            Ok(MemberRow {
                member_id: row.get(0)?,
                church_id: row.get(1)?,
                house_id: row.get(2)?,
                name: row.get(3)?,
                status: row.get(4)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Every house reachable by walking church → unit → group → house.
    pub fn houses_for_church(&self, church_id: &str) -> DuesResult<Vec<HouseRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT h.house_id, h.group_id, h.name
             FROM house h
             JOIN family_group g ON h.group_id = g.group_id
             JOIN unit u ON g.unit_id = u.unit_id
             WHERE u.church_id = ?1
             ORDER BY h.house_id ASC",
        )?;
        let rows = stmt.query_map(params![church_id], |row| {
            Ok(HouseRow {
                house_id: row.get(0)?,
                group_id: row.get(1)?,
                name: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    /// Display name for an entity, if the population knows it.
    pub fn entity_name(&self, entity: &EntityRef) -> DuesResult<Option<String>> {
        let sql = match entity.kind {
            EntityKind::Member => "SELECT name FROM member WHERE member_id = ?1",
            EntityKind::House => "SELECT name FROM house WHERE house_id = ?1",
        };
        let name = self
            .conn
            .query_row(sql, params![entity.id], |row| row.get(0))
            .optional()?;
        Ok(name)
    }
}
