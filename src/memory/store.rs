// src/memory/store.rs — SQLite operations

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

/// Low-level SQLite operations for patterns, ledger records and plan history.
pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    // -- Patterns --

    pub fn upsert_pattern(&self, row: &PatternRow) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO patterns (id, request_text, embedding, template, success_rate,
             sample_count, reuse_count, created_at, last_used_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                request_text = excluded.request_text,
                embedding = excluded.embedding,
                template = excluded.template,
                success_rate = excluded.success_rate,
                sample_count = excluded.sample_count,
                reuse_count = excluded.reuse_count,
                last_used_at = excluded.last_used_at",
            params![
                row.id,
                row.request_text,
                row.embedding,
                row.template,
                row.success_rate,
                row.sample_count,
                row.reuse_count,
                row.created_at,
                row.last_used_at
            ],
        )?;
        Ok(())
    }

    pub fn query_all_patterns(&self) -> anyhow::Result<Vec<PatternRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, request_text, embedding, template, success_rate, sample_count,
                    reuse_count, created_at, last_used_at
             FROM patterns ORDER BY created_at",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok(PatternRow {
                id: row.get(0)?,
                request_text: row.get(1)?,
                embedding: row.get(2)?,
                template: row.get(3)?,
                success_rate: row.get(4)?,
                sample_count: row.get(5)?,
                reuse_count: row.get(6)?,
                created_at: row.get(7)?,
                last_used_at: row.get(8)?,
            })
        })?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    pub fn delete_pattern(&self, id: &str) -> anyhow::Result<()> {
        self.conn
            .execute("DELETE FROM patterns WHERE id = ?1", params![id])?;
        Ok(())
    }

    pub fn count_patterns(&self) -> anyhow::Result<i64> {
        let n = self
            .conn
            .query_row("SELECT COUNT(*) FROM patterns", [], |r| r.get(0))?;
        Ok(n)
    }

    // -- Performance --

    pub fn upsert_performance(&self, row: &PerformanceRow) -> anyhow::Result<()> {
        self.conn.execute(
            "INSERT INTO performance (capability_id, total_invocations, successes,
             avg_latency_ms, failure_categories, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(capability_id) DO UPDATE SET
                total_invocations = excluded.total_invocations,
                successes = excluded.successes,
                avg_latency_ms = excluded.avg_latency_ms,
                failure_categories = excluded.failure_categories,
                updated_at = excluded.updated_at",
            params![
                row.capability_id,
                row.total_invocations,
                row.successes,
                row.avg_latency_ms,
                row.failure_categories,
                row.updated_at
            ],
        )?;
        Ok(())
    }

    pub fn query_performance(&self, capability_id: &str) -> anyhow::Result<Option<PerformanceRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT capability_id, total_invocations, successes, avg_latency_ms,
                        failure_categories, updated_at
                 FROM performance WHERE capability_id = ?1",
                params![capability_id],
                performance_from_row,
            )
            .optional()?;
        Ok(row)
    }

    pub fn query_all_performance(&self) -> anyhow::Result<Vec<PerformanceRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT capability_id, total_invocations, successes, avg_latency_ms,
                    failure_categories, updated_at
             FROM performance ORDER BY capability_id",
        )?;
        let rows = stmt.query_map([], performance_from_row)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    // -- Plans --

    pub fn insert_plan(
        &self,
        id: &str,
        request_text: &str,
        origin: &str,
        confidence: f64,
        body: &str,
    ) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT OR REPLACE INTO plans (id, request_text, origin, confidence, body, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![id, request_text, origin, confidence, body, now],
        )?;
        Ok(())
    }

    pub fn attach_outcome(&self, plan_id: &str, outcome: &str) -> anyhow::Result<()> {
        self.conn.execute(
            "UPDATE plans SET outcome = ?1 WHERE id = ?2",
            params![outcome, plan_id],
        )?;
        Ok(())
    }

    pub fn get_plan(&self, id: &str) -> anyhow::Result<Option<PlanRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, request_text, origin, confidence, body, outcome, created_at
                 FROM plans WHERE id = ?1",
                params![id],
                |row| {
                    Ok(PlanRow {
                        id: row.get(0)?,
                        request_text: row.get(1)?,
                        origin: row.get(2)?,
                        confidence: row.get(3)?,
                        body: row.get(4)?,
                        outcome: row.get(5)?,
                        created_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    // -- Ingested outcomes --

    /// Returns `true` when this call recorded the plan, `false` if it was already present.
    pub fn mark_ingested(&self, plan_id: &str) -> anyhow::Result<bool> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO ingested_outcomes (plan_id, ingested_at) VALUES (?1, ?2)",
            params![plan_id, now],
        )?;
        Ok(changed > 0)
    }

    pub fn is_ingested(&self, plan_id: &str) -> anyhow::Result<bool> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM ingested_outcomes WHERE plan_id = ?1",
            params![plan_id],
            |r| r.get(0),
        )?;
        Ok(n > 0)
    }

    /// Access the underlying connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }
}

fn performance_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PerformanceRow> {
    Ok(PerformanceRow {
        capability_id: row.get(0)?,
        total_invocations: row.get(1)?,
        successes: row.get(2)?,
        avg_latency_ms: row.get(3)?,
        failure_categories: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// A stored pattern. `embedding` and `template` are JSON text.
#[derive(Debug, Clone, PartialEq)]
pub struct PatternRow {
    pub id: String,
    pub request_text: String,
    pub embedding: String,
    pub template: String,
    pub success_rate: f64,
    pub sample_count: i64,
    pub reuse_count: i64,
    pub created_at: String,
    pub last_used_at: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceRow {
    pub capability_id: String,
    pub total_invocations: i64,
    pub successes: i64,
    pub avg_latency_ms: f64,
    /// JSON object of category -> count.
    pub failure_categories: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct PlanRow {
    pub id: String,
    pub request_text: String,
    pub origin: String,
    pub confidence: f64,
    pub body: String,
    pub outcome: Option<String>,
    pub created_at: String,
}
