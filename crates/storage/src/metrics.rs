// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Read-only aggregation surface over the consultation metrics database.
//!
//! The metrics database is produced by in-terminal tooling; the Tower only
//! joins its `summary()` into analytics responses. Anything beyond that
//! aggregation is outside this crate's contract.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;

use crate::session_store::StoreError;

/// Aggregated consultation metrics for one time range.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConsultSummary {
    pub consults: u64,
    pub avg_latency_ms: f64,
    pub by_kind: HashMap<String, u64>,
}

/// Read-only handle over the consult metrics database.
pub struct ConsultMetricsDb {
    conn: Mutex<Connection>,
}

impl ConsultMetricsDb {
    /// Open the metrics database read-only. Fails if the file is absent;
    /// callers degrade to a zero-value summary plus an error entry.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| StoreError::Open(path.display().to_string(), e))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Aggregate consultations recorded at or after `since_epoch_ms`
    /// (`None` = all time).
    pub fn summary(&self, since_epoch_ms: Option<i64>) -> Result<ConsultSummary, StoreError> {
        let conn = self.conn.lock();
        let cutoff = since_epoch_ms.unwrap_or(0);

        let (consults, avg_latency_ms): (u64, f64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(AVG(latency_ms), 0.0)
             FROM consultations WHERE created_at >= ?1",
            [cutoff],
            |row| Ok((row.get::<_, i64>(0)? as u64, row.get(1)?)),
        )?;

        let mut by_kind = HashMap::new();
        let mut stmt = conn.prepare(
            "SELECT kind, COUNT(*) FROM consultations
             WHERE created_at >= ?1 GROUP BY kind",
        )?;
        let rows = stmt.query_map([cutoff], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
        })?;
        for row in rows {
            let (kind, count) = row?;
            by_kind.insert(kind, count);
        }

        Ok(ConsultSummary {
            consults,
            avg_latency_ms,
            by_kind,
        })
    }
}

#[cfg(test)]
#[path = "metrics_tests.rs"]
mod tests;
