//! SQLite implementation of the LogStore trait

use super::{EndpointResponseStats, LogStore, StorageError, TableCounts};
use crate::models::{AccessRecord, AnomalyRecord, ErrorRecord, LogFormat, PerformanceMetric, SecurityEvent};
use chrono::NaiveDateTime;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row, Statement};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const ACCESS_COLUMNS: &str = "timestamp, ip_address, user, method, endpoint, protocol, status, \
     bytes_sent, referrer, user_agent, response_time, log_format";

/// SQLite-based result store
pub struct SqliteLogStore {
    conn: Mutex<Connection>,
}

impl SqliteLogStore {
    /// Open (or create) the database at `db_path`, creating its parent
    /// directory and the schema when missing
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self, StorageError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        let store = SqliteLogStore {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        log::info!("Database initialized at {:?}", db_path);
        Ok(store)
    }

    /// Create an in-memory SQLite database (useful for testing)
    pub fn in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        let store = SqliteLogStore {
            conn: Mutex::new(conn),
        };
        store.initialize_schema()?;
        Ok(store)
    }

    fn initialize_schema(&self) -> Result<(), StorageError> {
        self.conn()?.execute_batch(include_str!("schema.sql"))?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn.lock().map_err(|_| StorageError::LockPoisoned)
    }

    /// Run `insert` for every row with one prepared statement inside a
    /// single transaction
    fn insert_all<T>(
        &self,
        sql: &str,
        rows: &[T],
        insert: impl Fn(&mut Statement<'_>, &T) -> rusqlite::Result<usize>,
    ) -> Result<usize, StorageError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(sql)?;
            for row in rows {
                inserted += insert(&mut stmt, row)?;
            }
        }
        tx.commit()?;
        Ok(inserted)
    }

    fn count(conn: &Connection, table: &str) -> Result<usize, StorageError> {
        let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
        Ok(n as usize)
    }

    fn access_from_row(row: &Row<'_>) -> rusqlite::Result<AccessRecord> {
        let format_name: String = row.get(11)?;
        let log_format = LogFormat::from_name(&format_name).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                11,
                Type::Text,
                Box::new(StorageError::InvalidData(format!("Unknown log format: {}", format_name))),
            )
        })?;
        let status: i64 = row.get(6)?;
        let bytes_sent: i64 = row.get(7)?;

        Ok(AccessRecord {
            timestamp: row.get(0)?,
            ip_address: row.get(1)?,
            user: row.get(2)?,
            method: row.get(3)?,
            endpoint: row.get(4)?,
            protocol: row.get(5)?,
            status: u16::try_from(status).unwrap_or(0),
            bytes_sent: u64::try_from(bytes_sent).unwrap_or(0),
            referrer: row.get(8)?,
            user_agent: row.get(9)?,
            response_time: row.get(10)?,
            log_format,
        })
    }
}

impl LogStore for SqliteLogStore {
    fn store_access_logs(
        &self,
        records: &[AccessRecord],
        source_file: Option<&str>,
    ) -> Result<usize, StorageError> {
        let sql = format!(
            "INSERT INTO access_logs ({}, log_type, source_file)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            ACCESS_COLUMNS
        );
        let count = self.insert_all(&sql, records, |stmt, r| {
            stmt.execute(params![
                r.timestamp,
                r.ip_address,
                r.user,
                r.method,
                r.endpoint,
                r.protocol,
                i64::from(r.status),
                i64::try_from(r.bytes_sent).unwrap_or(i64::MAX),
                r.referrer,
                r.user_agent,
                r.response_time,
                r.log_format.as_str(),
                r.log_type().as_str(),
                source_file,
            ])
        })?;
        log::info!(
            "Stored {} access log entries from {}",
            count,
            source_file.unwrap_or("unknown source")
        );
        Ok(count)
    }

    fn store_error_logs(
        &self,
        records: &[ErrorRecord],
        source_file: Option<&str>,
    ) -> Result<usize, StorageError> {
        let count = self.insert_all(
            "INSERT INTO error_logs (timestamp, level, client_ip, message, log_type, source_file)
             VALUES (?, ?, ?, ?, ?, ?)",
            records,
            |stmt, r| {
                stmt.execute(params![
                    r.timestamp,
                    r.level,
                    r.client_ip,
                    r.message,
                    r.log_type().as_str(),
                    source_file,
                ])
            },
        )?;
        log::info!(
            "Stored {} error log entries from {}",
            count,
            source_file.unwrap_or("unknown source")
        );
        Ok(count)
    }

    fn store_performance_metrics(
        &self,
        metrics: &[PerformanceMetric],
        source_file: Option<&str>,
    ) -> Result<usize, StorageError> {
        let count = self.insert_all(
            "INSERT INTO performance_metrics
             (timestamp, metric_name, metric_value, endpoint, time_window, source_file)
             VALUES (?, ?, ?, ?, ?, ?)",
            metrics,
            |stmt, m| {
                stmt.execute(params![
                    m.timestamp,
                    m.metric_name,
                    m.metric_value,
                    m.endpoint,
                    m.time_window,
                    source_file,
                ])
            },
        )?;
        log::info!("Stored {} performance metrics", count);
        Ok(count)
    }

    fn store_security_events(
        &self,
        events: &[SecurityEvent],
        source_file: Option<&str>,
    ) -> Result<usize, StorageError> {
        let count = self.insert_all(
            "INSERT INTO security_events
             (timestamp, event_type, severity, ip_address, endpoint, description, source_file)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
            events,
            |stmt, e| {
                stmt.execute(params![
                    e.timestamp,
                    e.event_type.as_str(),
                    e.severity.as_str(),
                    e.ip_address,
                    e.endpoint,
                    e.description,
                    source_file,
                ])
            },
        )?;
        log::info!("Stored {} security events", count);
        Ok(count)
    }

    fn store_anomalies(&self, anomalies: &[AnomalyRecord]) -> Result<usize, StorageError> {
        let count = self.insert_all(
            "INSERT INTO anomalies
             (timestamp, metric_name, expected_value, actual_value, z_score, source_file)
             VALUES (?, ?, ?, ?, ?, ?)",
            anomalies,
            |stmt, a| {
                stmt.execute(params![
                    a.timestamp,
                    a.metric_name,
                    a.expected_value,
                    a.actual_value,
                    a.z_score,
                    a.source,
                ])
            },
        )?;
        log::info!("Stored {} anomalies", count);
        Ok(count)
    }

    fn get_access_logs_by_timeframe(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<AccessRecord>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM access_logs
             WHERE timestamp BETWEEN ? AND ?
             ORDER BY timestamp, id",
            ACCESS_COLUMNS
        ))?;

        let records = stmt
            .query_map(params![start, end], Self::access_from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn get_error_logs_by_timeframe(
        &self,
        start: NaiveDateTime,
        end: NaiveDateTime,
    ) -> Result<Vec<ErrorRecord>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, level, client_ip, message FROM error_logs
             WHERE timestamp BETWEEN ? AND ?
             ORDER BY timestamp, id",
        )?;

        let records = stmt
            .query_map(params![start, end], |row| {
                Ok(ErrorRecord {
                    timestamp: row.get(0)?,
                    level: row.get(1)?,
                    client_ip: row.get(2)?,
                    message: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn get_response_time_stats_by_endpoint(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<EndpointResponseStats>, StorageError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT
                endpoint,
                COUNT(*) AS requests,
                AVG(response_time) AS avg_response_time,
                MIN(response_time) AS min_response_time,
                MAX(response_time) AS max_response_time,
                SUM(CASE WHEN status >= 400 THEN 1 ELSE 0 END) AS error_count
             FROM access_logs
             WHERE (?1 IS NULL OR timestamp >= ?1) AND (?2 IS NULL OR timestamp <= ?2)
             GROUP BY endpoint
             ORDER BY avg_response_time DESC, endpoint",
        )?;

        let stats = stmt
            .query_map(params![start, end], |row| {
                let requests: i64 = row.get(1)?;
                let error_count: i64 = row.get(5)?;
                Ok(EndpointResponseStats {
                    endpoint: row.get(0)?,
                    requests: requests as usize,
                    avg_response_time: row.get(2)?,
                    min_response_time: row.get(3)?,
                    max_response_time: row.get(4)?,
                    error_count: error_count as usize,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(stats)
    }

    fn table_counts(&self) -> Result<TableCounts, StorageError> {
        let conn = self.conn()?;
        Ok(TableCounts {
            access_logs: Self::count(&conn, "access_logs")?,
            error_logs: Self::count(&conn, "error_logs")?,
            performance_metrics: Self::count(&conn, "performance_metrics")?,
            security_events: Self::count(&conn, "security_events")?,
            anomalies: Self::count(&conn, "anomalies")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzers::test_support::{access, at};
    use crate::models::{SecurityEventType, Severity, METRIC_TIME_WINDOW};

    fn create_test_store() -> SqliteLogStore {
        SqliteLogStore::in_memory().expect("Failed to create in-memory store")
    }

    fn access_at(stamp: &str, endpoint: &str, status: u16, response_time: f64) -> AccessRecord {
        let mut record = access("192.168.1.100", "GET", endpoint, status, response_time);
        record.timestamp = Some(at(stamp));
        record
    }

    #[test]
    fn test_access_roundtrip_by_timeframe() {
        let store = create_test_store();
        let mut with_agent = access_at("2023-10-10 13:30:00", "/api", 500, 0.75);
        with_agent.referrer = Some("-".to_string());
        with_agent.user_agent = Some("curl/8.0".to_string());
        with_agent.log_format = LogFormat::Combined;

        let records = vec![
            access_at("2023-10-10 12:00:00", "/", 200, 0.1),
            with_agent.clone(),
            access_at("2023-10-10 15:00:00", "/", 200, 0.2),
        ];
        assert_eq!(store.store_access_logs(&records, Some("access.log")).unwrap(), 3);

        let found = store
            .get_access_logs_by_timeframe(at("2023-10-10 13:00:00"), at("2023-10-10 14:00:00"))
            .unwrap();
        assert_eq!(found, vec![with_agent]);
    }

    #[test]
    fn test_empty_inserts() {
        let store = create_test_store();
        assert_eq!(store.store_access_logs(&[], None).unwrap(), 0);
        assert_eq!(store.store_anomalies(&[]).unwrap(), 0);
        assert_eq!(store.table_counts().unwrap(), TableCounts::default());
    }

    #[test]
    fn test_error_logs() {
        let store = create_test_store();
        let record = ErrorRecord {
            timestamp: Some(at("2023-10-11 14:32:52")),
            level: "error".to_string(),
            client_ip: "127.0.0.1".to_string(),
            message: "File does not exist: /var/www/favicon.ico".to_string(),
        };
        let undated = ErrorRecord {
            timestamp: None,
            ..record.clone()
        };
        assert_eq!(store.store_error_logs(&[record.clone(), undated], None).unwrap(), 2);

        let found = store
            .get_error_logs_by_timeframe(at("2023-10-11 00:00:00"), at("2023-10-12 00:00:00"))
            .unwrap();
        assert_eq!(found, vec![record]);
        assert_eq!(store.table_counts().unwrap().error_logs, 2);
    }

    #[test]
    fn test_response_time_stats() {
        let store = create_test_store();
        let records = vec![
            access_at("2023-10-10 12:00:00", "/slow", 200, 2.0),
            access_at("2023-10-10 12:01:00", "/slow", 503, 4.0),
            access_at("2023-10-10 12:02:00", "/fast", 200, 0.1),
            access_at("2023-10-11 12:00:00", "/fast", 404, 0.3),
        ];
        store.store_access_logs(&records, None).unwrap();

        let all = store.get_response_time_stats_by_endpoint(None, None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].endpoint, "/slow");
        assert_eq!(all[0].requests, 2);
        assert!((all[0].avg_response_time - 3.0).abs() < 1e-9);
        assert_eq!(all[0].min_response_time, 2.0);
        assert_eq!(all[0].max_response_time, 4.0);
        assert_eq!(all[0].error_count, 1);

        let first_day = store
            .get_response_time_stats_by_endpoint(None, Some(at("2023-10-10 23:59:59")))
            .unwrap();
        let fast = first_day.iter().find(|s| s.endpoint == "/fast").unwrap();
        assert_eq!(fast.requests, 1);
        assert_eq!(fast.error_count, 0);
    }

    #[test]
    fn test_results_and_counts() {
        let store = create_test_store();
        let metric = PerformanceMetric {
            timestamp: at("2023-10-10 12:00:00"),
            metric_name: "mean_response_time".to_string(),
            metric_value: 0.25,
            endpoint: "/".to_string(),
            time_window: METRIC_TIME_WINDOW,
        };
        let event = SecurityEvent {
            timestamp: at("2023-10-10 12:00:00"),
            event_type: SecurityEventType::ScanAttempt,
            severity: Severity::Medium,
            ip_address: "7.7.7.7".to_string(),
            endpoint: "/wp-login.php".to_string(),
            description: "Potential scanning attempt detected".to_string(),
        };
        let anomaly = AnomalyRecord {
            timestamp: at("2023-10-10 12:00:00"),
            metric_name: "response_time".to_string(),
            expected_value: 0.25,
            actual_value: 1.5,
            z_score: 3.0,
            source: Some("access.log".to_string()),
        };

        assert_eq!(store.store_performance_metrics(&[metric.clone(), metric], Some("access.log")).unwrap(), 2);
        assert_eq!(store.store_security_events(&[event], Some("access.log")).unwrap(), 1);
        assert_eq!(store.store_anomalies(&[anomaly]).unwrap(), 1);

        let counts = store.table_counts().unwrap();
        assert_eq!(counts.performance_metrics, 2);
        assert_eq!(counts.security_events, 1);
        assert_eq!(counts.anomalies, 1);
        assert_eq!(counts.access_logs, 0);
    }

    #[test]
    fn test_file_store_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data").join("loglens.db");

        {
            let store = SqliteLogStore::new(&path).unwrap();
            store
                .store_access_logs(&[access_at("2023-10-10 12:00:00", "/", 200, 0.1)], None)
                .unwrap();
        }

        let reopened = SqliteLogStore::new(&path).unwrap();
        assert_eq!(reopened.table_counts().unwrap().access_logs, 1);
    }
}
