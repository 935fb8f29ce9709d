use std::fs;
use std::path::Path;

use loglens::analyzers::performance::DEFAULT_TRAFFIC_INTERVAL;
use loglens::input::find_log_files;
use loglens::models::{LogFormat, LogKind, SecurityEventType};
use loglens::storage::{LogStore, SqliteLogStore};
use loglens::{ApacheLogParser, Config, Pipeline};

fn access_line(ip: &str, minute: u32, endpoint: &str, status: u16, response_time: f64) -> String {
    format!(
        r#"{} - - [10/Oct/2023:13:{:02}:00 -0700] "GET {} HTTP/1.1" {} 512 "-" "Mozilla/5.0" {}"#,
        ip, minute, endpoint, status, response_time
    )
}

fn write_fixtures(dir: &Path) {
    let mut access = Vec::new();
    for minute in 0..20 {
        access.push(access_line("10.0.0.1", minute, "/index.html", 200, 0.1));
    }
    access.push(access_line("6.6.6.6", 21, "/../../../etc/passwd", 404, 0.1));
    for minute in 22..27 {
        access.push(access_line("7.7.7.7", minute, "/wp-login.php", 401, 0.1));
    }
    access.push("this line is not a log entry".to_string());
    fs::write(dir.join("access.log"), access.join("\n")).unwrap();

    let errors = [
        "[Wed Oct 11 14:32:52 2023] [error] [client 192.168.1.1] File does not exist: /var/www/html/favicon.ico",
        "[Wed Oct 11 14:33:10 2023] [warn] [client 192.168.1.2] mod_fcgid: read data timeout",
    ];
    fs::write(dir.join("error.LOG"), errors.join("\n")).unwrap();
    fs::write(dir.join("notes.txt"), "not a log").unwrap();
}

#[test]
fn test_discover_and_detect() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());

    let files = find_log_files(dir.path(), "log").unwrap();
    assert_eq!(files.len(), 2);

    let parser = ApacheLogParser::new();
    assert_eq!(parser.detect_format(&dir.path().join("access.log")), Some(LogFormat::CombinedTime));
    assert_eq!(parser.detect_format(&dir.path().join("error.LOG")), Some(LogFormat::Error));
    assert_eq!(parser.detect_format(&dir.path().join("missing.log")), None);
}

#[tokio::test]
async fn test_parse_analyze_and_store() {
    let dir = tempfile::tempdir().unwrap();
    write_fixtures(dir.path());
    let parser = ApacheLogParser::new();

    let batch = parser.parse_file(&dir.path().join("access.log"), LogKind::Access).unwrap();
    assert_eq!(batch.access.len(), 26);
    assert_eq!(batch.skipped, 1);

    let errors = parser.parse_file(&dir.path().join("error.LOG"), LogKind::Error).unwrap();
    assert_eq!(errors.errors.len(), 2);

    let pipeline = Pipeline::new(&Config::default()).unwrap();
    let series = pipeline
        .performance()
        .request_count_series(&batch.access, DEFAULT_TRAFFIC_INTERVAL);
    assert_eq!(series.len(), 1);

    let report = pipeline.run(batch.access.clone(), Some("access.log")).await;
    assert_eq!(report.record_count, 26);

    let events = &report.security.security_events;
    assert!(events.iter().any(|e| e.event_type == SecurityEventType::AttackPattern && e.ip_address == "6.6.6.6"));
    assert_eq!(
        events
            .iter()
            .filter(|e| e.event_type == SecurityEventType::BruteForceAttempt)
            .count(),
        1
    );
    assert!(report.security.ip_threat_scores["7.7.7.7"].score >= 20);

    let store = SqliteLogStore::in_memory().unwrap();
    assert_eq!(store.store_access_logs(&batch.access, Some("access.log")).unwrap(), 26);
    assert_eq!(store.store_error_logs(&errors.errors, Some("error.LOG")).unwrap(), 2);
    store.store_batch_report(&report).unwrap();

    let counts = store.table_counts().unwrap();
    assert_eq!(counts.access_logs, 26);
    assert_eq!(counts.security_events, report.security.security_events.len());
    assert_eq!(counts.performance_metrics, report.performance.performance_metrics.len());

    let start = batch.access[0].timestamp.unwrap();
    let end = batch.access[5].timestamp.unwrap();
    let window = store.get_access_logs_by_timeframe(start, end).unwrap();
    assert_eq!(window, batch.access[..6].to_vec());
}
