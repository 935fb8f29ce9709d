//! Apache access and error log grammars
//!
//! Access lines are tried against an ordered list of grammars, most specific
//! first, and the first full match wins. The same ordering drives format
//! detection so that a file of combined lines is never reported as `common`
//! just because a looser grammar would also accept a prefix of them.

use chrono::NaiveDateTime;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use super::{ParseError, ParsedBatch};
use crate::input::read_lines_lossy;
use crate::models::{AccessRecord, ErrorRecord, LogFormat, LogKind, LogRecord};

/// Lines inspected by `detect_format`
pub const FORMAT_SAMPLE_LINES: usize = 100;

const ACCESS_TIME_FORMAT: &str = "%d/%b/%Y:%H:%M:%S";
const ERROR_TIME_FORMATS: [&str; 2] = ["%a %b %d %H:%M:%S %Y", "%a %b %d %H:%M:%S%.f %Y"];

const COMMON_PREFIX: &str = r#"^(?P<ip_address>\S+) \S+ (?P<user>\S+) \[(?P<timestamp>[^\]]+)\] "(?P<method>\S+) (?P<endpoint>\S+) (?P<protocol>[^"]*)" (?P<status>\S+) (?P<bytes_sent>\S+)"#;
const COMBINED_SUFFIX: &str = r#" "(?P<referrer>[^"]*)" "(?P<user_agent>[^"]*)""#;

static COMMON: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"{}\s*$", COMMON_PREFIX)).expect("common log grammar is valid")
});

static COMBINED: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"{}{}\s*$", COMMON_PREFIX, COMBINED_SUFFIX))
        .expect("combined log grammar is valid")
});

static COMBINED_TIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"{}{} (?P<response_time>\S+)\s*$",
        COMMON_PREFIX, COMBINED_SUFFIX
    ))
    .expect("combined_time log grammar is valid")
});

static ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\[(?P<timestamp>[^\]]+)\] \[(?P<level>[^\]]+)\] (?:\[pid [^\]]*\] )?\[client (?P<client_ip>[^\]]+)\] (?P<message>.*?)\s*$",
    )
    .expect("error log grammar is valid")
});

/// Access grammars in specificity order
static ACCESS_GRAMMARS: [(LogFormat, &Lazy<Regex>); 3] = [
    (LogFormat::CombinedTime, &COMBINED_TIME),
    (LogFormat::Combined, &COMBINED),
    (LogFormat::Common, &COMMON),
];

/// Parser for Apache HTTP Server logs (CLF, combined, combined with
/// response time, and error logs)
#[derive(Debug, Clone, Copy, Default)]
pub struct ApacheLogParser;

impl ApacheLogParser {
    pub fn new() -> Self {
        ApacheLogParser
    }

    /// Parse one line. Blank and unrecognised lines yield `None`.
    pub fn parse_line(&self, line: &str, kind: LogKind) -> Option<LogRecord> {
        if line.trim().is_empty() {
            return None;
        }

        match kind {
            LogKind::Access => self.parse_access_line(line).map(LogRecord::Access),
            LogKind::Error => self.parse_error_line(line).map(LogRecord::Error),
        }
    }

    pub fn parse_access_line(&self, line: &str) -> Option<AccessRecord> {
        for (format, grammar) in ACCESS_GRAMMARS.iter() {
            if let Some(caps) = grammar.captures(line) {
                return Some(Self::access_record(&caps, *format));
            }
        }

        log::warn!("Could not parse access log line: {}...", preview(line));
        None
    }

    pub fn parse_error_line(&self, line: &str) -> Option<ErrorRecord> {
        let Some(caps) = ERROR.captures(line) else {
            log::warn!("Could not parse error log line: {}...", preview(line));
            return None;
        };

        let raw_timestamp = field(&caps, "timestamp");
        let timestamp = ERROR_TIME_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw_timestamp, fmt).ok());
        if timestamp.is_none() {
            log::warn!("Failed to parse error timestamp: {}", raw_timestamp);
        }

        Some(ErrorRecord {
            timestamp,
            level: field(&caps, "level").to_string(),
            client_ip: strip_port(field(&caps, "client_ip")).to_string(),
            message: field(&caps, "message").to_string(),
        })
    }

    fn access_record(caps: &Captures<'_>, format: LogFormat) -> AccessRecord {
        let raw_timestamp = field(caps, "timestamp");
        let timestamp = parse_access_timestamp(raw_timestamp);
        if timestamp.is_none() {
            log::warn!("Failed to parse timestamp: {}", raw_timestamp);
        }

        let response_time = caps
            .name("response_time")
            .map(|m| parse_response_time(m.as_str()))
            .unwrap_or(0.0);

        AccessRecord {
            timestamp,
            ip_address: field(caps, "ip_address").to_string(),
            user: field(caps, "user").to_string(),
            method: field(caps, "method").to_string(),
            endpoint: field(caps, "endpoint").to_string(),
            protocol: field(caps, "protocol").to_string(),
            status: parse_status(field(caps, "status")),
            bytes_sent: parse_bytes(field(caps, "bytes_sent")),
            referrer: caps.name("referrer").map(|m| m.as_str().to_string()),
            user_agent: caps.name("user_agent").map(|m| m.as_str().to_string()),
            response_time,
            log_format: format,
        }
    }

    /// Grammar of a single line, error grammar first, then access grammars
    /// most specific first
    pub fn classify_line(&self, line: &str) -> Option<LogFormat> {
        if ERROR.is_match(line) {
            return Some(LogFormat::Error);
        }
        ACCESS_GRAMMARS
            .iter()
            .find(|(_, grammar)| grammar.is_match(line))
            .map(|(format, _)| *format)
    }

    /// Estimate the dominant format of a log file from its first lines.
    ///
    /// Returns `None` ("unknown") when the file cannot be read or no format
    /// covers at least half of the sampled lines.
    pub fn detect_format(&self, path: &Path) -> Option<LogFormat> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) => {
                log::error!("Error detecting log format for {:?}: {}", path, e);
                return None;
            }
        };

        let mut lines = Vec::with_capacity(FORMAT_SAMPLE_LINES);
        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        while lines.len() < FORMAT_SAMPLE_LINES {
            buf.clear();
            match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => lines.push(String::from_utf8_lossy(&buf).trim_end().to_string()),
                Err(e) => {
                    log::error!("Error detecting log format for {:?}: {}", path, e);
                    return None;
                }
            }
        }

        self.detect_format_from_lines(lines.iter().map(String::as_str))
    }

    /// Same tally as `detect_format`, over in-memory lines
    pub fn detect_format_from_lines<'a, I>(&self, lines: I) -> Option<LogFormat>
    where
        I: IntoIterator<Item = &'a str>,
    {
        // Specificity order doubles as the tie-break
        let mut counts: [(LogFormat, usize); 4] = [
            (LogFormat::Error, 0),
            (LogFormat::CombinedTime, 0),
            (LogFormat::Combined, 0),
            (LogFormat::Common, 0),
        ];
        let mut total = 0usize;

        for line in lines.into_iter().take(FORMAT_SAMPLE_LINES) {
            total += 1;
            if let Some(format) = self.classify_line(line) {
                if let Some(slot) = counts.iter_mut().find(|(f, _)| *f == format) {
                    slot.1 += 1;
                }
            }
        }

        if total == 0 {
            return None;
        }

        let (best_format, best_count) = counts
            .iter()
            .fold((LogFormat::Error, 0usize), |best, &(format, count)| {
                if count > best.1 {
                    (format, count)
                } else {
                    best
                }
            });

        if best_count > 0 && best_count * 2 >= total {
            log::debug!("Detected format {} ({}/{} lines)", best_format, best_count, total);
            Some(best_format)
        } else {
            None
        }
    }

    /// Parse every line of a file as `kind`, skipping what does not match
    pub fn parse_file(&self, path: &Path, kind: LogKind) -> Result<ParsedBatch, ParseError> {
        let lines = read_lines_lossy(path)?;
        let mut batch = ParsedBatch::default();

        for line in lines.iter().map(|l| l.trim()) {
            if line.is_empty() {
                continue;
            }
            match self.parse_line(line, kind) {
                Some(LogRecord::Access(record)) => batch.access.push(record),
                Some(LogRecord::Error(record)) => batch.errors.push(record),
                None => batch.skipped += 1,
            }
        }

        log::info!(
            "Parsed {:?}: {} access, {} error, {} skipped",
            path,
            batch.access.len(),
            batch.errors.len(),
            batch.skipped
        );
        Ok(batch)
    }
}

fn field<'a>(caps: &Captures<'a>, name: &str) -> &'a str {
    caps.name(name).map(|m| m.as_str()).unwrap_or_default()
}

fn preview(line: &str) -> String {
    line.chars().take(50).collect()
}

/// `10/Oct/2023:13:55:36 -0700`, the zone token is ignored
fn parse_access_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let stamp = raw.split_whitespace().next()?;
    NaiveDateTime::parse_from_str(stamp, ACCESS_TIME_FORMAT).ok()
}

fn parse_status(raw: &str) -> u16 {
    match raw.parse::<u16>() {
        Ok(status) if (100..=599).contains(&status) => status,
        _ => 0,
    }
}

fn parse_bytes(raw: &str) -> u64 {
    if raw == "-" {
        return 0;
    }
    raw.parse::<u64>().unwrap_or(0)
}

fn parse_response_time(raw: &str) -> f64 {
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() && value >= 0.0 => value,
        _ => 0.0,
    }
}

/// `1.2.3.4:5678` -> `1.2.3.4`; IPv6 and bare addresses are left alone
fn strip_port(client: &str) -> &str {
    match client.split_once(':') {
        Some((host, port)) if !port.contains(':') && port.chars().all(|c| c.is_ascii_digit()) => {
            host
        }
        _ => client,
    }
}
