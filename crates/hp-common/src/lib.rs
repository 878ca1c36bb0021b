use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

// ============================================================================
// Server Usage Types
// ============================================================================

/// Rolling usage statistics reported by a hosting server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ServerUsage {
    /// CPU usage in percent (0-100, may exceed 100 on multi-core nodes)
    pub cpu_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    /// Egress bytes since the previous sample
    #[serde(default)]
    pub bandwidth_bytes: u64,
    #[serde(default)]
    pub sampled_at: Option<DateTime<Utc>>,
}

impl ServerUsage {
    pub fn memory_ratio(&self) -> f64 {
        if self.memory_total_bytes == 0 {
            return 0.0;
        }
        self.memory_used_bytes as f64 / self.memory_total_bytes as f64
    }

    pub fn disk_ratio(&self) -> f64 {
        if self.disk_total_bytes == 0 {
            return 0.0;
        }
        self.disk_used_bytes as f64 / self.disk_total_bytes as f64
    }
}

// ============================================================================
// Build Log Types
// ============================================================================

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const TIMESTAMP_LEN: usize = 19;

/// Severity of a build log line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogLevel {
    Info,
    Error,
    Success,
    Warning,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Error => "ERROR",
            LogLevel::Success => "SUCCESS",
            LogLevel::Warning => "WARNING",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "INFO" => Some(LogLevel::Info),
            "ERROR" => Some(LogLevel::Error),
            "SUCCESS" => Some(LogLevel::Success),
            "WARNING" => Some(LogLevel::Warning),
            _ => None,
        }
    }
}

/// A single parsed build log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct BuildLogEntry {
    #[schema(value_type = String)]
    pub timestamp: NaiveDateTime,
    pub level: LogLevel,
    pub message: String,
}

impl BuildLogEntry {
    pub fn new(timestamp: NaiveDateTime, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp,
            level,
            message: message.into(),
        }
    }

    /// Render the entry in the on-disk log line format
    pub fn to_line(&self) -> String {
        format!(
            "[{}] [{}] {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.level.as_str(),
            self.message
        )
    }
}

/// Parse a single `[yyyy-MM-dd HH:mm:ss] [LEVEL] message` line.
fn parse_line(line: &str) -> Option<BuildLogEntry> {
    let rest = line.strip_prefix('[')?;
    let timestamp = rest.get(..TIMESTAMP_LEN)?;
    let timestamp = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;

    let rest = rest.get(TIMESTAMP_LEN..)?.strip_prefix("] [")?;
    let close = rest.find(']')?;
    let level = LogLevel::parse(&rest[..close])?;

    let message = &rest[close + 1..];
    let message = message.strip_prefix(' ').unwrap_or(message);

    Some(BuildLogEntry::new(timestamp, level, message))
}

/// Parse a build log.
///
/// Lines that do not start with a timestamp and level are continuation lines
/// and are appended to the previous entry's message, separated by a newline.
/// Continuation lines before the first entry have nothing to attach to and
/// are dropped.
pub fn parse_build_log(text: &str) -> Vec<BuildLogEntry> {
    let mut entries: Vec<BuildLogEntry> = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        match parse_line(line) {
            Some(entry) => entries.push(entry),
            None => {
                if let Some(last) = entries.last_mut() {
                    last.message.push('\n');
                    last.message.push_str(line);
                }
            }
        }
    }

    entries
}

/// Render entries back into the log file format
pub fn render_build_log(entries: &[BuildLogEntry]) -> String {
    let mut out = String::new();
    for entry in entries {
        out.push_str(&entry.to_line());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_parse_simple_lines() {
        let log = "[2024-03-01 10:00:00] [INFO] Cloning repository\n\
                   [2024-03-01 10:00:05] [SUCCESS] Build finished";
        let entries = parse_build_log(log);

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].timestamp, ts(10, 0, 0));
        assert_eq!(entries[0].level, LogLevel::Info);
        assert_eq!(entries[0].message, "Cloning repository");
        assert_eq!(entries[1].level, LogLevel::Success);
    }

    #[test]
    fn test_continuation_lines_are_appended() {
        let log = "[2024-03-01 10:00:00] [ERROR] npm ERR! build failed\n\
                   at Object.<anonymous> (index.js:1:1)\n\
                   at Module._compile\n\
                   [2024-03-01 10:00:01] [WARNING] retry disabled";
        let entries = parse_build_log(log);

        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0].message,
            "npm ERR! build failed\nat Object.<anonymous> (index.js:1:1)\nat Module._compile"
        );
        assert_eq!(entries[1].level, LogLevel::Warning);
    }

    #[test]
    fn test_leading_unmatched_lines_dropped() {
        let log = "garbage before\n[2024-03-01 10:00:00] [INFO] start";
        let entries = parse_build_log(log);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "start");
    }

    #[test]
    fn test_unknown_level_is_continuation() {
        let log = "[2024-03-01 10:00:00] [INFO] start\n[2024-03-01 10:00:01] [DEBUG] nope";
        let entries = parse_build_log(log);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "start\n[2024-03-01 10:00:01] [DEBUG] nope");
    }

    #[test]
    fn test_render_then_parse_preserves_entries() {
        let entries = vec![
            BuildLogEntry::new(ts(9, 30, 0), LogLevel::Info, "Deploying abc123"),
            BuildLogEntry::new(ts(9, 31, 0), LogLevel::Error, "remote returned 502"),
        ];
        assert_eq!(parse_build_log(&render_build_log(&entries)), entries);
    }

    #[test]
    fn test_usage_ratios() {
        let usage = ServerUsage {
            memory_used_bytes: 512,
            memory_total_bytes: 1024,
            ..Default::default()
        };
        assert!((usage.memory_ratio() - 0.5).abs() < f64::EPSILON);
        assert_eq!(usage.disk_ratio(), 0.0);
    }
}
