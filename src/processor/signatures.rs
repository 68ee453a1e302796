//! Crash, ANR and memory signatures plus message keyword lists

use crate::events::LogRecord;
use regex::RegexSet;
use std::sync::OnceLock;

const CRASH_PATTERNS: &[&str] = &[
    r"FATAL EXCEPTION",
    r"AndroidRuntime.*FATAL",
    r"java\.lang\.\w*Exception",
    r"Fatal signal \d+",
    r"SIGSEGV|SIGABRT|SIGBUS",
    r"tombstone",
    r"System server crashed",
    r"Kernel panic",
];

const ANR_PATTERNS: &[&str] = &[
    r"ANR in",
    r"Input dispatching timed out",
    r"Broadcast of Intent.*took",
];

const MEMORY_PATTERNS: &[&str] = &[r"OutOfMemoryError", r"Low memory killer", r"killed.*oom"];

/// Lower-case words counted as error keywords in a message
pub const ERROR_KEYWORDS: &[&str] = &["error", "exception", "fail", "crash", "fatal", "abort"];

/// Lower-case words counted as warning keywords in a message
pub const WARNING_KEYWORDS: &[&str] = &["warn", "timeout", "retry", "deprecated", "slow", "blocked"];

/// Problem class a record matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureKind {
    Crash,
    Anr,
    Memory,
}

struct SignatureSets {
    crash: RegexSet,
    anr: RegexSet,
    memory: RegexSet,
}

fn signature_sets() -> &'static SignatureSets {
    static SETS: OnceLock<SignatureSets> = OnceLock::new();
    SETS.get_or_init(|| SignatureSets {
        crash: RegexSet::new(CRASH_PATTERNS).expect("crash patterns are valid"),
        anr: RegexSet::new(ANR_PATTERNS).expect("ANR patterns are valid"),
        memory: RegexSet::new(MEMORY_PATTERNS).expect("memory patterns are valid"),
    })
}

/// Classify a record against the signature tables
///
/// Patterns are matched against `TAG: MESSAGE`. A record counts for at most
/// one kind, checked in the order crash, ANR, memory.
pub fn classify(record: &LogRecord) -> Option<SignatureKind> {
    let text = record.tagged_message();
    let sets = signature_sets();

    if sets.crash.is_match(&text) {
        Some(SignatureKind::Crash)
    } else if sets.anr.is_match(&text) {
        Some(SignatureKind::Anr)
    } else if sets.memory.is_match(&text) {
        Some(SignatureKind::Memory)
    } else {
        None
    }
}

/// Count keyword hits in a message (case-insensitive, one per keyword)
pub fn keyword_hits(message: &str, keywords: &[&str]) -> usize {
    let lower = message.to_lowercase();
    keywords.iter().filter(|keyword| lower.contains(*keyword)).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::LogLevel;
    use chrono::Utc;

    fn record(tag: &str, message: &str) -> LogRecord {
        LogRecord {
            timestamp: Utc::now(),
            pid: None,
            tid: None,
            level: LogLevel::Error,
            tag: tag.to_string(),
            message: message.to_string(),
            raw_line: String::new(),
            source_id: "dev".to_string(),
        }
    }

    #[test]
    fn test_crash_signatures() {
        assert_eq!(
            classify(&record("AndroidRuntime", "FATAL EXCEPTION: main")),
            Some(SignatureKind::Crash)
        );
        assert_eq!(
            classify(&record("libc", "Fatal signal 11 (SIGSEGV), code 1")),
            Some(SignatureKind::Crash)
        );
        assert_eq!(
            classify(&record("MyApp", "java.lang.NullPointerException: boom")),
            Some(SignatureKind::Crash)
        );
    }

    #[test]
    fn test_anr_and_memory_signatures() {
        assert_eq!(
            classify(&record("ActivityManager", "ANR in com.app")),
            Some(SignatureKind::Anr)
        );
        assert_eq!(
            classify(&record("System", "OutOfMemoryError: Failed to allocate")),
            Some(SignatureKind::Memory)
        );
        assert_eq!(
            classify(&record("lowmemorykiller", "Low memory killer: killing 1234")),
            Some(SignatureKind::Memory)
        );
        assert_eq!(classify(&record("MyApp", "User clicked button")), None);
    }

    #[test]
    fn test_crash_takes_precedence() {
        assert_eq!(
            classify(&record("AndroidRuntime", "FATAL EXCEPTION after ANR in com.app")),
            Some(SignatureKind::Crash)
        );
    }

    #[test]
    fn test_keyword_hits() {
        assert_eq!(keyword_hits("Network TIMEOUT, retrying", WARNING_KEYWORDS), 2);
        assert_eq!(keyword_hits("Failed with Error", ERROR_KEYWORDS), 2);
        assert_eq!(keyword_hits("all good", ERROR_KEYWORDS), 0);
    }
}
