//! Recognition of known import failure signatures.
//!
//! Maps raw error text coming out of a work unit to a failure kind and an
//! operator-facing explanation. Permanent signatures short-circuit the retry
//! budget even when the work unit reported the failure as transient.

use lazy_static::lazy_static;
use regex::Regex;

use super::models::{ImportErrorKind, ImportFailure};

struct Signature {
    pattern: Regex,
    kind: ImportErrorKind,
    explanation: &'static str,
}

impl Signature {
    fn new(pattern: &str, kind: ImportErrorKind, explanation: &'static str) -> Self {
        Signature {
            pattern: Regex::new(pattern).expect("Invalid error signature pattern"),
            kind,
            explanation,
        }
    }
}

lazy_static! {
    static ref SIGNATURES: Vec<Signature> = vec![
        Signature::new(
            r"(?i)article (is )?not found|no such article|\b430\b",
            ImportErrorKind::Permanent,
            "The file is incomplete: some articles are missing on the configured Usenet providers",
        ),
        Signature::new(
            r"(?i)(malformed|invalid|corrupt(ed)?) nzb|nzb parse error|failed to parse nzb",
            ImportErrorKind::Permanent,
            "The NZB file is malformed and cannot be imported",
        ),
        Signature::new(
            r"(?i)nzb (contains|has) no (files|segments)|no segments found|empty nzb",
            ImportErrorKind::Permanent,
            "The NZB file does not reference any downloadable content",
        ),
        Signature::new(
            r"(?i)password[- ]protected|encrypted (archive|rar)|wrong password",
            ImportErrorKind::Permanent,
            "The release is password protected",
        ),
        Signature::new(
            r"(?i)too many connections|connection limit",
            ImportErrorKind::Transient,
            "The Usenet provider refused more connections",
        ),
        Signature::new(
            r"(?i)connection (refused|reset|closed)|broken pipe|network (is )?unreachable",
            ImportErrorKind::Transient,
            "The connection to the Usenet provider was interrupted",
        ),
        Signature::new(
            r"(?i)timed? ?out|deadline exceeded",
            ImportErrorKind::Transient,
            "The Usenet provider did not answer in time",
        ),
    ];
}

fn find(raw: &str) -> Option<&'static Signature> {
    SIGNATURES.iter().find(|s| s.pattern.is_match(raw))
}

/// Kind of failure the raw message indicates, if it matches a known signature.
pub fn classify(raw: &str) -> Option<ImportErrorKind> {
    find(raw).map(|s| s.kind)
}

/// Operator-facing message. Known signatures get an explanation followed by
/// the raw text; anything else is returned unchanged.
pub fn humanize(raw: &str) -> String {
    match find(raw) {
        Some(signature) => format!("{} ({})", signature.explanation, raw.trim()),
        None => raw.trim().to_string(),
    }
}

/// Apply the signature table to a work unit failure. Only escalates: a
/// permanent signature makes the failure permanent, nothing makes a
/// permanent failure transient.
pub fn reclassify(failure: ImportFailure) -> ImportFailure {
    match classify(&failure.message) {
        Some(ImportErrorKind::Permanent) => ImportFailure {
            kind: ImportErrorKind::Permanent,
            ..failure
        },
        _ => failure,
    }
}
