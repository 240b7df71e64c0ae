//! Transferred-byte extraction from sync tool output.
//!
//! Two signals, in priority order:
//! 1. `Total bytes transferred : <n>`: the final figure, always wins
//! 2. `Total size ... bytes: <n>`: an early estimate, used only until (1) shows up.
//!    The first non-zero estimate sticks, so the source host's size is kept
//!    over the target's.

use std::sync::LazyLock;

use regex::Regex;

static AUTHORITATIVE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)total bytes transferred.*?:\s*(\d+)").expect("valid pattern")
});

static ESTIMATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)total size.*?:\s*(\d+)").expect("valid pattern")
});

/// Running byte figure for one sync invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferTally {
    authoritative: Option<u64>,
    estimate: Option<u64>,
}

impl TransferTally {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one output line. Unparseable numbers are ignored.
    pub fn observe(&mut self, line: &str) {
        if let Some(n) = capture(&AUTHORITATIVE, line) {
            self.authoritative = Some(n);
            return;
        }
        if self.authoritative.is_none()
            && self.estimate.unwrap_or(0) == 0
            && line.to_ascii_lowercase().contains("bytes")
        {
            if let Some(n) = capture(&ESTIMATE, line) {
                self.estimate = Some(n);
            }
        }
    }

    /// Authoritative total if seen, else the first non-zero estimate, else 0.
    pub fn total(&self) -> u64 {
        self.authoritative.or(self.estimate).unwrap_or(0)
    }

    pub fn is_authoritative(&self) -> bool {
        self.authoritative.is_some()
    }
}

fn capture(re: &Regex, line: &str) -> Option<u64> {
    re.captures(line)?.get(1)?.as_str().parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tally(lines: &[&str]) -> TransferTally {
        let mut t = TransferTally::new();
        for line in lines {
            t.observe(line);
        }
        t
    }

    #[test]
    fn authoritative_overrides_estimate() {
        let t = tally(&[
            "Host1 Total size in bytes: 500 (0.5 KiB)",
            "Transfer started on ...",
            "Total bytes transferred : 900",
        ]);
        assert_eq!(t.total(), 900);
        assert!(t.is_authoritative());
    }

    #[test]
    fn estimate_alone_is_used() {
        let t = tally(&["Host1 Total size: 500 bytes"]);
        assert_eq!(t.total(), 500);
        assert!(!t.is_authoritative());
    }

    #[test]
    fn source_estimate_is_kept_over_target_estimate() {
        let t = tally(&[
            "Host1 Total size: 500 bytes",
            "Host2 Total size: 700 bytes",
        ]);
        assert_eq!(t.total(), 500);
    }

    #[test]
    fn zero_estimate_is_replaced_by_a_later_one() {
        let t = tally(&[
            "Host1 Total size: 0 bytes",
            "Host2 Total size: 700 bytes",
        ]);
        assert_eq!(t.total(), 700);
    }

    #[test]
    fn nothing_recognised_is_zero() {
        let t = tally(&["Folder INBOX", "Msg 1/3 copied", ""]);
        assert_eq!(t.total(), 0);
    }

    #[test]
    fn estimate_after_authoritative_is_ignored() {
        let t = tally(&[
            "Total bytes transferred : 900",
            "Host2 Total size: 12345 bytes",
        ]);
        assert_eq!(t.total(), 900);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let t = tally(&["TOTAL BYTES TRANSFERRED   :   42"]);
        assert_eq!(t.total(), 42);
    }

    #[test]
    fn oversized_number_is_ignored() {
        let t = tally(&[
            "Host1 Total size: 500 bytes",
            "Total bytes transferred : 999999999999999999999999999",
        ]);
        assert_eq!(t.total(), 500);
    }

    #[test]
    fn size_line_without_bytes_is_not_an_estimate() {
        let t = tally(&["Total size of folders: 12"]);
        assert_eq!(t.total(), 0);
    }
}
