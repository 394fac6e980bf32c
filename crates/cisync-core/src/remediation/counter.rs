//! Error counting over check-command output.

use regex::Regex;

use crate::domain::{CheckCommand, EngineError, Result};
use crate::ports::ProcessOutput;

/// Compile a check command's error pattern.
pub fn error_regex(check: &CheckCommand) -> Result<Regex> {
    Regex::new(&check.error_pattern).map_err(|e| {
        EngineError::Config(format!(
            "invalid error pattern for `{}`: {e}",
            check.command
        ))
    })
}

/// Number of output lines matching `pattern`.
///
/// A failing command whose output matches nothing still counts as one
/// error, so a broken tree never reads as clean.
pub fn count_errors(output: &ProcessOutput, pattern: &Regex) -> u32 {
    let matched = output.lines().filter(|l| pattern.is_match(l)).count() as u32;
    if matched == 0 && !output.success() {
        1
    } else {
        matched
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counts_matching_lines_across_streams() {
        let re = Regex::new(r"^Diff in ").unwrap();
        let out = ProcessOutput::new(
            1,
            "Diff in src/a.rs:1:\n-x\n+y\nDiff in src/b.rs:4:\n",
            "Diff in src/c.rs:9:\n",
        );
        assert_eq!(count_errors(&out, &re), 3);
    }

    #[test]
    fn test_clean_output_is_zero() {
        let re = Regex::new(r"^Diff in ").unwrap();
        assert_eq!(count_errors(&ProcessOutput::new(0, "", ""), &re), 0);
    }

    #[test]
    fn test_unmatched_failure_counts_once() {
        let re = Regex::new(r"^Diff in ").unwrap();
        let out = ProcessOutput::new(1, "", "error: expected one of `;`\n");
        assert_eq!(count_errors(&out, &re), 1);
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let check = CheckCommand {
            command: "lint".to_string(),
            args: vec![],
            error_pattern: "(".to_string(),
        };
        assert!(matches!(error_regex(&check), Err(EngineError::Config(_))));
    }
}
