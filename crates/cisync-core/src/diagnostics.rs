//! Diagnostic extraction from raw CI log text.
//!
//! An [`ExtractorRegistry`] holds format-specific extractors in a fixed
//! priority order. The first extractor that recognizes the text wins; when
//! none does, the result degrades to [`ErrorKind::Unknown`] with the raw
//! text as summary. New formats are appended with
//! [`ExtractorRegistry::register`]; existing extractors are never touched.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::{ErrorKind, FailureDetail};

/// Longest summary kept for unrecognized output.
const MAX_FALLBACK_SUMMARY: usize = 2_000;

/// Structured diagnostics recovered from one log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosticFragment {
    pub error_kind: ErrorKind,
    pub affected_files: BTreeSet<String>,
    pub summary: String,
    pub suggested_fix: Option<String>,
    /// Name of the extractor that produced this fragment.
    pub extractor: String,
}

impl DiagnosticFragment {
    fn new(extractor: &str, error_kind: ErrorKind, summary: impl Into<String>) -> Self {
        Self {
            error_kind,
            affected_files: BTreeSet::new(),
            summary: summary.into(),
            suggested_fix: None,
            extractor: extractor.to_string(),
        }
    }

    fn files(mut self, files: impl IntoIterator<Item = String>) -> Self {
        self.affected_files.extend(files);
        self
    }

    fn fix(mut self, fix: &str) -> Self {
        self.suggested_fix = Some(fix.to_string());
        self
    }

    /// Fallback used when no extractor matches.
    pub fn unknown(raw: &str) -> Self {
        let trimmed = raw.trim();
        let summary = if trimmed.len() > MAX_FALLBACK_SUMMARY {
            let mut end = MAX_FALLBACK_SUMMARY;
            while !trimmed.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}…", &trimmed[..end])
        } else {
            trimmed.to_string()
        };
        Self::new("unknown", ErrorKind::Unknown, summary)
    }

    /// Attach this fragment to a check.
    pub fn into_failure_detail(self, check_name: impl Into<String>) -> FailureDetail {
        FailureDetail {
            check_name: check_name.into(),
            error_kind: self.error_kind,
            affected_files: self.affected_files,
            summary: self.summary,
            suggested_fix: self.suggested_fix,
        }
    }
}

/// Signature every extractor implements.
pub type ExtractFn = fn(&str) -> Option<DiagnosticFragment>;

/// A named, pure extraction function.
#[derive(Clone, Copy)]
pub struct Extractor {
    pub name: &'static str,
    pub extract: ExtractFn,
}

impl std::fmt::Debug for Extractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extractor").field("name", &self.name).finish()
    }
}

/// Ordered table of extractors; earlier entries take priority.
#[derive(Debug, Clone, Default)]
pub struct ExtractorRegistry {
    extractors: Vec<Extractor>,
}

impl ExtractorRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with every built-in format, most specific first.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        registry
            .register("security_advisory", extract_security_advisory)
            .register("ci_timeout", extract_ci_timeout)
            .register("rustfmt", extract_rustfmt)
            .register("clippy", extract_clippy)
            .register("cargo_test", extract_cargo_test)
            .register("rustc", extract_rustc)
            .register("pytest", extract_pytest)
            .register("jest", extract_jest)
            .register("go_test", extract_go_test)
            .register("go_build", extract_go_build)
            .register("tsc", extract_tsc)
            .register("mypy", extract_mypy)
            .register("eslint", extract_eslint)
            .register("python_lint", extract_python_lint)
            .register("python_traceback", extract_python_traceback)
            .register("node_stack", extract_node_stack);
        registry
    }

    /// Append an extractor at the lowest priority.
    pub fn register(&mut self, name: &'static str, extract: ExtractFn) -> &mut Self {
        self.extractors.push(Extractor { name, extract });
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.extractors.iter().map(|e| e.name).collect()
    }

    /// Run extractors in order; fall back to `unknown`.
    pub fn extract(&self, raw: &str) -> DiagnosticFragment {
        for extractor in &self.extractors {
            if let Some(mut fragment) = (extractor.extract)(raw) {
                fragment.extractor = extractor.name.to_string();
                return fragment;
            }
        }
        DiagnosticFragment::unknown(raw)
    }
}

static STANDARD: LazyLock<ExtractorRegistry> = LazyLock::new(ExtractorRegistry::standard);

/// Extract diagnostics using the built-in registry.
pub fn extract_diagnostics(raw: &str) -> DiagnosticFragment {
    STANDARD.extract(raw)
}

/// Guess the error kind from a check name when its log is unhelpful.
pub fn infer_error_kind(check_name: &str) -> ErrorKind {
    let lower = check_name.to_ascii_lowercase();
    let has = |words: &[&str]| words.iter().any(|w| lower.contains(w));
    if has(&["audit", "security", "codeql", "snyk", "trivy", "deny"]) {
        ErrorKind::SecurityFinding
    } else if has(&["lint", "clippy", "fmt", "format", "eslint", "prettier", "ruff", "style"]) {
        ErrorKind::LintError
    } else if has(&["typecheck", "type-check", "types", "tsc", "mypy", "pyright"]) {
        ErrorKind::TypeError
    } else if has(&["test", "spec", "e2e"]) {
        ErrorKind::TestFailure
    } else if has(&["build", "compile", "check"]) {
        ErrorKind::BuildError
    } else {
        ErrorKind::Unknown
    }
}

/// Build a [`FailureDetail`] for a failed check from its log text.
///
/// Unknown fragments take their kind from the check name instead.
pub fn failure_detail_from_log(check_name: &str, raw: &str) -> FailureDetail {
    let mut fragment = extract_diagnostics(raw);
    if fragment.error_kind == ErrorKind::Unknown {
        fragment.error_kind = infer_error_kind(check_name);
        if fragment.summary.is_empty() {
            fragment.summary = format!("check '{check_name}' failed");
        }
    }
    fragment.into_failure_detail(check_name)
}

impl FailureDetail {
    /// See [`failure_detail_from_log`].
    pub fn from_log(check_name: &str, raw: &str) -> Self {
        failure_detail_from_log(check_name, raw)
    }
}

// ---------------------------------------------------------------------------
// Extractors
// ---------------------------------------------------------------------------

/// Compile a literal pattern; `None` (an invalid pattern) never matches.
fn re(pattern: &str) -> Option<Regex> {
    Regex::new(pattern).ok()
}

fn is_match(re: &Option<Regex>, raw: &str) -> bool {
    re.as_ref().is_some_and(|re| re.is_match(raw))
}

fn captures_all(re: &Option<Regex>, raw: &str, group: usize) -> Vec<String> {
    re.iter()
        .flat_map(|re| re.captures_iter(raw))
        .filter_map(|c| c.get(group).map(|m| m.as_str().to_string()))
        .collect()
}

fn dedup_join(items: &[String], limit: usize) -> String {
    let mut seen = BTreeSet::new();
    let unique: Vec<&str> = items
        .iter()
        .filter(|i| seen.insert(i.as_str()))
        .map(String::as_str)
        .collect();
    let shown: Vec<&str> = unique.iter().take(limit).copied().collect();
    if unique.len() > limit {
        format!("{} (+{} more)", shown.join(", "), unique.len() - limit)
    } else {
        shown.join(", ")
    }
}

static ADVISORY_ID: LazyLock<Option<Regex>> =
    LazyLock::new(|| re(r"\b(RUSTSEC-\d{4}-\d{4}|CVE-\d{4}-\d{4,}|GHSA(?:-[0-9a-z]{4}){3})\b"));
static VULN_COUNT: LazyLock<Option<Regex>> =
    LazyLock::new(|| re(r"(?i)found (\d+) (?:\w+ )?(?:severity )?vulnerabilit(?:y|ies)"));
static LOCKFILE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    re(r"\b((?:[\w./-]+/)?(?:Cargo\.lock|package-lock\.json|yarn\.lock|pnpm-lock\.yaml|poetry\.lock|requirements\.txt|go\.sum))\b")
});

fn extract_security_advisory(raw: &str) -> Option<DiagnosticFragment> {
    let ids = captures_all(&ADVISORY_ID, raw, 1);
    let count = VULN_COUNT
        .as_ref()
        .and_then(|re| re.captures(raw))
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|n| *n > 0);
    if ids.is_empty() && count.is_none() {
        return None;
    }
    let summary = if ids.is_empty() {
        format!("{} known vulnerabilities reported", count.unwrap_or(0))
    } else {
        format!("security advisories: {}", dedup_join(&ids, 5))
    };
    Some(
        DiagnosticFragment::new("security_advisory", ErrorKind::SecurityFinding, summary)
            .files(captures_all(&LOCKFILE, raw, 1))
            .fix("upgrade or replace the affected dependencies"),
    )
}

static CI_TIMEOUT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    re(r"(?i)(has exceeded the maximum execution time of [^\n.]+|job was cancelled because it exceeded[^\n]*|timed out after \d+ ?(?:minutes|seconds|mins?|secs?|[ms])\b[^\n]*)")
});

fn extract_ci_timeout(raw: &str) -> Option<DiagnosticFragment> {
    let m = CI_TIMEOUT.as_ref()?.captures(raw)?.get(1)?;
    Some(
        DiagnosticFragment::new("ci_timeout", ErrorKind::Timeout, m.as_str().trim())
            .fix("re-run the job or raise its timeout"),
    )
}

static RUSTFMT_DIFF: LazyLock<Option<Regex>> =
    LazyLock::new(|| re(r"(?m)^Diff in (\S+?\.rs)(?:(?::\d+)+:?| at line \d+:?)?\s*$"));

fn extract_rustfmt(raw: &str) -> Option<DiagnosticFragment> {
    let files = captures_all(&RUSTFMT_DIFF, raw, 1);
    if files.is_empty() {
        return None;
    }
    let summary = format!("rustfmt differences in {} location(s)", files.len());
    Some(
        DiagnosticFragment::new("rustfmt", ErrorKind::LintError, summary)
            .files(files)
            .fix("cargo fmt --all"),
    )
}

static RUST_LOCATION: LazyLock<Option<Regex>> = LazyLock::new(|| re(r"(?m)^\s*--> (\S+?\.rs):\d+:\d+"));
static CLIPPY_LINT: LazyLock<Option<Regex>> = LazyLock::new(|| re(r"clippy::([a-z_-]+)"));

fn extract_clippy(raw: &str) -> Option<DiagnosticFragment> {
    let lints = captures_all(&CLIPPY_LINT, raw, 1);
    if lints.is_empty() {
        return None;
    }
    let summary = format!("clippy lints: {}", dedup_join(&lints, 5));
    Some(
        DiagnosticFragment::new("clippy", ErrorKind::LintError, summary)
            .files(captures_all(&RUST_LOCATION, raw, 1))
            .fix("cargo clippy --fix"),
    )
}

static CARGO_TEST_FAILED: LazyLock<Option<Regex>> =
    LazyLock::new(|| re(r"test result: FAILED\. \d+ passed; (\d+) failed"));
static CARGO_TEST_NAME: LazyLock<Option<Regex>> = LazyLock::new(|| re(r"(?m)^---- (\S+) stdout ----$"));
static RUST_PANIC: LazyLock<Option<Regex>> = LazyLock::new(|| re(r"panicked at (\S+?\.rs):\d+:\d+"));

fn extract_cargo_test(raw: &str) -> Option<DiagnosticFragment> {
    let failed = CARGO_TEST_FAILED.as_ref().and_then(|re| re.captures(raw));
    let names = captures_all(&CARGO_TEST_NAME, raw, 1);
    if failed.is_none() && names.is_empty() {
        return None;
    }
    let count = failed
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<usize>().ok())
        .unwrap_or(names.len());
    let summary = if names.is_empty() {
        format!("{count} test(s) failed")
    } else {
        format!("{count} test(s) failed: {}", dedup_join(&names, 5))
    };
    Some(
        DiagnosticFragment::new("cargo_test", ErrorKind::TestFailure, summary)
            .files(captures_all(&RUST_PANIC, raw, 1)),
    )
}

static RUSTC_ERROR: LazyLock<Option<Regex>> =
    LazyLock::new(|| re(r"(?m)^error(?:\[(E\d{4})\])?: (.+)$"));

/// rustc codes that describe type mismatches rather than general build errors.
const RUST_TYPE_CODES: &[&str] = &["E0061", "E0282", "E0283", "E0277", "E0308", "E0369", "E0599", "E0614"];

fn extract_rustc(raw: &str) -> Option<DiagnosticFragment> {
    let mut codes = Vec::new();
    let mut messages = Vec::new();
    for caps in RUSTC_ERROR.iter().flat_map(|re| re.captures_iter(raw)) {
        let message = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        if message.starts_with("aborting due to") || message.starts_with("could not compile") {
            continue;
        }
        if let Some(code) = caps.get(1) {
            codes.push(code.as_str().to_string());
        }
        messages.push(message.to_string());
    }
    if messages.is_empty() {
        return None;
    }
    let kind = if !codes.is_empty() && codes.iter().all(|c| RUST_TYPE_CODES.contains(&c.as_str())) {
        ErrorKind::TypeError
    } else {
        ErrorKind::BuildError
    };
    let summary = format!("{} compile error(s): {}", messages.len(), messages[0]);
    Some(DiagnosticFragment::new("rustc", kind, summary).files(captures_all(&RUST_LOCATION, raw, 1)))
}

static PYTEST_FAILED: LazyLock<Option<Regex>> =
    LazyLock::new(|| re(r"(?m)^(?:FAILED|ERROR) (\S+?\.py)::(\S+)"));
static PYTEST_SUMMARY: LazyLock<Option<Regex>> = LazyLock::new(|| re(r"(?m)^=+ (?:.*?)(\d+) failed"));

fn extract_pytest(raw: &str) -> Option<DiagnosticFragment> {
    let files = captures_all(&PYTEST_FAILED, raw, 1);
    let tests = captures_all(&PYTEST_FAILED, raw, 2);
    if files.is_empty() && !is_match(&PYTEST_SUMMARY, raw) {
        return None;
    }
    let summary = if tests.is_empty() {
        "pytest reported failures".to_string()
    } else {
        format!("{} test(s) failed: {}", tests.len(), dedup_join(&tests, 5))
    };
    Some(DiagnosticFragment::new("pytest", ErrorKind::TestFailure, summary).files(files))
}

static JEST_FAIL: LazyLock<Option<Regex>> =
    LazyLock::new(|| re(r"(?m)^\s*FAIL\s+(\S+?\.(?:[jt]sx?|mjs|cjs))\b"));

fn extract_jest(raw: &str) -> Option<DiagnosticFragment> {
    let files = captures_all(&JEST_FAIL, raw, 1);
    if files.is_empty() {
        return None;
    }
    let summary = format!("{} test suite(s) failed", files.len());
    Some(DiagnosticFragment::new("jest", ErrorKind::TestFailure, summary).files(files))
}

static GO_TEST_FAIL: LazyLock<Option<Regex>> = LazyLock::new(|| re(r"(?m)^\s*--- FAIL: (\S+)"));
static GO_TEST_FILE: LazyLock<Option<Regex>> = LazyLock::new(|| re(r"(?m)^\s+(\S+_test\.go):\d+:"));

fn extract_go_test(raw: &str) -> Option<DiagnosticFragment> {
    let tests = captures_all(&GO_TEST_FAIL, raw, 1);
    if tests.is_empty() {
        return None;
    }
    let summary = format!("{} go test(s) failed: {}", tests.len(), dedup_join(&tests, 5));
    Some(
        DiagnosticFragment::new("go_test", ErrorKind::TestFailure, summary)
            .files(captures_all(&GO_TEST_FILE, raw, 1)),
    )
}

static GO_PACKAGE_HEADER: LazyLock<Option<Regex>> = LazyLock::new(|| re(r"(?m)^# \S+$"));
static GO_ERROR: LazyLock<Option<Regex>> = LazyLock::new(|| re(r"(?m)^(\S+?\.go):\d+:\d+: (.+)$"));

fn extract_go_build(raw: &str) -> Option<DiagnosticFragment> {
    if !is_match(&GO_PACKAGE_HEADER, raw) {
        return None;
    }
    let files = captures_all(&GO_ERROR, raw, 1);
    let messages = captures_all(&GO_ERROR, raw, 2);
    let first = messages.first()?;
    let summary = format!("{} go build error(s): {first}", messages.len());
    Some(DiagnosticFragment::new("go_build", ErrorKind::BuildError, summary).files(files))
}

static TSC_ERROR: LazyLock<Option<Regex>> = LazyLock::new(|| {
    re(r"(?m)^(\S+?\.(?:tsx?|vue))(?:\(\d+,\d+\)|:\d+:\d+ -) error (TS\d+): (.+)$")
});

fn extract_tsc(raw: &str) -> Option<DiagnosticFragment> {
    let files = captures_all(&TSC_ERROR, raw, 1);
    if files.is_empty() {
        return None;
    }
    let codes = captures_all(&TSC_ERROR, raw, 2);
    let summary = format!("{} TypeScript error(s): {}", files.len(), dedup_join(&codes, 5));
    Some(DiagnosticFragment::new("tsc", ErrorKind::TypeError, summary).files(files))
}

static MYPY_ERROR: LazyLock<Option<Regex>> =
    LazyLock::new(|| re(r"(?m)^(\S+?\.pyi?):\d+(?::\d+)?: error: (.+)$"));

fn extract_mypy(raw: &str) -> Option<DiagnosticFragment> {
    let files = captures_all(&MYPY_ERROR, raw, 1);
    if files.is_empty() {
        return None;
    }
    let messages = captures_all(&MYPY_ERROR, raw, 2);
    let summary = format!("{} type error(s): {}", messages.len(), messages[0]);
    Some(DiagnosticFragment::new("mypy", ErrorKind::TypeError, summary).files(files))
}

static ESLINT_FILE: LazyLock<Option<Regex>> =
    LazyLock::new(|| re(r"^(\S+?\.(?:js|jsx|ts|tsx|mjs|cjs|vue|svelte))\s*$"));
static ESLINT_ISSUE: LazyLock<Option<Regex>> =
    LazyLock::new(|| re(r"^\s+\d+:\d+\s+(?:error|warning)\s+.+?\s+(\S+)\s*$"));

fn extract_eslint(raw: &str) -> Option<DiagnosticFragment> {
    let mut current: Option<&str> = None;
    let mut files = BTreeSet::new();
    let mut rules = Vec::new();
    for line in raw.lines() {
        if let Some(c) = ESLINT_FILE.as_ref().and_then(|re| re.captures(line)) {
            current = c.get(1).map(|m| m.as_str());
        } else if let Some(c) = ESLINT_ISSUE.as_ref().and_then(|re| re.captures(line)) {
            if let Some(file) = current {
                files.insert(file.to_string());
                if let Some(rule) = c.get(1) {
                    rules.push(rule.as_str().to_string());
                }
            }
        } else if line.trim().is_empty() {
            current = None;
        }
    }
    if files.is_empty() {
        return None;
    }
    let summary = format!("eslint problems ({}) in {} file(s)", dedup_join(&rules, 5), files.len());
    Some(
        DiagnosticFragment::new("eslint", ErrorKind::LintError, summary)
            .files(files)
            .fix("npx eslint --fix ."),
    )
}

static PY_LINT: LazyLock<Option<Regex>> =
    LazyLock::new(|| re(r"(?m)^(\S+?\.py):\d+:\d+: ([A-Z]+\d+) (.+)$"));

fn extract_python_lint(raw: &str) -> Option<DiagnosticFragment> {
    let files = captures_all(&PY_LINT, raw, 1);
    if files.is_empty() {
        return None;
    }
    let codes = captures_all(&PY_LINT, raw, 2);
    let summary = format!("{} lint issue(s): {}", codes.len(), dedup_join(&codes, 5));
    Some(
        DiagnosticFragment::new("python_lint", ErrorKind::LintError, summary)
            .files(files)
            .fix("ruff check --fix ."),
    )
}

static PY_TRACEBACK: LazyLock<Option<Regex>> = LazyLock::new(|| re(r"Traceback \(most recent call last\):"));
static PY_FRAME: LazyLock<Option<Regex>> = LazyLock::new(|| re(r#"(?m)^\s*File "([^"]+)", line \d+"#));
static PY_EXCEPTION: LazyLock<Option<Regex>> =
    LazyLock::new(|| re(r"(?m)^([A-Za-z_][\w.]*(?:Error|Exception|Exit|Interrupt)(?::.*)?)$"));

fn extract_python_traceback(raw: &str) -> Option<DiagnosticFragment> {
    if !is_match(&PY_TRACEBACK, raw) {
        return None;
    }
    let files: Vec<String> = captures_all(&PY_FRAME, raw, 1)
        .into_iter()
        .filter(|f| !f.contains("site-packages") && !f.starts_with('<'))
        .collect();
    let summary = captures_all(&PY_EXCEPTION, raw, 1)
        .pop()
        .unwrap_or_else(|| "python traceback".to_string());
    Some(DiagnosticFragment::new("python_traceback", ErrorKind::TestFailure, summary).files(files))
}

static NODE_FRAME: LazyLock<Option<Regex>> =
    LazyLock::new(|| re(r"(?m)^\s+at (?:.+? \()?(\S+?\.(?:js|ts|mjs|cjs|jsx|tsx)):\d+:\d+\)?$"));
static NODE_ERROR: LazyLock<Option<Regex>> =
    LazyLock::new(|| re(r"(?m)^((?:[A-Z]\w*)?Error: .+)$"));

fn extract_node_stack(raw: &str) -> Option<DiagnosticFragment> {
    let files: Vec<String> = captures_all(&NODE_FRAME, raw, 1)
        .into_iter()
        .filter(|f| !f.contains("node_modules") && !f.starts_with("node:"))
        .collect();
    if files.is_empty() {
        return None;
    }
    let summary = NODE_ERROR
        .as_ref()
        .and_then(|re| re.captures(raw))
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "uncaught exception".to_string());
    Some(DiagnosticFragment::new("node_stack", ErrorKind::TestFailure, summary).files(files))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_order() {
        let names = ExtractorRegistry::standard().names();
        assert_eq!(names.first(), Some(&"security_advisory"));
        assert!(names.iter().position(|n| *n == "clippy") < names.iter().position(|n| *n == "rustc"));
        assert_eq!(names.len(), 16);
    }

    #[test]
    fn test_unmatched_text_degrades_to_unknown() {
        let frag = extract_diagnostics("something odd happened\n");
        assert_eq!(frag.error_kind, ErrorKind::Unknown);
        assert!(frag.affected_files.is_empty());
        assert_eq!(frag.summary, "something odd happened");
        assert_eq!(frag.extractor, "unknown");
    }

    #[test]
    fn test_empty_registry_falls_back() {
        let frag = ExtractorRegistry::empty().extract("test result: FAILED. 1 passed; 1 failed");
        assert_eq!(frag.error_kind, ErrorKind::Unknown);
    }

    #[test]
    fn test_registered_extractor_is_appended() {
        fn custom(raw: &str) -> Option<DiagnosticFragment> {
            raw.contains("BAZEL FAILED")
                .then(|| DiagnosticFragment::new("bazel", ErrorKind::BuildError, "bazel build failed"))
        }
        let mut registry = ExtractorRegistry::standard();
        registry.register("bazel", custom);
        let frag = registry.extract("ERROR: BAZEL FAILED");
        assert_eq!(frag.error_kind, ErrorKind::BuildError);
        assert_eq!(frag.extractor, "bazel");
    }

    #[test]
    fn test_rustfmt_diff() {
        let log = "Diff in /home/runner/work/app/src/main.rs at line 12:\n-fn main(){}\n+fn main() {}\nDiff in src/lib.rs:4:\n";
        let frag = extract_diagnostics(log);
        assert_eq!(frag.error_kind, ErrorKind::LintError);
        assert_eq!(frag.extractor, "rustfmt");
        assert!(frag.affected_files.contains("src/lib.rs"));
        assert!(frag.affected_files.contains("/home/runner/work/app/src/main.rs"));
    }

    #[test]
    fn test_clippy_wins_over_rustc() {
        let log = r#"error: this `if` has identical blocks
  --> src/engine.rs:42:9
   |
   = help: for further information visit https://rust-lang.github.io/rust-clippy/master/index.html#if_same_then_else
   = note: `-D clippy::if-same-then-else` implied by `-D warnings`
error: could not compile `engine` due to previous error
"#;
        let frag = extract_diagnostics(log);
        assert_eq!(frag.extractor, "clippy");
        assert_eq!(frag.error_kind, ErrorKind::LintError);
        assert!(frag.affected_files.contains("src/engine.rs"));
    }

    #[test]
    fn test_cargo_test_failure() {
        let log = r#"running 3 tests
test tests::ok ... ok
test tests::breaks ... FAILED

failures:

---- tests::breaks stdout ----
thread 'tests::breaks' panicked at src/poller.rs:88:9:
assertion `left == right` failed

test result: FAILED. 2 passed; 1 failed; 0 ignored; 0 measured; 0 filtered out
"#;
        let frag = extract_diagnostics(log);
        assert_eq!(frag.error_kind, ErrorKind::TestFailure);
        assert!(frag.summary.contains("tests::breaks"));
        assert!(frag.affected_files.contains("src/poller.rs"));
    }

    #[test]
    fn test_rustc_type_vs_build_error() {
        let type_log = "error[E0308]: mismatched types\n --> src/a.rs:3:5\nerror: aborting due to 1 previous error\n";
        let frag = extract_diagnostics(type_log);
        assert_eq!(frag.error_kind, ErrorKind::TypeError);
        assert!(frag.affected_files.contains("src/a.rs"));

        let build_log = "error[E0432]: unresolved import `foo`\n --> src/b.rs:1:5\n";
        assert_eq!(extract_diagnostics(build_log).error_kind, ErrorKind::BuildError);
    }

    #[test]
    fn test_pytest_failures() {
        let log = "FAILED tests/test_api.py::test_login - AssertionError\n==== 1 failed, 12 passed in 3.21s ====\n";
        let frag = extract_diagnostics(log);
        assert_eq!(frag.extractor, "pytest");
        assert!(frag.affected_files.contains("tests/test_api.py"));
    }

    #[test]
    fn test_jest_failures() {
        let log = " FAIL  src/components/Button.test.tsx\n  ● Button › renders\n";
        let frag = extract_diagnostics(log);
        assert_eq!(frag.extractor, "jest");
        assert!(frag.affected_files.contains("src/components/Button.test.tsx"));
    }

    #[test]
    fn test_go_test_and_build() {
        let test_log = "--- FAIL: TestParse (0.00s)\n    parse_test.go:17: got 1 want 2\nFAIL\n";
        let frag = extract_diagnostics(test_log);
        assert_eq!(frag.extractor, "go_test");
        assert!(frag.affected_files.contains("parse_test.go"));

        let build_log = "# example.com/app/cmd\ncmd/main.go:10:2: undefined: Foo\n";
        let frag = extract_diagnostics(build_log);
        assert_eq!(frag.extractor, "go_build");
        assert_eq!(frag.error_kind, ErrorKind::BuildError);
    }

    #[test]
    fn test_tsc_errors() {
        let log = "src/index.ts(3,7): error TS2322: Type 'string' is not assignable to type 'number'.\nsrc/app.tsx:9:1 - error TS2304: Cannot find name 'x'.\n";
        let frag = extract_diagnostics(log);
        assert_eq!(frag.error_kind, ErrorKind::TypeError);
        assert_eq!(frag.affected_files.len(), 2);
    }

    #[test]
    fn test_mypy_errors() {
        let log = "app/models.py:14: error: Incompatible return value type  [return-value]\nFound 1 error in 1 file\n";
        let frag = extract_diagnostics(log);
        assert_eq!(frag.extractor, "mypy");
        assert!(frag.affected_files.contains("app/models.py"));
    }

    #[test]
    fn test_eslint_stylish() {
        let log = "\n/work/src/app.js\n  3:10  error  'x' is defined but never used  no-unused-vars\n  7:1   warning  Unexpected console statement  no-console\n\n✖ 2 problems (1 error, 1 warning)\n";
        let frag = extract_diagnostics(log);
        assert_eq!(frag.extractor, "eslint");
        assert_eq!(frag.error_kind, ErrorKind::LintError);
        assert!(frag.affected_files.contains("/work/src/app.js"));
        assert!(frag.summary.contains("no-unused-vars"));
    }

    #[test]
    fn test_python_lint() {
        let log = "app/views.py:1:1: F401 [*] `os` imported but unused\napp/views.py:40:89: E501 Line too long\n";
        let frag = extract_diagnostics(log);
        assert_eq!(frag.extractor, "python_lint");
        assert!(frag.summary.contains("F401"));
    }

    #[test]
    fn test_python_traceback() {
        let log = "Traceback (most recent call last):\n  File \"/usr/lib/python3.12/site-packages/x.py\", line 3, in <module>\n  File \"app/main.py\", line 10, in run\n    raise ValueError('bad')\nValueError: bad\n";
        let frag = extract_diagnostics(log);
        assert_eq!(frag.extractor, "python_traceback");
        assert_eq!(frag.summary, "ValueError: bad");
        assert!(frag.affected_files.contains("app/main.py"));
        assert_eq!(frag.affected_files.len(), 1);
    }

    #[test]
    fn test_node_stack() {
        let log = "TypeError: Cannot read properties of undefined (reading 'id')\n    at handler (/app/src/routes.js:22:15)\n    at Layer.handle (/app/node_modules/express/lib/router/layer.js:95:5)\n";
        let frag = extract_diagnostics(log);
        assert_eq!(frag.extractor, "node_stack");
        assert!(frag.affected_files.contains("/app/src/routes.js"));
        assert_eq!(frag.affected_files.len(), 1);
    }

    #[test]
    fn test_security_advisories() {
        let log = "Crate:     time\nID:        RUSTSEC-2020-0071\nerror: 1 vulnerability found!\n  Cargo.lock\n";
        let frag = extract_diagnostics(log);
        assert_eq!(frag.error_kind, ErrorKind::SecurityFinding);
        assert!(frag.summary.contains("RUSTSEC-2020-0071"));
        assert!(frag.affected_files.contains("Cargo.lock"));

        let npm = "found 3 high severity vulnerabilities\n";
        assert_eq!(extract_diagnostics(npm).error_kind, ErrorKind::SecurityFinding);
    }

    #[test]
    fn test_ci_timeout() {
        let log = "##[error]The job running on runner GitHub Actions 2 has exceeded the maximum execution time of 360 minutes.\n";
        assert_eq!(extract_diagnostics(log).error_kind, ErrorKind::Timeout);
    }

    #[test]
    fn test_infer_error_kind_from_name() {
        assert_eq!(infer_error_kind("Lint (clippy)"), ErrorKind::LintError);
        assert_eq!(infer_error_kind("unit-tests"), ErrorKind::TestFailure);
        assert_eq!(infer_error_kind("cargo-deny"), ErrorKind::SecurityFinding);
        assert_eq!(infer_error_kind("build-linux"), ErrorKind::BuildError);
        assert_eq!(infer_error_kind("deploy preview"), ErrorKind::Unknown);
    }

    #[test]
    fn test_failure_detail_from_log_uses_name_fallback() {
        let detail = failure_detail_from_log("lint", "Process completed with exit code 1.");
        assert_eq!(detail.check_name, "lint");
        assert_eq!(detail.error_kind, ErrorKind::LintError);
        assert!(detail.affected_files.is_empty());
    }

    #[test]
    fn test_every_pattern_compiles() {
        let patterns: [(&str, &LazyLock<Option<Regex>>); 28] = [
            ("ADVISORY_ID", &ADVISORY_ID),
            ("VULN_COUNT", &VULN_COUNT),
            ("LOCKFILE", &LOCKFILE),
            ("CI_TIMEOUT", &CI_TIMEOUT),
            ("RUSTFMT_DIFF", &RUSTFMT_DIFF),
            ("RUST_LOCATION", &RUST_LOCATION),
            ("CLIPPY_LINT", &CLIPPY_LINT),
            ("CARGO_TEST_FAILED", &CARGO_TEST_FAILED),
            ("CARGO_TEST_NAME", &CARGO_TEST_NAME),
            ("RUST_PANIC", &RUST_PANIC),
            ("RUSTC_ERROR", &RUSTC_ERROR),
            ("PYTEST_FAILED", &PYTEST_FAILED),
            ("PYTEST_SUMMARY", &PYTEST_SUMMARY),
            ("JEST_FAIL", &JEST_FAIL),
            ("GO_TEST_FAIL", &GO_TEST_FAIL),
            ("GO_TEST_FILE", &GO_TEST_FILE),
            ("GO_PACKAGE_HEADER", &GO_PACKAGE_HEADER),
            ("GO_ERROR", &GO_ERROR),
            ("TSC_ERROR", &TSC_ERROR),
            ("MYPY_ERROR", &MYPY_ERROR),
            ("ESLINT_FILE", &ESLINT_FILE),
            ("ESLINT_ISSUE", &ESLINT_ISSUE),
            ("PY_LINT", &PY_LINT),
            ("PY_TRACEBACK", &PY_TRACEBACK),
            ("PY_FRAME", &PY_FRAME),
            ("PY_EXCEPTION", &PY_EXCEPTION),
            ("NODE_FRAME", &NODE_FRAME),
            ("NODE_ERROR", &NODE_ERROR),
        ];
        for (name, pattern) in patterns {
            assert!(pattern.is_some(), "{name} failed to compile");
        }
    }
}
