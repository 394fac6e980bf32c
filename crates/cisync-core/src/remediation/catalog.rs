//! Fix actions per `(ecosystem, error kind)`, as ordered fallback chains.
//!
//! Within a chain, formatting-only (safe) actions come before actions that
//! may change program behavior.

use std::collections::HashMap;

use crate::domain::{CheckCommand, ErrorKind, FixAction};

use super::ecosystem::Ecosystem;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn check(command: &str, args: &[&str], error_pattern: &str) -> CheckCommand {
    CheckCommand {
        command: command.to_string(),
        args: strings(args),
        error_pattern: error_pattern.to_string(),
    }
}

struct Spec<'a> {
    name: &'a str,
    tool: &'a str,
    command: &'a str,
    args: &'a [&'a str],
    probe_args: &'a [&'a str],
    safe: bool,
    check: CheckCommand,
    install_hint: &'a str,
}

impl From<Spec<'_>> for FixAction {
    fn from(s: Spec<'_>) -> Self {
        FixAction {
            name: s.name.to_string(),
            tool: s.tool.to_string(),
            command: s.command.to_string(),
            args: strings(s.args),
            probe_args: strings(s.probe_args),
            safe: s.safe,
            check: s.check,
            install_hint: s.install_hint.to_string(),
        }
    }
}

/// Ordered fallback chains of candidate actions.
#[derive(Debug, Clone, Default)]
pub struct FixCatalog {
    chains: HashMap<(Ecosystem, ErrorKind), Vec<FixAction>>,
}

impl FixCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Candidates for a failure class, in preference order.
    pub fn candidates(&self, ecosystem: Ecosystem, kind: ErrorKind) -> &[FixAction] {
        self.chains
            .get(&(ecosystem, kind))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Append an action to the end of a chain.
    pub fn register(&mut self, ecosystem: Ecosystem, kind: ErrorKind, action: FixAction) -> &mut Self {
        self.chains.entry((ecosystem, kind)).or_default().push(action);
        self
    }

    /// Built-in chains for Rust, Node, Python and Go.
    pub fn standard() -> Self {
        let mut catalog = Self::empty();

        // Rust
        catalog
            .register(
                Ecosystem::Rust,
                ErrorKind::LintError,
                Spec {
                    name: "rustfmt",
                    tool: "rustfmt",
                    command: "cargo",
                    args: &["fmt", "--all"],
                    probe_args: &["fmt", "--version"],
                    safe: true,
                    check: check("cargo", &["fmt", "--all", "--", "--check"], r"^Diff in "),
                    install_hint: "rustup component add rustfmt",
                }
                .into(),
            )
            .register(
                Ecosystem::Rust,
                ErrorKind::LintError,
                Spec {
                    name: "clippy-fix",
                    tool: "clippy",
                    command: "cargo",
                    args: &["clippy", "--fix", "--allow-dirty", "--allow-staged", "--all-targets"],
                    probe_args: &["clippy", "--version"],
                    safe: false,
                    check: check(
                        "cargo",
                        &["clippy", "--all-targets", "--message-format=short"],
                        r"^\S+:\d+:\d+: (?:warning|error)",
                    ),
                    install_hint: "rustup component add clippy",
                }
                .into(),
            );
        let cargo_fix = FixAction::from(Spec {
            name: "cargo-fix",
            tool: "cargo",
            command: "cargo",
            args: &["fix", "--allow-dirty", "--allow-staged"],
            probe_args: &["--version"],
            safe: false,
            check: check("cargo", &["check", "--message-format=short"], r"^\S+:\d+:\d+: error"),
            install_hint: "install a Rust toolchain from https://rustup.rs",
        });
        catalog
            .register(Ecosystem::Rust, ErrorKind::BuildError, cargo_fix.clone())
            .register(Ecosystem::Rust, ErrorKind::TypeError, cargo_fix);

        // Node
        catalog
            .register(
                Ecosystem::Node,
                ErrorKind::LintError,
                Spec {
                    name: "prettier",
                    tool: "prettier",
                    command: "npx",
                    args: &["--no-install", "prettier", "--write", "."],
                    probe_args: &["--no-install", "prettier", "--version"],
                    safe: true,
                    check: check(
                        "npx",
                        &["--no-install", "prettier", "--check", "."],
                        r"^\[warn\] \S+\.\w+$",
                    ),
                    install_hint: "npm install --save-dev prettier",
                }
                .into(),
            )
            .register(
                Ecosystem::Node,
                ErrorKind::LintError,
                Spec {
                    name: "eslint-fix",
                    tool: "eslint",
                    command: "npx",
                    args: &["--no-install", "eslint", "--fix", "."],
                    probe_args: &["--no-install", "eslint", "--version"],
                    safe: false,
                    check: check(
                        "npx",
                        &["--no-install", "eslint", ".", "--format", "unix"],
                        r"^\S+:\d+:\d+: ",
                    ),
                    install_hint: "npm install --save-dev eslint",
                }
                .into(),
            );

        // Python
        catalog
            .register(
                Ecosystem::Python,
                ErrorKind::LintError,
                Spec {
                    name: "black",
                    tool: "black",
                    command: "black",
                    args: &["."],
                    probe_args: &["--version"],
                    safe: true,
                    check: check("black", &["--check", "."], r"^would reformat "),
                    install_hint: "pip install black",
                }
                .into(),
            )
            .register(
                Ecosystem::Python,
                ErrorKind::LintError,
                Spec {
                    name: "ruff-fix",
                    tool: "ruff",
                    command: "ruff",
                    args: &["check", "--fix", "."],
                    probe_args: &["--version"],
                    safe: false,
                    check: check("ruff", &["check", "."], r"^\S+\.pyi?:\d+:\d+: "),
                    install_hint: "pip install ruff",
                }
                .into(),
            );

        // Go
        catalog
            .register(
                Ecosystem::Go,
                ErrorKind::LintError,
                Spec {
                    name: "gofmt",
                    tool: "go",
                    command: "go",
                    args: &["fmt", "./..."],
                    probe_args: &["version"],
                    safe: true,
                    check: check("gofmt", &["-l", "."], r"\.go$"),
                    install_hint: "install Go from https://go.dev/dl/",
                }
                .into(),
            )
            .register(
                Ecosystem::Go,
                ErrorKind::LintError,
                Spec {
                    name: "golangci-lint-fix",
                    tool: "golangci-lint",
                    command: "golangci-lint",
                    args: &["run", "--fix"],
                    probe_args: &["--version"],
                    safe: false,
                    check: check("golangci-lint", &["run"], r"^\S+\.go:\d+:\d+: "),
                    install_hint: "go install github.com/golangci/golangci-lint/cmd/golangci-lint@latest",
                }
                .into(),
            )
            .register(
                Ecosystem::Go,
                ErrorKind::BuildError,
                Spec {
                    name: "go-mod-tidy",
                    tool: "go",
                    command: "go",
                    args: &["mod", "tidy"],
                    probe_args: &["version"],
                    safe: false,
                    check: check("go", &["build", "./..."], r"^\S+\.go:\d+:\d+: "),
                    install_hint: "install Go from https://go.dev/dl/",
                }
                .into(),
            );

        catalog
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_actions_come_first() {
        let catalog = FixCatalog::standard();
        for eco in [Ecosystem::Rust, Ecosystem::Node, Ecosystem::Python, Ecosystem::Go] {
            let chain = catalog.candidates(eco, ErrorKind::LintError);
            assert!(chain.len() >= 2, "{eco} lint chain");
            assert!(chain[0].safe, "{eco} chain should start safe");
            let first_unsafe = chain.iter().position(|a| !a.safe).unwrap();
            assert!(chain[first_unsafe..].iter().all(|a| !a.safe));
        }
    }

    #[test]
    fn test_no_candidates_for_security_or_unknown() {
        let catalog = FixCatalog::standard();
        assert!(catalog
            .candidates(Ecosystem::Rust, ErrorKind::SecurityFinding)
            .is_empty());
        assert!(catalog
            .candidates(Ecosystem::Unknown, ErrorKind::LintError)
            .is_empty());
        assert!(catalog
            .candidates(Ecosystem::Node, ErrorKind::TestFailure)
            .is_empty());
    }

    #[test]
    fn test_error_patterns_compile() {
        let catalog = FixCatalog::standard();
        for chain in catalog.chains.values() {
            for action in chain {
                assert!(
                    regex::Regex::new(&action.check.error_pattern).is_ok(),
                    "{}",
                    action.name
                );
            }
        }
    }

    #[test]
    fn test_register_appends() {
        let mut catalog = FixCatalog::standard();
        let extra = FixAction::from(Spec {
            name: "taplo-fmt",
            tool: "taplo",
            command: "taplo",
            args: &["fmt"],
            probe_args: &["--version"],
            safe: true,
            check: check("taplo", &["fmt", "--check"], r"^ERROR"),
            install_hint: "cargo install taplo-cli",
        });
        catalog.register(Ecosystem::Rust, ErrorKind::LintError, extra);
        let chain = catalog.candidates(Ecosystem::Rust, ErrorKind::LintError);
        assert_eq!(chain.last().unwrap().name, "taplo-fmt");
        assert_eq!(chain[0].name, "rustfmt");
    }
}
