//! Language ecosystem detection for fix resolution.

use std::path::Path;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ecosystem {
    Rust,
    Node,
    Python,
    Go,
    Unknown,
}

impl Ecosystem {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Node => "node",
            Self::Python => "python",
            Self::Go => "go",
            Self::Unknown => "unknown",
        }
    }

    fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "rs" => Some(Self::Rust),
            "js" | "jsx" | "ts" | "tsx" | "mjs" | "cjs" | "vue" | "svelte" => Some(Self::Node),
            "py" | "pyi" => Some(Self::Python),
            "go" => Some(Self::Go),
            _ => None,
        }
    }

    /// The ecosystem most of `files` belong to, by extension.
    pub fn from_files<'a>(files: impl IntoIterator<Item = &'a String>) -> Option<Self> {
        let mut counts: Vec<(Self, usize)> = Vec::new();
        for file in files {
            let Some(eco) = Path::new(file)
                .extension()
                .and_then(|e| e.to_str())
                .and_then(Self::from_extension)
            else {
                continue;
            };
            match counts.iter_mut().find(|(e, _)| *e == eco) {
                Some((_, n)) => *n += 1,
                None => counts.push((eco, 1)),
            }
        }
        // Ties go to the ecosystem seen first.
        counts
            .into_iter()
            .fold(None, |best: Option<(Self, usize)>, (eco, n)| match best {
                Some((_, m)) if m >= n => best,
                _ => Some((eco, n)),
            })
            .map(|(eco, _)| eco)
    }
}

impl std::fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Detect the project ecosystem from marker files in `root`.
pub fn detect_ecosystem(root: &Path) -> Ecosystem {
    const MARKERS: &[(&str, Ecosystem)] = &[
        ("Cargo.toml", Ecosystem::Rust),
        ("package.json", Ecosystem::Node),
        ("pyproject.toml", Ecosystem::Python),
        ("setup.py", Ecosystem::Python),
        ("requirements.txt", Ecosystem::Python),
        ("go.mod", Ecosystem::Go),
    ];
    MARKERS
        .iter()
        .find(|(marker, _)| root.join(marker).is_file())
        .map(|(_, eco)| *eco)
        .unwrap_or(Ecosystem::Unknown)
}
