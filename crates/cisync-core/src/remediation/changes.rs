//! Which files a fix changed, from workspace diffs taken around it.

use std::collections::BTreeMap;

const SECTION_PREFIX: &str = "diff --git a/";

/// Split a unified diff into per-file sections keyed by path.
pub fn diff_sections(diff: &str) -> BTreeMap<String, String> {
    let mut sections = BTreeMap::new();
    let mut current: Option<(String, String)> = None;
    for line in diff.lines() {
        if let Some(rest) = line.strip_prefix(SECTION_PREFIX) {
            if let Some((path, body)) = current.take() {
                sections.insert(path, body);
            }
            let path = rest.split(" b/").next().unwrap_or(rest).to_string();
            current = Some((path, String::new()));
        } else if let Some((_, body)) = current.as_mut() {
            body.push_str(line);
            body.push('\n');
        }
    }
    if let Some((path, body)) = current {
        sections.insert(path, body);
    }
    sections
}

/// Files whose diff section differs between `before` and `after`,
/// including files that appear in only one of them.
pub fn changed_files(before: &str, after: &str) -> Vec<String> {
    let before = diff_sections(before);
    let after = diff_sections(after);
    let mut changed: Vec<String> = after
        .iter()
        .filter(|(path, body)| before.get(*path) != Some(*body))
        .map(|(path, _)| path.clone())
        .collect();
    changed.extend(before.keys().filter(|p| !after.contains_key(*p)).cloned());
    changed.sort();
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sections_by_path() {
        let diff = "diff --git a/src/a.rs b/src/a.rs\n-x\n+y\ndiff --git a/b.rs b/b.rs\n+z\n";
        let sections = diff_sections(diff);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections["src/a.rs"], "-x\n+y\n");
    }

    #[test]
    fn test_only_touched_files_are_reported() {
        let before = "diff --git a/keep.rs b/keep.rs\n+mine\n";
        let after = "diff --git a/keep.rs b/keep.rs\n+mine\ndiff --git a/fmt.rs b/fmt.rs\n-a\n+b\n";
        assert_eq!(changed_files(before, after), vec!["fmt.rs"]);
    }

    #[test]
    fn test_reverted_file_counts_as_changed() {
        let before = "diff --git a/x.rs b/x.rs\n+tmp\n";
        assert_eq!(changed_files(before, ""), vec!["x.rs"]);
        assert!(changed_files("", "").is_empty());
    }
}
