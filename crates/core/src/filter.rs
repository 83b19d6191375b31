//! Ignore-list matching for one project.

use filewatchd_api::ProjectToWatch;
use filewatchd_api::path::ancestor_chain;
use regex::Regex;

pub struct PathFilter {
    filename_patterns: Vec<Regex>,
    path_patterns: Vec<Regex>,
}

impl PathFilter {
    pub fn new(project: &ProjectToWatch) -> Self {
        let mut filename_patterns = Vec::new();
        for pattern in project.ignored_filenames() {
            if pattern.contains('/') || pattern.contains('\\') {
                tracing::error!(
                    "Rejecting filename filter '{}' for project {}: contains a path separator",
                    pattern,
                    project.project_id()
                );
                continue;
            }
            if let Some(regex) = compile_glob(pattern, project.project_id()) {
                filename_patterns.push(regex);
            }
        }

        let path_patterns = project
            .ignored_paths()
            .iter()
            .filter_map(|pattern| {
                let anchored = if pattern.starts_with('/') || pattern.starts_with('*') {
                    pattern.clone()
                } else {
                    format!("/{pattern}")
                };
                compile_glob(anchored.trim_end_matches('/'), project.project_id())
            })
            .collect();

        Self {
            filename_patterns,
            path_patterns,
        }
    }

    /// Tests every component of `relative_path` against the filename patterns.
    pub fn is_filtered_by_filename(&self, relative_path: &str) -> bool {
        if self.filename_patterns.is_empty() {
            return false;
        }
        relative_path
            .split('/')
            .filter(|component| !component.is_empty())
            .any(|component| self.filename_patterns.iter().any(|re| re.is_match(component)))
    }

    /// Tests the full relative path against the path patterns.
    pub fn is_filtered_by_path(&self, relative_path: &str) -> bool {
        self.path_patterns.iter().any(|re| re.is_match(relative_path))
    }

    /// True when the path or any of its ancestors is excluded.
    pub fn is_excluded(&self, relative_path: &str) -> bool {
        if self.is_filtered_by_filename(relative_path) {
            return true;
        }
        ancestor_chain(relative_path)
            .into_iter()
            .any(|candidate| self.is_filtered_by_path(candidate))
    }
}

/// `*` matches any run of characters; everything else is literal and the whole
/// input must match.
fn compile_glob(pattern: &str, project_id: &str) -> Option<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    match Regex::new(&format!("^{body}$")) {
        Ok(regex) => Some(regex),
        Err(e) => {
            tracing::error!(
                "Invalid filter '{}' for project {}: {}",
                pattern,
                project_id,
                e
            );
            None
        }
    }
}
