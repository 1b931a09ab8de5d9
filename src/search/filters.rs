//! Result filtering.
//!
//! Extension whitelist, path-contains include, and path-contains exclude
//! (OR semantics across patterns). Filtering is idempotent: applying the
//! same filter twice yields the same set.

use crate::types::SearchRequest;

/// Path filters derived from a search request.
#[derive(Debug, Clone, Default)]
pub struct SearchFilters {
    extensions: Option<Vec<String>>,
    path_include: Option<String>,
    path_exclude: Option<Vec<String>>,
}

impl SearchFilters {
    /// Build filters from a request.
    pub fn from_request(request: &SearchRequest) -> Self {
        let extensions = request.file_extensions.as_ref().map(|exts| {
            exts.iter()
                .map(|ext| {
                    let lower = ext.to_lowercase();
                    if lower.starts_with('.') {
                        lower
                    } else {
                        format!(".{lower}")
                    }
                })
                .collect()
        });
        Self {
            extensions,
            path_include: request.path_filter.clone(),
            path_exclude: request.exclude_paths.clone(),
        }
    }

    /// Whether a hit path passes all filters.
    pub fn matches(&self, path: &str) -> bool {
        if let Some(extensions) = &self.extensions {
            let lower = path.to_lowercase();
            if !extensions.iter().any(|ext| lower.ends_with(ext.as_str())) {
                return false;
            }
        }

        if let Some(include) = &self.path_include
            && !path.contains(include.as_str())
        {
            return false;
        }

        if let Some(excludes) = &self.path_exclude
            && excludes.iter().any(|pattern| path.contains(pattern.as_str()))
        {
            return false;
        }

        true
    }
}
