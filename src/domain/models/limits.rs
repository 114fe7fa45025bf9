use super::{ChunkKind, Language, SearchFilters};
use crate::domain::CoreError;

/// Validation bounds and closed sets for inbound parameters.
///
/// Constructed once with defaults and passed explicitly to the components
/// that validate input; there is no global instance.
#[derive(Debug, Clone)]
pub struct Limits {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub min_search_limit: usize,
    pub max_search_limit: usize,
    pub min_context_chunks: usize,
    pub max_context_chunks: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            min_search_limit: 1,
            max_search_limit: 100,
            min_context_chunks: 1,
            max_context_chunks: 50,
        }
    }
}

impl Limits {
    pub fn valid_languages() -> Vec<&'static str> {
        Language::all_supported()
            .into_iter()
            .map(|l| l.as_str())
            .collect()
    }

    pub fn valid_kinds() -> Vec<&'static str> {
        ChunkKind::all().iter().map(|k| k.as_str()).collect()
    }

    /// Validate search arguments before any store I/O. Returns the limit
    /// clamped into `[min_search_limit, max_search_limit]`; a zero limit is
    /// rejected outright so typos surface at development time.
    pub fn validate_search(
        &self,
        limit: usize,
        filters: Option<&SearchFilters>,
    ) -> Result<usize, CoreError> {
        if limit == 0 {
            return Err(CoreError::invalid_argument(format!(
                "limit must be at least {}, got 0",
                self.min_search_limit
            )));
        }
        if let Some(filters) = filters {
            filters.validate()?;
        }
        Ok(limit.clamp(self.min_search_limit, self.max_search_limit))
    }
}
