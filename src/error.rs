//! Error types for the planning pipeline.
//!
//! Only structural problems abort the pipeline: a constraint or relation
//! pointing at a missing entity, a malformed entity category, or a bad
//! config/import document. Solver failures are recoverable outcomes handled
//! inside the orchestrator and never surface as errors here.

use thiserror::Error;

/// Errors that abort the planning pipeline before a scene is produced.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A relation or constraint references an entity that does not exist.
    #[error("unresolved reference '{id}' in {referenced_by}")]
    UnresolvedReference {
        id: String,
        referenced_by: String,
        suggestions: Vec<String>,
    },

    /// An entity was submitted with a category outside the closed set.
    #[error("unrecognized entity category '{category}' for entity '{id}'")]
    InvalidCategory { id: String, category: String },

    /// Two entities share an id; the arena is keyed by id.
    #[error("duplicate entity id '{id}'")]
    DuplicateEntity { id: String },

    /// A serialized plan document failed to parse.
    #[error("invalid plan document: {0}")]
    InvalidDocument(#[from] serde_json::Error),

    /// A configuration file failed to parse.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] toml::de::Error),
}

impl PlanError {
    /// Create an unresolved reference error with nearest-id suggestions.
    pub fn unresolved(
        id: impl Into<String>,
        referenced_by: impl Into<String>,
        suggestions: Vec<String>,
    ) -> Self {
        Self::UnresolvedReference {
            id: id.into(),
            referenced_by: referenced_by.into(),
            suggestions,
        }
    }

    /// Suggested ids for an unresolved reference, if any.
    pub fn suggestions(&self) -> Option<&[String]> {
        match self {
            Self::UnresolvedReference { suggestions, .. } => Some(suggestions),
            _ => None,
        }
    }
}

/// Compute Levenshtein edit distance between two strings.
pub(crate) fn levenshtein_distance(a: &str, b: &str) -> usize {
    let a_chars: Vec<char> = a.chars().collect();
    let b_chars: Vec<char> = b.chars().collect();
    let m = a_chars.len();
    let n = b_chars.len();

    if m == 0 {
        return n;
    }
    if n == 0 {
        return m;
    }

    let mut dp = vec![vec![0usize; n + 1]; m + 1];
    for (i, row) in dp.iter_mut().enumerate() {
        row[0] = i;
    }
    for j in 0..=n {
        dp[0][j] = j;
    }

    for i in 1..=m {
        for j in 1..=n {
            let cost = if a_chars[i - 1] == b_chars[j - 1] { 0 } else { 1 };
            dp[i][j] = (dp[i - 1][j] + 1)
                .min(dp[i][j - 1] + 1)
                .min(dp[i - 1][j - 1] + cost);
        }
    }

    dp[m][n]
}

/// Find known ids within a maximum edit distance of `target`, closest first.
pub(crate) fn find_similar<'a, I>(known: I, target: &str, max_distance: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a String>,
{
    let mut candidates: Vec<(String, usize)> = known
        .into_iter()
        .filter_map(|name| {
            let dist = levenshtein_distance(name, target);
            if dist <= max_distance && dist > 0 {
                Some((name.clone(), dist))
            } else {
                None
            }
        })
        .collect();

    candidates.sort_by(|(a_name, a_dist), (b_name, b_dist)| {
        a_dist.cmp(b_dist).then_with(|| a_name.cmp(b_name))
    });
    candidates.into_iter().map(|(name, _)| name).take(3).collect()
}
