// crates/detox-core/src/core/pattern.rs
// ============================================================================
// Module: Name Patterns
// Description: User-supplied site/dataset name patterns with `*` wildcards.
// Purpose: Translate shell-style wildcards into SQL `LIKE` patterns once.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! Report clients pass names such as `T2_*` or `/*/Run2018*/*`. Each `*` is
//! translated to SQL `%`; everything else is passed through so that
//! existing clients keep matching the same rows. Patterns are always bound
//! as query parameters, never spliced into SQL text.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum accepted pattern length in bytes.
pub const MAX_PATTERN_LENGTH: usize = 512;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Pattern validation failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// Pattern was empty after trimming.
    #[error("name pattern must not be empty")]
    Empty,
    /// Pattern exceeded [`MAX_PATTERN_LENGTH`].
    #[error("name pattern exceeds {MAX_PATTERN_LENGTH} bytes")]
    TooLong,
}

/// Name pattern with its SQL `LIKE` translation.
///
/// # Invariants
/// - `like` equals `raw` with every `*` replaced by `%`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePattern {
    /// Trimmed pattern as supplied by the client.
    raw: String,
    /// SQL `LIKE` form of the pattern.
    like: String,
}

impl NamePattern {
    /// Parses a client-supplied pattern.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] when the pattern is empty or too long.
    pub fn parse(input: &str) -> Result<Self, PatternError> {
        let raw = input.trim();
        if raw.is_empty() {
            return Err(PatternError::Empty);
        }
        if raw.len() > MAX_PATTERN_LENGTH {
            return Err(PatternError::TooLong);
        }
        Ok(Self {
            raw: raw.to_string(),
            like: raw.replace('*', "%"),
        })
    }

    /// Returns the pattern as supplied (trimmed).
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the SQL `LIKE` pattern.
    #[must_use]
    pub fn like(&self) -> &str {
        &self.like
    }

    /// Returns true when the pattern contains a wildcard.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.raw.contains('*')
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, reason = "Test-only assertions use unwrap for clarity.")]

    use super::NamePattern;
    use super::PatternError;

    #[test]
    fn translates_every_star() {
        let pattern = NamePattern::parse("/*/Run2018*/*").unwrap();
        assert_eq!(pattern.like(), "/%/Run2018%/%");
        assert!(pattern.is_wildcard());
    }

    #[test]
    fn exact_names_pass_through() {
        let pattern = NamePattern::parse("  T2_CH_CERN ").unwrap();
        assert_eq!(pattern.as_str(), "T2_CH_CERN");
        assert_eq!(pattern.like(), "T2_CH_CERN");
        assert!(!pattern.is_wildcard());
    }

    #[test]
    fn rejects_blank_and_oversized() {
        assert_eq!(NamePattern::parse("   "), Err(PatternError::Empty));
        let long = "a".repeat(super::MAX_PATTERN_LENGTH + 1);
        assert_eq!(NamePattern::parse(&long), Err(PatternError::TooLong));
    }
}
