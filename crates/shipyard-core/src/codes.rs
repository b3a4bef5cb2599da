//! Stable error codes for the build pipeline.
//!
//! All codes are SCREAMING_SNAKE_CASE and stable across versions.

/// An import specifier could not be mapped to an existing file.
pub const BUNDLE_RESOLVE_ERROR: &str = "BUNDLE_RESOLVE_ERROR";

/// No loader rule matches an encountered file.
pub const BUNDLE_LOADER_NO_RULE: &str = "BUNDLE_LOADER_NO_RULE";

/// A transform stage failed.
pub const BUNDLE_STAGE_FAILED: &str = "BUNDLE_STAGE_FAILED";

/// A source file could not be read.
pub const BUNDLE_READ_ERROR: &str = "BUNDLE_READ_ERROR";

/// Build output could not be written.
pub const BUNDLE_EMIT_ERROR: &str = "BUNDLE_EMIT_ERROR";

/// A plugin hook failed.
pub const BUNDLE_PLUGIN_ERROR: &str = "BUNDLE_PLUGIN_ERROR";

/// Configuration is invalid (unknown stage, mismatched chain, bad template...).
pub const BUNDLE_CONFIG_INVALID: &str = "BUNDLE_CONFIG_INVALID";

/// The chunk set breaks single ownership or leaves a module unassigned.
pub const BUNDLE_CHUNK_INVALID: &str = "BUNDLE_CHUNK_INVALID";

/// The build was cancelled before emission.
pub const BUNDLE_CANCELLED: &str = "BUNDLE_CANCELLED";

/// A module participates in an import cycle.
pub const BUNDLE_CYCLE_WARNING: &str = "BUNDLE_CYCLE_WARNING";

/// An emitted asset exceeds the configured size budget.
pub const BUNDLE_SIZE_BUDGET_WARNING: &str = "BUNDLE_SIZE_BUDGET_WARNING";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_codes_are_screaming_snake_case() {
        let codes = [
            BUNDLE_RESOLVE_ERROR,
            BUNDLE_LOADER_NO_RULE,
            BUNDLE_STAGE_FAILED,
            BUNDLE_READ_ERROR,
            BUNDLE_EMIT_ERROR,
            BUNDLE_PLUGIN_ERROR,
            BUNDLE_CONFIG_INVALID,
            BUNDLE_CHUNK_INVALID,
            BUNDLE_CANCELLED,
            BUNDLE_CYCLE_WARNING,
            BUNDLE_SIZE_BUDGET_WARNING,
        ];

        for code in codes {
            assert!(
                code.chars().all(|c| c.is_uppercase() || c == '_'),
                "Code '{code}' should be SCREAMING_SNAKE_CASE"
            );
        }
    }
}
