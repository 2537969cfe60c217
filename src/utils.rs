// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Utility functions for sessionguard.

/// Number of identifier characters that may appear in logs.
pub const IDENTIFIER_LOG_PREFIX: usize = 8;

/// Mask a sensitive string (like a session identifier) for logging.
///
/// Shows only the first `visible_prefix` characters and replaces the rest with "...".
/// This ensures identifiers are never logged in full.
///
/// # Examples
///
/// ```
/// use sessionguard::utils::mask_sensitive;
///
/// let id = "3f2a9c0d5e7b1a4c8d6e0f1a2b3c4d5e";
/// assert_eq!(mask_sensitive(id, 8), "3f2a9c0d...");
/// ```
pub fn mask_sensitive(input: &str, visible_prefix: usize) -> String {
    if input.chars().count() <= visible_prefix {
        // Short inputs are still suffixed so their length is not revealed
        return format!("{}...", input);
    }

    let prefix: String = input.chars().take(visible_prefix).collect();
    format!("{}...", prefix)
}

/// Mask a session identifier for audit lines.
pub fn mask_identifier(id: &str) -> String {
    mask_sensitive(id, IDENTIFIER_LOG_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_sensitive() {
        assert_eq!(mask_sensitive("0123456789abcdef", 8), "01234567...");
        assert_eq!(mask_sensitive("short", 8), "short...");
        assert_eq!(mask_sensitive("", 8), "...");
    }

    #[test]
    fn test_mask_identifier() {
        let id = "a".repeat(64);
        assert_eq!(mask_identifier(&id), "aaaaaaaa...");
    }
}
