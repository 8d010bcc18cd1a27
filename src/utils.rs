// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Small helpers shared by the library and the binary.

/// Mask a secret (access token) for display.
///
/// Keeps the first `visible_prefix` characters. Secrets not longer than twice
/// the prefix are masked completely so short tokens never leak.
///
/// ```
/// use ggufetch::utils::mask_sensitive;
///
/// assert_eq!(mask_sensitive("hf_abcdefghijklmnop", 5), "hf_ab...");
/// assert_eq!(mask_sensitive("hf_abc", 5), "***");
/// ```
pub fn mask_sensitive(input: &str, visible_prefix: usize) -> String {
    if input.chars().count() <= visible_prefix * 2 {
        return "***".to_string();
    }
    let prefix: String = input.chars().take(visible_prefix).collect();
    format!("{}...", prefix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_sensitive() {
        assert_eq!(mask_sensitive("hf_secretsecretsecret", 5), "hf_se...");
        assert_eq!(mask_sensitive("short", 5), "***");
        assert_eq!(mask_sensitive("", 5), "***");
    }
}
