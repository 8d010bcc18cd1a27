// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Quantization label from a file name.
//!
//! A cheap first guess made before any bytes are fetched. Known tokens are
//! tried in priority order (vendor-prefixed and longer variants before the
//! generic tokens they contain), then a generic pattern.

use once_cell::sync::Lazy;
use regex::Regex;

/// Known tokens, most specific first.
const KNOWN_TOKENS: &[&str] = &[
    "ud-iq1_s", "ud-iq1_m", "ud-iq2_xxs", "ud-iq2_m", "ud-iq3_xxs",
    "ud-q2_k_xl", "ud-q3_k_xl", "ud-q4_k_xl", "ud-q5_k_xl", "ud-q6_k_xl", "ud-q8_k_xl",
    "q8_k_xl", "q6_k_xl", "q5_k_xl", "q4_k_xl", "q3_k_xl", "q2_k_xl",
    "q8_0", "q6_k", "q5_k_m", "q5_k_s", "q5_0",
    "iq4_nl", "iq4_xs", "q4_k_m", "q4_k_l", "q4_k_s", "q4_1", "q4_0",
    "iq3_xxs", "q3_k_l", "q3_k_m", "q3_k_s",
    "iq2_xxs", "iq2_m", "q2_k_l", "q2_k",
    "iq1_s", "iq1_m",
    "f16", "f32",
];

static GENERIC_QUANT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(iq[0-9]_[a-z]+|q[0-9]_[0-9]|q[0-9]_k_[a-z]+|q[0-9]_k)")
        .expect("quantization pattern is valid")
});

/// Strip the final extension, keeping names that start with a dot intact.
fn stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(i) if i > 0 => &name[..i],
        _ => name,
    }
}

/// Upper-cased quantization token found in `filename`, if any.
pub fn detect_from_filename(filename: &str) -> Option<String> {
    let lower = filename.to_lowercase();
    let lower = stem(&lower);

    if let Some(token) = KNOWN_TOKENS.iter().find(|t| lower.contains(*t)) {
        return Some(token.to_uppercase());
    }
    GENERIC_QUANT.find(lower).map(|m| m.as_str().to_uppercase())
}
