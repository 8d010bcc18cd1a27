// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Local destination paths for downloads.

use std::path::{Path, PathBuf};

/// `root/<model id segments>/<basename of filename>`.
///
/// Blank model id segments are dropped, and only the final component of
/// `filename` is used, so files from repository subdirectories land next to
/// each other. The result is stable for equal inputs.
pub fn local_model_path(root: &Path, model_id: &str, filename: &str) -> PathBuf {
    let mut path = root.to_path_buf();
    for segment in model_id.split('/').map(str::trim).filter(|s| !s.is_empty()) {
        path.push(segment);
    }
    let basename = filename
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or(filename);
    path.join(basename)
}
