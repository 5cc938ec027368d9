//! Runtime configuration read from a small, explicit set of environment
//! variables — not a CLI surface, since parsing one is out of scope for a
//! memory-manager library (the public entry points in this crate are what a
//! CLI or compiler runtime would call into).

use std::path::{Path, PathBuf};

const TARGET_LIST_VAR: &str = "OFFLOAD_TARGET_LIST";
const PLUGIN_PATH_VAR: &str = "OFFLOAD_PLUGIN_PATH";

/// Default target list when `OFFLOAD_TARGET_LIST` isn't set, analogous to
/// the original's build-time compiled-in constant.
const DEFAULT_TARGETS: &[&str] = &["nvptx", "gcn"];

#[derive(Debug, Clone)]
pub struct OffloadConfig {
    pub target_list: Vec<String>,
    pub plugin_search_path: Vec<PathBuf>,
    /// Escape hatch for environments with no plugins at all; used heavily
    /// by the test suite so it never tries to `dlopen` anything.
    pub host_fallback_only: bool,
}

impl OffloadConfig {
    pub fn from_env() -> Self {
        let target_list = std::env::var(TARGET_LIST_VAR)
            .map(|v| v.split(',').map(str::to_string).filter(|s| !s.is_empty()).collect())
            .unwrap_or_else(|_| DEFAULT_TARGETS.iter().map(|s| s.to_string()).collect());

        let plugin_search_path = std::env::var(PLUGIN_PATH_VAR)
            .map(|v| std::env::split_paths(&v).collect())
            .unwrap_or_else(|_| vec![std::env::current_exe().ok().and_then(|p| p.parent().map(Path::to_path_buf)).unwrap_or_default()]);

        Self { target_list, plugin_search_path, host_fallback_only: false }
    }

    pub fn host_only() -> Self {
        Self { target_list: Vec::new(), plugin_search_path: Vec::new(), host_fallback_only: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_only_carries_no_targets() {
        let cfg = OffloadConfig::host_only();
        assert!(cfg.host_fallback_only);
        assert!(cfg.target_list.is_empty());
    }
}
