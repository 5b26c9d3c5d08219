//! Per-podcast record of strategies that recently worked.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Strategies kept per podcast.
const MAX_ENTRIES: usize = 5;

/// Most-recent-first strategy names per podcast, optionally persisted as JSON.
#[derive(Debug, Default)]
pub struct SuccessHistory {
    path: Option<PathBuf>,
    entries: Mutex<HashMap<String, Vec<String>>>,
}

impl SuccessHistory {
    /// History that is never written to disk.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load history from `path`. A missing or unreadable file starts empty.
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Ignoring unreadable strategy history {:?}: {}", path, e);
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        };

        Self {
            path: Some(path.to_path_buf()),
            entries: Mutex::new(entries),
        }
    }

    pub fn get(&self, podcast: &str) -> Vec<String> {
        self.entries.lock().get(podcast).cloned().unwrap_or_default()
    }

    /// Move `strategy` to the front of the podcast's list and persist.
    pub fn record_success(&self, podcast: &str, strategy: &str) {
        let snapshot = {
            let mut entries = self.entries.lock();
            let list = entries.entry(podcast.to_string()).or_default();
            list.retain(|s| s != strategy);
            list.insert(0, strategy.to_string());
            list.truncate(MAX_ENTRIES);
            self.path.as_ref().map(|_| entries.clone())
        };

        if let (Some(path), Some(entries)) = (&self.path, snapshot) {
            if let Err(e) = Self::persist(path, &entries) {
                warn!("Failed to save strategy history {:?}: {}", path, e);
            } else {
                debug!(podcast, strategy, "Recorded strategy success");
            }
        }
    }

    fn persist(path: &Path, entries: &HashMap<String, Vec<String>>) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_success_moves_to_front_and_list_is_bounded() {
        let history = SuccessHistory::in_memory();
        for s in ["a", "b", "c", "d", "e", "f"] {
            history.record_success("Pod", s);
        }
        assert_eq!(history.get("Pod"), vec!["f", "e", "d", "c", "b"]);

        history.record_success("Pod", "c");
        assert_eq!(history.get("Pod"), vec!["c", "f", "e", "d", "b"]);
        assert!(history.get("Other").is_empty());
    }

    #[test]
    fn test_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");

        let history = SuccessHistory::load(&path);
        history.record_success("Pod", "rss");
        history.record_success("Pod", "apple_podcasts");

        let reloaded = SuccessHistory::load(&path);
        assert_eq!(reloaded.get("Pod"), vec!["apple_podcasts", "rss"]);
    }
}
