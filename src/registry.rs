//! Anchor registry: the set of surveyed access points the tracker may use.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{TrackerError, TrackerResult};
use crate::types::Anchor;

/// Read-only lookup of surveyed anchors.
pub trait AnchorRegistry {
    /// Anchor whose (already stripped) label equals `label`.
    fn lookup(&self, label: &str) -> Option<&Anchor>;

    /// Anchor by numeric id.
    fn get(&self, anchor_id: u32) -> Option<&Anchor>;

    /// All registered anchors in registration order.
    fn all(&self) -> Vec<&Anchor>;
}

#[derive(Clone, Debug, Default)]
pub struct InMemoryRegistry {
    anchors: Vec<Anchor>,
    by_label: HashMap<String, usize>,
    by_id: HashMap<u32, usize>,
}

impl InMemoryRegistry {
    pub fn new(anchors: Vec<Anchor>) -> Self {
        let mut registry = Self::default();
        for anchor in anchors {
            registry.insert(anchor);
        }
        registry
    }

    /// Adds an anchor. A later anchor with the same label or id replaces the
    /// earlier index entry.
    pub fn insert(&mut self, anchor: Anchor) {
        let idx = self.anchors.len();
        self.by_label.insert(anchor.label.clone(), idx);
        self.by_id.insert(anchor.id, idx);
        self.anchors.push(anchor);
    }

    /// Loads a JSON array of anchors.
    pub fn from_json_file(path: &Path) -> TrackerResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            TrackerError::Storage(format!("reading {}: {}", path.display(), e))
        })?;
        let anchors: Vec<Anchor> = serde_json::from_str(&contents)?;
        Ok(Self::new(anchors))
    }

    pub fn len(&self) -> usize {
        self.anchors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
    }
}

impl AnchorRegistry for InMemoryRegistry {
    fn lookup(&self, label: &str) -> Option<&Anchor> {
        self.by_label.get(label).map(|&idx| &self.anchors[idx])
    }

    fn get(&self, anchor_id: u32) -> Option<&Anchor> {
        self.by_id.get(&anchor_id).map(|&idx| &self.anchors[idx])
    }

    fn all(&self) -> Vec<&Anchor> {
        self.anchors.iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_lookup_by_label_and_id() {
        let registry = InMemoryRegistry::new(vec![
            Anchor::new(1, "00:11:22:33:44:5", 44.0, 11.0),
            Anchor::new(2, "00:11:22:33:44:6", 29.0, 28.0),
        ]);

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.lookup("00:11:22:33:44:6").map(|a| a.id), Some(2));
        assert_eq!(registry.get(1).map(|a| a.position.x), Some(44.0));
        assert!(registry.lookup("00:11:22:33:44:").is_none());
        assert!(registry.get(7).is_none());
    }

    #[test]
    fn test_all_preserves_order() {
        let registry = InMemoryRegistry::new(vec![
            Anchor::new(5, "b", 0.0, 0.0),
            Anchor::new(3, "a", 1.0, 1.0),
        ]);
        let ids: Vec<u32> = registry.all().iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![5, 3]);
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"id": 3, "label": "aa:bb", "position": {{"x": 46.0, "y": 40.0}}}}]"#
        )
        .unwrap();

        let registry = InMemoryRegistry::from_json_file(file.path()).unwrap();
        assert_eq!(registry.lookup("aa:bb").map(|a| a.id), Some(3));
    }

    #[test]
    fn test_from_missing_file() {
        let err = InMemoryRegistry::from_json_file(Path::new("/nonexistent/anchors.json"))
            .unwrap_err();
        assert!(matches!(err, TrackerError::Storage(_)));
    }
}
