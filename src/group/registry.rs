//! Name to group table shared by the transport layer

use crate::common::{metrics, Error, Result};
use crate::group::Group;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;

/// Owns every group served by this node
///
/// Groups are registered explicitly and live as long as the registry.
#[derive(Debug, Default)]
pub struct GroupRegistry {
    groups: RwLock<HashMap<String, Arc<Group>>>,
}

impl GroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `group`; fails if the name is already taken
    pub fn register(&self, group: Group) -> Result<Arc<Group>> {
        let mut groups = self
            .groups
            .write()
            .map_err(|e| Error::Internal(format!("group registry poisoned: {}", e)))?;

        if groups.contains_key(group.name()) {
            return Err(Error::InvalidConfig(format!(
                "group {:?} already registered",
                group.name()
            )));
        }

        let group = Arc::new(group);
        groups.insert(group.name().to_string(), Arc::clone(&group));
        info!(group = %group.name(), "registered group");
        Ok(group)
    }

    pub fn get(&self, name: &str) -> Option<Arc<Group>> {
        self.groups.read().ok()?.get(name).cloned()
    }

    /// Like [`get`](Self::get), but an unknown name is an error
    pub fn lookup(&self, name: &str) -> Result<Arc<Group>> {
        self.get(name)
            .ok_or_else(|| Error::NoSuchGroup(name.to_string()))
    }

    /// Registered group names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = match self.groups.read() {
            Ok(groups) => groups.keys().cloned().collect(),
            Err(_) => Vec::new(),
        };
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.groups.read().map(|g| g.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Prometheus text for every group, sorted by name
    pub fn to_prometheus(&self) -> String {
        let groups: Vec<Arc<Group>> = self
            .names()
            .iter()
            .filter_map(|name| self.get(name))
            .collect();
        metrics::to_prometheus(groups.iter().map(|g| (g.name(), g.stats())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::{GetterFn, GroupBuilder};

    fn group(name: &str) -> Group {
        GroupBuilder::new(name, GetterFn::new(|key: &str| Ok(key.as_bytes().to_vec())))
            .build()
            .unwrap()
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = GroupRegistry::new();
        assert!(registry.is_empty());

        let scores = registry.register(group("scores")).unwrap();
        registry.register(group("avatars")).unwrap();

        assert!(Arc::ptr_eq(&registry.get("scores").unwrap(), &scores));
        assert!(registry.get("missing").is_none());
        assert!(matches!(
            registry.lookup("missing"),
            Err(Error::NoSuchGroup(name)) if name == "missing"
        ));
        assert_eq!(registry.names(), vec!["avatars", "scores"]);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = GroupRegistry::new();
        let first = registry.register(group("scores")).unwrap();
        assert!(matches!(
            registry.register(group("scores")),
            Err(Error::InvalidConfig(_))
        ));
        assert!(Arc::ptr_eq(&registry.get("scores").unwrap(), &first));
    }

    #[tokio::test]
    async fn test_prometheus_covers_all_groups() {
        let registry = GroupRegistry::new();
        let scores = registry.register(group("scores")).unwrap();
        registry.register(group("avatars")).unwrap();

        scores.get("Tom").await.unwrap();

        let text = registry.to_prometheus();
        assert!(text.contains("peercache_local_loads_total{group=\"scores\"} 1"));
        assert!(text.contains("peercache_local_loads_total{group=\"avatars\"} 0"));
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(GroupRegistry::new());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    registry.register(group(&format!("g{}", i))).unwrap();
                    assert!(registry.get(&format!("g{}", i)).is_some());
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(registry.len(), 16);
    }
}
