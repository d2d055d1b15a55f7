//! Content origin registry with load accounting.

use tracing::debug;

/// Stable handle to a registered origin.
///
/// Survives removal and re-registration of other origins, so a request can
/// release its origin even if the registry changed while it was in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OriginId(u64);

/// A registered origin and the number of requests in flight against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginRecord {
    id: OriginId,
    url: String,
    load_value: u32,
}

impl OriginRecord {
    pub fn id(&self) -> OriginId {
        self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn load_value(&self) -> u32 {
        self.load_value
    }
}

/// Registered origins in registration order. At most one record per URL.
#[derive(Debug, Default)]
pub struct OriginRegistry {
    records: Vec<OriginRecord>,
    next_id: u64,
}

impl OriginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `url`. Returns the existing id if already registered.
    pub fn add(&mut self, url: &str) -> OriginId {
        if let Some(record) = self.find(url) {
            return record.id;
        }
        let id = OriginId(self.next_id);
        self.next_id += 1;
        self.records.push(OriginRecord {
            id,
            url: url.to_string(),
            load_value: 0,
        });
        debug!(origin = %url, "origin registered");
        id
    }

    /// Unregister `url`. Returns `false` if it was not registered.
    pub fn remove(&mut self, url: &str) -> bool {
        let before = self.records.len();
        self.records.retain(|record| record.url != url);
        let removed = self.records.len() != before;
        if removed {
            debug!(origin = %url, "origin removed");
        }
        removed
    }

    pub fn find(&self, url: &str) -> Option<&OriginRecord> {
        self.records.iter().find(|record| record.url == url)
    }

    pub fn get(&self, id: OriginId) -> Option<&OriginRecord> {
        self.records.iter().find(|record| record.id == id)
    }

    /// Pick an origin for a new request.
    ///
    /// The first idle origin wins; otherwise the one with the lowest load,
    /// ties going to the earliest registered.
    pub fn choose(&self) -> Option<&OriginRecord> {
        let mut best: Option<&OriginRecord> = None;
        for record in &self.records {
            if record.load_value == 0 {
                return Some(record);
            }
            if best.map_or(true, |b| record.load_value < b.load_value) {
                best = Some(record);
            }
        }
        best
    }

    /// The preferred origin if registered, otherwise [`choose`](Self::choose).
    pub fn resolve(&self, preferred: Option<&str>) -> Option<&OriginRecord> {
        preferred
            .and_then(|url| self.find(url))
            .or_else(|| self.choose())
    }

    /// Count a request dispatched to `id`.
    pub fn acquire(&mut self, id: OriginId) -> bool {
        match self.records.iter_mut().find(|record| record.id == id) {
            Some(record) => {
                record.load_value += 1;
                true
            }
            None => false,
        }
    }

    /// Count a request against `id` as terminated.
    ///
    /// Returns `false` if the origin is gone or has no load.
    pub fn release(&mut self, id: OriginId) -> bool {
        match self.records.iter_mut().find(|record| record.id == id) {
            Some(record) if record.load_value > 0 => {
                record.load_value -= 1;
                true
            }
            _ => false,
        }
    }

    /// Current load of `url`.
    pub fn load(&self, url: &str) -> Option<u32> {
        self.find(url).map(|record| record.load_value)
    }

    pub fn records(&self) -> &[OriginRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Build a resource URL from an origin and a resource name.
///
/// A `/` is inserted only when the origin is non-empty and lacks one.
pub fn compose_url(origin: &str, resource_name: &str) -> String {
    if origin.is_empty() || origin.ends_with('/') {
        format!("{}{}", origin, resource_name)
    } else {
        format!("{}/{}", origin, resource_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_add_is_idempotent() {
        let mut registry = OriginRegistry::new();
        let a = registry.add("http://a");
        let again = registry.add("http://a");
        assert_eq!(a, again);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove() {
        let mut registry = OriginRegistry::new();
        registry.add("http://a");
        assert!(registry.remove("http://a"));
        assert!(!registry.remove("http://a"));
        assert!(registry.is_empty());
        assert!(registry.choose().is_none());
    }

    #[test]
    fn test_choose_prefers_idle_then_lowest() {
        let mut registry = OriginRegistry::new();
        let a = registry.add("a");
        let b = registry.add("b");
        let c = registry.add("c");

        assert_eq!(registry.choose().unwrap().url(), "a");

        registry.acquire(a);
        registry.acquire(a);
        registry.acquire(b);
        registry.acquire(b);
        registry.acquire(c);
        // c has the lowest load although it is not first
        assert_eq!(registry.choose().unwrap().url(), "c");

        registry.acquire(c);
        // all equal: earliest wins
        assert_eq!(registry.choose().unwrap().url(), "a");

        registry.release(b);
        assert_eq!(registry.choose().unwrap().url(), "b");
    }

    #[test]
    fn test_resolve_preferred() {
        let mut registry = OriginRegistry::new();
        let a = registry.add("a");
        registry.add("b");
        registry.acquire(a);

        assert_eq!(registry.resolve(Some("a")).unwrap().url(), "a");
        assert_eq!(registry.resolve(Some("unknown")).unwrap().url(), "b");
        assert_eq!(registry.resolve(None).unwrap().url(), "b");
    }

    #[test]
    fn test_release_never_underflows() {
        let mut registry = OriginRegistry::new();
        let a = registry.add("a");
        assert!(!registry.release(a));
        registry.acquire(a);
        assert!(registry.release(a));
        assert!(!registry.release(a));
        assert_eq!(registry.load("a"), Some(0));
    }

    #[test]
    fn test_release_after_remove_is_ignored() {
        let mut registry = OriginRegistry::new();
        let a = registry.add("a");
        registry.acquire(a);
        registry.remove("a");
        let readded = registry.add("a");
        assert_ne!(a, readded);
        assert!(!registry.release(a));
        assert_eq!(registry.load("a"), Some(0));
    }

    #[test]
    fn test_compose_url() {
        assert_eq!(compose_url("", "app.manifest"), "app.manifest");
        assert_eq!(compose_url("http://cdn", "a/b"), "http://cdn/a/b");
        assert_eq!(compose_url("http://cdn/", "a"), "http://cdn/a");
    }

    proptest! {
        #[test]
        fn prop_loads_return_to_zero(
            origins in 1usize..5,
            ops in proptest::collection::vec((any::<bool>(), 0usize..8), 0..64),
        ) {
            let mut registry = OriginRegistry::new();
            for i in 0..origins {
                registry.add(&format!("o{}", i));
            }

            let mut in_flight: Vec<OriginId> = Vec::new();
            for (dispatch, pick) in ops {
                if dispatch || in_flight.is_empty() {
                    let id = registry.choose().unwrap().id();
                    let min = registry.records().iter().map(|r| r.load_value()).min().unwrap();
                    prop_assert_eq!(registry.get(id).unwrap().load_value(), min);
                    registry.acquire(id);
                    in_flight.push(id);
                } else {
                    let id = in_flight.remove(pick % in_flight.len());
                    prop_assert!(registry.release(id));
                }
            }

            for id in in_flight.drain(..) {
                prop_assert!(registry.release(id));
            }
            prop_assert!(registry.records().iter().all(|r| r.load_value() == 0));
        }
    }
}
