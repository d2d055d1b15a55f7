//! Destination for materialized resources.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

type Resource = Arc<dyn Any + Send + Sync>;

/// Named runtime objects produced by materializers.
///
/// A `ContentSet` is a shared handle: clones refer to the same set, so the
/// set handed to `load_package_group` is the one delivered with
/// [`LoaderEvent::GroupReady`](super::LoaderEvent::GroupReady).
///
/// # Example
///
/// ```
/// use content_loader::loader::ContentSet;
///
/// let set = ContentSet::new();
/// set.insert("hero", vec![1u8, 2, 3]);
///
/// let hero = set.get::<Vec<u8>>("hero").unwrap();
/// assert_eq!(hero.len(), 3);
/// assert!(set.get::<String>("hero").is_none());
/// ```
#[derive(Clone, Default)]
pub struct ContentSet {
    resources: Arc<RwLock<HashMap<String, Resource>>>,
}

impl ContentSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a resource, replacing any previous one with the same name.
    pub fn insert<T: Any + Send + Sync>(&self, name: impl Into<String>, value: T) {
        self.resources.write().insert(name.into(), Arc::new(value));
    }

    /// Fetch a resource if it exists and has type `T`.
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let resource = self.resources.read().get(name).cloned()?;
        resource.downcast::<T>().ok()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resources.read().contains_key(name)
    }

    pub fn remove(&self, name: &str) -> bool {
        self.resources.write().remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.resources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.read().is_empty()
    }

    /// Resource names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.resources.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Whether two handles refer to the same set.
    pub fn ptr_eq(&self, other: &ContentSet) -> bool {
        Arc::ptr_eq(&self.resources, &other.resources)
    }
}

impl fmt::Debug for ContentSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentSet")
            .field("names", &self.names())
            .finish()
    }
}
