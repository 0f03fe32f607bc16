//! Typed, key-addressed decoration.
//!
//! A [`Tag`] is a typed accessor for a value held in a container: either a
//! mutable [`TagStore`] (flow context data) or an immutable [`MetaMap`]
//! (decoration installed on executors, scopes and flows at construction
//! time). Containers store type-erased entries keyed by the tag's unique
//! [`TagKey`]; duplicate keys are permitted and [`Tag::some`] collects all
//! matching values.

use crate::error::{CoreError, ErrorCode, Stage};
use crate::schema::{Accept, Schema, SchemaRef};
use crate::types::ErasedValue;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

static NEXT_TAG_KEY: AtomicU64 = AtomicU64::new(1);

/// Unique identity of a [`Tag`], assigned at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TagKey(u64);

struct TagInner<V> {
    key: TagKey,
    label: String,
    default: Option<V>,
    schema: SchemaRef<V>,
    private: bool,
}

/// A typed, key-addressed accessor for container values.
///
/// # Example
///
/// ```ignore
/// let request_id: Tag<String> = Tag::new("request-id");
/// let store = TagStore::new();
/// request_id.set(&store, "req-1".into())?;
/// assert_eq!(request_id.get(&store)?, "req-1");
/// ```
pub struct Tag<V> {
    inner: Arc<TagInner<V>>,
}

impl<V> Clone for Tag<V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<V> fmt::Debug for Tag<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tag")
            .field("key", &self.inner.key)
            .field("label", &self.inner.label)
            .finish()
    }
}

impl<V: Clone + Send + Sync + 'static> Tag<V> {
    /// Create a tag with a fresh unique key and no schema or default.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(TagInner {
                key: TagKey(NEXT_TAG_KEY.fetch_add(1, Ordering::Relaxed)),
                label: label.into(),
                default: None,
                schema: Arc::new(Accept),
                private: false,
            }),
        }
    }

    fn rebuild(
        &self,
        default: Option<V>,
        schema: SchemaRef<V>,
        private: bool,
    ) -> Self {
        Self {
            inner: Arc::new(TagInner {
                key: self.inner.key,
                label: self.inner.label.clone(),
                default,
                schema,
                private,
            }),
        }
    }

    /// Attach a validation schema; writes and [`entry`](Self::entry) values
    /// are validated against it.
    pub fn with_schema(self, schema: impl Schema<V>) -> Self {
        self.rebuild(self.inner.default.clone(), Arc::new(schema), self.inner.private)
    }

    /// Value returned by [`find`](Self::find)/[`get`](Self::get) when the
    /// container holds no entry.
    pub fn with_default(self, value: V) -> Self {
        self.rebuild(Some(value), self.inner.schema.clone(), self.inner.private)
    }

    /// Private tags are not propagated from a flow context to sub-flows.
    pub fn private(self) -> Self {
        self.rebuild(self.inner.default.clone(), self.inner.schema.clone(), true)
    }

    pub fn key(&self) -> TagKey {
        self.inner.key
    }

    pub fn label(&self) -> &str {
        &self.inner.label
    }

    pub fn is_private(&self) -> bool {
        self.inner.private
    }

    /// Produce a type-erased, validated record suitable for attaching to
    /// executors, scopes or flow invocations.
    pub fn entry(&self, value: V) -> Result<Tagged, CoreError> {
        self.check(&value)?;
        Ok(Tagged {
            key: self.inner.key,
            label: self.inner.label.clone(),
            private: self.inner.private,
            value: Arc::new(value),
        })
    }

    /// Read the first matching value, falling back to the default; raises
    /// when neither is present.
    pub fn get<S: TagSource + ?Sized>(&self, source: &S) -> Result<V, CoreError> {
        match self.find(source) {
            Some(v) => Ok(v),
            None => Err(CoreError::new(
                ErrorCode::DependencyNotFound,
                Stage::Resolve,
                format!("tag `{}` has no value and no default", self.inner.label),
            )),
        }
    }

    /// Read the first matching value, or the configured default.
    pub fn find<S: TagSource + ?Sized>(&self, source: &S) -> Option<V> {
        source
            .first(self.inner.key)
            .and_then(|v| v.downcast_ref::<V>().cloned())
            .or_else(|| self.inner.default.clone())
    }

    /// Collect every matching value in the container.
    pub fn some<S: TagSource + ?Sized>(&self, source: &S) -> Vec<V> {
        source
            .all(self.inner.key)
            .into_iter()
            .filter_map(|v| v.downcast_ref::<V>().cloned())
            .collect()
    }

    /// Validate and write into a mutable store, replacing previous entries
    /// under this key.
    pub fn set(&self, store: &TagStore, value: V) -> Result<(), CoreError> {
        self.check(&value)?;
        store.replace(Tagged {
            key: self.inner.key,
            label: self.inner.label.clone(),
            private: self.inner.private,
            value: Arc::new(value),
        });
        Ok(())
    }

    fn check(&self, value: &V) -> Result<(), CoreError> {
        self.inner
            .schema
            .validate(value)
            .map_err(|issues| issues.into_error(Stage::Resolve))
    }
}

/// Type-erased `(key, value)` record produced by [`Tag::entry`].
#[derive(Clone)]
pub struct Tagged {
    pub(crate) key: TagKey,
    pub(crate) label: String,
    pub(crate) private: bool,
    pub(crate) value: ErasedValue,
}

impl Tagged {
    pub fn key(&self) -> TagKey {
        self.key
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_private(&self) -> bool {
        self.private
    }
}

impl fmt::Debug for Tagged {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tagged")
            .field("key", &self.key)
            .field("label", &self.label)
            .finish()
    }
}

/// Read access shared by mutable stores and immutable meta maps.
pub trait TagSource {
    fn first(&self, key: TagKey) -> Option<ErasedValue>;
    fn all(&self, key: TagKey) -> Vec<ErasedValue>;
}

// ── TagStore ────────────────────────────────────────────────────────────────

/// Mutable tag container used as the flow context data store.
///
/// Writes via [`Tag::set`] replace previous entries under the same key;
/// [`TagStore::insert`] appends, so containers seeded from multiple sources
/// may carry duplicates (collected by [`Tag::some`]).
#[derive(Default)]
pub struct TagStore {
    entries: Mutex<HashMap<TagKey, Vec<Tagged>>>,
}

impl TagStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry, keeping any existing values under the same key.
    pub fn insert(&self, entry: Tagged) {
        self.entries
            .lock()
            .expect("tag store poisoned")
            .entry(entry.key)
            .or_default()
            .push(entry);
    }

    pub fn extend(&self, entries: impl IntoIterator<Item = Tagged>) {
        for entry in entries {
            self.insert(entry);
        }
    }

    fn replace(&self, entry: Tagged) {
        self.entries
            .lock()
            .expect("tag store poisoned")
            .insert(entry.key, vec![entry]);
    }

    /// Snapshot of all non-private entries, in insertion order per key.
    /// Used to seed sub-flow context stores.
    pub fn public_entries(&self) -> Vec<Tagged> {
        self.entries
            .lock()
            .expect("tag store poisoned")
            .values()
            .flatten()
            .filter(|e| !e.private)
            .cloned()
            .collect()
    }
}

impl TagSource for TagStore {
    fn first(&self, key: TagKey) -> Option<ErasedValue> {
        self.entries
            .lock()
            .expect("tag store poisoned")
            .get(&key)
            .and_then(|v| v.first())
            .map(|e| e.value.clone())
    }

    fn all(&self, key: TagKey) -> Vec<ErasedValue> {
        self.entries
            .lock()
            .expect("tag store poisoned")
            .get(&key)
            .map(|v| v.iter().map(|e| e.value.clone()).collect())
            .unwrap_or_default()
    }
}

// ── MetaMap ─────────────────────────────────────────────────────────────────

/// Immutable decoration installed on graph nodes at construction time.
///
/// Same read surface as [`TagStore`] but never mutated after build;
/// duplicate keys are kept and collected by [`Tag::some`].
#[derive(Clone, Default)]
pub struct MetaMap {
    entries: Arc<Vec<Tagged>>,
}

impl MetaMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Construction-time append; rebuilds the backing list.
    pub fn with(self, entry: Tagged) -> Self {
        let mut entries = (*self.entries).clone();
        entries.push(entry);
        Self {
            entries: Arc::new(entries),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl fmt::Debug for MetaMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaMap")
            .field("entry_count", &self.entries.len())
            .finish()
    }
}

impl TagSource for MetaMap {
    fn first(&self, key: TagKey) -> Option<ErasedValue> {
        self.entries
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.value.clone())
    }

    fn all(&self, key: TagKey) -> Vec<ErasedValue> {
        self.entries
            .iter()
            .filter(|e| e.key == key)
            .map(|e| e.value.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Refine;

    #[test]
    fn set_then_get_roundtrip() {
        let tag: Tag<String> = Tag::new("request-id");
        let store = TagStore::new();
        tag.set(&store, "req-1".into()).unwrap();
        assert_eq!(tag.get(&store).unwrap(), "req-1");
    }

    #[test]
    fn get_without_value_or_default_raises() {
        let tag: Tag<u32> = Tag::new("missing");
        let store = TagStore::new();
        let err = tag.get(&store).unwrap_err();
        assert_eq!(err.code(), ErrorCode::DependencyNotFound);
    }

    #[test]
    fn default_fallback() {
        let tag: Tag<u32> = Tag::new("retries").with_default(3);
        let store = TagStore::new();
        assert_eq!(tag.find(&store), Some(3));
        assert_eq!(tag.get(&store).unwrap(), 3);
    }

    #[test]
    fn set_replaces_previous_value() {
        let tag: Tag<u32> = Tag::new("count");
        let store = TagStore::new();
        tag.set(&store, 1).unwrap();
        tag.set(&store, 2).unwrap();
        assert_eq!(tag.get(&store).unwrap(), 2);
        assert_eq!(tag.some(&store), vec![2]);
    }

    #[test]
    fn duplicate_entries_collected_by_some() {
        let tag: Tag<&'static str> = Tag::new("role");
        let store = TagStore::new();
        store.insert(tag.entry("admin").unwrap());
        store.insert(tag.entry("auditor").unwrap());
        assert_eq!(tag.some(&store), vec!["admin", "auditor"]);
    }

    #[test]
    fn schema_rejects_invalid_write() {
        let tag: Tag<i64> = Tag::new("port").with_schema(Refine::new(|p: &i64| {
            if (1..=65535).contains(p) {
                Ok(())
            } else {
                Err("out of range".into())
            }
        }));
        let store = TagStore::new();
        assert!(tag.set(&store, 8080).is_ok());
        let err = tag.set(&store, 0).unwrap_err();
        assert_eq!(err.code(), ErrorCode::SchemaValidationFailed);
    }

    #[test]
    fn private_entries_excluded_from_public_snapshot() {
        let open: Tag<u8> = Tag::new("open");
        let secret: Tag<u8> = Tag::new("secret").private();
        let store = TagStore::new();
        open.set(&store, 1).unwrap();
        secret.set(&store, 2).unwrap();
        let snapshot = store.public_entries();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].label(), "open");
    }

    #[test]
    fn meta_map_keeps_duplicates() {
        let tag: Tag<&'static str> = Tag::new("doc");
        let meta = MetaMap::new()
            .with(tag.entry("first").unwrap())
            .with(tag.entry("second").unwrap());
        assert_eq!(tag.some(&meta), vec!["first", "second"]);
        assert_eq!(tag.find(&meta), Some("first"));
    }

    #[test]
    fn distinct_tags_do_not_collide() {
        let a: Tag<u8> = Tag::new("same-label");
        let b: Tag<u8> = Tag::new("same-label");
        let store = TagStore::new();
        a.set(&store, 1).unwrap();
        assert_eq!(b.find(&store), None);
    }
}
