//! Persistent execution scopes.
//!
//! A scope is created on first use and lives for the rest of the process.
//! Names starting with [`PRIVATE_MARKER`] are private to the bridge and live
//! under [`PRIVATE_PREFIX`]; every other name refers to a global module of
//! the runtime by that exact name.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

pub const PRIVATE_MARKER: char = '@';
pub const PRIVATE_PREFIX: &str = "jlbridge.scopes.";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ScopePath {
    Global(String),
    Private { name: String, path: String },
}

impl ScopePath {
    pub fn parse(name: &str) -> Self {
        match name.strip_prefix(PRIVATE_MARKER) {
            Some(rest) => Self::Private {
                name: rest.to_string(),
                path: format!("{PRIVATE_PREFIX}{rest}"),
            },
            None => Self::Global(name.to_string()),
        }
    }

    /// Fully qualified module path of the scope.
    pub fn path(&self) -> &str {
        match self {
            Self::Global(name) => name,
            Self::Private { path, .. } => path,
        }
    }

    pub fn is_private(&self) -> bool {
        matches!(self, Self::Private { .. })
    }
}

impl fmt::Display for ScopePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// Name → namespace map shared by every connection.
pub struct ScopeStore<N> {
    scopes: DashMap<String, Arc<N>>,
}

impl<N> Default for ScopeStore<N> {
    fn default() -> Self {
        Self {
            scopes: DashMap::new(),
        }
    }
}

impl<N> ScopeStore<N> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespace for `name`, calling `create` the first time it is seen.
    ///
    /// A failed `create` leaves nothing behind, so the next request retries.
    pub fn get_or_create<E>(
        &self,
        name: &str,
        create: impl FnOnce(&ScopePath) -> Result<N, E>,
    ) -> Result<Arc<N>, E> {
        if let Some(scope) = self.scopes.get(name) {
            return Ok(Arc::clone(scope.value()));
        }
        match self.scopes.entry(name.to_string()) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let path = ScopePath::parse(name);
                let scope = Arc::new(create(&path)?);
                tracing::debug!(scope = %path, private = path.is_private(), "Created scope");
                entry.insert(Arc::clone(&scope));
                Ok(scope)
            }
        }
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn private_names_are_prefixed() {
        assert_eq!(
            ScopePath::parse("@work"),
            ScopePath::Private {
                name: "work".into(),
                path: "jlbridge.scopes.work".into()
            }
        );
        assert_eq!(ScopePath::parse("Main"), ScopePath::Global("Main".into()));
        assert_eq!(ScopePath::parse("a@b").path(), "a@b");
        assert_eq!(ScopePath::parse("@").path(), "jlbridge.scopes.");
    }

    #[test]
    fn scope_is_created_once() {
        let store = ScopeStore::<Mutex<Vec<i32>>>::new();
        let mut calls = 0;
        let a = store
            .get_or_create("@x", |_| {
                calls += 1;
                Ok::<_, Infallible>(Mutex::new(vec![]))
            })
            .unwrap();
        a.lock().unwrap().push(1);

        let b = store
            .get_or_create("@x", |_| -> Result<_, Infallible> { panic!("created twice") })
            .unwrap();
        assert_eq!(*b.lock().unwrap(), vec![1]);
        assert_eq!(calls, 1);
    }

    #[test]
    fn scopes_are_isolated() {
        let store = ScopeStore::<Mutex<Vec<i32>>>::new();
        let new = |_: &ScopePath| Ok::<_, Infallible>(Mutex::new(vec![]));
        store.get_or_create("@a", new).unwrap().lock().unwrap().push(1);
        let b = store.get_or_create("@b", new).unwrap();
        assert!(b.lock().unwrap().is_empty());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn failed_creation_is_not_cached() {
        let store = ScopeStore::<u8>::new();
        let err = store.get_or_create("bad", |_| Err("boom")).unwrap_err();
        assert_eq!(err, "boom");
        assert!(store.is_empty());
        assert_eq!(*store.get_or_create("bad", |_| Ok::<_, &str>(7)).unwrap(), 7);
    }
}
