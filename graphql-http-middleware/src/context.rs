use std::any::Any;
use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

/// Any type that is Clone, Send, Sync and 'static can be stored in the context.
trait ContextValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> ContextValue for T {}

/// Caller supplied state handed to the executor, keyed by type.
///
/// A clone shares its entries with the original. Values are cloned when read, so wrap
/// expensive values in an `Arc` before inserting them:
///
/// ```rust
/// use graphql_http_middleware::Context;
///
/// let context = Context::new();
/// context.insert(42u32);
/// context.insert("viewer".to_string());
///
/// assert_eq!(context.get::<u32>(), Some(42));
/// assert_eq!(context.get::<String>().as_deref(), Some("viewer"));
/// ```
#[derive(Clone, Default)]
pub struct Context {
    entries: Arc<DashMap<TypeId, Arc<dyn Any + Send + Sync + 'static>>>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a clone of the value stored for `T`.
    #[allow(private_bounds)]
    pub fn get<T: ContextValue>(&self) -> Option<T> {
        let value = self.entries.get(&TypeId::of::<T>())?.value().clone();
        value.downcast::<T>().ok().map(|value| T::clone(&value))
    }

    /// Stores `value`, replacing any previous value of the same type.
    #[allow(private_bounds)]
    pub fn insert<T: ContextValue>(&self, value: T) {
        self.entries.insert(TypeId::of::<T>(), Arc::new(value));
    }

    #[allow(private_bounds)]
    pub fn remove<T: ContextValue>(&self) {
        self.entries.remove(&TypeId::of::<T>());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("entries", &self.entries.len())
            .finish()
    }
}
