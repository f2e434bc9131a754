use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};
use tokio::sync::watch;

/// A per-delivery unit-of-work context, threaded through middlewares and the handler.
///
/// The consumption loop creates a fresh context for every delivery - nothing is inherited
/// from previous deliveries or from the caller that started consuming.
///
/// # Values
///
/// A context can carry typed values, at most one per type. Pre-handle middlewares typically
/// use them to pass information to the handler (e.g. a tenant id extracted from a header).
///
/// Cloning a context copies its values: inserting into a clone does not affect the original.
/// This is how post-handle middlewares are guaranteed to see the context produced by
/// pre-handle middlewares, regardless of what the handler or other post-handle middlewares do
/// with their own copy.
///
/// # Cancellation
///
/// Clones share the same cancellation signal. The consumption loop cancels the context once
/// the delivery has been fully processed; anyone holding a copy can also cancel it earlier
/// (e.g. a middleware telling the handler to give up).
#[derive(Clone)]
pub struct HandlingContext {
    values: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    cancellation: Arc<watch::Sender<bool>>,
}

impl HandlingContext {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            values: HashMap::new(),
            cancellation: Arc::new(sender),
        }
    }

    /// Store a value in the context, replacing any existing value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.values.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Fluent version of [`HandlingContext::insert`].
    #[must_use]
    pub fn with_value<T: Send + Sync + 'static>(mut self, value: T) -> Self {
        self.insert(value);
        self
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<T>())
    }

    /// Remove a value from this copy of the context.
    pub fn remove<T: Send + Sync + 'static>(&mut self) -> bool {
        self.values.remove(&TypeId::of::<T>()).is_some()
    }

    /// Cancel this context and all its copies.
    pub fn cancel(&self) {
        self.cancellation.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancellation.borrow()
    }

    /// Resolves once the context has been cancelled.
    pub async fn cancelled(&self) {
        let mut receiver = self.cancellation.subscribe();
        loop {
            let cancelled = *receiver.borrow_and_update();
            if cancelled {
                return;
            }
            // The sender lives as long as `self`, this only errors out if it was dropped.
            if receiver.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for HandlingContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for HandlingContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlingContext")
            .field("values", &self.values.len())
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
