//! Message-local storage: a type-map shared by every middleware and the handler taking part
//! in the processing of a single delivery, on the way in (exchange-level pre-handle ->
//! queue-level pre-handle -> handler) and on the way out (queue-level post-handle ->
//! exchange-level post-handle -> ack/nack).
//!
//! Our implementation relies on task-local storage, so it does not need to be passed around
//! as an argument. Unlike [`HandlingContext`](crate::consumers::HandlingContext) values, items
//! stored here by the handler or by a post-handle middleware are visible to every middleware
//! that runs afterwards.
//!
//! # Common use cases
//!
//! ## Measuring elapsed time
//!
//! Store a clock in an exchange-level pre-handle middleware, retrieve it in the matching
//! post-handle middleware and record the elapsed time.
//!
//! ## Signalling between middlewares
//!
//! Middlewares cannot fail. A pre-handle middleware rejecting a message can flag it here and
//! let the handler, or a later middleware, decide what to do.
#![allow(clippy::declare_interior_mutable_const)] // silence tokio::task_local warning

use std::cell::RefCell;
use std::future::Future;
use task_local_extensions::Extensions;

tokio::task_local! {
    /// It is behind a RefCell to allow insert by caller holding just a & reference instead of a
    /// &mut reference.
    static EXTENSIONS: RefCell<Extensions>;
}

/// Sets a task local to `Extensions` before `fut` is run,
/// and fetches the contents of the task local Extensions after completion
/// and returns it.
pub(crate) async fn with_extensions<T>(
    extensions: Extensions,
    fut: impl Future<Output = T>,
) -> (Extensions, T) {
    EXTENSIONS
        .scope(RefCell::new(extensions), async move {
            let response = fut.await;
            let extensions = RefCell::new(Extensions::new());

            EXTENSIONS.with(|ext| ext.swap(&extensions));

            (extensions.into_inner(), response)
        })
        .await
}

/// Retrieve an item from message-local storage based on its type.
///
/// It returns `None` if the message-local storage does not contain an item of that type, or
/// when called outside of the processing of a delivery.
pub fn get_message_local_item<T: Send + Sync + Clone + 'static>() -> Option<T> {
    EXTENSIONS
        .try_with(|e| e.borrow().get::<T>().cloned())
        .ok()
        .flatten()
}

/// Insert an item in message-local storage.
/// If another item with the same type was already stored in message-local storage it gets replaced.
pub fn set_message_local_item<T: Send + Sync + 'static>(item: T) {
    let _ = EXTENSIONS
        .try_with(|e| e.borrow_mut().insert(item))
        .map_err(|_| tracing::warn!("Failed to set local item in the message context extensions."));
}
