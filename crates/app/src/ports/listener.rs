//! Listener port: locally registered event handlers.
//!
//! Listeners are stored as trait objects in the event manager's fan-out set,
//! so `handle` returns a boxed future instead of an `impl Future`.

use futures::future::BoxFuture;

use ccuhub_domain::error::ListenerError;
use ccuhub_domain::event::Event;

/// A handler that receives every normalized event.
///
/// Delivery is serialized: a listener never sees two events concurrently.
/// Long remote calls inside `handle` hold up every other listener.
pub trait Listener: Send + Sync {
    /// Name used in logs and failure reports.
    fn name(&self) -> &str;

    /// Handle one event.
    fn handle<'a>(&'a self, event: &'a Event) -> BoxFuture<'a, Result<(), ListenerError>>;
}
