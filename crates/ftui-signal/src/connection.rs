#![forbid(unsafe_code)]

//! Disposable connection handles.
//!
//! # Design
//!
//! A [`Connection`] holds a type-erased disposal action pointing *weakly* at
//! the registry that issued it, plus the identity and ticket of the one
//! registration it controls. Disposal upgrades the weak pointer first: if
//! the signal was dropped or cleared in the meantime the upgrade fails and
//! disposal does nothing.
//!
//! [`ScopedConnection`] owns a `Connection` and disposes it on drop. It is
//! move-only; assigning a new connection into a populated guard disposes
//! the old one first.
//!
//! # Failure Modes
//!
//! None. Disconnecting twice, disconnecting after `clear()`, and
//! disconnecting after the signal is gone are all silent no-ops.

use std::cell::RefCell;
use std::fmt;
use std::rc::Weak;

#[cfg(feature = "tracing")]
use tracing::trace;

use crate::identity::BindingIdentity;
use crate::registry::{SlotRegistry, Ticket};

/// Disposal capability stored inside a [`Connection`].
pub(crate) trait Disposer {
    /// Remove the registration, at most once.
    fn dispose(self: Box<Self>);

    /// Whether the registration is still live in a reachable registry.
    fn is_connected(&self) -> bool;
}

/// Weak link from a connection back to the registry that issued it.
pub(crate) struct RegistryLink<A: ?Sized> {
    pub(crate) registry: Weak<RefCell<SlotRegistry<A>>>,
    pub(crate) identity: BindingIdentity,
    pub(crate) ticket: Ticket,
    #[cfg_attr(not(feature = "tracing"), allow(dead_code))]
    pub(crate) label: &'static str,
}

impl<A: ?Sized> Disposer for RegistryLink<A> {
    fn dispose(self: Box<Self>) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        // Bind before dropping: the slot's own drop may reenter the signal.
        let removed = registry.borrow_mut().remove_exact(self.identity, self.ticket);
        if removed.is_some() {
            #[cfg(feature = "tracing")]
            trace!(signal = self.label, identity = ?self.identity, "slot disconnected");
        }
        drop(removed);
    }

    fn is_connected(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.borrow().holds(self.identity, self.ticket))
    }
}

/// Handle that removes one specific slot when disconnected.
///
/// Dropping a `Connection` does **not** disconnect; use
/// [`ScopedConnection`] for that.
#[derive(Default)]
pub struct Connection {
    link: Option<Box<dyn Disposer>>,
}

impl Connection {
    pub(crate) fn new(link: impl Disposer + 'static) -> Self {
        Self {
            link: Some(Box::new(link)),
        }
    }

    /// A connection that controls nothing. Disconnecting it is a no-op.
    #[must_use]
    pub fn detached() -> Self {
        Self::default()
    }

    /// Remove the associated slot. Idempotent.
    pub fn disconnect(&mut self) {
        if let Some(link) = self.link.take() {
            link.dispose();
        }
    }

    /// Whether the associated slot is still registered.
    ///
    /// False after [`disconnect`](Self::disconnect), after the slot was
    /// removed by any other route, and after the signal was cleared or
    /// dropped.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.link.as_ref().is_some_and(|link| link.is_connected())
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// RAII guard that disconnects its connection when dropped.
#[derive(Default)]
pub struct ScopedConnection {
    inner: Connection,
}

impl ScopedConnection {
    /// Take ownership of `connection`.
    #[must_use]
    pub fn new(connection: Connection) -> Self {
        Self { inner: connection }
    }

    /// Replace the held connection, disconnecting the previous one first.
    pub fn set(&mut self, connection: Connection) {
        self.inner.disconnect();
        self.inner = connection;
    }

    /// Disconnect now rather than at end of scope.
    pub fn disconnect(&mut self) {
        self.inner.disconnect();
    }

    /// Whether the held slot is still registered.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Give up the guard without disconnecting.
    #[must_use]
    pub fn release(mut self) -> Connection {
        std::mem::take(&mut self.inner)
    }
}

impl From<Connection> for ScopedConnection {
    fn from(connection: Connection) -> Self {
        Self::new(connection)
    }
}

impl Drop for ScopedConnection {
    fn drop(&mut self) {
        self.inner.disconnect();
    }
}

impl fmt::Debug for ScopedConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedConnection")
            .field("connected", &self.is_connected())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Counts how many times it was disposed.
    struct CountingLink {
        disposed: Rc<Cell<u32>>,
    }

    impl Disposer for CountingLink {
        fn dispose(self: Box<Self>) {
            self.disposed.set(self.disposed.get() + 1);
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn counting() -> (Connection, Rc<Cell<u32>>) {
        let disposed = Rc::new(Cell::new(0));
        let conn = Connection::new(CountingLink {
            disposed: Rc::clone(&disposed),
        });
        (conn, disposed)
    }

    #[test]
    fn detached_is_inert() {
        let mut conn = Connection::detached();
        assert!(!conn.is_connected());
        conn.disconnect();
        conn.disconnect();
        assert!(!conn.is_connected());
    }

    #[test]
    fn disconnect_runs_once() {
        let (mut conn, disposed) = counting();
        assert!(conn.is_connected());
        conn.disconnect();
        conn.disconnect();
        assert_eq!(disposed.get(), 1);
        assert!(!conn.is_connected());
    }

    #[test]
    fn dropping_plain_connection_does_not_dispose() {
        let (conn, disposed) = counting();
        drop(conn);
        assert_eq!(disposed.get(), 0);
    }

    #[test]
    fn scoped_disposes_on_drop() {
        let (conn, disposed) = counting();
        {
            let _scoped = ScopedConnection::new(conn);
        }
        assert_eq!(disposed.get(), 1);
    }

    #[test]
    fn scoped_explicit_then_drop_is_once() {
        let (conn, disposed) = counting();
        let mut scoped = ScopedConnection::from(conn);
        scoped.disconnect();
        assert!(!scoped.is_connected());
        drop(scoped);
        assert_eq!(disposed.get(), 1);
    }

    #[test]
    fn scoped_set_disposes_previous() {
        let (first, first_disposed) = counting();
        let (second, second_disposed) = counting();
        let mut scoped = ScopedConnection::new(first);
        scoped.set(second);
        assert_eq!(first_disposed.get(), 1);
        assert_eq!(second_disposed.get(), 0);
        drop(scoped);
        assert_eq!(second_disposed.get(), 1);
    }

    #[test]
    fn scoped_move_assignment_disposes_destination() {
        let (first, first_disposed) = counting();
        let (second, second_disposed) = counting();
        let mut dest = ScopedConnection::new(first);
        let src = ScopedConnection::new(second);
        assert!(dest.is_connected());
        dest = src;
        assert_eq!(first_disposed.get(), 1);
        assert_eq!(second_disposed.get(), 0);
        drop(dest);
        assert_eq!(second_disposed.get(), 1);
    }

    #[test]
    fn release_keeps_connection_alive() {
        let (conn, disposed) = counting();
        let scoped = ScopedConnection::new(conn);
        let mut conn = scoped.release();
        assert_eq!(disposed.get(), 0);
        conn.disconnect();
        assert_eq!(disposed.get(), 1);
    }

    #[test]
    fn debug_format() {
        let dbg = format!("{:?}", ScopedConnection::default());
        assert!(dbg.contains("ScopedConnection"));
        assert!(dbg.contains("connected: false"));
    }
}
