#![forbid(unsafe_code)]

//! Multicast signal with a reentrancy-safe dispatch pass.
//!
//! # Design
//!
//! [`Signal<A>`] owns its registry through `Rc<RefCell<..>>` and hands out
//! only `Weak` references to it (inside [`Connection`]s). `clear()` swaps in
//! a fresh registry, so every connection issued before the swap points at
//! an object the signal no longer reaches and becomes inert.
//!
//! # Dispatch
//!
//! ```text
//! emit(args)
//!   snapshot = copy of live order          (freezes the dispatch set)
//!   for entry in snapshot:
//!       slot = live map[entry]             (identity + ticket must match)
//!       present & alive -> invoke(args)    (no borrow held while it runs)
//!       otherwise       -> tombstone entry in live order
//!   any tombstones?     -> compact live order once
//! ```
//!
//! A slot may connect, disconnect, clear or emit on the same signal while
//! it runs. Connections made mid-pass land in the live order only and fire
//! from the next pass on. Disconnections made mid-pass take effect for every
//! entry not yet reached; a mid-pass `clear()` ends the pass.
//!
//! # Performance
//!
//! | Operation      | Complexity                           |
//! |----------------|--------------------------------------|
//! | `connect*`     | O(1) amortized                       |
//! | `disconnect*`  | O(1)                                 |
//! | `emit()`       | O(S) + O(T log S) for T tombstones   |
//! | `clear()`      | O(S) to drop the old slots           |
//!
//! # Failure Modes
//!
//! - **Duplicate registration**: the plain `connect*` forms return a
//!   detached [`Connection`]; the `try_*` forms return
//!   [`ConnectError::Duplicate`].
//! - **Busy mutable receiver**: a `connect_method_mut` slot reached again
//!   by a nested emit while its receiver is still borrowed is skipped.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[cfg(feature = "tracing")]
use tracing::{debug, trace};

use crate::connection::{Connection, RegistryLink};
use crate::error::ConnectError;
use crate::identity::BindingIdentity;
use crate::registry::{Insertion, SlotRegistry};
use crate::slot::{Binding, bind, bind_fn, bind_mut};

type SharedRegistry<A> = Rc<RefCell<SlotRegistry<A>>>;

/// Configuration for a [`Signal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignalConfig {
    /// Name attached to log events and `Debug` output.
    pub label: &'static str,
    /// Slots to pre-allocate room for (also applied after `clear()`).
    pub initial_capacity: usize,
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            label: "signal",
            initial_capacity: 0,
        }
    }
}

impl SignalConfig {
    /// Set the label.
    #[must_use]
    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    /// Set the initial capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }
}

/// Single-threaded multicast notifier with payload type `A`.
///
/// Slots receive `&A`. Use a tuple for several arguments and an unsized
/// type such as `str` to pass borrowed text.
///
/// # Invariants
///
/// 1. Slots fire in registration order.
/// 2. A pass fires exactly the slots live when it started, minus those
///    removed before being reached.
/// 3. One `(callable, receiver)` pair is registered at most once.
/// 4. No registry borrow is held while user code (a slot body or a slot's
///    destructor) runs.
pub struct Signal<A: ?Sized> {
    registry: RefCell<SharedRegistry<A>>,
    config: SignalConfig,
}

impl<A: ?Sized + 'static> Default for Signal<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ?Sized> fmt::Debug for Signal<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = Rc::clone(&self.registry.borrow());
        let registry = registry.borrow();
        f.debug_struct("Signal")
            .field("label", &self.config.label)
            .field("slots", &registry.len())
            .field("order_len", &registry.order_len())
            .finish()
    }
}

impl<A: ?Sized + 'static> Signal<A> {
    /// Create an empty signal with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(SignalConfig::default())
    }

    /// Create an empty signal with an explicit configuration.
    #[must_use]
    pub fn with_config(config: SignalConfig) -> Self {
        Self {
            registry: RefCell::new(Rc::new(RefCell::new(SlotRegistry::with_capacity(
                config.initial_capacity,
            )))),
            config,
        }
    }

    /// The configuration this signal was built with.
    #[must_use]
    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    /// Current registry. The outer borrow ends before this returns.
    fn shared(&self) -> SharedRegistry<A> {
        Rc::clone(&self.registry.borrow())
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Register a prebuilt binding.
    ///
    /// # Errors
    ///
    /// [`ConnectError::Duplicate`] if a live slot already holds the
    /// binding's identity. The signal is left unchanged.
    pub fn try_connect_binding(&self, binding: Binding<A>) -> Result<Connection, ConnectError> {
        let (identity, slot) = binding.into_parts();
        let registry = self.shared();
        // Liveness is user code: decide it with no borrow held.
        let occupant = registry.borrow().lookup(identity);
        let replace = match occupant {
            Some((ticket, current)) if !current.is_alive() => Some(ticket),
            _ => None,
        };
        let Insertion { ticket, displaced } =
            registry.borrow_mut().insert(identity, slot, replace);
        drop(displaced);

        let Some(ticket) = ticket else {
            #[cfg(feature = "tracing")]
            debug!(
                signal = self.config.label,
                identity = ?identity,
                "duplicate slot rejected"
            );
            return Err(ConnectError::Duplicate { identity });
        };

        #[cfg(feature = "tracing")]
        trace!(
            signal = self.config.label,
            identity = ?identity,
            ticket = ?ticket,
            "slot connected"
        );
        Ok(Connection::new(RegistryLink {
            registry: Rc::downgrade(&registry),
            identity,
            ticket,
            label: self.config.label,
        }))
    }

    /// Register a prebuilt binding. A duplicate yields a detached
    /// connection and leaves the signal unchanged.
    pub fn connect_binding(&self, binding: Binding<A>) -> Connection {
        self.try_connect_binding(binding).unwrap_or_default()
    }

    /// Register a closure. It can only be removed through the returned
    /// connection or by `clear()`.
    pub fn connect(&self, slot: impl Fn(&A) + 'static) -> Connection {
        self.connect_binding(Binding::from_closure(slot))
    }

    /// Register `method` on a shared receiver. The receiver is held weakly.
    pub fn connect_method<R: ?Sized + 'static>(
        &self,
        receiver: &Rc<R>,
        method: fn(&R, &A),
    ) -> Connection {
        self.connect_binding(bind(receiver, method))
    }

    /// Fallible form of [`connect_method`](Self::connect_method).
    ///
    /// # Errors
    ///
    /// [`ConnectError::Duplicate`] if this pair is already registered.
    pub fn try_connect_method<R: ?Sized + 'static>(
        &self,
        receiver: &Rc<R>,
        method: fn(&R, &A),
    ) -> Result<Connection, ConnectError> {
        self.try_connect_binding(bind(receiver, method))
    }

    /// Register `method` on a receiver that needs `&mut` access.
    pub fn connect_method_mut<R: 'static>(
        &self,
        receiver: &Rc<RefCell<R>>,
        method: fn(&mut R, &A),
    ) -> Connection {
        self.connect_binding(bind_mut(receiver, method))
    }

    /// Fallible form of [`connect_method_mut`](Self::connect_method_mut).
    ///
    /// # Errors
    ///
    /// [`ConnectError::Duplicate`] if this pair is already registered.
    pub fn try_connect_method_mut<R: 'static>(
        &self,
        receiver: &Rc<RefCell<R>>,
        method: fn(&mut R, &A),
    ) -> Result<Connection, ConnectError> {
        self.try_connect_binding(bind_mut(receiver, method))
    }

    /// Register a free function.
    pub fn connect_fn(&self, function: fn(&A)) -> Connection {
        self.connect_binding(bind_fn(function))
    }

    /// Fallible form of [`connect_fn`](Self::connect_fn).
    ///
    /// # Errors
    ///
    /// [`ConnectError::Duplicate`] if `function` is already registered.
    pub fn try_connect_fn(&self, function: fn(&A)) -> Result<Connection, ConnectError> {
        self.try_connect_binding(bind_fn(function))
    }

    // ========================================================================
    // Removal
    // ========================================================================

    /// Remove the slot registered under `identity`. Returns whether one was
    /// removed. The dispatch order is cleaned up lazily on the next emit.
    pub fn disconnect(&self, identity: BindingIdentity) -> bool {
        let removed = self.shared().borrow_mut().remove(identity);
        let hit = removed.is_some();
        if hit {
            #[cfg(feature = "tracing")]
            trace!(signal = self.config.label, identity = ?identity, "slot disconnected");
        }
        drop(removed);
        hit
    }

    /// Remove the `(receiver, method)` registration.
    pub fn disconnect_method<R: ?Sized>(&self, receiver: &Rc<R>, method: fn(&R, &A)) -> bool {
        self.disconnect(BindingIdentity::of_method(receiver, method))
    }

    /// Remove the `(receiver, method)` registration made with
    /// [`connect_method_mut`](Self::connect_method_mut).
    pub fn disconnect_method_mut<R>(
        &self,
        receiver: &Rc<RefCell<R>>,
        method: fn(&mut R, &A),
    ) -> bool {
        self.disconnect(BindingIdentity::of_method_mut(receiver, method))
    }

    /// Remove a free function registration.
    pub fn disconnect_fn(&self, function: fn(&A)) -> bool {
        self.disconnect(BindingIdentity::of_fn(function))
    }

    /// Drop every slot. Connections issued so far become inert; a pass
    /// already in flight stops before reaching any further slot.
    pub fn clear(&self) {
        let fresh = Rc::new(RefCell::new(SlotRegistry::with_capacity(
            self.config.initial_capacity,
        )));
        let old = self.registry.replace(fresh);
        #[cfg(feature = "tracing")]
        debug!(
            signal = self.config.label,
            dropped = old.borrow().len(),
            "signal cleared"
        );
        drop(old);
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Whether a live slot is registered under `identity`.
    #[must_use]
    pub fn contains(&self, identity: BindingIdentity) -> bool {
        let slot = self.shared().borrow().find(identity);
        slot.is_some_and(|slot| slot.is_alive())
    }

    /// Whether `(receiver, method)` is currently registered.
    #[must_use]
    pub fn contains_method<R: ?Sized>(&self, receiver: &Rc<R>, method: fn(&R, &A)) -> bool {
        self.contains(BindingIdentity::of_method(receiver, method))
    }

    /// True when no slot is registered.
    ///
    /// Slots whose receiver was dropped still count until the next emit
    /// sweeps them.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared().borrow().is_empty()
    }

    /// Number of registered slots (same counting rule as `is_empty`).
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared().borrow().len()
    }

    /// Length of the dispatch order, including entries awaiting compaction.
    #[must_use]
    pub fn order_len(&self) -> usize {
        self.shared().borrow().order_len()
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Invoke every slot live at the start of this call, in registration
    /// order.
    pub fn emit(&self, args: &A) {
        let registry = self.shared();
        let snapshot = registry.borrow().snapshot();
        #[cfg(feature = "tracing")]
        trace!(signal = self.config.label, slots = snapshot.len(), "emit");

        let mut tombstoned = false;
        for entry in &snapshot {
            if !Rc::ptr_eq(&registry, &self.registry.borrow()) {
                // Cleared by an earlier slot: nothing captured is live.
                #[cfg(feature = "tracing")]
                trace!(signal = self.config.label, "emit cut short by clear");
                return;
            }
            let slot = registry.borrow().resolve(entry);
            match slot {
                Some(slot) if slot.is_alive() => slot.invoke(args),
                slot => {
                    let dead = {
                        let mut reg = registry.borrow_mut();
                        tombstoned |= reg.mark_tombstone(entry.ticket);
                        // Receiver gone: sweep the map entry too.
                        if slot.is_some() {
                            reg.remove_exact(entry.identity, entry.ticket)
                        } else {
                            None
                        }
                    };
                    drop(dead);
                    drop(slot);
                }
            }
        }

        if tombstoned {
            let swept = registry.borrow_mut().compact();
            #[cfg(feature = "tracing")]
            trace!(
                signal = self.config.label,
                tombstones = swept,
                "compacted dispatch order"
            );
            #[cfg(not(feature = "tracing"))]
            let _ = swept;
        }
    }
}
