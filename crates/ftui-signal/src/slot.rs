#![forbid(unsafe_code)]

//! Type-erased slot storage and the binders that produce it.
//!
//! Every callable a signal can hold is reduced to one capability,
//! [`Slot::invoke`]. Concrete kinds:
//!
//! | Binder        | Receiver            | Identity                        |
//! |---------------|---------------------|---------------------------------|
//! | [`bind`]      | `Rc<R>` (weak)      | method address @ receiver       |
//! | [`bind_mut`]  | `Rc<RefCell<R>>` (weak) | method address @ cell       |
//! | [`bind_fn`]   | none                | function address @ null         |
//! | [`Binding::from_closure`] | none    | slot allocation @ null          |
//!
//! Method slots never keep their receiver alive. Once the receiver is
//! dropped the slot reports itself dead and the next dispatch sweeps it.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

#[cfg(feature = "tracing")]
use tracing::warn;

use crate::identity::BindingIdentity;

/// A callable registered on a signal with payload type `A`.
pub trait Slot<A: ?Sized> {
    /// Invoke the slot with the dispatch arguments.
    fn invoke(&self, args: &A);

    /// Whether the slot can still run. Dead slots are swept on dispatch.
    fn is_alive(&self) -> bool {
        true
    }
}

impl<A: ?Sized, F: Fn(&A)> Slot<A> for F {
    fn invoke(&self, args: &A) {
        self(args);
    }
}

/// Method bound to a shared receiver.
struct MethodSlot<R: ?Sized, A: ?Sized> {
    receiver: Weak<R>,
    method: fn(&R, &A),
}

impl<R: ?Sized, A: ?Sized> Slot<A> for MethodSlot<R, A> {
    fn invoke(&self, args: &A) {
        if let Some(receiver) = self.receiver.upgrade() {
            (self.method)(&receiver, args);
        }
    }

    fn is_alive(&self) -> bool {
        self.receiver.strong_count() > 0
    }
}

/// Method bound to a receiver behind a `RefCell`.
struct MethodMutSlot<R, A: ?Sized> {
    receiver: Weak<RefCell<R>>,
    method: fn(&mut R, &A),
}

impl<R, A: ?Sized> Slot<A> for MethodMutSlot<R, A> {
    fn invoke(&self, args: &A) {
        let Some(receiver) = self.receiver.upgrade() else {
            return;
        };
        // A nested dispatch can reach a receiver that is still mid-call.
        let Ok(mut receiver) = receiver.try_borrow_mut() else {
            #[cfg(feature = "tracing")]
            warn!(
                receiver = Weak::as_ptr(&self.receiver).cast::<()>().addr(),
                "receiver already borrowed; slot skipped"
            );
            return;
        };
        (self.method)(&mut receiver, args);
    }

    fn is_alive(&self) -> bool {
        self.receiver.strong_count() > 0
    }
}

/// A ready-to-register slot together with its identity.
///
/// Produced by [`bind`], [`bind_mut`], [`bind_fn`] or
/// [`Binding::from_closure`] and consumed by
/// [`Signal::connect_binding`](crate::Signal::connect_binding).
pub struct Binding<A: ?Sized> {
    identity: BindingIdentity,
    slot: Rc<dyn Slot<A>>,
}

impl<A: ?Sized + 'static> Binding<A> {
    /// Wrap a closure. Its identity is the address of its own allocation,
    /// so two closures never share an identity.
    pub fn from_closure(f: impl Fn(&A) + 'static) -> Self {
        let slot: Rc<dyn Slot<A>> = Rc::new(f);
        let identity = BindingIdentity::derive(Rc::as_ptr(&slot).cast::<()>(), std::ptr::null());
        Self { identity, slot }
    }

    /// Pair an arbitrary slot with a caller-chosen identity.
    pub fn from_parts(identity: BindingIdentity, slot: impl Slot<A> + 'static) -> Self {
        Self {
            identity,
            slot: Rc::new(slot),
        }
    }
}

impl<A: ?Sized> Binding<A> {
    /// Identity the binding will be registered under.
    #[inline]
    #[must_use]
    pub fn identity(&self) -> BindingIdentity {
        self.identity
    }

    pub(crate) fn into_parts(self) -> (BindingIdentity, Rc<dyn Slot<A>>) {
        (self.identity, self.slot)
    }
}

impl<A: ?Sized> fmt::Debug for Binding<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("identity", &self.identity)
            .field("alive", &self.slot.is_alive())
            .finish()
    }
}

/// Bind `method` to a shared receiver.
pub fn bind<R, A>(receiver: &Rc<R>, method: fn(&R, &A)) -> Binding<A>
where
    R: ?Sized + 'static,
    A: ?Sized + 'static,
{
    Binding {
        identity: BindingIdentity::of_method(receiver, method),
        slot: Rc::new(MethodSlot {
            receiver: Rc::downgrade(receiver),
            method,
        }),
    }
}

/// Bind `method` to a receiver that needs `&mut` access.
pub fn bind_mut<R, A>(receiver: &Rc<RefCell<R>>, method: fn(&mut R, &A)) -> Binding<A>
where
    R: 'static,
    A: ?Sized + 'static,
{
    Binding {
        identity: BindingIdentity::of_method_mut(receiver, method),
        slot: Rc::new(MethodMutSlot {
            receiver: Rc::downgrade(receiver),
            method,
        }),
    }
}

/// Bind a free function.
pub fn bind_fn<A: ?Sized + 'static>(function: fn(&A)) -> Binding<A> {
    Binding {
        identity: BindingIdentity::of_fn(function),
        slot: Rc::new(function),
    }
}
