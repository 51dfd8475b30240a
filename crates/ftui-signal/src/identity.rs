#![forbid(unsafe_code)]

//! Binding identity: the key a registration is stored and removed under.
//!
//! A [`BindingIdentity`] is derived from two addresses: the callable being
//! bound (a function or method pointer) and the receiver it is bound to.
//! Both halves are kept side by side rather than folded into one word, so
//! distinct `(callable, receiver)` pairs cannot collide while both are live.
//!
//! # Invariants
//!
//! 1. Derivation is pure: the same pair always yields the same identity.
//! 2. Only addresses participate. Argument values never do.
//! 3. A null receiver marks a receiver-less binding (free function or
//!    closure).
//!
//! # Caveats
//!
//! Function addresses are whatever the compiler hands out. Identical
//! function bodies may be merged and the same function may be instantiated
//! at more than one address across codegen units, so identity-based removal
//! is only reliable when the same function item is named at both sites.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Identity key for one `(callable, receiver)` registration.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingIdentity {
    callable: usize,
    receiver: usize,
}

impl BindingIdentity {
    /// Derive an identity from a callable address and a receiver address.
    #[must_use]
    pub fn derive(callable: *const (), receiver: *const ()) -> Self {
        Self {
            callable: callable.addr(),
            receiver: receiver.addr(),
        }
    }

    /// Identity of a shared-receiver method binding.
    #[must_use]
    pub fn of_method<R: ?Sized, A: ?Sized>(receiver: &Rc<R>, method: fn(&R, &A)) -> Self {
        Self::derive(method as *const (), Rc::as_ptr(receiver).cast::<()>())
    }

    /// Identity of a mutable-receiver method binding.
    ///
    /// The receiver half is the address of the `RefCell`, so the same cell
    /// bound through [`of_method`](Self::of_method) with a `fn(&RefCell<R>, _)`
    /// yields a different callable half and never collides.
    #[must_use]
    pub fn of_method_mut<R, A: ?Sized>(
        receiver: &Rc<RefCell<R>>,
        method: fn(&mut R, &A),
    ) -> Self {
        Self::derive(method as *const (), Rc::as_ptr(receiver).cast::<()>())
    }

    /// Identity of a free function binding (null receiver).
    #[must_use]
    pub fn of_fn<A: ?Sized>(function: fn(&A)) -> Self {
        Self::derive(function as *const (), std::ptr::null())
    }

    /// Address half contributed by the callable.
    #[inline]
    #[must_use]
    pub const fn callable(&self) -> usize {
        self.callable
    }

    /// Address half contributed by the receiver (0 when receiver-less).
    #[inline]
    #[must_use]
    pub const fn receiver(&self) -> usize {
        self.receiver
    }

    /// Whether this identity was derived without a receiver.
    #[inline]
    #[must_use]
    pub const fn is_receiverless(&self) -> bool {
        self.receiver == 0
    }
}

impl fmt::Debug for BindingIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BindingIdentity({:#x}@{:#x})", self.callable, self.receiver)
    }
}
