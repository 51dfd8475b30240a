#![forbid(unsafe_code)]

//! Errors surfaced by the fallible registration forms.

use thiserror::Error;

use crate::identity::BindingIdentity;

/// Why a `try_connect*` call did not register its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// A live slot is already registered under this identity.
    #[error("slot already connected: {identity:?}")]
    Duplicate {
        /// Identity that collided.
        identity: BindingIdentity,
    },
}
