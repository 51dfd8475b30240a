#![forbid(unsafe_code)]

//! Signal/slot dispatch for FrankenTUI.
//!
//! # Role in FrankenTUI
//! `ftui-signal` is the in-process notification primitive: independent
//! observers register slots against a typed [`Signal`] and are invoked, in
//! registration order, every time it is emitted.
//!
//! # Primary responsibilities
//! - **BindingIdentity**: stable `(callable, receiver)` key, so a method
//!   registration can be removed later by naming the same pair.
//! - **Signal**: registry owner and the reentrancy-safe dispatch pass
//!   (snapshot, resolve against live storage, tombstone, compact).
//! - **Connection / ScopedConnection**: disposal handles that point weakly
//!   at the registry and never dangle.
//!
//! # Example
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use ftui_signal::{ScopedConnection, Signal};
//!
//! struct Status {
//!     lines: RefCell<Vec<String>>,
//! }
//!
//! impl Status {
//!     fn on_message(&self, text: &str) {
//!         self.lines.borrow_mut().push(text.to_owned());
//!     }
//! }
//!
//! let signal = Signal::<str>::new();
//! let status = Rc::new(Status { lines: RefCell::new(Vec::new()) });
//!
//! {
//!     let _guard = ScopedConnection::new(signal.connect_method(&status, Status::on_message));
//!     signal.emit("step 1");
//! }
//! // The guard left scope, so this one is not delivered.
//! signal.emit("step 2");
//!
//! assert_eq!(*status.lines.borrow(), vec!["step 1"]);
//! ```
//!
//! # Threading
//! Everything is single-threaded (`Rc`/`RefCell`). A slot may call back
//! into the signal that is invoking it; true parallel access is not
//! supported and the types are `!Send`.

pub mod connection;
pub mod error;
pub mod identity;
mod registry;
pub mod signal;
pub mod slot;

pub use connection::{Connection, ScopedConnection};
pub use error::ConnectError;
pub use identity::BindingIdentity;
pub use signal::{Signal, SignalConfig};
pub use slot::{Binding, Slot, bind, bind_fn, bind_mut};
