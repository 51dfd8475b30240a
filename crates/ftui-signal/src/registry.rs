#![forbid(unsafe_code)]

//! Slot registry: identity map plus dispatch order with lazy tombstones.
//!
//! # Layout
//!
//! ```text
//! slots: { id_a -> (t1, slot_a), id_c -> (t4, slot_c) }
//! order: [ (id_a, t1) | (id_b, t2, TOMB) | (id_c, t4) ]
//! ```
//!
//! Every successful insert is stamped with a fresh `Ticket`. A map entry
//! and an order entry describe the same registration only when identity
//! *and* ticket agree; anything else in `order` is stale and is tombstoned
//! the next time a dispatch pass walks over it.
//!
//! # Invariants
//!
//! 1. Every live map entry appears exactly once, untombstoned, in `order`.
//! 2. `order` is strictly increasing by ticket (append-only, compaction
//!    preserves relative order), so entries are found by binary search.
//! 3. Removal never rewrites `order`; compaction is batched after a pass.

use std::fmt;
use std::rc::Rc;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::identity::BindingIdentity;
use crate::slot::Slot;

/// Monotonic stamp distinguishing successive registrations of one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct Ticket(u64);

/// Frozen dispatch set captured at the start of a pass.
pub(crate) type Snapshot = SmallVec<[OrderEntry; 8]>;

struct SlotEntry<A: ?Sized> {
    ticket: Ticket,
    slot: Rc<dyn Slot<A>>,
}

/// One position in the dispatch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct OrderEntry {
    pub(crate) identity: BindingIdentity,
    pub(crate) ticket: Ticket,
    tombstone: bool,
}

/// Outcome of [`SlotRegistry::insert`].
///
/// `displaced` carries a slot that left the registry (a dead entry that was
/// replaced, or the rejected newcomer). Callers drop it only after the
/// registry borrow is released, since dropping a slot may run arbitrary
/// code that reenters the signal.
pub(crate) struct Insertion<A: ?Sized> {
    pub(crate) ticket: Option<Ticket>,
    pub(crate) displaced: Option<Rc<dyn Slot<A>>>,
}

/// Mutable state owned by a signal.
pub(crate) struct SlotRegistry<A: ?Sized> {
    slots: FxHashMap<BindingIdentity, SlotEntry<A>>,
    order: Vec<OrderEntry>,
    next_ticket: u64,
}

impl<A: ?Sized> fmt::Debug for SlotRegistry<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotRegistry")
            .field("slots", &self.slots.len())
            .field("order", &self.order.len())
            .field("next_ticket", &self.next_ticket)
            .finish()
    }
}

impl<A: ?Sized> SlotRegistry<A> {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: FxHashMap::with_capacity_and_hasher(capacity, Default::default()),
            order: Vec::with_capacity(capacity),
            next_ticket: 0,
        }
    }

    /// Store `slot` under `identity` unless another registration holds it.
    ///
    /// `replace` names a registration the caller has already found dead
    /// (receiver dropped). That entry is replaced; the newcomer is appended
    /// to the order and the dead entry's order position becomes stale. Any
    /// other occupant rejects the insert. Liveness is checked by the caller
    /// because `Slot::is_alive` is user code and must run with no borrow held.
    pub(crate) fn insert(
        &mut self,
        identity: BindingIdentity,
        slot: Rc<dyn Slot<A>>,
        replace: Option<Ticket>,
    ) -> Insertion<A> {
        let displaced = match self.slots.get(&identity).map(|e| e.ticket) {
            Some(current) if Some(current) != replace => {
                return Insertion {
                    ticket: None,
                    displaced: Some(slot),
                };
            }
            Some(_) => self.remove(identity),
            None => None,
        };

        let ticket = Ticket(self.next_ticket);
        self.next_ticket += 1;
        self.slots.insert(identity, SlotEntry { ticket, slot });
        self.order.push(OrderEntry {
            identity,
            ticket,
            tombstone: false,
        });
        Insertion {
            ticket: Some(ticket),
            displaced,
        }
    }

    /// Remove whatever is registered under `identity`.
    pub(crate) fn remove(&mut self, identity: BindingIdentity) -> Option<Rc<dyn Slot<A>>> {
        self.slots.remove(&identity).map(|entry| entry.slot)
    }

    /// Remove `identity` only if it is still the registration `ticket`.
    pub(crate) fn remove_exact(
        &mut self,
        identity: BindingIdentity,
        ticket: Ticket,
    ) -> Option<Rc<dyn Slot<A>>> {
        if self.holds(identity, ticket) {
            self.remove(identity)
        } else {
            None
        }
    }

    /// Read-only lookup by identity.
    pub(crate) fn find(&self, identity: BindingIdentity) -> Option<Rc<dyn Slot<A>>> {
        self.slots.get(&identity).map(|entry| Rc::clone(&entry.slot))
    }

    /// Lookup returning the registration's ticket alongside its slot.
    pub(crate) fn lookup(&self, identity: BindingIdentity) -> Option<(Ticket, Rc<dyn Slot<A>>)> {
        self.slots
            .get(&identity)
            .map(|entry| (entry.ticket, Rc::clone(&entry.slot)))
    }

    /// Whether the registration `(identity, ticket)` is still present.
    pub(crate) fn holds(&self, identity: BindingIdentity, ticket: Ticket) -> bool {
        self.slots
            .get(&identity)
            .is_some_and(|entry| entry.ticket == ticket)
    }

    /// Resolve a snapshot entry against live storage.
    pub(crate) fn resolve(&self, entry: &OrderEntry) -> Option<Rc<dyn Slot<A>>> {
        match self.slots.get(&entry.identity) {
            Some(live) if live.ticket == entry.ticket => Some(Rc::clone(&live.slot)),
            _ => None,
        }
    }

    /// Copy of the untombstoned order entries.
    pub(crate) fn snapshot(&self) -> Snapshot {
        self.order.iter().filter(|e| !e.tombstone).copied().collect()
    }

    /// Flag the order position of `ticket` as removed.
    ///
    /// Returns `false` when the position is already gone (compacted by a
    /// nested pass) or already flagged.
    pub(crate) fn mark_tombstone(&mut self, ticket: Ticket) -> bool {
        match self.order.binary_search_by_key(&ticket, |e| e.ticket) {
            Ok(pos) if !self.order[pos].tombstone => {
                self.order[pos].tombstone = true;
                true
            }
            _ => false,
        }
    }

    /// Drop every tombstone, keeping live entries in order. Returns the
    /// number swept.
    pub(crate) fn compact(&mut self) -> usize {
        let before = self.order.len();
        self.order.retain(|e| !e.tombstone);
        before - self.order.len()
    }

    /// Number of live slots.
    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Length of the dispatch order, tombstones and stale entries included.
    #[inline]
    pub(crate) fn order_len(&self) -> usize {
        self.order.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: usize) -> BindingIdentity {
        BindingIdentity::derive(std::ptr::without_provenance(n), std::ptr::null())
    }

    fn noop() -> Rc<dyn Slot<u32>> {
        Rc::new(|_: &u32| {})
    }

    struct DeadSlot;

    impl Slot<u32> for DeadSlot {
        fn invoke(&self, _: &u32) {}

        fn is_alive(&self) -> bool {
            false
        }
    }

    #[test]
    fn insert_appends_to_order() {
        let mut reg = SlotRegistry::<u32>::with_capacity(4);
        assert!(reg.is_empty());
        assert!(reg.insert(id(1), noop(), None).ticket.is_some());
        assert!(reg.insert(id(2), noop(), None).ticket.is_some());
        assert_eq!(reg.len(), 2);
        let order: Vec<_> = reg.snapshot().iter().map(|e| e.identity).collect();
        assert_eq!(order, vec![id(1), id(2)]);
    }

    #[test]
    fn duplicate_insert_rejected_without_mutation() {
        let mut reg = SlotRegistry::<u32>::with_capacity(0);
        let first = reg.insert(id(1), noop(), None);
        let second = reg.insert(id(1), noop(), None);
        assert!(first.ticket.is_some());
        assert!(second.ticket.is_none());
        assert!(second.displaced.is_some());
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.order_len(), 1);
    }

    #[test]
    fn dead_entry_is_replaced_and_reordered() {
        let mut reg = SlotRegistry::<u32>::with_capacity(0);
        reg.insert(id(1), Rc::new(DeadSlot), None);
        reg.insert(id(2), noop(), None);
        let (dead, slot) = reg.lookup(id(1)).unwrap();
        assert!(!slot.is_alive());
        let replaced = reg.insert(id(1), noop(), Some(dead));
        assert!(replaced.ticket.is_some());
        assert!(replaced.displaced.is_some());
        assert_eq!(reg.len(), 2);

        // Old position is stale, the new one sits after id(2).
        let live: Vec<_> = reg
            .snapshot()
            .iter()
            .filter(|e| reg.resolve(e).is_some())
            .map(|e| e.identity)
            .collect();
        assert_eq!(live, vec![id(2), id(1)]);
    }

    #[test]
    fn replace_ticket_must_match_occupant() {
        let mut reg = SlotRegistry::<u32>::with_capacity(0);
        let stale = reg.insert(id(1), noop(), None).ticket.unwrap();
        reg.remove(id(1));
        reg.insert(id(1), noop(), None);
        // The entry judged dead is gone; its replacement is not ours to evict.
        let late = reg.insert(id(1), noop(), Some(stale));
        assert!(late.ticket.is_none());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn remove_leaves_order_untouched() {
        let mut reg = SlotRegistry::<u32>::with_capacity(0);
        reg.insert(id(1), noop(), None);
        reg.insert(id(2), noop(), None);
        assert!(reg.remove(id(1)).is_some());
        assert!(reg.remove(id(1)).is_none());
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.order_len(), 2);
        assert!(reg.find(id(1)).is_none());
        assert!(reg.find(id(2)).is_some());
    }

    #[test]
    fn remove_exact_respects_ticket() {
        let mut reg = SlotRegistry::<u32>::with_capacity(0);
        let old = reg.insert(id(1), noop(), None).ticket.unwrap();
        reg.remove(id(1));
        let new = reg.insert(id(1), noop(), None).ticket.unwrap();
        assert_ne!(old, new);

        assert!(reg.remove_exact(id(1), old).is_none());
        assert!(reg.holds(id(1), new));
        assert!(reg.remove_exact(id(1), new).is_some());
        assert!(!reg.holds(id(1), new));
    }

    #[test]
    fn reinsert_after_remove_resolves_once() {
        let mut reg = SlotRegistry::<u32>::with_capacity(0);
        reg.insert(id(1), noop(), None);
        reg.remove(id(1));
        reg.insert(id(1), noop(), None);
        let snap = reg.snapshot();
        assert_eq!(snap.len(), 2);
        let resolved = snap.iter().filter(|e| reg.resolve(e).is_some()).count();
        assert_eq!(resolved, 1);
    }

    #[test]
    fn tombstones_compact_in_order() {
        let mut reg = SlotRegistry::<u32>::with_capacity(0);
        let t1 = reg.insert(id(1), noop(), None).ticket.unwrap();
        let _t2 = reg.insert(id(2), noop(), None).ticket.unwrap();
        let t3 = reg.insert(id(3), noop(), None).ticket.unwrap();
        reg.remove(id(1));
        reg.remove(id(3));

        assert!(reg.mark_tombstone(t1));
        assert!(!reg.mark_tombstone(t1));
        assert!(reg.mark_tombstone(t3));
        // Tombstoned entries leave the snapshot before compaction.
        assert_eq!(reg.snapshot().len(), 1);

        assert_eq!(reg.compact(), 2);
        assert_eq!(reg.order_len(), 1);
        assert!(!reg.mark_tombstone(t3));
        assert_eq!(reg.snapshot()[0].identity, id(2));
    }

    #[test]
    fn compact_without_tombstones_is_noop() {
        let mut reg = SlotRegistry::<u32>::with_capacity(0);
        reg.insert(id(1), noop(), None);
        assert_eq!(reg.compact(), 0);
        assert_eq!(reg.order_len(), 1);
    }
}
