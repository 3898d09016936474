//! Linkages between boxes and the postoffice that tracks them.
//!
//! A linkage is a directed edge from a source box to a sink box. Once
//! established, anything sent to the source is delivered to the sink (or to
//! whatever the sink itself forwards to). Three shapes are allowed:
//!
//! | Source | Sink   | Kind                  | Typical use                           |
//! |--------|--------|-----------------------|---------------------------------------|
//! | outbox | inbox  | [`LinkKind::Normal`]  | producer to consumer                  |
//! | inbox  | inbox  | `InboxPassthrough`    | parent hands its input to a child     |
//! | outbox | outbox | `OutboxPassthrough`   | child output surfaces on the parent   |
//!
//! # Rules
//!
//! - A source box forwards to at most one sink. Linking it again fails with
//!   [`ErrorKind::BoxAlreadyLinked`] until the first linkage is removed.
//! - Messages already waiting in a source inbox move to the sink on link.
//! - Unlinking never loses delivered messages; they stay where they landed.
//!
//! A [`Postoffice`] records the linkages one owner created, so the owner can
//! remove all of them when it terminates.

use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{Error, ErrorKind, Result};
use crate::mailbox::{Direction, Postbox};
use crate::types::{LinkageId, UnitId};

// ============================================================================
// Linkage
// ============================================================================

/// Shape of a linkage, derived from the directions of its boxes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    /// Outbox to inbox.
    Normal,
    /// Inbox to inbox.
    InboxPassthrough,
    /// Outbox to outbox.
    OutboxPassthrough,
}

impl LinkKind {
    fn between(source: Direction, sink: Direction) -> Option<Self> {
        match (source, sink) {
            (Direction::Outbox, Direction::Inbox) => Some(Self::Normal),
            (Direction::Inbox, Direction::Inbox) => Some(Self::InboxPassthrough),
            (Direction::Outbox, Direction::Outbox) => Some(Self::OutboxPassthrough),
            (Direction::Inbox, Direction::Outbox) => None,
        }
    }
}

/// A registered edge between two boxes.
#[derive(Debug, Clone)]
pub struct Linkage {
    id: LinkageId,
    source: Postbox,
    sink: Postbox,
    kind: LinkKind,
}

impl Linkage {
    /// Identifier returned when the linkage was created.
    #[must_use]
    pub fn id(&self) -> LinkageId {
        self.id
    }

    /// The box messages are sent to.
    #[must_use]
    pub fn source(&self) -> &Postbox {
        &self.source
    }

    /// The box messages are forwarded to.
    #[must_use]
    pub fn sink(&self) -> &Postbox {
        &self.sink
    }

    /// Shape of the linkage.
    #[must_use]
    pub fn kind(&self) -> LinkKind {
        self.kind
    }

    fn touches(&self, unit: UnitId) -> bool {
        self.source.owner() == Some(unit) || self.sink.owner() == Some(unit)
    }
}

// ============================================================================
// Postoffice
// ============================================================================

/// Registry of the linkages created by one owner.
///
/// Iteration order is creation order ([`BTreeMap`] keyed by the monotonic
/// [`LinkageId`]).
#[derive(Debug, Default)]
pub struct Postoffice {
    owner: Option<UnitId>,
    records: BTreeMap<LinkageId, Linkage>,
}

impl Postoffice {
    /// Creates a postoffice with no owner, for wiring done outside any unit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a postoffice whose linkages belong to `owner`.
    #[must_use]
    pub fn for_unit(owner: UnitId) -> Self {
        Self {
            owner: Some(owner),
            records: BTreeMap::new(),
        }
    }

    /// Links `source` to `sink`.
    ///
    /// Safe to call while the scheduler is running; the next send through
    /// `source` follows the new edge.
    pub fn link(&mut self, source: &Postbox, sink: &Postbox) -> Result<LinkageId> {
        let kind = LinkKind::between(source.direction(), sink.direction()).ok_or_else(|| {
            Error::new(ErrorKind::InvalidLink)
                .with_message(format!(
                    "cannot link inbox {:?} to outbox {:?}",
                    source.name(),
                    sink.name()
                ))
                .with_box(source.name())
        })?;
        source.attach(sink)?;

        let id = LinkageId::next();
        debug!(
            linkage = %id,
            owner = ?self.owner,
            source_unit = ?source.owner(),
            source_box = %source.name(),
            sink_unit = ?sink.owner(),
            sink_box = %sink.name(),
            kind = ?kind,
            "linkage created"
        );
        self.records.insert(
            id,
            Linkage {
                id,
                source: source.clone(),
                sink: sink.clone(),
                kind,
            },
        );
        Ok(id)
    }

    /// Removes a linkage. Returns `true` if this postoffice had registered it.
    pub fn unlink(&mut self, id: LinkageId) -> bool {
        let Some(linkage) = self.records.remove(&id) else {
            return false;
        };
        Self::sever(&linkage);
        true
    }

    /// Removes the linkage between two specific boxes, if registered here.
    pub fn unlink_boxes(&mut self, source: &Postbox, sink: &Postbox) -> bool {
        let found = self
            .records
            .values()
            .find(|l| &l.source == source && &l.sink == sink)
            .map(Linkage::id);
        found.is_some_and(|id| self.unlink(id))
    }

    /// Removes every linkage with `unit` on either end.
    pub fn unlink_unit(&mut self, unit: UnitId) -> Vec<LinkageId> {
        let ids: Vec<LinkageId> = self
            .records
            .values()
            .filter(|l| l.touches(unit))
            .map(Linkage::id)
            .collect();
        for id in &ids {
            self.unlink(*id);
        }
        ids
    }

    /// Removes every linkage with `postbox` on either end.
    pub fn unlink_box(&mut self, postbox: &Postbox) -> Vec<LinkageId> {
        let ids: Vec<LinkageId> = self
            .records
            .values()
            .filter(|l| &l.source == postbox || &l.sink == postbox)
            .map(Linkage::id)
            .collect();
        for id in &ids {
            self.unlink(*id);
        }
        ids
    }

    /// Removes every linkage registered here. Returns how many were removed.
    pub fn unlink_all(&mut self) -> usize {
        let records = std::mem::take(&mut self.records);
        for linkage in records.values() {
            Self::sever(linkage);
        }
        records.len()
    }

    /// Returns `true` if the linkage is registered here.
    #[must_use]
    pub fn is_registered(&self, id: LinkageId) -> bool {
        self.records.contains_key(&id)
    }

    /// Looks up a registered linkage.
    #[must_use]
    pub fn get(&self, id: LinkageId) -> Option<&Linkage> {
        self.records.get(&id)
    }

    /// Registered linkages in creation order.
    pub fn linkages(&self) -> impl Iterator<Item = &Linkage> {
        self.records.values()
    }

    /// Number of registered linkages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no linkages are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn sever(linkage: &Linkage) {
        if linkage.source.detach().is_some() {
            debug!(
                linkage = %linkage.id,
                source_box = %linkage.source.name(),
                sink_box = %linkage.sink.name(),
                "linkage removed"
            );
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::{Capacity, INBOX, OUTBOX};
    use crate::message::Message;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    fn boxes_of(unit: UnitId) -> (Postbox, Postbox) {
        (
            Postbox::new(INBOX, Some(unit), Direction::Inbox, Capacity::Unbounded, None),
            Postbox::new(OUTBOX, Some(unit), Direction::Outbox, Capacity::Unbounded, None),
        )
    }

    // ── link / unlink ──────────────────────────────────────────────────

    #[test]
    fn link_registers_and_delivers() {
        init_test("link_registers_and_delivers");
        let (_, a_out) = boxes_of(UnitId::next());
        let (b_in, _) = boxes_of(UnitId::next());
        let mut po = Postoffice::new();

        let id = po.link(&a_out, &b_in).expect("link");
        assert!(po.is_registered(id));
        assert_eq!(po.get(id).map(Linkage::kind), Some(LinkKind::Normal));

        a_out.send(Message::new(5_u8)).expect("send");
        assert_eq!(b_in.len(), 1);
        crate::test_complete!("link_registers_and_delivers");
    }

    #[test]
    fn unlink_stops_delivery_but_keeps_delivered() {
        init_test("unlink_stops_delivery_but_keeps_delivered");
        let (_, a_out) = boxes_of(UnitId::next());
        let (b_in, _) = boxes_of(UnitId::next());
        let mut po = Postoffice::new();
        let id = po.link(&a_out, &b_in).expect("link");
        a_out.send(Message::new(1_u8)).expect("send");

        assert!(po.unlink(id));
        assert!(!po.unlink(id));
        assert!(!po.is_registered(id));
        a_out.send(Message::new(2_u8)).expect("send");
        assert_eq!(b_in.len(), 1);
        crate::test_complete!("unlink_stops_delivery_but_keeps_delivered");
    }

    #[test]
    fn passthrough_kinds_are_detected() {
        init_test("passthrough_kinds_are_detected");
        let (p_in, p_out) = boxes_of(UnitId::next());
        let (c_in, c_out) = boxes_of(UnitId::next());
        let mut po = Postoffice::new();

        let down = po.link(&p_in, &c_in).expect("inbox passthrough");
        let up = po.link(&c_out, &p_out).expect("outbox passthrough");
        assert_eq!(po.get(down).map(Linkage::kind), Some(LinkKind::InboxPassthrough));
        assert_eq!(po.get(up).map(Linkage::kind), Some(LinkKind::OutboxPassthrough));

        let err = po.link(&c_in, &p_out).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidLink);
        crate::test_complete!("passthrough_kinds_are_detected");
    }

    #[test]
    fn duplicate_source_is_rejected_until_unlinked() {
        init_test("duplicate_source_is_rejected_until_unlinked");
        let (_, a_out) = boxes_of(UnitId::next());
        let (b_in, _) = boxes_of(UnitId::next());
        let mut po = Postoffice::new();

        let id = po.link(&a_out, &b_in).expect("link");
        let err = po.link(&a_out, &b_in).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BoxAlreadyLinked);
        assert_eq!(po.len(), 1);

        po.unlink(id);
        po.link(&a_out, &b_in).expect("relink after unlink");
        crate::test_complete!("duplicate_source_is_rejected_until_unlinked");
    }

    #[test]
    fn unlink_unit_removes_both_directions() {
        init_test("unlink_unit_removes_both_directions");
        let a = UnitId::next();
        let b = UnitId::next();
        let c = UnitId::next();
        let (a_in, a_out) = boxes_of(a);
        let (b_in, b_out) = boxes_of(b);
        let (c_in, _) = boxes_of(c);
        let mut po = Postoffice::for_unit(a);

        po.link(&a_out, &b_in).expect("a -> b");
        po.link(&b_out, &c_in).expect("b -> c");
        let keep = po.link(&c_in, &a_in);
        assert!(keep.is_ok());

        let removed = po.unlink_unit(b);
        assert_eq!(removed.len(), 2);
        assert_eq!(po.len(), 1);
        assert!(!a_out.is_linked());
        assert!(!b_out.is_linked());
        crate::test_complete!("unlink_unit_removes_both_directions");
    }

    #[test]
    fn unlink_boxes_matches_exact_pair() {
        init_test("unlink_boxes_matches_exact_pair");
        let (_, a_out) = boxes_of(UnitId::next());
        let (b_in, _) = boxes_of(UnitId::next());
        let (c_in, _) = boxes_of(UnitId::next());
        let mut po = Postoffice::new();
        po.link(&a_out, &b_in).expect("link");

        assert!(!po.unlink_boxes(&a_out, &c_in));
        assert!(po.unlink_boxes(&a_out, &b_in));
        assert!(po.is_empty());
        crate::test_complete!("unlink_boxes_matches_exact_pair");
    }

    #[test]
    fn unlink_all_clears_everything() {
        init_test("unlink_all_clears_everything");
        let (a_in, a_out) = boxes_of(UnitId::next());
        let (b_in, b_out) = boxes_of(UnitId::next());
        let mut po = Postoffice::new();
        po.link(&a_out, &b_in).expect("a -> b");
        po.link(&b_out, &a_in).expect("b -> a");

        assert_eq!(po.unlink_all(), 2);
        assert!(po.is_empty());
        assert!(!a_out.is_linked());
        assert!(!b_out.is_linked());
        crate::test_complete!("unlink_all_clears_everything");
    }

    #[test]
    fn linkages_iterate_in_creation_order() {
        init_test("linkages_iterate_in_creation_order");
        let (_, a_out) = boxes_of(UnitId::next());
        let (_, b_out) = boxes_of(UnitId::next());
        let (c_in, _) = boxes_of(UnitId::next());
        let (d_in, _) = boxes_of(UnitId::next());
        let mut po = Postoffice::new();
        let first = po.link(&a_out, &c_in).expect("first");
        let second = po.link(&b_out, &d_in).expect("second");

        let order: Vec<LinkageId> = po.linkages().map(Linkage::id).collect();
        assert_eq!(order, vec![first, second]);
        crate::test_complete!("linkages_iterate_in_creation_order");
    }
}
