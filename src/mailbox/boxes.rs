//! Per-component box registry.
//!
//! A component declares its boxes up front with a [`BoxSpec`], which is
//! validated when the component is built. Lookups by name after that go
//! through [`Boxes`], which reports unknown names as errors instead of
//! silently creating boxes.

use tracing::debug;

use super::postbox::{Capacity, Direction, Postbox};
use crate::error::{Error, ErrorKind, Result};
use crate::runtime::SchedulerHandle;
use crate::types::UnitId;

/// Default data input.
pub const INBOX: &str = "inbox";
/// Default lifecycle input.
pub const CONTROL: &str = "control";
/// Default data output.
pub const OUTBOX: &str = "outbox";
/// Default lifecycle output.
pub const SIGNAL: &str = "signal";

/// Declaration of a component's boxes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxSpec {
    inboxes: Vec<(String, Capacity)>,
    outboxes: Vec<String>,
}

impl BoxSpec {
    /// `inbox`, `control` in; `outbox`, `signal` out. All unbounded.
    #[must_use]
    pub fn standard() -> Self {
        Self::empty()
            .inbox(INBOX)
            .inbox(CONTROL)
            .outbox(OUTBOX)
            .outbox(SIGNAL)
    }

    /// No boxes at all.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            inboxes: Vec::new(),
            outboxes: Vec::new(),
        }
    }

    /// Declares an unbounded inbox.
    #[must_use]
    pub fn inbox(self, name: impl Into<String>) -> Self {
        self.inbox_with_capacity(name, Capacity::Unbounded)
    }

    /// Declares an inbox with the given capacity.
    #[must_use]
    pub fn inbox_with_capacity(mut self, name: impl Into<String>, capacity: Capacity) -> Self {
        self.inboxes.push((name.into(), capacity));
        self
    }

    /// Declares an outbox.
    #[must_use]
    pub fn outbox(mut self, name: impl Into<String>) -> Self {
        self.outboxes.push(name.into());
        self
    }

    /// Sets the capacity of an already declared inbox.
    #[must_use]
    pub fn capacity(mut self, name: &str, capacity: Capacity) -> Self {
        for (inbox, cap) in &mut self.inboxes {
            if inbox == name {
                *cap = capacity;
            }
        }
        self
    }

    /// Declared inbox names in order.
    pub fn inbox_names(&self) -> impl Iterator<Item = &str> {
        self.inboxes.iter().map(|(name, _)| name.as_str())
    }

    /// Declared outbox names in order.
    pub fn outbox_names(&self) -> impl Iterator<Item = &str> {
        self.outboxes.iter().map(String::as_str)
    }

    /// Rejects empty or duplicate names.
    pub fn validate(&self) -> Result<()> {
        check_names("inbox", self.inbox_names())?;
        check_names("outbox", self.outbox_names())
    }
}

impl Default for BoxSpec {
    fn default() -> Self {
        Self::standard()
    }
}

fn check_names<'a>(side: &str, names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen: Vec<&str> = Vec::new();
    for name in names {
        if name.is_empty() {
            return Err(Error::invalid_config(format!("empty {side} name")));
        }
        if seen.contains(&name) {
            return Err(Error::new(ErrorKind::DuplicateBox)
                .with_message(format!("{side} {name:?} declared twice"))
                .with_box(name));
        }
        seen.push(name);
    }
    Ok(())
}

/// The live boxes of one component.
#[derive(Debug)]
pub struct Boxes {
    owner: UnitId,
    notifier: Option<SchedulerHandle>,
    inboxes: Vec<Postbox>,
    outboxes: Vec<Postbox>,
}

impl Boxes {
    /// Builds the boxes declared by `spec`, owned by `owner`.
    pub fn from_spec(
        owner: UnitId,
        spec: &BoxSpec,
        notifier: Option<SchedulerHandle>,
    ) -> Result<Self> {
        spec.validate()?;
        let inboxes = spec
            .inboxes
            .iter()
            .map(|(name, cap)| {
                Postbox::new(
                    name.clone(),
                    Some(owner),
                    Direction::Inbox,
                    *cap,
                    notifier.clone(),
                )
            })
            .collect();
        let outboxes = spec
            .outboxes
            .iter()
            .map(|name| {
                Postbox::new(
                    name.clone(),
                    Some(owner),
                    Direction::Outbox,
                    Capacity::Unbounded,
                    notifier.clone(),
                )
            })
            .collect();
        Ok(Self {
            owner,
            notifier,
            inboxes,
            outboxes,
        })
    }

    /// Unit that owns these boxes.
    #[must_use]
    pub fn owner(&self) -> UnitId {
        self.owner
    }

    /// Looks up an inbox by name.
    #[must_use]
    pub fn inbox(&self, name: &str) -> Option<&Postbox> {
        self.inboxes.iter().find(|b| b.name() == name)
    }

    /// Looks up an outbox by name.
    #[must_use]
    pub fn outbox(&self, name: &str) -> Option<&Postbox> {
        self.outboxes.iter().find(|b| b.name() == name)
    }

    /// Looks up an inbox, failing with [`ErrorKind::UnknownBox`].
    pub fn require_inbox(&self, name: &str) -> Result<&Postbox> {
        self.inbox(name)
            .ok_or_else(|| Error::unknown_box(name).with_unit(self.owner))
    }

    /// Looks up an outbox, failing with [`ErrorKind::UnknownBox`].
    pub fn require_outbox(&self, name: &str) -> Result<&Postbox> {
        self.outbox(name)
            .ok_or_else(|| Error::unknown_box(name).with_unit(self.owner))
    }

    /// All inboxes in declaration order.
    #[must_use]
    pub fn inboxes(&self) -> &[Postbox] {
        &self.inboxes
    }

    /// All outboxes in declaration order.
    #[must_use]
    pub fn outboxes(&self) -> &[Postbox] {
        &self.outboxes
    }

    /// Returns true if any inbox holds a message.
    #[must_use]
    pub fn any_ready(&self) -> bool {
        self.inboxes.iter().any(Postbox::data_ready)
    }

    /// Adds an inbox named after `base`, made unique. Returns the chosen name.
    pub fn add_inbox(&mut self, base: &str, capacity: Capacity) -> String {
        let name = unique_name(base, &self.inboxes);
        debug!(unit = %self.owner, box_name = %name, "adding inbox");
        self.inboxes.push(Postbox::new(
            name.clone(),
            Some(self.owner),
            Direction::Inbox,
            capacity,
            self.notifier.clone(),
        ));
        name
    }

    /// Adds an outbox named after `base`, made unique. Returns the chosen name.
    pub fn add_outbox(&mut self, base: &str) -> String {
        let name = unique_name(base, &self.outboxes);
        debug!(unit = %self.owner, box_name = %name, "adding outbox");
        self.outboxes.push(Postbox::new(
            name.clone(),
            Some(self.owner),
            Direction::Outbox,
            Capacity::Unbounded,
            self.notifier.clone(),
        ));
        name
    }

    /// Removes an inbox. Linkages touching it must be removed by the caller.
    pub fn delete_inbox(&mut self, name: &str) -> Result<Postbox> {
        remove_named(&mut self.inboxes, name).ok_or_else(|| Error::unknown_box(name))
    }

    /// Removes an outbox. Linkages touching it must be removed by the caller.
    pub fn delete_outbox(&mut self, name: &str) -> Result<Postbox> {
        remove_named(&mut self.outboxes, name).ok_or_else(|| Error::unknown_box(name))
    }
}

fn unique_name(base: &str, existing: &[Postbox]) -> String {
    let taken = |candidate: &str| existing.iter().any(|b| b.name() == candidate);
    if !taken(base) {
        return base.to_string();
    }
    (1_u64..)
        .map(|n| format!("{base}{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}

fn remove_named(boxes: &mut Vec<Postbox>, name: &str) -> Option<Postbox> {
    let index = boxes.iter().position(|b| b.name() == name)?;
    Some(boxes.remove(index))
}
