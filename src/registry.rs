//! Named services and tracked values, scoped to one scheduler.
//!
//! A component that offers a service registers its id together with the
//! inbox clients should link to. Clients look the service up by name and
//! link their own outbox to the returned postbox.
//!
//! Tracked values are a small typed key/value area for sharing state such as
//! configuration between units of the same scheduler. Values are cloned out on
//! retrieval; for concurrent read-modify-write use a [`Store`](crate::stm::Store).

use parking_lot::Mutex;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

use crate::error::{Error, ErrorKind, Result};
use crate::mailbox::Postbox;
use crate::types::UnitId;

/// A registered service: the providing unit and the box clients send to.
#[derive(Debug, Clone)]
pub struct ServiceEntry {
    /// Unit providing the service.
    pub unit: UnitId,
    /// Box that receives requests.
    pub inbox: Postbox,
}

/// Per-scheduler registry of services and tracked values.
#[derive(Default)]
pub struct ServiceRegistry {
    services: Mutex<BTreeMap<String, ServiceEntry>>,
    values: Mutex<BTreeMap<String, Box<dyn Any + Send>>>,
}

impl ServiceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `name` as served by `unit` through `inbox`.
    pub fn register(&self, name: impl Into<String>, unit: UnitId, inbox: Postbox) -> Result<()> {
        let name = name.into();
        let mut services = self.services.lock();
        if services.contains_key(&name) {
            return Err(Error::new(ErrorKind::AlreadyRegistered)
                .with_message(format!("service {name:?} is already registered"))
                .with_unit(unit));
        }
        debug!(service = %name, unit = %unit, "service registered");
        services.insert(name, ServiceEntry { unit, inbox });
        Ok(())
    }

    /// Removes a service.
    pub fn deregister(&self, name: &str) -> Result<ServiceEntry> {
        let entry = self
            .services
            .lock()
            .remove(name)
            .ok_or_else(|| not_registered("service", name))?;
        debug!(service = %name, unit = %entry.unit, "service deregistered");
        Ok(entry)
    }

    /// Looks up a service.
    pub fn retrieve(&self, name: &str) -> Result<ServiceEntry> {
        self.services
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| not_registered("service", name))
    }

    /// Removes every service provided by `unit`. Returns the removed names.
    pub fn deregister_unit(&self, unit: UnitId) -> Vec<String> {
        let mut services = self.services.lock();
        let names: Vec<String> = services
            .iter()
            .filter(|(_, entry)| entry.unit == unit)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &names {
            services.remove(name);
        }
        names
    }

    /// Names of all registered services, sorted.
    #[must_use]
    pub fn services(&self) -> Vec<String> {
        self.services.lock().keys().cloned().collect()
    }

    /// Starts tracking a value under `key`.
    pub fn track_value<T: Any + Send>(&self, key: impl Into<String>, value: T) -> Result<()> {
        let key = key.into();
        let mut values = self.values.lock();
        if values.contains_key(&key) {
            return Err(Error::new(ErrorKind::AlreadyRegistered)
                .with_message(format!("value {key:?} is already tracked")));
        }
        values.insert(key, Box::new(value));
        Ok(())
    }

    /// Replaces a tracked value. The key must already be tracked.
    pub fn update_value<T: Any + Send>(&self, key: &str, value: T) -> Result<()> {
        let mut values = self.values.lock();
        let slot = values
            .get_mut(key)
            .ok_or_else(|| not_registered("value", key))?;
        *slot = Box::new(value);
        Ok(())
    }

    /// Returns a clone of a tracked value.
    ///
    /// Fails with `NotRegistered` if the key is untracked or holds a value of
    /// another type.
    pub fn retrieve_value<T: Any + Send + Clone>(&self, key: &str) -> Result<T> {
        let values = self.values.lock();
        let value = values.get(key).ok_or_else(|| not_registered("value", key))?;
        value.downcast_ref::<T>().cloned().ok_or_else(|| {
            Error::new(ErrorKind::NotRegistered).with_message(format!(
                "value {key:?} is tracked with a different type"
            ))
        })
    }

    /// Stops tracking a value. Returns true if it was tracked.
    pub fn untrack_value(&self, key: &str) -> bool {
        self.values.lock().remove(key).is_some()
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.services.lock().len())
            .field("values", &self.values.lock().len())
            .finish()
    }
}

fn not_registered(what: &str, name: &str) -> Error {
    Error::new(ErrorKind::NotRegistered).with_message(format!("no {what} named {name:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::Capacity;

    fn init_test(name: &str) {
        crate::test_utils::init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn register_retrieve_deregister() {
        init_test("register_retrieve_deregister");
        let registry = ServiceRegistry::new();
        let unit = UnitId::next();
        let inbox = Postbox::detached_inbox("requests", Capacity::Unbounded);
        registry.register("clock", unit, inbox.clone()).expect("register");

        let entry = registry.retrieve("clock").expect("retrieve");
        crate::assert_with_log!(entry.unit == unit, "unit", unit, entry.unit);
        assert_eq!(entry.inbox, inbox);

        let dup = registry.register("clock", UnitId::next(), inbox).unwrap_err();
        assert_eq!(dup.kind(), ErrorKind::AlreadyRegistered);

        registry.deregister("clock").expect("deregister");
        let missing = registry.retrieve("clock").unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::NotRegistered);
        crate::test_complete!("register_retrieve_deregister");
    }

    #[test]
    fn deregister_unit_removes_all_its_services() {
        init_test("deregister_unit_removes_all_its_services");
        let registry = ServiceRegistry::new();
        let a = UnitId::next();
        let b = UnitId::next();
        let inbox = Postbox::detached_inbox("requests", Capacity::Unbounded);
        registry.register("x", a, inbox.clone()).unwrap();
        registry.register("y", a, inbox.clone()).unwrap();
        registry.register("z", b, inbox).unwrap();
        assert_eq!(registry.deregister_unit(a), vec!["x", "y"]);
        assert_eq!(registry.services(), vec!["z"]);
        crate::test_complete!("deregister_unit_removes_all_its_services");
    }

    #[test]
    fn tracked_values() {
        init_test("tracked_values");
        let registry = ServiceRegistry::new();
        registry.track_value("width", 640_u32).unwrap();
        assert_eq!(registry.retrieve_value::<u32>("width").unwrap(), 640);

        let again = registry.track_value("width", 800_u32).unwrap_err();
        assert_eq!(again.kind(), ErrorKind::AlreadyRegistered);

        registry.update_value("width", 800_u32).unwrap();
        assert_eq!(registry.retrieve_value::<u32>("width").unwrap(), 800);

        let untracked = registry.update_value("height", 1_u32).unwrap_err();
        assert_eq!(untracked.kind(), ErrorKind::NotRegistered);

        assert!(registry.retrieve_value::<String>("width").is_err());
        assert!(registry.untrack_value("width"));
        assert!(!registry.untrack_value("width"));
        crate::test_complete!("tracked_values");
    }
}
