//! Entity lifecycle events.
//!
//! Events are emitted explicitly by the single write path of each entity type, inside
//! the transaction performing the write. Listeners are registered by hand on an
//! [`EventBus`]; a listener error aborts the surrounding transaction.

use crate::store::UnitOfWork;
use anyhow::Result;
use std::sync::{Arc, RwLock};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityEvent {
    /// An analyzer host row was written. `created` is true only for the insert.
    HostSaved { host_id: i64, created: bool },
    HostDeleted { host_id: i64 },
}

impl std::fmt::Display for EntityEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntityEvent::HostSaved { host_id, created } => {
                write!(f, "HostSaved(id={}, created={})", host_id, created)
            }
            EntityEvent::HostDeleted { host_id } => write!(f, "HostDeleted(id={})", host_id),
        }
    }
}

pub trait EntityListener: Send + Sync {
    fn on_event(&self, event: &EntityEvent, uow: &mut UnitOfWork<'_>) -> Result<()>;
}

#[derive(Default)]
pub struct EventBus {
    listeners: RwLock<Vec<Arc<dyn EntityListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: Arc<dyn EntityListener>) {
        if let Ok(mut listeners) = self.listeners.write() {
            listeners.push(listener);
        }
    }

    /// Deliver `event` to every listener in subscription order, stopping at the first error.
    pub fn emit(&self, event: EntityEvent, uow: &mut UnitOfWork<'_>) -> Result<()> {
        let listeners: Vec<Arc<dyn EntityListener>> = match self.listeners.read() {
            Ok(listeners) => listeners.clone(),
            Err(_) => anyhow::bail!("Event listener list poisoned"),
        };
        debug!("Emitting {} to {} listeners", event, listeners.len());
        for listener in listeners {
            listener.on_event(&event, uow)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<EntityEvent>>,
        fail: bool,
    }

    impl EntityListener for Recorder {
        fn on_event(&self, event: &EntityEvent, _uow: &mut UnitOfWork<'_>) -> Result<()> {
            self.seen.lock().unwrap().push(*event);
            if self.fail {
                anyhow::bail!("listener failed");
            }
            Ok(())
        }
    }

    fn recorder(fail: bool) -> Arc<Recorder> {
        Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            fail,
        })
    }

    #[test]
    fn test_emit_reaches_all_listeners_in_order() {
        let bus = EventBus::new();
        let first = recorder(false);
        let second = recorder(false);
        bus.subscribe(first.clone());
        bus.subscribe(second.clone());

        let mut conn = Connection::open_in_memory().unwrap();
        let mut uow = UnitOfWork::begin(&mut conn).unwrap();
        let event = EntityEvent::HostSaved {
            host_id: 7,
            created: true,
        };
        bus.emit(event, &mut uow).unwrap();

        assert_eq!(*first.seen.lock().unwrap(), vec![event]);
        assert_eq!(*second.seen.lock().unwrap(), vec![event]);
    }

    #[test]
    fn test_emit_stops_at_first_error() {
        let bus = EventBus::new();
        let failing = recorder(true);
        let after = recorder(false);
        bus.subscribe(failing.clone());
        bus.subscribe(after.clone());

        let mut conn = Connection::open_in_memory().unwrap();
        let mut uow = UnitOfWork::begin(&mut conn).unwrap();
        let result = bus.emit(EntityEvent::HostDeleted { host_id: 1 }, &mut uow);

        assert!(result.is_err());
        assert_eq!(failing.seen.lock().unwrap().len(), 1);
        assert!(after.seen.lock().unwrap().is_empty());
    }
}
