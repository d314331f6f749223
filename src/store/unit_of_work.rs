use anyhow::Result;
use rusqlite::{Connection, Transaction};
use std::ops::Deref;
use tracing::debug;

type CommitHook = Box<dyn FnOnce() + Send + 'static>;

/// A database transaction with a list of actions to run once it has durably committed.
///
/// Hooks are discarded on rollback, including the implicit rollback when the unit of
/// work is dropped without calling [`UnitOfWork::commit`].
pub struct UnitOfWork<'conn> {
    tx: Transaction<'conn>,
    on_commit: Vec<CommitHook>,
}

impl<'conn> UnitOfWork<'conn> {
    pub fn begin(conn: &'conn mut Connection) -> Result<Self> {
        Ok(Self {
            tx: conn.transaction()?,
            on_commit: Vec::new(),
        })
    }

    /// Defer `hook` until after this transaction commits.
    pub fn on_commit<F>(&mut self, hook: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.on_commit.push(Box::new(hook));
    }

    pub fn pending_hooks(&self) -> usize {
        self.on_commit.len()
    }

    /// Commit the transaction. The returned hooks have not run yet; the caller runs
    /// them once it has released any lock guarding the connection.
    pub fn commit(self) -> Result<CommittedHooks> {
        self.tx.commit()?;
        Ok(CommittedHooks(self.on_commit))
    }

    pub fn rollback(self) -> Result<()> {
        if !self.on_commit.is_empty() {
            debug!(
                "Discarding {} post-commit hooks on rollback",
                self.on_commit.len()
            );
        }
        self.tx.rollback()?;
        Ok(())
    }
}

impl Deref for UnitOfWork<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        &self.tx
    }
}

/// Hooks of a committed unit of work, in registration order.
#[must_use = "post-commit hooks do nothing unless run"]
pub struct CommittedHooks(Vec<CommitHook>);

impl CommittedHooks {
    pub fn run(self) {
        for hook in self.0 {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn test_connection() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE items (id INTEGER PRIMARY KEY)", [])
            .unwrap();
        conn
    }

    fn count_items(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM items", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_hooks_run_in_order_after_commit() {
        let mut conn = test_connection();
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));

        let mut uow = UnitOfWork::begin(&mut conn).unwrap();
        uow.execute("INSERT INTO items (id) VALUES (1)", []).unwrap();
        for i in 0..3 {
            let order = Arc::clone(&order);
            uow.on_commit(move || order.lock().unwrap().push(i));
        }
        assert_eq!(uow.pending_hooks(), 3);

        let hooks = uow.commit().unwrap();
        assert!(order.lock().unwrap().is_empty());
        hooks.run();

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
        assert_eq!(count_items(&conn), 1);
    }

    #[test]
    fn test_rollback_discards_hooks() {
        let mut conn = test_connection();
        let calls = Arc::new(AtomicUsize::new(0));

        let mut uow = UnitOfWork::begin(&mut conn).unwrap();
        uow.execute("INSERT INTO items (id) VALUES (1)", []).unwrap();
        let c = Arc::clone(&calls);
        uow.on_commit(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        uow.rollback().unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(count_items(&conn), 0);
    }

    #[test]
    fn test_drop_without_commit_rolls_back() {
        let mut conn = test_connection();
        let calls = Arc::new(AtomicUsize::new(0));

        {
            let mut uow = UnitOfWork::begin(&mut conn).unwrap();
            uow.execute("INSERT INTO items (id) VALUES (1)", []).unwrap();
            let c = Arc::clone(&calls);
            uow.on_commit(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(count_items(&conn), 0);
    }
}
