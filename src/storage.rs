//! Object-storage clients cached once per thread.
//!
//! Each [`ThreadLocalClient`] builds its value lazily on first use in a thread and
//! hands out the same `Rc` to every later caller on that thread. Handles never cross
//! threads. A slot lives only as long as its owning [`ThreadLocalClient`]: dropping
//! the owner frees the slot on the dropping thread, and other threads discard theirs
//! on their next access to any client.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to build storage client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("Invalid storage configuration: {0}")]
    Config(String),
}

static NEXT_CLIENT_KEY: AtomicU64 = AtomicU64::new(0);

struct Slot {
    owner: Weak<()>,
    client: Rc<dyn Any>,
}

thread_local! {
    static CLIENTS: RefCell<HashMap<u64, Slot>> = RefCell::new(HashMap::new());
}

/// Removes the slots whose owner is gone. The caller drops the returned slots once
/// the map is no longer borrowed.
fn take_dead_slots(clients: &mut HashMap<u64, Slot>) -> Vec<Slot> {
    let dead: Vec<u64> = clients
        .iter()
        .filter(|(_, slot)| slot.owner.strong_count() == 0)
        .map(|(key, _)| *key)
        .collect();
    dead.iter().filter_map(|key| clients.remove(key)).collect()
}

#[cfg(test)]
fn cached_client_count() -> usize {
    CLIENTS.with(|clients| clients.borrow().len())
}

type Factory<T, E> = Box<dyn Fn() -> Result<T, E> + Send + Sync>;

pub struct ThreadLocalClient<T: 'static, E = StorageError> {
    key: u64,
    factory: Factory<T, E>,
    alive: Arc<()>,
}

impl<T: 'static, E> ThreadLocalClient<T, E> {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Result<T, E> + Send + Sync + 'static,
    {
        Self {
            key: NEXT_CLIENT_KEY.fetch_add(1, Ordering::Relaxed),
            factory: Box::new(factory),
            alive: Arc::new(()),
        }
    }

    /// The client for the current thread, built on first call. A failed build is not
    /// cached; the error is returned as produced by the factory.
    pub fn get(&self) -> Result<Rc<T>, E> {
        let (cached, dead) = CLIENTS.with(|clients| {
            let mut clients = clients.borrow_mut();
            let dead = take_dead_slots(&mut clients);
            let cached = clients.get(&self.key).map(|slot| slot.client.clone());
            (cached, dead)
        });
        if !dead.is_empty() {
            debug!("Released {} orphaned thread-local clients", dead.len());
        }
        drop(dead);
        if let Some(client) = cached.and_then(|any| any.downcast::<T>().ok()) {
            return Ok(client);
        }

        // The factory runs outside the borrow so it may use other thread-local clients.
        let client = Rc::new((self.factory)()?);
        debug!("Built thread-local client {} on {:?}", self.key, std::thread::current().id());
        let replaced = CLIENTS.with(|clients| {
            clients.borrow_mut().insert(
                self.key,
                Slot {
                    owner: Arc::downgrade(&self.alive),
                    client: client.clone() as Rc<dyn Any>,
                },
            )
        });
        drop(replaced);
        Ok(client)
    }
}

impl<T: 'static, E> Drop for ThreadLocalClient<T, E> {
    fn drop(&mut self) {
        // Only this thread's slot is reachable here. The map may already be gone
        // during thread teardown, or borrowed if a cached value owns a client.
        let removed = CLIENTS
            .try_with(|clients| {
                clients
                    .try_borrow_mut()
                    .ok()
                    .and_then(|mut clients| clients.remove(&self.key))
            })
            .ok()
            .flatten();
        drop(removed);
    }
}

pub(crate) fn build_http_client(timeout: Duration) -> Result<reqwest::blocking::Client, StorageError> {
    Ok(reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()?)
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// S3-compatible bucket reached over HTTP.
pub struct S3Storage {
    endpoint: String,
    bucket: String,
    connection: ThreadLocalClient<reqwest::blocking::Client>,
}

impl S3Storage {
    pub fn new(endpoint: &str, bucket: &str) -> Result<Self, StorageError> {
        if bucket.is_empty() {
            return Err(StorageError::Config("S3 bucket name is empty".to_string()));
        }
        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket: bucket.to_string(),
            connection: ThreadLocalClient::new(|| build_http_client(DEFAULT_TIMEOUT)),
        })
    }

    pub fn connection(&self) -> Result<Rc<reqwest::blocking::Client>, StorageError> {
        self.connection.get()
    }

    pub fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint,
            self.bucket,
            key.trim_start_matches('/')
        )
    }
}

const GCS_ENDPOINT: &str = "https://storage.googleapis.com";

/// Google Cloud Storage bucket reached through its XML API.
pub struct GcsStorage {
    bucket: String,
    client: ThreadLocalClient<reqwest::blocking::Client>,
}

impl GcsStorage {
    pub fn new(bucket: &str) -> Result<Self, StorageError> {
        if bucket.is_empty() {
            return Err(StorageError::Config("GCS bucket name is empty".to_string()));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            client: ThreadLocalClient::new(|| build_http_client(DEFAULT_TIMEOUT)),
        })
    }

    pub fn client(&self) -> Result<Rc<reqwest::blocking::Client>, StorageError> {
        self.client.get()
    }

    pub fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}/{}",
            GCS_ENDPOINT,
            self.bucket,
            key.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    fn counting_client(builds: Arc<AtomicUsize>) -> ThreadLocalClient<usize> {
        ThreadLocalClient::new(move || Ok(builds.fetch_add(1, Ordering::SeqCst)))
    }

    #[test]
    fn test_same_instance_within_thread() {
        let builds = Arc::new(AtomicUsize::new(0));
        let client = counting_client(builds.clone());

        let first = client.get().unwrap();
        let second = client.get().unwrap();

        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_one_instance_per_thread() {
        let builds = Arc::new(AtomicUsize::new(0));
        let client = Arc::new(counting_client(builds.clone()));

        let main_value = *client.get().unwrap();
        let other = client.clone();
        let other_value = std::thread::spawn(move || {
            let first = other.get().unwrap();
            let second = other.get().unwrap();
            assert!(Rc::ptr_eq(&first, &second));
            *first
        })
        .join()
        .unwrap();

        assert_ne!(main_value, other_value);
        assert_eq!(builds.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_distinct_clients_do_not_share_slots() {
        let a: ThreadLocalClient<&'static str> = ThreadLocalClient::new(|| Ok("a"));
        let b: ThreadLocalClient<&'static str> = ThreadLocalClient::new(|| Ok("b"));

        assert_eq!(*a.get().unwrap(), "a");
        assert_eq!(*b.get().unwrap(), "b");
    }

    #[test]
    fn test_construction_error_propagates_unmodified() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let client: ThreadLocalClient<u8, String> = ThreadLocalClient::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("no credentials".to_string())
        });

        assert_eq!(client.get().unwrap_err(), "no credentials");
        assert!(client.get().is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_storage_handles_are_cached() {
        let s3 = S3Storage::new("http://minio.local:9000/", "corpus").unwrap();
        assert!(Rc::ptr_eq(&s3.connection().unwrap(), &s3.connection().unwrap()));
        assert_eq!(
            s3.object_url("/docs/1.pdf"),
            "http://minio.local:9000/corpus/docs/1.pdf"
        );

        let gcs = GcsStorage::new("corpus").unwrap();
        assert!(Rc::ptr_eq(&gcs.client().unwrap(), &gcs.client().unwrap()));
        assert_eq!(
            gcs.object_url("docs/1.pdf"),
            "https://storage.googleapis.com/corpus/docs/1.pdf"
        );
        assert!(matches!(GcsStorage::new(""), Err(StorageError::Config(_))));
    }

    #[test]
    fn test_dropping_owner_releases_client() {
        let baseline = cached_client_count();
        let client: ThreadLocalClient<String> = ThreadLocalClient::new(|| Ok("conn".to_string()));
        let held = client.get().unwrap();
        assert_eq!(Rc::strong_count(&held), 2);
        assert_eq!(cached_client_count(), baseline + 1);

        drop(client);
        assert_eq!(Rc::strong_count(&held), 1);
        assert_eq!(cached_client_count(), baseline);
    }

    #[test]
    fn test_short_lived_clients_do_not_accumulate() {
        let baseline = cached_client_count();
        for i in 0..1000 {
            let client: ThreadLocalClient<usize> = ThreadLocalClient::new(move || Ok(i));
            assert_eq!(*client.get().unwrap(), i);
        }
        assert_eq!(cached_client_count(), baseline);

        let s3 = S3Storage::new("http://minio.local:9000", "corpus").unwrap();
        s3.connection().unwrap();
        assert_eq!(cached_client_count(), baseline + 1);
        drop(s3);
        assert_eq!(cached_client_count(), baseline);
    }

    #[test]
    fn test_other_thread_discards_slot_of_dropped_owner() {
        let client = Arc::new(counting_client(Arc::new(AtomicUsize::new(0))));
        let (used_tx, used_rx) = mpsc::channel();
        let (dropped_tx, dropped_rx) = mpsc::channel::<()>();

        let worker_client = client.clone();
        let worker = std::thread::spawn(move || {
            let held = worker_client.get().unwrap();
            drop(worker_client);
            let before = cached_client_count();
            used_tx.send(()).unwrap();
            dropped_rx.recv().unwrap();

            // Any access on this thread clears the orphaned slot.
            let other: ThreadLocalClient<u8> = ThreadLocalClient::new(|| Ok(7));
            other.get().unwrap();
            let after = cached_client_count();
            (before, after, Rc::strong_count(&held))
        });

        used_rx.recv().unwrap();
        drop(client);
        dropped_tx.send(()).unwrap();

        let (before, after, strong) = worker.join().unwrap();
        assert_eq!(before, 1);
        // Only the new client's slot is left.
        assert_eq!(after, 1);
        assert_eq!(strong, 1);
    }
}
