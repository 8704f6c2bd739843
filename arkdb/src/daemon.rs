//! The background fsync daemon used by `DurabilityLevel::Async`.
//!
//! A commit under `Async` durability flips the header and returns to the
//! caller before the data is known to survive a crash; the daemon's job is
//! to catch up the disk in the background, in commit order, and to let a
//! caller that cares (`Database::sync`) block until a specific version has
//! actually hit disk.

use std::sync::mpsc;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::storage::StorageInner;
use crate::Error;

enum Msg {
    Commit(u64),
    Shutdown,
}

struct Durable {
    version: u64,
}

/// Owns the background thread that fsyncs committed versions in order for
/// async-durability databases.
pub(crate) struct CommitDaemon {
    tx: mpsc::Sender<Msg>,
    handle: Option<JoinHandle<()>>,
    durable: Arc<(Mutex<Durable>, Condvar)>,
}

impl CommitDaemon {
    pub fn spawn(storage: Arc<Mutex<StorageInner>>) -> Self {
        let (tx, rx) = mpsc::channel::<Msg>();
        let durable = Arc::new((Mutex::new(Durable { version: 0 }), Condvar::new()));
        let durable_thread = Arc::clone(&durable);
        let handle = std::thread::Builder::new()
            .name("arkdb-commit-daemon".into())
            .spawn(move || {
                for msg in rx {
                    match msg {
                        Msg::Commit(version) => {
                            let flushed = storage.lock().expect("storage mutex poisoned").flush();
                            if flushed.is_ok() {
                                let (lock, cvar) = &*durable_thread;
                                let mut d = lock.lock().expect("durable mutex poisoned");
                                if version > d.version {
                                    d.version = version;
                                }
                                cvar.notify_all();
                            } else {
                                tracing::error!("background fsync failed for version {version}");
                            }
                        }
                        Msg::Shutdown => break,
                    }
                }
            })
            .expect("failed to spawn commit daemon thread");
        Self { tx, handle: Some(handle), durable }
    }

    /// Enqueue `version` to be fsynced. Never blocks.
    pub fn enqueue(&self, version: u64) {
        let _ = self.tx.send(Msg::Commit(version));
    }

    /// Block the calling thread until `version` has been fsynced by the
    /// daemon.
    pub fn wait_for(&self, version: u64) -> Result<(), Error> {
        let (lock, cvar) = &*self.durable;
        let mut d = lock.lock().expect("durable mutex poisoned");
        while d.version < version {
            d = cvar.wait(d).expect("durable mutex poisoned");
        }
        Ok(())
    }
}

impl Drop for CommitDaemon {
    fn drop(&mut self) {
        let _ = self.tx.send(Msg::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
