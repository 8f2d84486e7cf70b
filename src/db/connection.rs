use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

const BUSY_TIMEOUT_MS: i64 = 5_000;

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum WorkerMessage {
    Run(Job),
    Stop,
}

/// Owned by every clone through an `Arc`; dropping the last one stops the worker.
struct Worker {
    jobs: mpsc::Sender<WorkerMessage>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };

        // Stop is queued behind pending jobs, so queued writes still commit.
        if self.jobs.send(WorkerMessage::Stop).is_err() {
            error!("Store worker already gone at shutdown");
        }
        if let Err(err) = handle.join() {
            error!("Store worker panicked: {err:?}");
        }
    }
}

/// Handle to the persisted store.
///
/// A single worker thread owns the SQLite connection. Every operation is a
/// closure executed on that thread with its own short transaction scope, so
/// the poller, the retention job and ad-hoc statistics queries never hold a
/// lock across an await point. Clones share the same worker.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    path: Arc<PathBuf>,
}

impl Database {
    /// Opens (or creates) the store and brings its schema up to date before
    /// returning.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create store directory {}", dir.display()))?;
        }

        let (jobs_tx, jobs_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();
        let thread_path = path.clone();

        let thread = thread::Builder::new()
            .name("drivelog-store".into())
            .spawn(move || {
                let mut conn = match open_connection(&thread_path) {
                    Ok(conn) => conn,
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }
                serve(&mut conn, jobs_rx);
            })
            .context("cannot spawn store worker thread")?;

        ready_rx
            .recv()
            .context("store worker exited during start-up")??;
        info!("Store ready at {}", path.display());

        Ok(Self {
            worker: Arc::new(Worker {
                jobs: jobs_tx,
                thread: Mutex::new(Some(thread)),
            }),
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `task` on the worker thread and hands back its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: Job = Box::new(move |conn| {
            // The caller may have been cancelled while the job was queued.
            let _ = reply_tx.send(task(conn));
        });

        self.worker
            .jobs
            .send(WorkerMessage::Run(job))
            .map_err(|_| anyhow!("store worker is not running"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("store worker dropped the job"))?
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("cannot open SQLite store {}", path.display()))?;

    for (pragma, value) in [("journal_mode", "WAL"), ("foreign_keys", "ON")] {
        if let Err(err) = conn.pragma_update(None, pragma, value) {
            error!("PRAGMA {pragma} = {value} failed: {err}");
        }
    }
    if let Err(err) = conn.pragma_update(None, "busy_timeout", BUSY_TIMEOUT_MS) {
        error!("PRAGMA busy_timeout failed: {err}");
    }

    run_migrations(&mut conn).context("schema migration failed")?;
    Ok(conn)
}

fn serve(conn: &mut Connection, jobs: mpsc::Receiver<WorkerMessage>) {
    while let Ok(message) = jobs.recv() {
        match message {
            WorkerMessage::Run(job) => job(conn),
            WorkerMessage::Stop => break,
        }
    }
    info!("Store worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clones_share_one_worker() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("nested/store.sqlite3")).unwrap();
        let other = db.clone();

        db.execute(|conn| {
            conn.execute_batch("CREATE TABLE scratch (n INTEGER)")?;
            Ok(())
        })
        .await
        .unwrap();
        let tables: i64 = other
            .execute(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE name = 'scratch'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();

        assert_eq!(tables, 1);
        assert!(db.path().ends_with("nested/store.sqlite3"));
    }

    #[tokio::test]
    async fn queued_writes_commit_before_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.sqlite3");
        {
            let db = Database::new(path.clone()).unwrap();
            db.execute(|conn| {
                conn.execute_batch("CREATE TABLE scratch (n INTEGER); INSERT INTO scratch VALUES (7);")?;
                Ok(())
            })
            .await
            .unwrap();
        }

        let reopened = Database::new(path).unwrap();
        let n: i64 = reopened
            .execute(|conn| Ok(conn.query_row("SELECT n FROM scratch", [], |row| row.get(0))?))
            .await
            .unwrap();
        assert_eq!(n, 7);
    }
}
