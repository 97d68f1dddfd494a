//! The writer thread.
//!
//! [`WriterHandle`] moves an [`Engine`] onto a dedicated OS thread and feeds
//! it jobs over a bounded channel. Jobs run strictly one at a time; each
//! caller awaits its own reply.

use crate::config::DatabaseConfig;
use crate::content::{AppliedPackage, ContentUpdatePackage, Notification};
use crate::engine::Engine;
use crate::error::{Result, TagVaultError};
use crate::files::FileInfo;
use crate::integrity::IntegrityReport;
use crate::master::FileHash;
use crate::services::{Service, ServiceKey, ServiceType};
use std::thread::JoinHandle;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

type Job = Box<dyn FnOnce(&mut Engine) + Send>;

/// Async handle to the single writer. Cloning shares the same writer.
#[derive(Clone)]
pub struct WriterHandle {
    jobs: mpsc::Sender<Job>,
    notifier: broadcast::Sender<Notification>,
}

/// Owns the writer thread; dropping every handle and then joining lets the
/// thread drain its queue and exit.
pub struct WriterThread {
    thread: JoinHandle<()>,
}

impl WriterThread {
    /// Wait for the writer to finish the jobs already queued.
    pub fn join(self) -> Result<()> {
        self.thread
            .join()
            .map_err(|_| TagVaultError::Other("writer thread panicked".to_string()))
    }
}

impl WriterHandle {
    /// Start the writer thread for `engine`.
    pub fn spawn(engine: Engine) -> Result<(Self, WriterThread)> {
        let (jobs, mut receiver) = mpsc::channel::<Job>(DatabaseConfig::WRITER_QUEUE_DEPTH);
        let notifier = engine.notifier();

        let thread = std::thread::Builder::new()
            .name("tagvault-writer".to_string())
            .spawn(move || {
                let mut engine = engine;
                info!("Writer thread started");
                while let Some(job) = receiver.blocking_recv() {
                    job(&mut engine);
                }
                info!("Writer thread stopped");
            })?;

        Ok((Self { jobs, notifier }, WriterThread { thread }))
    }

    /// Receive notifications emitted after each commit.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifier.subscribe()
    }

    /// Run `f` on the writer thread and wait for its result.
    pub async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Engine) -> Result<T> + Send + 'static,
    {
        let (reply, response) = oneshot::channel();
        let job: Job = Box::new(move |engine| {
            // the caller may have gone away
            let _ = reply.send(f(engine));
        });
        self.jobs
            .send(job)
            .await
            .map_err(|_| TagVaultError::WriterClosed)?;
        response.await.map_err(|_| TagVaultError::WriterClosed)?
    }

    pub async fn apply(&self, package: ContentUpdatePackage) -> Result<AppliedPackage> {
        debug!("Queueing content update package of {} items", package.len());
        self.call(move |engine| engine.apply_content_update_package(&package))
            .await
    }

    pub async fn add_files(
        &self,
        service_key: ServiceKey,
        files: Vec<FileInfo>,
        timestamp: Option<i64>,
    ) -> Result<Vec<FileHash>> {
        self.call(move |engine| engine.add_files(&service_key, &files, timestamp))
            .await
    }

    pub async fn delete_files(
        &self,
        service_key: ServiceKey,
        hashes: Vec<FileHash>,
        reason: Option<String>,
    ) -> Result<Vec<FileHash>> {
        self.call(move |engine| engine.delete_files(&service_key, &hashes, reason.as_deref()))
            .await
    }

    pub async fn undelete_files(&self, service_key: ServiceKey, hashes: Vec<FileHash>) -> Result<Vec<FileHash>> {
        self.call(move |engine| engine.undelete_files(&service_key, &hashes))
            .await
    }

    pub async fn resync_combined_deleted_files(&self, hashes: Option<Vec<FileHash>>) -> Result<(usize, usize)> {
        self.call(move |engine| engine.resync_combined_deleted_files(hashes.as_deref()))
            .await
    }

    pub async fn create_service(
        &self,
        key: ServiceKey,
        service_type: ServiceType,
        name: String,
    ) -> Result<Service> {
        self.call(move |engine| engine.create_service(&key, service_type, &name))
            .await
    }

    pub async fn delete_service(&self, key: ServiceKey) -> Result<()> {
        self.call(move |engine| engine.delete_service(&key)).await
    }

    pub async fn check_integrity(&self) -> Result<IntegrityReport> {
        self.call(|engine| engine.check_integrity()).await
    }
}
