//! Job context -- shared state for one run of one job.

use crate::config::Config;
use crate::job::{Job, JobPaths};
use crate::provider::MetadataProvider;
use crate::types::Event;
use crate::writer::AtomicWriter;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

/// Shared context for a single job run, reducing parameter passing between helpers.
pub(crate) struct JobContext {
    pub(crate) job: Job,
    pub(crate) fingerprint: String,
    pub(crate) paths: JobPaths,
    pub(crate) config: Arc<Config>,
    pub(crate) provider: Arc<dyn MetadataProvider>,
    pub(crate) writer: AtomicWriter,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) cancel_token: CancellationToken,
}

impl JobContext {
    pub(crate) fn new(
        job: Job,
        config: Arc<Config>,
        provider: Arc<dyn MetadataProvider>,
        event_tx: broadcast::Sender<Event>,
        cancel_token: CancellationToken,
    ) -> Self {
        let fingerprint = job.fingerprint();
        let paths = job.paths();
        let writer = AtomicWriter::new(paths.downloading.clone(), config.lock.clone());
        Self {
            job,
            fingerprint,
            paths,
            config,
            provider,
            writer,
            event_tx,
            cancel_token,
        }
    }

    /// Send an event; having no subscribers is fine.
    pub(super) fn emit(&self, event: Event) {
        self.event_tx.send(event).ok();
    }
}

/// Running counters shared by the main pass and the retry passes
#[derive(Debug, Default)]
pub(super) struct Progress {
    /// Points in the grid
    pub(super) total_points: usize,
    /// Points with a record, including those found at resume
    pub(super) completed: usize,
    /// Records written during this run
    pub(super) persisted: usize,
}
