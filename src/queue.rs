//! Background conversion queue.
//!
//! Uploads should not wait for rasterisation. [`ConversionQueue::submit`]
//! hands a document id to a worker task and returns a [`ConversionTicket`]
//! at once; the ticket can be awaited for the outcome or simply dropped.
//! At most `workers` documents convert at the same time, and two
//! submissions for the same id serialise on the converter's per-document
//! lock, so the second one finds the work done and skips.
//!
//! [`convert_many`] is the batch form: a stream of outcomes in completion
//! order, for the CLI and for backlog sweeps.

use crate::catalog::DocumentId;
use crate::convert::{ConversionOutcome, Converter};
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, info, warn};

/// A boxed stream of `(id, outcome)` pairs.
pub type OutcomeStream = Pin<Box<dyn Stream<Item = (DocumentId, ConversionOutcome)> + Send>>;

struct QueuedJob {
    id: DocumentId,
    reply: oneshot::Sender<ConversionOutcome>,
}

/// Handle to the outcome of one submitted conversion.
///
/// Resolves to [`ConversionOutcome::Failed`] if the queue shut down before
/// the job ran.
#[derive(Debug)]
pub struct ConversionTicket {
    id: DocumentId,
    rx: oneshot::Receiver<ConversionOutcome>,
}

impl ConversionTicket {
    pub fn id(&self) -> &DocumentId {
        &self.id
    }
}

impl Future for ConversionTicket {
    type Output = ConversionOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|res| {
            res.unwrap_or_else(|_| ConversionOutcome::Failed {
                error: "conversion queue shut down before the job ran".to_string(),
            })
        })
    }
}

/// Bounded-concurrency worker pool in front of a [`Converter`].
pub struct ConversionQueue {
    tx: mpsc::UnboundedSender<QueuedJob>,
    worker: JoinHandle<()>,
}

impl ConversionQueue {
    /// Spawn the worker task. Must be called inside a tokio runtime.
    pub fn start(converter: Arc<Converter>) -> Self {
        let workers = converter.config().workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel::<QueuedJob>();

        info!("Conversion queue started with {} workers", workers);
        let worker = tokio::spawn(async move {
            UnboundedReceiverStream::new(rx)
                .for_each_concurrent(workers, |job| {
                    let converter = Arc::clone(&converter);
                    async move {
                        debug!("Dequeued document {}", job.id);
                        let outcome = converter.convert_document(&job.id).await;
                        // The submitter may have dropped its ticket.
                        let _ = job.reply.send(outcome);
                    }
                })
                .await;
            debug!("Conversion queue drained");
        });

        Self { tx, worker }
    }

    /// Enqueue `id`. Never fails and never waits for the conversion.
    pub fn submit(&self, id: DocumentId) -> ConversionTicket {
        let (reply, rx) = oneshot::channel();
        let job = QueuedJob {
            id: id.clone(),
            reply,
        };
        if self.tx.send(job).is_err() {
            warn!("Conversion queue is closed; document {} not queued", id);
        }
        ConversionTicket { id, rx }
    }

    /// Stop accepting work and wait for every queued job to finish.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            warn!("Conversion queue worker ended abnormally: {}", e);
        }
    }
}

/// Convert several documents with at most `concurrency` in flight.
///
/// Outcomes arrive in completion order.
pub fn convert_many(
    converter: Arc<Converter>,
    ids: Vec<DocumentId>,
    concurrency: usize,
) -> OutcomeStream {
    let s = stream::iter(ids.into_iter().map(move |id| {
        let converter = Arc::clone(&converter);
        async move {
            let outcome = converter.convert_document(&id).await;
            (id, outcome)
        }
    }))
    .buffer_unordered(concurrency.max(1));

    Box::pin(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, Document, MemoryCatalog};
    use crate::config::ConversionConfig;
    use crate::convert::SkipReason;
    use crate::pipeline::render::SyntheticRasterizer;

    fn setup(root: &std::path::Path, docs: &[&str]) -> (Arc<Converter>, Arc<SyntheticRasterizer>) {
        let catalog = Arc::new(MemoryCatalog::new());
        for d in docs {
            let id = DocumentId::new(*d).unwrap();
            let pdf = root.join(format!("{d}.pdf"));
            std::fs::write(&pdf, b"%PDF-1.7").unwrap();
            catalog.insert(Document::new(id, "Doc", pdf)).unwrap();
        }
        let config = ConversionConfig::builder()
            .media_root(root)
            .workers(2)
            .build()
            .unwrap();
        let rasterizer = Arc::new(SyntheticRasterizer::new(2));
        let converter = Converter::with_rasterizer(config, catalog, rasterizer.clone());
        (Arc::new(converter), rasterizer)
    }

    #[tokio::test]
    async fn ticket_resolves_to_outcome() {
        let tmp = tempfile::tempdir().unwrap();
        let (converter, _) = setup(tmp.path(), &["1"]);
        let queue = ConversionQueue::start(converter);

        let ticket = queue.submit(DocumentId::new("1").unwrap());
        assert_eq!(ticket.id().as_str(), "1");
        assert!(ticket.await.is_converted());
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn duplicate_submissions_convert_once() {
        let tmp = tempfile::tempdir().unwrap();
        let (converter, rasterizer) = setup(tmp.path(), &["7"]);
        let queue = ConversionQueue::start(converter);

        let id = DocumentId::new("7").unwrap();
        let a = queue.submit(id.clone());
        let b = queue.submit(id);
        let (a, b) = tokio::join!(a, b);

        let converted = [&a, &b].iter().filter(|o| o.is_converted()).count();
        assert_eq!(converted, 1, "got {a:?} and {b:?}");
        assert!([&a, &b].iter().any(|o| matches!(
            o,
            ConversionOutcome::Skipped(SkipReason::AlreadyConverted { total_pages: 2 })
        )));
        assert_eq!(rasterizer.pages_rendered(), 2);
        queue.shutdown().await;
    }

    #[tokio::test]
    async fn dropped_ticket_still_converts() {
        let tmp = tempfile::tempdir().unwrap();
        let (converter, _) = setup(tmp.path(), &["3"]);
        let catalog = Arc::clone(converter.catalog());
        let queue = ConversionQueue::start(converter);

        drop(queue.submit(DocumentId::new("3").unwrap()));
        queue.shutdown().await;

        let doc = catalog.get(&DocumentId::new("3").unwrap()).unwrap().unwrap();
        assert_eq!(doc.total_pages, 2);
    }

    #[tokio::test]
    async fn convert_many_yields_every_id() {
        let tmp = tempfile::tempdir().unwrap();
        let (converter, _) = setup(tmp.path(), &["1", "2", "3"]);
        let ids: Vec<_> = ["1", "2", "3"]
            .iter()
            .map(|s| DocumentId::new(*s).unwrap())
            .collect();

        let mut results: Vec<_> = convert_many(converter, ids, 2).collect().await;
        results.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|(_, o)| o.is_converted()));
    }
}
