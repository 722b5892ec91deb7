//! Phase-2 enrichment: a deeper processing pass that runs after import
//! completes, off the request path. Jobs flow through an in-process
//! queue drained by one background worker; a lost or failed job only
//! delays enrichment, never import.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;

use decant_common::types::{ExtractOptions, NodePatch};
use decant_common::{DecantError, JobId, NodeId};

use crate::extract::ExtractorFactory;
use crate::similarity::SimilarityEngine;
use crate::store::Store;

#[derive(Clone, Copy, Debug)]
pub struct Phase2Job {
    pub id: JobId,
    pub node_id: NodeId,
}

/// Handle for enqueueing Phase-2 jobs.
#[derive(Clone)]
pub struct EnrichmentQueue {
    tx: mpsc::UnboundedSender<Phase2Job>,
}

impl EnrichmentQueue {
    /// Spawn the worker task and return the enqueue handle.
    pub fn start(
        store: Arc<Store>,
        factory: Arc<ExtractorFactory>,
        similarity: Arc<SimilarityEngine>,
        extract_opts: ExtractOptions,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Phase2Job>();

        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let start = std::time::Instant::now();
                match process_job(&store, &factory, &similarity, &extract_opts, job).await {
                    Ok(()) => {
                        metrics::counter!("enrich.jobs", "outcome" => "ok").increment(1);
                        metrics::histogram!("enrich.job_latency")
                            .record(start.elapsed().as_secs_f64());
                        tracing::info!(job_id = %job.id, node_id = %job.node_id, "Enrichment complete");
                    }
                    Err(e) => {
                        metrics::counter!("enrich.jobs", "outcome" => "error").increment(1);
                        tracing::error!(
                            job_id = %job.id,
                            node_id = %job.node_id,
                            error = %e,
                            "Enrichment job failed"
                        );
                    }
                }
            }
        });

        Self { tx }
    }

    /// Post a job. Returns None when the worker is gone.
    pub fn enqueue(&self, node_id: NodeId) -> Option<JobId> {
        let job = Phase2Job {
            id: JobId::new(),
            node_id,
        };
        match self.tx.send(job) {
            Ok(()) => {
                metrics::counter!("enrich.enqueued").increment(1);
                Some(job.id)
            }
            Err(_) => {
                tracing::warn!(node_id = %node_id, "Enrichment worker unavailable");
                None
            }
        }
    }
}

async fn process_job(
    store: &Store,
    factory: &ExtractorFactory,
    similarity: &SimilarityEngine,
    extract_opts: &ExtractOptions,
    job: Phase2Job,
) -> Result<(), DecantError> {
    let node = store.get_node(job.node_id).await?;

    let extraction = factory.extract(&node.url, extract_opts).await?;

    let summary = match extraction.data.get("summary") {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        _ => node.ai_summary.clone(),
    };
    let key_concepts = extraction
        .data
        .get("keyConcepts")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect::<Vec<_>>()
        })
        .filter(|concepts| !concepts.is_empty());

    let patch = NodePatch {
        ai_summary: summary,
        key_concepts,
        extracted_fields: Some(Value::Object(extraction.data.clone())),
        phase2_completed: Some(true),
        ..NodePatch::default()
    };
    store.update_node(job.node_id, &patch).await?;

    // Metadata may have shifted; refresh this node's edges.
    similarity.update_for_node(job.node_id).await?;

    Ok(())
}
