pub mod cache;
pub mod validate;

pub use cache::{normalize_url, CachedImport, ImportCache};

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};

use decant_common::types::{
    domain_of, ChangeTrigger, ChangeType, Classification, ExtractOptions, Extraction,
    ExtractionMetadata, ExtractionMethod, HierarchyCodeChange, HierarchyCodes, HierarchyView,
    ImportCheck, ImportOutcome, ImportRequest, MetadataCode, MetadataSpec, MetadataType, Node,
    NodeInput, NodePatch, Phase2Status,
};
use decant_common::{DecantError, NodeId};

use crate::classify::Classifier;
use crate::enrich::EnrichmentQueue;
use crate::extract::ExtractorFactory;
use crate::hierarchy::{AssignedCode, HierarchyAssigner};
use crate::similarity::SimilarityEngine;
use crate::store::Store;

/// End-to-end import pipeline: validate → cache → duplicate → extract →
/// classify → assign codes → persist → similarity → enrichment.
///
/// Steps are sequential within one import; the server runs many imports
/// concurrently.
pub struct ImportPipeline {
    store: Arc<Store>,
    factory: Arc<ExtractorFactory>,
    classifier: Classifier,
    cache: Arc<ImportCache>,
    similarity: Arc<SimilarityEngine>,
    enrichment: Option<EnrichmentQueue>,
    extract_opts: ExtractOptions,
}

impl ImportPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        factory: Arc<ExtractorFactory>,
        classifier: Classifier,
        cache: Arc<ImportCache>,
        similarity: Arc<SimilarityEngine>,
        enrichment: Option<EnrichmentQueue>,
        extract_opts: ExtractOptions,
    ) -> Self {
        Self {
            store,
            factory,
            classifier,
            cache,
            similarity,
            enrichment,
            extract_opts,
        }
    }

    pub fn cache(&self) -> &ImportCache {
        &self.cache
    }

    pub async fn import(&self, request: &ImportRequest) -> Result<ImportOutcome, DecantError> {
        let start = std::time::Instant::now();

        // 1. Validate + SSRF.
        let url = validate::validate_url(request.url.as_deref())?;
        validate::check_ssrf(&url)?;
        let url_str = url.to_string();
        let normalized = normalize_url(&url_str);

        // 2. Cache lookup, unless forced.
        if !request.force_refresh {
            if let Some(hit) = self.cache.get(&normalized) {
                match self.store.get_node(hit.node_id).await {
                    Ok(node) => {
                        metrics::counter!("import.outcomes", "kind" => "cache_hit").increment(1);
                        return Ok(ImportOutcome {
                            node_id: hit.node_id,
                            cached: true,
                            node,
                            classification: hit.classification,
                            hierarchy_codes: hit.hierarchy_codes,
                            metadata: hit.extraction_metadata,
                            phase2: Phase2Status::default(),
                        });
                    }
                    Err(_) => {
                        // The node vanished underneath the cache entry.
                        self.cache.invalidate(&normalized);
                    }
                }
            }
        }

        // 3. Duplicate check.
        if let Some(existing) = self.store.get_node_by_url(&url_str).await? {
            if request.force_refresh {
                return self.refresh_existing(existing, &url_str, &normalized).await;
            }
            metrics::counter!("import.outcomes", "kind" => "duplicate").increment(1);
            let outcome = self.outcome_from_node(existing, true);
            self.remember(&normalized, &outcome);
            return Ok(outcome);
        }

        let outcome = self.import_new(&url_str, &normalized).await?;

        metrics::counter!("import.outcomes", "kind" => "imported").increment(1);
        metrics::histogram!("import.latency").record(start.elapsed().as_secs_f64());
        Ok(outcome)
    }

    /// `GET /api/import/check` support: existence + cache state.
    pub async fn check(&self, raw_url: Option<&str>) -> Result<ImportCheck, DecantError> {
        let url = validate::validate_url(raw_url)?;
        let url_str = url.to_string();
        let normalized = normalize_url(&url_str);

        let cached = self.cache.get(&normalized);
        let existing = self.store.get_node_by_url(&url_str).await?;

        Ok(ImportCheck {
            exists: existing.is_some(),
            cached: cached.is_some(),
            node_id: existing
                .as_ref()
                .map(|n| n.id)
                .or(cached.as_ref().map(|c| c.node_id)),
            classification: cached.as_ref().map(|c| c.classification.clone()).or_else(|| {
                existing.as_ref().map(|n| classification_of(n))
            }),
            cached_at: cached.map(|c| c.cached_at),
        })
    }

    // -----------------------------------------------------------------
    // New import (steps 4-9)
    // -----------------------------------------------------------------

    async fn import_new(
        &self,
        url: &str,
        normalized: &str,
    ) -> Result<ImportOutcome, DecantError> {
        // 4. Extract. Recoverable failures degrade to the fallback
        // payload; anything else short-circuits the import.
        let extraction = match self.factory.extract(url, &self.extract_opts).await {
            Ok(extraction) => extraction,
            Err(e) if e.recoverable() => {
                tracing::warn!(url, error = %e, "Extraction degraded to fallback");
                metrics::counter!("import.extraction_fallbacks").increment(1);
                let kind = self.factory.detect_content_type(url);
                Extraction::fallback(kind, url, None)
            }
            Err(e) => return Err(e),
        };

        let title = extraction
            .title()
            .map(String::from)
            .unwrap_or_else(|| domain_of(url));

        // 5. Classify, with the Uncategorized fallback built in.
        let classification = self.classifier.classify(&title, url, &extraction).await;

        // 6. Assign hierarchy codes against the live sibling sets.
        let node_id = NodeId::new();
        let assigner = HierarchyAssigner::new(&self.store);
        let function = assigner
            .assign_function_code(node_id, &title, &classification, &extraction)
            .await?;
        let organization = assigner
            .assign_organization_code(node_id, &title, &classification, &extraction)
            .await?;

        let changes = vec![
            import_change(HierarchyView::Function, &function),
            import_change(HierarchyView::Organization, &organization),
        ];

        // 7. Persist node + concepts + metadata + audit rows atomically,
        // then prime similarity.
        let specs = metadata_specs(&classification, &extraction);
        let input = build_node_input(url, &title, &classification, &extraction, &function, &organization, &specs);
        let node = self
            .store
            .persist_import(node_id, &input, &specs, &changes)
            .await?;

        // A committed node with missing similarity is a recoverable
        // state; the enrichment pass recomputes it.
        if let Err(e) = self.similarity.update_for_node(node_id).await {
            tracing::warn!(node_id = %node_id, error = %e, "Similarity seeding failed");
        }

        // 8. Optional Phase-2 enqueue.
        let phase2 = match &self.enrichment {
            Some(queue) => match queue.enqueue(node_id) {
                Some(job_id) => Phase2Status {
                    queued: true,
                    job_id: Some(job_id),
                },
                None => Phase2Status::default(),
            },
            None => Phase2Status::default(),
        };

        // 9. Respond and remember.
        let outcome = ImportOutcome {
            node_id,
            cached: false,
            node,
            classification,
            hierarchy_codes: HierarchyCodes {
                function: function.code,
                organization: organization.code,
            },
            metadata: extraction.metadata,
            phase2,
        };
        self.remember(normalized, &outcome);
        Ok(outcome)
    }

    /// forceRefresh over an existing node: re-extract and re-classify,
    /// fold the results into the node, and refresh metadata/similarity.
    /// Hierarchy codes are left in place.
    async fn refresh_existing(
        &self,
        existing: Node,
        url: &str,
        normalized: &str,
    ) -> Result<ImportOutcome, DecantError> {
        let node_id = existing.id;

        let extraction = match self.factory.extract(url, &self.extract_opts).await {
            Ok(extraction) => extraction,
            Err(e) if e.recoverable() => {
                let kind = self.factory.detect_content_type(url);
                Extraction::fallback(kind, url, Some(existing.title.clone()))
            }
            Err(e) => return Err(e),
        };

        let title = extraction
            .title()
            .map(String::from)
            .unwrap_or_else(|| existing.title.clone());
        let classification = self.classifier.classify(&title, url, &extraction).await;
        let specs = metadata_specs(&classification, &extraction);

        let mut extracted_fields = extraction.data.clone();
        embed_provenance(&mut extracted_fields, &classification, &extraction.metadata);

        let patch = NodePatch {
            title: Some(title),
            company: classification.organization.clone(),
            phrase_description: string_field(&extraction, "description"),
            short_description: string_field(&extraction, "description")
                .map(|d| truncate_chars(&d, 200)),
            ai_summary: string_field(&extraction, "summary").or(classification.summary.clone()),
            logo_url: string_field(&extraction, "logoUrl")
                .or_else(|| string_field(&extraction, "thumbnailUrl")),
            extracted_fields: Some(Value::Object(extracted_fields)),
            metadata_tags: Some(specs_tags(&specs)),
            segment: Some(classification.segment.clone()),
            category: Some(classification.category.clone()),
            content_type: Some(classification.content_type.clone()),
            key_concepts: Some(effective_key_concepts(&classification, &extraction)),
            phase2_completed: None,
        };

        let node = self.store.update_node(node_id, &patch).await?;
        self.store.set_node_metadata(node_id, &specs).await?;

        if let Err(e) = self.similarity.update_for_node(node_id).await {
            tracing::warn!(node_id = %node_id, error = %e, "Similarity refresh failed");
        }

        let outcome = ImportOutcome {
            node_id,
            cached: false,
            classification,
            hierarchy_codes: HierarchyCodes {
                function: node.function_hierarchy_code.clone().unwrap_or_default(),
                organization: node.organization_hierarchy_code.clone().unwrap_or_default(),
            },
            metadata: extraction.metadata,
            phase2: Phase2Status::default(),
            node,
        };
        metrics::counter!("import.outcomes", "kind" => "refreshed").increment(1);
        self.cache.invalidate(normalized);
        self.remember(normalized, &outcome);
        Ok(outcome)
    }

    fn outcome_from_node(&self, node: Node, cached: bool) -> ImportOutcome {
        let classification = classification_of(&node);
        let metadata = extraction_metadata_of(&node);

        ImportOutcome {
            node_id: node.id,
            cached,
            classification,
            hierarchy_codes: HierarchyCodes {
                function: node.function_hierarchy_code.clone().unwrap_or_default(),
                organization: node.organization_hierarchy_code.clone().unwrap_or_default(),
            },
            metadata,
            phase2: Phase2Status::default(),
            node,
        }
    }

    fn remember(&self, normalized: &str, outcome: &ImportOutcome) {
        self.cache.insert(
            normalized.to_string(),
            CachedImport {
                node_id: outcome.node_id,
                classification: outcome.classification.clone(),
                hierarchy_codes: outcome.hierarchy_codes.clone(),
                extraction_metadata: outcome.metadata.clone(),
                cached_at: Utc::now(),
            },
        );
    }
}

// ---------------------------------------------------------------------
// Assembly helpers
// ---------------------------------------------------------------------

fn import_change(view: HierarchyView, assigned: &AssignedCode) -> HierarchyCodeChange {
    let mut change = HierarchyCodeChange::new(ChangeType::Created, view, ChangeTrigger::Import);
    change.new_code = Some(assigned.code.clone());
    change.metadata = json!({
        "differentiator": assigned.differentiator.as_str(),
        "collision": assigned.collision,
    });
    change
}

#[allow(clippy::too_many_arguments)]
fn build_node_input(
    url: &str,
    title: &str,
    classification: &Classification,
    extraction: &Extraction,
    function: &AssignedCode,
    organization: &AssignedCode,
    specs: &[MetadataSpec],
) -> NodeInput {
    let description = string_field(extraction, "description");
    let mut extracted_fields = extraction.data.clone();
    embed_provenance(&mut extracted_fields, classification, &extraction.metadata);

    NodeInput {
        title: title.to_string(),
        url: url.to_string(),
        source_domain: domain_of(url),
        company: classification.organization.clone(),
        phrase_description: description.clone(),
        short_description: description.map(|d| truncate_chars(&d, 200)),
        ai_summary: string_field(extraction, "summary").or(classification.summary.clone()),
        logo_url: string_field(extraction, "logoUrl")
            .or_else(|| string_field(extraction, "thumbnailUrl")),
        extracted_fields: Some(Value::Object(extracted_fields)),
        metadata_tags: specs_tags(specs),
        segment: Some(classification.segment.clone()),
        category: Some(classification.category.clone()),
        content_type: Some(classification.content_type.clone()),
        function_parent_id: function.parent_id,
        function_hierarchy_code: Some(function.code.clone()),
        organization_parent_id: organization.parent_id,
        organization_hierarchy_code: Some(organization.code.clone()),
        key_concepts: effective_key_concepts(classification, extraction),
    }
}

/// Suggested metadata codes for the junction table, one spec per tag,
/// all `source = ai` at the classification's confidence.
fn metadata_specs(classification: &Classification, extraction: &Extraction) -> Vec<MetadataSpec> {
    let confidence = classification.confidence;
    let mut codes: Vec<MetadataCode> = Vec::new();

    if let Some(org) = classification
        .organization
        .as_deref()
        .map(code_form)
        .filter(|c| !c.is_empty())
    {
        codes.push(MetadataCode::new(MetadataType::Org, org));
    }

    codes.push(MetadataCode::new(
        MetadataType::Dom,
        classification.category.clone(),
    ));

    codes.push(MetadataCode::new(
        MetadataType::Plt,
        extraction.content_kind.as_str().to_ascii_uppercase(),
    ));

    if let Some(language) = string_field(extraction, "language").map(|l| code_form(&l)) {
        if !language.is_empty() {
            codes.push(MetadataCode::new(MetadataType::Tec, language));
        }
    }

    if let Some(license) = string_field(extraction, "license").map(|l| code_form(&l)) {
        if !license.is_empty() {
            codes.push(MetadataCode::new(MetadataType::Lic, license));
        }
    }

    for concept in effective_key_concepts(classification, extraction).iter().take(5) {
        let code = code_form(concept);
        if !code.is_empty() {
            codes.push(MetadataCode::new(MetadataType::Con, code));
        }
    }

    let mut seen = std::collections::HashSet::new();
    codes
        .into_iter()
        .filter(|code| seen.insert(code.clone()))
        .map(|code| MetadataSpec::ai(code, confidence))
        .collect()
}

/// Registry code form: normalized, uppercased (`AI_ML`, `OPENAI`).
fn code_form(raw: &str) -> String {
    decant_common::types::normalize_segment(raw).to_ascii_uppercase()
}

fn specs_tags(specs: &[MetadataSpec]) -> Vec<String> {
    specs
        .iter()
        .map(|s| format!("{}:{}", s.code_type.as_str(), s.code))
        .collect()
}

fn effective_key_concepts(classification: &Classification, extraction: &Extraction) -> Vec<String> {
    extraction
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
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| classification.key_concepts.clone())
}

/// Stash classification + extraction provenance inside extracted_fields
/// so duplicate hits can reconstruct the original import response.
fn embed_provenance(
    fields: &mut serde_json::Map<String, Value>,
    classification: &Classification,
    metadata: &ExtractionMetadata,
) {
    if let Ok(c) = serde_json::to_value(classification) {
        fields.insert("classification".into(), c);
    }
    if let Ok(m) = serde_json::to_value(metadata) {
        fields.insert("extractionMetadata".into(), m);
    }
}

fn classification_of(node: &Node) -> Classification {
    if let Some(stored) = node.extracted_fields.get("classification") {
        if let Ok(classification) = serde_json::from_value::<Classification>(stored.clone()) {
            return classification;
        }
    }

    Classification {
        segment: node.segment.clone().unwrap_or_else(|| "U".into()),
        category: node.category.clone().unwrap_or_else(|| "INBOX".into()),
        content_type: node.content_type.clone().unwrap_or_else(|| "O".into()),
        organization: node.company.clone(),
        confidence: 1.0,
        key_concepts: node.key_concepts.clone(),
        summary: node.ai_summary.clone(),
    }
}

fn extraction_metadata_of(node: &Node) -> ExtractionMetadata {
    node.extracted_fields
        .get("extractionMetadata")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_else(|| ExtractionMetadata::new(ExtractionMethod::Fallback, 0.3))
}

fn string_field(extraction: &Extraction, key: &str) -> Option<String> {
    match extraction.data.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
        _ => None,
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
