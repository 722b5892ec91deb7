use std::collections::HashMap;

use decant_common::config::SearchConfig;
use decant_common::types::{
    Node, Pagination, SearchFacets, SearchFilters, SearchHit, SearchResponse,
};

use super::nodes::{NodeRow, NODE_COLUMNS};
use super::{Store, StoreError};

const HIGHLIGHT_OPEN: &str = "<mark>";
const HIGHLIGHT_CLOSE: &str = "</mark>";

/// FTS columns in table order; indexes are used by `snippet()`.
const FTS_FIELDS: [&str; 6] = [
    "title",
    "source_domain",
    "company",
    "phrase_description",
    "short_description",
    "ai_summary",
];

impl Store {
    /// LIKE-based fallback search over the text columns, newest first.
    pub async fn search_nodes(
        &self,
        query: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Node>, StoreError> {
        let start = std::time::Instant::now();
        let pattern = format!("%{}%", query.trim());

        let sql = format!(
            r#"
            SELECT {}
            FROM nodes
            WHERE is_deleted = 0 AND (
                title LIKE ?1 OR source_domain LIKE ?1 OR company LIKE ?1
                OR phrase_description LIKE ?1 OR short_description LIKE ?1
                OR ai_summary LIKE ?1
            )
            ORDER BY date_added DESC
            LIMIT ?2 OFFSET ?3
            "#,
            NODE_COLUMNS
        );

        let rows = sqlx::query_as::<_, NodeRow>(&sql)
            .bind(&pattern)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool())
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        metrics::histogram!("store.search.latency", "mode" => "like")
            .record(start.elapsed().as_secs_f64());

        self.attach_key_concepts(rows).await
    }

    /// FTS5 search ranked by relevance, with AND-ed facet filters,
    /// highlight-derived matched fields and snippets, and aggregated
    /// facet counts over the matching set (capped for cost).
    pub async fn search_nodes_advanced(
        &self,
        query: &str,
        filters: &SearchFilters,
        pagination: Pagination,
        cfg: &SearchConfig,
    ) -> Result<SearchResponse, StoreError> {
        let start = std::time::Instant::now();
        let query = query.trim();

        let (filter_sql, filter_binds) = build_filter_clause(filters);

        let hits = if query.is_empty() {
            self.filter_only_hits(&filter_sql, &filter_binds, pagination)
                .await?
        } else {
            self.fts_hits(query, &filter_sql, &filter_binds, pagination)
                .await?
        };

        let facets = self
            .compute_facets(query, &filter_sql, &filter_binds, cfg)
            .await?;
        let total = self
            .count_search_results(query, &filter_sql, &filter_binds)
            .await?;

        metrics::histogram!("store.search.latency", "mode" => "advanced")
            .record(start.elapsed().as_secs_f64());
        metrics::histogram!("store.search.results").record(hits.len() as f64);

        Ok(SearchResponse {
            results: hits,
            facets,
            total,
            page: pagination.page,
            limit: pagination.limit,
        })
    }

    /// Unclamped total for the same query + filters.
    pub async fn count_search_results(
        &self,
        query: &str,
        filter_sql: &str,
        filter_binds: &[String],
    ) -> Result<i64, StoreError> {
        let sql = if query.is_empty() {
            format!(
                "SELECT COUNT(*) FROM nodes n WHERE n.is_deleted = 0{}",
                filter_sql
            )
        } else {
            format!(
                "SELECT COUNT(*) FROM nodes_fts \
                 JOIN nodes n ON n.rowid = nodes_fts.rowid \
                 WHERE nodes_fts MATCH ? AND n.is_deleted = 0{}",
                filter_sql
            )
        };

        let mut q = sqlx::query_as::<_, (i64,)>(&sql);
        if !query.is_empty() {
            q = q.bind(escape_fts_query(query));
        }
        for bind in filter_binds {
            q = q.bind(bind);
        }

        let (count,) = q
            .fetch_one(self.pool())
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(count)
    }

    async fn fts_hits(
        &self,
        query: &str,
        filter_sql: &str,
        filter_binds: &[String],
        pagination: Pagination,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let snippet_cols: Vec<String> = FTS_FIELDS
            .iter()
            .enumerate()
            .map(|(i, name)| {
                format!(
                    "COALESCE(snippet(nodes_fts, {i}, '{open}', '{close}', '…', 12), '') \
                     AS snip_{name}",
                    i = i,
                    open = HIGHLIGHT_OPEN,
                    close = HIGHLIGHT_CLOSE,
                    name = name
                )
            })
            .collect();

        let sql = format!(
            r#"
            SELECT {cols}, {snips}
            FROM nodes_fts
            JOIN nodes n ON n.rowid = nodes_fts.rowid
            WHERE nodes_fts MATCH ? AND n.is_deleted = 0{filters}
            ORDER BY rank
            LIMIT ? OFFSET ?
            "#,
            cols = qualified_node_columns(),
            snips = snippet_cols.join(", "),
            filters = filter_sql
        );

        let mut q = sqlx::query_as::<_, FtsHitRow>(&sql).bind(escape_fts_query(query));
        for bind in filter_binds {
            q = q.bind(bind);
        }
        q = q.bind(pagination.limit).bind(pagination.offset());

        let rows = q
            .fetch_all(self.pool())
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let snippets = [
                ("title", &row.snip_title),
                ("source_domain", &row.snip_source_domain),
                ("company", &row.snip_company),
                ("phrase_description", &row.snip_phrase_description),
                ("short_description", &row.snip_short_description),
                ("ai_summary", &row.snip_ai_summary),
            ];

            let matched_fields: Vec<String> = snippets
                .iter()
                .filter(|(_, snip)| snip.contains(HIGHLIGHT_OPEN))
                .map(|(name, _)| name.to_string())
                .collect();

            // First non-empty highlighted snippet among the description
            // fields, in preference order.
            let snippet = [
                &row.snip_short_description,
                &row.snip_phrase_description,
                &row.snip_ai_summary,
            ]
            .into_iter()
            .find(|s| s.contains(HIGHLIGHT_OPEN))
            .cloned();

            let node_row = row.node;
            let id = decant_common::NodeId::parse(&node_row.id);
            let concepts = match id {
                Some(id) => self.key_concepts_for(id).await?,
                None => Vec::new(),
            };

            hits.push(SearchHit {
                node: node_row.into_node(concepts),
                matched_fields,
                snippet,
            });
        }
        Ok(hits)
    }

    async fn filter_only_hits(
        &self,
        filter_sql: &str,
        filter_binds: &[String],
        pagination: Pagination,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let sql = format!(
            "SELECT {} FROM nodes n WHERE n.is_deleted = 0{} \
             ORDER BY n.date_added DESC LIMIT ? OFFSET ?",
            qualified_node_columns(),
            filter_sql
        );

        let mut q = sqlx::query_as::<_, NodeRow>(&sql);
        for bind in filter_binds {
            q = q.bind(bind);
        }
        q = q.bind(pagination.limit).bind(pagination.offset());

        let rows = q
            .fetch_all(self.pool())
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(self
            .attach_key_concepts(rows)
            .await?
            .into_iter()
            .map(|node| SearchHit {
                node,
                matched_fields: Vec::new(),
                snippet: None,
            })
            .collect())
    }

    /// Facet counts over the matching set, scanning at most
    /// `cfg.facet_row_cap` rows (best-effort beyond the cap).
    async fn compute_facets(
        &self,
        query: &str,
        filter_sql: &str,
        filter_binds: &[String],
        cfg: &SearchConfig,
    ) -> Result<SearchFacets, StoreError> {
        let matching = if query.is_empty() {
            format!(
                "SELECT n.segment, n.category, n.content_type, n.company \
                 FROM nodes n WHERE n.is_deleted = 0{} LIMIT {}",
                filter_sql, cfg.facet_row_cap
            )
        } else {
            format!(
                "SELECT n.segment, n.category, n.content_type, n.company \
                 FROM nodes_fts JOIN nodes n ON n.rowid = nodes_fts.rowid \
                 WHERE nodes_fts MATCH ? AND n.is_deleted = 0{} LIMIT {}",
                filter_sql, cfg.facet_row_cap
            )
        };

        let sql = format!(
            "SELECT segment, category, content_type, company FROM ({})",
            matching
        );

        let mut q = sqlx::query_as::<
            _,
            (Option<String>, Option<String>, Option<String>, Option<String>),
        >(&sql);
        if !query.is_empty() {
            q = q.bind(escape_fts_query(query));
        }
        for bind in filter_binds {
            q = q.bind(bind);
        }

        let rows = q
            .fetch_all(self.pool())
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let mut facets = SearchFacets::default();
        let mut organizations: HashMap<String, i64> = HashMap::new();

        for (segment, category, content_type, company) in rows {
            if let Some(s) = segment {
                *facets.segments.entry(s).or_insert(0) += 1;
            }
            if let Some(c) = category {
                *facets.categories.entry(c).or_insert(0) += 1;
            }
            if let Some(t) = content_type {
                *facets.content_types.entry(t).or_insert(0) += 1;
            }
            if let Some(org) = company {
                if !org.is_empty() {
                    *organizations.entry(org).or_insert(0) += 1;
                }
            }
        }

        // Keep only the top organizations by count.
        let mut ranked: Vec<(String, i64)> = organizations.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        ranked.truncate(cfg.organization_facet_limit as usize);
        facets.organizations = ranked.into_iter().collect();

        Ok(facets)
    }
}

/// `n.`-qualified node column list for joined queries.
fn qualified_node_columns() -> String {
    NODE_COLUMNS
        .split(", ")
        .map(|c| format!("n.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Build the AND-ed filter clause. Returns SQL (prefixed with ` AND`)
/// plus positional binds in order.
pub(crate) fn build_filter_clause(filters: &SearchFilters) -> (String, Vec<String>) {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();

    for (column, values) in [
        ("n.segment", &filters.segments),
        ("n.category", &filters.categories),
        ("n.content_type", &filters.content_types),
    ] {
        if !values.is_empty() {
            let placeholders = vec!["?"; values.len()].join(", ");
            clauses.push(format!("{} IN ({})", column, placeholders));
            binds.extend(values.iter().cloned());
        }
    }

    if !filters.organizations.is_empty() {
        let like_parts = vec!["n.company LIKE ?"; filters.organizations.len()].join(" OR ");
        clauses.push(format!("({})", like_parts));
        binds.extend(filters.organizations.iter().map(|v| format!("%{}%", v)));
    }

    if let Some(range) = &filters.date_range {
        if let Some(start) = &range.start {
            clauses.push("datetime(n.date_added) >= datetime(?)".into());
            binds.push(start.to_rfc3339());
        }
        if let Some(end) = &range.end {
            clauses.push("datetime(n.date_added) <= datetime(?)".into());
            binds.push(end.to_rfc3339());
        }
    }

    if let Some(has) = filters.has_complete_metadata {
        let clause = "(n.phase2_completed = 1 \
             OR json_extract(n.extracted_fields, '$.phase2Completed') = 1)";
        if has {
            clauses.push(clause.into());
        } else {
            clauses.push(format!("NOT {}", clause));
        }
    }

    if clauses.is_empty() {
        (String::new(), binds)
    } else {
        (format!(" AND {}", clauses.join(" AND ")), binds)
    }
}

/// Quote each token so user input cannot inject FTS5 query syntax.
pub(crate) fn escape_fts_query(query: &str) -> String {
    query
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Row shape for FTS hits: node columns plus one snippet per FTS field.
#[derive(sqlx::FromRow)]
struct FtsHitRow {
    #[sqlx(flatten)]
    node: NodeRow,
    snip_title: String,
    snip_source_domain: String,
    snip_company: String,
    snip_phrase_description: String,
    snip_short_description: String,
    snip_ai_summary: String,
}
