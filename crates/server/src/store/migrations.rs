use chrono::Utc;

use super::{Store, StoreError};

/// One reversible schema step. `up` and `down` may contain multiple
/// statements separated by `;`.
pub struct Migration {
    pub name: &'static str,
    pub up: &'static str,
    pub down: &'static str,
}

/// The single ordered migration list. Append-only: new steps go at the
/// end, names never change once released.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        name: "0001_create_nodes",
        up: r#"
            CREATE TABLE nodes (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                source_domain TEXT NOT NULL,
                company TEXT,
                phrase_description TEXT,
                short_description TEXT,
                ai_summary TEXT,
                logo_url TEXT,
                extracted_fields TEXT NOT NULL DEFAULT '{}',
                metadata_tags TEXT NOT NULL DEFAULT '[]',
                segment TEXT,
                category TEXT,
                content_type TEXT,
                function_parent_id TEXT REFERENCES nodes(id) ON DELETE SET NULL,
                function_hierarchy_code TEXT,
                organization_parent_id TEXT REFERENCES nodes(id) ON DELETE SET NULL,
                organization_hierarchy_code TEXT,
                is_deleted INTEGER NOT NULL DEFAULT 0,
                date_added TEXT NOT NULL,
                date_modified TEXT NOT NULL
            );
            CREATE UNIQUE INDEX idx_nodes_url_active ON nodes(url) WHERE is_deleted = 0;
            CREATE INDEX idx_nodes_function_parent_added
                ON nodes(function_parent_id, date_added DESC);
            CREATE INDEX idx_nodes_organization_parent_added
                ON nodes(organization_parent_id, date_added DESC);
            CREATE INDEX idx_nodes_function_parent_deleted
                ON nodes(function_parent_id, is_deleted);
            CREATE INDEX idx_nodes_organization_parent_deleted
                ON nodes(organization_parent_id, is_deleted);
            CREATE INDEX idx_nodes_function_code ON nodes(function_hierarchy_code);
            CREATE INDEX idx_nodes_organization_code ON nodes(organization_hierarchy_code);
            CREATE INDEX idx_nodes_classification ON nodes(segment, category, content_type)
        "#,
        down: r#"
            DROP INDEX idx_nodes_classification;
            DROP INDEX idx_nodes_organization_code;
            DROP INDEX idx_nodes_function_code;
            DROP INDEX idx_nodes_organization_parent_deleted;
            DROP INDEX idx_nodes_function_parent_deleted;
            DROP INDEX idx_nodes_organization_parent_added;
            DROP INDEX idx_nodes_function_parent_added;
            DROP INDEX idx_nodes_url_active;
            DROP TABLE nodes
        "#,
    },
    Migration {
        name: "0002_create_key_concepts",
        up: r#"
            CREATE TABLE key_concepts (
                node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
                concept TEXT NOT NULL,
                position INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (node_id, concept)
            )
        "#,
        down: "DROP TABLE key_concepts",
    },
    Migration {
        name: "0003_create_taxonomy_roots",
        up: r#"
            CREATE TABLE segments (
                id TEXT PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                color TEXT NOT NULL
            );
            CREATE TABLE organizations (
                id TEXT PRIMARY KEY,
                code TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                color TEXT NOT NULL
            )
        "#,
        down: r#"
            DROP TABLE organizations;
            DROP TABLE segments
        "#,
    },
    Migration {
        name: "0004_create_metadata_registry",
        up: r#"
            CREATE TABLE metadata_code_registry (
                id TEXT PRIMARY KEY,
                code_type TEXT NOT NULL,
                code TEXT NOT NULL,
                display_name TEXT NOT NULL,
                description TEXT,
                usage_count INTEGER NOT NULL DEFAULT 0,
                UNIQUE (code_type, code)
            );
            CREATE TABLE node_metadata (
                node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
                registry_id TEXT NOT NULL
                    REFERENCES metadata_code_registry(id) ON DELETE CASCADE,
                confidence REAL NOT NULL CHECK (confidence >= 0.0 AND confidence <= 1.0),
                source TEXT NOT NULL CHECK (source IN ('ai', 'user', 'import')),
                PRIMARY KEY (node_id, registry_id)
            );
            CREATE INDEX idx_node_metadata_registry ON node_metadata(registry_id)
        "#,
        down: r#"
            DROP INDEX idx_node_metadata_registry;
            DROP TABLE node_metadata;
            DROP TABLE metadata_code_registry
        "#,
    },
    Migration {
        name: "0005_create_node_similarity",
        up: r#"
            CREATE TABLE node_similarity (
                node_a_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
                node_b_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
                score REAL NOT NULL CHECK (score >= 0.0 AND score <= 1.0),
                method TEXT NOT NULL DEFAULT 'jaccard_weighted',
                computed_at TEXT NOT NULL,
                PRIMARY KEY (node_a_id, node_b_id),
                CHECK (node_a_id < node_b_id)
            );
            CREATE INDEX idx_node_similarity_b ON node_similarity(node_b_id);
            CREATE INDEX idx_node_similarity_score ON node_similarity(score DESC)
        "#,
        down: r#"
            DROP INDEX idx_node_similarity_score;
            DROP INDEX idx_node_similarity_b;
            DROP TABLE node_similarity
        "#,
    },
    Migration {
        name: "0006_create_hierarchy_code_changes",
        up: r#"
            CREATE TABLE hierarchy_code_changes (
                id TEXT PRIMARY KEY,
                change_type TEXT NOT NULL
                    CHECK (change_type IN ('created', 'updated', 'moved', 'restructured')),
                hierarchy_type TEXT NOT NULL
                    CHECK (hierarchy_type IN ('function', 'organization')),
                triggered_by TEXT NOT NULL
                    CHECK (triggered_by IN ('import', 'user_move', 'restructure', 'merge')),
                old_code TEXT,
                new_code TEXT,
                node_id TEXT,
                related_node_ids TEXT NOT NULL DEFAULT '[]',
                metadata TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            );
            CREATE INDEX idx_hierarchy_changes_node ON hierarchy_code_changes(node_id);
            CREATE INDEX idx_hierarchy_changes_created ON hierarchy_code_changes(created_at)
        "#,
        down: r#"
            DROP INDEX idx_hierarchy_changes_created;
            DROP INDEX idx_hierarchy_changes_node;
            DROP TABLE hierarchy_code_changes
        "#,
    },
    Migration {
        name: "0007_create_nodes_fts",
        up: r#"
            CREATE VIRTUAL TABLE nodes_fts USING fts5(
                title,
                source_domain,
                company,
                phrase_description,
                short_description,
                ai_summary,
                content='nodes',
                content_rowid='rowid'
            );
            CREATE TRIGGER nodes_fts_insert AFTER INSERT ON nodes BEGIN
                INSERT INTO nodes_fts(rowid, title, source_domain, company,
                                      phrase_description, short_description, ai_summary)
                VALUES (new.rowid, new.title, new.source_domain, new.company,
                        new.phrase_description, new.short_description, new.ai_summary);
            END;
            CREATE TRIGGER nodes_fts_delete AFTER DELETE ON nodes BEGIN
                INSERT INTO nodes_fts(nodes_fts, rowid, title, source_domain, company,
                                      phrase_description, short_description, ai_summary)
                VALUES ('delete', old.rowid, old.title, old.source_domain, old.company,
                        old.phrase_description, old.short_description, old.ai_summary);
            END;
            CREATE TRIGGER nodes_fts_update AFTER UPDATE ON nodes BEGIN
                INSERT INTO nodes_fts(nodes_fts, rowid, title, source_domain, company,
                                      phrase_description, short_description, ai_summary)
                VALUES ('delete', old.rowid, old.title, old.source_domain, old.company,
                        old.phrase_description, old.short_description, old.ai_summary);
                INSERT INTO nodes_fts(rowid, title, source_domain, company,
                                      phrase_description, short_description, ai_summary)
                VALUES (new.rowid, new.title, new.source_domain, new.company,
                        new.phrase_description, new.short_description, new.ai_summary);
            END
        "#,
        down: r#"
            DROP TRIGGER nodes_fts_update;
            DROP TRIGGER nodes_fts_delete;
            DROP TRIGGER nodes_fts_insert;
            DROP TABLE nodes_fts
        "#,
    },
    Migration {
        name: "0008_add_phase2_completed",
        up: "ALTER TABLE nodes ADD COLUMN phase2_completed INTEGER NOT NULL DEFAULT 0",
        down: "ALTER TABLE nodes DROP COLUMN phase2_completed",
    },
];

impl Store {
    /// Apply every pending migration, in order, each inside its own
    /// transaction. A failure aborts without recording the step.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        self.ensure_migrations_table().await?;
        let applied = self.applied_migrations().await?;

        for migration in MIGRATIONS {
            if applied.iter().any(|name| name == migration.name) {
                continue;
            }

            tracing::info!(migration = migration.name, "Applying migration");

            let mut tx = self
                .pool()
                .begin()
                .await
                .map_err(|e| StoreError::Migration(e.to_string()))?;

            for statement in split_statements(migration.up) {
                sqlx::query(statement).execute(&mut *tx).await.map_err(|e| {
                    StoreError::Migration(format!("{}: {}", migration.name, e))
                })?;
            }

            sqlx::query("INSERT INTO _migrations (name, applied_at) VALUES (?, ?)")
                .bind(migration.name)
                .bind(Utc::now())
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Migration(format!("{}: {}", migration.name, e)))?;

            tx.commit()
                .await
                .map_err(|e| StoreError::Migration(format!("{}: {}", migration.name, e)))?;
        }

        tracing::info!("SQLite migrations complete");
        Ok(())
    }

    /// Roll back one applied migration. Refused while any later migration
    /// is still applied.
    pub async fn rollback(&self, name: &str) -> Result<(), StoreError> {
        self.ensure_migrations_table().await?;
        let applied = self.applied_migrations().await?;

        let position = MIGRATIONS
            .iter()
            .position(|m| m.name == name)
            .ok_or_else(|| StoreError::Migration(format!("Unknown migration: {}", name)))?;

        if !applied.iter().any(|n| n == name) {
            return Err(StoreError::Migration(format!("Not applied: {}", name)));
        }

        if let Some(later) = MIGRATIONS[position + 1..]
            .iter()
            .find(|m| applied.iter().any(|n| n == m.name))
        {
            return Err(StoreError::Migration(format!(
                "Cannot roll back {} while {} is applied",
                name, later.name
            )));
        }

        tracing::warn!(migration = name, "Rolling back migration");

        let migration = &MIGRATIONS[position];
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        for statement in split_statements(migration.down) {
            sqlx::query(statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Migration(format!("{}: {}", name, e)))?;
        }

        sqlx::query("DELETE FROM _migrations WHERE name = ?")
            .bind(name)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;

        Ok(())
    }

    /// Names of applied migrations, in application order.
    pub async fn applied_migrations(&self) -> Result<Vec<String>, StoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM _migrations ORDER BY applied_at, name")
                .fetch_all(self.pool())
                .await
                .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    async fn ensure_migrations_table(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL
            )
            "#,
        )
        .execute(self.pool())
        .await
        .map_err(|e| StoreError::Migration(e.to_string()))?;
        Ok(())
    }
}

/// Split a multi-statement SQL block on `;`. Statements in this file
/// never embed literal semicolons except inside FTS trigger bodies, which
/// are kept whole by tracking BEGIN/END depth.
fn split_statements(sql: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut scanned = 0usize;

    for (idx, _) in sql.match_indices(';') {
        let segment = sql[scanned..idx].to_ascii_uppercase();
        depth += segment.matches("BEGIN").count();
        depth = depth.saturating_sub(segment.matches("END").count());
        scanned = idx + 1;

        if depth == 0 {
            let statement = sql[start..idx].trim();
            if !statement.is_empty() {
                out.push(statement);
            }
            start = idx + 1;
        }
    }

    let tail = sql[start..].trim();
    if !tail.is_empty() {
        out.push(tail);
    }
    out
}
