use decant_common::types::{Organization, Segment};
use decant_common::{OrganizationId, SegmentId};

use super::{Store, StoreError};

/// Seed segments: `(code, name, color)`. The single-character codes are
/// the closed classification vocabulary.
const DEFAULT_SEGMENTS: &[(&str, &str, &str)] = &[
    ("A", "AI & Machine Learning", "#7c3aed"),
    ("D", "Development Tools", "#2563eb"),
    ("E", "Entertainment & Media", "#db2777"),
    ("L", "Learning & Reference", "#059669"),
    ("P", "Productivity", "#d97706"),
    ("S", "Science & Research", "#0891b2"),
    ("U", "Uncategorized", "#6b7280"),
];

const DEFAULT_ORGANIZATIONS: &[(&str, &str, &str)] = &[
    ("WORK", "Work", "#1d4ed8"),
    ("PERSONAL", "Personal", "#15803d"),
    ("RESEARCH", "Research", "#7e22ce"),
    ("ARCHIVE", "Archive", "#57534e"),
];

impl Store {
    /// Idempotently seed taxonomy roots inside a transaction, so
    /// concurrent first reads produce a single seed batch.
    pub async fn ensure_taxonomy_seeded(&self) -> Result<(), StoreError> {
        let mut tx = self
            .pool()
            .begin()
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        let (segment_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM segments")
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        if segment_count == 0 {
            tracing::info!("Seeding default segments");
            for (code, name, color) in DEFAULT_SEGMENTS {
                sqlx::query(
                    "INSERT OR IGNORE INTO segments (id, code, name, color) VALUES (?, ?, ?, ?)",
                )
                .bind(SegmentId::new().to_string())
                .bind(code)
                .bind(name)
                .bind(color)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
            }
        }

        let (org_count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM organizations")
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| StoreError::Query(e.to_string()))?;

        if org_count == 0 {
            tracing::info!("Seeding default organizations");
            for (code, name, color) in DEFAULT_ORGANIZATIONS {
                sqlx::query(
                    "INSERT OR IGNORE INTO organizations (id, code, name, color) VALUES (?, ?, ?, ?)",
                )
                .bind(OrganizationId::new().to_string())
                .bind(code)
                .bind(name)
                .bind(color)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
            }
        }

        tx.commit().await.map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(())
    }

    pub async fn list_segments(&self) -> Result<Vec<Segment>, StoreError> {
        self.ensure_taxonomy_seeded().await?;
        let rows: Vec<(String, String, String, String)> =
            sqlx::query_as("SELECT id, code, name, color FROM segments ORDER BY code")
                .fetch_all(self.pool())
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, code, name, color)| {
                Some(Segment {
                    id: SegmentId::parse(&id)?,
                    code,
                    name,
                    color,
                })
            })
            .collect())
    }

    pub async fn list_organizations(&self) -> Result<Vec<Organization>, StoreError> {
        self.ensure_taxonomy_seeded().await?;
        let rows: Vec<(String, String, String, String)> =
            sqlx::query_as("SELECT id, code, name, color FROM organizations ORDER BY code")
                .fetch_all(self.pool())
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, code, name, color)| {
                Some(Organization {
                    id: OrganizationId::parse(&id)?,
                    code,
                    name,
                    color,
                })
            })
            .collect())
    }

    /// Whether a code names a taxonomy root in the given hierarchy.
    pub async fn is_taxonomy_root(
        &self,
        view: decant_common::types::HierarchyView,
        code: &str,
    ) -> Result<bool, StoreError> {
        let table = match view {
            decant_common::types::HierarchyView::Function => "segments",
            decant_common::types::HierarchyView::Organization => "organizations",
        };
        let (count,): (i64,) =
            sqlx::query_as(&format!("SELECT COUNT(*) FROM {} WHERE code = ?", table))
                .bind(code)
                .fetch_one(self.pool())
                .await
                .map_err(|e| StoreError::Query(e.to_string()))?;
        Ok(count > 0)
    }
}
