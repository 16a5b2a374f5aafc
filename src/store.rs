use crate::types::{Clause, GeneratedLease, Template, TemplateStatus};
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Raised by compare-and-swap saves when the stored token moved underneath
/// the caller. Services downcast this out of `anyhow` and retry or surface
/// a conflict.
#[derive(Debug, thiserror::Error)]
#[error("stale revision: expected {expected}, found {found}")]
pub struct StaleRevision {
    pub expected: u64,
    pub found: u64,
}

// ─── Traits ───────────────────────────────────────────────────

/// Persistence for the clause library. The engine holds no global state;
/// the caller owns the store's lifecycle and backend choice.
#[async_trait]
pub trait ClauseStore: Send + Sync {
    /// Insert a new clause. Fails if the id already exists.
    async fn insert_clause(&self, clause: &Clause) -> Result<()>;
    /// Compare-and-swap save: `expected_version` must match the stored
    /// clause's `version` or the save fails with [`StaleRevision`].
    async fn save_clause(&self, clause: &Clause, expected_version: u32) -> Result<()>;
    async fn load_clause(&self, id: Uuid) -> Result<Option<Clause>>;
    async fn list_clauses(&self) -> Result<Vec<Clause>>;
}

/// Persistence for templates. Saves are compare-and-swap on `revision`;
/// the store bumps the revision on every successful save.
#[async_trait]
pub trait TemplateStore: Send + Sync {
    async fn insert_template(&self, template: &Template) -> Result<()>;
    /// CAS save. Returns the stored copy (with the bumped revision) so the
    /// caller never has to guess the new token.
    async fn save_template(&self, template: &Template, expected_revision: u64)
        -> Result<Template>;
    async fn load_template(&self, id: Uuid) -> Result<Option<Template>>;
    async fn list_templates(&self, status: Option<TemplateStatus>) -> Result<Vec<Template>>;
}

/// Persistence for generated leases. Append-only: records are immutable
/// snapshots, so there is no save/update surface at all.
#[async_trait]
pub trait LeaseStore: Send + Sync {
    async fn insert_lease(&self, lease: &GeneratedLease) -> Result<()>;
    async fn load_lease(&self, id: Uuid) -> Result<Option<GeneratedLease>>;
    async fn list_leases(&self, template_id: Option<Uuid>) -> Result<Vec<GeneratedLease>>;
}

// ─── In-memory implementations ────────────────────────────────

/// In-memory ClauseStore for tests and single-process use.
#[derive(Default)]
pub struct MemoryClauseStore {
    inner: RwLock<HashMap<Uuid, Clause>>,
}

impl MemoryClauseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClauseStore for MemoryClauseStore {
    async fn insert_clause(&self, clause: &Clause) -> Result<()> {
        let mut store = self.inner.write().map_err(|e| anyhow!("lock: {}", e))?;
        if store.contains_key(&clause.id) {
            bail!("clause already exists: {}", clause.id);
        }
        store.insert(clause.id, clause.clone());
        Ok(())
    }

    async fn save_clause(&self, clause: &Clause, expected_version: u32) -> Result<()> {
        let mut store = self.inner.write().map_err(|e| anyhow!("lock: {}", e))?;
        let existing = store
            .get(&clause.id)
            .ok_or_else(|| anyhow!("clause not found: {}", clause.id))?;
        if existing.version != expected_version {
            return Err(StaleRevision {
                expected: u64::from(expected_version),
                found: u64::from(existing.version),
            }
            .into());
        }
        store.insert(clause.id, clause.clone());
        Ok(())
    }

    async fn load_clause(&self, id: Uuid) -> Result<Option<Clause>> {
        let store = self.inner.read().map_err(|e| anyhow!("lock: {}", e))?;
        Ok(store.get(&id).cloned())
    }

    async fn list_clauses(&self) -> Result<Vec<Clause>> {
        let store = self.inner.read().map_err(|e| anyhow!("lock: {}", e))?;
        Ok(store.values().cloned().collect())
    }
}

/// In-memory TemplateStore enforcing the CAS revision discipline.
#[derive(Default)]
pub struct MemoryTemplateStore {
    inner: RwLock<HashMap<Uuid, Template>>,
}

impl MemoryTemplateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TemplateStore for MemoryTemplateStore {
    async fn insert_template(&self, template: &Template) -> Result<()> {
        let mut store = self.inner.write().map_err(|e| anyhow!("lock: {}", e))?;
        if store.contains_key(&template.id) {
            bail!("template already exists: {}", template.id);
        }
        store.insert(template.id, template.clone());
        Ok(())
    }

    async fn save_template(
        &self,
        template: &Template,
        expected_revision: u64,
    ) -> Result<Template> {
        let mut store = self.inner.write().map_err(|e| anyhow!("lock: {}", e))?;
        let existing = store
            .get(&template.id)
            .ok_or_else(|| anyhow!("template not found: {}", template.id))?;
        if existing.revision != expected_revision {
            return Err(StaleRevision {
                expected: expected_revision,
                found: existing.revision,
            }
            .into());
        }
        let mut saved = template.clone();
        saved.revision = expected_revision + 1;
        store.insert(saved.id, saved.clone());
        Ok(saved)
    }

    async fn load_template(&self, id: Uuid) -> Result<Option<Template>> {
        let store = self.inner.read().map_err(|e| anyhow!("lock: {}", e))?;
        Ok(store.get(&id).cloned())
    }

    async fn list_templates(&self, status: Option<TemplateStatus>) -> Result<Vec<Template>> {
        let store = self.inner.read().map_err(|e| anyhow!("lock: {}", e))?;
        Ok(store
            .values()
            .filter(|t| status.is_none_or(|s| t.status == s))
            .cloned()
            .collect())
    }
}

/// In-memory LeaseStore. Append-only like the trait.
#[derive(Default)]
pub struct MemoryLeaseStore {
    inner: RwLock<HashMap<Uuid, GeneratedLease>>,
}

impl MemoryLeaseStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn insert_lease(&self, lease: &GeneratedLease) -> Result<()> {
        let mut store = self.inner.write().map_err(|e| anyhow!("lock: {}", e))?;
        if store.contains_key(&lease.id) {
            bail!("lease already exists: {}", lease.id);
        }
        store.insert(lease.id, lease.clone());
        Ok(())
    }

    async fn load_lease(&self, id: Uuid) -> Result<Option<GeneratedLease>> {
        let store = self.inner.read().map_err(|e| anyhow!("lock: {}", e))?;
        Ok(store.get(&id).cloned())
    }

    async fn list_leases(&self, template_id: Option<Uuid>) -> Result<Vec<GeneratedLease>> {
        let store = self.inner.read().map_err(|e| anyhow!("lock: {}", e))?;
        Ok(store
            .values()
            .filter(|l| template_id.is_none_or(|t| l.template_id == t))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ClauseRequirement, TemplateStatus};
    use chrono::Utc;

    fn sample_clause() -> Clause {
        let now = Utc::now();
        Clause {
            id: Uuid::new_v4(),
            name: "parties".to_string(),
            title: "Parties".to_string(),
            category: "general".to_string(),
            jurisdiction: None,
            content: "Landlord and tenant.".to_string(),
            requirement: ClauseRequirement::Optional,
            variables: vec![],
            dependencies: vec![],
            incompatible_with: vec![],
            version: 1,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn sample_template() -> Template {
        Template {
            id: Uuid::new_v4(),
            name: "standard".to_string(),
            jurisdiction: None,
            status: TemplateStatus::Draft,
            version: 1,
            parent_version_id: None,
            revision: 0,
            bindings: vec![],
            variables: vec![],
            created_at: Utc::now(),
            published_at: None,
        }
    }

    #[tokio::test]
    async fn template_save_bumps_revision() {
        let store = MemoryTemplateStore::new();
        let tpl = sample_template();
        store.insert_template(&tpl).await.unwrap();

        let saved = store.save_template(&tpl, 0).await.unwrap();
        assert_eq!(saved.revision, 1);
        let saved = store.save_template(&saved, 1).await.unwrap();
        assert_eq!(saved.revision, 2);
    }

    #[tokio::test]
    async fn stale_template_save_rejected() {
        let store = MemoryTemplateStore::new();
        let tpl = sample_template();
        store.insert_template(&tpl).await.unwrap();
        store.save_template(&tpl, 0).await.unwrap();

        // Second writer still holds revision 0.
        let err = store.save_template(&tpl, 0).await.unwrap_err();
        let stale = err.downcast_ref::<StaleRevision>().expect("StaleRevision");
        assert_eq!(stale.expected, 0);
        assert_eq!(stale.found, 1);
    }

    #[tokio::test]
    async fn stale_clause_save_rejected() {
        let store = MemoryClauseStore::new();
        let clause = sample_clause();
        store.insert_clause(&clause).await.unwrap();

        // First editor lands a version bump.
        let mut edited = clause.clone();
        edited.version = 2;
        store.save_clause(&edited, 1).await.unwrap();

        // Second editor still holds version 1.
        let err = store.save_clause(&edited, 1).await.unwrap_err();
        let stale = err.downcast_ref::<StaleRevision>().expect("StaleRevision");
        assert_eq!(stale.expected, 1);
        assert_eq!(stale.found, 2);
    }

    #[tokio::test]
    async fn duplicate_insert_rejected() {
        let store = MemoryTemplateStore::new();
        let tpl = sample_template();
        store.insert_template(&tpl).await.unwrap();
        assert!(store.insert_template(&tpl).await.is_err());
    }
}
