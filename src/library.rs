use crate::error::{EngineError, EngineResult};
use crate::store::{ClauseStore, StaleRevision};
use crate::types::{Clause, ClauseRequirement};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Input for `create_clause`. Arrives pre-validated for shape by the HTTP
/// layer; the library still rejects blank core fields.
#[derive(Clone, Debug, Deserialize)]
pub struct ClauseSpec {
    pub name: String,
    pub title: String,
    pub category: String,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    pub content: String,
    pub requirement: ClauseRequirement,
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<Uuid>,
    #[serde(default)]
    pub incompatible_with: Vec<Uuid>,
}

/// Partial update for `update_clause`. `None` = leave the field alone.
/// Jurisdiction is doubly optional so it can be cleared back to universal.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClausePatch {
    pub name: Option<String>,
    pub title: Option<String>,
    pub category: Option<String>,
    pub jurisdiction: Option<Option<String>>,
    pub content: Option<String>,
    pub requirement: Option<ClauseRequirement>,
    pub variables: Option<Vec<String>>,
    pub dependencies: Option<Vec<Uuid>>,
    pub incompatible_with: Option<Vec<Uuid>>,
    pub is_active: Option<bool>,
}

/// Query filter for `find_clauses`. `is_active: None` means active-only,
/// the catalog's default view; pass `Some(false)` to see retired clauses.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ClauseFilter {
    pub category: Option<String>,
    pub jurisdiction: Option<String>,
    pub requirement: Option<ClauseRequirement>,
    /// Case-insensitive free text over name, title, and content.
    pub search: Option<String>,
    pub is_active: Option<bool>,
}

/// Versioned catalog of reusable clause text. No delete operation exists:
/// retirement is `is_active = false`, and every content edit bumps
/// `version` while keeping `id` stable.
#[derive(Clone)]
pub struct ClauseLibrary {
    store: Arc<dyn ClauseStore>,
}

impl ClauseLibrary {
    pub fn new(store: Arc<dyn ClauseStore>) -> Self {
        Self { store }
    }

    pub async fn create_clause(&self, spec: ClauseSpec) -> EngineResult<Clause> {
        let mut blank = Vec::new();
        for (field, value) in [
            ("name", &spec.name),
            ("title", &spec.title),
            ("content", &spec.content),
        ] {
            if value.trim().is_empty() {
                blank.push(field.to_string());
            }
        }
        if !blank.is_empty() {
            return Err(EngineError::validation(
                format!("blank required fields: {}", blank.join(", ")),
                blank,
            ));
        }

        let now = Utc::now();
        let clause = Clause {
            id: Uuid::new_v4(),
            name: spec.name,
            title: spec.title,
            category: spec.category,
            jurisdiction: spec.jurisdiction,
            content: spec.content,
            requirement: spec.requirement,
            variables: spec.variables,
            dependencies: spec.dependencies,
            incompatible_with: spec.incompatible_with,
            version: 1,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_clause(&clause).await?;
        info!(clause_id = %clause.id, name = %clause.name, "created clause");
        Ok(clause)
    }

    pub async fn get_clause(&self, id: Uuid) -> EngineResult<Clause> {
        self.store
            .load_clause(id)
            .await?
            .ok_or_else(|| EngineError::not_found("clause", id))
    }

    /// Merge `patch` into the clause and bump `version`. The save is CAS on
    /// the pre-bump version, so two racing edits cannot silently overwrite
    /// each other; the loser gets `Conflict`.
    pub async fn update_clause(&self, id: Uuid, patch: ClausePatch) -> EngineResult<Clause> {
        let mut clause = self.get_clause(id).await?;
        let expected = clause.version;

        if let Some(name) = patch.name {
            clause.name = name;
        }
        if let Some(title) = patch.title {
            clause.title = title;
        }
        if let Some(category) = patch.category {
            clause.category = category;
        }
        if let Some(jurisdiction) = patch.jurisdiction {
            clause.jurisdiction = jurisdiction;
        }
        if let Some(content) = patch.content {
            clause.content = content;
        }
        if let Some(requirement) = patch.requirement {
            clause.requirement = requirement;
        }
        if let Some(variables) = patch.variables {
            clause.variables = variables;
        }
        if let Some(dependencies) = patch.dependencies {
            clause.dependencies = dependencies;
        }
        if let Some(incompatible_with) = patch.incompatible_with {
            clause.incompatible_with = incompatible_with;
        }
        if let Some(is_active) = patch.is_active {
            clause.is_active = is_active;
        }
        clause.version = expected + 1;
        clause.updated_at = Utc::now();

        match self.store.save_clause(&clause, expected).await {
            Ok(()) => {
                info!(clause_id = %id, version = clause.version, "updated clause");
                Ok(clause)
            }
            Err(e) if e.downcast_ref::<StaleRevision>().is_some() => Err(EngineError::conflict(
                format!("clause {id} was modified concurrently"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    /// Retire a clause from the active catalog. It stays resolvable by id,
    /// so existing template bindings keep working.
    pub async fn deactivate_clause(&self, id: Uuid) -> EngineResult<Clause> {
        self.update_clause(
            id,
            ClausePatch {
                is_active: Some(false),
                ..ClausePatch::default()
            },
        )
        .await
    }

    pub async fn find_clauses(&self, filter: ClauseFilter) -> EngineResult<Vec<Clause>> {
        let want_active = filter.is_active.unwrap_or(true);
        let search = filter.search.as_deref().map(str::to_lowercase);

        let mut found: Vec<Clause> = self
            .store
            .list_clauses()
            .await?
            .into_iter()
            .filter(|c| c.is_active == want_active)
            .filter(|c| {
                filter
                    .category
                    .as_deref()
                    .is_none_or(|cat| c.category == cat)
            })
            .filter(|c| {
                // None on the clause means universal: it matches any query.
                filter
                    .jurisdiction
                    .as_deref()
                    .is_none_or(|j| c.jurisdiction.as_deref().is_none_or(|cj| cj == j))
            })
            .filter(|c| filter.requirement.is_none_or(|r| c.requirement == r))
            .filter(|c| {
                search.as_deref().is_none_or(|needle| {
                    c.name.to_lowercase().contains(needle)
                        || c.title.to_lowercase().contains(needle)
                        || c.content.to_lowercase().contains(needle)
                })
            })
            .collect();
        found.sort_by(|a, b| a.name.cmp(&b.name));
        debug!(count = found.len(), "clause search");
        Ok(found)
    }
}
