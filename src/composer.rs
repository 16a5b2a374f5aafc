use crate::error::{EngineError, EngineResult};
use crate::store::{ClauseStore, StaleRevision, TemplateStore};
use crate::types::{
    Clause, ClauseRequirement, Condition, Template, TemplateClauseBinding, TemplateStatus,
    TemplateVariable,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Reload-and-reapply attempts for CAS-contended template saves before the
/// operation gives up with `Conflict`.
const MAX_CAS_RETRIES: usize = 8;

#[derive(Clone, Debug, Deserialize)]
pub struct TemplateSpec {
    pub name: String,
    #[serde(default)]
    pub jurisdiction: Option<String>,
    #[serde(default)]
    pub variables: Vec<TemplateVariable>,
}

/// Partial update for templates in Draft or Active state.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TemplatePatch {
    pub name: Option<String>,
    pub jurisdiction: Option<Option<String>>,
    pub variables: Option<Vec<TemplateVariable>>,
}

/// Options for `attach_clause`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AttachOptions {
    /// Rendering position; defaults to end-of-list.
    pub order: Option<u32>,
    #[serde(default)]
    pub is_required: bool,
    #[serde(default)]
    pub custom_content: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Owns a template's ordered clause bindings, the incompatibility check on
/// attach, and the Draft → Active → Archived lifecycle.
///
/// Mutations are read-modify-write with a CAS save on the template's
/// storage revision, retried a bounded number of times, so concurrent
/// attaches serialize instead of losing updates.
#[derive(Clone)]
pub struct TemplateComposer {
    templates: Arc<dyn TemplateStore>,
    clauses: Arc<dyn ClauseStore>,
}

impl TemplateComposer {
    pub fn new(templates: Arc<dyn TemplateStore>, clauses: Arc<dyn ClauseStore>) -> Self {
        Self { templates, clauses }
    }

    pub async fn create_template(&self, spec: TemplateSpec) -> EngineResult<Template> {
        if spec.name.trim().is_empty() {
            return Err(EngineError::validation(
                "blank required fields: name",
                vec!["name".to_string()],
            ));
        }
        let template = Template {
            id: Uuid::new_v4(),
            name: spec.name,
            jurisdiction: spec.jurisdiction,
            status: TemplateStatus::Draft,
            version: 1,
            parent_version_id: None,
            revision: 0,
            bindings: vec![],
            variables: spec.variables,
            created_at: Utc::now(),
            published_at: None,
        };
        self.templates.insert_template(&template).await?;
        info!(template_id = %template.id, name = %template.name, "created template");
        Ok(template)
    }

    pub async fn get_template(&self, id: Uuid) -> EngineResult<Template> {
        self.templates
            .load_template(id)
            .await?
            .ok_or_else(|| EngineError::not_found("template", id))
    }

    /// Bind a clause to a template.
    ///
    /// Only the incoming clause's `incompatible_with` list is checked
    /// against the already-bound set — the check is one-directional on
    /// purpose (already-bound clauses declaring the newcomer incompatible
    /// do not block it). Pinned by the asymmetric-incompatibility tests.
    pub async fn attach_clause(
        &self,
        template_id: Uuid,
        clause_id: Uuid,
        opts: AttachOptions,
    ) -> EngineResult<Template> {
        let clause = self
            .clauses
            .load_clause(clause_id)
            .await?
            .ok_or_else(|| EngineError::not_found("clause", clause_id))?;

        // Resolve names for the clauses this one declares incompatible, so a
        // rejection can name both sides.
        let mut incompatible_names = std::collections::HashMap::new();
        for &other_id in &clause.incompatible_with {
            if let Some(other) = self.clauses.load_clause(other_id).await? {
                incompatible_names.insert(other_id, other.name);
            }
        }

        self.mutate(template_id, |tpl| {
            let bound = tpl.bound_clause_ids();
            if bound.contains(&clause_id) {
                return Err(EngineError::conflict(format!(
                    "clause '{}' is already attached to template '{}'",
                    clause.name, tpl.name
                )));
            }
            if let Some(&other_id) = clause
                .incompatible_with
                .iter()
                .find(|id| bound.contains(*id))
            {
                let other_name = incompatible_names
                    .get(&other_id)
                    .cloned()
                    .unwrap_or_else(|| other_id.to_string());
                return Err(EngineError::conflict(format!(
                    "clause '{}' is incompatible with bound clause '{other_name}'",
                    clause.name
                )));
            }

            let order = opts.order.unwrap_or_else(|| {
                tpl.bindings
                    .iter()
                    .map(|b| b.order.saturating_add(1))
                    .max()
                    .unwrap_or(0)
            });
            tpl.bindings.push(TemplateClauseBinding {
                id: Uuid::new_v4(),
                clause_id,
                order,
                is_required: opts.is_required,
                custom_content: opts.custom_content.clone(),
                conditions: opts.conditions.clone(),
            });
            tpl.sort_bindings();
            Ok(())
        })
        .await
        .inspect(|tpl| {
            info!(template_id = %tpl.id, clause_id = %clause_id, "attached clause");
        })
    }

    pub async fn detach_clause(
        &self,
        template_id: Uuid,
        clause_id: Uuid,
    ) -> EngineResult<Template> {
        self.mutate(template_id, |tpl| {
            let idx = tpl
                .bindings
                .iter()
                .position(|b| b.clause_id == clause_id)
                .ok_or_else(|| EngineError::not_found("binding", clause_id))?;
            tpl.bindings.remove(idx);
            Ok(())
        })
        .await
        .inspect(|tpl| {
            info!(template_id = %tpl.id, clause_id = %clause_id, "detached clause");
        })
    }

    pub async fn update_template(
        &self,
        template_id: Uuid,
        patch: TemplatePatch,
    ) -> EngineResult<Template> {
        self.mutate(template_id, |tpl| {
            if let Some(name) = patch.name.clone() {
                tpl.name = name;
            }
            if let Some(jurisdiction) = patch.jurisdiction.clone() {
                tpl.jurisdiction = jurisdiction;
            }
            if let Some(variables) = patch.variables.clone() {
                tpl.variables = variables;
            }
            Ok(())
        })
        .await
    }

    /// Draft → Active. Fails with `PreconditionFailed` listing the names of
    /// every active library clause flagged `Required` that the template
    /// does not bind. The check runs only here — clauses flagged required
    /// later never retroactively invalidate an already-published template.
    pub async fn publish(&self, template_id: Uuid) -> EngineResult<Template> {
        let required: Vec<Clause> = self
            .clauses
            .list_clauses()
            .await?
            .into_iter()
            .filter(|c| c.is_active && c.requirement == ClauseRequirement::Required)
            .collect();

        self.mutate(template_id, |tpl| {
            if tpl.status != TemplateStatus::Draft {
                return Err(EngineError::precondition(
                    format!("template '{}' is {:?}, only drafts publish", tpl.name, tpl.status),
                    vec![],
                ));
            }
            let bound = tpl.bound_clause_ids();
            let mut missing: Vec<String> = required
                .iter()
                .filter(|c| !bound.contains(&c.id))
                .map(|c| c.name.clone())
                .collect();
            missing.sort();
            if !missing.is_empty() {
                return Err(EngineError::precondition(
                    format!("missing required clauses: {}", missing.join(", ")),
                    missing,
                ));
            }
            tpl.status = TemplateStatus::Active;
            tpl.published_at = Some(Utc::now());
            Ok(())
        })
        .await
        .inspect(|tpl| {
            info!(template_id = %tpl.id, "published template");
        })
    }

    /// Draft/Active → Archived. Terminal: nothing leaves Archived.
    pub async fn archive(&self, template_id: Uuid) -> EngineResult<Template> {
        self.mutate_any_status(template_id, |tpl| {
            if tpl.status == TemplateStatus::Archived {
                return Err(EngineError::precondition(
                    format!("template '{}' is already archived", tpl.name),
                    vec![],
                ));
            }
            tpl.status = TemplateStatus::Archived;
            Ok(())
        })
        .await
        .inspect(|tpl| {
            info!(template_id = %tpl.id, "archived template");
        })
    }

    /// New Draft with fresh identity and `parent_version_id` lineage back
    /// to the source. Bindings get fresh ids but keep the same clause-id
    /// references — clause content is never copied.
    pub async fn clone_template(
        &self,
        template_id: Uuid,
        new_name: impl Into<String>,
    ) -> EngineResult<Template> {
        let source = self.get_template(template_id).await?;
        let clone = Template {
            id: Uuid::new_v4(),
            name: new_name.into(),
            jurisdiction: source.jurisdiction.clone(),
            status: TemplateStatus::Draft,
            version: 1,
            parent_version_id: Some(source.id),
            revision: 0,
            bindings: source
                .bindings
                .iter()
                .map(|b| TemplateClauseBinding {
                    id: Uuid::new_v4(),
                    ..b.clone()
                })
                .collect(),
            variables: source.variables.clone(),
            created_at: Utc::now(),
            published_at: None,
        };
        self.templates.insert_template(&clone).await?;
        info!(template_id = %clone.id, parent = %source.id, "cloned template");
        Ok(clone)
    }

    /// Read-modify-write with CAS retry for structural edits, which are
    /// only legal while the template is Draft or Active.
    async fn mutate<F>(&self, template_id: Uuid, apply: F) -> EngineResult<Template>
    where
        F: Fn(&mut Template) -> EngineResult<()>,
    {
        self.mutate_inner(template_id, apply, false).await
    }

    /// Same loop without the archived guard, for lifecycle transitions
    /// that must inspect Archived themselves.
    async fn mutate_any_status<F>(&self, template_id: Uuid, apply: F) -> EngineResult<Template>
    where
        F: Fn(&mut Template) -> EngineResult<()>,
    {
        self.mutate_inner(template_id, apply, true).await
    }

    async fn mutate_inner<F>(
        &self,
        template_id: Uuid,
        apply: F,
        allow_archived: bool,
    ) -> EngineResult<Template>
    where
        F: Fn(&mut Template) -> EngineResult<()>,
    {
        for attempt in 0..MAX_CAS_RETRIES {
            let mut tpl = self.get_template(template_id).await?;
            if !allow_archived && tpl.status == TemplateStatus::Archived {
                return Err(EngineError::precondition(
                    format!("template '{}' is archived", tpl.name),
                    vec![],
                ));
            }
            let expected = tpl.revision;
            apply(&mut tpl)?;
            match self.templates.save_template(&tpl, expected).await {
                Ok(saved) => return Ok(saved),
                Err(e) if e.downcast_ref::<StaleRevision>().is_some() => {
                    warn!(template_id = %template_id, attempt, "CAS contention, retrying");
                    continue;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(EngineError::conflict(format!(
            "template {template_id} kept changing concurrently"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::{ClauseLibrary, ClauseSpec};
    use crate::store::{MemoryClauseStore, MemoryTemplateStore};

    struct Fixture {
        library: ClauseLibrary,
        composer: TemplateComposer,
    }

    fn fixture() -> Fixture {
        let clauses = Arc::new(MemoryClauseStore::new());
        let templates = Arc::new(MemoryTemplateStore::new());
        Fixture {
            library: ClauseLibrary::new(clauses.clone()),
            composer: TemplateComposer::new(templates, clauses),
        }
    }

    fn clause_spec(name: &str, requirement: ClauseRequirement) -> ClauseSpec {
        ClauseSpec {
            name: name.to_string(),
            title: format!("{name} title"),
            category: "general".to_string(),
            jurisdiction: None,
            content: format!("{name} text"),
            requirement,
            variables: vec![],
            dependencies: vec![],
            incompatible_with: vec![],
        }
    }

    fn template_spec(name: &str) -> TemplateSpec {
        TemplateSpec {
            name: name.to_string(),
            jurisdiction: None,
            variables: vec![],
        }
    }

    #[tokio::test]
    async fn attach_appends_at_end_and_sorts_by_order() {
        let f = fixture();
        let a = f
            .library
            .create_clause(clause_spec("a", ClauseRequirement::Optional))
            .await
            .unwrap();
        let b = f
            .library
            .create_clause(clause_spec("b", ClauseRequirement::Optional))
            .await
            .unwrap();
        let c = f
            .library
            .create_clause(clause_spec("c", ClauseRequirement::Optional))
            .await
            .unwrap();
        let tpl = f.composer.create_template(template_spec("t")).await.unwrap();

        f.composer
            .attach_clause(tpl.id, a.id, AttachOptions::default())
            .await
            .unwrap();
        f.composer
            .attach_clause(tpl.id, b.id, AttachOptions::default())
            .await
            .unwrap();
        // Explicit order 0 sorts ahead of the defaults.
        let tpl = f
            .composer
            .attach_clause(
                tpl.id,
                c.id,
                AttachOptions {
                    order: Some(0),
                    ..AttachOptions::default()
                },
            )
            .await
            .unwrap();

        let ids: Vec<Uuid> = tpl.bindings.iter().map(|b| b.clause_id).collect();
        assert_eq!(ids, vec![c.id, a.id, b.id]);
    }

    #[tokio::test]
    async fn incompatibility_check_is_asymmetric() {
        let f = fixture();
        let b = f
            .library
            .create_clause(clause_spec("b", ClauseRequirement::Optional))
            .await
            .unwrap();
        let mut a_spec = clause_spec("a", ClauseRequirement::Optional);
        a_spec.incompatible_with = vec![b.id];
        let a = f.library.create_clause(a_spec).await.unwrap();

        // B then A: A's list names B, which is already bound → conflict.
        let t1 = f.composer.create_template(template_spec("t1")).await.unwrap();
        f.composer
            .attach_clause(t1.id, b.id, AttachOptions::default())
            .await
            .unwrap();
        let err = f
            .composer
            .attach_clause(t1.id, a.id, AttachOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));

        // A then B: B declares nothing, and A's list is not consulted for
        // newcomers. Succeeds — the documented one-directional gap.
        let t2 = f.composer.create_template(template_spec("t2")).await.unwrap();
        f.composer
            .attach_clause(t2.id, a.id, AttachOptions::default())
            .await
            .unwrap();
        let t2 = f
            .composer
            .attach_clause(t2.id, b.id, AttachOptions::default())
            .await
            .unwrap();
        assert_eq!(t2.bindings.len(), 2);
    }

    #[tokio::test]
    async fn duplicate_attach_conflicts_and_detach_removes() {
        let f = fixture();
        let a = f
            .library
            .create_clause(clause_spec("a", ClauseRequirement::Optional))
            .await
            .unwrap();
        let tpl = f.composer.create_template(template_spec("t")).await.unwrap();
        f.composer
            .attach_clause(tpl.id, a.id, AttachOptions::default())
            .await
            .unwrap();

        let err = f
            .composer
            .attach_clause(tpl.id, a.id, AttachOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict { .. }));

        let tpl = f.composer.detach_clause(tpl.id, a.id).await.unwrap();
        assert!(tpl.bindings.is_empty());

        let err = f.composer.detach_clause(tpl.id, a.id).await.unwrap_err();
        assert!(matches!(err, EngineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn publish_requires_all_required_clauses() {
        let f = fixture();
        let required = f
            .library
            .create_clause(clause_spec("parties", ClauseRequirement::Required))
            .await
            .unwrap();
        let optional = f
            .library
            .create_clause(clause_spec("pets", ClauseRequirement::Optional))
            .await
            .unwrap();
        let tpl = f.composer.create_template(template_spec("t")).await.unwrap();
        f.composer
            .attach_clause(tpl.id, optional.id, AttachOptions::default())
            .await
            .unwrap();

        let err = f.composer.publish(tpl.id).await.unwrap_err();
        match err {
            EngineError::PreconditionFailed { missing, .. } => {
                assert_eq!(missing, vec!["parties".to_string()]);
            }
            other => panic!("expected PreconditionFailed, got {other:?}"),
        }

        f.composer
            .attach_clause(tpl.id, required.id, AttachOptions::default())
            .await
            .unwrap();
        let tpl = f.composer.publish(tpl.id).await.unwrap();
        assert_eq!(tpl.status, TemplateStatus::Active);
        assert!(tpl.published_at.is_some());
    }

    #[tokio::test]
    async fn later_required_clause_does_not_invalidate_published_template() {
        let f = fixture();
        let tpl = f.composer.create_template(template_spec("t")).await.unwrap();
        let tpl = f.composer.publish(tpl.id).await.unwrap();
        assert_eq!(tpl.status, TemplateStatus::Active);

        // New required clause arrives after publish. The published template
        // stays Active; only the next publish attempt would see it.
        f.library
            .create_clause(clause_spec("late_rule", ClauseRequirement::Required))
            .await
            .unwrap();
        let reloaded = f.composer.get_template(tpl.id).await.unwrap();
        assert_eq!(reloaded.status, TemplateStatus::Active);
    }

    #[tokio::test]
    async fn inactive_required_clauses_do_not_gate_publish() {
        let f = fixture();
        let retired = f
            .library
            .create_clause(clause_spec("retired_rule", ClauseRequirement::Required))
            .await
            .unwrap();
        f.library.deactivate_clause(retired.id).await.unwrap();

        let tpl = f.composer.create_template(template_spec("t")).await.unwrap();
        let tpl = f.composer.publish(tpl.id).await.unwrap();
        assert_eq!(tpl.status, TemplateStatus::Active);
    }

    #[tokio::test]
    async fn archived_is_terminal() {
        let f = fixture();
        let tpl = f.composer.create_template(template_spec("t")).await.unwrap();
        let tpl = f.composer.archive(tpl.id).await.unwrap();
        assert_eq!(tpl.status, TemplateStatus::Archived);

        assert!(matches!(
            f.composer.archive(tpl.id).await.unwrap_err(),
            EngineError::PreconditionFailed { .. }
        ));
        assert!(matches!(
            f.composer.publish(tpl.id).await.unwrap_err(),
            EngineError::PreconditionFailed { .. }
        ));
        let a = f
            .library
            .create_clause(clause_spec("a", ClauseRequirement::Optional))
            .await
            .unwrap();
        assert!(matches!(
            f.composer
                .attach_clause(tpl.id, a.id, AttachOptions::default())
                .await
                .unwrap_err(),
            EngineError::PreconditionFailed { .. }
        ));
    }

    #[tokio::test]
    async fn clone_gets_fresh_ids_and_lineage() {
        let f = fixture();
        let a = f
            .library
            .create_clause(clause_spec("a", ClauseRequirement::Optional))
            .await
            .unwrap();
        let tpl = f.composer.create_template(template_spec("t")).await.unwrap();
        let tpl = f
            .composer
            .attach_clause(tpl.id, a.id, AttachOptions::default())
            .await
            .unwrap();
        let tpl = f.composer.publish(tpl.id).await.unwrap();

        let clone = f.composer.clone_template(tpl.id, "t v2").await.unwrap();
        assert_ne!(clone.id, tpl.id);
        assert_eq!(clone.parent_version_id, Some(tpl.id));
        assert_eq!(clone.status, TemplateStatus::Draft);
        assert_eq!(clone.version, 1);
        assert_eq!(clone.bindings.len(), 1);
        assert_ne!(clone.bindings[0].id, tpl.bindings[0].id);
        assert_eq!(clone.bindings[0].clause_id, a.id);
    }

    #[tokio::test]
    async fn default_order_saturates_at_max() {
        let f = fixture();
        let a = f
            .library
            .create_clause(clause_spec("a", ClauseRequirement::Optional))
            .await
            .unwrap();
        let b = f
            .library
            .create_clause(clause_spec("b", ClauseRequirement::Optional))
            .await
            .unwrap();
        let tpl = f.composer.create_template(template_spec("t")).await.unwrap();

        f.composer
            .attach_clause(
                tpl.id,
                a.id,
                AttachOptions {
                    order: Some(u32::MAX),
                    ..AttachOptions::default()
                },
            )
            .await
            .unwrap();
        // End-of-list default cannot run past u32::MAX; the tie stays at
        // the ceiling and sorts after the earlier binding (stable sort).
        let tpl = f
            .composer
            .attach_clause(tpl.id, b.id, AttachOptions::default())
            .await
            .unwrap();
        assert_eq!(tpl.bindings.len(), 2);
        assert_eq!(tpl.bindings[1].clause_id, b.id);
        assert_eq!(tpl.bindings[1].order, u32::MAX);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_attaches_all_land() {
        let f = fixture();
        let tpl = f.composer.create_template(template_spec("t")).await.unwrap();

        let mut clause_ids = Vec::new();
        for name in ["a", "b", "c", "d"] {
            let c = f
                .library
                .create_clause(clause_spec(name, ClauseRequirement::Optional))
                .await
                .unwrap();
            clause_ids.push(c.id);
        }

        let mut handles = Vec::new();
        for clause_id in clause_ids.clone() {
            let composer = f.composer.clone();
            let template_id = tpl.id;
            handles.push(tokio::spawn(async move {
                composer
                    .attach_clause(template_id, clause_id, AttachOptions::default())
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let tpl = f.composer.get_template(tpl.id).await.unwrap();
        assert_eq!(tpl.bindings.len(), 4);
        let bound = tpl.bound_clause_ids();
        for id in clause_ids {
            assert!(bound.contains(&id));
        }
    }
}
