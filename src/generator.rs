use crate::condition::evaluate_all;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::interpolate::interpolate;
use crate::store::{ClauseStore, LeaseStore, TemplateStore};
use crate::types::{
    GeneratedClause, GeneratedLease, LeaseStatus, TemplateStatus, VariableMap,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Turns (active template, variable values) into a persisted, ordered,
/// fully-interpolated lease document. Each call produces one new immutable
/// record; neither the template nor the clause library is touched.
#[derive(Clone)]
pub struct DocumentGenerator {
    templates: Arc<dyn TemplateStore>,
    clauses: Arc<dyn ClauseStore>,
    leases: Arc<dyn LeaseStore>,
    config: EngineConfig,
}

impl DocumentGenerator {
    pub fn new(
        templates: Arc<dyn TemplateStore>,
        clauses: Arc<dyn ClauseStore>,
        leases: Arc<dyn LeaseStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            templates,
            clauses,
            leases,
            config,
        }
    }

    pub async fn generate(
        &self,
        template_id: Uuid,
        values: VariableMap,
    ) -> EngineResult<GeneratedLease> {
        let template = self
            .templates
            .load_template(template_id)
            .await?
            .ok_or_else(|| EngineError::not_found("template", template_id))?;
        if template.status != TemplateStatus::Active {
            return Err(EngineError::precondition(
                format!(
                    "template '{}' is {:?}, only active templates generate",
                    template.name, template.status
                ),
                vec![],
            ));
        }

        // All missing required variables are reported together; generation
        // never partially proceeds.
        let missing: Vec<String> = template
            .variables
            .iter()
            .filter(|v| v.required && !values.contains_key(&v.name))
            .map(|v| v.name.clone())
            .collect();
        if !missing.is_empty() {
            return Err(EngineError::validation(
                format!("missing required variables: {}", missing.join(", ")),
                missing,
            ));
        }

        // Effective map: supplied values win, declared defaults fill the
        // gaps, and names with neither stay absent (which is what makes the
        // evaluator's absent-means-false rule bite).
        let mut effective = values;
        for variable in &template.variables {
            if effective.contains_key(&variable.name) {
                continue;
            }
            if let Some(default) = &variable.default_value {
                effective.insert(variable.name.clone(), default.clone());
            }
        }

        let mut clauses = Vec::new();
        for binding in &template.bindings {
            if !evaluate_all(&binding.conditions, &effective) {
                continue;
            }
            // Content is resolved live from the library unless overridden,
            // so clause edits propagate to every future generation.
            let clause = self
                .clauses
                .load_clause(binding.clause_id)
                .await?
                .ok_or_else(|| EngineError::not_found("clause", binding.clause_id))?;
            let text = binding
                .custom_content
                .as_deref()
                .unwrap_or(&clause.content);
            clauses.push(GeneratedClause {
                clause_id: clause.id,
                title: clause.title,
                content: interpolate(text, &effective, &self.config),
                order: binding.order,
            });
        }

        let content = clauses
            .iter()
            .enumerate()
            .map(|(i, c)| format!("{}. {}\n\n{}", i + 1, c.title, c.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let lease = GeneratedLease {
            id: Uuid::new_v4(),
            template_id,
            template_version: template.version,
            variables: effective,
            clauses,
            content,
            status: LeaseStatus::Draft,
            generated_at: Utc::now(),
        };
        self.leases.insert_lease(&lease).await?;
        info!(
            lease_id = %lease.id,
            template_id = %template_id,
            clause_count = lease.clauses.len(),
            "generated lease"
        );
        Ok(lease)
    }

    pub async fn get_lease(&self, id: Uuid) -> EngineResult<GeneratedLease> {
        self.leases
            .load_lease(id)
            .await?
            .ok_or_else(|| EngineError::not_found("lease", id))
    }

    pub async fn list_leases(
        &self,
        template_id: Option<Uuid>,
    ) -> EngineResult<Vec<GeneratedLease>> {
        Ok(self.leases.list_leases(template_id).await?)
    }
}
