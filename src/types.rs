use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

// ─── Variable values ──────────────────────────────────────────

/// A supplied or defaulted variable value. Closed set: anything the
/// interpolator or evaluator would need to special-case is its own variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum VariableValue {
    Text(String),
    Number(Decimal),
    Date(NaiveDate),
    Bool(bool),
}

impl VariableValue {
    /// Raw string form, used by the `Contains` operator. Formatting for
    /// document output lives in `interpolate`, not here.
    pub fn as_text(&self) -> String {
        match self {
            VariableValue::Text(s) => s.clone(),
            VariableValue::Number(n) => n.normalize().to_string(),
            VariableValue::Date(d) => d.to_string(),
            VariableValue::Bool(b) => b.to_string(),
        }
    }

    pub fn as_number(&self) -> Option<Decimal> {
        match self {
            VariableValue::Number(n) => Some(*n),
            _ => None,
        }
    }
}

/// Variable bindings for condition evaluation and interpolation.
/// Key absence is meaningful (see `condition::evaluate`), so this is a plain
/// map rather than a map-with-null-sentinels.
pub type VariableMap = BTreeMap<String, VariableValue>;

// ─── Conditions ───────────────────────────────────────────────

/// Comparison operators for clause-inclusion conditions. Closed enum: an
/// operator name outside this set fails deserialization instead of silently
/// passing the condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    IsTrue,
    IsFalse,
}

/// A single inclusion rule on a clause binding. A binding's conditions are
/// ANDed; there is no OR/NOT composition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: VariableValue,
}

// ─── Clauses ──────────────────────────────────────────────────

/// Library-level requirement flag. `Required` clauses gate template publish.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClauseRequirement {
    Required,
    Optional,
    Conditional,
}

/// A reusable lease-text fragment. `id` is stable across content edits;
/// `version` bumps on every update. Clauses are never deleted, only
/// deactivated, and templates bind them by id — editing `content` changes
/// what every binding template produces from that point forward.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Clause {
    pub id: Uuid,
    pub name: String,
    pub title: String,
    pub category: String,
    /// None = universal (matches every jurisdiction filter).
    pub jurisdiction: Option<String>,
    /// Text with `{{variable}}` placeholders.
    pub content: String,
    pub requirement: ClauseRequirement,
    /// Declared placeholder names. Advisory only.
    pub variables: Vec<String>,
    /// Clause ids expected to co-occur. Advisory, unenforced.
    pub dependencies: Vec<Uuid>,
    /// Clause ids that must not co-occur in one template.
    pub incompatible_with: Vec<Uuid>,
    pub version: u32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ─── Templates ────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateStatus {
    Draft,
    Active,
    Archived,
}

/// A clause's inclusion record within one template.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemplateClauseBinding {
    pub id: Uuid,
    pub clause_id: Uuid,
    /// Rendering position. Ties keep insertion order (stable sort).
    pub order: u32,
    /// Template-local flag, independent of the library's `requirement`.
    pub is_required: bool,
    /// Overrides the bound clause's live content when set.
    pub custom_content: Option<String>,
    pub conditions: Vec<Condition>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    Text,
    Number,
    Date,
    Boolean,
}

/// A variable a template declares for generation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemplateVariable {
    pub name: String,
    pub var_type: VariableType,
    pub required: bool,
    pub default_value: Option<VariableValue>,
    /// Advisory validation pattern, carried as data for outer layers.
    pub validation: Option<String>,
}

/// A named, ordered composition of clause bindings.
///
/// `version` is lineage (1 on create and on clone, `parent_version_id`
/// pointing at the clone source). `revision` is the storage compare-and-swap
/// token, bumped by the store on every successful save; it has no business
/// meaning.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub name: String,
    pub jurisdiction: Option<String>,
    pub status: TemplateStatus,
    pub version: u32,
    pub parent_version_id: Option<Uuid>,
    pub revision: u64,
    pub bindings: Vec<TemplateClauseBinding>,
    pub variables: Vec<TemplateVariable>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
}

impl Template {
    pub fn bound_clause_ids(&self) -> HashSet<Uuid> {
        self.bindings.iter().map(|b| b.clause_id).collect()
    }

    /// Stable re-sort by `order`; tied bindings keep insertion order.
    pub fn sort_bindings(&mut self) {
        self.bindings.sort_by_key(|b| b.order);
    }
}

// ─── Generated leases ─────────────────────────────────────────

/// Snapshot lifecycle. Only `Draft` is produced by this engine; the later
/// states are driven by signature/review collaborators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaseStatus {
    Draft,
    PendingReview,
    PendingSignature,
    Signed,
    Expired,
    Terminated,
}

/// One resolved, interpolated clause inside a generated lease.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneratedClause {
    pub clause_id: Uuid,
    pub title: String,
    pub content: String,
    pub order: u32,
}

/// An immutable generation snapshot. A changed template or changed variables
/// produces a new record; nothing re-runs generation in place.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneratedLease {
    pub id: Uuid,
    pub template_id: Uuid,
    /// The template's `version` at generation time, never re-resolved.
    pub template_version: u32,
    pub variables: VariableMap,
    pub clauses: Vec<GeneratedClause>,
    pub content: String,
    pub status: LeaseStatus,
    pub generated_at: DateTime<Utc>,
}
