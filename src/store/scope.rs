//! Local read scopes.
//!
//! A `Scope` names the subset of the entity store one synchronized dataset
//! governs: a collection, a record predicate, a display ordering, and an
//! optional section-grouping key. Fetch definitions use their scope both to
//! read records for display and to delete exactly the superseded subset
//! before a fresh write.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::store::Entity;
use crate::utils::cmp_ignore_case;

type PredicateFn = Arc<dyn Fn(&Entity) -> bool + Send + Sync>;
type OrderingFn = Arc<dyn Fn(&Entity, &Entity) -> Ordering + Send + Sync>;
type SectionKeyFn = Arc<dyn Fn(&Entity) -> String + Send + Sync>;

/// Which local records a fetch definition governs.
///
/// Cloning is cheap - the predicate, ordering, and section key are shared.
#[derive(Clone)]
pub struct Scope {
    pub collection: String,
    predicate: Option<PredicateFn>,
    ordering: Option<OrderingFn>,
    section_key: Option<SectionKeyFn>,
}

impl Scope {
    /// Scope over an entire collection, unfiltered and unordered
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            predicate: None,
            ordering: None,
            section_key: None,
        }
    }

    /// Narrow the scope to records matching the predicate
    pub fn filter(mut self, predicate: impl Fn(&Entity) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Narrow the scope to records whose `field` equals `value`.
    /// The common case for parameterized datasets (e.g. one course's tabs).
    pub fn filter_field_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let field = field.into();
        let value = value.into();
        self.filter(move |entity| entity.get(&field) == Some(&value))
    }

    /// Order records with the given comparator
    pub fn order_by(
        mut self,
        ordering: impl Fn(&Entity, &Entity) -> Ordering + Send + Sync + 'static,
    ) -> Self {
        self.ordering = Some(Arc::new(ordering));
        self
    }

    /// Order records by a string field, case-insensitively.
    /// Records missing the field sort last.
    pub fn order_by_str_field(self, field: impl Into<String>) -> Self {
        let field = field.into();
        self.order_by(move |a, b| {
            match (str_field(a, &field), str_field(b, &field)) {
                (Some(a), Some(b)) => cmp_ignore_case(a, b),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            }
        })
    }

    /// Group ordered records into sections keyed by the given function
    pub fn sectioned_by(mut self, key: impl Fn(&Entity) -> String + Send + Sync + 'static) -> Self {
        self.section_key = Some(Arc::new(key));
        self
    }

    /// Does this record fall inside the scope?
    pub fn matches(&self, entity: &Entity) -> bool {
        match &self.predicate {
            Some(predicate) => predicate(entity),
            None => true,
        }
    }

    /// Sort records in display order. A scope without an ordering leaves
    /// the caller-supplied order untouched.
    pub fn sort(&self, records: &mut [Entity]) {
        if let Some(ordering) = &self.ordering {
            records.sort_by(|a, b| ordering(a, b));
        }
    }

    /// Section title for a record, if this scope groups into sections
    pub fn section_title(&self, entity: &Entity) -> Option<String> {
        self.section_key.as_ref().map(|key| key(entity))
    }

    pub fn is_sectioned(&self) -> bool {
        self.section_key.is_some()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("collection", &self.collection)
            .field("filtered", &self.predicate.is_some())
            .field("ordered", &self.ordering.is_some())
            .field("sectioned", &self.section_key.is_some())
            .finish()
    }
}

fn str_field<'a>(entity: &'a Entity, field: &str) -> Option<&'a str> {
    entity.get(field).and_then(Value::as_str)
}
