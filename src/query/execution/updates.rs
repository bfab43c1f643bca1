use crate::query::execution::filters::{to_element_matcher, ElementMatcher};
use crate::query::update::{format_update_path, PullCriterion, UpdateExpr, UpdateOp, UpdatePath, UpdatePathComponent};
use crate::query::PathComponent;
use crate::store::{StoreError, StoreResult};
use crate::util::bson_utils::{add_numeric, bson_eq, cmp_bson, multiply_numeric, BsonArithmeticError};
use bson::{Bson, Document};
use std::cmp::Ordering;
use std::sync::Arc;

/// What the update needs to know about the write it belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UpdateContext {
    /// Index of the array element matched by the selector, used to resolve `$`.
    pub positional_index: Option<usize>,
    /// `true` when the update builds a document that does not exist yet (upsert).
    pub is_insert: bool,
}

pub type Updater = Box<dyn Fn(Document, &UpdateContext) -> StoreResult<Document> + Send + Sync>;

type Operation = Box<dyn Fn(&mut Document, &UpdateContext) -> StoreResult<()> + Send + Sync>;

/// Computes a new value from the current one. `None` leaves the field untouched.
type Mutator = Arc<dyn Fn(Option<&Bson>) -> StoreResult<Option<Bson>> + Send + Sync>;

fn bad_query(reason: impl Into<String>) -> StoreError {
    StoreError::BadQuery(reason.into())
}

/// Compiles an update expression into a function turning the old document into the new one.
pub fn to_updater(update: &UpdateExpr) -> Updater {
    match update {
        UpdateExpr::Replacement(replacement) => {
            let replacement = replacement.clone();
            Box::new(move |doc, _ctx| replace(doc, &replacement))
        }
        UpdateExpr::Operators(ops) => {
            let operations: Vec<Operation> = ops.iter().map(to_operation).collect();
            Box::new(move |mut doc, ctx| {
                let original_id = doc.get("_id").cloned();
                for operation in &operations {
                    operation(&mut doc, ctx)?;
                }
                check_id_unchanged(original_id.as_ref(), doc.get("_id"))?;
                Ok(doc)
            })
        }
    }
}

fn replace(doc: Document, replacement: &Document) -> StoreResult<Document> {
    let mut new_doc = Document::new();
    if let Some(id) = doc.get("_id") {
        check_id_unchanged(Some(id), replacement.get("_id").or(Some(id)))?;
        new_doc.insert("_id", id.clone());
    }
    for (key, value) in replacement {
        if key != "_id" || !new_doc.contains_key("_id") {
            new_doc.insert(key.clone(), value.clone());
        }
    }
    Ok(new_doc)
}

fn check_id_unchanged(before: Option<&Bson>, after: Option<&Bson>) -> StoreResult<()> {
    match (before, after) {
        (Some(before), Some(after)) if bson_eq(before, after) => Ok(()),
        (None, _) => Ok(()),
        _ => Err(bad_query(
            "Performing an update on the path '_id' would modify the immutable field '_id'",
        )),
    }
}

fn to_operation(op: &UpdateOp) -> Operation {
    match op {
        UpdateOp::Set { path, value } => {
            let value = value.clone();
            to_field_level_operation(path.clone(), true, false, Arc::new(move |_: Option<&Bson>| Ok(Some(value.clone()))))
        }
        UpdateOp::SetOnInsert { path, value } => {
            let value = value.clone();
            to_field_level_operation(path.clone(), true, true, Arc::new(move |_: Option<&Bson>| Ok(Some(value.clone()))))
        }
        UpdateOp::Unset { path } => to_unset_operation(path.clone()),
        UpdateOp::Inc { path, amount } => {
            let amount = amount.clone();
            let name = format_update_path(path);
            to_field_level_operation(
                path.clone(),
                true,
                false,
                Arc::new(move |existing: Option<&Bson>| {
                    add_numeric(existing, &amount)
                        .map(Some)
                        .map_err(|e| arithmetic_error("$inc", &name, existing, e))
                }),
            )
        }
        UpdateOp::Mul { path, factor } => {
            let factor = factor.clone();
            let name = format_update_path(path);
            to_field_level_operation(
                path.clone(),
                true,
                false,
                Arc::new(move |existing: Option<&Bson>| {
                    multiply_numeric(existing, &factor)
                        .map(Some)
                        .map_err(|e| arithmetic_error("$mul", &name, existing, e))
                }),
            )
        }
        UpdateOp::Min { path, value } => to_compare_and_set(path.clone(), value.clone(), Ordering::Less),
        UpdateOp::Max { path, value } => to_compare_and_set(path.clone(), value.clone(), Ordering::Greater),
        UpdateOp::Push { path, values } => {
            let values = values.clone();
            to_array_modifier_operation(path.clone(), "$push", true, move |array| {
                array.extend(values.iter().cloned());
            })
        }
        UpdateOp::AddToSet { path, values } => {
            let values = values.clone();
            to_array_modifier_operation(path.clone(), "$addToSet", true, move |array| {
                for value in &values {
                    if !array.iter().any(|existing| bson_eq(existing, value)) {
                        array.push(value.clone());
                    }
                }
            })
        }
        UpdateOp::Pull { path, criterion } => {
            let matcher: ElementMatcher = match criterion {
                PullCriterion::Equals(value) => {
                    let value = value.clone();
                    Box::new(move |elem| bson_eq(elem, &value))
                }
                PullCriterion::Matches(predicates) => to_element_matcher(predicates),
            };
            to_array_modifier_operation(path.clone(), "$pull", false, move |array| {
                array.retain(|elem| !matcher(elem));
            })
        }
    }
}

fn arithmetic_error(operator: &str, path: &str, existing: Option<&Bson>, error: BsonArithmeticError) -> StoreError {
    match error {
        BsonArithmeticError::LhsNotNumeric => bad_query(format!(
            "Cannot apply {} to a value of non-numeric type. The field '{}' has the non-numeric value {}",
            operator,
            path,
            existing.map_or_else(|| "null".to_string(), |v| v.to_string())
        )),
        BsonArithmeticError::RhsNotNumeric => {
            bad_query(format!("Cannot apply {} with a non-numeric argument", operator))
        }
        BsonArithmeticError::Overflow => bad_query(format!(
            "Failed to apply {} operations to current value for the field '{}' (overflow)",
            operator, path
        )),
    }
}

/// `$min` and `$max`: replaces the value when the new one sorts on the `wanted` side.
fn to_compare_and_set(path: UpdatePath, value: Bson, wanted: Ordering) -> Operation {
    to_field_level_operation(
        path,
        true,
        false,
        Arc::new(move |existing: Option<&Bson>| match existing {
            Some(current) if cmp_bson(&value, current) != wanted => Ok(None),
            _ => Ok(Some(value.clone())),
        }),
    )
}

/// Creates an operation that applies the mutator to the value at `path`.
///
/// Missing intermediate documents are created when `create` is set, otherwise the operation
/// is a no-op on documents where the path does not exist. `insert_only` operations run only
/// when the document is being inserted.
fn to_field_level_operation(path: UpdatePath, create: bool, insert_only: bool, mutator: Mutator) -> Operation {
    Box::new(move |doc: &mut Document, ctx: &UpdateContext| {
        if insert_only && !ctx.is_insert {
            return Ok(());
        }
        let path = resolve_path(&path, ctx)?;
        let Some((last, parent_path)) = path.split_last() else {
            return Ok(());
        };

        match walk(Slot::Document(doc), parent_path, last, create)? {
            Some(parent) => parent.apply(last, mutator.as_ref()),
            None => Ok(()),
        }
    })
}

fn to_unset_operation(path: UpdatePath) -> Operation {
    Box::new(move |doc: &mut Document, ctx: &UpdateContext| {
        let path = resolve_path(&path, ctx)?;
        let Some((last, parent_path)) = path.split_last() else {
            return Ok(());
        };

        match walk(Slot::Document(doc), parent_path, last, false)? {
            Some(Slot::Document(parent)) => {
                parent.remove(last.as_key());
            }
            // Unsetting an array element leaves a hole
            Some(Slot::Array(parent)) => {
                if let PathComponent::ArrayElement(index) = last {
                    if let Some(elem) = parent.get_mut(*index) {
                        *elem = Bson::Null;
                    }
                }
            }
            None => {}
        }
        Ok(())
    })
}

/// Creates an operation modifying the array at `path` in place. A missing array is created
/// when `create` is set.
fn to_array_modifier_operation<F>(path: UpdatePath, operator: &'static str, create: bool, modifier: F) -> Operation
where
    F: Fn(&mut Vec<Bson>) + Send + Sync + 'static,
{
    let name = format_update_path(&path);
    to_field_level_operation(
        path,
        create,
        false,
        Arc::new(move |existing: Option<&Bson>| match existing {
            None if !create => Ok(None),
            None => {
                let mut array = Vec::new();
                modifier(&mut array);
                Ok(Some(Bson::Array(array)))
            }
            Some(Bson::Array(current)) => {
                let mut array = current.clone();
                modifier(&mut array);
                Ok(Some(Bson::Array(array)))
            }
            Some(other) => Err(bad_query(format!(
                "Cannot apply {} to a non-array value. The field '{}' is of type {:?}",
                operator,
                name,
                other.element_type()
            ))),
        }),
    )
}

/// Replaces `$` with the array index matched by the selector.
fn resolve_path(path: &UpdatePath, ctx: &UpdateContext) -> StoreResult<Vec<PathComponent>> {
    path.iter()
        .map(|component| match component {
            UpdatePathComponent::FieldName(name) => Ok(PathComponent::FieldName(name.clone())),
            UpdatePathComponent::ArrayElement(index) => Ok(PathComponent::ArrayElement(*index)),
            UpdatePathComponent::FirstMatch => ctx
                .positional_index
                .filter(|_| !ctx.is_insert)
                .map(PathComponent::ArrayElement)
                .ok_or_else(|| bad_query("The positional operator did not find the match needed from the query.")),
        })
        .collect()
}

/// A container a path step can land in.
enum Slot<'a> {
    Document(&'a mut Document),
    Array(&'a mut Vec<Bson>),
}

impl<'a> Slot<'a> {
    fn apply(self, component: &PathComponent, mutator: &(dyn Fn(Option<&Bson>) -> StoreResult<Option<Bson>> + Send + Sync)) -> StoreResult<()> {
        match (self, component) {
            (Slot::Document(doc), component) => {
                let key = component.as_key();
                if let Some(new_value) = mutator(doc.get(&key))? {
                    doc.insert(key, new_value);
                }
            }
            (Slot::Array(array), PathComponent::ArrayElement(index)) => {
                if let Some(new_value) = mutator(array.get(*index))? {
                    if array.len() <= *index {
                        array.resize(*index + 1, Bson::Null);
                    }
                    array[*index] = new_value;
                }
            }
            (Slot::Array(_), PathComponent::FieldName(name)) => {
                return Err(bad_query(format!("Cannot create field '{}' in an array", name)));
            }
        }
        Ok(())
    }
}

/// Walks down `path`, returning the container holding the final component (`last`).
/// Missing documents are created on the way when `create` is set.
fn walk<'a>(slot: Slot<'a>, path: &[PathComponent], last: &PathComponent, create: bool) -> StoreResult<Option<Slot<'a>>> {
    let Some((first, rest)) = path.split_first() else {
        return Ok(Some(slot));
    };

    let child: &'a mut Bson = match slot {
        Slot::Document(doc) => {
            let key = first.as_key();
            if !doc.contains_key(&key) {
                if !create {
                    return Ok(None);
                }
                doc.insert(key.clone(), Document::new());
            }
            match doc.get_mut(&key) {
                Some(child) => child,
                None => return Ok(None),
            }
        }
        Slot::Array(array) => match first {
            PathComponent::ArrayElement(index) => {
                if *index >= array.len() {
                    if !create {
                        return Ok(None);
                    }
                    array.resize(*index + 1, Bson::Null);
                    array[*index] = Bson::Document(Document::new());
                }
                &mut array[*index]
            }
            PathComponent::FieldName(name) => {
                return if create {
                    Err(bad_query(format!("Cannot create field '{}' in an array", name)))
                } else {
                    Ok(None)
                };
            }
        },
    };

    match child {
        Bson::Document(doc) => walk(Slot::Document(doc), rest, last, create),
        Bson::Array(array) => walk(Slot::Array(array), rest, last, create),
        other if create => Err(bad_query(format!(
            "Cannot create field '{}' in element {{{}: {}}}",
            rest.first().unwrap_or(last),
            first,
            other
        ))),
        _ => Ok(None),
    }
}
