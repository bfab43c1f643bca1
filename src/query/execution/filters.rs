use crate::query::{collect_path_values, lookup, BsonValueRef, ComparisonOperator, Expr, PathComponent};
use crate::util::bson_utils::{bson_eq, cmp_bson};
use bson::{Bson, Document};
use std::cmp::Ordering;
use std::mem::discriminant;
use std::sync::Arc;

pub type DocumentFilter = Box<dyn Fn(&Document) -> bool + Send + Sync>;

/// A value filter receives every value a field path resolves to (`None` for the branches
/// where the path is missing).
type ValueFilter = Box<dyn Fn(&[Option<BsonValueRef<'_>>]) -> bool + Send + Sync>;

pub type ElementMatcher = Box<dyn Fn(&Bson) -> bool + Send + Sync>;

fn is_number(value: &Bson) -> bool {
    matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_))
}

/// Range operators only compare values of the same type family.
fn comparable(a: &Bson, b: &Bson) -> bool {
    (is_number(a) && is_number(b)) || discriminant(a) == discriminant(b)
}

/// Compares a document value against the operand without looking inside arrays.
fn compare_scalar(operator: ComparisonOperator, operand: &Bson, value: &Bson) -> bool {
    match operator {
        ComparisonOperator::Eq => bson_eq(value, operand),
        ComparisonOperator::Ne => !bson_eq(value, operand),
        ComparisonOperator::In => match operand {
            Bson::Array(items) => items.iter().any(|item| bson_eq(value, item)),
            _ => false,
        },
        ComparisonOperator::Nin => match operand {
            Bson::Array(items) => !items.iter().any(|item| bson_eq(value, item)),
            _ => true,
        },
        ComparisonOperator::Gt
        | ComparisonOperator::Gte
        | ComparisonOperator::Lt
        | ComparisonOperator::Lte => {
            if !comparable(value, operand) {
                return false;
            }
            let ordering = cmp_bson(value, operand);
            match operator {
                ComparisonOperator::Gt => ordering == Ordering::Greater,
                ComparisonOperator::Gte => ordering != Ordering::Less,
                ComparisonOperator::Lt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            }
        }
    }
}

/// Compares one resolved value. Arrays match either as a whole or through any element.
/// A missing value behaves like `null` for equality.
fn compare_value(operator: ComparisonOperator, operand: &Bson, value: Option<BsonValueRef>) -> bool {
    match value {
        None => compare_scalar(operator, operand, &Bson::Null),
        Some(BsonValueRef(value)) => {
            compare_scalar(operator, operand, value)
                || match value {
                    Bson::Array(elements) => elements.iter().any(|elem| compare_scalar(operator, operand, elem)),
                    _ => false,
                }
        }
    }
}

/// Converts a value filter expression into a function applied to the values of a field.
fn to_value_filter(filter: &Arc<Expr>) -> ValueFilter {
    match filter.as_ref() {
        // `$ne` and `$nin` hold when no value satisfies the positive form.
        Expr::Comparison { operator: ComparisonOperator::Ne, value } => {
            let operand = value.to_bson();
            Box::new(move |values| {
                !values.iter().any(|v| compare_value(ComparisonOperator::Eq, &operand, *v))
            })
        }
        Expr::Comparison { operator: ComparisonOperator::Nin, value } => {
            let operand = value.to_bson();
            Box::new(move |values| {
                !values.iter().any(|v| compare_value(ComparisonOperator::In, &operand, *v))
            })
        }
        Expr::Comparison { operator, value } => {
            let operator = *operator;
            let operand = value.to_bson();
            Box::new(move |values| values.iter().any(|v| compare_value(operator, &operand, *v)))
        }
        Expr::Exists(true) => Box::new(|values| values.iter().any(Option::is_some)),
        Expr::Exists(false) => Box::new(|values| values.iter().all(Option::is_none)),
        Expr::Size(size) => {
            let size = *size;
            Box::new(move |values| {
                values
                    .iter()
                    .any(|v| matches!(v, Some(BsonValueRef(Bson::Array(a))) if a.len() == size))
            })
        }
        Expr::All(expected) => {
            let expected = expected.clone();
            Box::new(move |values| {
                !expected.is_empty()
                    && values.iter().flatten().any(|v| {
                        expected
                            .iter()
                            .all(|e| compare_value(ComparisonOperator::Eq, e, Some(*v)))
                    })
            })
        }
        // Implements `$elemMatch`: at least one element of an array satisfies every predicate.
        Expr::ElemMatch(predicates) => {
            let matcher = to_element_matcher(predicates);
            Box::new(move |values| {
                values.iter().any(|v| match v {
                    Some(BsonValueRef(Bson::Array(elements))) => elements.iter().any(|e| matcher(e)),
                    _ => false,
                })
            })
        }
        Expr::Not(predicates) => {
            let filters = to_value_filters(predicates);
            Box::new(move |values| !filters.iter().all(|f| f(values)))
        }
        _ => panic!("Unsupported value filter: {:?}", filter),
    }
}

fn to_value_filters(filters: &[Arc<Expr>]) -> Vec<ValueFilter> {
    filters.iter().map(to_value_filter).collect()
}

/// Builds the predicate applied to a single array element by `$elemMatch` or `$pull`.
pub fn to_element_matcher(predicates: &[Arc<Expr>]) -> ElementMatcher {
    let is_document_level = predicates.first().map_or(false, |p| p.is_document_level());

    if is_document_level {
        let filters = to_filters(predicates);
        Box::new(move |elem| match elem {
            Bson::Document(sub_doc) => filters.iter().all(|f| f(sub_doc)),
            _ => false,
        })
    } else {
        let filters = to_value_filters(predicates);
        Box::new(move |elem| {
            let values = [Some(BsonValueRef(elem))];
            filters.iter().all(|f| f(&values[..]))
        })
    }
}

/// Resolves every value `path` reaches in `doc`.
fn path_values<'a>(doc: &'a Document, path: &[PathComponent]) -> Vec<Option<BsonValueRef<'a>>> {
    let mut values = Vec::new();
    match path.split_first().and_then(|(first, rest)| lookup(doc, first).map(|v| (v, rest))) {
        Some((value, rest)) => collect_path_values(value, rest, &mut values),
        None => values.push(None),
    }
    values
}

/// Compiles an expression into a filter function that can be applied to documents.
pub fn to_filter(expr: &Arc<Expr>) -> DocumentFilter {
    match expr.as_ref() {
        Expr::And(children) => {
            let children_filters = to_filters(children);
            Box::new(move |doc: &Document| children_filters.iter().all(|f| f(doc)))
        }
        Expr::Or(children) => {
            let children_filters = to_filters(children);
            Box::new(move |doc: &Document| children_filters.iter().any(|f| f(doc)))
        }
        Expr::Nor(children) => {
            let children_filters = to_filters(children);
            Box::new(move |doc: &Document| !children_filters.iter().any(|f| f(doc)))
        }
        Expr::AlwaysTrue => Box::new(|_| true),
        Expr::FieldFilters { path, filters } => {
            let path = path.clone();
            let value_filters = to_value_filters(filters);
            Box::new(move |doc: &Document| {
                let values = path_values(doc, &path);
                value_filters.iter().all(|f| f(values.as_slice()))
            })
        }
        _ => panic!("Unsupported document filter: {:?}", expr),
    }
}

fn to_filters(filters: &[Arc<Expr>]) -> Vec<DocumentFilter> {
    filters.iter().map(to_filter).collect()
}

/// Returns the index of the first array element matched by the query, which is the element
/// the positional update operator (`$`) designates. Only the top-level conjunction is
/// considered; the first field crossing an array decides.
pub fn positional_index(expr: &Expr, doc: &Document) -> Option<usize> {
    match expr {
        Expr::And(children) => children.iter().find_map(|c| positional_index(c, doc)),
        Expr::FieldFilters { path, filters } => {
            let (elements, remaining) = find_positional_array(doc, path)?;
            let matchers: Vec<ElementMatcher> = filters
                .iter()
                .map(|f| to_positional_matcher(f, remaining))
                .collect();
            elements.iter().position(|elem| matchers.iter().all(|m| m(elem)))
        }
        _ => None,
    }
}

/// Walks `path` down to the first array that is traversed implicitly, returning it with the
/// rest of the path.
fn find_positional_array<'a, 'p>(
    doc: &'a Document,
    path: &'p [PathComponent],
) -> Option<(&'a Vec<Bson>, &'p [PathComponent])> {
    let (first, mut remaining) = path.split_first()?;
    let mut current = lookup(doc, first)?;

    loop {
        match current {
            Bson::Array(elements) => match remaining.split_first() {
                Some((PathComponent::ArrayElement(index), rest)) => {
                    current = elements.get(*index)?;
                    remaining = rest;
                }
                _ => return Some((elements, remaining)),
            },
            Bson::Document(sub_doc) => {
                let (next, rest) = remaining.split_first()?;
                current = lookup(sub_doc, next)?;
                remaining = rest;
            }
            _ => return None,
        }
    }
}

fn to_positional_matcher(filter: &Arc<Expr>, remaining: &[PathComponent]) -> ElementMatcher {
    match filter.as_ref() {
        Expr::ElemMatch(predicates) if remaining.is_empty() => to_element_matcher(predicates),
        _ => {
            let remaining = remaining.to_vec();
            let value_filter = to_value_filter(filter);
            Box::new(move |elem| {
                let mut values = Vec::new();
                collect_path_values(elem, &remaining, &mut values);
                value_filter(values.as_slice())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::parse_conditions;
    use bson::doc;

    fn matches(query: Document, doc: &Document) -> bool {
        let filter = to_filter(&parse_conditions(&query).unwrap());
        filter(doc)
    }

    fn positional(query: Document, doc: &Document) -> Option<usize> {
        positional_index(&parse_conditions(&query).unwrap(), doc)
    }

    #[test]
    fn test_comparisons() {
        let doc = doc! { "a": 5, "s": "abc", "n": null };

        assert!(matches(doc! { "a": 5 }, &doc));
        assert!(matches(doc! { "a": 5.0 }, &doc));
        assert!(matches(doc! { "a": { "$gt": 4, "$lte": 5 } }, &doc));
        assert!(!matches(doc! { "a": { "$lt": 5 } }, &doc));
        assert!(matches(doc! { "a": { "$in": [1, 5] } }, &doc));
        assert!(matches(doc! { "a": { "$nin": [1, 2] } }, &doc));
        assert!(matches(doc! { "a": { "$ne": 6 } }, &doc));
        // Range operators do not cross types
        assert!(!matches(doc! { "s": { "$gt": 1 } }, &doc));
        assert!(matches(doc! { "s": { "$gt": "abb" } }, &doc));
    }

    #[test]
    fn test_missing_fields_and_null() {
        let doc = doc! { "n": null };

        assert!(matches(doc! { "missing": null }, &doc));
        assert!(matches(doc! { "n": null }, &doc));
        assert!(!matches(doc! { "missing": { "$ne": null } }, &doc));
        assert!(matches(doc! { "missing": { "$exists": false } }, &doc));
        assert!(matches(doc! { "n": { "$exists": true } }, &doc));
        assert!(!matches(doc! { "missing": { "$gt": 1 } }, &doc));
    }

    #[test]
    fn test_arrays() {
        let doc = doc! {
            "tags": ["a", "b"],
            "items": [{ "sku": "x", "qty": 1 }, { "sku": "y", "qty": 5 }],
        };

        assert!(matches(doc! { "tags": "a" }, &doc));
        assert!(matches(doc! { "tags": ["a", "b"] }, &doc));
        assert!(!matches(doc! { "tags": { "$ne": "a" } }, &doc));
        assert!(matches(doc! { "tags": { "$size": 2 } }, &doc));
        assert!(matches(doc! { "tags": { "$all": ["b", "a"] } }, &doc));
        assert!(!matches(doc! { "tags": { "$all": ["a", "c"] } }, &doc));

        assert!(matches(doc! { "items.sku": "y" }, &doc));
        assert!(matches(doc! { "items.0.sku": "x" }, &doc));
        assert!(!matches(doc! { "items.0.sku": "y" }, &doc));

        // Without $elemMatch, conditions may be satisfied by different elements
        assert!(matches(doc! { "items.sku": "x", "items.qty": 5 }, &doc));
        assert!(!matches(doc! { "items": { "$elemMatch": { "sku": "x", "qty": 5 } } }, &doc));
        assert!(matches(doc! { "items": { "$elemMatch": { "sku": "y", "qty": { "$gt": 2 } } } }, &doc));
    }

    #[test]
    fn test_value_level_elem_match_and_not() {
        let doc = doc! { "scores": [82, 91] };

        assert!(matches(doc! { "scores": { "$elemMatch": { "$gte": 90, "$lt": 95 } } }, &doc));
        assert!(!matches(doc! { "scores": { "$elemMatch": { "$gte": 95 } } }, &doc));
        assert!(matches(doc! { "scores": { "$not": { "$size": 3 } } }, &doc));
        assert!(!matches(doc! { "scores": { "$not": { "$gt": 90 } } }, &doc));
    }

    #[test]
    fn test_logical_operators() {
        let doc = doc! { "a": 1, "b": 2 };

        assert!(matches(doc! { "$or": [{ "a": 2 }, { "b": 2 }] }, &doc));
        assert!(!matches(doc! { "$and": [{ "a": 1 }, { "b": 3 }] }, &doc));
        assert!(matches(doc! { "$nor": [{ "a": 2 }, { "b": 3 }] }, &doc));
        assert!(!matches(doc! { "$not": { "a": 1 } }, &doc));
        assert!(matches(doc! {}, &doc));
    }

    #[test]
    fn test_positional_index() {
        let doc = doc! {
            "_id": "abc",
            "items": [{ "sku": "x", "qty": 1 }, { "sku": "y", "qty": 5 }],
            "tags": ["a", "b", "c"],
        };

        assert_eq!(positional(doc! { "_id": "abc", "items": { "$elemMatch": { "sku": "y" } } }, &doc), Some(1));
        assert_eq!(positional(doc! { "items.sku": "x" }, &doc), Some(0));
        assert_eq!(positional(doc! { "items.qty": { "$gt": 3 } }, &doc), Some(1));
        assert_eq!(positional(doc! { "tags": "c" }, &doc), Some(2));
        assert_eq!(positional(doc! { "_id": "abc" }, &doc), None);
        assert_eq!(positional(doc! { "items.sku": "z" }, &doc), None);
    }
}
