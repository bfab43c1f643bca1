use std::sync::Arc;
use bson::{Bson, Document};
use crate::query::update::{format_update_path, PullCriterion, UpdateExpr, UpdateOp, UpdatePath, UpdatePathComponent};
use crate::query::{
    BsonValue, ComparisonOperator, ComparisonOperator::*, Expr, PathComponent, Projection,
    ProjectionNode, SortField, SortOrder,
};
use crate::store::{StoreError, StoreResult};

const LOGICAL_OPERATORS: [&str; 3] = ["$and", "$or", "$nor"];

fn bad_query(reason: impl Into<String>) -> StoreError {
    StoreError::BadQuery(reason.into())
}

/// Parses a BSON `Document` representing a query filter into an `Expr`.
pub fn parse_conditions(doc: &Document) -> StoreResult<Arc<Expr>> {
    let mut conditions = Vec::new();

    for (key, value) in doc.iter() {
        match key.as_str() {
            "$and" | "$or" | "$nor" => {
                conditions.push(Arc::new(parse_logical_operator(key, value)?));
            }
            "$not" => {
                let sub_doc = value
                    .as_document()
                    .ok_or_else(|| bad_query("$not must be a document"))?;
                conditions.push(Arc::new(Expr::Nor(vec![parse_conditions(sub_doc)?])));
            }
            _ if key.starts_with('$') => {
                return Err(bad_query(format!("unknown top level operator: {}", key)));
            }
            _ => {
                conditions.push(Arc::new(Expr::FieldFilters {
                    path: parse_field_path(key)?,
                    filters: parse_predicates(value)?,
                }));
            }
        }
    }

    match conditions.len() {
        0 => Ok(Arc::new(Expr::AlwaysTrue)),
        1 => Ok(conditions.remove(0)),
        _ => Ok(Arc::new(Expr::And(conditions))),
    }
}

/// Parses logical operators ($and, $or, $nor) into an `Expr`.
fn parse_logical_operator(operator: &str, value: &Bson) -> StoreResult<Expr> {
    let sub_docs = value
        .as_array()
        .ok_or_else(|| bad_query(format!("{} must be an array", operator)))?;

    if sub_docs.is_empty() {
        return Err(bad_query(format!("{} must be a nonempty array", operator)));
    }

    let mut parsed_conditions = Vec::with_capacity(sub_docs.len());
    for bson in sub_docs {
        match bson {
            Bson::Document(sub_doc) => parsed_conditions.push(parse_conditions(sub_doc)?),
            _ => {
                return Err(bad_query(format!(
                    "Invalid format for {}; must be an array of documents",
                    operator
                )))
            }
        }
    }

    match operator {
        "$and" => Ok(Expr::And(parsed_conditions)),
        "$or" => Ok(Expr::Or(parsed_conditions)),
        _ => Ok(Expr::Nor(parsed_conditions)),
    }
}

/// A document is an operator document when its first key starts with `$`.
fn is_operator_document(doc: &Document) -> bool {
    doc.keys().next().map_or(false, |k| k.starts_with('$'))
}

/// Parses the predicates applied to the value(s) of a field.
fn parse_predicates(value: &Bson) -> StoreResult<Vec<Arc<Expr>>> {
    let operators = match value {
        Bson::Document(doc) if is_operator_document(doc) => doc,
        // Implicit equality for direct field values
        _ => return Ok(vec![new_predicate(Eq, value)]),
    };

    let mut predicates = Vec::with_capacity(operators.len());
    for (key, value) in operators.iter() {
        match key.as_str() {
            "$eq" => predicates.push(new_predicate(Eq, value)),
            "$ne" => predicates.push(new_predicate(Ne, value)),
            "$gt" => predicates.push(new_predicate(Gt, value)),
            "$gte" => predicates.push(new_predicate(Gte, value)),
            "$lt" => predicates.push(new_predicate(Lt, value)),
            "$lte" => predicates.push(new_predicate(Lte, value)),
            "$in" | "$nin" => {
                if !matches!(value, Bson::Array(_)) {
                    return Err(bad_query(format!("{} needs an array", key)));
                }
                let operator = if key == "$in" { In } else { Nin };
                predicates.push(new_predicate(operator, value));
            }
            "$exists" => predicates.push(Arc::new(Expr::Exists(is_truthy(value)))),
            "$size" => {
                let size = as_non_negative_integer(value)
                    .ok_or_else(|| bad_query("$size must be a non-negative integer"))?;
                predicates.push(Arc::new(Expr::Size(size)));
            }
            "$all" => {
                let values = value
                    .as_array()
                    .ok_or_else(|| bad_query("$all needs an array"))?;
                predicates.push(Arc::new(Expr::All(values.clone())));
            }
            "$elemMatch" => {
                let doc = value
                    .as_document()
                    .ok_or_else(|| bad_query("$elemMatch needs an Object"))?;
                predicates.push(Arc::new(Expr::ElemMatch(parse_elem_match(doc)?)));
            }
            "$not" => {
                let negated = match value {
                    Bson::Document(doc) if is_operator_document(doc) => parse_predicates(value)?,
                    _ => return Err(bad_query("$not needs a document of operators")),
                };
                predicates.push(Arc::new(Expr::Not(negated)));
            }
            _ => return Err(bad_query(format!("unknown operator: {}", key))),
        }
    }
    Ok(predicates)
}

/// `$elemMatch` holds either value predicates (array of scalars) or a full query
/// (array of sub-documents).
fn parse_elem_match(doc: &Document) -> StoreResult<Vec<Arc<Expr>>> {
    let is_value_level = !doc.is_empty()
        && doc
            .keys()
            .all(|k| k.starts_with('$') && !LOGICAL_OPERATORS.contains(&k.as_str()));

    if is_value_level {
        return parse_predicates(&Bson::Document(doc.clone()));
    }

    let nested = parse_conditions(doc)?;
    Ok(match nested.as_ref() {
        Expr::And(children) => children.clone(),
        _ => vec![nested],
    })
}

fn new_predicate(operator: ComparisonOperator, value: &Bson) -> Arc<Expr> {
    Arc::new(Expr::Comparison {
        operator,
        value: BsonValue(value.clone()),
    })
}

fn as_non_negative_integer(value: &Bson) -> Option<usize> {
    match value {
        Bson::Int32(n) if *n >= 0 => Some(*n as usize),
        Bson::Int64(n) if *n >= 0 => Some(*n as usize),
        Bson::Double(n) if *n >= 0.0 && n.fract() == 0.0 => Some(*n as usize),
        _ => None,
    }
}

/// Truthiness of an option value: `false`, `null`, and numeric zeros are falsy.
pub fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null | Bson::Undefined => false,
        Bson::Int32(n) => *n != 0,
        Bson::Int64(n) => *n != 0,
        Bson::Double(n) => *n != 0.0 && !n.is_nan(),
        _ => true,
    }
}

pub fn parse_field_path(path: &str) -> StoreResult<Vec<PathComponent>> {
    path.split('.').map(parse_path_component).collect()
}

fn parse_path_component(component: &str) -> StoreResult<PathComponent> {
    if component.is_empty() {
        return Err(bad_query("FieldPath field names may not be empty strings."));
    }
    if component.starts_with('$') {
        return Err(bad_query(format!("FieldPath field names may not start with '$': {}", component)));
    }
    Ok(match component.parse::<usize>() {
        Ok(index) => PathComponent::ArrayElement(index),
        Err(_) => PathComponent::FieldName(component.to_string()),
    })
}

/// Parses a projection document. An empty document projects nothing away.
pub fn parse_projection(doc: &Document) -> StoreResult<Option<Projection>> {
    let mut fields = ProjectionNode::default();
    let mut include_id = None;
    let mut inclusion: Option<bool> = None;

    for (key, value) in doc.iter() {
        if let Bson::Document(_) = value {
            return Err(bad_query(format!("Unsupported projection option: {}", key)));
        }
        let included = is_truthy(value);

        if key == "_id" {
            include_id = Some(included);
            continue;
        }

        match inclusion {
            Some(mode) if mode != included => {
                return Err(bad_query(if mode {
                    format!("Cannot do exclusion on field {} in inclusion projection", key)
                } else {
                    format!("Cannot do inclusion on field {} in exclusion projection", key)
                }));
            }
            _ => inclusion = Some(included),
        }

        if !fields.add_path(&parse_field_path(key)?) {
            return Err(bad_query(format!("Path collision at {}", key)));
        }
    }

    Ok(match (inclusion, include_id) {
        (Some(true), include_id) => Some(Projection::Include {
            fields,
            include_id: include_id.unwrap_or(true),
        }),
        (Some(false), include_id) => {
            if include_id == Some(false) {
                fields.add_path(&[PathComponent::FieldName("_id".to_string())]);
            }
            Some(Projection::Exclude(fields))
        }
        (None, Some(true)) => Some(Projection::Include { fields, include_id: true }),
        (None, Some(false)) => {
            fields.add_path(&[PathComponent::FieldName("_id".to_string())]);
            Some(Projection::Exclude(fields))
        }
        (None, None) => None,
    })
}

pub fn parse_sort(doc: &Document) -> StoreResult<Vec<SortField>> {
    let mut fields = Vec::with_capacity(doc.len());

    for (key, value) in doc.iter() {
        let order = match value {
            Bson::Int32(1) | Bson::Int64(1) => SortOrder::Ascending,
            Bson::Int32(-1) | Bson::Int64(-1) => SortOrder::Descending,
            Bson::Double(n) if *n == 1.0 => SortOrder::Ascending,
            Bson::Double(n) if *n == -1.0 => SortOrder::Descending,
            _ => return Err(bad_query(format!("Invalid sort order for field '{}'", key))),
        };

        fields.push(SortField {
            path: parse_field_path(key)?,
            order,
        });
    }

    Ok(fields)
}

/// Parses an update document: either a replacement document or a list of operators.
pub fn parse_update(update: &Document) -> StoreResult<UpdateExpr> {
    if !is_operator_document(update) {
        if let Some(key) = update.keys().find(|k| k.starts_with('$')) {
            return Err(bad_query(format!(
                "The dollar ($) prefixed field '{}' is not allowed in a replacement document",
                key
            )));
        }
        return Ok(UpdateExpr::Replacement(update.clone()));
    }

    let mut ops = Vec::new();

    for (key, value) in update.iter() {
        let sub_doc = match (key.starts_with('$'), value) {
            (false, _) => {
                return Err(bad_query(format!(
                    "Unknown modifier: {}. Expected a valid update modifier",
                    key
                )))
            }
            (true, Bson::Document(sub_doc)) => sub_doc,
            (true, _) => {
                return Err(bad_query(format!(
                    "Modifiers operate on fields but we found a {} instead",
                    key
                )))
            }
        };

        for (path, val) in sub_doc {
            let path = parse_update_path(path)?;
            let op = match key.as_str() {
                "$set" => UpdateOp::Set { path, value: val.clone() },
                "$setOnInsert" => UpdateOp::SetOnInsert { path, value: val.clone() },
                "$unset" => UpdateOp::Unset { path },
                "$inc" | "$mul" => {
                    if !matches!(val, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) {
                        return Err(bad_query(format!(
                            "Cannot {} with non-numeric argument: {{{}: {}}}",
                            if key == "$inc" { "increment" } else { "multiply" },
                            format_update_path(&path),
                            val
                        )));
                    }
                    if key == "$inc" {
                        UpdateOp::Inc { path, amount: val.clone() }
                    } else {
                        UpdateOp::Mul { path, factor: val.clone() }
                    }
                }
                "$min" => UpdateOp::Min { path, value: val.clone() },
                "$max" => UpdateOp::Max { path, value: val.clone() },
                "$push" => UpdateOp::Push { path, values: parse_each_or_single(val, key)? },
                "$addToSet" => UpdateOp::AddToSet { path, values: parse_each_or_single(val, key)? },
                "$pull" => UpdateOp::Pull { path, criterion: parse_pull_criterion(val)? },
                _ => return Err(bad_query(format!("Unknown modifier: {}", key))),
            };
            ops.push(op);
        }
    }

    validate_no_conflicts(&ops)?;
    Ok(UpdateExpr::Operators(ops))
}

fn parse_update_path(path: &str) -> StoreResult<UpdatePath> {
    path.split('.').map(parse_update_path_component).collect()
}

fn parse_update_path_component(component: &str) -> StoreResult<UpdatePathComponent> {
    if component == "$" {
        return Ok(UpdatePathComponent::FirstMatch);
    }
    if component.starts_with("$[") {
        return Err(bad_query(format!("Unsupported positional operator: {}", component)));
    }
    Ok(match parse_path_component(component)? {
        PathComponent::FieldName(name) => UpdatePathComponent::FieldName(name),
        PathComponent::ArrayElement(index) => UpdatePathComponent::ArrayElement(index),
    })
}

fn parse_each_or_single(value: &Bson, op_name: &str) -> StoreResult<Vec<Bson>> {
    match value {
        Bson::Document(doc) if doc.contains_key("$each") => {
            if doc.len() > 1 {
                return Err(bad_query(format!("Unsupported {} modifier in {}", op_name, doc)));
            }
            match doc.get("$each") {
                Some(Bson::Array(values)) => Ok(values.clone()),
                _ => Err(bad_query(format!("The argument to $each in {} must be an array", op_name))),
            }
        }
        _ => Ok(vec![value.clone()]),
    }
}

fn parse_pull_criterion(value: &Bson) -> StoreResult<PullCriterion> {
    let doc = match value {
        Bson::Document(doc) => doc,
        _ => return Ok(PullCriterion::Equals(value.clone())),
    };

    if is_operator_document(doc) && !doc.keys().any(|k| LOGICAL_OPERATORS.contains(&k.as_str())) {
        return Ok(PullCriterion::Matches(parse_predicates(value)?));
    }
    Ok(PullCriterion::Matches(vec![parse_conditions(doc)?]))
}

/// Rejects updates where one operator path is a prefix of another.
fn validate_no_conflicts(ops: &[UpdateOp]) -> StoreResult<()> {
    for (i, op) in ops.iter().enumerate() {
        for other in &ops[i + 1..] {
            let (a, b) = (op.path(), other.path());
            let common = a.len().min(b.len());
            if a[..common] == b[..common] {
                return Err(bad_query(format!(
                    "Updating the path '{}' would create a conflict at '{}'",
                    format_update_path(b),
                    format_update_path(&a[..common])
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn field(name: &str) -> PathComponent {
        PathComponent::FieldName(name.to_string())
    }

    #[test]
    fn test_parse_implicit_equality_and_operators() {
        let expr = parse_conditions(&doc! { "a": 1, "b": { "$gt": 2, "$lt": 5 } }).unwrap();

        assert_eq!(
            *expr,
            Expr::And(vec![
                Arc::new(Expr::FieldFilters {
                    path: vec![field("a")],
                    filters: vec![new_predicate(Eq, &Bson::Int32(1))],
                }),
                Arc::new(Expr::FieldFilters {
                    path: vec![field("b")],
                    filters: vec![new_predicate(Gt, &Bson::Int32(2)), new_predicate(Lt, &Bson::Int32(5))],
                }),
            ])
        );
    }

    #[test]
    fn test_parse_embedded_document_is_equality() {
        let expr = parse_conditions(&doc! { "a": { "b": 1 } }).unwrap();
        assert_eq!(
            *expr,
            Expr::FieldFilters {
                path: vec![field("a")],
                filters: vec![new_predicate(Eq, &Bson::Document(doc! { "b": 1 }))],
            }
        );
    }

    #[test]
    fn test_parse_dotted_path_with_index() {
        let expr = parse_conditions(&doc! { "items.0.sku": "x" }).unwrap();
        match expr.as_ref() {
            Expr::FieldFilters { path, .. } => {
                assert_eq!(path, &vec![field("items"), PathComponent::ArrayElement(0), field("sku")]);
            }
            other => panic!("unexpected expression {:?}", other),
        }
    }

    #[test]
    fn test_parse_empty_query() {
        assert_eq!(*parse_conditions(&doc! {}).unwrap(), Expr::AlwaysTrue);
    }

    #[test]
    fn test_parse_elem_match_levels() {
        let expr = parse_conditions(&doc! { "items": { "$elemMatch": { "sku": "a", "qty": { "$gt": 1 } } } }).unwrap();
        match expr.as_ref() {
            Expr::FieldFilters { filters, .. } => match filters[0].as_ref() {
                Expr::ElemMatch(preds) => {
                    assert_eq!(preds.len(), 2);
                    assert!(preds.iter().all(|p| p.is_document_level()));
                }
                other => panic!("unexpected expression {:?}", other),
            },
            other => panic!("unexpected expression {:?}", other),
        }

        let expr = parse_conditions(&doc! { "scores": { "$elemMatch": { "$gte": 80, "$lt": 85 } } }).unwrap();
        match expr.as_ref() {
            Expr::FieldFilters { filters, .. } => match filters[0].as_ref() {
                Expr::ElemMatch(preds) => assert!(preds.iter().all(|p| !p.is_document_level())),
                other => panic!("unexpected expression {:?}", other),
            },
            other => panic!("unexpected expression {:?}", other),
        }
    }

    #[test]
    fn test_parse_invalid_queries() {
        assert!(parse_conditions(&doc! { "$where": "1" }).is_err());
        assert!(parse_conditions(&doc! { "a": { "$regex": "x" } }).is_err());
        assert!(parse_conditions(&doc! { "a": { "$in": 1 } }).is_err());
        assert!(parse_conditions(&doc! { "$or": [] }).is_err());
        assert!(parse_conditions(&doc! { "$and": [1] }).is_err());
        assert!(parse_conditions(&doc! { "a": { "$size": -1 } }).is_err());

        let err = parse_conditions(&doc! { "a..b": 1 }).unwrap_err();
        assert_eq!(err.code(), Some(2));
    }

    #[test]
    fn test_parse_projection() {
        assert_eq!(parse_projection(&doc! {}).unwrap(), None);

        match parse_projection(&doc! { "a": 1, "b.c": 1, "_id": 0 }).unwrap() {
            Some(Projection::Include { fields, include_id }) => {
                assert!(!include_id);
                assert!(fields.children["a"].is_leaf());
                assert!(fields.children["b"].children.contains_key("c"));
            }
            other => panic!("unexpected projection {:?}", other),
        }

        match parse_projection(&doc! { "_id": 0 }).unwrap() {
            Some(Projection::Exclude(fields)) => assert!(fields.children.contains_key("_id")),
            other => panic!("unexpected projection {:?}", other),
        }

        assert!(parse_projection(&doc! { "a": 1, "b": 0 }).is_err());
        assert!(parse_projection(&doc! { "a": 1, "a.b": 1 }).is_err());
    }

    #[test]
    fn test_parse_sort() {
        let fields = parse_sort(&doc! { "a": 1, "b.c": -1 }).unwrap();
        assert_eq!(
            fields,
            vec![
                SortField { path: vec![field("a")], order: SortOrder::Ascending },
                SortField { path: vec![field("b"), field("c")], order: SortOrder::Descending },
            ]
        );
        assert!(parse_sort(&doc! { "a": 2 }).is_err());
        assert!(parse_sort(&doc! {}).unwrap().is_empty());
    }

    #[test]
    fn test_parse_update_operators() {
        let update = parse_update(&doc! {
            "$set": { "a": 1, "items.$.qty": 5 },
            "$inc": { "n": 2 },
            "$push": { "tags": { "$each": ["x", "y"] } },
            "$pull": { "scores": { "$lt": 3 } },
        })
        .unwrap();

        match &update {
            UpdateExpr::Operators(ops) => {
                assert_eq!(ops.len(), 5);
                assert_eq!(
                    ops[1].path(),
                    &vec![
                        UpdatePathComponent::FieldName("items".to_string()),
                        UpdatePathComponent::FirstMatch,
                        UpdatePathComponent::FieldName("qty".to_string()),
                    ]
                );
                assert_eq!(
                    ops[3],
                    UpdateOp::Push {
                        path: vec![UpdatePathComponent::FieldName("tags".to_string())],
                        values: vec![Bson::String("x".to_string()), Bson::String("y".to_string())],
                    }
                );
            }
            other => panic!("unexpected update {:?}", other),
        }
        assert!(update.has_positional_operator());
    }

    #[test]
    fn test_parse_replacement() {
        assert_eq!(
            parse_update(&doc! { "a": 1 }).unwrap(),
            UpdateExpr::Replacement(doc! { "a": 1 })
        );
        assert!(parse_update(&doc! { "a": 1, "$set": { "b": 1 } }).is_err());
    }

    #[test]
    fn test_parse_invalid_updates() {
        assert!(parse_update(&doc! { "$set": { "a": 1 }, "b": 1 }).is_err());
        assert!(parse_update(&doc! { "$rename": { "a": "b" } }).is_err());
        assert!(parse_update(&doc! { "$inc": { "a": "x" } }).is_err());
        assert!(parse_update(&doc! { "$set": 1 }).is_err());
        assert!(parse_update(&doc! { "$set": { "a.$[]": 1 } }).is_err());

        let err = parse_update(&doc! { "$set": { "a.b": 1 }, "$unset": { "a": "" } }).unwrap_err();
        assert_eq!(
            err,
            StoreError::BadQuery("Updating the path 'a' would create a conflict at 'a'".to_string())
        );
    }
}
