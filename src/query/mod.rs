use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use bson::{Bson, Document};
use crate::util::bson_utils;

pub(crate) mod execution;
pub(crate) mod parser;
pub(crate) mod update;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Filters applied to the value(s) found at a field path
    /// (e.g., `{ "price": { "$ne": 1.99, "$exists": true } }`)
    FieldFilters {
        path: Vec<PathComponent>,
        filters: Vec<Arc<Expr>>,
    },
    /// A single comparison (e.g., `$gt: 5`, `$eq: "Alice"`)
    Comparison {
        operator: ComparisonOperator,
        value: BsonValue,
    },
    /// Field existence
    Exists(bool),
    /// Array length
    Size(usize),
    /// Array containing all the given values
    All(Vec<Bson>),
    /// At least one array element satisfying every predicate. The predicates are either
    /// document-level (array of sub-documents) or value-level (array of scalars).
    ElemMatch(Vec<Arc<Expr>>),
    /// Value-level negation of the conjunction of the predicates (`$not`)
    Not(Vec<Arc<Expr>>),
    And(Vec<Arc<Expr>>),
    Or(Vec<Arc<Expr>>),
    Nor(Vec<Arc<Expr>>),
    /// Represents an expression that is always true (e.g. `{}` or `$and: []`)
    AlwaysTrue,
}

impl Expr {
    /// Returns `true` if the expression applies to a whole document rather than to a value.
    pub fn is_document_level(&self) -> bool {
        matches!(
            self,
            Expr::FieldFilters { .. } | Expr::And(_) | Expr::Or(_) | Expr::Nor(_) | Expr::AlwaysTrue
        )
    }
}

#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq, Ord, PartialOrd)]
pub enum ComparisonOperator {
    Eq,  // `$eq`
    Ne,  // `$ne`
    Gt,  // `$gt`
    Gte, // `$gte`
    Lt,  // `$lt`
    Lte, // `$lte`
    In,  // `$in`
    Nin, // `$nin`
}

/// Represents a component in a field path
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub enum PathComponent {
    FieldName(String),   // A named field (e.g., "field" in "document.field")
    ArrayElement(usize), // An array index (e.g., "0" in "array.0")
}

impl PathComponent {
    /// The key used when the component is resolved against a document.
    pub fn as_key(&self) -> String {
        self.to_string()
    }
}

impl From<&str> for PathComponent {
    fn from(value: &str) -> Self {
        PathComponent::FieldName(value.to_string())
    }
}

impl From<usize> for PathComponent {
    fn from(index: usize) -> Self {
        PathComponent::ArrayElement(index)
    }
}

impl fmt::Display for PathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathComponent::FieldName(name) => write!(f, "{}", name),
            PathComponent::ArrayElement(index) => write!(f, "{}", index),
        }
    }
}

/// Looks a path component up in a document. Numeric components are plain keys here.
pub fn lookup<'a>(doc: &'a Document, component: &PathComponent) -> Option<&'a Bson> {
    match component {
        PathComponent::FieldName(name) => doc.get(name),
        PathComponent::ArrayElement(index) => doc.get(index.to_string()),
    }
}

/// Extracts a BSON value from a document given a path, without traversing arrays implicitly.
pub fn get_path_value<'a>(doc: &'a Document, path: &[PathComponent]) -> Option<BsonValueRef<'a>> {
    let (first, rest) = path.split_first()?;
    let mut current = lookup(doc, first)?;

    for component in rest {
        current = match (component, current) {
            (_, Bson::Document(d)) => lookup(d, component)?,
            (PathComponent::ArrayElement(index), Bson::Array(a)) => a.get(*index)?,
            _ => return None,
        };
    }

    Some(BsonValueRef(current))
}

/// Collects every value reachable through `path`, fanning out over arrays of sub-documents
/// the way the query language does (`"items.sku"` visits the `sku` of every item).
/// `None` marks a branch where the path does not resolve.
pub fn collect_path_values<'a>(value: &'a Bson, path: &[PathComponent], out: &mut Vec<Option<BsonValueRef<'a>>>) {
    let Some((first, rest)) = path.split_first() else {
        out.push(Some(BsonValueRef(value)));
        return;
    };

    match value {
        Bson::Document(doc) => match lookup(doc, first) {
            Some(child) => collect_path_values(child, rest, out),
            None => out.push(None),
        },
        Bson::Array(elements) => {
            if let PathComponent::ArrayElement(index) = first {
                match elements.get(*index) {
                    Some(child) => collect_path_values(child, rest, out),
                    None => out.push(None),
                }
                return;
            }
            let before = out.len();
            for element in elements {
                if let Bson::Document(_) = element {
                    collect_path_values(element, path, out);
                }
            }
            if out.len() == before {
                out.push(None);
            }
        }
        _ => out.push(None),
    }
}

pub fn format_path(path: &[PathComponent]) -> String {
    path.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

#[derive(Debug, Copy, Clone, Eq, Hash, PartialEq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SortField {
    pub path: Vec<PathComponent>,
    pub order: SortOrder,
}

/// A projection tree. A node without children includes (or excludes) the whole value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectionNode {
    pub children: BTreeMap<String, ProjectionNode>,
}

impl ProjectionNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Adds a path to the tree. Returns `false` if the path collides with an existing one
    /// (e.g. adding `a.b` when `a` is already projected as a whole).
    pub fn add_path(&mut self, path: &[PathComponent]) -> bool {
        let Some((first, rest)) = path.split_first() else {
            return true;
        };
        let key = first.as_key();
        match self.children.get_mut(&key) {
            Some(child) => {
                if child.is_leaf() || rest.is_empty() {
                    return false;
                }
                child.add_path(rest)
            }
            None => {
                let mut child = ProjectionNode::default();
                child.add_path(rest);
                self.children.insert(key, child);
                true
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Projection {
    /// Keeps only the listed paths. `_id` is kept unless `include_id` is false.
    Include { fields: ProjectionNode, include_id: bool },
    /// Drops the listed paths.
    Exclude(ProjectionNode),
}

#[derive(Debug, Clone)]
pub struct BsonValue(pub Bson);

impl BsonValue {
    pub fn to_bson(&self) -> Bson {
        self.0.clone()
    }

    pub fn as_ref(&self) -> BsonValueRef<'_> {
        BsonValueRef(&self.0)
    }
}

impl PartialEq for BsonValue {
    fn eq(&self, other: &Self) -> bool {
        bson_utils::bson_eq(&self.0, &other.0)
    }
}

impl Eq for BsonValue {}

impl Hash for BsonValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        bson_utils::bson_hash(&self.0, state);
    }
}

impl PartialOrd for BsonValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BsonValue {
    fn cmp(&self, other: &Self) -> Ordering {
        bson_utils::cmp_bson(&self.0, &other.0)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BsonValueRef<'a>(pub &'a Bson);

impl<'a> BsonValueRef<'a> {
    pub fn to_owned_bson(&self) -> Bson {
        self.0.clone()
    }
}

impl<'a> PartialEq for BsonValueRef<'a> {
    fn eq(&self, other: &Self) -> bool {
        bson_utils::bson_eq(self.0, other.0)
    }
}

impl<'a> Eq for BsonValueRef<'a> {}

impl<'a> Hash for BsonValueRef<'a> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        bson_utils::bson_hash(self.0, state);
    }
}

impl<'a> PartialOrd for BsonValueRef<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<'a> Ord for BsonValueRef<'a> {
    fn cmp(&self, other: &Self) -> Ordering {
        bson_utils::cmp_bson(self.0, other.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::{bson, doc};

    #[test]
    fn test_get_path_value() {
        let doc = doc! {
            "a": 1,
            "b": { "c": "hello" },
            "d": [10, 20, { "e": 30 }],
        };

        assert_eq!(
            get_path_value(&doc, &["a".into()]),
            Some(BsonValueRef(&Bson::Int32(1)))
        );
        assert_eq!(
            get_path_value(&doc, &["b".into(), "c".into()]),
            Some(BsonValueRef(&Bson::String("hello".to_string())))
        );
        assert_eq!(
            get_path_value(&doc, &["d".into(), 1.into()]),
            Some(BsonValueRef(&Bson::Int32(20)))
        );
        assert_eq!(
            get_path_value(&doc, &["d".into(), 2.into(), "e".into()]),
            Some(BsonValueRef(&Bson::Int32(30)))
        );

        assert_eq!(get_path_value(&doc, &["z".into()]), None);
        assert_eq!(get_path_value(&doc, &["a".into(), "z".into()]), None);
        assert_eq!(get_path_value(&doc, &["a".into(), 0.into()]), None);
        assert_eq!(get_path_value(&doc, &[]), None);
    }

    #[test]
    fn test_collect_path_values_fans_out_over_arrays() {
        let value = bson!({
            "items": [
                { "sku": "a", "qty": 1 },
                { "sku": "b" },
                "scalar",
            ]
        });

        let mut out = Vec::new();
        collect_path_values(&value, &["items".into(), "qty".into()], &mut out);
        assert_eq!(out, vec![Some(BsonValueRef(&Bson::Int32(1))), None]);

        let mut out = Vec::new();
        collect_path_values(&value, &["items".into(), 1.into(), "sku".into()], &mut out);
        assert_eq!(out, vec![Some(BsonValueRef(&Bson::String("b".to_string())))]);

        let mut out = Vec::new();
        collect_path_values(&value, &["missing".into()], &mut out);
        assert_eq!(out, vec![None]);
    }

    #[test]
    fn test_projection_node_add_path() {
        let mut root = ProjectionNode::default();
        assert!(root.add_path(&["a".into()]));
        assert!(root.add_path(&["b".into(), "c".into()]));
        assert!(root.add_path(&["b".into(), "d".into()]));

        // "a" is already projected as a whole
        assert!(!root.add_path(&["a".into(), "x".into()]));
        // "b" has children, it cannot become a leaf
        assert!(!root.add_path(&["b".into()]));

        assert!(root.children["a"].is_leaf());
        assert_eq!(root.children["b"].children.len(), 2);
    }

    #[test]
    fn test_value_equality_and_ordering() {
        assert_eq!(BsonValue(bson!(5)), BsonValue(bson!(5.0)));
        assert_eq!(BsonValue(bson!({ "a": 1, "b": 2 })), BsonValue(bson!({ "b": 2, "a": 1 })));
        assert!(BsonValue(bson!(1)) < BsonValue(bson!("a")));
        assert_ne!(BsonValue(bson!(true)), BsonValue(bson!(1)));
    }
}
