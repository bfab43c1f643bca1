use std::fmt;
use std::sync::Arc;
use bson::{Bson, Document};
use crate::query::Expr;

/// Represents a component in an update path, which can include the positional operator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum UpdatePathComponent {
    /// A named field (e.g., "field" in "document.field").
    FieldName(String),
    /// An array index (e.g., "0" in "array.0").
    ArrayElement(usize),
    /// The first positional operator (`$`).
    FirstMatch,
}

impl fmt::Display for UpdatePathComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdatePathComponent::FieldName(name) => write!(f, "{}", name),
            UpdatePathComponent::ArrayElement(index) => write!(f, "{}", index),
            UpdatePathComponent::FirstMatch => write!(f, "$"),
        }
    }
}

/// A path for an update operation, composed of `UpdatePathComponent`s.
pub type UpdatePath = Vec<UpdatePathComponent>;

pub fn format_update_path(path: &[UpdatePathComponent]) -> String {
    path.iter()
        .map(|c| c.to_string())
        .collect::<Vec<_>>()
        .join(".")
}

/// Represents a single update operation.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    /// `$set`: Sets the value of a field.
    Set { path: UpdatePath, value: Bson },
    /// `$setOnInsert`: Sets the value of a field only when the update inserts the document.
    SetOnInsert { path: UpdatePath, value: Bson },
    /// `$unset`: Removes a field.
    Unset { path: UpdatePath },
    /// `$inc`: Increments a field by a specified amount.
    Inc { path: UpdatePath, amount: Bson },
    /// `$mul`: Multiplies a field by a specified amount.
    Mul { path: UpdatePath, factor: Bson },
    /// `$min`: Updates the field if the specified value is less than the current value.
    Min { path: UpdatePath, value: Bson },
    /// `$max`: Updates the field if the specified value is greater than the current value.
    Max { path: UpdatePath, value: Bson },
    /// `$push`: Appends one value (or several with `$each`) to an array.
    Push { path: UpdatePath, values: Vec<Bson> },
    /// `$addToSet`: Appends the values not already present in the array.
    AddToSet { path: UpdatePath, values: Vec<Bson> },
    /// `$pull`: Removes all array elements that match the criterion.
    Pull { path: UpdatePath, criterion: PullCriterion },
}

impl UpdateOp {
    pub fn path(&self) -> &UpdatePath {
        match self {
            UpdateOp::Set { path, .. }
            | UpdateOp::SetOnInsert { path, .. }
            | UpdateOp::Unset { path }
            | UpdateOp::Inc { path, .. }
            | UpdateOp::Mul { path, .. }
            | UpdateOp::Min { path, .. }
            | UpdateOp::Max { path, .. }
            | UpdateOp::Push { path, .. }
            | UpdateOp::AddToSet { path, .. }
            | UpdateOp::Pull { path, .. } => path,
        }
    }

    pub fn is_positional(&self) -> bool {
        self.path().contains(&UpdatePathComponent::FirstMatch)
    }
}

/// Criterion for a `$pull` operation.
#[derive(Debug, Clone, PartialEq)]
pub enum PullCriterion {
    /// Pull elements equal to a specific value.
    Equals(Bson),
    /// Pull elements matching every predicate. The predicates are value-level when the
    /// criterion only holds operators, document-level otherwise.
    Matches(Vec<Arc<Expr>>),
}

/// Represents a parsed update document.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateExpr {
    /// A document without operators replacing every field but `_id`.
    Replacement(Document),
    /// A list of operators applied in order.
    Operators(Vec<UpdateOp>),
}

impl UpdateExpr {
    pub fn has_positional_operator(&self) -> bool {
        match self {
            UpdateExpr::Replacement(_) => false,
            UpdateExpr::Operators(ops) => ops.iter().any(UpdateOp::is_positional),
        }
    }
}
