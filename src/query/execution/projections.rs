use crate::query::{Projection, ProjectionNode};
use bson::{Bson, Document};

pub type Projector = Box<dyn Fn(Document) -> Document + Send + Sync>;

pub fn to_projector(projection: &Projection) -> Projector {
    match projection {
        Projection::Include { fields, include_id } => {
            let fields = fields.clone();
            let include_id = *include_id;
            Box::new(move |doc| {
                let mut projected = include(&doc, &fields);
                if include_id {
                    if let Some(id) = doc.get("_id") {
                        if !projected.contains_key("_id") {
                            // _id stays in front
                            let mut with_id = Document::new();
                            with_id.insert("_id", id.clone());
                            for (key, value) in projected {
                                with_id.insert(key, value);
                            }
                            projected = with_id;
                        }
                    }
                }
                projected
            })
        }
        Projection::Exclude(fields) => {
            let fields = fields.clone();
            Box::new(move |mut doc| {
                exclude(&mut doc, &fields);
                doc
            })
        }
    }
}

/// Keeps the fields of `doc` present in the tree, in document order.
fn include(doc: &Document, node: &ProjectionNode) -> Document {
    let mut projected = Document::new();
    for (key, value) in doc {
        let Some(child) = node.children.get(key) else {
            continue;
        };
        if child.is_leaf() {
            projected.insert(key.clone(), value.clone());
            continue;
        }
        match value {
            Bson::Document(sub_doc) => {
                projected.insert(key.clone(), include(sub_doc, child));
            }
            Bson::Array(elements) => {
                projected.insert(key.clone(), include_array(elements, child));
            }
            // Scalars have no sub-fields to keep
            _ => {}
        }
    }
    projected
}

fn include_array(elements: &[Bson], node: &ProjectionNode) -> Bson {
    Bson::Array(
        elements
            .iter()
            .filter_map(|elem| match elem {
                Bson::Document(sub_doc) => Some(Bson::Document(include(sub_doc, node))),
                Bson::Array(nested) => Some(include_array(nested, node)),
                _ => None,
            })
            .collect(),
    )
}

/// Removes the fields of `doc` present in the tree.
fn exclude(doc: &mut Document, node: &ProjectionNode) {
    for (key, child) in &node.children {
        if child.is_leaf() {
            doc.remove(key);
            continue;
        }
        match doc.get_mut(key) {
            Some(Bson::Document(sub_doc)) => exclude(sub_doc, child),
            Some(Bson::Array(elements)) => exclude_array(elements, child),
            _ => {}
        }
    }
}

fn exclude_array(elements: &mut [Bson], node: &ProjectionNode) {
    for elem in elements {
        match elem {
            Bson::Document(sub_doc) => exclude(sub_doc, node),
            Bson::Array(nested) => exclude_array(nested, node),
            _ => {}
        }
    }
}
