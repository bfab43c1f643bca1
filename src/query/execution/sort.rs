use crate::query::{get_path_value, BsonValueRef, SortField, SortOrder};
use bson::{Bson, Document};
use std::cmp::Ordering;

/// Compares two BSON documents according to the provided sort fields.
/// Returns an `Ordering` based on multi-key, multi-order comparison. Missing fields sort as `null`.
pub fn compare_documents(a: &Document, b: &Document, sort_fields: &[SortField]) -> Ordering {
    for sf in sort_fields {
        let val_a = get_path_value(a, &sf.path).unwrap_or(BsonValueRef(&Bson::Null));
        let val_b = get_path_value(b, &sf.path).unwrap_or(BsonValueRef(&Bson::Null));
        match val_a.cmp(&val_b) {
            Ordering::Equal => continue,
            ord => {
                return if sf.order == SortOrder::Ascending {
                    ord
                } else {
                    ord.reverse()
                };
            }
        }
    }
    Ordering::Equal
}

/// Sorts the documents in memory. The sort is stable: documents comparing equal keep their
/// storage order.
pub fn in_memory_sort(rows: &mut [Document], sort_fields: &[SortField]) {
    if !sort_fields.is_empty() {
        rows.sort_by(|a, b| compare_documents(a, b, sort_fields));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parser::parse_sort;
    use bson::doc;

    #[test]
    fn test_multi_key_sort() {
        let mut rows = vec![
            doc! { "_id": 1, "a": 2, "b": "x" },
            doc! { "_id": 2, "a": 1, "b": "y" },
            doc! { "_id": 3, "a": 2, "b": "z" },
            doc! { "_id": 4 },
        ];

        in_memory_sort(&mut rows, &parse_sort(&doc! { "a": -1, "b": -1 }).unwrap());

        let ids: Vec<i32> = rows.iter().map(|d| d.get_i32("_id").unwrap()).collect();
        assert_eq!(ids, vec![3, 1, 2, 4]);
    }

    #[test]
    fn test_mixed_types_follow_canonical_order() {
        let a = doc! { "v": "text" };
        let b = doc! { "v": 10 };
        let c = doc! { "v": null };
        let fields = parse_sort(&doc! { "v": 1 }).unwrap();

        assert_eq!(compare_documents(&b, &a, &fields), Ordering::Less);
        assert_eq!(compare_documents(&c, &b, &fields), Ordering::Less);
        assert_eq!(compare_documents(&a, &a, &fields), Ordering::Equal);
    }

    #[test]
    fn test_nested_path() {
        let a = doc! { "p": { "q": 1 } };
        let b = doc! { "p": { "q": 2 } };
        let fields = parse_sort(&doc! { "p.q": -1 }).unwrap();
        assert_eq!(compare_documents(&a, &b, &fields), Ordering::Greater);
    }
}
