//! Dotted path helpers.

use fieldwatch_proto::{Document, Value};

/// Proper, non-empty dot prefixes of `path`, deepest first.
///
/// `"a.b.c"` yields `"a.b"` then `"a"`.
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.rmatch_indices('.')
        .map(move |(idx, _)| &path[..idx])
        .filter(|prefix| !prefix.is_empty())
}

/// The part of `path` below `ancestor`, if `ancestor` is a proper prefix.
pub fn relative_to<'a>(path: &'a str, ancestor: &str) -> Option<&'a str> {
    path.strip_prefix(ancestor)?.strip_prefix('.')
}

/// Assign `value` at the dotted `path` inside `doc`, creating documents on the way.
///
/// Intermediate values that are not documents are replaced, and an existing
/// value at the final segment is overwritten.
pub fn set_path(doc: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path.to_string(), value);
        }
        Some((head, rest)) => {
            let child = doc
                .entry(head.to_string())
                .or_insert_with(|| Value::Document(Document::new()));
            if child.as_document().is_none() {
                *child = Value::Document(Document::new());
            }
            if let Value::Document(child) = child {
                set_path(child, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ancestors() {
        assert_eq!(ancestors("a.b.c").collect::<Vec<_>>(), vec!["a.b", "a"]);
        assert_eq!(ancestors("content.k").collect::<Vec<_>>(), vec!["content"]);
        assert!(ancestors("name").next().is_none());
        assert_eq!(ancestors(".a").collect::<Vec<_>>(), Vec::<&str>::new());
    }

    #[test]
    fn test_relative_to() {
        assert_eq!(relative_to("a.b.c", "a"), Some("b.c"));
        assert_eq!(relative_to("a.b.c", "a.b"), Some("c"));
        assert_eq!(relative_to("ab.c", "a"), None);
        assert_eq!(relative_to("a", "a"), None);
    }

    #[test]
    fn test_set_path_nests_and_overwrites() {
        let mut doc = Document::new();
        set_path(&mut doc, "b.c", Value::Int(1));
        set_path(&mut doc, "b.d", Value::Int(2));
        set_path(&mut doc, "b.c", Value::Int(3));

        let b = doc.get("b").and_then(Value::as_document).unwrap();
        assert_eq!(b.get("c"), Some(&Value::Int(3)));
        assert_eq!(b.get("d"), Some(&Value::Int(2)));

        // A scalar in the way is replaced by a document.
        set_path(&mut doc, "b.c.e", Value::Int(4));
        let c = doc["b"].as_document().unwrap()["c"].as_document().unwrap();
        assert_eq!(c.get("e"), Some(&Value::Int(4)));
    }
}
