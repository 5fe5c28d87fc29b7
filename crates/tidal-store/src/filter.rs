//! Field-equality filter evaluation
//!
//! A filter is a BSON document whose keys are field paths and whose values are
//! the expected field values. A document matches when every path resolves to
//! an equal value. The empty filter matches everything.
//!
//! Paths use dot notation: `"address.city"`, and array indexing: `"tags.0"`.

use bson::{Bson, Document};

/// Check whether `doc` satisfies every condition in `filter`
pub fn matches(doc: &Document, filter: &Document) -> bool {
    filter
        .iter()
        .all(|(path, expected)| match get_path(doc, path) {
            Some(actual) => values_equal(actual, expected),
            None => matches!(expected, Bson::Null),
        })
}

/// Resolve a dotted path inside a document
pub fn get_path<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    // Fast path: no dots means simple field access
    if !path.contains('.') {
        return doc.get(path);
    }

    let mut parts = path.split('.');
    let mut value = doc.get(parts.next()?)?;
    for part in parts {
        match value {
            Bson::Document(inner) => value = inner.get(part)?,
            Bson::Array(items) => {
                let index = part.parse::<usize>().ok()?;
                value = items.get(index)?;
            }
            _ => return None,
        }
    }
    Some(value)
}

/// Equality with numeric coercion across Int32, Int64 and Double
pub fn values_equal(a: &Bson, b: &Bson) -> bool {
    if let (Some(x), Some(y)) = (as_integer(a), as_integer(b)) {
        return x == y;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => return x == y,
        (Some(_), None) | (None, Some(_)) => return false,
        (None, None) => {}
    }
    match (a, b) {
        (Bson::Array(xs), Bson::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| values_equal(x, y))
        }
        (Bson::Document(x), Bson::Document(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|w| values_equal(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

fn as_integer(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        _ => None,
    }
}

fn as_number(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}
