//! Input validation for collection names, field names and documents
//!
//! Collection names follow the server's naming rules. Field names are checked
//! wherever caller-supplied keys reach storage: filters and mappings passed to
//! `Model::add`. A leading `$` is reserved for operators and rejected.

use bson::{Bson, Document};
use tidal_common::{Result, TidalError};

/// Maximum allowed length for field names
const MAX_FIELD_NAME_LENGTH: usize = 1024;

/// Validated collection name
///
/// # Guarantees
/// - Not empty
/// - At most 120 characters
/// - Only ASCII letters, digits, `_` and `-`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedCollectionName {
    name: String,
}

impl ValidatedCollectionName {
    pub fn new(name: &str) -> Result<Self> {
        tidal_store::validate_name("Collection", name)?;
        Ok(Self {
            name: name.to_string(),
        })
    }

    /// Returns the validated collection name as a string slice
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Consumes the ValidatedCollectionName and returns the inner String
    pub fn into_string(self) -> String {
        self.name
    }
}

impl AsRef<str> for ValidatedCollectionName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ValidatedCollectionName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Validated field name
///
/// # Guarantees
/// - Not empty
/// - At most 1024 characters
/// - No null bytes
/// - No `$` prefix
///
/// Dotted paths (`address.city`) are accepted; each segment must itself be
/// non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFieldName {
    name: String,
}

impl ValidatedFieldName {
    pub fn new(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(TidalError::Validation(
                "Field name cannot be empty".to_string(),
            ));
        }

        if name.len() > MAX_FIELD_NAME_LENGTH {
            return Err(TidalError::Validation(format!(
                "Field name exceeds maximum length of {} characters",
                MAX_FIELD_NAME_LENGTH
            )));
        }

        if name.contains('\0') {
            return Err(TidalError::Validation(
                "Field name cannot contain null bytes".to_string(),
            ));
        }

        if name.starts_with('$') {
            return Err(TidalError::Validation(format!(
                "Field name cannot start with '$' (reserved for operators): '{}'",
                name
            )));
        }

        if name.split('.').any(str::is_empty) {
            return Err(TidalError::Validation(format!(
                "Field path has an empty segment: '{}'",
                name
            )));
        }

        Ok(Self {
            name: name.to_string(),
        })
    }

    /// Returns the validated field name as a string slice
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Consumes the ValidatedFieldName and returns the inner String
    pub fn into_string(self) -> String {
        self.name
    }
}

impl AsRef<str> for ValidatedFieldName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Display for ValidatedFieldName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Validate every key of a document, including nested documents and
/// documents inside arrays
pub fn validate_document(doc: &Document) -> Result<()> {
    for (key, value) in doc.iter() {
        ValidatedFieldName::new(key)?;
        validate_value(value)?;
    }
    Ok(())
}

fn validate_value(value: &Bson) -> Result<()> {
    match value {
        Bson::Document(inner) => validate_document(inner),
        Bson::Array(items) => items.iter().try_for_each(validate_value),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_valid_collection_names() {
        assert!(ValidatedCollectionName::new("users").is_ok());
        assert!(ValidatedCollectionName::new("user_events-2024").is_ok());
        assert_eq!(ValidatedCollectionName::new("Test").unwrap().as_str(), "Test");
    }

    #[test]
    fn test_invalid_collection_names() {
        assert!(ValidatedCollectionName::new("").is_err());
        assert!(ValidatedCollectionName::new("has space").is_err());
        assert!(ValidatedCollectionName::new("dotted.name").is_err());
        assert!(ValidatedCollectionName::new("$cmd").is_err());
        assert!(ValidatedCollectionName::new(&"a".repeat(121)).is_err());
    }

    #[test]
    fn test_collection_name_display() {
        let name = ValidatedCollectionName::new("orders").unwrap();
        assert_eq!(name.to_string(), "orders");
        assert_eq!(name.as_ref(), "orders");
        assert_eq!(name.into_string(), "orders".to_string());
    }

    #[test]
    fn test_valid_field_names() {
        assert!(ValidatedFieldName::new("field").is_ok());
        assert!(ValidatedFieldName::new("address.city").is_ok());
        assert!(ValidatedFieldName::new("tags.0").is_ok());
    }

    #[test]
    fn test_invalid_field_names() {
        assert!(ValidatedFieldName::new("").is_err());
        assert!(ValidatedFieldName::new("$where").is_err());
        assert!(ValidatedFieldName::new("bad\0name").is_err());
        assert!(ValidatedFieldName::new("a..b").is_err());
        assert!(ValidatedFieldName::new(".leading").is_err());
        assert!(ValidatedFieldName::new(&"f".repeat(1025)).is_err());
    }

    #[test]
    fn test_validate_document_nested() {
        assert!(validate_document(&doc! { "a": 1, "b": { "c": [ { "d": 2 } ] } }).is_ok());

        let nested = doc! { "a": { "$gt": 1 } };
        assert!(matches!(
            validate_document(&nested),
            Err(TidalError::Validation(_))
        ));

        let in_array = doc! { "items": [ { "$set": 1 } ] };
        assert!(validate_document(&in_array).is_err());
    }
}
