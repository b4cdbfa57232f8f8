//! Applies the static [`ValidationDescriptor`] set to `Create`/`Update`
//! input before it reaches `entitydb-engine` (spec.md §9 design note,
//! SPEC_FULL §4.10). `EntityId::new`/`TagValue::new` already reject
//! malformed values on their own, so this layer's job is to fail fast with
//! a field-labelled message rather than to re-derive the same rules.

use entitydb_core::{Error, FieldKind, FieldPattern, Result, ValidationDescriptor};

const ID_DESCRIPTOR: ValidationDescriptor = ValidationDescriptor {
    required: true,
    kind: FieldKind::String,
    pattern: Some(FieldPattern::EntityId),
    item_pattern: None,
};

const TAGS_DESCRIPTOR: ValidationDescriptor = ValidationDescriptor {
    required: false,
    kind: FieldKind::Array,
    pattern: None,
    item_pattern: Some(FieldPattern::TagValue),
};

/// Validate a `Create`/`Update` request's id and tag strings, returning
/// `Error::Validation` with the offending field named.
pub fn validate_entity_input(id: &str, tags: &[String]) -> Result<()> {
    ID_DESCRIPTOR
        .validate_string("id", Some(id))
        .map_err(Error::Validation)?;

    if let Some(pattern) = TAGS_DESCRIPTOR.item_pattern {
        for (index, tag) in tags.iter().enumerate() {
            if !pattern.matches(tag) {
                return Err(Error::Validation(format!(
                    "tags[{index}] {tag:?} failed pattern validation"
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_id() {
        assert!(validate_entity_input("", &[]).is_err());
    }

    #[test]
    fn rejects_non_printable_tag() {
        let tags = vec!["status:\u{7}broken".to_string()];
        assert!(validate_entity_input("doc-1", &tags).is_err());
    }

    #[test]
    fn accepts_well_formed_input() {
        let tags = vec!["status:active".to_string()];
        assert!(validate_entity_input("doc-1", &tags).is_ok());
    }
}
