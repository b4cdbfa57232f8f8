//! Static validation descriptors (spec.md §9: replaces dynamically-typed
//! rule strings like `"required|string|username"` with a fixed, documented
//! descriptor set).

/// The shape a validated field must take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Array,
    Object,
}

/// A fixed, documented pattern a string field must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPattern {
    Username,
    EntityId,
    TagValue,
}

impl FieldPattern {
    /// Check `value` against this pattern. These are intentionally
    /// conservative — the pattern set is fixed and documented, not
    /// extensible at runtime.
    pub fn matches(self, value: &str) -> bool {
        match self {
            FieldPattern::Username => {
                !value.is_empty()
                    && value.len() <= 64
                    && value
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            }
            FieldPattern::EntityId => {
                !value.is_empty()
                    && value.len() <= crate::entity::ENTITY_ID_MAX_LEN
                    && value.bytes().all(|b| b.is_ascii_graphic() || b == b' ')
            }
            FieldPattern::TagValue => {
                !value.is_empty() && value.chars().all(|c| c.is_ascii_graphic() || c == ' ')
            }
        }
    }
}

/// A static description of one input field's validation rule, replacing a
/// dynamically-typed rule string.
#[derive(Debug, Clone, Copy)]
pub struct ValidationDescriptor {
    pub required: bool,
    pub kind: FieldKind,
    pub pattern: Option<FieldPattern>,
    /// For `FieldKind::Array`, the pattern each item must match.
    pub item_pattern: Option<FieldPattern>,
}

impl ValidationDescriptor {
    /// Validate a single string-typed field against this descriptor.
    /// Returns `Ok(())` or an explanatory message suitable for
    /// [`crate::Error::Validation`].
    pub fn validate_string(&self, field: &str, value: Option<&str>) -> Result<(), String> {
        match value {
            None | Some("") if self.required => {
                Err(format!("field {field:?} is required"))
            }
            Some(v) => {
                if let Some(pattern) = self.pattern {
                    if !pattern.matches(v) {
                        return Err(format!("field {field:?} failed pattern validation"));
                    }
                }
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_pattern_rejects_oversize() {
        let long = "a".repeat(100);
        assert!(!FieldPattern::EntityId.matches(&long));
    }

    #[test]
    fn username_pattern() {
        assert!(FieldPattern::Username.matches("alice_01"));
        assert!(!FieldPattern::Username.matches("alice!"));
    }

    #[test]
    fn required_field_missing() {
        let d = ValidationDescriptor {
            required: true,
            kind: FieldKind::String,
            pattern: None,
            item_pattern: None,
        };
        assert!(d.validate_string("name", None).is_err());
        assert!(d.validate_string("name", Some("x")).is_ok());
    }
}
