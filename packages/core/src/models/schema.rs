//! Type Definitions
//!
//! Types are managed outside the store. The store consumes them through a
//! resolver to validate writes and to generate codes for new nodes.

use crate::models::node::{TypeId, ANY_REGEX};
use serde::{Deserialize, Serialize};

/// A text attribute declared on a type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextAttribute {
    pub id: String,
    pub regex: String,
}

impl TextAttribute {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            regex: ANY_REGEX.to_string(),
        }
    }

    pub fn with_regex(mut self, regex: impl Into<String>) -> Self {
        self.regex = regex.into();
        self
    }
}

/// A reference attribute declared on a type, pointing at nodes of `range`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceAttribute {
    pub id: String,
    pub range: TypeId,
}

impl ReferenceAttribute {
    pub fn new(id: impl Into<String>, range: TypeId) -> Self {
        Self {
            id: id.into(),
            range,
        }
    }
}

/// A node type with its declared attributes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeDef {
    pub id: TypeId,
    #[serde(default)]
    pub node_code_prefix: Option<String>,
    #[serde(default)]
    pub text_attributes: Vec<TextAttribute>,
    #[serde(default)]
    pub reference_attributes: Vec<ReferenceAttribute>,
}

impl TypeDef {
    pub fn new(id: TypeId) -> Self {
        Self {
            id,
            node_code_prefix: None,
            text_attributes: Vec::new(),
            reference_attributes: Vec::new(),
        }
    }

    pub fn with_code_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.node_code_prefix = Some(prefix.into());
        self
    }

    pub fn with_text_attribute(mut self, attribute: TextAttribute) -> Self {
        self.text_attributes.push(attribute);
        self
    }

    pub fn with_reference_attribute(mut self, attribute: ReferenceAttribute) -> Self {
        self.reference_attributes.push(attribute);
        self
    }

    pub fn text_attribute(&self, id: &str) -> Option<&TextAttribute> {
        self.text_attributes.iter().find(|a| a.id == id)
    }

    pub fn reference_attribute(&self, id: &str) -> Option<&ReferenceAttribute> {
        self.reference_attributes.iter().find(|a| a.id == id)
    }

    /// Code prefix for generated node codes, `{type id lowercased}-` if unset
    pub fn node_code_prefix_or_default(&self) -> String {
        self.node_code_prefix
            .clone()
            .unwrap_or_else(|| format!("{}-", self.id.id.to_lowercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_default_code_prefix() {
        let t = TypeDef::new(TypeId::new(Uuid::new_v4(), "Concept"));
        assert_eq!(t.node_code_prefix_or_default(), "concept-");
        assert_eq!(t.with_code_prefix("C").node_code_prefix_or_default(), "C");
    }
}
