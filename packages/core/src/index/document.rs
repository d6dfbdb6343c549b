//! Index documents
//!
//! A document is a disposable projection of one stored value: a compressed
//! payload to rebuild the value from, keyword and text terms to match on,
//! and one sort value per sortable field.

use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub key: String,
    /// Compressed serialized value
    pub source: Vec<u8>,
    /// Exact terms per field
    pub keywords: BTreeMap<String, Vec<String>>,
    /// Tokens per tokenized field
    pub texts: BTreeMap<String, Vec<String>>,
    pub sortables: BTreeMap<String, String>,
}

impl Document {
    pub fn new(key: impl Into<String>, source: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            source,
            keywords: BTreeMap::new(),
            texts: BTreeMap::new(),
            sortables: BTreeMap::new(),
        }
    }

    pub fn add_keyword(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.keywords
            .entry(field.into())
            .or_default()
            .push(value.into());
    }

    pub fn add_tokens(&mut self, field: impl Into<String>, tokens: Vec<String>) {
        if tokens.is_empty() {
            return;
        }
        self.texts.entry(field.into()).or_default().extend(tokens);
    }

    /// Keep the first sort value set for a field
    pub fn add_sortable(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.sortables.entry(field.into()).or_insert_with(|| value.into());
    }

    /// Every `(field, term)` pair the document is findable by
    pub fn terms(&self) -> impl Iterator<Item = (&str, &str)> {
        self.keywords
            .iter()
            .chain(self.texts.iter())
            .flat_map(|(field, values)| values.iter().map(move |v| (field.as_str(), v.as_str())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sortable_wins() {
        let mut doc = Document::new("k", Vec::new());
        doc.add_sortable("name", "b");
        doc.add_sortable("name", "a");
        assert_eq!(doc.sortables["name"], "b");
    }

    #[test]
    fn test_terms_cover_keywords_and_tokens() {
        let mut doc = Document::new("k", Vec::new());
        doc.add_keyword("code", "C-1");
        doc.add_tokens("label", vec!["big".to_string(), "cat".to_string()]);
        doc.add_tokens("empty", Vec::new());

        let terms: Vec<_> = doc.terms().collect();
        assert_eq!(terms, vec![("code", "C-1"), ("label", "big"), ("label", "cat")]);
        assert!(!doc.texts.contains_key("empty"));
    }
}
