/// A single row read from a source: field name → string value, kept in schema order.
///
/// Records are produced by the source readers and are not modified once read, apart from
/// the reader itself swapping a file reference for the resolved file text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    fields: Vec<(String, String)>,
}

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a record from `(field, value)` pairs, preserving their order.
    ///
    /// # Examples
    ///
    /// ```
    /// use craml::Record;
    ///
    /// let record = Record::from_pairs([("id", "7"), ("body", "some text")]);
    /// assert_eq!(record.get("id"), Some("7"));
    /// assert_eq!(record.get("missing"), None);
    /// ```
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let mut record = Self::new();
        for (k, v) in pairs {
            record.insert(k, v);
        }
        record
    }

    /// Sets a field, replacing any previous value while keeping its position.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<String>) {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field, value)),
        }
    }

    /// Returns the value of a field, if present.
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value.as_str())
    }

    /// Removes a field and returns its value.
    pub fn remove(&mut self, field: &str) -> Option<String> {
        let position = self.fields.iter().position(|(name, _)| name == field)?;
        Some(self.fields.remove(position).1)
    }

    /// Returns all fields in order.
    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_replaces_in_place() {
        let mut record = Record::from_pairs([("a", "1"), ("b", "2")]);
        record.insert("a", "3");

        assert_eq!(record.len(), 2);
        assert_eq!(record.fields()[0], ("a".to_string(), "3".to_string()));
    }

    #[test]
    fn remove_returns_value_and_keeps_order() {
        let mut record = Record::from_pairs([("a", "1"), ("b", "2"), ("c", "3")]);

        assert_eq!(record.remove("b"), Some("2".to_string()));
        assert_eq!(record.remove("b"), None);
        let names: Vec<&str> = record.fields().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }
}
