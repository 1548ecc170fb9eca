use crate::model::Value;

/// Primary-key values of one record, in identifier declaration order
///
/// A key always names its fields so that composite keys render the same way
/// everywhere (`book(1), year(2019)`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct EntityKey {
    fields: Vec<(String, Value)>,
}

impl EntityKey {
    /// Create an empty key
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Create a single-field key
    pub fn single(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::new().with(field, value)
    }

    /// Append a field, or replace its value if already present
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        let field = field.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == field) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((field, value)),
        }
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Serialized form used as the identity-map key
    ///
    /// Values joined by a single space, in field order.
    pub fn id_hash(&self) -> String {
        self.fields
            .iter()
            .map(|(_, value)| value.to_string())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Human-readable rendering: `field(value)` joined by `, `
    pub fn describe(&self) -> String {
        self.fields
            .iter()
            .map(|(name, value)| format!("{}({})", name, value))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}
