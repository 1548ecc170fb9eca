/// Mapping metadata of one entity type, as resolved by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassMetadata {
    name: String,
    identifier: Vec<String>,
}

impl ClassMetadata {
    pub fn new(name: impl Into<String>, identifier: Vec<String>) -> Self {
        Self {
            name: name.into(),
            identifier,
        }
    }

    /// Type name used in the identity map and in error messages
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Primary-key field names, in declaration order
    pub fn identifier(&self) -> &[String] {
        &self.identifier
    }
}
