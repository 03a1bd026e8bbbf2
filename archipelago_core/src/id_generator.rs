//! Island id generation.
//!
//! Generators are plain objects owned by whoever needs ids, never globals,
//! so two engines in one process cannot step on each other's sequences.

/// Source of unique island ids.
pub trait IdGenerator: Send {
    /// Returns the next id. Ids are never repeated by one generator.
    fn generate_id(&mut self) -> String;
}

/// Yields `{prefix}1`, `{prefix}2`, ...
#[derive(Debug, Clone)]
pub struct SequentialIdGenerator {
    prefix: String,
    current: u64,
}

impl SequentialIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            current: 0,
        }
    }
}

impl Default for SequentialIdGenerator {
    fn default() -> Self {
        Self::new("I")
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn generate_id(&mut self) -> String {
        self.current += 1;
        format!("{}{}", self.prefix, self.current)
    }
}
