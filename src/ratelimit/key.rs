//! Client key construction for quota namespacing.

use std::fmt;

/// A key identifying which quota a request is checked against.
///
/// A bare client identifier (typically a resolved IP address) shares one
/// quota across everything that uses it; adding an operation name gives
/// each gated operation its own namespace, e.g. `login:203.0.113.7`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey {
    /// Optional operation namespace
    pub operation: Option<String>,
    /// The client identifier
    pub client: String,
}

impl ClientKey {
    /// Create a key with no operation namespace.
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            operation: None,
            client: client.into(),
        }
    }

    /// Create a key scoped to an operation.
    pub fn scoped(operation: impl Into<String>, client: impl Into<String>) -> Self {
        Self {
            operation: Some(operation.into()),
            client: client.into(),
        }
    }
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.operation {
            Some(operation) => write!(f, "{}:{}", operation, self.client),
            None => write!(f, "{}", self.client),
        }
    }
}
