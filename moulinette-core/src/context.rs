use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Per-run parameters handed to fetchers and written to `context.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub request_date: String,

    /// Free-form values exposed to the inspector.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new(request_date: impl Into<String>) -> Self {
        Self {
            request_date: request_date.into(),
            extra: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}
