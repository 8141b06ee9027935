use serde::Serialize;

/// A unit of upload to the configuration store.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub base_path: String,
    pub items: Vec<BatchItem>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BatchItem {
    pub path: String,
    pub filename: String,
    pub content: serde_json::Value,
}

/// A versioned configuration store, organized as codebases under paths.
#[async_trait::async_trait]
pub trait ConfigStore: Send + Sync {
    async fn codebase_exists(&self, path: &str) -> bool;

    /// Writes every item of every batch and commits each touched codebase.
    async fn batch(&self, batches: Vec<Batch>) -> anyhow::Result<()>;
}

// === impl BatchItem ===

impl BatchItem {
    pub fn json<T: Serialize>(
        path: impl Into<String>,
        filename: impl Into<String>,
        content: &T,
    ) -> serde_json::Result<Self> {
        Ok(Self {
            path: path.into(),
            filename: filename.into(),
            content: serde_json::to_value(content)?,
        })
    }
}
