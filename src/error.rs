use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Invalid namespace '{namespace}': {reason}")]
    InvalidNamespace { namespace: String, reason: String },

    /// The taxonomy backend could not be reached or answered garbage.
    /// Never reported as an unknown organism.
    #[error("Taxonomy lookup via '{source_desc}' failed: {reason}")]
    Transport { source_desc: String, reason: String },

    #[error("Reference taxonomy dataset error: {0}")]
    Dataset(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(
        "This genome exceeds the maximum permitted size: {size} bytes > {max} bytes{}",
        format_breakdown(.breakdown)
    )]
    SizeExceeded {
        size: u64,
        max: u64,
        breakdown: Vec<(String, u64)>,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

fn format_breakdown(breakdown: &[(String, u64)]) -> String {
    if breakdown.is_empty() {
        return String::new();
    }
    let lines = breakdown
        .iter()
        .map(|(field, bytes)| format!("  {field}: {bytes} bytes"))
        .collect::<Vec<_>>()
        .join("\n");
    format!("\nLargest list fields:\n{lines}")
}

impl ImportError {
    pub(crate) fn transport(source_desc: &str, reason: impl ToString) -> Self {
        ImportError::Transport {
            source_desc: source_desc.to_string(),
            reason: reason.to_string(),
        }
    }
}
