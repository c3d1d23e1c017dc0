use serde::{Deserialize, Serialize};

/// Batch-level classification of an item failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCode {
    /// The upload is not a supported media type.
    UnsupportedMedia,
    /// The item's data was removed while it was being processed.
    DataRemoved,
    /// The input, or the worker's answer for it, was unusable.
    BadInput,
    /// Anything else.
    Internal,
}

impl FailureCode {
    /// HTTP status the outer layer reports for this code.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::UnsupportedMedia => 415,
            Self::DataRemoved => 410,
            Self::BadInput => 400,
            Self::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnsupportedMedia => "unsupported_media",
            Self::DataRemoved => "data_removed",
            Self::BadInput => "bad_input",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for FailureCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered preference used to pick the single code of a failed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailurePriority {
    order: Vec<FailureCode>,
}

impl FailurePriority {
    pub fn new(order: Vec<FailureCode>) -> Self {
        Self { order }
    }

    /// The highest-priority code present in `codes`.
    ///
    /// Codes missing from the order rank below every listed one and collapse
    /// to `Internal`. Returns `None` when `codes` is empty.
    pub fn most_relevant(
        &self,
        codes: impl IntoIterator<Item = FailureCode>,
    ) -> Option<FailureCode> {
        let codes: Vec<FailureCode> = codes.into_iter().collect();
        if codes.is_empty() {
            return None;
        }
        self.order
            .iter()
            .find(|code| codes.contains(code))
            .copied()
            .or(Some(FailureCode::Internal))
    }
}

impl Default for FailurePriority {
    fn default() -> Self {
        Self::new(vec![
            FailureCode::UnsupportedMedia,
            FailureCode::DataRemoved,
            FailureCode::BadInput,
            FailureCode::Internal,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_priority_prefers_unsupported_media() {
        let priority = FailurePriority::default();
        assert_eq!(
            priority.most_relevant([FailureCode::Internal, FailureCode::UnsupportedMedia]),
            Some(FailureCode::UnsupportedMedia)
        );
        assert_eq!(
            priority.most_relevant([FailureCode::Internal, FailureCode::BadInput]),
            Some(FailureCode::BadInput)
        );
        assert_eq!(
            priority.most_relevant([FailureCode::Internal]),
            Some(FailureCode::Internal)
        );
        assert_eq!(priority.most_relevant([]), None);
    }

    #[test]
    fn test_custom_priority() {
        let priority = FailurePriority::new(vec![FailureCode::Internal, FailureCode::BadInput]);
        assert_eq!(
            priority.most_relevant([FailureCode::BadInput, FailureCode::Internal]),
            Some(FailureCode::Internal)
        );
        // Unlisted codes collapse to internal.
        assert_eq!(
            priority.most_relevant([FailureCode::DataRemoved]),
            Some(FailureCode::Internal)
        );
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&FailureCode::UnsupportedMedia).unwrap();
        assert_eq!(json, "\"unsupported_media\"");
        let code: FailureCode = serde_json::from_str("\"data_removed\"").unwrap();
        assert_eq!(code, FailureCode::DataRemoved);
        assert_eq!(FailureCode::DataRemoved.http_status(), 410);
    }
}
