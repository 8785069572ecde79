//! Process-wide browsing settings.
//!
//! Settings are owned by the embedding application and handed to the
//! [`QueryBuilder`](crate::query::QueryBuilder) when it is constructed. The core only reads them.

use serde::{Deserialize, Serialize};

use crate::error::DocumentStoreResult;

/// Documents per page used when neither the collection nor the settings say otherwise.
pub const DEFAULT_DOCUMENTS_PER_PAGE: i64 = 20;

/// Environment variable read by [`Settings::from_env`].
pub const DOCUMENTS_PER_PAGE_VAR: &str = "DOCSCOPE_DOCUMENTS_PER_PAGE";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Default number of documents shown per page.
    #[serde(default = "default_documents_per_page")]
    pub documents_per_page: i64,
}

fn default_documents_per_page() -> i64 {
    DEFAULT_DOCUMENTS_PER_PAGE
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            documents_per_page: DEFAULT_DOCUMENTS_PER_PAGE,
        }
    }
}

impl Settings {
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::default()
    }

    /// Reads settings from a JSON object such as `{"documentsPerPage": 50}`.
    /// Missing keys fall back to their defaults.
    pub fn from_json(json: &str) -> DocumentStoreResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads settings from the process environment, ignoring unparsable values.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads settings through an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut settings = Self::default();

        if let Some(value) = lookup(DOCUMENTS_PER_PAGE_VAR) {
            match value.trim().parse::<i64>() {
                Ok(parsed) => settings.documents_per_page = parsed,
                Err(_) => tracing::warn!(
                    var = DOCUMENTS_PER_PAGE_VAR,
                    value = %value,
                    "Ignoring unparsable documents-per-page setting"
                ),
            }
        }

        settings
    }

    /// The default page size coerced to a positive integer.
    pub fn page_size(&self) -> u64 {
        if self.documents_per_page > 0 {
            self.documents_per_page as u64
        } else {
            DEFAULT_DOCUMENTS_PER_PAGE as u64
        }
    }
}

/// Builder for [`Settings`].
#[derive(Default)]
pub struct SettingsBuilder {
    documents_per_page: Option<i64>,
}

impl SettingsBuilder {
    pub fn with_documents_per_page(mut self, documents_per_page: i64) -> Self {
        self.documents_per_page = Some(documents_per_page);
        self
    }

    pub fn build(self) -> Settings {
        Settings {
            documents_per_page: self
                .documents_per_page
                .unwrap_or(DEFAULT_DOCUMENTS_PER_PAGE),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_json_with_defaults() {
        assert_eq!(Settings::from_json("{\"documentsPerPage\": 50}").unwrap().documents_per_page, 50);
        assert_eq!(Settings::from_json("{}").unwrap(), Settings::default());
        assert!(Settings::from_json("[]").is_err());
    }

    #[test]
    fn reads_lookup() {
        let settings = Settings::from_lookup(|key| (key == DOCUMENTS_PER_PAGE_VAR).then(|| " 7 ".to_string()));
        assert_eq!(settings.documents_per_page, 7);

        let ignored = Settings::from_lookup(|_| Some("many".to_string()));
        assert_eq!(ignored, Settings::default());
    }

    #[test]
    fn page_size_is_positive() {
        assert_eq!(Settings::builder().with_documents_per_page(0).build().page_size(), 20);
        assert_eq!(Settings::builder().with_documents_per_page(-3).build().page_size(), 20);
        assert_eq!(Settings::builder().with_documents_per_page(5).build().page_size(), 5);
    }
}
