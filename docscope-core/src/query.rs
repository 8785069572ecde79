//! Turns operator-typed filter text into a bounded query.
//!
//! The [`QueryBuilder`] accepts either a bare document identifier (the "jump to one document"
//! fast path) or up to two comma-separated mappings, a selector and an options bag:
//!
//! ```text
//! 5f1d7c2e9b1e8a3d4c5b6a79
//! {status: 'open'}
//! {status: 'open'}, {sort: {createdAt: -1}, fields: {status: 1}}
//! ```
//!
//! The text is read by the strict literal parser in [`crate::literal`]. Skip and limit default
//! to the page derived from the page number and the effective page size.

use bson::{Bson, Document, doc};

use crate::{
    backend::QueryOptions,
    catalog::CollectionRecord,
    document::{ID_FIELD, objectify_id, resembles_object_id},
    error::{DocumentStoreError, DocumentStoreResult},
    literal::parse_list,
    page::Pagination,
    settings::Settings,
};

/// A selector/options pair ready to run against a store handle.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedQuery {
    pub selector: Document,
    pub options: QueryOptions,
    pub pagination: Pagination,
}

impl ResolvedQuery {
    /// The display index of the first document of the page.
    pub fn first_index(&self) -> u64 {
        self.options.skip.unwrap_or(0).saturating_add(1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    settings: Settings,
}

impl QueryBuilder {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The collection's page size override if positive, else the global default.
    pub fn pagination_limit(&self, collection: &CollectionRecord) -> u64 {
        match collection.pagination_limit {
            Some(limit) if limit > 0 => limit as u64,
            _ => self.settings.page_size(),
        }
    }

    /// Builds the query for page `page` (1-based) of `collection`.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidFilter`] when the filter cannot be parsed or uses an
    /// unsupported option.
    pub fn build(
        &self,
        filter: &str,
        collection: &CollectionRecord,
        page: u64,
    ) -> DocumentStoreResult<ResolvedQuery> {
        let (selector, mut options) = parse_filter(filter)?;
        let pagination = Pagination::new(page, self.pagination_limit(collection));

        if options.skip.is_none() {
            options.skip = Some(pagination.skip());
        }

        // A zero limit would make the query unbounded.
        if options.limit.is_none_or(|limit| limit == 0) {
            options.limit = Some(pagination.limit());
        }

        Ok(ResolvedQuery {
            selector,
            options,
            pagination,
        })
    }
}

/// Splits filter text into a selector and parsed options.
pub fn parse_filter(filter: &str) -> DocumentStoreResult<(Document, QueryOptions)> {
    if let Some(id) = bare_identifier(filter) {
        return Ok((doc! { ID_FIELD: id }, QueryOptions::default()));
    }

    let mut values = parse_list(filter)?.into_iter();

    if values.len() > 2 {
        return Err(DocumentStoreError::InvalidFilter(format!(
            "expected a selector and an options mapping, got {} values",
            values.len()
        )));
    }

    let selector = match values.next() {
        None | Some(Bson::Null) => Document::new(),
        Some(Bson::Document(selector)) => selector,
        Some(Bson::ObjectId(oid)) => doc! { ID_FIELD: oid },
        Some(other) => {
            return Err(DocumentStoreError::InvalidFilter(format!(
                "selector must be a mapping, got {:?}",
                other.element_type()
            )));
        }
    };

    let options = match values.next() {
        None | Some(Bson::Null) => QueryOptions::default(),
        Some(Bson::Document(bag)) => parse_options(bag)?,
        Some(other) => {
            return Err(DocumentStoreError::InvalidFilter(format!(
                "options must be a mapping, got {:?}",
                other.element_type()
            )));
        }
    };

    reject_server_code(&selector)?;
    for bag in [&options.fields, &options.sort].into_iter().flatten() {
        reject_server_code(bag)?;
    }

    Ok((selector, options))
}

/// Operators whose argument the server runs as JavaScript.
const SERVER_CODE_OPERATORS: [&str; 3] = ["$where", "$function", "$accumulator"];

/// Walks every key of `document`, nested documents and arrays included, and rejects
/// server-side JavaScript operators.
fn reject_server_code(document: &Document) -> DocumentStoreResult<()> {
    for (key, value) in document {
        if SERVER_CODE_OPERATORS.contains(&key.as_str()) {
            return Err(DocumentStoreError::InvalidFilter(format!(
                "operator '{}' runs code on the server and is not allowed",
                key
            )));
        }
        reject_server_code_in(value)?;
    }

    Ok(())
}

fn reject_server_code_in(value: &Bson) -> DocumentStoreResult<()> {
    match value {
        Bson::Document(inner) => reject_server_code(inner),
        Bson::Array(items) => items.iter().try_for_each(reject_server_code_in),
        Bson::JavaScriptCode(_) | Bson::JavaScriptCodeWithScope(_) => Err(
            DocumentStoreError::InvalidFilter("JavaScript values are not allowed".to_string()),
        ),
        _ => Ok(()),
    }
}

fn bare_identifier(filter: &str) -> Option<Bson> {
    let trimmed = filter.trim();
    let unquoted = ['"', '\'']
        .iter()
        .find_map(|q| trimmed.strip_prefix(*q).and_then(|rest| rest.strip_suffix(*q)))
        .unwrap_or(trimmed);

    resembles_object_id(unquoted).then(|| objectify_id(unquoted))
}

fn parse_options(bag: Document) -> DocumentStoreResult<QueryOptions> {
    let mut options = QueryOptions::default();

    for (key, value) in bag {
        match key.as_str() {
            "fields" | "projection" => match value {
                Bson::Document(fields) => options.fields = Some(fields),
                other => return Err(invalid_option(&key, &other)),
            },
            "sort" => options.sort = Some(parse_sort(value)?),
            "skip" => options.skip = Some(non_negative(&key, &value)?),
            "limit" => options.limit = Some(non_negative(&key, &value)?),
            other => {
                return Err(DocumentStoreError::InvalidFilter(format!(
                    "unsupported option '{}'",
                    other
                )));
            }
        }
    }

    Ok(options)
}

/// Normalizes the sort forms the shell accepts into a `{field: 1 | -1}` document.
///
/// Accepted: `{a: 1, b: -1}`, `{a: 'desc'}`, `[['a', 1], ['b', 'desc']]` and `['a', 'b']`.
fn parse_sort(value: Bson) -> DocumentStoreResult<Document> {
    let mut sort = Document::new();

    match value {
        Bson::Document(fields) => {
            for (field, direction) in fields {
                let direction = sort_direction(&field, &direction)?;
                sort.insert(field, direction);
            }
        }
        Bson::Array(items) => {
            for item in items {
                match item {
                    Bson::String(field) => {
                        sort.insert(field, 1);
                    }
                    Bson::Array(pair) => match pair.as_slice() {
                        [Bson::String(field), direction] => {
                            let direction = sort_direction(field, direction)?;
                            sort.insert(field.clone(), direction);
                        }
                        _ => return Err(invalid_option("sort", &Bson::Array(pair.clone()))),
                    },
                    other => return Err(invalid_option("sort", &other)),
                }
            }
        }
        other => return Err(invalid_option("sort", &other)),
    }

    Ok(sort)
}

fn sort_direction(field: &str, direction: &Bson) -> DocumentStoreResult<i32> {
    let parsed = match direction {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) if n.fract() == 0.0 => Some(*n as i64),
        Bson::String(s) => match s.to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Some(1),
            "desc" | "descending" => Some(-1),
            _ => None,
        },
        _ => None,
    };

    match parsed {
        Some(1) => Ok(1),
        Some(-1) => Ok(-1),
        _ => Err(DocumentStoreError::InvalidFilter(format!(
            "sort direction for '{}' must be 1, -1, 'asc' or 'desc'",
            field
        ))),
    }
}

/// Reads a skip or limit. Values must fit a signed 64-bit count, as the server requires.
fn non_negative(key: &str, value: &Bson) -> DocumentStoreResult<u64> {
    let parsed = match value {
        Bson::Int32(n) => u64::try_from(*n).ok(),
        Bson::Int64(n) => u64::try_from(*n).ok(),
        // i64::MAX as f64 rounds up to 2^63, so the bound is exclusive.
        Bson::Double(n) if n.fract() == 0.0 && *n >= 0.0 && *n < i64::MAX as f64 => Some(*n as u64),
        _ => None,
    };

    parsed.ok_or_else(|| invalid_option(key, value))
}

fn invalid_option(key: &str, value: &Bson) -> DocumentStoreError {
    DocumentStoreError::InvalidFilter(format!("invalid value for option '{}': {}", key, value))
}
