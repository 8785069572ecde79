//! Selector evaluation, sorting and projection for in-memory documents.
//!
//! This module understands the subset of the store's query language needed to browse data:
//! field equality, `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in`, `$nin`, `$exists`,
//! `$not`, and the logical `$and`, `$or`, `$nor`. Dotted paths reach into embedded documents
//! and array elements. Unknown operators are rejected rather than silently ignored.

use bson::{Bson, Document, datetime::DateTime, oid::ObjectId};
use std::{cmp::Ordering, collections::HashMap};

use docscope_core::error::{DocumentStoreError, DocumentStoreResult};

/// Type-erased, comparable representation of BSON values.
///
/// Numeric types are normalized to f64 so `1`, `1i64` and `1.0` compare equal.
#[derive(Debug)]
pub(crate) enum Comparable<'a> {
    Null,
    Bool(bool),
    Number(f64),
    DateTime(DateTime),
    String(&'a str),
    ObjectId(ObjectId),
    Array(Vec<Comparable<'a>>),
    Map(HashMap<&'a str, Comparable<'a>>),
}

impl<'a> From<&'a Bson> for Comparable<'a> {
    fn from(bson: &'a Bson) -> Self {
        match bson {
            Bson::Null => Comparable::Null,
            Bson::Boolean(value) => Comparable::Bool(*value),
            Bson::Int32(value) => Comparable::Number(*value as f64),
            Bson::Int64(value) => Comparable::Number(*value as f64),
            Bson::Double(value) => Comparable::Number(*value),
            Bson::DateTime(value) => Comparable::DateTime(*value),
            Bson::String(value) => Comparable::String(value),
            Bson::ObjectId(value) => Comparable::ObjectId(*value),
            Bson::Array(arr) => Comparable::Array(arr.iter().map(Comparable::from).collect()),
            Bson::Document(doc) => Comparable::Map(
                doc.iter()
                    .map(|(k, v)| (k.as_str(), Comparable::from(v)))
                    .collect(),
            ),
            _ => Comparable::Null, // Other types are not comparable
        }
    }
}

impl<'a> Comparable<'a> {
    /// Position in the cross-type sort order used by the store.
    fn rank(&self) -> u8 {
        match self {
            Comparable::Null => 0,
            Comparable::Number(_) => 1,
            Comparable::String(_) => 2,
            Comparable::Map(_) => 3,
            Comparable::Array(_) => 4,
            Comparable::ObjectId(_) => 5,
            Comparable::Bool(_) => 6,
            Comparable::DateTime(_) => 7,
        }
    }

    /// Total order used for sorting: by type rank, then by value.
    fn sort_cmp(&self, other: &Self) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| match (self, other) {
                (Comparable::Array(a), Comparable::Array(b)) => a
                    .iter()
                    .zip(b.iter())
                    .map(|(x, y)| x.sort_cmp(y))
                    .find(|o| *o != Ordering::Equal)
                    .unwrap_or_else(|| a.len().cmp(&b.len())),
                _ => self.partial_cmp(other).unwrap_or(Ordering::Equal),
            })
    }
}

impl<'a> PartialEq for Comparable<'a> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => true,
            (Comparable::Bool(a), Comparable::Bool(b)) => a == b,
            (Comparable::Number(a), Comparable::Number(b)) => a == b,
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a == b,
            (Comparable::String(a), Comparable::String(b)) => a == b,
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a == b,
            (Comparable::Array(a), Comparable::Array(b)) => a == b,
            (Comparable::Map(a), Comparable::Map(b)) => a == b,
            _ => false,
        }
    }
}

impl<'a> PartialOrd for Comparable<'a> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        match (self, other) {
            (Comparable::Null, Comparable::Null) => Some(Ordering::Equal),
            (Comparable::Bool(a), Comparable::Bool(b)) => a.partial_cmp(b),
            (Comparable::Number(a), Comparable::Number(b)) => a.partial_cmp(b),
            (Comparable::DateTime(a), Comparable::DateTime(b)) => a.partial_cmp(b),
            (Comparable::String(a), Comparable::String(b)) => a.partial_cmp(b),
            (Comparable::ObjectId(a), Comparable::ObjectId(b)) => a.bytes().partial_cmp(&b.bytes()),
            _ => None,
        }
    }
}

/// Collects the values reachable through a dotted path, descending into arrays.
fn path_values<'a>(value: &'a Bson, path: &[&str], out: &mut Vec<&'a Bson>) {
    let Some((head, rest)) = path.split_first() else {
        out.push(value);
        return;
    };

    match value {
        Bson::Document(doc) => {
            if let Some(next) = doc.get(*head) {
                path_values(next, rest, out);
            }
        }
        Bson::Array(items) => match head.parse::<usize>() {
            Ok(index) => {
                if let Some(next) = items.get(index) {
                    path_values(next, rest, out);
                }
            }
            Err(_) => {
                for item in items.iter().filter(|item| matches!(item, Bson::Document(_))) {
                    path_values(item, path, out);
                }
            }
        },
        _ => {}
    }
}

fn lookup<'a>(document: &'a Document, field: &str) -> Vec<&'a Bson> {
    let path = field.split('.').collect::<Vec<_>>();
    let mut out = Vec::new();

    if let Some((head, rest)) = path.split_first() {
        if let Some(value) = document.get(*head) {
            path_values(value, rest, &mut out);
        }
    }

    out
}

/// Equality as the store applies it: a scalar condition also matches array elements.
fn value_matches(value: &Bson, expected: &Bson) -> bool {
    let left = Comparable::from(value);
    let right = Comparable::from(expected);

    if left == right {
        return true;
    }

    match (&left, &right) {
        (Comparable::Array(items), expected) => items.iter().any(|item| item == expected),
        _ => false,
    }
}

fn compare_matches(value: &Bson, expected: &Bson, accept: fn(Ordering) -> bool) -> bool {
    let right = Comparable::from(expected);

    let check = |left: &Comparable<'_>| {
        left.rank() == right.rank()
            && left
                .partial_cmp(&right)
                .is_some_and(accept)
    };

    match Comparable::from(value) {
        Comparable::Array(items) if !matches!(right, Comparable::Array(_)) => items.iter().any(check),
        left => check(&left),
    }
}

pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    /// Returns true when the document matches `selector`.
    pub fn matches(&self, selector: &Document) -> DocumentStoreResult<bool> {
        for (key, condition) in selector {
            let matched = match key.as_str() {
                "$and" => self.all_of(condition)?,
                "$or" => self.any_of(condition)?,
                "$nor" => !self.any_of(condition)?,
                op if op.starts_with('$') => return Err(unsupported(op)),
                field => self.field_matches(field, condition)?,
            };

            if !matched {
                return Ok(false);
            }
        }

        Ok(true)
    }

    pub fn filter_documents(documents: &[Document], selector: &Document) -> DocumentStoreResult<Vec<Document>> {
        let mut matched = Vec::new();

        for document in documents {
            if DocumentEvaluator::new(document).matches(selector)? {
                matched.push(document.clone());
            }
        }

        Ok(matched)
    }

    fn clauses(condition: &Bson) -> DocumentStoreResult<Vec<&Document>> {
        match condition {
            Bson::Array(items) if !items.is_empty() => items
                .iter()
                .map(|item| {
                    item.as_document()
                        .ok_or_else(|| DocumentStoreError::Backend("logical clauses must be documents".to_string()))
                })
                .collect(),
            _ => Err(DocumentStoreError::Backend(
                "logical operators take a non-empty array".to_string(),
            )),
        }
    }

    fn all_of(&self, condition: &Bson) -> DocumentStoreResult<bool> {
        for clause in Self::clauses(condition)? {
            if !self.matches(clause)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn any_of(&self, condition: &Bson) -> DocumentStoreResult<bool> {
        for clause in Self::clauses(condition)? {
            if self.matches(clause)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn field_matches(&self, field: &str, condition: &Bson) -> DocumentStoreResult<bool> {
        let values = lookup(self.document, field);

        match condition {
            Bson::Document(ops) if ops.keys().next().is_some_and(|k| k.starts_with('$')) => {
                for (op, operand) in ops {
                    if !Self::operator_matches(&values, op, operand)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            expected => Ok(Self::equals(&values, expected)),
        }
    }

    fn equals(values: &[&Bson], expected: &Bson) -> bool {
        if values.is_empty() {
            return matches!(expected, Bson::Null);
        }

        values.iter().any(|value| value_matches(value, expected))
    }

    fn operator_matches(values: &[&Bson], op: &str, operand: &Bson) -> DocumentStoreResult<bool> {
        let any = |accept: fn(Ordering) -> bool| values.iter().any(|value| compare_matches(value, operand, accept));

        Ok(match op {
            "$eq" => Self::equals(values, operand),
            "$ne" => !Self::equals(values, operand),
            "$gt" => any(|o| o == Ordering::Greater),
            "$gte" => any(|o| o != Ordering::Less),
            "$lt" => any(|o| o == Ordering::Less),
            "$lte" => any(|o| o != Ordering::Greater),
            "$in" => Self::in_list(values, operand)?,
            "$nin" => !Self::in_list(values, operand)?,
            "$exists" => {
                let should_exist = !matches!(operand, Bson::Boolean(false) | Bson::Null | Bson::Int32(0) | Bson::Int64(0));
                values.is_empty() != should_exist
            }
            "$not" => match operand {
                Bson::Document(ops) => {
                    let mut all = true;
                    for (inner, inner_operand) in ops {
                        all &= Self::operator_matches(values, inner, inner_operand)?;
                    }
                    !all
                }
                _ => return Err(DocumentStoreError::Backend("$not takes an operator document".to_string())),
            },
            other => return Err(unsupported(other)),
        })
    }

    fn in_list(values: &[&Bson], operand: &Bson) -> DocumentStoreResult<bool> {
        match operand {
            Bson::Array(candidates) => Ok(candidates
                .iter()
                .any(|candidate| Self::equals(values, candidate))),
            _ => Err(DocumentStoreError::Backend("$in and $nin take an array".to_string())),
        }
    }
}

fn unsupported(op: &str) -> DocumentStoreError {
    DocumentStoreError::Backend(format!("unsupported query operator {}", op))
}

/// Sorts documents by a `{field: 1 | -1}` document, keys in priority order.
///
/// The sort is stable, so documents comparing equal keep their natural order.
pub(crate) fn sort_documents(documents: &mut [Document], sort: &Document) {
    let keys = sort
        .iter()
        .map(|(field, direction)| {
            let descending = match direction {
                Bson::Int32(n) => *n < 0,
                Bson::Int64(n) => *n < 0,
                Bson::Double(n) => *n < 0.0,
                _ => false,
            };
            (field.as_str(), descending)
        })
        .collect::<Vec<_>>();

    documents.sort_by(|a, b| {
        for (field, descending) in &keys {
            let left = lookup(a, field).first().map(|v| Comparable::from(*v)).unwrap_or(Comparable::Null);
            let right = lookup(b, field).first().map(|v| Comparable::from(*v)).unwrap_or(Comparable::Null);

            let ordering = if *descending {
                right.sort_cmp(&left)
            } else {
                left.sort_cmp(&right)
            };

            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        Ordering::Equal
    });
}

/// Applies a top-level projection. Any truthy value makes it an inclusion projection, in which
/// `_id` is kept unless explicitly excluded.
pub(crate) fn project(document: Document, fields: &Document) -> Document {
    let truthy = |value: &Bson| !matches!(value, Bson::Boolean(false) | Bson::Int32(0) | Bson::Int64(0) | Bson::Null)
        && !matches!(value, Bson::Double(n) if *n == 0.0);

    let inclusive = fields.iter().any(|(field, value)| field != "_id" && truthy(value));

    if inclusive {
        let keep_id = fields.get("_id").is_none_or(truthy);

        document
            .into_iter()
            .filter(|(key, _)| {
                let root = key.as_str();
                (root == "_id" && keep_id)
                    || fields
                        .iter()
                        .any(|(field, value)| truthy(value) && field.split('.').next() == Some(root))
            })
            .collect()
    } else {
        document
            .into_iter()
            .filter(|(key, _)| fields.get(key.as_str()).is_none_or(truthy))
            .collect()
    }
}
