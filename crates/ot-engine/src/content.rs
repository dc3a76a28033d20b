/// Materialized document content and the pure appliers that advance it
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{DocumentType, EngineError, OperationKind, Result};

/// Current value of a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Content {
    Text(String),
    Json(Map<String, Value>),
    Array(Vec<Value>),
}

impl Content {
    /// Initial content of a freshly created document
    pub fn empty(doc_type: DocumentType) -> Self {
        match doc_type {
            DocumentType::Text => Content::Text(String::new()),
            DocumentType::Json => Content::Json(Map::new()),
            DocumentType::Array => Content::Array(Vec::new()),
        }
    }

    pub fn doc_type(&self) -> DocumentType {
        match self {
            Content::Text(_) => DocumentType::Text,
            Content::Json(_) => DocumentType::Json,
            Content::Array(_) => DocumentType::Array,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Map<String, Value>> {
        match self {
            Content::Json(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Content::Array(values) => Some(values),
            _ => None,
        }
    }

    /// Plain JSON rendering (string, object or array)
    pub fn to_value(&self) -> Value {
        match self {
            Content::Text(text) => Value::String(text.clone()),
            Content::Json(map) => Value::Object(map.clone()),
            Content::Array(values) => Value::Array(values.clone()),
        }
    }

    /// Value stored at `path` in a JSON document
    pub fn value_at(&self, path: &[String]) -> Option<&Value> {
        let Content::Json(map) = self else {
            return None;
        };
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(map.get(first)?, |value, key| value.as_object()?.get(key))
    }

    /// Apply `kind`, returning the new content. `self` is never modified, so a
    /// rejected operation leaves the document untouched.
    pub fn apply(&self, kind: &OperationKind) -> Result<Content> {
        kind.validate_family(self.doc_type())?;
        let mut next = self.clone();
        next.apply_in_place(kind)?;
        Ok(next)
    }

    fn apply_in_place(&mut self, kind: &OperationKind) -> Result<()> {
        match kind {
            OperationKind::Retain => Ok(()),

            OperationKind::Compound { parts } => {
                parts.iter().try_for_each(|part| self.apply_in_place(part))
            }

            OperationKind::Insert { position, content } => {
                let text = self.text_mut()?;
                let at = char_to_byte(text, *position).ok_or_else(|| {
                    out_of_bounds("insert", *position, text.chars().count())
                })?;
                text.insert_str(at, content);
                Ok(())
            }

            OperationKind::Delete { position, length } => {
                let text = self.text_mut()?;
                let len = text.chars().count();
                let range = char_to_byte(text, *position)
                    .zip(char_to_byte(text, position.saturating_add(*length)))
                    .ok_or_else(|| out_of_bounds("delete", position.saturating_add(*length), len))?;
                text.replace_range(range.0..range.1, "");
                Ok(())
            }

            OperationKind::Set { path, value, .. } => {
                let map = self.json_mut()?;
                set_path(map, path, value.clone())?;
                Ok(())
            }

            OperationKind::Unset { path, .. } => {
                let map = self.json_mut()?;
                unset_path(map, path)?;
                Ok(())
            }

            OperationKind::ArrayInsert { index, values } => {
                let array = self.array_mut()?;
                if *index > array.len() {
                    return Err(out_of_bounds("array insert", *index, array.len()));
                }
                array.splice(*index..*index, values.iter().cloned());
                Ok(())
            }

            OperationKind::ArrayDelete { index, count } => {
                let array = self.array_mut()?;
                let end = index.saturating_add(*count);
                if end > array.len() {
                    return Err(out_of_bounds("array delete", end, array.len()));
                }
                array.drain(*index..end);
                Ok(())
            }

            OperationKind::ArrayMove { from, to } => {
                let array = self.array_mut()?;
                if *from >= array.len() || *to >= array.len() {
                    return Err(out_of_bounds("array move", (*from).max(*to), array.len()));
                }
                let element = array.remove(*from);
                array.insert(*to, element);
                Ok(())
            }
        }
    }

    fn text_mut(&mut self) -> Result<&mut String> {
        match self {
            Content::Text(text) => Ok(text),
            other => Err(wrong_type(DocumentType::Text, other.doc_type())),
        }
    }

    fn json_mut(&mut self) -> Result<&mut Map<String, Value>> {
        match self {
            Content::Json(map) => Ok(map),
            other => Err(wrong_type(DocumentType::Json, other.doc_type())),
        }
    }

    fn array_mut(&mut self) -> Result<&mut Vec<Value>> {
        match self {
            Content::Array(values) => Ok(values),
            other => Err(wrong_type(DocumentType::Array, other.doc_type())),
        }
    }
}

/// Byte offset of the `position`th char; `position == len` maps to the end
fn char_to_byte(text: &str, position: usize) -> Option<usize> {
    text.char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .nth(position)
}

fn set_path(map: &mut Map<String, Value>, path: &[String], value: Value) -> Result<Option<Value>> {
    let (last, parents) = path.split_last().ok_or_else(empty_path)?;

    let mut current = map;
    for key in parents {
        let entry = current
            .entry(key.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        let Value::Object(next) = entry else {
            return Err(EngineError::Internal(format!(
                "intermediate `{key}` is not an object"
            )));
        };
        current = next;
    }

    Ok(current.insert(last.clone(), value))
}

fn unset_path(map: &mut Map<String, Value>, path: &[String]) -> Result<Option<Value>> {
    let (last, parents) = path.split_last().ok_or_else(empty_path)?;

    let mut current = map;
    for key in parents {
        match current.get_mut(key) {
            Some(Value::Object(next)) => current = next,
            // Absent parent: nothing to remove
            _ => return Ok(None),
        }
    }

    Ok(current.remove(last))
}

fn empty_path() -> EngineError {
    EngineError::InvalidOperation("JSON operation requires a non-empty path".to_string())
}

fn out_of_bounds(what: &str, index: usize, len: usize) -> EngineError {
    EngineError::InvalidOperation(format!(
        "{what} position {index} out of bounds (length {len})"
    ))
}

fn wrong_type(expected: DocumentType, actual: DocumentType) -> EngineError {
    EngineError::InvalidOperation(format!(
        "expected a {expected:?} document, found {actual:?}"
    ))
}
