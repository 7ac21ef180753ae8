//! Dotted and bracket-indexed access into JSON settings trees.
//!
//! A path is a `.`-separated list of segments. Each segment is a non-empty key
//! followed by zero or more `[N]` index suffixes, e.g. `users[0].messages[1].text`.
//! The root of every operation is an object map; arrays are never valid roots.

use serde_json::{Map, Value};
use std::fmt;

/// One parsed path segment: an object key plus the array indices applied after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub key: String,
    pub indices: Vec<usize>,
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)?;
        for index in &self.indices {
            write!(f, "[{}]", index)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("path is empty")]
    Empty,
    #[error("malformed path '{path}': {reason}")]
    Malformed { path: String, reason: String },
    #[error("segment '{segment}' is not an array and cannot be indexed")]
    NotAnArray { segment: String },
    #[error("segment '{segment}' holds a scalar and cannot be navigated")]
    NotNavigable { segment: String },
}

/// Parse and validate a path into segments.
pub fn parse_path(path: &str) -> Result<Vec<PathSegment>, PathError> {
    if path.trim().is_empty() {
        return Err(PathError::Empty);
    }
    path.split('.')
        .map(|raw| parse_segment(path, raw))
        .collect()
}

fn parse_segment(path: &str, raw: &str) -> Result<PathSegment, PathError> {
    let malformed = |reason: &str| PathError::Malformed {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    let (key, mut rest) = match raw.find('[') {
        Some(pos) => (&raw[..pos], &raw[pos..]),
        None => (raw, ""),
    };
    if key.is_empty() {
        return Err(malformed("segment has no key"));
    }
    if key.contains(']') {
        return Err(malformed("unexpected ']'"));
    }

    let mut indices = Vec::new();
    while !rest.is_empty() {
        let inner = rest
            .strip_prefix('[')
            .ok_or_else(|| malformed("expected '[' after index"))?;
        let close = inner
            .find(']')
            .ok_or_else(|| malformed("unclosed '['"))?;
        let digits = &inner[..close];
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(malformed("index must be a non-negative integer"));
        }
        let index = digits
            .parse::<usize>()
            .map_err(|_| malformed("index out of range"))?;
        indices.push(index);
        rest = &inner[close + 1..];
    }

    Ok(PathSegment {
        key: key.to_string(),
        indices,
    })
}

/// Read the value at `path`. Missing keys, out-of-range indices, type
/// mismatches and malformed paths all yield `None`.
pub fn get_path<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let segments = parse_path(path).ok()?;
    let (first, rest) = segments.split_first()?;
    let mut current = index_into(root.get(&first.key)?, &first.indices)?;
    for segment in rest {
        let object = current.as_object()?;
        current = index_into(object.get(&segment.key)?, &segment.indices)?;
    }
    Some(current)
}

fn index_into<'a>(value: &'a Value, indices: &[usize]) -> Option<&'a Value> {
    let mut current = value;
    for &index in indices {
        current = current.as_array()?.get(index)?;
    }
    Some(current)
}

/// Assign `value` at `path`, creating intermediate objects and arrays.
///
/// An indexed segment pads its array with empty objects up to the index.
/// Whatever was stored at the final position is replaced.
pub fn set_path(root: &mut Map<String, Value>, path: &str, value: Value) -> Result<(), PathError> {
    let segments = parse_path(path)?;
    set_segments(root, &segments, value)
}

fn set_segments(
    map: &mut Map<String, Value>,
    segments: &[PathSegment],
    value: Value,
) -> Result<(), PathError> {
    let (segment, rest) = segments.split_first().ok_or(PathError::Empty)?;
    if segment.indices.is_empty() && rest.is_empty() {
        map.insert(segment.key.clone(), value);
        return Ok(());
    }
    let slot = map.entry(segment.key.clone()).or_insert(Value::Null);
    set_slot(slot, segment, &segment.indices, rest, value)
}

fn set_slot(
    slot: &mut Value,
    segment: &PathSegment,
    indices: &[usize],
    rest: &[PathSegment],
    value: Value,
) -> Result<(), PathError> {
    match indices.split_first() {
        Some((&index, remaining)) => {
            if slot.is_null() {
                *slot = Value::Array(Vec::new());
            }
            let items = slot.as_array_mut().ok_or_else(|| PathError::NotAnArray {
                segment: segment.to_string(),
            })?;
            while items.len() < index {
                items.push(Value::Object(Map::new()));
            }
            // the addressed slot itself is typed by the recursion below
            if items.len() == index {
                items.push(Value::Null);
            }
            if remaining.is_empty() && rest.is_empty() {
                items[index] = value;
                return Ok(());
            }
            set_slot(&mut items[index], segment, remaining, rest, value)
        }
        None => {
            if rest.is_empty() {
                *slot = value;
                return Ok(());
            }
            if slot.is_null() {
                *slot = Value::Object(Map::new());
            }
            match slot {
                Value::Object(map) => set_segments(map, rest, value),
                _ => Err(PathError::NotNavigable {
                    segment: segment.to_string(),
                }),
            }
        }
    }
}

/// Remove the value at `path`. Returns the removed value, or `None` when
/// nothing was stored there. An indexed final segment removes the array element.
pub fn delete_path(root: &mut Map<String, Value>, path: &str) -> Result<Option<Value>, PathError> {
    let segments = parse_path(path)?;
    let Some((last, parents)) = segments.split_last() else {
        return Err(PathError::Empty);
    };

    let mut map = root;
    for segment in parents {
        let Some(child) = map.get_mut(&segment.key) else {
            return Ok(None);
        };
        let Some(target) = index_into_mut(child, &segment.indices) else {
            return Ok(None);
        };
        match target.as_object_mut() {
            Some(object) => map = object,
            None => return Ok(None),
        }
    }

    match last.indices.split_last() {
        None => Ok(map.remove(&last.key)),
        Some((&index, leading)) => {
            let Some(child) = map.get_mut(&last.key) else {
                return Ok(None);
            };
            let Some(container) = index_into_mut(child, leading) else {
                return Ok(None);
            };
            match container.as_array_mut() {
                Some(items) if index < items.len() => Ok(Some(items.remove(index))),
                _ => Ok(None),
            }
        }
    }
}

fn index_into_mut<'a>(value: &'a mut Value, indices: &[usize]) -> Option<&'a mut Value> {
    let mut current = value;
    for &index in indices {
        current = current.as_array_mut()?.get_mut(index)?;
    }
    Some(current)
}

/// Top-level key addressed by a path, if the path is well formed.
pub fn root_key(path: &str) -> Option<String> {
    parse_path(path)
        .ok()
        .and_then(|segments| segments.into_iter().next())
        .map(|segment| segment.key)
}
