//! Self-describing payload encoding.
//!
//! A value tree is flattened into a JSON array of slots. Slot `0` is the root.
//!
//! | Slot holds            | Encoded as                      |
//! |-----------------------|---------------------------------|
//! | null, bool, number, string | the literal JSON value     |
//! | array                 | `[i, j, …]`: slot indices       |
//! | object                | `{"key": i, …}`: slot indices   |
//! | reduced value         | `["TypeName", i]`               |
//!
//! Plain array slots only ever contain integers, so a leading string marks a
//! typed slot. Equal primitive values share one slot.
//!
//! Values that plain JSON cannot describe are handled by named [`Reducers`]:
//! the first reducer that accepts a value replaces it with a representation
//! that is encoded in turn, tagged with the reducer's name. [`Revivers`] with
//! the same names turn the tagged slots back into values on [`parse`].
//!
//! ```
//! use payload_gate::payload::codec::{self, Reducers, Revivers};
//! use serde_json::json;
//!
//! let reducers = Reducers::new().with("Date", |v| {
//!     v.get("$date").cloned()
//! });
//! let revivers = Revivers::new().with("Date", |v| json!({ "$date": v }));
//!
//! let value = json!({ "name": "vue", "published": { "$date": "2024-05-01" } });
//! let text = codec::stringify(&value, &reducers).unwrap();
//! assert_eq!(codec::parse(&text, &revivers).unwrap(), value);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

/// Deepest nesting accepted by [`stringify`] and [`parse`].
pub const MAX_DEPTH: usize = 256;

/// Errors raised while encoding or decoding a payload.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload nests deeper than {max} levels")]
    DepthExceeded { max: usize },

    #[error("malformed payload: {0}")]
    Malformed(&'static str),

    #[error("slot reference {0} is out of range")]
    IndexOutOfRange(u64),

    #[error("no reviver registered for type `{0}`")]
    UnknownType(String),

    #[error("reducer names must not be empty")]
    EmptyReducerName,
}

/// A named transform from a value to its encodable representation.
pub type Reducer = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// The inverse of a [`Reducer`].
pub type Reviver = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Ordered table of reducers, tried in registration order.
#[derive(Clone, Default)]
pub struct Reducers {
    entries: Vec<(String, Reducer)>,
}

impl Reducers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `reducer` under `name`.
    #[must_use]
    pub fn with<F>(mut self, name: impl Into<String>, reducer: F) -> Self
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        self.entries.push((name.into(), Arc::new(reducer)));
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Reducers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(name, _)| name))
            .finish()
    }
}

/// Table of revivers keyed by type name.
#[derive(Clone, Default)]
pub struct Revivers {
    entries: HashMap<String, Reviver>,
}

impl Revivers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `reviver` for slots tagged `name`.
    #[must_use]
    pub fn with<F>(mut self, name: impl Into<String>, reviver: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.entries.insert(name.into(), Arc::new(reviver));
        self
    }
}

impl fmt::Debug for Revivers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.entries.keys()).finish()
    }
}

/// Encodes `value` into the slot format.
///
/// # Errors
///
/// - [`CodecError::EmptyReducerName`]: a reducer was registered with an empty name.
/// - [`CodecError::DepthExceeded`]: the value, or a chain of reductions, nests
///   deeper than [`MAX_DEPTH`].
pub fn stringify(value: &Value, reducers: &Reducers) -> Result<String, CodecError> {
    if reducers.entries.iter().any(|(name, _)| name.is_empty()) {
        return Err(CodecError::EmptyReducerName);
    }

    let mut encoder = Encoder {
        reducers,
        slots: Vec::new(),
        primitives: HashMap::new(),
    };
    encoder.encode(value, 0)?;
    Ok(serde_json::to_string(&encoder.slots)?)
}

/// Decodes a slot document produced by [`stringify`].
///
/// # Errors
///
/// Fails on invalid JSON, an empty or malformed slot table, dangling slot
/// references, reference chains deeper than [`MAX_DEPTH`], and type tags with
/// no matching reviver.
pub fn parse(text: &str, revivers: &Revivers) -> Result<Value, CodecError> {
    let slots: Vec<Value> = serde_json::from_str(text)?;
    if slots.is_empty() {
        return Err(CodecError::Malformed("empty slot table"));
    }
    Decoder {
        slots: &slots,
        revivers,
    }
    .decode(0, 0)
}

struct Encoder<'r> {
    reducers: &'r Reducers,
    slots: Vec<Value>,
    // Rendered JSON text of a primitive → its slot.
    primitives: HashMap<String, usize>,
}

impl Encoder<'_> {
    fn reserve(&mut self) -> usize {
        self.slots.push(Value::Null);
        self.slots.len() - 1
    }

    fn encode(&mut self, value: &Value, depth: usize) -> Result<usize, CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::DepthExceeded { max: MAX_DEPTH });
        }

        let reducers = self.reducers;
        for (name, reducer) in &reducers.entries {
            if let Some(reduced) = reducer(value) {
                let index = self.reserve();
                let inner = self.encode(&reduced, depth + 1)?;
                self.slots[index] = Value::Array(vec![Value::from(name.as_str()), Value::from(inner)]);
                return Ok(index);
            }
        }

        match value {
            Value::Array(items) => {
                let index = self.reserve();
                let mut refs = Vec::with_capacity(items.len());
                for item in items {
                    refs.push(Value::from(self.encode(item, depth + 1)?));
                }
                self.slots[index] = Value::Array(refs);
                Ok(index)
            }
            Value::Object(fields) => {
                let index = self.reserve();
                let mut refs = Map::with_capacity(fields.len());
                for (key, field) in fields {
                    refs.insert(key.clone(), Value::from(self.encode(field, depth + 1)?));
                }
                self.slots[index] = Value::Object(refs);
                Ok(index)
            }
            primitive => {
                let rendered = primitive.to_string();
                if let Some(&index) = self.primitives.get(&rendered) {
                    return Ok(index);
                }
                self.slots.push(primitive.clone());
                let index = self.slots.len() - 1;
                self.primitives.insert(rendered, index);
                Ok(index)
            }
        }
    }
}

struct Decoder<'a> {
    slots: &'a [Value],
    revivers: &'a Revivers,
}

impl Decoder<'_> {
    fn decode(&self, index: usize, depth: usize) -> Result<Value, CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::DepthExceeded { max: MAX_DEPTH });
        }
        let slot = self
            .slots
            .get(index)
            .ok_or(CodecError::IndexOutOfRange(index as u64))?;

        match slot {
            Value::Array(items) => match items.as_slice() {
                [Value::String(name), inner] => {
                    let reviver = self
                        .revivers
                        .entries
                        .get(name)
                        .ok_or_else(|| CodecError::UnknownType(name.clone()))?;
                    let inner = self.decode(self.index(inner)?, depth + 1)?;
                    Ok(reviver(inner))
                }
                [Value::String(_), ..] => Err(CodecError::Malformed("typed slot must hold one reference")),
                refs => refs
                    .iter()
                    .map(|r| self.decode(self.index(r)?, depth + 1))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
            },
            Value::Object(refs) => {
                let mut fields = Map::with_capacity(refs.len());
                for (key, r) in refs {
                    fields.insert(key.clone(), self.decode(self.index(r)?, depth + 1)?);
                }
                Ok(Value::Object(fields))
            }
            primitive => Ok(primitive.clone()),
        }
    }

    fn index(&self, reference: &Value) -> Result<usize, CodecError> {
        let raw = reference
            .as_u64()
            .ok_or(CodecError::Malformed("slot reference is not an unsigned integer"))?;
        usize::try_from(raw)
            .ok()
            .filter(|&index| index < self.slots.len())
            .ok_or(CodecError::IndexOutOfRange(raw))
    }
}
