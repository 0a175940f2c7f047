//! Entity codec trait.

use crate::error::{CodecError, CodecResult};
use crate::value::{Document, Value};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Trait for application types that can be tracked by a session.
///
/// Implementors provide:
/// - `TYPE_TAG`: the name written into document metadata
/// - `IDENTITY_PROPERTY`: the document field holding the key
/// - `identity()` / `set_identity()`: explicit access to that key
/// - `to_document()` / `from_document()`: conversion to and from [`Document`]
///
/// # Example
///
/// ```rust
/// use docsession_codec::{from_document, to_document, CodecResult, Document, Entity};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct User {
///     id: Option<String>,
///     name: String,
/// }
///
/// impl Entity for User {
///     const TYPE_TAG: &'static str = "User";
///
///     fn identity(&self) -> Option<String> {
///         self.id.clone()
///     }
///
///     fn set_identity(&mut self, key: &str) {
///         self.id = Some(key.to_string());
///     }
///
///     fn to_document(&self) -> CodecResult<Document> {
///         to_document(self)
///     }
///
///     fn from_document(document: Document) -> CodecResult<Self> {
///         from_document(document)
///     }
/// }
/// ```
pub trait Entity: Sized + Send + Sync + 'static {
    /// Type tag stored alongside documents of this type.
    const TYPE_TAG: &'static str;

    /// Name of the field that carries the document key.
    ///
    /// `None` declares a type without an identity property; sessions refuse
    /// to track such types.
    const IDENTITY_PROPERTY: Option<&'static str> = Some("id");

    /// Returns the current key, if one is assigned.
    fn identity(&self) -> Option<String>;

    /// Writes a key into the identity property.
    fn set_identity(&mut self, key: &str);

    /// Converts the entity to a document.
    fn to_document(&self) -> CodecResult<Document>;

    /// Builds an entity from a document.
    fn from_document(document: Document) -> CodecResult<Self>;
}

/// Serializes any serde type into a [`Document`].
///
/// Fails with [`CodecError::NotAnObject`] when the type does not serialize
/// to a map, and with [`CodecError::EncodingFailed`] when an unsigned integer
/// does not fit in [`Value::Integer`].
pub fn to_document<T: Serialize>(value: &T) -> CodecResult<Document> {
    let json = serde_json::to_value(value).map_err(|e| CodecError::encoding_failed(e.to_string()))?;
    check_integers(&json, "")?;
    match Value::deserialize(json).map_err(|e| CodecError::encoding_failed(e.to_string()))? {
        Value::Object(document) => Ok(document),
        _ => Err(CodecError::NotAnObject {
            type_name: std::any::type_name::<T>().to_string(),
        }),
    }
}

/// Rejects integers above `i64::MAX`, which would otherwise come back as floats.
fn check_integers(json: &serde_json::Value, path: &str) -> CodecResult<()> {
    match json {
        serde_json::Value::Number(n) if n.is_u64() && n.as_i64().is_none() => Err(
            CodecError::encoding_failed(format!("integer {n} at `{path}` is out of range")),
        ),
        serde_json::Value::Array(items) => items
            .iter()
            .enumerate()
            .try_for_each(|(i, item)| check_integers(item, &format!("{path}[{i}]"))),
        serde_json::Value::Object(fields) => fields.iter().try_for_each(|(name, field)| {
            let path = if path.is_empty() {
                name.clone()
            } else {
                format!("{path}.{name}")
            };
            check_integers(field, &path)
        }),
        _ => Ok(()),
    }
}

/// Deserializes a [`Document`] into any serde type.
pub fn from_document<T: DeserializeOwned>(document: Document) -> CodecResult<T> {
    let json =
        serde_json::to_value(&document).map_err(|e| CodecError::decoding_failed(e.to_string()))?;
    serde_json::from_value(json).map_err(|e| CodecError::decoding_failed(e.to_string()))
}
