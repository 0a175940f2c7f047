//! Change detection.
//!
//! An entity is dirty when the document it serializes to today differs, by
//! exact structural comparison, from the snapshot recorded when it was
//! loaded or last saved. No hashes are involved: a false "clean" would drop
//! a write.

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};
use crate::session::identity_map::EntityMetadata;
use crate::session::tracked::TrackedObject;
use docsession_codec::{Document, Entity};

/// Returns the identity property of `T`, or a configuration error.
pub(crate) fn require_identity<T: Entity>() -> SessionResult<&'static str> {
    T::IDENTITY_PROPERTY.ok_or(SessionError::MissingIdentityProperty {
        type_tag: T::TYPE_TAG,
    })
}

/// The document persisted for an entity: identity stripped, type added.
pub(crate) fn entity_document(
    object: &dyn TrackedObject,
    config: &SessionConfig,
) -> SessionResult<Document> {
    let property = object
        .identity_property()
        .ok_or(SessionError::MissingIdentityProperty {
            type_tag: object.type_tag(),
        })?;
    let mut document = object.to_document()?;
    document.remove(property);
    let field = &config.type_discriminator_field;
    if document.contains_key(field) {
        return Err(SessionError::ReservedField {
            type_tag: object.type_tag(),
            field: field.clone(),
        });
    }
    document.insert(field.clone(), object.type_tag());
    Ok(document)
}

/// Returns true if the entity no longer matches its snapshot.
pub(crate) fn has_changed(
    object: &dyn TrackedObject,
    metadata: Option<&EntityMetadata>,
    config: &SessionConfig,
) -> SessionResult<bool> {
    let Some(metadata) = metadata else {
        return Ok(true);
    };
    Ok(entity_document(object, config)? != metadata.original_document)
}

/// Materializes a stored document as an entity carrying `key`.
pub(crate) fn decode_entity<T: Entity>(
    key: &str,
    document: &Document,
    config: &SessionConfig,
) -> SessionResult<T> {
    let property = require_identity::<T>()?;
    let mut document = document.clone();
    document.remove(&config.type_discriminator_field);
    document.insert(property, key);
    let mut entity = T::from_document(document)?;
    entity.set_identity(key);
    Ok(entity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::tracked::Tracked;
    use docsession_codec::{from_document, to_document, CodecResult, Value};
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Book {
        id: Option<String>,
        title: String,
        chapters: Vec<String>,
    }

    impl Entity for Book {
        const TYPE_TAG: &'static str = "Book";

        fn identity(&self) -> Option<String> {
            self.id.clone()
        }

        fn set_identity(&mut self, key: &str) {
            self.id = Some(key.to_string());
        }

        fn to_document(&self) -> CodecResult<Document> {
            to_document(self)
        }

        fn from_document(document: Document) -> CodecResult<Self> {
            from_document(document)
        }
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Keyless {
        label: String,
    }

    impl Entity for Keyless {
        const TYPE_TAG: &'static str = "Keyless";
        const IDENTITY_PROPERTY: Option<&'static str> = None;

        fn identity(&self) -> Option<String> {
            None
        }

        fn set_identity(&mut self, _key: &str) {}

        fn to_document(&self) -> CodecResult<Document> {
            to_document(self)
        }

        fn from_document(document: Document) -> CodecResult<Self> {
            from_document(document)
        }
    }

    fn book() -> Tracked<Book> {
        Tracked::new(Book {
            id: Some("books/1".into()),
            title: "Dune".into(),
            chapters: vec!["one".into(), "two".into()],
        })
    }

    fn snapshot_of(book: &Tracked<Book>, config: &SessionConfig) -> EntityMetadata {
        EntityMetadata {
            original_document: entity_document(&*book.erase().object, config).unwrap(),
            metadata_document: Document::new(),
            etag: None,
            key: book.read().id.clone(),
        }
    }

    #[test]
    fn document_strips_identity_and_adds_type() {
        let config = SessionConfig::default();
        let doc = entity_document(&*book().erase().object, &config).unwrap();

        assert!(!doc.contains_key("id"));
        assert_eq!(doc.get_text("type"), Some("Book"));
        assert_eq!(doc.get_text("title"), Some("Dune"));
    }

    #[test]
    fn unchanged_entity_is_clean() {
        let config = SessionConfig::default();
        let book = book();
        let metadata = snapshot_of(&book, &config);

        assert!(!has_changed(&*book.erase().object, Some(&metadata), &config).unwrap());
    }

    #[test]
    fn field_and_array_order_changes_are_detected() {
        let config = SessionConfig::default();
        let book = book();
        let metadata = snapshot_of(&book, &config);
        let object = book.erase().object;

        book.write().chapters.reverse();
        assert!(has_changed(&*object, Some(&metadata), &config).unwrap());

        book.write().chapters.reverse();
        assert!(!has_changed(&*object, Some(&metadata), &config).unwrap());

        book.write().title = "Dune Messiah".into();
        assert!(has_changed(&*object, Some(&metadata), &config).unwrap());
    }

    #[test]
    fn identity_change_alone_is_not_a_document_change() {
        let config = SessionConfig::default();
        let book = book();
        let metadata = snapshot_of(&book, &config);

        book.write().id = Some("books/2".into());
        assert!(!has_changed(&*book.erase().object, Some(&metadata), &config).unwrap());
    }

    #[test]
    fn missing_metadata_counts_as_changed() {
        let config = SessionConfig::default();
        assert!(has_changed(&*book().erase().object, None, &config).unwrap());
    }

    #[test]
    fn keyless_type_is_a_configuration_error() {
        let config = SessionConfig::default();
        let keyless = Tracked::new(Keyless {
            label: "x".into(),
        });

        let err = entity_document(&*keyless.erase().object, &config).unwrap_err();
        assert!(matches!(
            err,
            SessionError::MissingIdentityProperty { type_tag: "Keyless" }
        ));
        assert!(require_identity::<Keyless>().is_err());
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Pet {
        id: Option<String>,
        #[serde(rename = "type")]
        kind: String,
    }

    impl Entity for Pet {
        const TYPE_TAG: &'static str = "Pet";

        fn identity(&self) -> Option<String> {
            self.id.clone()
        }

        fn set_identity(&mut self, key: &str) {
            self.id = Some(key.to_string());
        }

        fn to_document(&self) -> CodecResult<Document> {
            to_document(self)
        }

        fn from_document(document: Document) -> CodecResult<Self> {
            from_document(document)
        }
    }

    #[test]
    fn field_named_like_discriminator_is_rejected() {
        let pet = Tracked::new(Pet {
            id: None,
            kind: "dog".into(),
        });

        let err = entity_document(&*pet.erase().object, &SessionConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            SessionError::ReservedField { type_tag: "Pet", ref field } if field == "type"
        ));

        let renamed = SessionConfig::default().type_discriminator_field("$type");
        let doc = entity_document(&*pet.erase().object, &renamed).unwrap();
        assert_eq!(doc.get_text("type"), Some("dog"));
        assert_eq!(doc.get_text("$type"), Some("Pet"));
    }

    #[test]
    fn decode_restores_identity_and_ignores_type_field() {
        let config = SessionConfig::default();
        let stored = Document::new()
            .with("title", "Emma")
            .with("chapters", Value::Array(vec![]))
            .with("type", "Book");

        let book: Book = decode_entity("books/7", &stored, &config).unwrap();
        assert_eq!(book.id.as_deref(), Some("books/7"));
        assert_eq!(book.title, "Emma");
    }
}
