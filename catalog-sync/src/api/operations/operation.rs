//! Core mutation types for catalog updates

use serde::Serialize;
use serde_json::{Value, json};

use crate::api::error::ApiError;
use crate::api::models::{AttributeKey, EntityId};
use crate::api::query::{Document, Field};

/// Metafield type used for every marketplace attribute
pub const ATTRIBUTE_METAFIELD_TYPE: &str = "single_line_text_field";

/// A single remote mutation against one catalog entity
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Mutation {
    /// Expose the entity on a publication
    Publish {
        entity: EntityId,
        publication_id: String,
    },
    /// Withhold the entity from a publication
    Unpublish {
        entity: EntityId,
        publication_id: String,
    },
    /// Write non-blank attribute values as metafields
    SetAttributes {
        entity: EntityId,
        namespace: String,
        values: Vec<(AttributeKey, String)>,
    },
}

/// Result of one mutation inside an aliased request
#[derive(Debug, Clone, PartialEq)]
pub struct MutationResult {
    /// The mutation that was executed
    pub mutation: Mutation,
    /// Alias the mutation was sent under
    pub alias: String,
    /// Error reported for this alias, if any
    pub error: Option<ApiError>,
}

impl MutationResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

impl Mutation {
    pub fn publish(entity: EntityId, publication_id: impl Into<String>) -> Self {
        Self::Publish {
            entity,
            publication_id: publication_id.into(),
        }
    }

    pub fn unpublish(entity: EntityId, publication_id: impl Into<String>) -> Self {
        Self::Unpublish {
            entity,
            publication_id: publication_id.into(),
        }
    }

    pub fn set_attributes(
        entity: EntityId,
        namespace: impl Into<String>,
        values: Vec<(AttributeKey, String)>,
    ) -> Self {
        Self::SetAttributes {
            entity,
            namespace: namespace.into(),
            values,
        }
    }

    pub fn entity(&self) -> &EntityId {
        match self {
            Self::Publish { entity, .. }
            | Self::Unpublish { entity, .. }
            | Self::SetAttributes { entity, .. } => entity,
        }
    }

    /// Remote mutation field this operation is sent as
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Publish { .. } => "publishablePublish",
            Self::Unpublish { .. } => "publishableUnpublish",
            Self::SetAttributes { .. } => "metafieldsSet",
        }
    }

    /// Short label for logging
    pub fn operation_type(&self) -> &'static str {
        match self {
            Self::Publish { .. } => "publish",
            Self::Unpublish { .. } => "unpublish",
            Self::SetAttributes { .. } => "set_attributes",
        }
    }

    /// Bind this mutation's variables into `doc` and return its aliased root field.
    ///
    /// Variables are suffixed with `index` so many mutations can share one document.
    pub fn to_field(&self, doc: &mut Document, alias: &str, index: usize) -> Field {
        let user_errors = Field::new("userErrors").scalars(["field", "message"]);

        match self {
            Self::Publish {
                entity,
                publication_id,
            }
            | Self::Unpublish {
                entity,
                publication_id,
            } => {
                let id = doc.bind(format!("id_{index}"), "ID!", json!(entity.as_str()));
                let input = doc.bind(
                    format!("input_{index}"),
                    "[PublicationInput!]!",
                    json!([{ "publicationId": publication_id }]),
                );
                Field::new(self.field_name())
                    .alias(alias)
                    .arg("id", id)
                    .arg("input", input)
                    .select(user_errors)
            }
            Self::SetAttributes {
                entity,
                namespace,
                values,
            } => {
                let metafields: Vec<Value> = values
                    .iter()
                    .map(|(key, value)| {
                        json!({
                            "ownerId": entity.as_str(),
                            "namespace": namespace,
                            "key": key.metafield_key(),
                            "type": ATTRIBUTE_METAFIELD_TYPE,
                            "value": value,
                        })
                    })
                    .collect();
                let input = doc.bind(
                    format!("metafields_{index}"),
                    "[MetafieldsSetInput!]!",
                    Value::Array(metafields),
                );
                Field::new(self.field_name())
                    .alias(alias)
                    .arg("metafields", input)
                    .select(Field::new("metafields").scalars(["key"]))
                    .select(user_errors)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_field() {
        let entity = EntityId::product("1").unwrap();
        let mutation = Mutation::publish(entity.clone(), "gid://shopify/Publication/9");
        let mut doc = Document::mutation("Sync");
        let field = mutation.to_field(&mut doc, "m0", 0);
        let request = doc.field(field).into_request();

        assert!(request.query.contains("m0: publishablePublish(id: $id_0, input: $input_0)"));
        assert_eq!(request.variables["id_0"], json!("gid://shopify/Product/1"));
        assert_eq!(
            request.variables["input_0"],
            json!([{"publicationId": "gid://shopify/Publication/9"}])
        );
        assert_eq!(mutation.entity(), &entity);
        assert_eq!(mutation.operation_type(), "publish");
    }

    #[test]
    fn test_set_attributes_field() {
        let entity = EntityId::product("5").unwrap();
        let mutation = Mutation::set_attributes(
            entity,
            "mm-google-shopping",
            vec![
                (AttributeKey::Color, "Red".to_string()),
                (AttributeKey::AgeGroup, "adult".to_string()),
            ],
        );
        let mut doc = Document::mutation("Sync");
        let field = mutation.to_field(&mut doc, "m3", 3);
        let request = doc.field(field).into_request();

        assert!(request.query.contains("m3: metafieldsSet(metafields: $metafields_3)"));
        let metafields = request.variables["metafields_3"].as_array().unwrap();
        assert_eq!(metafields.len(), 2);
        assert_eq!(metafields[0]["key"], "color");
        assert_eq!(metafields[1]["key"], "age_group");
        assert_eq!(metafields[1]["ownerId"], "gid://shopify/Product/5");
        assert_eq!(metafields[1]["namespace"], "mm-google-shopping");
    }
}
