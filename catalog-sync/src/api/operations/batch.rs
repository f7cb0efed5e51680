//! Aliased batch requests
//!
//! Independent mutations are packed into a single GraphQL document, each
//! under its own alias (`m0`, `m1`, ...), and the response is split back
//! into per-alias results.

use serde_json::Value;

use super::operation::{Mutation, MutationResult};
use crate::api::error::ApiError;
use crate::api::models::{AttributeSet, ChannelSet, EntityId, Publication};
use crate::api::query::{Document, GraphqlRequest, GraphqlResponse};

/// Mutations planned for a single entity
#[derive(Debug, Clone, PartialEq)]
pub struct EntityPlan {
    pub entity: EntityId,
    pub mutations: Vec<Mutation>,
}

impl EntityPlan {
    /// Publish to every desired known publication, unpublish from the rest
    pub fn channels(entity: &EntityId, publications: &[Publication], desired: &ChannelSet) -> Self {
        let mutations = publications
            .iter()
            .map(|publication| {
                if desired.contains(&publication.name) {
                    Mutation::publish(entity.clone(), &publication.id)
                } else {
                    Mutation::unpublish(entity.clone(), &publication.id)
                }
            })
            .collect();

        Self {
            entity: entity.clone(),
            mutations,
        }
    }

    /// One metafield write for the non-blank attributes; nothing when all are blank
    pub fn attributes(entity: &EntityId, namespace: &str, attributes: &AttributeSet) -> Self {
        let values: Vec<_> = attributes
            .non_blank()
            .map(|(key, value)| (key, value.to_string()))
            .collect();

        let mutations = if values.is_empty() {
            Vec::new()
        } else {
            vec![Mutation::set_attributes(entity.clone(), namespace, values)]
        };

        Self {
            entity: entity.clone(),
            mutations,
        }
    }

    /// Nothing to send: the entity is trivially in the desired state
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// One aliased request and the mutations it carries
#[derive(Debug, Clone)]
pub struct MutationGroup {
    /// Entities covered, in plan order
    pub entities: Vec<EntityId>,
    /// `(alias, mutation)` pairs in document order
    pub mutations: Vec<(String, Mutation)>,
    pub request: GraphqlRequest,
}

impl MutationGroup {
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

/// Builder packing entity plans into aliased requests
#[derive(Debug, Clone)]
pub struct BatchRequestBuilder {
    max_mutations_per_request: usize,
    operation_name: String,
}

impl BatchRequestBuilder {
    pub fn new(max_mutations_per_request: usize) -> Self {
        Self {
            max_mutations_per_request: max_mutations_per_request.max(1),
            operation_name: "CatalogSync".to_string(),
        }
    }

    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = name.into();
        self
    }

    pub fn max_mutations_per_request(&self) -> usize {
        self.max_mutations_per_request
    }

    /// Pack plans greedily in order.
    ///
    /// An entity's mutations always share one request, so a plan larger
    /// than the limit is sent on its own. Empty plans produce no group.
    pub fn build(&self, plans: &[EntityPlan]) -> Vec<MutationGroup> {
        let mut groups = Vec::new();
        let mut pending: Vec<&EntityPlan> = Vec::new();
        let mut pending_mutations = 0;

        for plan in plans.iter().filter(|plan| !plan.is_empty()) {
            if !pending.is_empty()
                && pending_mutations + plan.mutations.len() > self.max_mutations_per_request
            {
                groups.push(self.assemble(&pending));
                pending.clear();
                pending_mutations = 0;
            }
            pending_mutations += plan.mutations.len();
            pending.push(plan);
        }

        if !pending.is_empty() {
            groups.push(self.assemble(&pending));
        }
        groups
    }

    fn assemble(&self, plans: &[&EntityPlan]) -> MutationGroup {
        let mut doc = Document::mutation(&self.operation_name);
        let mut mutations = Vec::new();

        for mutation in plans.iter().flat_map(|plan| plan.mutations.iter()) {
            let index = mutations.len();
            let alias = format!("m{index}");
            let field = mutation.to_field(&mut doc, &alias, index);
            doc.push_field(field);
            mutations.push((alias, mutation.clone()));
        }

        MutationGroup {
            entities: plans.iter().map(|plan| plan.entity.clone()).collect(),
            mutations,
            request: doc.into_request(),
        }
    }
}

/// Splits an aliased response into per-mutation and per-entity results
pub struct BatchResponseParser;

impl BatchResponseParser {
    /// Result of every aliased mutation in the group
    pub fn parse(group: &MutationGroup, response: &GraphqlResponse) -> Vec<MutationResult> {
        group
            .mutations
            .iter()
            .map(|(alias, mutation)| MutationResult {
                mutation: mutation.clone(),
                alias: alias.clone(),
                error: alias_error(alias, response),
            })
            .collect()
    }

    /// Outcome per entity; an entity fails on its first failing mutation
    pub fn entity_results(
        group: &MutationGroup,
        response: &GraphqlResponse,
    ) -> Vec<(EntityId, Result<(), ApiError>)> {
        let results = Self::parse(group, response);

        group
            .entities
            .iter()
            .map(|entity| {
                let failure = results
                    .iter()
                    .filter(|result| result.mutation.entity() == entity)
                    .find_map(|result| result.error.clone());
                (entity.clone(), failure.map_or(Ok(()), Err))
            })
            .collect()
    }
}

fn alias_error(alias: &str, response: &GraphqlResponse) -> Option<ApiError> {
    let messages: Vec<&str> = response
        .errors_for(alias)
        .map(|error| error.message.as_str())
        .collect();
    if !messages.is_empty() {
        return Some(ApiError::Mutation(messages.join("; ")));
    }

    let payload = &response.data[alias];
    if payload.is_null() {
        return Some(ApiError::Decode(format!("no result for {alias}")));
    }

    let user_errors: Vec<String> = payload["userErrors"]
        .as_array()
        .map(|errors| errors.iter().map(format_user_error).collect())
        .unwrap_or_default();
    if user_errors.is_empty() {
        None
    } else {
        Some(ApiError::Mutation(user_errors.join("; ")))
    }
}

fn format_user_error(error: &Value) -> String {
    let message = error["message"].as_str().unwrap_or("unknown error");
    let field: Vec<&str> = error["field"]
        .as_array()
        .map(|path| path.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    if field.is_empty() {
        message.to_string()
    } else {
        format!("{}: {}", field.join("."), message)
    }
}
