//! Typed GraphQL document builder
//!
//! Documents are assembled from [`Field`] trees and rendered to text. Every
//! caller-supplied value travels as a variable, so no user data is ever
//! spliced into the document itself.

use serde_json::{Map, Value};
use std::fmt::Write;

use super::request::GraphqlRequest;

/// Query or mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    Query,
    Mutation,
}

impl OperationKind {
    fn keyword(&self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
        }
    }
}

/// Argument value inside a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Argument {
    /// Reference to a declared variable (`$name`)
    Variable(String),
    /// Integer literal for sizes we control (e.g. `first: 50`)
    Int(i64),
}

impl Argument {
    pub fn var(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    fn render(&self, out: &mut String) {
        match self {
            Self::Variable(name) => {
                out.push('$');
                out.push_str(name);
            }
            Self::Int(value) => {
                let _ = write!(out, "{value}");
            }
        }
    }
}

/// A field selection, optionally aliased, with arguments and sub-selections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    alias: Option<String>,
    name: String,
    /// `Some(type)` renders as an inline fragment `... on Type`
    fragment_on: Option<String>,
    arguments: Vec<(String, Argument)>,
    selection: Vec<Field>,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            alias: None,
            name: name.into(),
            fragment_on: None,
            arguments: Vec::new(),
            selection: Vec::new(),
        }
    }

    /// `... on TypeName { .. }`
    pub fn inline_fragment(type_name: impl Into<String>) -> Self {
        Self {
            fragment_on: Some(type_name.into()),
            ..Self::new("")
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn arg(mut self, name: impl Into<String>, value: Argument) -> Self {
        self.arguments.push((name.into(), value));
        self
    }

    pub fn select(mut self, field: Field) -> Self {
        self.selection.push(field);
        self
    }

    /// Select several scalar fields at once
    pub fn scalars<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selection.extend(names.into_iter().map(Field::new));
        self
    }

    /// Name the result is reported under (alias or field name)
    pub fn response_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    fn render(&self, out: &mut String) {
        if let Some(type_name) = &self.fragment_on {
            out.push_str("... on ");
            out.push_str(type_name);
        } else {
            if let Some(alias) = &self.alias {
                out.push_str(alias);
                out.push_str(": ");
            }
            out.push_str(&self.name);

            if !self.arguments.is_empty() {
                out.push('(');
                for (i, (name, value)) in self.arguments.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(name);
                    out.push_str(": ");
                    value.render(out);
                }
                out.push(')');
            }
        }

        render_selection(&self.selection, out);
    }
}

fn render_selection(selection: &[Field], out: &mut String) {
    if selection.is_empty() {
        return;
    }
    out.push_str(" { ");
    for (i, field) in selection.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        field.render(out);
    }
    out.push_str(" }");
}

/// Declared operation variable
#[derive(Debug, Clone, PartialEq)]
struct VariableDef {
    name: String,
    type_name: String,
    value: Value,
}

/// A complete operation: variables plus root selections
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    kind: OperationKind,
    name: String,
    variables: Vec<VariableDef>,
    fields: Vec<Field>,
}

impl Document {
    pub fn query(name: impl Into<String>) -> Self {
        Self::new(OperationKind::Query, name)
    }

    pub fn mutation(name: impl Into<String>) -> Self {
        Self::new(OperationKind::Mutation, name)
    }

    fn new(kind: OperationKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            variables: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Declare a variable and bind its value; returns an argument referencing it
    pub fn bind(
        &mut self,
        name: impl Into<String>,
        type_name: impl Into<String>,
        value: Value,
    ) -> Argument {
        let name = name.into();
        self.variables.push(VariableDef {
            name: name.clone(),
            type_name: type_name.into(),
            value,
        });
        Argument::Variable(name)
    }

    pub fn field(mut self, field: Field) -> Self {
        self.fields.push(field);
        self
    }

    pub fn push_field(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// Response keys of the root selections, in order
    pub fn root_keys(&self) -> Vec<&str> {
        self.fields.iter().map(Field::response_key).collect()
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    /// Render the document text
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(128);
        out.push_str(self.kind.keyword());
        out.push(' ');
        out.push_str(&self.name);

        if !self.variables.is_empty() {
            out.push('(');
            for (i, var) in self.variables.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let _ = write!(out, "${}: {}", var.name, var.type_name);
            }
            out.push(')');
        }

        render_selection(&self.fields, &mut out);
        out
    }

    /// Render into a wire request with the bound variable values
    pub fn into_request(self) -> GraphqlRequest {
        let query = self.render();
        let variables: Map<String, Value> = self
            .variables
            .into_iter()
            .map(|var| (var.name, var.value))
            .collect();
        GraphqlRequest::new(query, variables)
    }
}
