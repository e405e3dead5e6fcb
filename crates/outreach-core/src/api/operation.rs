//! Operation classification and the GraphQL request envelope.
//!
//! Each outgoing document is classified exactly once, at construction, into
//! REST-style or standard GraphQL execution based on the `@rest` directive.
//! The classification is immutable for the lifetime of the operation and
//! drives routing in the gateway client.

use reqwest::Method;
use serde::Serialize;
use serde_json::Value;

/// How an operation is executed, decided once per document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    /// Routed to a REST endpoint on the API origin
    Rest { method: Method, path: String },
    /// Posted to the GraphQL endpoint
    Graphql,
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub name: String,
    pub document: String,
    pub variables: Value,
    kind: OperationKind,
}

impl Operation {
    pub fn new(name: impl Into<String>, document: impl Into<String>, variables: Value) -> Self {
        let document = document.into();
        let kind = classify(&document);
        Self {
            name: name.into(),
            document,
            variables,
            kind,
        }
    }

    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    /// Standard `{query, variables, operationName}` envelope
    pub fn envelope(&self) -> GraphqlRequest<'_> {
        GraphqlRequest {
            query: &self.document,
            variables: &self.variables,
            operation_name: &self.name,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GraphqlRequest<'a> {
    pub query: &'a str,
    pub variables: &'a Value,
    #[serde(rename = "operationName")]
    pub operation_name: &'a str,
}

/// Classification is a textual scan, not a GraphQL parse: the first
/// `@rest(` substring wins, even inside a comment or string literal. Our
/// documents are app-authored constants, never user input, so a decoy
/// directive in one would be a bug in the document itself.
fn classify(document: &str) -> OperationKind {
    let Some(args) = rest_directive_args(document) else {
        return OperationKind::Graphql;
    };
    let path = match string_arg(args, "path") {
        Some(path) => path.to_string(),
        // A @rest directive without a path cannot be routed; treat the
        // document as plain GraphQL and let the server reject it.
        None => return OperationKind::Graphql,
    };
    let method = string_arg(args, "method")
        .and_then(|m| m.to_ascii_uppercase().parse::<Method>().ok())
        .unwrap_or(Method::GET);
    OperationKind::Rest { method, path }
}

/// Argument list of the first `@rest(...)` directive, if any
fn rest_directive_args(document: &str) -> Option<&str> {
    let start = document.find("@rest(")?;
    let args = &document[start + "@rest(".len()..];
    let end = args.find(')')?;
    Some(&args[..end])
}

/// Value of a `key: "value"` argument within a directive argument list
fn string_arg<'a>(args: &'a str, key: &str) -> Option<&'a str> {
    let idx = args.find(key)?;
    let rest = args[idx + key.len()..].trim_start();
    let rest = rest.strip_prefix(':')?.trim_start();
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(&rest[..end])
}
