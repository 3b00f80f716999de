//! Backend Data Service Abstraction
//!
//! The remote relational store is reached through a single host-provided
//! [`BackendClient`]. The core only ever issues two shapes of request:
//!
//! - point queries: `select columns where column = value / column in (ids)`
//! - mutations: insert one row, or delete the rows matching a filter set
//!
//! Every call carries the bearer token of the current session; the client
//! itself is stateless with respect to authentication.
//!
//! ## Error Handling
//!
//! Implementations return `Err` only for transport failures (connection
//! refused, TLS, timeouts). A non-2xx answer from the server is returned as a
//! regular [`BackendResponse`] so the caller can surface the server-provided
//! message.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// A single column predicate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
    /// `column = value`
    Eq { column: String, value: String },
    /// `column in (values)`
    In { column: String, values: Vec<String> },
}

impl Filter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Eq {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn in_list<I, S>(column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Filter::In {
            column: column.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Column this predicate applies to
    pub fn column(&self) -> &str {
        match self {
            Filter::Eq { column, .. } | Filter::In { column, .. } => column,
        }
    }

    /// Render the predicate value in PostgREST syntax (`eq.x`, `in.("a","b")`).
    ///
    /// The same syntax is used for change-feed filter expressions, so the
    /// rendering lives next to the type rather than in a particular client.
    pub fn render_value(&self) -> String {
        match self {
            Filter::Eq { value, .. } => format!("eq.{}", value),
            Filter::In { values, .. } => {
                let quoted: Vec<String> = values.iter().map(|v| quote(v)).collect();
                format!("in.({})", quoted.join(","))
            }
        }
    }

    /// Render the whole predicate as `column=op.value`
    pub fn render(&self) -> String {
        format!("{}={}", self.column(), self.render_value())
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Point query against one table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectQuery {
    pub table: String,
    pub columns: String,
    pub filters: Vec<Filter>,
}

impl SelectQuery {
    pub fn new(table: impl Into<String>, columns: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: columns.into(),
            filters: Vec::new(),
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }
}

/// Row-level mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    Insert { table: String, row: Value },
    Delete { table: String, filters: Vec<Filter> },
}

impl Mutation {
    pub fn table(&self) -> &str {
        match self {
            Mutation::Insert { table, .. } | Mutation::Delete { table, .. } => table,
        }
    }
}

/// Answer from the backend, successful or not
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendResponse {
    pub status: u16,
    pub body: Value,
}

impl BackendResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// 200 with the given body
    pub fn ok(body: Value) -> Self {
        Self::new(200, body)
    }

    /// Check if response status is successful (2xx)
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Server-provided error text, looked up under `error` then `message`
    pub fn error_message(&self) -> Option<&str> {
        ["error", "message"]
            .iter()
            .find_map(|key| self.body.get(key).and_then(Value::as_str))
    }
}

/// Remote relational store
///
/// # Example
///
/// ```ignore
/// use bridge_traits::backend::{BackendClient, Filter, SelectQuery};
///
/// async fn load(client: &dyn BackendClient, token: &str) -> Result<()> {
///     let query = SelectQuery::new("song_public", "*")
///         .filter(Filter::in_list("song_id", ["a", "b"]));
///     let response = client.select(token, query).await?;
///     assert!(response.is_success());
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait BackendClient: Send + Sync {
    /// Run a point query
    ///
    /// # Errors
    ///
    /// Returns error only if the request could not be delivered.
    async fn select(&self, access_token: &str, query: SelectQuery) -> Result<BackendResponse>;

    /// Apply an insert or delete
    async fn mutate(&self, access_token: &str, mutation: Mutation) -> Result<BackendResponse>;
}
