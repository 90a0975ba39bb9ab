//! PostgREST query string builder.

use std::fmt::Display;

/// Filters, ordering and limits for a PostgREST request.
///
/// Values are percent-encoded when rendered; column names and operators are
/// emitted as given.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    params: Vec<(String, String)>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Column list, including resource embeds such as `*,tasks!inner(*)`.
    pub fn select(self, columns: &str) -> Self {
        self.push("select", columns)
    }

    pub fn eq(self, column: &str, value: impl Display) -> Self {
        self.push(column, format!("eq.{}", value))
    }

    pub fn gte(self, column: &str, value: impl Display) -> Self {
        self.push(column, format!("gte.{}", value))
    }

    pub fn is_null(self, column: &str) -> Self {
        self.push(column, "is.null")
    }

    pub fn not_null(self, column: &str) -> Self {
        self.push(column, "not.is.null")
    }

    pub fn in_list<T: Display>(self, column: &str, values: &[T]) -> Self {
        self.push(column, format!("in.({})", join(values)))
    }

    pub fn not_in<T: Display>(self, column: &str, values: &[T]) -> Self {
        self.push(column, format!("not.in.({})", join(values)))
    }

    /// Raw `or=(...)` group, e.g. `r2_status.is.null,r2_status.eq.failed`.
    pub fn or(self, conditions: &str) -> Self {
        self.push("or", format!("({})", conditions))
    }

    pub fn order(self, column: &str, ascending: bool) -> Self {
        let dir = if ascending { "asc" } else { "desc" };
        self.push("order", format!("{}.{}", column, dir))
    }

    pub fn limit(self, limit: usize) -> Self {
        self.push("limit", limit.to_string())
    }

    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Render as a query string without the leading `?`.
    pub fn to_query_string(&self) -> String {
        self.params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

fn join<T: Display>(values: &[T]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(",")
}
