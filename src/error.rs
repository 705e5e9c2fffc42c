use crate::id::{EntityId, EntityKind};

/// Fatal pipeline errors. Everything else (missing relationship rows,
/// unreadable pre-images) is absorbed where it happens.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A hook is wired to a table that lacks a column it needs. Always a
    /// misconfiguration, surfaced immediately.
    #[error("table {table} has no {column} column")]
    MissingColumn {
        table: &'static str,
        column: &'static str,
    },

    /// The mutation targets a kind with no backing table.
    #[error("no table backs entity kind {}", .0.tag())]
    NoTable(EntityKind),

    /// The mutation carries no target id where one is required.
    #[error("mutation has no target id")]
    MissingId,

    /// The mutation targets a row that does not exist.
    #[error("no row found for id {0}")]
    NotFound(EntityId),
}
