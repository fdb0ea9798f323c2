//! The gateway's row shape: everything comes back as text, matching how the
//! rest of the daemon treats every other KV/PMAC value as a string to be
//! parsed on demand rather than a strongly-typed column.

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First row, first column, as a string — the common case for a
    /// `SELECT` against a scalar-returning stored function.
    pub fn scalar(&self) -> Option<&str> {
        self.rows.first()?.first()?.as_deref()
    }
}
