/// One row of a query result, cells already stringified.
///
/// Per the spec this daemon never parses a result beyond its first row/column
/// as a string or integer, so cells are kept as `Option<String>` rather than
/// exposing `tokio_postgres::Row` typed accessors all the way up into the
/// worker state machines (and so a [`crate::mock::MockConn`] can produce rows
/// without a live connection).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultRow(pub Vec<Option<String>>);

impl ResultRow {
    pub fn col(&self, idx: usize) -> Option<&str> {
        self.0.get(idx).and_then(|c| c.as_deref())
    }
}

/// The outcome of one `query_simple`/`query_params` call.
///
/// `is_tuples` mirrors libpq's `PQresultStatus(res) == PGRES_TUPLES_OK`: true
/// for anything that went through the SELECT path, false for a bare command
/// (`vacuum <table>`, the magic-name statement dispatch in the maintenance
/// loop) that returns no rows by design. Worker loops only apply the
/// "non-tuples result is an error" rule (§4.3/§4.4) where a SELECT is always
/// expected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub rows: Vec<ResultRow>,
    pub is_tuples: bool,
}

impl QueryResult {
    pub fn tuples(rows: Vec<ResultRow>) -> Self {
        Self {
            rows,
            is_tuples: true,
        }
    }

    pub fn command() -> Self {
        Self {
            rows: Vec::new(),
            is_tuples: false,
        }
    }

    pub fn single_row(&self) -> Option<&ResultRow> {
        if self.rows.len() == 1 {
            self.rows.first()
        } else {
            None
        }
    }
}
