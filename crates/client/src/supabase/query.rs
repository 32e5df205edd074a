//! PostgREST query description.
//!
//! A [`Query`] names a table, the columns (and embedded relations) to
//! select, equality filters, ordering and a row limit. It is plain data so
//! that both the HTTP client and the in-memory backend can interpret it.

/// Sort direction of one ordering term.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

/// A read (or the row selection of an update/delete) against one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    table: String,
    select: String,
    filters: Vec<(String, String)>,
    order: Vec<Order>,
    limit: Option<usize>,
}

impl Query {
    /// Select every column of `table`.
    #[must_use]
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            select: "*".to_string(),
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
        }
    }

    /// Replace the select clause, e.g. `*, stage:stages(*)`.
    #[must_use]
    pub fn select(mut self, columns: impl Into<String>) -> Self {
        self.select = columns.into();
        self
    }

    /// Keep rows where `column` equals `value`.
    #[must_use]
    pub fn eq(mut self, column: impl Into<String>, value: impl ToString) -> Self {
        self.filters.push((column.into(), value.to_string()));
        self
    }

    /// Append an ordering term.
    #[must_use]
    pub fn order(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order.push(Order {
            column: column.into(),
            ascending,
        });
        self
    }

    /// Return at most `limit` rows.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn select_clause(&self) -> &str {
        &self.select
    }

    #[must_use]
    pub fn filters(&self) -> &[(String, String)] {
        &self.filters
    }

    #[must_use]
    pub fn ordering(&self) -> &[Order] {
        &self.order
    }

    #[must_use]
    pub const fn row_limit(&self) -> Option<usize> {
        self.limit
    }

    /// Embedded relations of the select clause as `(alias, table)` pairs.
    ///
    /// `*, stage:stages(*)` yields `[("stage", "stages")]`.
    #[must_use]
    pub fn embeds(&self) -> Vec<(String, String)> {
        self.select
            .split(',')
            .filter_map(|part| {
                let part = part.trim();
                let (head, _) = part.split_once('(')?;
                let (alias, table) = head.split_once(':').unwrap_or((head, head));
                Some((alias.trim().to_string(), table.trim().to_string()))
            })
            .collect()
    }

    /// URL query parameters in PostgREST syntax.
    #[must_use]
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut params = vec![("select".to_string(), self.select.replace(' ', ""))];

        for (column, value) in &self.filters {
            params.push((column.clone(), format!("eq.{value}")));
        }

        if !self.order.is_empty() {
            let order = self
                .order
                .iter()
                .map(|o| format!("{}.{}", o.column, if o.ascending { "asc" } else { "desc" }))
                .collect::<Vec<_>>()
                .join(",");
            params.push(("order".to_string(), order));
        }

        if let Some(limit) = self.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }

        params
    }
}
