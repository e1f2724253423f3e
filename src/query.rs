use rusqlite::types::Value as SqlValue;

/// Columns of the `talks` table that may appear in a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Id,
    SourceUrl,
    HighlightAnnotation,
    EnglishName,
    Year,
    ProcessedAt,
}

impl Field {
    pub fn column(&self) -> &'static str {
        match self {
            Field::Id => "id",
            Field::SourceUrl => "source_url",
            Field::HighlightAnnotation => "highlight_annotation",
            Field::EnglishName => "english_name",
            Field::Year => "year",
            Field::ProcessedAt => "processed_at",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Eq,
    Like,
    Ge,
    Le,
    IsNull,
    IsNotNull,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub field: Field,
    pub op: Op,
    pub value: Option<SqlValue>,
}

impl Predicate {
    fn binary(field: Field, op: Op, value: impl Into<SqlValue>) -> Self {
        Predicate {
            field,
            op,
            value: Some(value.into()),
        }
    }

    pub fn eq(field: Field, value: impl Into<SqlValue>) -> Self {
        Self::binary(field, Op::Eq, value)
    }

    pub fn like(field: Field, pattern: impl Into<SqlValue>) -> Self {
        Self::binary(field, Op::Like, pattern)
    }

    pub fn ge(field: Field, value: impl Into<SqlValue>) -> Self {
        Self::binary(field, Op::Ge, value)
    }

    pub fn le(field: Field, value: impl Into<SqlValue>) -> Self {
        Self::binary(field, Op::Le, value)
    }

    pub fn is_null(field: Field) -> Self {
        Predicate {
            field,
            op: Op::IsNull,
            value: None,
        }
    }

    pub fn is_not_null(field: Field) -> Self {
        Predicate {
            field,
            op: Op::IsNotNull,
            value: None,
        }
    }

    /// SQL fragment for this predicate; binds `value` as `?N` when present.
    fn render(&self, params: &mut Vec<SqlValue>) -> String {
        let col = self.field.column();
        let mut bind = |v: &SqlValue| {
            params.push(v.clone());
            format!("?{}", params.len())
        };
        match (self.op, &self.value) {
            (Op::IsNull, _) => format!("{} IS NULL", col),
            (Op::IsNotNull, _) => format!("{} IS NOT NULL", col),
            (Op::Eq, Some(v)) => format!("{} = {}", col, bind(v)),
            (Op::Like, Some(v)) => format!("{} LIKE {}", col, bind(v)),
            (Op::Ge, Some(v)) => format!("{} >= {}", col, bind(v)),
            (Op::Le, Some(v)) => format!("{} <= {}", col, bind(v)),
            // a comparison without a value matches nothing
            (_, None) => "0".to_string(),
        }
    }
}

/// A SELECT over `talks` assembled from typed predicates, so no caller
/// text ever lands in the SQL string.
#[derive(Debug, Clone, Default)]
pub struct Query {
    predicates: Vec<Predicate>,
    order_by: Option<Field>,
    limit: Option<usize>,
    offset: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn order_by(mut self, field: Field) -> Self {
        self.order_by = Some(field);
        self
    }

    pub fn page(mut self, offset: usize, limit: usize) -> Self {
        self.offset = Some(offset);
        self.limit = Some(limit);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns the full statement and its positional parameters.
    pub fn build(&self, columns: &str) -> (String, Vec<SqlValue>) {
        let mut params = Vec::new();
        let mut sql = format!("SELECT {} FROM talks", columns);

        if !self.predicates.is_empty() {
            let clauses: Vec<String> = self
                .predicates
                .iter()
                .map(|p| p.render(&mut params))
                .collect();
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        if let Some(field) = self.order_by {
            sql.push_str(&format!(" ORDER BY {}", field.column()));
        }
        if let Some(limit) = self.limit {
            params.push(SqlValue::Integer(limit as i64));
            sql.push_str(&format!(" LIMIT ?{}", params.len()));
            if let Some(offset) = self.offset {
                params.push(SqlValue::Integer(offset as i64));
                sql.push_str(&format!(" OFFSET ?{}", params.len()));
            }
        }
        (sql, params)
    }
}
