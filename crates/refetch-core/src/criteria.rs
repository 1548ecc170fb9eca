//! Filter criteria handed to an engine's query-by-criteria operation
//!
//! The core only builds and forwards criteria; evaluating them is the
//! engine's job.

use crate::model::Value;

/// Comparison operator of a field expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl Comparison {
    /// SQL spelling of the operator
    pub fn as_sql(&self) -> &'static str {
        match self {
            Comparison::Eq => "=",
            Comparison::Neq => "<>",
            Comparison::Lt => "<",
            Comparison::Lte => "<=",
            Comparison::Gt => ">",
            Comparison::Gte => ">=",
        }
    }
}

/// Predicate over mapped field names
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Compare {
        field: String,
        op: Comparison,
        value: Value,
    },
    IsNull {
        field: String,
    },
    In {
        field: String,
        values: Vec<Value>,
    },
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    fn compare(field: impl Into<String>, op: Comparison, value: impl Into<Value>) -> Self {
        Expr::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Eq, value)
    }

    pub fn neq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Neq, value)
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Lt, value)
    }

    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Lte, value)
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Gt, value)
    }

    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(field, Comparison::Gte, value)
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Expr::IsNull {
            field: field.into(),
        }
    }

    pub fn in_list<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Expr::In {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn or(exprs: Vec<Expr>) -> Self {
        Expr::Or(exprs)
    }

    pub fn and(exprs: Vec<Expr>) -> Self {
        Expr::And(exprs)
    }
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    Asc,
    Desc,
}

impl Order {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Order::Asc => "ASC",
            Order::Desc => "DESC",
        }
    }
}

/// Conjunction of expressions plus ordering and paging
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Criteria {
    filters: Vec<Expr>,
    orderings: Vec<(String, Order)>,
    first_result: Option<usize>,
    max_results: Option<usize>,
}

impl Criteria {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter; all filters must hold
    pub fn and_where(mut self, expr: Expr) -> Self {
        self.filters.push(expr);
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, order: Order) -> Self {
        self.orderings.push((field.into(), order));
        self
    }

    pub fn set_first_result(mut self, first_result: usize) -> Self {
        self.first_result = Some(first_result);
        self
    }

    pub fn set_max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn filters(&self) -> &[Expr] {
        &self.filters
    }

    pub fn orderings(&self) -> &[(String, Order)] {
        &self.orderings
    }

    pub fn first_result(&self) -> Option<usize> {
        self.first_result
    }

    pub fn max_results(&self) -> Option<usize> {
        self.max_results
    }

    /// True when the criteria select every record
    pub fn is_unfiltered(&self) -> bool {
        self.filters.is_empty() && self.first_result.is_none() && self.max_results.is_none()
    }
}
