//! Translation of criteria into SQL over a mapped table

use refetch_core::criteria::{Comparison, Expr};
use refetch_core::{Criteria, EngineError, ErrorKind, Value};
use rusqlite::types::Value as SqlValue;

use crate::errors::{invalid_criteria, Result};
use crate::mapping::{to_sql, EntityEntry};

const ALIAS: &str = "t";

/// Row and count statements sharing one parameter list
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SelectQuery {
    pub sql: String,
    pub count_sql: String,
    pub params: Vec<SqlValue>,
}

/// Compile `criteria` against the columns of `entry`
pub(crate) fn compile(entry: &EntityEntry, criteria: &Criteria) -> Result<SelectQuery> {
    let mut params = Vec::new();
    let mut conditions = Vec::new();
    for expr in criteria.filters() {
        conditions.push(expr_sql(entry, expr, &mut params)?);
    }
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };

    let mut orderings = Vec::new();
    for (field, order) in criteria.orderings() {
        let column = column(entry, field)?;
        orderings.push(format!("{}.{} {}", ALIAS, column, order.as_sql()));
    }
    for id_column in entry.id_columns() {
        let qualified = format!("{}.{}", ALIAS, id_column);
        if !orderings.iter().any(|o| o.starts_with(&format!("{} ", qualified))) {
            orderings.push(format!("{} ASC", qualified));
        }
    }

    let paging = match (criteria.max_results(), criteria.first_result()) {
        (None, None) => String::new(),
        (Some(max), None) => format!(" LIMIT {}", max),
        (max, Some(first)) => format!(
            " LIMIT {} OFFSET {}",
            max.map_or(-1, |m| m as i64),
            first
        ),
    };

    let from = format!("{} {}{}", entry.table, ALIAS, where_clause);
    Ok(SelectQuery {
        sql: format!(
            "SELECT {} FROM {} ORDER BY {}{}",
            entry.select_list(ALIAS),
            from,
            orderings.join(", "),
            paging
        ),
        count_sql: format!("SELECT COUNT(*) FROM (SELECT 1 FROM {}{})", from, paging),
        params,
    })
}

/// Statements selecting the targets linked to one owner through a join table
pub(crate) fn many_to_many(
    target: &EntityEntry,
    join_table: &str,
    owner_column: &str,
    owner_value: &Value,
    target_column: &str,
) -> Result<SelectQuery> {
    let mut id_columns = target.id_columns();
    let (Some(id_column), None) = (id_columns.next(), id_columns.next()) else {
        return Err(EngineError::new(ErrorKind::Mapping)
            .with_op("many_to_many")
            .with_entity_type(target.name())
            .with_message("Many-to-many targets need a single-column identifier"));
    };

    Ok(SelectQuery {
        sql: format!(
            "SELECT {} FROM {} {} JOIN {} j ON j.{} = {}.{} WHERE j.{} = ? ORDER BY {}.{} ASC",
            target.select_list(ALIAS),
            target.table,
            ALIAS,
            join_table,
            target_column,
            ALIAS,
            id_column,
            owner_column,
            ALIAS,
            id_column
        ),
        count_sql: format!(
            "SELECT COUNT(*) FROM {} WHERE {} = ?",
            join_table, owner_column
        ),
        params: vec![to_sql(owner_value)],
    })
}

fn column(entry: &EntityEntry, field: &str) -> Result<&'static str> {
    entry.column_of(field).ok_or_else(|| {
        invalid_criteria(
            entry.name(),
            format!("Unknown field '{}' for {}", field, entry.name()),
        )
    })
}

fn expr_sql(entry: &EntityEntry, expr: &Expr, params: &mut Vec<SqlValue>) -> Result<String> {
    Ok(match expr {
        Expr::Compare { field, op, value } => {
            let column = column(entry, field)?;
            match (op, value) {
                (Comparison::Eq, Value::Null) => format!("{}.{} IS NULL", ALIAS, column),
                (Comparison::Neq, Value::Null) => format!("{}.{} IS NOT NULL", ALIAS, column),
                (_, Value::Null) => {
                    return Err(invalid_criteria(
                        entry.name(),
                        format!("Cannot order-compare '{}' with null", field),
                    ))
                }
                (op, value) => {
                    params.push(to_sql(value));
                    format!("{}.{} {} ?", ALIAS, column, op.as_sql())
                }
            }
        }
        Expr::IsNull { field } => format!("{}.{} IS NULL", ALIAS, column(entry, field)?),
        Expr::In { field, values } => {
            let column = column(entry, field)?;
            if values.is_empty() {
                "0 = 1".to_string()
            } else {
                params.extend(values.iter().map(to_sql));
                let placeholders = vec!["?"; values.len()].join(", ");
                format!("{}.{} IN ({})", ALIAS, column, placeholders)
            }
        }
        Expr::And(exprs) => join(entry, exprs, " AND ", "1 = 1", params)?,
        Expr::Or(exprs) => join(entry, exprs, " OR ", "0 = 1", params)?,
    })
}

fn join(
    entry: &EntityEntry,
    exprs: &[Expr],
    separator: &str,
    empty: &str,
    params: &mut Vec<SqlValue>,
) -> Result<String> {
    if exprs.is_empty() {
        return Ok(empty.to_string());
    }
    let mut parts = Vec::with_capacity(exprs.len());
    for expr in exprs {
        parts.push(format!("({})", expr_sql(entry, expr, params)?));
    }
    Ok(format!("({})", parts.join(separator)))
}
