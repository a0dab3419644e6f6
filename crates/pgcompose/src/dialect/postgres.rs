//! Postgres SQL generation.
//!
//! Pure compilation functions turning resolved fragments into SQL text.
//! Every function that can bind a value takes the running parameter vector:
//! a placeholder's number is `params.len() + 1` at push time, so placeholder
//! numbering is globally monotonic and matches the final flat array as long
//! as fragments are rendered in output order. There is no string
//! replacement and no module-level counter.

use crate::ident;
use crate::value::Value;

use super::{JoinDescriptor, WhereObject};

/// How a joined predicate renders inside a WHERE clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PredicateScope {
    /// The clause ranges over base rows only: a joined predicate becomes a
    /// correlated `EXISTS` over its join chain, so it excludes base rows
    /// without multiplying them.
    BaseRows,
    /// The clause ranges over rows that already carry the join aliases: a
    /// joined predicate references its terminal alias directly.
    JoinedRows,
}

fn render_plain(w: &WhereObject, params: &mut Vec<Value>) -> String {
    let field = ident::qualify(&w.alias, &w.column);
    if w.comparator.takes_value() {
        params.push(w.value.clone());
        w.comparator.render(&field, params.len())
    } else {
        w.comparator.render(&field, 0)
    }
}

fn render_exists(w: &WhereObject, params: &mut Vec<Value>) -> String {
    let first = &w.joins[0];
    let mut sql = String::from("EXISTS (SELECT 1 FROM ");
    sql.push_str(&ident::quote(&first.table));
    sql.push_str(" AS ");
    sql.push_str(&ident::quote(&first.alias));
    for hop in &w.joins[1..] {
        sql.push_str(" JOIN ");
        sql.push_str(&ident::quote(&hop.table));
        sql.push_str(" AS ");
        sql.push_str(&ident::quote(&hop.alias));
        sql.push_str(" ON ");
        sql.push_str(&ident::qualify(&hop.alias, &hop.column));
        sql.push_str(" = ");
        sql.push_str(&ident::qualify(&hop.from_alias, &hop.from_column));
    }
    sql.push_str(" WHERE ");
    sql.push_str(&ident::qualify(&first.alias, &first.column));
    sql.push_str(" = ");
    sql.push_str(&ident::qualify(&first.from_alias, &first.from_column));
    sql.push_str(" AND ");
    sql.push_str(&render_plain(w, params));
    sql.push(')');
    sql
}

fn render_predicate(w: &WhereObject, scope: PredicateScope, params: &mut Vec<Value>) -> String {
    if w.joined() && scope == PredicateScope::BaseRows {
        render_exists(w, params)
    } else {
        render_plain(w, params)
    }
}

/// Render a set of OR-branches, each an AND-list of predicates.
///
/// Returns an empty string when nothing renders. With more than one branch
/// each branch is parenthesized; callers embedding the result in an AND
/// context wrap the whole clause.
pub fn render_where_groups(
    groups: &[Vec<WhereObject>],
    scope: PredicateScope,
    params: &mut Vec<Value>,
) -> String {
    let mut branches: Vec<String> = Vec::new();
    for group in groups {
        if group.is_empty() {
            continue;
        }
        let parts: Vec<String> = group
            .iter()
            .map(|w| render_predicate(w, scope, params))
            .collect();
        branches.push(parts.join(" AND "));
    }
    match branches.len() {
        0 => String::new(),
        1 => branches.into_iter().next().expect("len == 1"),
        _ => branches
            .iter()
            .map(|b| format!("({b})"))
            .collect::<Vec<_>>()
            .join(" OR "),
    }
}

/// Render one LEFT JOIN clause, with join-local filters in the ON clause.
///
/// A join with no local filter never excludes rows on the near side; local
/// filters only restrict which far-side rows attach.
pub fn render_join(j: &JoinDescriptor, params: &mut Vec<Value>) -> String {
    let mut sql = String::from("LEFT JOIN ");
    sql.push_str(&ident::quote(&j.table));
    sql.push_str(" AS ");
    sql.push_str(&ident::quote(&j.alias));
    sql.push_str(" ON ");
    sql.push_str(&ident::qualify(&j.alias, &j.column));
    sql.push_str(" = ");
    sql.push_str(&ident::qualify(&j.from_alias, &j.from_column));
    let local = render_where_groups(&j.filters, PredicateScope::JoinedRows, params);
    if !local.is_empty() {
        sql.push_str(" AND (");
        sql.push_str(&local);
        sql.push(')');
    }
    sql
}

/// Render one ORDER BY term for an already-quoted field reference.
pub fn render_order(field: &str, desc: bool) -> String {
    if desc {
        format!("{field} DESC")
    } else {
        format!("{field} ASC")
    }
}

/// Resolved inputs for one SELECT level.
pub struct SelectParts<'a> {
    /// Rendered FROM source: a quoted table name or a parenthesized subquery.
    pub from: &'a str,
    pub alias: &'a str,
    /// Fully rendered select expressions.
    pub columns: &'a [String],
    pub joins: &'a [JoinDescriptor],
    pub filters: &'a [Vec<WhereObject>],
    pub scope: PredicateScope,
    /// Rendered GROUP BY references.
    pub group_by: &'a [String],
    /// Rendered ORDER BY terms.
    pub order_by: &'a [String],
    /// `(offset, count)`
    pub limit: Option<(u64, u64)>,
}

/// Generate one SELECT level. Fragments render in output order so the
/// threaded parameter cursor matches the text left to right.
pub fn generate_select_query(p: &SelectParts<'_>, params: &mut Vec<Value>) -> String {
    let mut sql = String::from("SELECT ");
    sql.push_str(&p.columns.join(", "));
    sql.push_str(" FROM ");
    sql.push_str(p.from);
    sql.push_str(" AS ");
    sql.push_str(&ident::quote(p.alias));
    for j in p.joins {
        sql.push(' ');
        sql.push_str(&render_join(j, params));
    }
    let where_sql = render_where_groups(p.filters, p.scope, params);
    if !where_sql.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&where_sql);
    }
    if !p.group_by.is_empty() {
        sql.push_str(" GROUP BY ");
        sql.push_str(&p.group_by.join(", "));
    }
    if !p.order_by.is_empty() {
        sql.push_str(" ORDER BY ");
        sql.push_str(&p.order_by.join(", "));
    }
    if let Some((offset, count)) = p.limit {
        sql.push_str(&format!(" LIMIT {count}"));
        if offset > 0 {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
    }
    sql
}

/// Wrap a compiled query in a COUNT.
pub fn generate_count_query(inner_sql: &str) -> String {
    format!(
        "SELECT COUNT(*) AS {} FROM ({inner_sql}) AS {}",
        ident::quote("count"),
        ident::quote("c")
    )
}

/// Generate a single-row INSERT, binding one parameter per column.
pub fn generate_insert_query(
    table: &str,
    columns: &[&str],
    values: &[Value],
    params: &mut Vec<Value>,
) -> String {
    let mut placeholders = Vec::with_capacity(values.len());
    for v in values {
        params.push(v.clone());
        placeholders.push(format!("${}", params.len()));
    }
    format!(
        "INSERT INTO {} ({}) VALUES ({}) RETURNING *",
        ident::quote(table),
        columns
            .iter()
            .map(|c| ident::quote(c))
            .collect::<Vec<_>>()
            .join(", "),
        placeholders.join(", ")
    )
}

/// Render an UPDATE SET list, binding one parameter per column.
pub fn render_set_clause(sets: &[(&str, Value)], params: &mut Vec<Value>) -> String {
    let mut parts = Vec::with_capacity(sets.len());
    for (column, value) in sets {
        params.push(value.clone());
        parts.push(format!("{} = ${}", ident::quote(column), params.len()));
    }
    parts.join(", ")
}

/// Generate an UPDATE over a row-id subquery.
///
/// The SET clause must be rendered (and its parameters pushed) before the id
/// subquery is compiled, matching the output order of the placeholders.
pub fn generate_update_all_query(table: &str, set_sql: &str, pk: &str, ids_sql: &str) -> String {
    format!(
        "UPDATE {} SET {set_sql} WHERE {} IN ({ids_sql}) RETURNING *",
        ident::quote(table),
        ident::quote(pk)
    )
}

/// Generate a DELETE over a row-id subquery.
pub fn generate_delete_all_query(table: &str, pk: &str, ids_sql: &str) -> String {
    format!(
        "DELETE FROM {} WHERE {} IN ({ids_sql}) RETURNING *",
        ident::quote(table),
        ident::quote(pk)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Comparator;

    fn w(alias: &str, column: &str, cmp: Comparator, value: Value) -> WhereObject {
        WhereObject::new(alias, column, cmp, value)
    }

    #[test]
    fn single_group_renders_and_list() {
        let mut params = Vec::new();
        let sql = render_where_groups(
            &[vec![
                w("t", "a", Comparator::Is, Value::Int(1)),
                w("t", "b", Comparator::Gt, Value::Int(2)),
            ]],
            PredicateScope::BaseRows,
            &mut params,
        );
        assert_eq!(sql, "\"t\".\"a\" = $1 AND \"t\".\"b\" > $2");
        assert_eq!(params, vec![Value::Int(1), Value::Int(2)]);
    }

    #[test]
    fn multiple_groups_render_or_branches() {
        let mut params = Vec::new();
        let sql = render_where_groups(
            &[
                vec![w("t", "a", Comparator::Is, Value::Int(1))],
                vec![w("t", "b", Comparator::Is, Value::Int(2))],
            ],
            PredicateScope::BaseRows,
            &mut params,
        );
        assert_eq!(sql, "(\"t\".\"a\" = $1) OR (\"t\".\"b\" = $2)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn value_less_comparators_bind_nothing() {
        let mut params = Vec::new();
        let sql = render_where_groups(
            &[vec![
                w("t", "a", Comparator::IsNull, Value::Null),
                w("t", "b", Comparator::Is, Value::Int(9)),
            ]],
            PredicateScope::BaseRows,
            &mut params,
        );
        assert_eq!(sql, "\"t\".\"a\" IS NULL AND \"t\".\"b\" = $1");
        assert_eq!(params, vec![Value::Int(9)]);
    }

    #[test]
    fn joined_predicate_renders_exists_at_base_scope() {
        let mut pred = w("children__j0", "age", Comparator::Gte, Value::Int(10));
        pred.joins = vec![JoinDescriptor {
            table: "children".to_string(),
            alias: "children__j0".to_string(),
            column: "parent_id".to_string(),
            from_alias: "parents".to_string(),
            from_column: "id".to_string(),
            multiple: true,
            filters: vec![],
        }];
        let mut params = Vec::new();
        let sql = render_where_groups(
            &[vec![pred.clone()]],
            PredicateScope::BaseRows,
            &mut params,
        );
        assert_eq!(
            sql,
            "EXISTS (SELECT 1 FROM \"children\" AS \"children__j0\" WHERE \
             \"children__j0\".\"parent_id\" = \"parents\".\"id\" AND \
             \"children__j0\".\"age\" >= $1)"
        );
        assert_eq!(params, vec![Value::Int(10)]);

        let mut params = Vec::new();
        let sql = render_where_groups(&[vec![pred]], PredicateScope::JoinedRows, &mut params);
        assert_eq!(sql, "\"children__j0\".\"age\" >= $1");
    }

    #[test]
    fn join_renders_local_filters_in_on_clause() {
        let j = JoinDescriptor {
            table: "children".to_string(),
            alias: "children__j0".to_string(),
            column: "parent_id".to_string(),
            from_alias: "parents".to_string(),
            from_column: "id".to_string(),
            multiple: true,
            filters: vec![vec![w(
                "children__j0",
                "age",
                Comparator::Lt,
                Value::Int(18),
            )]],
        };
        let mut params = Vec::new();
        let sql = render_join(&j, &mut params);
        assert_eq!(
            sql,
            "LEFT JOIN \"children\" AS \"children__j0\" ON \
             \"children__j0\".\"parent_id\" = \"parents\".\"id\" AND \
             (\"children__j0\".\"age\" < $1)"
        );
        assert_eq!(params, vec![Value::Int(18)]);
    }

    #[test]
    fn select_query_orders_fragments() {
        let columns = vec!["\"t\".\"id\"".to_string(), "\"t\".\"name\"".to_string()];
        let filters = vec![vec![w("t", "name", Comparator::Is, Value::from("x"))]];
        let order = vec![render_order("\"t\".\"id\"", false)];
        let mut params = Vec::new();
        let sql = generate_select_query(
            &SelectParts {
                from: "\"t\"",
                alias: "t",
                columns: &columns,
                joins: &[],
                filters: &filters,
                scope: PredicateScope::BaseRows,
                group_by: &[],
                order_by: &order,
                limit: Some((5, 10)),
            },
            &mut params,
        );
        assert_eq!(
            sql,
            "SELECT \"t\".\"id\", \"t\".\"name\" FROM \"t\" AS \"t\" WHERE \
             \"t\".\"name\" = $1 ORDER BY \"t\".\"id\" ASC LIMIT 10 OFFSET 5"
        );
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn count_query_wraps_inner() {
        assert_eq!(
            generate_count_query("SELECT 1"),
            "SELECT COUNT(*) AS \"count\" FROM (SELECT 1) AS \"c\""
        );
    }

    #[test]
    fn insert_query_binds_in_order() {
        let mut params = Vec::new();
        let sql = generate_insert_query(
            "users",
            &["name", "age"],
            &[Value::from("a"), Value::Int(3)],
            &mut params,
        );
        assert_eq!(
            sql,
            "INSERT INTO \"users\" (\"name\", \"age\") VALUES ($1, $2) RETURNING *"
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn update_all_query_shape() {
        let mut params = Vec::new();
        let set_sql = render_set_clause(&[("name", Value::from("b"))], &mut params);
        let sql = generate_update_all_query("users", &set_sql, "id", "SELECT \"id\"");
        assert_eq!(
            sql,
            "UPDATE \"users\" SET \"name\" = $1 WHERE \"id\" IN (SELECT \"id\") RETURNING *"
        );
    }

    #[test]
    fn delete_all_query_shape() {
        assert_eq!(
            generate_delete_all_query("users", "id", "SELECT \"id\""),
            "DELETE FROM \"users\" WHERE \"id\" IN (SELECT \"id\") RETURNING *"
        );
    }
}
