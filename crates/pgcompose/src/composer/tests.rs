//! Cross-module tests for chain compilation and its contracts.

use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

use crate::client::Database;
use crate::composer::hydrate::{DecodedRow, hydrate_rows};
use crate::error::ComposeResult;
use crate::dialect::{AggregateFn, generate_update_all_query, render_set_clause};
use crate::error::ComposeError;
use crate::graph::{JoinOptions, RelationshipGraph};
use crate::predicates;
use crate::schema::{ColumnSchema, DataType, Schema, TableSchema};
use crate::value::Value;

use super::{Composer, Direction, query};

fn fixtures() -> (Schema, RelationshipGraph) {
    let mut schema = Schema::new();
    schema.add_table(
        TableSchema::new(
            "parents",
            vec![
                ColumnSchema::id(),
                ColumnSchema::new("name", DataType::Text),
                ColumnSchema::new("age", DataType::Int),
            ],
        )
        .unwrap()
        .default_aggregate("age", AggregateFn::Avg),
    );
    schema.add_table(
        TableSchema::new(
            "children",
            vec![
                ColumnSchema::id(),
                ColumnSchema::new("parent_id", DataType::BigInt),
                ColumnSchema::new("age", DataType::Int),
            ],
        )
        .unwrap(),
    );
    schema.add_table(
        TableSchema::new(
            "toys",
            vec![
                ColumnSchema::id(),
                ColumnSchema::new("child_id", DataType::BigInt),
                ColumnSchema::new("price", DataType::Int),
            ],
        )
        .unwrap(),
    );

    let mut graph = RelationshipGraph::new();
    let parents = graph.of("parents");
    let children = graph.of("children");
    let toys = graph.of("toys");
    graph.joins_to(children, parents, JoinOptions::multiple());
    graph.joins_to(toys, children, JoinOptions::multiple());
    (schema, graph)
}

fn compose<'a>(schema: &'a Schema, graph: &'a RelationshipGraph) -> Composer<'a> {
    query(schema, graph, "parents").unwrap()
}

/// All `$n` occurrences in text order.
fn placeholder_sequence(sql: &str) -> Vec<usize> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            let mut j = i + 1;
            let mut n = 0usize;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                n = n * 10 + (bytes[j] - b'0') as usize;
                j += 1;
            }
            if j > i + 1 {
                out.push(n);
            }
            i = j;
        } else {
            i += 1;
        }
    }
    out
}

#[test]
fn bare_query_selects_base_columns() {
    let (schema, graph) = fixtures();
    let (sql, params) = compose(&schema, &graph).to_sql().unwrap();
    assert_eq!(
        sql,
        "SELECT \"parents\".\"id\", \"parents\".\"name\", \"parents\".\"age\" \
         FROM \"parents\" AS \"parents\""
    );
    assert!(params.is_empty());
}

#[test]
fn sequential_filters_nest_one_select_per_link() {
    let (schema, graph) = fixtures();
    let c = compose(&schema, &graph)
        .filter([predicates! { "name" => "a" }])
        .unwrap()
        .filter([predicates! { "name" => "b" }])
        .unwrap()
        .filter([predicates! { "name" => "c" }])
        .unwrap();
    let (sql, params) = c.to_sql().unwrap();
    assert_eq!(sql.matches("SELECT").count(), 3);
    assert_eq!(sql.matches("FROM (").count(), 2);
    assert_eq!(params.len(), 3);
}

#[test]
fn filter_after_limit_scopes_to_limited_set() {
    let (schema, graph) = fixtures();
    let c = compose(&schema, &graph)
        .filter([predicates! { "name" => "X" }])
        .unwrap()
        .limit(0, 5)
        .filter([predicates! { "name" => "X" }])
        .unwrap();
    let (sql, params) = c.to_sql().unwrap();
    // Two nested SELECTs; the limit stays on the inner one, so the second
    // filter ranges over the limited set.
    assert_eq!(sql.matches("SELECT").count(), 2);
    let inner_end = sql.rfind("LIMIT 5").unwrap();
    let outer_where = sql.rfind("WHERE").unwrap();
    assert!(outer_where > inner_end);
    assert_eq!(params.len(), 2);
    assert_eq!(placeholder_sequence(&sql), vec![1, 2]);
}

#[test]
fn or_groups_and_comparators_compile() {
    let (schema, graph) = fixtures();
    let c = compose(&schema, &graph)
        .filter([
            predicates! { "name__icontains" => "al", "age__gte" => 21 },
            predicates! { "age__is_null" => Value::Null },
        ])
        .unwrap();
    let (sql, params) = c.to_sql().unwrap();
    assert!(sql.contains(
        "(\"parents\".\"name\" ILIKE '%' || $1 || '%' AND \"parents\".\"age\" >= $2) \
         OR (\"parents\".\"age\" IS NULL)"
    ));
    // is_null occupies WHERE text but binds nothing.
    assert_eq!(params.len(), 2);
}

#[test]
fn unknown_column_and_comparator_drop_silently() {
    let (schema, graph) = fixtures();
    let c = compose(&schema, &graph)
        .filter([predicates! {
            "ghost" => 1,
            "age__frobnicate" => 2,
            "name" => "keep"
        }])
        .unwrap();
    let (sql, params) = c.to_sql().unwrap();
    assert!(sql.contains("\"parents\".\"name\" = $1"));
    assert!(!sql.contains("ghost"));
    assert!(!sql.contains("frobnicate"));
    assert_eq!(params.len(), 1);
}

#[test]
fn unknown_filter_relationship_is_hard_error() {
    let (schema, graph) = fixtures();
    let err = compose(&schema, &graph)
        .filter([predicates! { "ghosts__name" => "x" }])
        .unwrap_err();
    assert!(matches!(err, ComposeError::UnknownRelationship(_)));
}

#[test]
fn unknown_join_is_hard_error() {
    let (schema, graph) = fixtures();
    let err = compose(&schema, &graph).join("ghosts", vec![]).unwrap_err();
    assert!(matches!(err, ComposeError::UnknownRelationship(_)));
}

#[test]
fn join_without_filter_never_excludes_base_rows() {
    let (schema, graph) = fixtures();
    let c = compose(&schema, &graph).join("children", vec![]).unwrap();
    let (sql, params) = c.to_sql().unwrap();
    assert!(sql.contains(
        "LEFT JOIN \"children\" AS \"children__j0\" ON \
         \"children__j0\".\"parent_id\" = \"parents\".\"id\""
    ));
    assert!(sql.contains("AS \"children__j0$age\""));
    // No WHERE anywhere: the outer wrapper must not reduce the parent set.
    assert!(!sql.contains("WHERE"));
    assert!(params.is_empty());
}

#[test]
fn join_local_filters_stay_in_on_clause() {
    let (schema, graph) = fixtures();
    let c = compose(&schema, &graph)
        .join("children", vec![predicates! { "age__lt" => 18 }])
        .unwrap();
    let (sql, params) = c.to_sql().unwrap();
    assert!(sql.contains("ON \"children__j0\".\"parent_id\" = \"parents\".\"id\" AND \
                          (\"children__j0\".\"age\" < $1)"));
    assert!(!sql.contains("WHERE"));
    assert_eq!(params.len(), 1);
}

#[test]
fn joined_filter_excludes_at_base_granularity_and_restricts_children() {
    let (schema, graph) = fixtures();
    let c = compose(&schema, &graph)
        .join("children", vec![])
        .unwrap()
        .filter([predicates! { "children__age__gte" => 10 }])
        .unwrap()
        .order_by("id", Direction::Asc)
        .unwrap()
        .limit(0, 2);
    let (sql, params) = c.to_sql().unwrap();

    // Base rows are filtered before the limit via a correlated EXISTS...
    assert!(sql.contains(
        "EXISTS (SELECT 1 FROM \"children\" AS \"children__j0\" WHERE \
         \"children__j0\".\"parent_id\" = \"parents\".\"id\" AND \
         \"children__j0\".\"age\" >= $1)"
    ));
    assert!(sql.contains("LIMIT 2"));
    // ...and the joined wrapper re-applies the predicate so only matching
    // children hydrate.
    assert!(sql.contains("WHERE \"children__j0\".\"age\" >= $2"));
    assert!(sql.contains("ORDER BY \"parents\".\"id\" ASC"));
    assert_eq!(params, vec![Value::Int(10), Value::Int(10)]);
    assert_eq!(placeholder_sequence(&sql), vec![1, 2]);
}

#[test]
fn scenario_rows_hydrate_two_parents_with_filtered_children() {
    // Parent(id, name), Child(id, parent_id, age); 3 parents whose children
    // are aged [5, 15, 25]; join + children__age__gte 10 + order + limit 2.
    // The compiled query (previous test) yields joined rows for the first
    // two parents with only the matching children; hydration re-nests them.
    let (schema, graph) = fixtures();
    let meta = {
        let c = compose(&schema, &graph)
            .join("children", vec![])
            .unwrap()
            .filter([predicates! { "children__age__gte" => 10 }])
            .unwrap();
        c.join_meta()
    };

    let mut rows = Vec::new();
    for (parent_id, child_base) in [(1i64, 10i64), (2, 20)] {
        for age in [15i64, 25] {
            rows.push(DecodedRow {
                columns: vec![
                    "id".to_string(),
                    "name".to_string(),
                    "age".to_string(),
                    "children__j0$id".to_string(),
                    "children__j0$parent_id".to_string(),
                    "children__j0$age".to_string(),
                ],
                values: vec![
                    Value::Int(parent_id),
                    Value::Text(format!("p{parent_id}")),
                    Value::Int(40),
                    Value::Int(child_base + age),
                    Value::Int(parent_id),
                    Value::Int(age),
                ],
            });
        }
    }

    let records = hydrate_rows(&schema, "parents", &meta, rows).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].get("id"), Some(&Value::Int(1)));
    assert_eq!(records[1].get("id"), Some(&Value::Int(2)));
    for record in &records {
        let ages: Vec<&Value> = record
            .related("children")
            .unwrap()
            .iter()
            .map(|c| c.get("age").unwrap())
            .collect();
        assert_eq!(ages, vec![&Value::Int(15), &Value::Int(25)]);
    }
}

#[test]
fn multi_hop_join_filters_nest_arbitrarily_deep() {
    let (schema, graph) = fixtures();
    let c = compose(&schema, &graph)
        .join("children__toys", vec![])
        .unwrap()
        .filter([predicates! { "children__toys__price__gte" => 100 }])
        .unwrap();
    let (sql, params) = c.to_sql().unwrap();
    assert!(sql.contains(
        "EXISTS (SELECT 1 FROM \"children\" AS \"children__j0\" \
         JOIN \"toys\" AS \"toys__j1\" ON \"toys__j1\".\"child_id\" = \"children__j0\".\"id\" \
         WHERE \"children__j0\".\"parent_id\" = \"parents\".\"id\" AND \
         \"toys__j1\".\"price\" >= $1)"
    ));
    assert!(sql.contains("LEFT JOIN \"children\" AS \"children__j0\""));
    assert!(sql.contains("LEFT JOIN \"toys\" AS \"toys__j1\""));
    assert_eq!(params.len(), 2);
    assert_eq!(placeholder_sequence(&sql), vec![1, 2]);
}

#[test]
fn direction_normalizes_with_asc_default() {
    assert_eq!(Direction::parse("desc"), Direction::Desc);
    assert_eq!(Direction::parse("DESC"), Direction::Desc);
    assert_eq!(Direction::parse("asc"), Direction::Asc);
    assert_eq!(Direction::parse("sideways"), Direction::Asc);
}

#[test]
fn repeated_limits_narrow_the_window() {
    let (schema, graph) = fixtures();
    let c = compose(&schema, &graph).limit(0, 10).limit(5, 20);
    let (sql, _) = c.to_sql().unwrap();
    assert!(sql.ends_with("LIMIT 10 OFFSET 5"));
}

#[test]
fn grouped_query_wraps_every_non_key_column() {
    let (schema, graph) = fixtures();
    let c = compose(&schema, &graph).group_by("name").unwrap();
    let (sql, _) = c.to_sql().unwrap();
    assert!(sql.contains("GROUP BY \"parents\".\"name\""));
    assert!(sql.contains("\"parents\".\"name\" AS \"name\""));
    // Declared default aggregate for age, NULL fallback for id.
    assert!(sql.contains("AVG(\"parents\".\"age\") AS \"age\""));
    assert!(sql.contains("NULL AS \"id\""));
    assert!(!sql.contains("\"parents\".\"id\" AS"));
}

#[test]
fn grouped_query_with_aggregate_column() {
    let (schema, graph) = fixtures();
    let c = compose(&schema, &graph)
        .group_by("name")
        .unwrap()
        .aggregate("oldest", AggregateFn::Max, &["age"])
        .unwrap();
    let (sql, _) = c.to_sql().unwrap();
    assert!(sql.contains("MAX(\"parents\".\"age\") AS \"oldest\""));
    assert!(sql.contains("GROUP BY \"parents\".\"name\""));
}

#[test]
fn standalone_aggregate_produces_one_summary_projection() {
    let (schema, graph) = fixtures();
    let c = compose(&schema, &graph)
        .filter([predicates! { "age__gte" => 21 }])
        .unwrap()
        .aggregate("total", AggregateFn::Count, &["id"])
        .unwrap();
    let (sql, params) = c.to_sql().unwrap();
    assert!(sql.starts_with("SELECT COUNT(\"parents\".\"id\") AS \"total\" FROM (SELECT"));
    assert_eq!(params.len(), 1);
}

#[test]
fn order_by_errors_on_standalone_aggregate() {
    let (schema, graph) = fixtures();
    let err = compose(&schema, &graph)
        .aggregate("total", AggregateFn::Count, &["id"])
        .unwrap()
        .order_by("id", Direction::Asc)
        .unwrap_err();
    assert!(matches!(err, ComposeError::AggregateOrdering(_)));
}

#[test]
fn order_by_is_allowed_once_grouped() {
    let (schema, graph) = fixtures();
    let c = compose(&schema, &graph)
        .group_by("name")
        .unwrap()
        .aggregate("oldest", AggregateFn::Max, &["age"])
        .unwrap()
        .order_by("oldest", Direction::Desc)
        .unwrap();
    let (sql, _) = c.to_sql().unwrap();
    assert!(sql.contains("ORDER BY \"oldest\" DESC"));
}

#[test]
fn count_query_wraps_the_chain() {
    let (schema, graph) = fixtures();
    let c = compose(&schema, &graph)
        .filter([predicates! { "name" => "X" }])
        .unwrap()
        .limit(0, 5);
    let (sql, params) = c.compile_count().unwrap();
    assert!(sql.starts_with("SELECT COUNT(*) AS \"count\" FROM (SELECT"));
    assert!(sql.contains("LIMIT 5"));
    assert_eq!(params.len(), 1);
}

#[test]
fn summary_query_strips_group_and_order() {
    let (schema, graph) = fixtures();
    let c = compose(&schema, &graph)
        .group_by("name")
        .unwrap()
        .aggregate("oldest", AggregateFn::Max, &["age"])
        .unwrap();
    let (sql, _) = c.compile_summary().unwrap();
    assert!(sql.starts_with("SELECT MAX(\"parents\".\"age\") AS \"oldest\" FROM (SELECT"));
    assert!(!sql.contains("GROUP BY"));
    assert!(!sql.contains("ORDER BY"));
}

#[test]
fn summary_without_aggregates_counts_rows() {
    let (schema, graph) = fixtures();
    let c = compose(&schema, &graph)
        .filter([predicates! { "name" => "X" }])
        .unwrap();
    let (sql, params) = c.compile_summary().unwrap();
    assert!(sql.starts_with("SELECT COUNT(*) AS \"count\" FROM (SELECT"));
    assert_eq!(params.len(), 1);
}

#[test]
fn update_reuses_chain_as_row_id_subquery() {
    let (schema, graph) = fixtures();
    let c = compose(&schema, &graph)
        .filter([predicates! { "age__lt" => 18 }])
        .unwrap();
    let mut params = Vec::new();
    let set_sql = render_set_clause(&[("name", Value::from("minor"))], &mut params);
    let ids_sql = c.compile_row_ids(&mut params).unwrap();
    let sql = generate_update_all_query("parents", &set_sql, "id", &ids_sql);
    assert!(sql.starts_with("UPDATE \"parents\" SET \"name\" = $1 WHERE \"id\" IN (SELECT"));
    assert!(sql.contains("\"parents\".\"age\" < $2"));
    assert!(sql.ends_with("RETURNING *"));
    assert_eq!(params.len(), 2);
    assert_eq!(placeholder_sequence(&sql), vec![1, 2]);
}

#[test]
fn requested_columns_union_across_links() {
    let (schema, graph) = fixtures();
    let c = compose(&schema, &graph)
        .columns(&["name", "missing"])
        .group_by("name")
        .unwrap();
    let (sql, _) = c.to_sql().unwrap();
    // Only the requested (and known) columns appear outside the group key.
    assert!(!sql.contains("NULL AS \"id\""));
    assert!(!sql.contains("missing"));
}

/// Records every statement and returns an empty result set.
#[derive(Default)]
struct RecordingClient {
    statements: std::sync::Mutex<Vec<String>>,
}

impl Database for RecordingClient {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> ComposeResult<Vec<Row>> {
        let _ = params;
        self.statements.lock().unwrap().push(sql.to_string());
        Ok(Vec::new())
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> ComposeResult<u64> {
        let _ = params;
        self.statements.lock().unwrap().push(sql.to_string());
        Ok(0)
    }
}

#[tokio::test]
async fn end_submits_exactly_one_statement() {
    let (schema, graph) = fixtures();
    let client = RecordingClient::default();
    let records = compose(&schema, &graph)
        .filter([predicates! { "name" => "X" }])
        .unwrap()
        .end(&client)
        .await
        .unwrap();
    assert!(records.is_empty());
    let statements = client.statements.lock().unwrap();
    assert_eq!(statements.len(), 1);
    assert!(statements[0].starts_with("SELECT"));
}

#[tokio::test]
async fn count_surfaces_missing_row_as_not_found() {
    let (schema, graph) = fixtures();
    let client = RecordingClient::default();
    let err = compose(&schema, &graph).count(&client).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn update_rejects_key_only_field_sets() {
    let (schema, graph) = fixtures();
    let client = RecordingClient::default();
    let err = compose(&schema, &graph)
        .update(&[("id", Value::Int(9)), ("ghost", Value::Int(1))], &client)
        .await
        .unwrap_err();
    assert!(matches!(err, ComposeError::Validation(_)));
    // Nothing reached the port.
    assert!(client.statements.lock().unwrap().is_empty());
}

#[test]
fn placeholder_count_always_matches_params() {
    let (schema, graph) = fixtures();
    let c = compose(&schema, &graph)
        .join("children", vec![predicates! { "age__lt" => 99 }])
        .unwrap()
        .filter([
            predicates! { "name__startswith" => "a", "children__age__gte" => 10 },
            predicates! { "age__in" => vec![30i64, 40] },
        ])
        .unwrap()
        .filter([predicates! { "age__not_null" => Value::Null, "name__not" => "x" }])
        .unwrap()
        .order_by("id", Direction::Desc)
        .unwrap()
        .limit(2, 7);
    let (sql, params) = c.to_sql().unwrap();
    let seq = placeholder_sequence(&sql);
    assert_eq!(seq.len(), params.len());
    assert_eq!(seq, (1..=params.len()).collect::<Vec<_>>());
}
