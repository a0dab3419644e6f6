//! The Composer: a chainable query builder.
//!
//! A composer accumulates filter/join/order/group/limit intent across
//! chained calls, resolves relationship names through the
//! [`RelationshipGraph`](crate::graph::RelationshipGraph), compiles to one
//! parameterized SQL statement, and drives the [`Database`] port to produce
//! rows, which it hydrates back into [`Record`]s.
//!
//! Construction is synchronous and side-effect-free; the only async
//! boundary is the terminal call (`end`, `count`, `summarize`, `update`,
//! `delete`). Composers are independent of each other — the only shared
//! state is the read-only schema and graph.
//!
//! # Filter keys
//!
//! Filter keys follow `field[__comparator]` — a bare field implies `is` —
//! and may be relationship-qualified (`children__age__gte`) against
//! already-joined relationships. An unknown column or comparator silently
//! drops the predicate; an unknown relationship qualifier is a hard error.
//!
//! ```ignore
//! let parents = query(&schema, &graph, "parents")?
//!     .join("children", vec![])?
//!     .filter([predicates! { "children__age__gte" => 10 }])?
//!     .order_by("id", Direction::Asc)?
//!     .limit(0, 2)
//!     .end(&client)
//!     .await?;
//! ```

mod compile;
mod hydrate;

pub use hydrate::{DecodedRow, JoinMeta, Record};

use tokio_postgres::types::ToSql;

use crate::client::{Database, decode_row};
use crate::dialect::{
    AggregateFn, Comparator, JoinDescriptor, WhereObject, generate_delete_all_query,
    generate_insert_query, generate_update_all_query, render_set_clause,
};
use crate::error::{ComposeError, ComposeResult};
use crate::graph::RelationshipGraph;
use crate::schema::Schema;
use crate::value::Value;

/// One AND-group of filter predicates; multiple groups passed to
/// [`Composer::filter`] OR together.
#[derive(Debug, Clone, Default)]
pub struct FilterGroup {
    entries: Vec<(String, Value)>,
}

impl FilterGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a `field[__comparator]` predicate.
    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.entries.push((key.to_string(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Sort direction; unrecognized inputs normalize to ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

impl Direction {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("desc") {
            Direction::Desc
        } else {
            Direction::Asc
        }
    }
}

/// A derived column: a named aggregate over an explicit list of base
/// columns. Source columns are always declared, never inferred.
#[derive(Debug, Clone)]
pub struct AggregateColumn {
    pub alias: String,
    pub function: AggregateFn,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct OrderSpec {
    pub column: String,
    pub desc: bool,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct GroupBySpec {
    /// `(alias, column)` pairs.
    pub refs: Vec<(String, String)>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct LimitSpec {
    pub offset: u64,
    pub count: u64,
}

/// One generation of the append-only chain.
#[derive(Debug, Clone, Default)]
pub(crate) struct Link {
    pub filters: Vec<Vec<WhereObject>>,
    pub joins: Vec<JoinDescriptor>,
    pub columns: Vec<String>,
    pub order_by: Vec<OrderSpec>,
    pub group_by: Option<GroupBySpec>,
    pub limit: Option<LimitSpec>,
    pub aggregates: Vec<AggregateColumn>,
}

impl Link {
    pub(crate) fn is_inert(&self) -> bool {
        self.filters.is_empty()
            && self.joins.is_empty()
            && self.columns.is_empty()
            && self.order_by.is_empty()
            && self.group_by.is_none()
            && self.limit.is_none()
            && self.aggregates.is_empty()
    }
}

/// Registry entry for a joined relationship path.
#[derive(Debug, Clone)]
pub(crate) struct JoinRef {
    /// Full relationship path name (`children`, `children__toys`, ...).
    pub name: String,
    pub table: String,
    pub alias: String,
    pub multiple: bool,
    /// Descriptors base→terminal, used to build correlated EXISTS clauses
    /// for filters on this relationship.
    pub chain: Vec<JoinDescriptor>,
}

/// The chainable query builder. See the module docs.
#[derive(Debug)]
pub struct Composer<'a> {
    pub(crate) schema: &'a Schema,
    pub(crate) graph: &'a RelationshipGraph,
    pub(crate) table: String,
    pub(crate) sealed: Vec<Link>,
    pub(crate) open: Link,
    pub(crate) registry: Vec<JoinRef>,
    alias_counter: usize,
}

/// Start composing a query for a record type.
pub fn query<'a>(
    schema: &'a Schema,
    graph: &'a RelationshipGraph,
    table: &str,
) -> ComposeResult<Composer<'a>> {
    Composer::new(schema, graph, table)
}

impl<'a> Composer<'a> {
    pub fn new(schema: &'a Schema, graph: &'a RelationshipGraph, table: &str) -> ComposeResult<Self> {
        schema.table(table)?;
        Ok(Self {
            schema,
            graph,
            table: table.to_string(),
            sealed: Vec::new(),
            open: Link::default(),
            registry: Vec::new(),
            alias_counter: 0,
        })
    }

    fn is_standalone_aggregate(&self) -> bool {
        self.has_aggregates() && !self.is_grouped()
    }

    // ==================== Chainable operations ====================

    /// Add filter predicates. Each group ANDs its entries; multiple groups
    /// OR together.
    ///
    /// Calling `filter` when the current link already has filters seals that
    /// link and opens a new one: the new predicates range over the previous
    /// link's (already filtered, already limited) row set.
    pub fn filter(
        mut self,
        groups: impl IntoIterator<Item = FilterGroup>,
    ) -> ComposeResult<Self> {
        let mut resolved: Vec<Vec<WhereObject>> = Vec::new();
        for group in groups {
            let mut predicates = Vec::new();
            for (key, value) in &group.entries {
                if let Some(w) = self.resolve_base_predicate(key, value.clone())? {
                    predicates.push(w);
                }
            }
            if !predicates.is_empty() {
                resolved.push(predicates);
            }
        }
        if !self.open.filters.is_empty() {
            self.sealed.push(std::mem::take(&mut self.open));
        }
        self.open.filters = resolved;
        Ok(self)
    }

    /// Join a relationship by name, resolving `a__b__c` one hop at a time
    /// through the graph. Optional predicate groups become join-local
    /// filters, rendered in the JOIN's ON clause — they restrict which
    /// far-side rows attach without excluding base rows.
    ///
    /// An unresolvable name is an immediate error, not deferred to
    /// execution.
    pub fn join(mut self, name: &str, filters: Vec<FilterGroup>) -> ComposeResult<Self> {
        let start = self
            .graph
            .node(&self.table)
            .ok_or_else(|| ComposeError::unknown_relationship(name))?;
        let mut node = start;
        let mut from_alias = self.table.clone();
        let mut chain: Vec<JoinDescriptor> = Vec::new();
        let mut full_name = String::new();
        let mut term_table = self.table.clone();
        let mut term_alias = self.table.clone();

        for hop in name.split("__") {
            if !full_name.is_empty() {
                full_name.push_str("__");
            }
            full_name.push_str(hop);

            if let Some(jr) = self.registry.iter().find(|j| j.name == full_name) {
                // Already registered by an earlier call; continue from it.
                node = self
                    .graph
                    .node(&jr.table)
                    .ok_or_else(|| ComposeError::unknown_relationship(full_name.clone()))?;
                from_alias = jr.alias.clone();
                chain = jr.chain.clone();
                term_table = jr.table.clone();
                term_alias = jr.alias.clone();
                continue;
            }

            let path = self
                .graph
                .find(node, hop)
                .ok_or_else(|| ComposeError::unknown_relationship(full_name.clone()))?;
            let steps = path.join_steps(self.graph, self.schema, &from_alias, self.alias_counter)?;
            self.alias_counter += steps.len();
            let terminal = path.terminal(self.graph);
            term_table = self.graph.table_name(terminal).to_string();
            term_alias = steps.last().expect("path has at least one hop").alias.clone();
            chain.extend(steps.iter().cloned());
            self.open.joins.extend(steps.iter().cloned());
            self.registry.push(JoinRef {
                name: full_name.clone(),
                table: term_table.clone(),
                alias: term_alias.clone(),
                multiple: chain.iter().any(|d| d.multiple),
                chain: chain.clone(),
            });
            node = terminal;
            from_alias = term_alias.clone();
        }

        if !filters.is_empty() {
            let resolved = self.resolve_local_groups(&filters, &term_table, &term_alias)?;
            if !resolved.is_empty() {
                if let Some(d) = self.open.joins.iter_mut().find(|d| d.alias == term_alias) {
                    d.filters.extend(resolved);
                } else if let Some(d) = self
                    .sealed
                    .iter_mut()
                    .flat_map(|l| l.joins.iter_mut())
                    .find(|d| d.alias == term_alias)
                {
                    d.filters.extend(resolved);
                }
            }
        }
        Ok(self)
    }

    /// Order by a base column (or a projection alias, for grouped queries).
    ///
    /// Errors on a standalone aggregate composer: a one-row summary has no
    /// per-row order.
    pub fn order_by(mut self, field: &str, direction: Direction) -> ComposeResult<Self> {
        if self.is_standalone_aggregate() {
            return Err(ComposeError::AggregateOrdering(field.to_string()));
        }
        self.open.order_by.push(OrderSpec {
            column: field.to_string(),
            desc: direction == Direction::Desc,
        });
        Ok(self)
    }

    /// Group by a base column, or by a joined relationship's full column set
    /// when given a registered relationship name.
    ///
    /// Once any link groups, the whole compiled query is grouped: selected
    /// columns outside the key are wrapped in their declared default
    /// aggregate (literal NULL when undeclared), enforced at compile time.
    pub fn group_by(mut self, name: &str) -> ComposeResult<Self> {
        let base = self.schema.table(&self.table)?;
        let mut spec = self.open.group_by.take().unwrap_or_default();
        if base.has_column(name) {
            spec.refs.push((self.table.clone(), name.to_string()));
        } else if let Some(jr) = self.registry.iter().find(|j| j.name == name) {
            let joined = self.schema.table(&jr.table)?;
            for col in joined.visible_columns() {
                spec.refs.push((jr.alias.clone(), col.to_string()));
            }
        } else {
            return Err(ComposeError::validation(format!(
                "Cannot group by unknown column or relationship '{name}'"
            )));
        }
        self.open.group_by = Some(spec);
        Ok(self)
    }

    /// Group by an explicit set of base columns.
    pub fn group_by_columns(mut self, columns: &[&str]) -> ComposeResult<Self> {
        let base = self.schema.table(&self.table)?;
        let mut spec = self.open.group_by.take().unwrap_or_default();
        for col in columns {
            if !base.has_column(col) {
                return Err(ComposeError::validation(format!(
                    "Cannot group by unknown column '{col}'"
                )));
            }
            spec.refs.push((self.table.clone(), (*col).to_string()));
        }
        self.open.group_by = Some(spec);
        Ok(self)
    }

    /// Restrict the result window. Repeated calls within one link combine by
    /// taking the minimum count and the cumulative offset — a later call can
    /// narrow, never widen, the window.
    pub fn limit(mut self, offset: u64, count: u64) -> Self {
        self.open.limit = Some(match self.open.limit {
            Some(prev) => LimitSpec {
                offset: prev.offset + offset,
                count: prev.count.min(count),
            },
            None => LimitSpec { offset, count },
        });
        self
    }

    /// Declare a derived column: a named aggregate over explicitly listed
    /// base columns. Standalone (without `group_by`) the composer produces
    /// one summary row for the whole set.
    pub fn aggregate(
        mut self,
        alias: &str,
        function: AggregateFn,
        columns: &[&str],
    ) -> ComposeResult<Self> {
        let base = self.schema.table(&self.table)?;
        for col in columns {
            if !base.has_column(col) {
                return Err(ComposeError::validation(format!(
                    "Cannot aggregate unknown column '{col}'"
                )));
            }
        }
        self.open.aggregates.push(AggregateColumn {
            alias: alias.to_string(),
            function,
            columns: columns.iter().map(|c| (*c).to_string()).collect(),
        });
        Ok(self)
    }

    /// Restrict the projection to the named base columns; unknown names are
    /// dropped. Requested columns union across links.
    pub fn columns(mut self, columns: &[&str]) -> Self {
        if let Some(base) = self.schema.get(&self.table) {
            for col in columns {
                if base.has_column(col) && !self.open.columns.iter().any(|c| c == col) {
                    self.open.columns.push((*col).to_string());
                }
            }
        }
        self
    }

    // ==================== Compilation surface ====================

    /// Compile the chain without executing: the SQL text and its matching
    /// ordered parameter array.
    pub fn to_sql(&self) -> ComposeResult<(String, Vec<Value>)> {
        let compiled = self.compile_select()?;
        Ok((compiled.sql, compiled.params))
    }

    // ==================== Terminals ====================

    /// Execute the compiled query and hydrate the result rows.
    pub async fn end(self, db: &impl Database) -> ComposeResult<Vec<Record>> {
        let compiled = self.compile_select()?;
        #[cfg(feature = "tracing")]
        tracing::debug!(
            sql = %compiled.sql,
            params = compiled.params.len(),
            "executing select"
        );
        let refs = param_refs(&compiled.params);
        let rows = db.query(&compiled.sql, &refs).await?;
        let decoded = rows
            .iter()
            .map(decode_row)
            .collect::<ComposeResult<Vec<_>>>()?;
        hydrate::hydrate_rows(self.schema, &self.table, &compiled.joins, decoded)
    }

    /// Count the rows the chain selects.
    pub async fn count(self, db: &impl Database) -> ComposeResult<i64> {
        let (sql, params) = self.compile_count()?;
        #[cfg(feature = "tracing")]
        tracing::debug!(sql = %sql, params = params.len(), "executing count");
        let refs = param_refs(&params);
        let rows = db.query(&sql, &refs).await?;
        let row = rows
            .first()
            .ok_or_else(|| ComposeError::NotFound("count query returned no row".to_string()))?;
        row.try_get::<_, i64>("count")
            .map_err(|e| ComposeError::decode("count", e.to_string()))
    }

    /// Like [`end`](Composer::end), plus one aggregate-only summary row
    /// computed from a copy of the final link with grouping and ordering
    /// stripped.
    pub async fn summarize(self, db: &impl Database) -> ComposeResult<(Vec<Record>, Record)> {
        let (summary_sql, summary_params) = self.compile_summary()?;
        let compiled = self.compile_select()?;
        #[cfg(feature = "tracing")]
        tracing::debug!(sql = %compiled.sql, summary = %summary_sql, "executing summarize");

        let refs = param_refs(&compiled.params);
        let rows = db.query(&compiled.sql, &refs).await?;
        let decoded = rows
            .iter()
            .map(decode_row)
            .collect::<ComposeResult<Vec<_>>>()?;
        let records = hydrate::hydrate_rows(self.schema, &self.table, &compiled.joins, decoded)?;

        let refs = param_refs(&summary_params);
        let summary_rows = db.query(&summary_sql, &refs).await?;
        let summary_row = summary_rows
            .first()
            .ok_or_else(|| ComposeError::NotFound("summary query returned no row".to_string()))?;
        let decoded = decode_row(summary_row)?;
        let mut summary = Record::new(self.table.clone());
        summary.fields = decoded.columns.into_iter().zip(decoded.values).collect();

        Ok((records, summary))
    }

    /// Update the rows the chain selects, reusing the filter/join chain as a
    /// primary-key subquery, and return the updated records.
    ///
    /// Unknown and primary-key columns are dropped from the SET list; an
    /// empty remainder is an error.
    pub async fn update(
        self,
        fields: &[(&str, Value)],
        db: &impl Database,
    ) -> ComposeResult<Vec<Record>> {
        let base = self.schema.table(&self.table)?;
        let pk = base.primary_key_name().to_string();
        let sets: Vec<(&str, Value)> = fields
            .iter()
            .filter(|(col, _)| base.has_column(col) && *col != pk)
            .map(|(col, v)| (*col, v.clone()))
            .collect();
        if sets.is_empty() {
            return Err(ComposeError::validation(
                "update requires at least one known, non-key column",
            ));
        }

        let mut params = Vec::new();
        let set_sql = render_set_clause(&sets, &mut params);
        let ids_sql = self.compile_row_ids(&mut params)?;
        let sql = generate_update_all_query(&self.table, &set_sql, &pk, &ids_sql);
        #[cfg(feature = "tracing")]
        tracing::debug!(sql = %sql, params = params.len(), "executing update");

        let refs = param_refs(&params);
        let rows = db.query(&sql, &refs).await?;
        let decoded = rows
            .iter()
            .map(decode_row)
            .collect::<ComposeResult<Vec<_>>>()?;
        hydrate::hydrate_rows(self.schema, &self.table, &[], decoded)
    }

    /// Delete the rows the chain selects and return the deleted records.
    pub async fn delete(self, db: &impl Database) -> ComposeResult<Vec<Record>> {
        let pk = self.schema.table(&self.table)?.primary_key_name().to_string();
        let mut params = Vec::new();
        let ids_sql = self.compile_row_ids(&mut params)?;
        let sql = generate_delete_all_query(&self.table, &pk, &ids_sql);
        #[cfg(feature = "tracing")]
        tracing::debug!(sql = %sql, params = params.len(), "executing delete");

        let refs = param_refs(&params);
        let rows = db.query(&sql, &refs).await?;
        let decoded = rows
            .iter()
            .map(decode_row)
            .collect::<ComposeResult<Vec<_>>>()?;
        hydrate::hydrate_rows(self.schema, &self.table, &[], decoded)
    }

    // ==================== Predicate resolution ====================

    fn resolve_base_predicate(
        &self,
        key: &str,
        value: Value,
    ) -> ComposeResult<Option<WhereObject>> {
        let base = self.schema.table(&self.table)?;
        let mut segs: Vec<&str> = key.split("__").collect();
        let comparator = if segs.len() > 1 {
            match Comparator::from_name(segs[segs.len() - 1]) {
                Some(c) => {
                    segs.pop();
                    c
                }
                None => Comparator::Is,
            }
        } else {
            Comparator::Is
        };

        if segs.len() == 1 {
            let column = segs[0];
            if base.has_column(column) {
                return Ok(Some(WhereObject::new(&self.table, column, comparator, value)));
            }
            // Unknown column: the predicate drops out of the compiled WHERE.
            return Ok(None);
        }

        let column = segs[segs.len() - 1];
        let rel_path = segs[..segs.len() - 1].join("__");
        if let Some(jr) = self.registry.iter().find(|j| j.name == rel_path) {
            let joined = self.schema.table(&jr.table)?;
            if joined.has_column(column) {
                let mut w = WhereObject::new(&jr.alias, column, comparator, value);
                w.joins = jr.chain.clone();
                return Ok(Some(w));
            }
            return Ok(None);
        }
        if segs.len() == 2 && base.has_column(segs[0]) {
            // A bare column with an unknown comparator-ish suffix: drop it,
            // same as an unknown comparator.
            return Ok(None);
        }
        Err(ComposeError::unknown_relationship(rel_path))
    }

    fn resolve_local_groups(
        &self,
        groups: &[FilterGroup],
        table: &str,
        alias: &str,
    ) -> ComposeResult<Vec<Vec<WhereObject>>> {
        let joined = self.schema.table(table)?;
        let mut resolved = Vec::new();
        for group in groups {
            let mut predicates = Vec::new();
            for (key, value) in &group.entries {
                let mut segs: Vec<&str> = key.split("__").collect();
                let comparator = if segs.len() > 1 {
                    match Comparator::from_name(segs[segs.len() - 1]) {
                        Some(c) => {
                            segs.pop();
                            c
                        }
                        None => Comparator::Is,
                    }
                } else {
                    Comparator::Is
                };
                if segs.len() != 1 || !joined.has_column(segs[0]) {
                    continue;
                }
                predicates.push(WhereObject::new(alias, segs[0], comparator, value.clone()));
            }
            if !predicates.is_empty() {
                resolved.push(predicates);
            }
        }
        Ok(resolved)
    }
}

fn param_refs(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

/// Insert one record and return it hydrated. Unknown columns are dropped;
/// an empty remainder is an error.
pub async fn insert(
    schema: &Schema,
    table: &str,
    fields: &[(&str, Value)],
    db: &impl Database,
) -> ComposeResult<Record> {
    let t = schema.table(table)?;
    let mut columns = Vec::new();
    let mut values = Vec::new();
    for (col, value) in fields {
        if t.has_column(col) {
            columns.push(*col);
            values.push(value.clone());
        }
    }
    if columns.is_empty() {
        return Err(ComposeError::validation(
            "insert requires at least one known column",
        ));
    }
    let mut params = Vec::new();
    let sql = generate_insert_query(table, &columns, &values, &mut params);
    #[cfg(feature = "tracing")]
    tracing::debug!(sql = %sql, params = params.len(), "executing insert");
    let refs = param_refs(&params);
    let rows = db.query(&sql, &refs).await?;
    let row = rows
        .first()
        .ok_or_else(|| ComposeError::NotFound("insert returned no row".to_string()))?;
    let decoded = decode_row(row)?;
    let mut record = Record::new(table);
    record.fields = decoded.columns.into_iter().zip(decoded.values).collect();
    Ok(record)
}

/// Build a [`FilterGroup`] from `key => value` pairs.
///
/// ```ignore
/// let group = predicates! { "name" => "X", "age__gte" => 10 };
/// ```
#[macro_export]
macro_rules! predicates {
    () => { $crate::FilterGroup::new() };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut group = $crate::FilterGroup::new();
        $(group = group.set($key, $value);)+
        group
    }};
}

#[cfg(test)]
mod tests;
