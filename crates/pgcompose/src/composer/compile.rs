//! Chain compilation.
//!
//! A composer chain compiles bottom-up: the first link is a base
//! `SELECT ... FROM "table"`, and every later link selects from the previous
//! link's SQL as a subquery aliased back to the base table name. That
//! nesting is what gives `.filter()` calls made after a `.limit()` their
//! scoping: a later filter ranges over the already-limited row set, never
//! the raw table.
//!
//! All links range over base rows. A predicate on a joined relation renders
//! as a correlated EXISTS inside its link, so it excludes base rows at
//! base-row granularity (before that link's limit). When the query is
//! ungrouped and has joins, one outer wrapper adds the LEFT JOINs, projects
//! joined columns as `alias$column`, and re-applies the joined predicates
//! directly so only matching far-side rows hydrate.
//!
//! The parameter vector is the cursor: it threads through every
//! fragment-generating call in output order, so placeholder numbers are
//! globally monotonic and match the flat array one to one.

use crate::dialect::{
    JoinDescriptor, PredicateScope, SelectParts, generate_count_query, generate_select_query,
    render_join, render_order, render_where_groups,
};
use crate::error::ComposeResult;
use crate::ident;
use crate::value::Value;

use super::hydrate::JoinMeta;
use super::{AggregateColumn, Composer, Link, OrderSpec};

/// A fully compiled SELECT with the metadata hydration needs.
pub(crate) struct CompiledSelect {
    pub sql: String,
    pub params: Vec<Value>,
    /// Join metadata for hydration; empty for grouped/aggregate output,
    /// whose rows are plain projections rather than records.
    pub joins: Vec<JoinMeta>,
}

impl Composer<'_> {
    /// The links to compile, oldest first. The open link participates unless
    /// it is inert and sealed links already exist.
    pub(crate) fn active_links(&self) -> Vec<&Link> {
        let mut links: Vec<&Link> = self.sealed.iter().collect();
        if links.is_empty() || !self.open.is_inert() {
            links.push(&self.open);
        }
        links
    }

    pub(crate) fn is_grouped(&self) -> bool {
        self.active_links().iter().any(|l| l.group_by.is_some())
    }

    pub(crate) fn has_aggregates(&self) -> bool {
        self.active_links().iter().any(|l| !l.aggregates.is_empty())
    }

    fn all_aggregates(&self) -> Vec<AggregateColumn> {
        self.active_links()
            .iter()
            .flat_map(|l| l.aggregates.iter().cloned())
            .collect()
    }

    fn all_join_descriptors(&self) -> Vec<JoinDescriptor> {
        self.active_links()
            .iter()
            .flat_map(|l| l.joins.iter().cloned())
            .collect()
    }

    pub(crate) fn join_meta(&self) -> Vec<JoinMeta> {
        self.registry
            .iter()
            .map(|jr| JoinMeta {
                name: jr.name.clone(),
                alias: jr.alias.clone(),
                table: jr.table.clone(),
                multiple: jr.multiple,
            })
            .collect()
    }

    fn render_order_specs(&self, specs: &[OrderSpec]) -> Vec<String> {
        specs
            .iter()
            .map(|o| {
                let table = self.schema.get(&self.table);
                let field = if table.is_some_and(|t| t.has_column(&o.column)) {
                    ident::qualify(&self.table, &o.column)
                } else {
                    // Projection alias (an aggregate column, for instance).
                    ident::quote(&o.column)
                };
                render_order(&field, o.desc)
            })
            .collect()
    }

    fn render_aggregate_column(&self, agg: &AggregateColumn) -> String {
        let fields = agg
            .columns
            .iter()
            .map(|c| ident::qualify(&self.table, c))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{} AS {}", agg.function.render(&fields), ident::quote(&agg.alias))
    }

    /// Projection for the union of requested columns, defaulting to every
    /// base column when no link restricted it.
    fn requested_columns(&self) -> Vec<String> {
        let mut requested: Vec<String> = Vec::new();
        for link in self.active_links() {
            for col in &link.columns {
                if !requested.contains(col) {
                    requested.push(col.clone());
                }
            }
        }
        if requested.is_empty() {
            if let Some(t) = self.schema.get(&self.table) {
                requested = t.columns.iter().map(|c| c.name.clone()).collect();
            }
        }
        requested
    }

    /// Compile the nested link chain over base rows.
    ///
    /// When the chain is grouped the outermost level carries the LEFT JOINs
    /// (group keys may live on join aliases), the GROUP BY clause, and the
    /// grouped projection; every other level projects the full base column
    /// set so filters and ordering keep working at any depth.
    pub(crate) fn compile_chain(
        &self,
        params: &mut Vec<Value>,
        strip_group: bool,
        strip_order: bool,
    ) -> ComposeResult<String> {
        let base = self.schema.table(&self.table)?;
        let base_columns: Vec<String> = base
            .columns
            .iter()
            .map(|c| ident::qualify(&self.table, &c.name))
            .collect();
        let links = self.active_links();
        let grouped = !strip_group && links.iter().any(|l| l.group_by.is_some());

        let mut sql = String::new();
        for (i, link) in links.iter().enumerate() {
            let is_final = i == links.len() - 1;
            let from = if i == 0 {
                ident::quote(&self.table)
            } else {
                format!("({sql})")
            };

            let mut group_refs: Vec<String> = Vec::new();
            let mut joins: &[JoinDescriptor] = &[];
            let all_joins;
            let mut scope = PredicateScope::BaseRows;
            let columns = if is_final && grouped {
                let mut keys: Vec<(String, String)> = Vec::new();
                for l in &links {
                    if let Some(spec) = &l.group_by {
                        keys.extend(spec.refs.iter().cloned());
                    }
                }
                group_refs = keys
                    .iter()
                    .map(|(alias, col)| ident::qualify(alias, col))
                    .collect();

                let mut cols: Vec<String> = keys
                    .iter()
                    .map(|(alias, col)| {
                        format!("{} AS {}", ident::qualify(alias, col), ident::quote(col))
                    })
                    .collect();
                for col in self.requested_columns() {
                    if keys.iter().any(|(alias, key)| alias == &self.table && key == &col) {
                        continue;
                    }
                    let wrapped = base
                        .aggregate_for(&col)
                        .render(&ident::qualify(&self.table, &col));
                    cols.push(format!("{wrapped} AS {}", ident::quote(&col)));
                }
                for agg in self.all_aggregates() {
                    cols.push(self.render_aggregate_column(&agg));
                }

                all_joins = self.all_join_descriptors();
                joins = &all_joins;
                scope = PredicateScope::JoinedRows;
                cols
            } else {
                base_columns.clone()
            };

            let order_by = if is_final && strip_order {
                Vec::new()
            } else {
                self.render_order_specs(&link.order_by)
            };

            let parts = SelectParts {
                from: &from,
                alias: &self.table,
                columns: &columns,
                joins,
                filters: &link.filters,
                scope,
                group_by: &group_refs,
                order_by: &order_by,
                limit: link.limit.map(|l| (l.offset, l.count)),
            };
            sql = generate_select_query(&parts, params);
        }
        Ok(sql)
    }

    /// Compile the full SELECT: the link chain, then the joined wrapper or
    /// the standalone-aggregate projection when one applies.
    pub(crate) fn compile_select(&self) -> ComposeResult<CompiledSelect> {
        let mut params = Vec::new();
        let grouped = self.is_grouped();
        let inner = self.compile_chain(&mut params, false, false)?;

        if grouped {
            return Ok(CompiledSelect {
                sql: inner,
                params,
                joins: Vec::new(),
            });
        }

        if self.has_aggregates() {
            // Standalone aggregate: one summary row over the whole set.
            let columns: Vec<String> = self
                .all_aggregates()
                .iter()
                .map(|a| self.render_aggregate_column(a))
                .collect();
            let sql = format!(
                "SELECT {} FROM ({inner}) AS {}",
                columns.join(", "),
                ident::quote(&self.table)
            );
            return Ok(CompiledSelect {
                sql,
                params,
                joins: Vec::new(),
            });
        }

        let all_joins = self.all_join_descriptors();
        if all_joins.is_empty() {
            return Ok(CompiledSelect {
                sql: inner,
                params,
                joins: Vec::new(),
            });
        }

        // Joined wrapper: base columns pass through, joined columns project
        // as alias$column, and joined predicates re-apply directly so only
        // matching far-side rows hydrate.
        let base = self.schema.table(&self.table)?;
        let mut columns: Vec<String> = base
            .columns
            .iter()
            .map(|c| ident::qualify(&self.table, &c.name))
            .collect();
        for jr in &self.registry {
            let joined = self.schema.table(&jr.table)?;
            for c in &joined.columns {
                columns.push(format!(
                    "{} AS {}",
                    ident::qualify(&jr.alias, &c.name),
                    ident::quote(&format!("{}${}", jr.alias, c.name))
                ));
            }
        }

        let mut sql = format!(
            "SELECT {} FROM ({inner}) AS {}",
            columns.join(", "),
            ident::quote(&self.table)
        );
        for j in &all_joins {
            sql.push(' ');
            sql.push_str(&render_join(j, &mut params));
        }

        let mut where_parts: Vec<String> = Vec::new();
        for link in self.active_links() {
            if !link.filters.iter().any(|g| g.iter().any(|w| w.joined())) {
                continue;
            }
            let part = render_where_groups(&link.filters, PredicateScope::JoinedRows, &mut params);
            if part.is_empty() {
                continue;
            }
            if link.filters.iter().filter(|g| !g.is_empty()).count() > 1 {
                where_parts.push(format!("({part})"));
            } else {
                where_parts.push(part);
            }
        }
        if !where_parts.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&where_parts.join(" AND "));
        }

        // Re-emit the effective ordering so the joined row order stays
        // deterministic after the join multiplies rows.
        let order = self
            .active_links()
            .iter()
            .rev()
            .find(|l| !l.order_by.is_empty())
            .map(|l| self.render_order_specs(&l.order_by))
            .unwrap_or_default();
        if !order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order.join(", "));
        }

        Ok(CompiledSelect {
            sql,
            params,
            joins: self.join_meta(),
        })
    }

    /// Compile `SELECT COUNT(*)` over the chain as a subquery.
    pub(crate) fn compile_count(&self) -> ComposeResult<(String, Vec<Value>)> {
        let mut params = Vec::new();
        let inner = self.compile_chain(&mut params, false, true)?;
        Ok((generate_count_query(&inner), params))
    }

    /// Compile the one-row summary used by `summarize`: the chain with the
    /// final link's grouping and ordering stripped, projected through the
    /// declared aggregates (a bare row count when none are declared).
    pub(crate) fn compile_summary(&self) -> ComposeResult<(String, Vec<Value>)> {
        let mut params = Vec::new();
        let inner = self.compile_chain(&mut params, true, true)?;
        let aggregates = self.all_aggregates();
        let columns: Vec<String> = if aggregates.is_empty() {
            vec![format!("COUNT(*) AS {}", ident::quote("count"))]
        } else {
            aggregates
                .iter()
                .map(|a| self.render_aggregate_column(a))
                .collect()
        };
        let sql = format!(
            "SELECT {} FROM ({inner}) AS {}",
            columns.join(", "),
            ident::quote(&self.table)
        );
        Ok((sql, params))
    }

    /// Compile the chain as a primary-key subquery for UPDATE/DELETE.
    pub(crate) fn compile_row_ids(&self, params: &mut Vec<Value>) -> ComposeResult<String> {
        let inner = self.compile_chain(params, true, true)?;
        let pk = self.schema.table(&self.table)?.primary_key_name();
        Ok(format!(
            "SELECT {} FROM ({inner}) AS {}",
            ident::qualify(&self.table, pk),
            ident::quote(&self.table)
        ))
    }
}
