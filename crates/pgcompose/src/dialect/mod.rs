//! SQL dialect layer.
//!
//! This module owns the comparator/aggregate vocabulary and the shared
//! fragment structures the Composer resolves into; `postgres` renders them
//! to parameterized SQL text and `ddl` generates schema statements from the
//! same type vocabulary.
//!
//! Everything here is pure and stateless aside from the static vocabulary
//! tables: a fragment plus a threaded parameter cursor in, SQL text out.

mod postgres;

pub mod ddl;

pub use postgres::{
    PredicateScope, SelectParts, generate_count_query, generate_delete_all_query,
    generate_insert_query, generate_select_query, generate_update_all_query, render_join,
    render_order, render_set_clause, render_where_groups,
};

use crate::value::Value;

/// A named predicate operator, mapped to a SQL template.
///
/// Comparators are the only spellings a filter key may end with; an unknown
/// trailing segment is not a comparator (see the Composer's permissive
/// filter policy).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    Is,
    Not,
    Lt,
    Lte,
    Gt,
    Gte,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Like,
    ILike,
    IsNull,
    NotNull,
    In,
    NotIn,
    Json,
    JsonContains,
}

impl Comparator {
    /// Resolve a comparator name; `None` for unknown names.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "is" => Comparator::Is,
            "not" => Comparator::Not,
            "lt" => Comparator::Lt,
            "lte" => Comparator::Lte,
            "gt" => Comparator::Gt,
            "gte" => Comparator::Gte,
            "contains" => Comparator::Contains,
            "icontains" => Comparator::IContains,
            "startswith" => Comparator::StartsWith,
            "istartswith" => Comparator::IStartsWith,
            "endswith" => Comparator::EndsWith,
            "iendswith" => Comparator::IEndsWith,
            "like" => Comparator::Like,
            "ilike" => Comparator::ILike,
            "is_null" => Comparator::IsNull,
            "not_null" => Comparator::NotNull,
            "in" => Comparator::In,
            "not_in" => Comparator::NotIn,
            "json" => Comparator::Json,
            "jsoncontains" => Comparator::JsonContains,
            _ => return None,
        })
    }

    /// Whether this comparator binds a positional parameter.
    ///
    /// `is_null`/`not_null` occupy a slot in the WHERE text but contribute
    /// nothing to the parameter array.
    pub fn takes_value(&self) -> bool {
        !matches!(self, Comparator::IsNull | Comparator::NotNull)
    }

    /// Render the predicate for an already-quoted field reference.
    ///
    /// `placeholder` is the 1-based parameter index; ignored by value-less
    /// comparators.
    pub fn render(&self, field: &str, placeholder: usize) -> String {
        match self {
            Comparator::Is => format!("{field} = ${placeholder}"),
            Comparator::Not => format!("{field} <> ${placeholder}"),
            Comparator::Lt => format!("{field} < ${placeholder}"),
            Comparator::Lte => format!("{field} <= ${placeholder}"),
            Comparator::Gt => format!("{field} > ${placeholder}"),
            Comparator::Gte => format!("{field} >= ${placeholder}"),
            Comparator::Contains => format!("{field} LIKE '%' || ${placeholder} || '%'"),
            Comparator::IContains => format!("{field} ILIKE '%' || ${placeholder} || '%'"),
            Comparator::StartsWith => format!("{field} LIKE ${placeholder} || '%'"),
            Comparator::IStartsWith => format!("{field} ILIKE ${placeholder} || '%'"),
            Comparator::EndsWith => format!("{field} LIKE '%' || ${placeholder}"),
            Comparator::IEndsWith => format!("{field} ILIKE '%' || ${placeholder}"),
            Comparator::Like => format!("{field} LIKE ${placeholder}"),
            Comparator::ILike => format!("{field} ILIKE ${placeholder}"),
            Comparator::IsNull => format!("{field} IS NULL"),
            Comparator::NotNull => format!("{field} IS NOT NULL"),
            Comparator::In => format!("{field} = ANY(${placeholder})"),
            Comparator::NotIn => format!("{field} <> ALL(${placeholder})"),
            Comparator::Json => format!("{field}::jsonb = ${placeholder}::jsonb"),
            Comparator::JsonContains => format!("{field} @> ${placeholder}::jsonb"),
        }
    }
}

/// A named SQL aggregate function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFn {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Distinct,
    MinDate,
    MaxDate,
    CountTrue,
    /// Selected-but-unaggregated fallback for grouped queries: renders a
    /// literal NULL instead of emitting invalid SQL.
    None,
}

impl AggregateFn {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "sum" => AggregateFn::Sum,
            "avg" => AggregateFn::Avg,
            "min" => AggregateFn::Min,
            "max" => AggregateFn::Max,
            "count" => AggregateFn::Count,
            "distinct" => AggregateFn::Distinct,
            "min_date" => AggregateFn::MinDate,
            "max_date" => AggregateFn::MaxDate,
            "count_true" => AggregateFn::CountTrue,
            "none" => AggregateFn::None,
            _ => return None,
        })
    }

    /// Wrap an already-quoted field reference.
    pub fn render(&self, field: &str) -> String {
        match self {
            AggregateFn::Sum => format!("SUM({field})"),
            AggregateFn::Avg => format!("AVG({field})"),
            AggregateFn::Min => format!("MIN({field})"),
            AggregateFn::Max => format!("MAX({field})"),
            AggregateFn::Count => format!("COUNT({field})"),
            AggregateFn::Distinct => format!("DISTINCT({field})"),
            AggregateFn::MinDate => format!("MIN(DATE_TRUNC('day', {field}))"),
            AggregateFn::MaxDate => format!("MAX(DATE_TRUNC('day', {field}))"),
            AggregateFn::CountTrue => format!("COUNT(CASE WHEN {field} THEN 1 ELSE NULL END)"),
            AggregateFn::None => "NULL".to_string(),
        }
    }
}

/// One resolved filter predicate.
///
/// `alias` names the table alias the column lives on — the base alias for
/// plain predicates, the terminal join alias for joined ones. A non-empty
/// `joins` chain marks a joined predicate; how it renders depends on the
/// [`PredicateScope`] of the enclosing clause.
#[derive(Debug, Clone)]
pub struct WhereObject {
    pub alias: String,
    pub column: String,
    pub comparator: Comparator,
    pub value: Value,
    pub joins: Vec<JoinDescriptor>,
}

impl WhereObject {
    pub fn new(alias: impl Into<String>, column: impl Into<String>, comparator: Comparator, value: Value) -> Self {
        Self {
            alias: alias.into(),
            column: column.into(),
            comparator,
            value,
            joins: Vec::new(),
        }
    }

    /// Whether this predicate targets a joined relation.
    pub fn joined(&self) -> bool {
        !self.joins.is_empty()
    }
}

/// One resolved join hop, ready for SQL emission.
#[derive(Debug, Clone)]
pub struct JoinDescriptor {
    /// Physical table being joined.
    pub table: String,
    /// Unique per-hop alias (`{table}__j{n}`), so the same physical table can
    /// appear repeatedly in one query without collision.
    pub alias: String,
    /// Join column on the joined table.
    pub column: String,
    /// Alias on the near side of the hop.
    pub from_alias: String,
    /// Column on the near side of the hop.
    pub from_column: String,
    /// One-to-many in the traversal direction.
    pub multiple: bool,
    /// Join-local filters, rendered inside the ON clause.
    pub filters: Vec<Vec<WhereObject>>,
}
