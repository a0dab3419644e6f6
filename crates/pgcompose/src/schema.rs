//! Record schema metadata.
//!
//! The engine is schema-driven at runtime: collaborators register one
//! [`TableSchema`] per record type at startup, and the [`Schema`] registry is
//! read-only thereafter. Exactly the columns declared here are addressable by
//! filters and joins against a table.

use std::collections::{BTreeMap, BTreeSet};

use crate::dialect::AggregateFn;
use crate::error::{ComposeError, ComposeResult};
use crate::ident;
use crate::value::Value;

/// Postgres column-type vocabulary shared by DDL generation and row decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    Serial,
    BigSerial,
    SmallInt,
    Int,
    BigInt,
    Real,
    Double,
    Text,
    Varchar(u32),
    Boolean,
    Timestamp,
    Date,
    Json,
    Uuid,
    Bytea,
}

impl DataType {
    /// The SQL type name used in DDL.
    pub fn sql_name(&self) -> String {
        match self {
            DataType::Serial => "serial".to_string(),
            DataType::BigSerial => "bigserial".to_string(),
            DataType::SmallInt => "smallint".to_string(),
            DataType::Int => "integer".to_string(),
            DataType::BigInt => "bigint".to_string(),
            DataType::Real => "real".to_string(),
            DataType::Double => "double precision".to_string(),
            DataType::Text => "text".to_string(),
            DataType::Varchar(len) => format!("varchar({len})"),
            DataType::Boolean => "boolean".to_string(),
            DataType::Timestamp => "timestamptz".to_string(),
            DataType::Date => "date".to_string(),
            DataType::Json => "jsonb".to_string(),
            DataType::Uuid => "uuid".to_string(),
            DataType::Bytea => "bytea".to_string(),
        }
    }

    /// Whether this type implies a backing sequence.
    pub fn is_serial(&self) -> bool {
        matches!(self, DataType::Serial | DataType::BigSerial)
    }
}

/// Declared metadata for one table column.
#[derive(Debug, Clone)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub is_array: bool,
    pub auto_increment: bool,
    pub default_value: Option<Value>,
}

impl ColumnSchema {
    /// A nullable, non-key column of the given type.
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            primary_key: false,
            unique: false,
            is_array: false,
            auto_increment: false,
            default_value: None,
        }
    }

    /// The conventional auto-incrementing `id` primary key.
    pub fn id() -> Self {
        Self {
            name: "id".to_string(),
            data_type: DataType::BigSerial,
            nullable: false,
            primary_key: true,
            unique: true,
            is_array: false,
            auto_increment: true,
            default_value: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn array(mut self) -> Self {
        self.is_array = true;
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default_value = Some(value.into());
        self
    }
}

/// Declared metadata for one table: columns, output visibility, and
/// per-column default aggregates used when a grouped query selects a column
/// outside its group key.
#[derive(Debug, Clone)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnSchema>,
    hidden: BTreeSet<String>,
    default_aggregates: BTreeMap<String, AggregateFn>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, columns: Vec<ColumnSchema>) -> ComposeResult<Self> {
        let name = name.into();
        ident::ensure_valid(&name)?;
        for col in &columns {
            ident::ensure_valid(&col.name)?;
        }
        Ok(Self {
            name,
            columns,
            hidden: BTreeSet::new(),
            default_aggregates: BTreeMap::new(),
        })
    }

    /// Hide columns from serialized output. Hidden columns stay addressable
    /// by filters and joins; they are only dropped when a record renders.
    pub fn hide(mut self, columns: &[&str]) -> Self {
        for c in columns {
            self.hidden.insert((*c).to_string());
        }
        self
    }

    /// Declare the default aggregate applied to a column when a grouped
    /// query selects it outside the group key.
    pub fn default_aggregate(mut self, column: &str, func: AggregateFn) -> Self {
        self.default_aggregates.insert(column.to_string(), func);
        self
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Name of the primary-key column; falls back to `id` when none is
    /// flagged.
    pub fn primary_key_name(&self) -> &str {
        self.columns
            .iter()
            .find(|c| c.primary_key)
            .map(|c| c.name.as_str())
            .unwrap_or("id")
    }

    pub fn is_hidden(&self, column: &str) -> bool {
        self.hidden.contains(column)
    }

    /// Columns exposed in serialized output, in declaration order.
    pub fn visible_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| !self.hidden.contains(&c.name))
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Resolved default aggregate for a column (the `none` aggregate when
    /// undeclared).
    pub fn aggregate_for(&self, column: &str) -> AggregateFn {
        self.default_aggregates
            .get(column)
            .cloned()
            .unwrap_or(AggregateFn::None)
    }
}

/// Process-wide registry of table schemas; built once at startup, read-only
/// thereafter.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    tables: BTreeMap<String, TableSchema>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&mut self, table: TableSchema) {
        self.tables.insert(table.name.clone(), table);
    }

    pub fn get(&self, name: &str) -> Option<&TableSchema> {
        self.tables.get(name)
    }

    /// Look up a table, erroring when it is not registered.
    pub fn table(&self, name: &str) -> ComposeResult<&TableSchema> {
        self.tables
            .get(name)
            .ok_or_else(|| ComposeError::UnknownTable(name.to_string()))
    }
}
