//! Postgres DDL generation.
//!
//! Schema statements generated from the same [`DataType`] vocabulary the
//! query compiler uses. Statement *execution* (the migration subsystem) is a
//! separate concern; these functions only produce text.

use crate::ident;
use crate::schema::{ColumnSchema, DataType, TableSchema};
use crate::value::Value;

/// Render a value as a SQL literal for a DEFAULT clause.
///
/// DDL statements take no parameter array, so defaults are the one place a
/// value enters statement text; strings escape `'` by doubling.
fn quote_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        Value::Timestamp(t) => format!("'{}'", t.to_rfc3339()),
        Value::Date(d) => format!("'{d}'"),
        Value::Uuid(u) => format!("'{u}'"),
        Value::Json(j) => format!("'{}'", j.to_string().replace('\'', "''")),
        Value::Bytes(_) | Value::Array(_) => "NULL".to_string(),
    }
}

/// Render one column definition.
pub fn generate_column_definition(column: &ColumnSchema) -> String {
    let data_type = if column.auto_increment && !column.data_type.is_serial() {
        match column.data_type {
            DataType::BigInt => DataType::BigSerial.sql_name(),
            _ => DataType::Serial.sql_name(),
        }
    } else {
        column.data_type.sql_name()
    };
    let mut sql = format!("{} {data_type}", ident::quote(&column.name));
    if column.is_array {
        sql.push_str("[]");
    }
    if !column.nullable {
        sql.push_str(" NOT NULL");
    }
    if column.unique && !column.primary_key {
        sql.push_str(" UNIQUE");
    }
    if let Some(default) = &column.default_value {
        sql.push_str(" DEFAULT ");
        sql.push_str(&quote_literal(default));
    }
    sql
}

pub fn generate_create_table_query(table: &TableSchema) -> String {
    let mut defs: Vec<String> = table.columns.iter().map(generate_column_definition).collect();
    let pk_cols: Vec<String> = table
        .columns
        .iter()
        .filter(|c| c.primary_key)
        .map(|c| ident::quote(&c.name))
        .collect();
    if !pk_cols.is_empty() {
        defs.push(format!("PRIMARY KEY ({})", pk_cols.join(", ")));
    }
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        ident::quote(&table.name),
        defs.join(", ")
    )
}

pub fn generate_drop_table_query(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {}", ident::quote(table))
}

pub fn generate_add_column_query(table: &str, column: &ColumnSchema) -> String {
    format!(
        "ALTER TABLE {} ADD COLUMN {}",
        ident::quote(table),
        generate_column_definition(column)
    )
}

pub fn generate_drop_column_query(table: &str, column: &str) -> String {
    format!(
        "ALTER TABLE {} DROP COLUMN {}",
        ident::quote(table),
        ident::quote(column)
    )
}

pub fn generate_alter_column_query(table: &str, column: &ColumnSchema) -> String {
    let mut sql = format!(
        "ALTER TABLE {} ALTER COLUMN {} TYPE {}",
        ident::quote(table),
        ident::quote(&column.name),
        column.data_type.sql_name()
    );
    if column.is_array {
        sql.push_str("[]");
    }
    sql.push_str(&format!(
        ", ALTER COLUMN {} {}",
        ident::quote(&column.name),
        if column.nullable {
            "DROP NOT NULL"
        } else {
            "SET NOT NULL"
        }
    ));
    sql
}

pub fn generate_create_index_query(table: &str, column: &str, unique: bool) -> String {
    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if unique { "UNIQUE " } else { "" },
        ident::quote(&format!("{table}_{column}_idx")),
        ident::quote(table),
        ident::quote(column)
    )
}

pub fn generate_drop_index_query(table: &str, column: &str) -> String {
    format!(
        "DROP INDEX IF EXISTS {}",
        ident::quote(&format!("{table}_{column}_idx"))
    )
}

pub fn generate_create_sequence_query(table: &str, column: &str) -> String {
    format!(
        "CREATE SEQUENCE IF NOT EXISTS {}",
        ident::quote(&format!("{table}_{column}_seq"))
    )
}

pub fn generate_drop_sequence_query(table: &str, column: &str) -> String {
    format!(
        "DROP SEQUENCE IF EXISTS {}",
        ident::quote(&format!("{table}_{column}_seq"))
    )
}

pub fn generate_foreign_key_query(
    table: &str,
    column: &str,
    ref_table: &str,
    ref_column: &str,
) -> String {
    format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({})",
        ident::quote(table),
        ident::quote(&format!("{table}_{column}_fkey")),
        ident::quote(column),
        ident::quote(ref_table),
        ident::quote(ref_column)
    )
}
