//! Row hydration.
//!
//! Joined queries come back as flat rows whose joined columns are named
//! `{joinAlias}${column}`. Hydration re-nests those into per-relationship
//! record collections, grouped per base-row primary key, preserving the
//! first-seen row order.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::ComposeResult;
use crate::schema::Schema;
use crate::value::Value;

/// Metadata for one registered relationship join, carried from compilation
/// into hydration.
#[derive(Debug, Clone)]
pub struct JoinMeta {
    /// Relationship path name the join was registered under (`children`,
    /// `children__toys`, ...).
    pub name: String,
    /// SQL alias whose `alias$column` result columns belong to it.
    pub alias: String,
    pub table: String,
    pub multiple: bool,
}

/// A hydrated result row.
///
/// For ungrouped full-row queries this is a record of the base type with
/// joined relations nested under their relationship names; for grouped or
/// aggregate queries it is a plain projection row with no joined entries.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub table: String,
    pub fields: BTreeMap<String, Value>,
    pub joined: BTreeMap<String, Vec<Record>>,
}

impl Record {
    pub(crate) fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            fields: BTreeMap::new(),
            joined: BTreeMap::new(),
        }
    }

    /// A field value by column or projection name.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Records of a joined relationship, if it was part of the query.
    pub fn related(&self, name: &str) -> Option<&[Record]> {
        self.joined.get(name).map(|v| v.as_slice())
    }

    /// Serialize the record, omitting columns hidden by the table's schema.
    /// Joined relations render as arrays under their relationship names.
    pub fn to_json(&self, schema: &Schema) -> serde_json::Value {
        let table = schema.get(&self.table);
        let mut map = serde_json::Map::new();
        for (name, value) in &self.fields {
            if table.is_some_and(|t| t.is_hidden(name)) {
                continue;
            }
            map.insert(
                name.clone(),
                serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
            );
        }
        for (name, records) in &self.joined {
            let rendered: Vec<serde_json::Value> =
                records.iter().map(|r| r.to_json(schema)).collect();
            map.insert(name.clone(), serde_json::Value::Array(rendered));
        }
        serde_json::Value::Object(map)
    }
}

/// A decoded result row: column names paired with values, driver-agnostic.
#[derive(Debug, Clone)]
pub struct DecodedRow {
    pub columns: Vec<String>,
    pub values: Vec<Value>,
}

fn key_of(value: Option<&Value>, fallback: usize) -> String {
    match value {
        Some(v) if !v.is_null() => serde_json::to_string(v).unwrap_or_else(|_| fallback.to_string()),
        _ => format!("__row_{fallback}"),
    }
}

/// Re-nest flat result rows into records.
pub fn hydrate_rows(
    schema: &Schema,
    table: &str,
    joins: &[JoinMeta],
    rows: Vec<DecodedRow>,
) -> ComposeResult<Vec<Record>> {
    if joins.is_empty() {
        // Plain rows: one record per result row, no grouping.
        return Ok(rows
            .into_iter()
            .map(|row| {
                let mut record = Record::new(table);
                record.fields = row.columns.into_iter().zip(row.values).collect();
                record
            })
            .collect());
    }

    let base = schema.table(table)?;
    let pk = base.primary_key_name();

    let mut out: Vec<Record> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut seen: HashSet<(usize, String, String)> = HashSet::new();

    for (row_idx, row) in rows.into_iter().enumerate() {
        let mut fields: BTreeMap<String, Value> = BTreeMap::new();
        let mut per_alias: HashMap<&str, BTreeMap<String, Value>> = HashMap::new();
        for (column, value) in row.columns.iter().zip(row.values.into_iter()) {
            match column.split_once('$') {
                Some((alias, name)) => {
                    // Borrow the alias out of the join metadata so the map key
                    // outlives the row.
                    if let Some(meta) = joins.iter().find(|m| m.alias == alias) {
                        per_alias
                            .entry(meta.alias.as_str())
                            .or_default()
                            .insert(name.to_string(), value);
                    }
                }
                None => {
                    fields.insert(column.clone(), value);
                }
            }
        }

        let key = key_of(fields.get(pk), row_idx);
        let idx = match index.get(&key) {
            Some(&i) => i,
            None => {
                let mut record = Record::new(table);
                record.fields = fields;
                for meta in joins {
                    record.joined.insert(meta.name.clone(), Vec::new());
                }
                out.push(record);
                index.insert(key, out.len() - 1);
                out.len() - 1
            }
        };

        for meta in joins {
            let Some(sub_fields) = per_alias.get(meta.alias.as_str()) else {
                continue;
            };
            if sub_fields.values().all(Value::is_null) {
                // LEFT JOIN miss: the base row simply has no match here.
                continue;
            }
            let sub_pk = schema.table(&meta.table)?.primary_key_name();
            let sub_key = key_of(sub_fields.get(sub_pk), row_idx);
            if !seen.insert((idx, meta.name.clone(), sub_key)) {
                continue;
            }
            let collection = out[idx].joined.entry(meta.name.clone()).or_default();
            if !meta.multiple && !collection.is_empty() {
                continue;
            }
            let mut sub = Record::new(meta.table.clone());
            sub.fields = sub_fields.clone();
            collection.push(sub);
        }
    }

    Ok(out)
}
