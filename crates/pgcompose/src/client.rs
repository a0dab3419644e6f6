//! The Database execution port.
//!
//! The engine never opens connections or manages pooling: terminal calls
//! hand one compiled SQL statement plus its parameter array to this trait
//! and wait for rows or an error. Retry and timeout policy live behind the
//! port, not here — execution errors surface verbatim.

use tokio_postgres::Row;
use tokio_postgres::types::{ToSql, Type};

use crate::composer::DecodedRow;
use crate::error::{ComposeError, ComposeResult};
use crate::value::Value;

/// A unified execution surface over clients and transactions.
pub trait Database: Send + Sync {
    /// Execute a query and return all rows.
    fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = ComposeResult<Vec<Row>>> + Send;

    /// Execute a statement and return the affected-row count.
    fn execute(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> impl std::future::Future<Output = ComposeResult<u64>> + Send;
}

impl Database for tokio_postgres::Client {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> ComposeResult<Vec<Row>> {
        tokio_postgres::Client::query(self, sql, params)
            .await
            .map_err(ComposeError::from)
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> ComposeResult<u64> {
        tokio_postgres::Client::execute(self, sql, params)
            .await
            .map_err(ComposeError::from)
    }
}

impl Database for tokio_postgres::Transaction<'_> {
    async fn query(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> ComposeResult<Vec<Row>> {
        tokio_postgres::Transaction::query(self, sql, params)
            .await
            .map_err(ComposeError::from)
    }

    async fn execute(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> ComposeResult<u64> {
        tokio_postgres::Transaction::execute(self, sql, params)
            .await
            .map_err(ComposeError::from)
    }
}

fn get<'r, T>(row: &'r Row, idx: usize, name: &str) -> ComposeResult<Option<T>>
where
    T: tokio_postgres::types::FromSql<'r>,
{
    row.try_get::<_, Option<T>>(idx)
        .map_err(|e| ComposeError::decode(name, e.to_string()))
}

fn decode_value(row: &Row, idx: usize, name: &str, ty: &Type) -> ComposeResult<Value> {
    let value = if *ty == Type::BOOL {
        get::<bool>(row, idx, name)?.map(Value::Bool)
    } else if *ty == Type::INT2 {
        get::<i16>(row, idx, name)?.map(|v| Value::Int(v as i64))
    } else if *ty == Type::INT4 {
        get::<i32>(row, idx, name)?.map(|v| Value::Int(v as i64))
    } else if *ty == Type::INT8 {
        get::<i64>(row, idx, name)?.map(Value::Int)
    } else if *ty == Type::FLOAT4 {
        get::<f32>(row, idx, name)?.map(|v| Value::Float(v as f64))
    } else if *ty == Type::FLOAT8 {
        get::<f64>(row, idx, name)?.map(Value::Float)
    } else if *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
    {
        get::<String>(row, idx, name)?.map(Value::Text)
    } else if *ty == Type::TIMESTAMPTZ {
        get::<chrono::DateTime<chrono::Utc>>(row, idx, name)?.map(Value::Timestamp)
    } else if *ty == Type::TIMESTAMP {
        get::<chrono::NaiveDateTime>(row, idx, name)?.map(|v| Value::Timestamp(v.and_utc()))
    } else if *ty == Type::DATE {
        get::<chrono::NaiveDate>(row, idx, name)?.map(Value::Date)
    } else if *ty == Type::UUID {
        get::<uuid::Uuid>(row, idx, name)?.map(Value::Uuid)
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        get::<serde_json::Value>(row, idx, name)?.map(Value::Json)
    } else if *ty == Type::BYTEA {
        get::<Vec<u8>>(row, idx, name)?.map(Value::Bytes)
    } else if *ty == Type::BOOL_ARRAY {
        get::<Vec<bool>>(row, idx, name)?
            .map(|v| Value::Array(v.into_iter().map(Value::Bool).collect()))
    } else if *ty == Type::INT4_ARRAY {
        get::<Vec<i32>>(row, idx, name)?
            .map(|v| Value::Array(v.into_iter().map(|n| Value::Int(n as i64)).collect()))
    } else if *ty == Type::INT8_ARRAY {
        get::<Vec<i64>>(row, idx, name)?
            .map(|v| Value::Array(v.into_iter().map(Value::Int).collect()))
    } else if *ty == Type::FLOAT8_ARRAY {
        get::<Vec<f64>>(row, idx, name)?
            .map(|v| Value::Array(v.into_iter().map(Value::Float).collect()))
    } else if *ty == Type::TEXT_ARRAY || *ty == Type::VARCHAR_ARRAY {
        get::<Vec<String>>(row, idx, name)?
            .map(|v| Value::Array(v.into_iter().map(Value::Text).collect()))
    } else if *ty == Type::UUID_ARRAY {
        get::<Vec<uuid::Uuid>>(row, idx, name)?
            .map(|v| Value::Array(v.into_iter().map(Value::Uuid).collect()))
    } else {
        return Err(ComposeError::decode(
            name,
            format!("unsupported column type '{ty}'"),
        ));
    };
    Ok(value.unwrap_or(Value::Null))
}

/// Decode one driver row into column names and dynamic values.
pub(crate) fn decode_row(row: &Row) -> ComposeResult<DecodedRow> {
    let mut columns = Vec::with_capacity(row.columns().len());
    let mut values = Vec::with_capacity(row.columns().len());
    for (idx, column) in row.columns().iter().enumerate() {
        columns.push(column.name().to_string());
        values.push(decode_value(row, idx, column.name(), column.type_())?);
    }
    Ok(DecodedRow { columns, values })
}
