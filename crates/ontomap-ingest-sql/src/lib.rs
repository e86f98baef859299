//! SQL schema discovery for ontomap.
//!
//! Extracts a field inventory from SQL DDL:
//! - table columns -> `FieldDescriptor`s (declared type preserved)
//! - NOT NULL / primary-key structure -> `sample_hint` notes
//!
//! This is an input adapter: it feeds the mapping engine, it does not
//! decide anything.

use anyhow::Result;
use ontomap_engine::FieldDescriptor;
use sqlparser::ast::{ColumnOption, Statement, TableConstraint};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

/// Parse SQL DDL and produce one descriptor per column.
///
/// Tables appear in statement order and columns in declaration order, so
/// the inventory is stable for identical input.
pub fn parse_sql_inventory(source_id: &str, sql: &str) -> Result<Vec<FieldDescriptor>> {
    let dialect = GenericDialect {};
    let statements = Parser::parse_sql(&dialect, sql)?;

    let mut inventory = Vec::new();

    for stmt in statements {
        if let Statement::CreateTable {
            name,
            columns,
            constraints,
            ..
        } = stmt
        {
            let table_name = name.to_string();

            // Table-level primary key columns.
            let mut pk_columns: Vec<String> = Vec::new();
            for constraint in &constraints {
                if let TableConstraint::Unique {
                    columns: uq_cols,
                    is_primary: true,
                    ..
                } = constraint
                {
                    pk_columns = uq_cols.iter().map(|c| c.to_string()).collect();
                }
            }

            for col in &columns {
                let column_name = col.name.to_string();
                let mut not_null = false;
                let mut primary = pk_columns.contains(&column_name);

                for opt in &col.options {
                    match &opt.option {
                        ColumnOption::NotNull => not_null = true,
                        ColumnOption::Unique { is_primary: true, .. } => primary = true,
                        _ => {}
                    }
                }

                let sample_hint = if primary {
                    Some("primary key".to_string())
                } else if not_null {
                    Some("not null".to_string())
                } else {
                    None
                };

                let mut descriptor =
                    FieldDescriptor::new(source_id, table_name.as_str(), column_name.as_str())
                        .with_declared_type(col.data_type.to_string());
                if let Some(hint) = sample_hint {
                    descriptor = descriptor.with_sample_hint(hint);
                }
                inventory.push(descriptor);
            }
        }
    }

    Ok(inventory)
}
