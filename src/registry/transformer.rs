//! Row <-> portable record conversion
//!
//! A portable record is a flat JSON object identified by `public_id`, with
//! every foreign key expressed as the referenced row's public id. Internal
//! row ids never leave the database.

use std::collections::HashSet;

use rusqlite::Connection;
use serde_json::Value;

use super::entity::{EntitySpec, EntityType, Owner};
use crate::backup::IdMapping;
use crate::error::{VaultError, VaultResult};
use crate::models::Tenant;
use crate::storage::rows::{row_to_map, Row};

/// A portable record translated for the target database
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRow {
    /// Public id the record carried in the archive
    pub public_id: String,
    /// Column values ready for insert or update (no `id`, no `public_id`)
    pub fields: Row,
    /// Archive fields the current schema has no column for
    pub dropped: Vec<String>,
}

/// Reads and converts the rows of one entity type
pub trait Transformer {
    fn entity_type(&self) -> EntityType;

    /// Stream every row of the tenant through `visit`, returning the count.
    ///
    /// Rows arrive with each foreign key already resolved to the referenced
    /// row's public id under the key's portable field name.
    fn query(
        &self,
        conn: &Connection,
        tenant: &Tenant,
        visit: &mut dyn FnMut(Row) -> VaultResult<()>,
    ) -> VaultResult<u64>;

    /// Strip storage-only columns from a queried row
    fn to_portable(&self, row: Row) -> VaultResult<Row>;

    /// Translate an archived record into column values for `tenant_row_id`
    fn from_portable(
        &self,
        record: Row,
        mapping: &IdMapping,
        columns: &HashSet<String>,
        tenant_row_id: i64,
    ) -> VaultResult<ImportRow>;
}

/// Transformer driven entirely by the static entity table
pub struct TableTransformer {
    spec: &'static EntitySpec,
}

impl TableTransformer {
    pub fn new(entity_type: EntityType) -> Self {
        Self {
            spec: entity_type.spec(),
        }
    }

    fn select_sql(&self) -> String {
        let mut select = vec!["t.*".to_string()];
        for key in self.spec.foreign_keys {
            select.push(format!(
                "(SELECT r.public_id FROM \"{}\" r WHERE r.id = t.\"{}\") AS \"{}\"",
                key.references.table(),
                key.column,
                key.field
            ));
        }
        format!(
            "SELECT {} FROM \"{}\" t WHERE {} ORDER BY t.id",
            select.join(", "),
            self.spec.entity_type.table(),
            self.spec.tenant_scope("t")
        )
    }
}

impl Transformer for TableTransformer {
    fn entity_type(&self) -> EntityType {
        self.spec.entity_type
    }

    fn query(
        &self,
        conn: &Connection,
        tenant: &Tenant,
        visit: &mut dyn FnMut(Row) -> VaultResult<()>,
    ) -> VaultResult<u64> {
        let mut stmt = conn.prepare(&self.select_sql())?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let mut rows = stmt.query([tenant.row_id])?;

        let mut count = 0u64;
        while let Some(row) = rows.next()? {
            visit(row_to_map(row, &columns)?)?;
            count += 1;
        }
        Ok(count)
    }

    fn to_portable(&self, mut row: Row) -> VaultResult<Row> {
        row.remove("id");
        row.remove("tenant_id");
        for key in self.spec.foreign_keys {
            row.remove(key.column);
        }

        match row.get("public_id") {
            Some(Value::String(id)) if !id.is_empty() => Ok(row),
            _ => Err(VaultError::Export(format!(
                "{} row without a public_id",
                self.spec.entity_type
            ))),
        }
    }

    fn from_portable(
        &self,
        mut record: Row,
        mapping: &IdMapping,
        columns: &HashSet<String>,
        tenant_row_id: i64,
    ) -> VaultResult<ImportRow> {
        let entity = self.spec.entity_type;
        let public_id = match record.remove("public_id") {
            Some(Value::String(id)) if !id.is_empty() => id,
            _ => return Err(VaultError::record(entity.as_str(), "record has no public_id")),
        };
        record.remove("id");
        record.remove("tenant_id");

        let mut fields = Row::new();
        for key in self.spec.foreign_keys {
            // Raw internal ids from another database are never trusted
            record.remove(key.column);
            let reference = record.remove(key.field);
            let resolved = match reference.as_ref().and_then(Value::as_str) {
                Some(target) => mapping.get(key.references, target),
                None => None,
            };

            match resolved {
                Some(id) => {
                    fields.insert(key.column.to_string(), Value::from(id));
                }
                None if key.required => {
                    return Err(VaultError::record(
                        entity.as_str(),
                        format!(
                            "{} {}: unresolved {} reference {}",
                            entity,
                            public_id,
                            key.references,
                            reference.unwrap_or(Value::Null)
                        ),
                    ));
                }
                None => {
                    fields.insert(key.column.to_string(), Value::Null);
                }
            }
        }

        if self.spec.owner == Owner::Tenant {
            fields.insert("tenant_id".to_string(), Value::from(tenant_row_id));
        }

        let mut dropped = Vec::new();
        for (name, value) in record {
            if columns.contains(&name) {
                fields.insert(name, value);
            } else {
                dropped.push(name);
            }
        }

        Ok(ImportRow {
            public_id,
            fields,
            dropped,
        })
    }
}
