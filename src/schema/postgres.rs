//! Postgres DDL rendering.

use crate::schema::{ColumnType, DdlError, DdlGenerator, ForeignKey, Table, UniqueConstraint};

/// Renders [`Table`] metadata as Postgres DDL.
pub struct PostgresDdl;

fn sql_type(ty: ColumnType) -> &'static str {
    match ty {
        ColumnType::Boolean => "boolean",
        ColumnType::SmallInt => "smallint",
        ColumnType::Integer => "integer",
        ColumnType::BigInt => "bigint",
        ColumnType::Float => "real",
        ColumnType::Double => "double precision",
        ColumnType::Text => "text",
        ColumnType::Bytes => "bytea",
        ColumnType::Uuid => "uuid",
        ColumnType::Date => "date",
        ColumnType::Time => "time",
        ColumnType::DateTime => "timestamp",
        ColumnType::TimestampTz => "timestamptz",
        ColumnType::Decimal => "numeric",
        ColumnType::Json => "jsonb",
    }
}

fn quoted(columns: &[String]) -> String {
    columns
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ")
}

impl DdlGenerator for PostgresDdl {
    fn create_table(&self, table: &Table) -> Result<String, DdlError> {
        if table.columns().is_empty() {
            return Err(DdlError::Invalid(format!(
                "table {} has no columns",
                table.name()
            )));
        }
        let mut parts: Vec<String> = table
            .columns()
            .iter()
            .map(|column| {
                format!(
                    "\"{}\" {}{}",
                    column.name,
                    sql_type(column.ty),
                    if column.nullable { "" } else { " NOT NULL" }
                )
            })
            .collect();
        if let Some(pk) = table.primary_key() {
            parts.push(format!("PRIMARY KEY ({})", quoted(&pk.columns)));
        }
        Ok(format!(
            "CREATE TABLE \"{}\" ({})",
            table.name(),
            parts.join(", ")
        ))
    }

    fn create_unique_constraint(
        &self,
        table: &Table,
        constraint: &UniqueConstraint,
    ) -> Result<String, DdlError> {
        Ok(format!(
            "ALTER TABLE \"{}\" ADD CONSTRAINT \"{}\" UNIQUE ({})",
            table.name(),
            constraint.name,
            quoted(&constraint.columns)
        ))
    }

    fn create_foreign_key(&self, table: &Table, fk: &ForeignKey) -> Result<String, DdlError> {
        Ok(format!(
            "ALTER TABLE \"{}\" ADD CONSTRAINT \"{}\" FOREIGN KEY ({}) REFERENCES \"{}\" ({})",
            table.name(),
            fk.name,
            quoted(&fk.columns),
            fk.referenced_table,
            quoted(&fk.referenced_columns)
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        let mut table = Table::new("users");
        table.add_column("id", ColumnType::BigInt, false).unwrap();
        table.add_column("email", ColumnType::Text, false).unwrap();
        table
            .add_column("deleted_at", ColumnType::TimestampTz, true)
            .unwrap();
        table.set_primary_key(vec!["id".to_string()]).unwrap();
        table
    }

    #[test]
    fn test_create_table() {
        let sql = PostgresDdl.create_table(&sample()).unwrap();
        assert_eq!(
            sql,
            "CREATE TABLE \"users\" (\"id\" bigint NOT NULL, \"email\" text NOT NULL, \
             \"deleted_at\" timestamptz, PRIMARY KEY (\"id\"))"
        );
    }

    #[test]
    fn test_create_foreign_key() {
        let mut table = sample();
        table
            .add_column("team_id", ColumnType::BigInt, true)
            .unwrap();
        let fk = ForeignKey {
            name: "fk_users_team_id".to_string(),
            columns: vec!["team_id".to_string()],
            referenced_table: "teams".to_string(),
            referenced_columns: vec!["id".to_string()],
        };
        table.add_foreign_key(fk.clone()).unwrap();
        let sql = PostgresDdl.create_foreign_key(&table, &fk).unwrap();
        assert_eq!(
            sql,
            "ALTER TABLE \"users\" ADD CONSTRAINT \"fk_users_team_id\" \
             FOREIGN KEY (\"team_id\") REFERENCES \"teams\" (\"id\")"
        );
    }

    #[test]
    fn test_empty_table_rejected() {
        let err = PostgresDdl.create_table(&Table::new("empty")).unwrap_err();
        assert!(matches!(err, DdlError::Invalid(_)));
    }
}
