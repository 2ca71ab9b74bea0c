//! Structural schema metadata.
//!
//! Tables are grown by the mapping resolver as a side effect of resolution
//! and frozen inside the resolved mapping afterwards. A column belongs to
//! exactly one table; every resolved entity table ends up with exactly one
//! primary key.

use std::fmt;

/// Closed set of column types the engine can bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColumnType {
    Boolean,
    SmallInt,
    Integer,
    BigInt,
    Float,
    Double,
    Text,
    Bytes,
    Uuid,
    Date,
    Time,
    DateTime,
    TimestampTz,
    Decimal,
    Json,
}

/// One column of a [`Table`].
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub ty: ColumnType,
    pub nullable: bool,
}

/// Primary key: one or more columns of the owning table.
#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryKey {
    pub columns: Vec<String>,
}

/// Foreign key from columns of the owning table to another table's columns.
#[derive(Debug, Clone, PartialEq)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

/// Named unique constraint over columns of the owning table.
#[derive(Debug, Clone, PartialEq)]
pub struct UniqueConstraint {
    pub name: String,
    pub columns: Vec<String>,
}

/// Error raised while mutating a [`Table`].
#[derive(Debug, Clone)]
pub enum TableError {
    /// A column of the same name but a different definition already exists.
    ConflictingColumn {
        table: String,
        column: String,
    },
    /// A referenced column is not part of the table.
    UnknownColumn {
        table: String,
        column: String,
    },
}

impl fmt::Display for TableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TableError::ConflictingColumn { table, column } => write!(
                f,
                "column {column} already exists on table {table} with a different definition"
            ),
            TableError::UnknownColumn { table, column } => {
                write!(f, "table {table} has no column {column}")
            }
        }
    }
}

impl std::error::Error for TableError {}

/// A relational table under construction or frozen inside a resolved mapping.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    name: String,
    columns: Vec<Column>,
    primary_key: Option<PrimaryKey>,
    foreign_keys: Vec<ForeignKey>,
    unique_constraints: Vec<UniqueConstraint>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            columns: Vec::new(),
            primary_key: None,
            foreign_keys: Vec::new(),
            unique_constraints: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Add a column, tolerating an exact re-add.
    ///
    /// Re-adding the same definition is a no-op so that several subtype
    /// configurations may resolve against one shared table; a same-named
    /// column with a different type or nullability is a conflict.
    pub fn add_column(
        &mut self,
        name: impl Into<String>,
        ty: ColumnType,
        nullable: bool,
    ) -> Result<(), TableError> {
        let name = name.into();
        if let Some(existing) = self.column(&name) {
            if existing.ty == ty && existing.nullable == nullable {
                return Ok(());
            }
            return Err(TableError::ConflictingColumn {
                table: self.name.clone(),
                column: name,
            });
        }
        self.columns.push(Column { name, ty, nullable });
        Ok(())
    }

    pub fn primary_key(&self) -> Option<&PrimaryKey> {
        self.primary_key.as_ref()
    }

    /// Declare the primary key. Columns must already exist.
    pub fn set_primary_key(&mut self, columns: Vec<String>) -> Result<(), TableError> {
        for column in &columns {
            if self.column(column).is_none() {
                return Err(TableError::UnknownColumn {
                    table: self.name.clone(),
                    column: column.clone(),
                });
            }
        }
        self.primary_key = Some(PrimaryKey { columns });
        Ok(())
    }

    pub fn foreign_keys(&self) -> &[ForeignKey] {
        &self.foreign_keys
    }

    pub fn add_foreign_key(&mut self, fk: ForeignKey) -> Result<(), TableError> {
        for column in &fk.columns {
            if self.column(column).is_none() {
                return Err(TableError::UnknownColumn {
                    table: self.name.clone(),
                    column: column.clone(),
                });
            }
        }
        self.foreign_keys.push(fk);
        Ok(())
    }

    pub fn unique_constraints(&self) -> &[UniqueConstraint] {
        &self.unique_constraints
    }

    pub fn add_unique_constraint(&mut self, constraint: UniqueConstraint) -> Result<(), TableError> {
        for column in &constraint.columns {
            if self.column(column).is_none() {
                return Err(TableError::UnknownColumn {
                    table: self.name.clone(),
                    column: column.clone(),
                });
            }
        }
        self.unique_constraints.push(constraint);
        Ok(())
    }
}
