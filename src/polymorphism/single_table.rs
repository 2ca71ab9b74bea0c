//! Single-table strategy: every subtype shares one table, a discriminator
//! column tells the rows apart.

use crate::binder::BinderRegistry;
use crate::config::EngineConfig;
use crate::executor::ConnectionProvider;
use crate::mapping::{MappingConfiguration, MappingError, ResolutionContext, SilentColumn};
use crate::persister::PersisterBuilder;
use crate::polymorphism::{PolymorphicPersister, Strategy, Subtype};
use crate::schema::{ColumnType, Table};
use sea_query::Value;
use std::sync::Arc;

/// Builds a [`PolymorphicPersister`] over one shared table.
///
/// Subtype configurations must all name the same table; their columns
/// accumulate into it as each one resolves, and every subtype persister
/// gets a constant silent discriminator column carrying its name.
pub struct SingleTableBuilder<E> {
    discriminator: String,
    provider: Arc<dyn ConnectionProvider>,
    registry: BinderRegistry,
    engine: EngineConfig,
    subtypes: Vec<SubtypeEntry<E>>,
}

struct SubtypeEntry<E> {
    name: String,
    matches: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    config: MappingConfiguration<E>,
}

impl<E: 'static> SingleTableBuilder<E> {
    pub fn new(discriminator: impl Into<String>, provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            discriminator: discriminator.into(),
            provider,
            registry: BinderRegistry::global().clone(),
            engine: EngineConfig::default(),
            subtypes: Vec::new(),
        }
    }

    pub fn registry(mut self, registry: BinderRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn engine(mut self, engine: EngineConfig) -> Self {
        self.engine = engine;
        self
    }

    pub fn subtype(
        mut self,
        name: impl Into<String>,
        matches: impl Fn(&E) -> bool + Send + Sync + 'static,
        config: MappingConfiguration<E>,
    ) -> Self {
        self.subtypes.push(SubtypeEntry {
            name: name.into(),
            matches: Arc::new(matches),
            config,
        });
        self
    }

    pub fn build(self) -> Result<PolymorphicPersister<E>, MappingError> {
        let first = self.subtypes.first().ok_or_else(|| MappingError::NoSubtypes {
            entity: "single-table".to_string(),
        })?;
        let entity = first.config.entity.clone();
        let shared = first.config.table.clone();

        let mut ctx = ResolutionContext::new();
        let mut table = Table::new(shared.clone());
        let mut built: Vec<Subtype<E>> = Vec::new();
        for entry in self.subtypes {
            if entry.config.table != shared {
                return Err(MappingError::SharedTableMismatch {
                    entity: entry.config.entity.clone(),
                    expected: shared,
                    actual: entry.config.table.clone(),
                });
            }
            let persister = PersisterBuilder::new(entry.config, Arc::clone(&self.provider))
                .registry(self.registry.clone())
                .engine(self.engine.clone())
                .table(table)
                .build_in(&mut ctx)?;
            persister
                .mapping()
                .push_silent(
                    SilentColumn::constant(
                        self.discriminator.clone(),
                        Value::String(Some(entry.name.clone())),
                    ),
                    ColumnType::Text,
                    false,
                )
                .map_err(MappingError::Table)?;
            // Carry the columns resolved so far into the next subtype.
            table = persister.mapping().table().clone();
            built.push(Subtype {
                name: entry.name,
                matches: entry.matches,
                persister,
            });
        }

        let id_column = built[0].persister().mapping().id_column().to_string();
        Ok(PolymorphicPersister::new(
            entity,
            built,
            Strategy::SingleTable {
                table: shared,
                id_column,
                discriminator: self.discriminator,
                schema: table,
                provider: self.provider,
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Row;
    use crate::mapping::{Accessor, IdentifierPolicy};
    use crate::testing::MockConnectionProvider;
    use crate::value::FromColumnValue;

    #[derive(Clone, Debug, PartialEq)]
    enum Vehicle {
        Car { id: i64, doors: i64 },
        Bike { id: i64, gears: i64 },
    }

    fn id_accessor() -> Accessor<Vehicle> {
        Accessor::new(
            "id",
            |v: &Vehicle| {
                let id = match v {
                    Vehicle::Car { id, .. } | Vehicle::Bike { id, .. } => *id,
                };
                if id == 0 {
                    Value::BigInt(None)
                } else {
                    Value::BigInt(Some(id))
                }
            },
            |v: &mut Vehicle, value: &Value| {
                let assigned = i64::from_column_value(value)?;
                match v {
                    Vehicle::Car { id, .. } | Vehicle::Bike { id, .. } => *id = assigned,
                }
                Ok(())
            },
        )
    }

    fn car_config() -> MappingConfiguration<Vehicle> {
        MappingConfiguration::new("Car", "vehicles", || Vehicle::Car { id: 0, doors: 0 })
            .identifier(id_accessor(), ColumnType::BigInt, IdentifierPolicy::AfterInsert)
            .property(
                Accessor::new(
                    "doors",
                    |v: &Vehicle| match v {
                        Vehicle::Car { doors, .. } => Value::BigInt(Some(*doors)),
                        _ => Value::BigInt(None),
                    },
                    |v: &mut Vehicle, value: &Value| {
                        if let Vehicle::Car { doors, .. } = v {
                            *doors = i64::from_column_value(value)?;
                        }
                        Ok(())
                    },
                ),
                ColumnType::BigInt,
            )
    }

    fn bike_config() -> MappingConfiguration<Vehicle> {
        MappingConfiguration::new("Bike", "vehicles", || Vehicle::Bike { id: 0, gears: 0 })
            .identifier(id_accessor(), ColumnType::BigInt, IdentifierPolicy::AfterInsert)
            .property(
                Accessor::new(
                    "gears",
                    |v: &Vehicle| match v {
                        Vehicle::Bike { gears, .. } => Value::BigInt(Some(*gears)),
                        _ => Value::BigInt(None),
                    },
                    |v: &mut Vehicle, value: &Value| {
                        if let Vehicle::Bike { gears, .. } = v {
                            *gears = i64::from_column_value(value)?;
                        }
                        Ok(())
                    },
                ),
                ColumnType::BigInt,
            )
    }

    fn vehicles(provider: &MockConnectionProvider) -> PolymorphicPersister<Vehicle> {
        SingleTableBuilder::new("kind", Arc::new(provider.clone()))
            .subtype("car", |v| matches!(v, Vehicle::Car { .. }), car_config())
            .subtype("bike", |v| matches!(v, Vehicle::Bike { .. }), bike_config())
            .build()
            .unwrap()
    }

    #[test]
    fn test_shared_table_accumulates_all_subtype_columns() {
        let provider = MockConnectionProvider::new();
        let persister = vehicles(&provider);
        let table = persister.shared_table().unwrap();
        assert!(table.column("doors").is_some());
        assert!(table.column("gears").is_some());
        assert!(table.column("kind").is_some());
    }

    #[test]
    fn test_insert_routes_and_stamps_discriminator() {
        let provider = MockConnectionProvider::new();
        let persister = vehicles(&provider);
        provider.with_executor(|e| {
            e.push_query_result(vec![Row::new(vec![(
                "id".to_string(),
                Value::BigInt(Some(1)),
            )])]);
            e.push_query_result(vec![Row::new(vec![(
                "id".to_string(),
                Value::BigInt(Some(2)),
            )])]);
        });

        let mut data = vec![
            Vehicle::Car { id: 0, doors: 4 },
            Vehicle::Bike { id: 0, gears: 21 },
        ];
        persister.insert(&mut data).unwrap();

        let binds = provider.with_executor(|e| e.executed().to_vec());
        assert_eq!(binds.len(), 2);
        assert!(binds[0].0.contains("\"kind\""), "{}", binds[0].0);
        assert!(binds[0].1 .0.contains(&Value::String(Some("car".to_string()))));
        assert!(binds[1].1 .0.contains(&Value::String(Some("bike".to_string()))));
        assert_eq!(data[0], Vehicle::Car { id: 1, doors: 4 });
        assert_eq!(data[1], Vehicle::Bike { id: 2, gears: 21 });
    }

    #[test]
    fn test_select_hydrates_mixed_subtypes() {
        let provider = MockConnectionProvider::new();
        let persister = vehicles(&provider);
        provider.with_executor(|e| {
            // Discriminator probe.
            e.push_query_result(vec![
                Row::new(vec![
                    ("id".to_string(), Value::BigInt(Some(1))),
                    ("kind".to_string(), Value::String(Some("car".to_string()))),
                ]),
                Row::new(vec![
                    ("id".to_string(), Value::BigInt(Some(2))),
                    ("kind".to_string(), Value::String(Some("bike".to_string()))),
                ]),
            ]);
            // Car hydration.
            e.push_query_result(vec![Row::new(vec![
                ("root_id".to_string(), Value::BigInt(Some(1))),
                ("root_doors".to_string(), Value::BigInt(Some(4))),
            ])]);
            // Bike hydration.
            e.push_query_result(vec![Row::new(vec![
                ("root_id".to_string(), Value::BigInt(Some(2))),
                ("root_gears".to_string(), Value::BigInt(Some(21))),
            ])]);
        });

        let loaded = persister
            .select(&[Value::BigInt(Some(1)), Value::BigInt(Some(2))])
            .unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains(&Vehicle::Car { id: 1, doors: 4 }));
        assert!(loaded.contains(&Vehicle::Bike { id: 2, gears: 21 }));
    }

    #[test]
    fn test_delete_by_id_probes_and_routes_per_subtype() {
        let provider = MockConnectionProvider::new();
        let persister = vehicles(&provider);
        provider.with_executor(|e| {
            e.push_query_result(vec![
                Row::new(vec![
                    ("id".to_string(), Value::BigInt(Some(1))),
                    ("kind".to_string(), Value::String(Some("car".to_string()))),
                ]),
                Row::new(vec![
                    ("id".to_string(), Value::BigInt(Some(2))),
                    ("kind".to_string(), Value::String(Some("bike".to_string()))),
                ]),
            ]);
        });

        let affected = persister
            .delete_by_id(&[Value::BigInt(Some(1)), Value::BigInt(Some(2))])
            .unwrap();
        assert_eq!(affected, 2);

        let statements = provider.statements();
        assert_eq!(statements.len(), 3);
        assert!(statements[0].starts_with("SELECT"), "{}", statements[0]);
        assert!(statements[1].starts_with("DELETE FROM \"vehicles\""), "{}", statements[1]);
        assert!(statements[2].starts_with("DELETE FROM \"vehicles\""), "{}", statements[2]);
        let binds = provider.with_executor(|e| e.executed().to_vec());
        assert!(binds[1].1 .0.contains(&Value::BigInt(Some(1))));
        assert!(binds[2].1 .0.contains(&Value::BigInt(Some(2))));
    }

    #[test]
    fn test_mismatched_subtype_table_rejected() {
        let provider = MockConnectionProvider::new();
        let stray = MappingConfiguration::new("Bike", "bikes", || Vehicle::Bike { id: 0, gears: 0 })
            .identifier(id_accessor(), ColumnType::BigInt, IdentifierPolicy::AfterInsert);
        let err = SingleTableBuilder::new("kind", Arc::new(provider.clone()))
            .subtype("car", |v| matches!(v, Vehicle::Car { .. }), car_config())
            .subtype("bike", |v| matches!(v, Vehicle::Bike { .. }), stray)
            .build()
            .unwrap_err();
        assert!(matches!(err, MappingError::SharedTableMismatch { .. }));
    }
}
