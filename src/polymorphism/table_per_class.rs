//! Table-per-class strategy: every subtype owns a complete private table,
//! inherited columns included. No shared table exists; reads discover the
//! owning table with a UNION probe across the subtype tables.

use crate::binder::BinderRegistry;
use crate::config::EngineConfig;
use crate::executor::ConnectionProvider;
use crate::mapping::{MappingConfiguration, MappingError, ResolutionContext};
use crate::persister::PersisterBuilder;
use crate::polymorphism::{PolymorphicPersister, Strategy, Subtype};
use std::sync::Arc;

/// Builds a [`PolymorphicPersister`] over fully independent subtype tables.
///
/// Inherited columns are declared through the configuration parent chain
/// ([`MappingConfiguration::inherit`]); each subtype resolves them into its
/// own table.
pub struct TablePerClassBuilder<E> {
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

impl<E: 'static> TablePerClassBuilder<E> {
    pub fn new(provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
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
            entity: "table-per-class".to_string(),
        })?;
        let entity = first.config.entity.clone();

        let mut ctx = ResolutionContext::new();
        let mut built: Vec<Subtype<E>> = Vec::new();
        for entry in self.subtypes {
            let persister = PersisterBuilder::new(entry.config, Arc::clone(&self.provider))
                .registry(self.registry.clone())
                .engine(self.engine.clone())
                .build_in(&mut ctx)?;
            built.push(Subtype {
                name: entry.name,
                matches: entry.matches,
                persister,
            });
        }

        Ok(PolymorphicPersister::new(
            entity,
            built,
            Strategy::TablePerClass {
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
    use crate::schema::ColumnType;
    use crate::testing::MockConnectionProvider;
    use crate::value::FromColumnValue;
    use sea_query::Value;

    #[derive(Clone, Debug, PartialEq)]
    enum Shape {
        Circle { id: i64, radius: i64 },
        Square { id: i64, side: i64 },
    }

    fn id_accessor() -> Accessor<Shape> {
        Accessor::new(
            "id",
            |s: &Shape| {
                let id = match s {
                    Shape::Circle { id, .. } | Shape::Square { id, .. } => *id,
                };
                if id == 0 {
                    Value::BigInt(None)
                } else {
                    Value::BigInt(Some(id))
                }
            },
            |s: &mut Shape, value: &Value| {
                let assigned = i64::from_column_value(value)?;
                match s {
                    Shape::Circle { id, .. } | Shape::Square { id, .. } => *id = assigned,
                }
                Ok(())
            },
        )
    }

    fn circle_config() -> MappingConfiguration<Shape> {
        MappingConfiguration::new("Circle", "circles", || Shape::Circle { id: 0, radius: 0 })
            .identifier(id_accessor(), ColumnType::BigInt, IdentifierPolicy::AfterInsert)
            .property(
                Accessor::new(
                    "radius",
                    |s: &Shape| match s {
                        Shape::Circle { radius, .. } => Value::BigInt(Some(*radius)),
                        _ => Value::BigInt(None),
                    },
                    |s: &mut Shape, value: &Value| {
                        if let Shape::Circle { radius, .. } = s {
                            *radius = i64::from_column_value(value)?;
                        }
                        Ok(())
                    },
                ),
                ColumnType::BigInt,
            )
    }

    fn square_config() -> MappingConfiguration<Shape> {
        MappingConfiguration::new("Square", "squares", || Shape::Square { id: 0, side: 0 })
            .identifier(id_accessor(), ColumnType::BigInt, IdentifierPolicy::AfterInsert)
            .property(
                Accessor::new(
                    "side",
                    |s: &Shape| match s {
                        Shape::Square { side, .. } => Value::BigInt(Some(*side)),
                        _ => Value::BigInt(None),
                    },
                    |s: &mut Shape, value: &Value| {
                        if let Shape::Square { side, .. } = s {
                            *side = i64::from_column_value(value)?;
                        }
                        Ok(())
                    },
                ),
                ColumnType::BigInt,
            )
    }

    fn shapes(provider: &MockConnectionProvider) -> PolymorphicPersister<Shape> {
        TablePerClassBuilder::new(Arc::new(provider.clone()))
            .subtype("circle", |s| matches!(s, Shape::Circle { .. }), circle_config())
            .subtype("square", |s| matches!(s, Shape::Square { .. }), square_config())
            .build()
            .unwrap()
    }

    #[test]
    fn test_insert_routes_to_owning_table() {
        let provider = MockConnectionProvider::new();
        let persister = shapes(&provider);
        provider.with_executor(|e| {
            e.push_query_result(vec![Row::new(vec![(
                "id".to_string(),
                Value::BigInt(Some(1)),
            )])]);
        });

        let mut data = vec![Shape::Circle { id: 0, radius: 5 }];
        persister.insert(&mut data).unwrap();

        let statements = provider.statements();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].contains("\"circles\""), "{}", statements[0]);
        assert_eq!(data[0], Shape::Circle { id: 1, radius: 5 });
    }

    #[test]
    fn test_select_unions_probe_queries() {
        let provider = MockConnectionProvider::new();
        let persister = shapes(&provider);
        provider.with_executor(|e| {
            // Probe.
            e.push_query_result(vec![
                Row::new(vec![
                    ("subtype".to_string(), Value::String(Some("circle".to_string()))),
                    ("id".to_string(), Value::BigInt(Some(1))),
                ]),
                Row::new(vec![
                    ("subtype".to_string(), Value::String(Some("square".to_string()))),
                    ("id".to_string(), Value::BigInt(Some(2))),
                ]),
            ]);
            // Hydration, one query per owning subtype.
            e.push_query_result(vec![Row::new(vec![
                ("root_id".to_string(), Value::BigInt(Some(1))),
                ("root_radius".to_string(), Value::BigInt(Some(5))),
            ])]);
            e.push_query_result(vec![Row::new(vec![
                ("root_id".to_string(), Value::BigInt(Some(2))),
                ("root_side".to_string(), Value::BigInt(Some(3))),
            ])]);
        });

        let loaded = persister
            .select(&[Value::BigInt(Some(1)), Value::BigInt(Some(2))])
            .unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains(&Shape::Circle { id: 1, radius: 5 }));
        assert!(loaded.contains(&Shape::Square { id: 2, side: 3 }));
        let sql = &provider.statements()[0];
        assert!(sql.contains("UNION"), "{sql}");
    }

    #[test]
    fn test_duplicate_probe_id_collapses_to_first_subtype() {
        let provider = MockConnectionProvider::new();
        let persister = shapes(&provider);
        provider.with_executor(|e| {
            e.push_query_result(vec![
                Row::new(vec![
                    ("subtype".to_string(), Value::String(Some("square".to_string()))),
                    ("id".to_string(), Value::BigInt(Some(1))),
                ]),
                Row::new(vec![
                    ("subtype".to_string(), Value::String(Some("circle".to_string()))),
                    ("id".to_string(), Value::BigInt(Some(1))),
                ]),
            ]);
            e.push_query_result(vec![Row::new(vec![
                ("root_id".to_string(), Value::BigInt(Some(1))),
                ("root_radius".to_string(), Value::BigInt(Some(5))),
            ])]);
        });

        let loaded = persister.select(&[Value::BigInt(Some(1))]).unwrap();
        assert_eq!(loaded, vec![Shape::Circle { id: 1, radius: 5 }]);
    }
}
