//! Joined-tables strategy: shared columns live in a parent table, each
//! subtype keeps its own columns in a private table whose primary key is
//! also a foreign key to the parent row.

use crate::binder::BinderRegistry;
use crate::config::EngineConfig;
use crate::executor::ConnectionProvider;
use crate::mapping::{IdentifierPolicy, MappingConfiguration, MappingError, ResolutionContext};
use crate::persister::PersisterBuilder;
use crate::polymorphism::{PolymorphicPersister, Strategy, Subtype};
use crate::schema::ForeignKey;
use std::sync::Arc;

/// Builds a [`PolymorphicPersister`] over a parent table plus one private
/// table per subtype.
///
/// Subtype configurations map only the subtype-specific columns and must
/// link the same identifier accessor as the parent. The builder rewrites
/// each subtype identifier policy so the subtype row is written with the
/// key the parent insert produced, never read back.
pub struct JoinedTablesBuilder<E> {
    parent: MappingConfiguration<E>,
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

impl<E: 'static> JoinedTablesBuilder<E> {
    pub fn new(parent: MappingConfiguration<E>, provider: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            parent,
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
        if self.subtypes.is_empty() {
            return Err(MappingError::NoSubtypes {
                entity: self.parent.entity.clone(),
            });
        }
        let entity = self.parent.entity.clone();
        let mut ctx = ResolutionContext::new();
        let parent = PersisterBuilder::new(self.parent, Arc::clone(&self.provider))
            .registry(self.registry.clone())
            .engine(self.engine.clone())
            .build_in(&mut ctx)?;

        let mut built: Vec<Subtype<E>> = Vec::new();
        for entry in self.subtypes {
            let mut config = entry.config;
            // The parent insert assigns the key; the subtype row writes it
            // as a plain column.
            if let Some(linkage) = config.identifier.as_mut() {
                linkage.policy =
                    IdentifierPolicy::already_assigned(|_: &E| true, |_: &mut E| {});
            }
            let persister = PersisterBuilder::new(config, Arc::clone(&self.provider))
                .registry(self.registry.clone())
                .engine(self.engine.clone())
                .build_in(&mut ctx)?;
            let mapping = persister.mapping();
            mapping
                .add_foreign_key(ForeignKey {
                    name: format!("fk_{}_{}", mapping.table_name(), mapping.id_column()),
                    columns: vec![mapping.id_column().to_string()],
                    referenced_table: parent.mapping().table_name().to_string(),
                    referenced_columns: vec![parent.mapping().id_column().to_string()],
                })
                .map_err(MappingError::Table)?;
            built.push(Subtype {
                name: entry.name,
                matches: entry.matches,
                persister,
            });
        }

        Ok(PolymorphicPersister::new(
            entity,
            built,
            Strategy::JoinedTables { parent },
        ))
    }
}
