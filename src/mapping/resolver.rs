//! Configuration-to-mapping resolution.
//!
//! Resolution walks an inheritance chain root-first, derives final column
//! names through the effective naming strategy, grows the supplied [`Table`]
//! as a side effect and verifies a binder exists for every column. All
//! failures are fatal at configuration time.

use crate::binder::BinderRegistry;
use crate::mapping::config::{InsetLinkage, MappingConfiguration, PropertyLinkage};
use crate::mapping::naming::ColumnNaming;
use crate::mapping::resolved::{ResolvedEntityMapping, ResolvedIdentifier, ResolvedProperty};
use crate::mapping::MappingError;
use crate::schema::Table;
use std::collections::HashSet;

/// Tracks in-flight resolutions so mutually dependent setups (relationship
/// targets resolving their sources back) fail fast instead of recursing.
#[derive(Debug, Default)]
pub struct ResolutionContext {
    resolving: HashSet<String>,
}

impl ResolutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin(&mut self, entity: &str) -> Result<(), MappingError> {
        if !self.resolving.insert(entity.to_string()) {
            return Err(MappingError::CyclicResolution {
                entity: entity.to_string(),
            });
        }
        Ok(())
    }

    pub(crate) fn end(&mut self, entity: &str) {
        self.resolving.remove(entity);
    }
}

/// Resolve a configuration against a table, using a fresh context.
pub fn resolve_entity<E: 'static>(
    config: MappingConfiguration<E>,
    table: Table,
    registry: &BinderRegistry,
) -> Result<ResolvedEntityMapping<E>, MappingError> {
    resolve_entity_in(&mut ResolutionContext::new(), config, table, registry)
}

/// Resolve within an explicit context; nested resolutions triggered during
/// relationship setup share the caller's context.
pub fn resolve_entity_in<E: 'static>(
    ctx: &mut ResolutionContext,
    config: MappingConfiguration<E>,
    table: Table,
    registry: &BinderRegistry,
) -> Result<ResolvedEntityMapping<E>, MappingError> {
    let entity = config.entity.clone();
    ctx.begin(&entity)?;
    let result = resolve_inner(config, table, registry);
    ctx.end(&entity);
    result
}

fn resolve_inner<E: 'static>(
    config: MappingConfiguration<E>,
    mut table: Table,
    registry: &BinderRegistry,
) -> Result<ResolvedEntityMapping<E>, MappingError> {
    let entity = config.entity.clone();
    let factory = config.factory.clone();
    let leaf_naming = config.effective_naming();

    let identifier = config
        .identifier_in_chain()
        .cloned()
        .ok_or_else(|| MappingError::MissingIdentifier {
            entity: entity.clone(),
        })?;

    // Root-first so an inherited layer's columns land before the leaf's and
    // leaf duplicates are reported against the inherited definition.
    let mut levels: Vec<MappingConfiguration<E>> = Vec::new();
    let mut current = Some(config);
    while let Some(mut level) = current.take() {
        current = level.parent.take().map(|boxed| *boxed);
        levels.push(level);
    }
    levels.reverse();

    let mut properties: Vec<ResolvedProperty<E>> = Vec::new();
    let mut seen_properties: HashSet<String> = HashSet::new();
    let mut seen_columns: HashSet<String> = HashSet::new();

    let id_column = identifier
        .column
        .clone()
        .unwrap_or_else(|| leaf_naming.resolve(identifier.accessor.name()));
    seen_columns.insert(id_column.clone());

    let mut inherited_naming = ColumnNaming::default();
    for level in levels {
        if let Some(naming) = &level.naming {
            inherited_naming = naming.clone();
        }
        let naming = inherited_naming.clone();
        for linkage in level.properties {
            let column = linkage
                .column
                .clone()
                .unwrap_or_else(|| naming.resolve(linkage.accessor.name()));
            let property = linkage.accessor.name().to_string();
            properties.push(resolve_property(
                &entity,
                &mut table,
                registry,
                &mut seen_properties,
                &mut seen_columns,
                linkage,
                property,
                column,
            )?);
        }
        for inset in level.insets {
            resolve_inset(
                &entity,
                &mut table,
                registry,
                &mut seen_properties,
                &mut seen_columns,
                &naming,
                inset,
                &mut properties,
            )?;
        }
    }

    let id_binder = registry.binder_for(&id_column, identifier.ty)?.clone();
    table.add_column(id_column.clone(), identifier.ty, false)?;
    if let Some(pk) = table.primary_key() {
        if pk.columns != [id_column.clone()] {
            return Err(MappingError::CompositeIdentifier {
                entity,
                columns: pk.columns.clone(),
            });
        }
    } else {
        table.set_primary_key(vec![id_column.clone()])?;
    }

    let resolved_identifier = ResolvedIdentifier {
        column: id_column,
        ty: identifier.ty,
        binder: id_binder,
        get: identifier.accessor.get_fn(),
        set: identifier.accessor.set_fn(),
        policy: identifier.policy,
    };

    log::debug!(
        "resolved entity {entity} onto table {} with {} properties",
        table.name(),
        properties.len()
    );

    Ok(ResolvedEntityMapping::new(
        entity,
        table,
        properties,
        resolved_identifier,
        factory,
    ))
}

fn resolve_property<E>(
    entity: &str,
    table: &mut Table,
    registry: &BinderRegistry,
    seen_properties: &mut HashSet<String>,
    seen_columns: &mut HashSet<String>,
    linkage: PropertyLinkage<E>,
    property: String,
    column: String,
) -> Result<ResolvedProperty<E>, MappingError> {
    if !seen_properties.insert(property.clone()) {
        return Err(MappingError::DuplicateProperty {
            entity: entity.to_string(),
            property,
        });
    }
    if !seen_columns.insert(column.clone()) {
        return Err(MappingError::DuplicateColumn {
            entity: entity.to_string(),
            column,
        });
    }
    let binder = registry.binder_for(&column, linkage.ty)?.clone();
    table.add_column(column.clone(), linkage.ty, linkage.nullable)?;
    Ok(ResolvedProperty {
        property,
        column,
        ty: linkage.ty,
        nullable: linkage.nullable,
        binder,
        get: linkage.accessor.get_fn(),
        set: linkage.accessor.set_fn(),
    })
}

#[allow(clippy::too_many_arguments)]
fn resolve_inset<E>(
    entity: &str,
    table: &mut Table,
    registry: &BinderRegistry,
    seen_properties: &mut HashSet<String>,
    seen_columns: &mut HashSet<String>,
    owner_naming: &ColumnNaming,
    inset: InsetLinkage<E>,
    properties: &mut Vec<ResolvedProperty<E>>,
) -> Result<(), MappingError> {
    let naming = inset.naming.clone().unwrap_or_else(|| owner_naming.clone());
    for linkage in inset.properties {
        let property = linkage.accessor.name();
        let overridden = inset.overrides.get(property).cloned();
        let column = match (&linkage.column, overridden) {
            (_, Some(column)) => column,
            (Some(column), None) => column.clone(),
            (None, None) => naming.resolve(property),
        };
        // A collision inside an inset is distinguishable from a plain
        // duplicate: it is fixable with an override on the embeddable.
        if seen_columns.contains(&column) && !inset.overrides.contains_key(property) {
            return Err(MappingError::InsetColumnCollision {
                entity: entity.to_string(),
                inset: inset.name.clone(),
                column,
            });
        }
        // Property names inside an inset are qualified by the inset path so
        // two embeds of one value type stay distinct.
        let qualified = format!("{}.{}", inset.name, property);
        properties.push(resolve_property(
            entity,
            table,
            registry,
            seen_properties,
            seen_columns,
            linkage,
            qualified,
            column,
        )?);
    }
    for mut nested in inset.insets {
        nested.name = format!("{}.{}", inset.name, nested.name);
        resolve_inset(
            entity,
            table,
            registry,
            seen_properties,
            seen_columns,
            &naming,
            nested,
            properties,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::accessor::Accessor;
    use crate::mapping::config::{EmbeddableMapping, IdentifierPolicy};
    use crate::schema::ColumnType;

    #[derive(Default)]
    struct Address {
        city: String,
    }

    #[derive(Default)]
    struct Person {
        id: i64,
        name: String,
        home: Address,
        work: Address,
    }

    fn id_accessor() -> Accessor<Person> {
        Accessor::field("id", |p: &Person| p.id, |p: &mut Person, v| p.id = v)
    }

    fn name_accessor() -> Accessor<Person> {
        Accessor::field(
            "name",
            |p: &Person| p.name.clone(),
            |p: &mut Person, v| p.name = v,
        )
    }

    fn city_mapping() -> EmbeddableMapping<Address> {
        EmbeddableMapping::new().property(
            Accessor::field(
                "city",
                |a: &Address| a.city.clone(),
                |a: &mut Address, v| a.city = v,
            ),
            ColumnType::Text,
        )
    }

    #[test]
    fn test_resolution_grows_table_and_sets_primary_key() {
        let config = MappingConfiguration::new("Person", "people", Person::default)
            .naming(ColumnNaming::SnakeCase)
            .identifier(id_accessor(), ColumnType::BigInt, IdentifierPolicy::AfterInsert)
            .property(name_accessor(), ColumnType::Text);
        let mapping =
            resolve_entity(config, Table::new("people"), BinderRegistry::global()).unwrap();
        let table = mapping.table();
        assert!(table.column("id").is_some());
        assert!(table.column("name").is_some());
        assert_eq!(table.primary_key().unwrap().columns, vec!["id".to_string()]);
    }

    #[test]
    fn test_missing_identifier_rejected() {
        let config = MappingConfiguration::new("Person", "people", Person::default)
            .property(name_accessor(), ColumnType::Text);
        let err =
            resolve_entity(config, Table::new("people"), BinderRegistry::global()).unwrap_err();
        assert!(matches!(err, MappingError::MissingIdentifier { .. }));
    }

    #[test]
    fn test_duplicate_column_rejected() {
        let config = MappingConfiguration::new("Person", "people", Person::default)
            .identifier(id_accessor(), ColumnType::BigInt, IdentifierPolicy::AfterInsert)
            .property_column(name_accessor(), ColumnType::Text, "label")
            .property_column(
                Accessor::field(
                    "nickname",
                    |p: &Person| p.name.clone(),
                    |p: &mut Person, v| p.name = v,
                ),
                ColumnType::Text,
                "label",
            );
        let err =
            resolve_entity(config, Table::new("people"), BinderRegistry::global()).unwrap_err();
        assert!(matches!(err, MappingError::DuplicateColumn { .. }));
    }

    #[test]
    fn test_inherited_layer_resolves_first() {
        let parent = MappingConfiguration::new("Party", "people", Person::default)
            .naming(ColumnNaming::SnakeCase)
            .identifier(id_accessor(), ColumnType::BigInt, IdentifierPolicy::AfterInsert)
            .property(name_accessor(), ColumnType::Text);
        let child = MappingConfiguration::new("Person", "people", Person::default)
            .inherit(parent)
            .property(
                Accessor::field(
                    "displayName",
                    |p: &Person| p.name.clone(),
                    |p: &mut Person, v| p.name = v,
                ),
                ColumnType::Text,
            );
        let mapping =
            resolve_entity(child, Table::new("people"), BinderRegistry::global()).unwrap();
        // Child inherits the parent's snake-case strategy.
        assert!(mapping.table().column("display_name").is_some());
        assert_eq!(mapping.properties()[0].property(), "name");
    }

    #[test]
    fn test_inset_collision_requires_override() {
        let config = MappingConfiguration::new("Person", "people", Person::default)
            .identifier(id_accessor(), ColumnType::BigInt, IdentifierPolicy::AfterInsert)
            .embed(
                "home",
                |p: &Person| &p.home,
                |p: &mut Person| &mut p.home,
                city_mapping(),
            )
            .embed(
                "work",
                |p: &Person| &p.work,
                |p: &mut Person| &mut p.work,
                city_mapping(),
            );
        let err =
            resolve_entity(config, Table::new("people"), BinderRegistry::global()).unwrap_err();
        assert!(matches!(err, MappingError::InsetColumnCollision { .. }));

        let config = MappingConfiguration::new("Person", "people", Person::default)
            .identifier(id_accessor(), ColumnType::BigInt, IdentifierPolicy::AfterInsert)
            .embed(
                "home",
                |p: &Person| &p.home,
                |p: &mut Person| &mut p.home,
                city_mapping(),
            )
            .embed(
                "work",
                |p: &Person| &p.work,
                |p: &mut Person| &mut p.work,
                city_mapping().override_column("city", "work_city"),
            );
        let mapping =
            resolve_entity(config, Table::new("people"), BinderRegistry::global()).unwrap();
        assert!(mapping.table().column("city").is_some());
        assert!(mapping.table().column("work_city").is_some());
    }

    #[test]
    fn test_cycle_guard() {
        let mut ctx = ResolutionContext::new();
        ctx.begin("Person").unwrap();
        let config = MappingConfiguration::new("Person", "people", Person::default)
            .identifier(id_accessor(), ColumnType::BigInt, IdentifierPolicy::AfterInsert);
        let err = resolve_entity_in(&mut ctx, config, Table::new("people"), BinderRegistry::global())
            .unwrap_err();
        assert!(matches!(err, MappingError::CyclicResolution { .. }));
    }
}
