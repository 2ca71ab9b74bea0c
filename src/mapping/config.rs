//! Declarative mapping configuration.
//!
//! A [`MappingConfiguration`] is the authoring-time model: property linkages,
//! embedded ("inset") sub-objects, an optional parent configuration for an
//! inherited layer, a naming strategy and — for entities — the identifier
//! linkage and its insertion policy. The resolver turns it into a
//! [`ResolvedEntityMapping`](super::ResolvedEntityMapping).

use crate::mapping::accessor::Accessor;
use crate::mapping::naming::ColumnNaming;
use crate::schema::ColumnType;
use sea_query::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// One property-to-column link.
pub struct PropertyLinkage<E> {
    pub(crate) accessor: Accessor<E>,
    pub(crate) column: Option<String>,
    pub(crate) ty: ColumnType,
    pub(crate) nullable: bool,
}

impl<E> Clone for PropertyLinkage<E> {
    fn clone(&self) -> Self {
        Self {
            accessor: self.accessor.clone(),
            column: self.column.clone(),
            ty: self.ty,
            nullable: self.nullable,
        }
    }
}

impl<E> fmt::Debug for PropertyLinkage<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PropertyLinkage")
            .field("property", &self.accessor.name())
            .field("column", &self.column)
            .field("ty", &self.ty)
            .finish()
    }
}

/// How the engine obtains an entity's primary-key value.
pub enum IdentifierPolicy<E> {
    /// The caller assigns identifiers; never reads generated keys. The
    /// closures tell the engine whether an instance has been persisted and
    /// record that it now is.
    AlreadyAssigned {
        is_persisted: Arc<dyn Fn(&E) -> bool + Send + Sync>,
        mark_persisted: Arc<dyn Fn(&mut E) + Send + Sync>,
    },
    /// The database generates the key on insert; the engine reads exactly one
    /// generated key per inserted row and writes it back.
    AfterInsert,
    /// A provider (sequence, hi-lo, UUID source) yields the key before the
    /// insert statement is built.
    BeforeInsert {
        provider: Arc<dyn Fn() -> Value + Send + Sync>,
    },
}

impl<E> IdentifierPolicy<E> {
    pub fn already_assigned(
        is_persisted: impl Fn(&E) -> bool + Send + Sync + 'static,
        mark_persisted: impl Fn(&mut E) + Send + Sync + 'static,
    ) -> Self {
        IdentifierPolicy::AlreadyAssigned {
            is_persisted: Arc::new(is_persisted),
            mark_persisted: Arc::new(mark_persisted),
        }
    }

    pub fn before_insert(provider: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        IdentifierPolicy::BeforeInsert {
            provider: Arc::new(provider),
        }
    }
}

impl<E> Clone for IdentifierPolicy<E> {
    fn clone(&self) -> Self {
        match self {
            IdentifierPolicy::AlreadyAssigned {
                is_persisted,
                mark_persisted,
            } => IdentifierPolicy::AlreadyAssigned {
                is_persisted: Arc::clone(is_persisted),
                mark_persisted: Arc::clone(mark_persisted),
            },
            IdentifierPolicy::AfterInsert => IdentifierPolicy::AfterInsert,
            IdentifierPolicy::BeforeInsert { provider } => IdentifierPolicy::BeforeInsert {
                provider: Arc::clone(provider),
            },
        }
    }
}

impl<E> fmt::Debug for IdentifierPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentifierPolicy::AlreadyAssigned { .. } => write!(f, "AlreadyAssigned"),
            IdentifierPolicy::AfterInsert => write!(f, "AfterInsert"),
            IdentifierPolicy::BeforeInsert { .. } => write!(f, "BeforeInsert"),
        }
    }
}

/// The identifier link of an entity configuration.
pub struct IdentifierLinkage<E> {
    pub(crate) accessor: Accessor<E>,
    pub(crate) column: Option<String>,
    pub(crate) ty: ColumnType,
    pub(crate) policy: IdentifierPolicy<E>,
}

impl<E> Clone for IdentifierLinkage<E> {
    fn clone(&self) -> Self {
        Self {
            accessor: self.accessor.clone(),
            column: self.column.clone(),
            ty: self.ty,
            policy: self.policy.clone(),
        }
    }
}

/// An embedded sub-object already re-based onto the owning type.
///
/// Created by [`MappingConfiguration::embed`]; keeps its own (sub-)insets,
/// naming override and per-property column overrides so the resolver can
/// detect collisions against the owner's column set.
pub struct InsetLinkage<E> {
    pub(crate) name: String,
    pub(crate) properties: Vec<PropertyLinkage<E>>,
    pub(crate) insets: Vec<InsetLinkage<E>>,
    pub(crate) naming: Option<ColumnNaming>,
    pub(crate) overrides: HashMap<String, String>,
}

impl<E> Clone for InsetLinkage<E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            properties: self.properties.clone(),
            insets: self.insets.clone(),
            naming: self.naming.clone(),
            overrides: self.overrides.clone(),
        }
    }
}

/// Mapping of an embeddable value type `V` (no identifier, no table of its
/// own); embedded into an owning configuration via
/// [`MappingConfiguration::embed`].
pub struct EmbeddableMapping<V> {
    pub(crate) properties: Vec<PropertyLinkage<V>>,
    pub(crate) insets: Vec<InsetLinkage<V>>,
    pub(crate) naming: Option<ColumnNaming>,
    pub(crate) overrides: HashMap<String, String>,
}

impl<V: 'static> Default for EmbeddableMapping<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: 'static> EmbeddableMapping<V> {
    pub fn new() -> Self {
        Self {
            properties: Vec::new(),
            insets: Vec::new(),
            naming: None,
            overrides: HashMap::new(),
        }
    }

    pub fn naming(mut self, naming: ColumnNaming) -> Self {
        self.naming = Some(naming);
        self
    }

    pub fn property(mut self, accessor: Accessor<V>, ty: ColumnType) -> Self {
        self.properties.push(PropertyLinkage {
            accessor,
            column: None,
            ty,
            nullable: false,
        });
        self
    }

    pub fn nullable_property(mut self, accessor: Accessor<V>, ty: ColumnType) -> Self {
        self.properties.push(PropertyLinkage {
            accessor,
            column: None,
            ty,
            nullable: true,
        });
        self
    }

    /// Explicit column override for one of this embeddable's properties,
    /// applied where its default name would collide with an owner column.
    pub fn override_column(
        mut self,
        property: impl Into<String>,
        column: impl Into<String>,
    ) -> Self {
        self.overrides.insert(property.into(), column.into());
        self
    }

    /// Embed a nested value object.
    pub fn embed<W: 'static>(
        mut self,
        name: impl Into<String>,
        get: impl Fn(&V) -> &W + Send + Sync + 'static,
        get_mut: impl Fn(&mut V) -> &mut W + Send + Sync + 'static,
        mapping: EmbeddableMapping<W>,
    ) -> Self {
        self.insets
            .push(rebase_inset(name.into(), Arc::new(get), Arc::new(get_mut), mapping));
        self
    }
}

type ProjectFn<E, V> = Arc<dyn for<'a> Fn(&'a E) -> &'a V + Send + Sync>;
type ProjectMutFn<E, V> = Arc<dyn for<'a> Fn(&'a mut E) -> &'a mut V + Send + Sync>;

/// Re-base an embeddable's linkages onto the owner type by composing the
/// projection closures into every accessor, recursively.
fn rebase_inset<E: 'static, V: 'static>(
    name: String,
    get: ProjectFn<E, V>,
    get_mut: ProjectMutFn<E, V>,
    mapping: EmbeddableMapping<V>,
) -> InsetLinkage<E> {
    let properties = mapping
        .properties
        .into_iter()
        .map(|linkage| rebase_property(&get, &get_mut, linkage))
        .collect();
    let insets = mapping
        .insets
        .into_iter()
        .map(|inset| rebase_nested(&get, &get_mut, inset))
        .collect();
    InsetLinkage {
        name,
        properties,
        insets,
        naming: mapping.naming,
        overrides: mapping.overrides,
    }
}

fn rebase_property<E: 'static, V: 'static>(
    get: &ProjectFn<E, V>,
    get_mut: &ProjectMutFn<E, V>,
    linkage: PropertyLinkage<V>,
) -> PropertyLinkage<E> {
    let inner_get = linkage.accessor.get_fn();
    let inner_set = linkage.accessor.set_fn();
    let project = Arc::clone(get);
    let project_mut = Arc::clone(get_mut);
    PropertyLinkage {
        accessor: Accessor::new(
            linkage.accessor.name(),
            move |e: &E| inner_get(project(e)),
            move |e: &mut E, value| inner_set(project_mut(e), value),
        ),
        column: linkage.column,
        ty: linkage.ty,
        nullable: linkage.nullable,
    }
}

fn rebase_nested<E: 'static, V: 'static>(
    get: &ProjectFn<E, V>,
    get_mut: &ProjectMutFn<E, V>,
    inset: InsetLinkage<V>,
) -> InsetLinkage<E> {
    InsetLinkage {
        name: inset.name,
        properties: inset
            .properties
            .into_iter()
            .map(|linkage| rebase_property(get, get_mut, linkage))
            .collect(),
        insets: inset
            .insets
            .into_iter()
            .map(|nested| rebase_nested(get, get_mut, nested))
            .collect(),
        naming: inset.naming,
        overrides: inset.overrides,
    }
}

/// Complete mapping configuration for an entity type `E`.
pub struct MappingConfiguration<E> {
    pub(crate) entity: String,
    pub(crate) table: String,
    pub(crate) parent: Option<Box<MappingConfiguration<E>>>,
    pub(crate) naming: Option<ColumnNaming>,
    pub(crate) properties: Vec<PropertyLinkage<E>>,
    pub(crate) insets: Vec<InsetLinkage<E>>,
    pub(crate) identifier: Option<IdentifierLinkage<E>>,
    pub(crate) factory: Arc<dyn Fn() -> E + Send + Sync>,
}

impl<E: 'static> MappingConfiguration<E> {
    /// Start a configuration for `entity` persisted in `table`; `factory`
    /// builds blank instances during hydration.
    pub fn new(
        entity: impl Into<String>,
        table: impl Into<String>,
        factory: impl Fn() -> E + Send + Sync + 'static,
    ) -> Self {
        Self {
            entity: entity.into(),
            table: table.into(),
            parent: None,
            naming: None,
            properties: Vec::new(),
            insets: Vec::new(),
            identifier: None,
            factory: Arc::new(factory),
        }
    }

    /// Inherit a parent configuration (an inherited class layer or a shared
    /// base mapping). The parent resolves first; this level's naming
    /// strategy, when set, overrides the inherited one.
    pub fn inherit(mut self, parent: MappingConfiguration<E>) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }

    pub fn naming(mut self, naming: ColumnNaming) -> Self {
        self.naming = Some(naming);
        self
    }

    pub fn property(mut self, accessor: Accessor<E>, ty: ColumnType) -> Self {
        self.properties.push(PropertyLinkage {
            accessor,
            column: None,
            ty,
            nullable: false,
        });
        self
    }

    pub fn nullable_property(mut self, accessor: Accessor<E>, ty: ColumnType) -> Self {
        self.properties.push(PropertyLinkage {
            accessor,
            column: None,
            ty,
            nullable: true,
        });
        self
    }

    /// Property with an explicit column name, bypassing the naming strategy.
    pub fn property_column(
        mut self,
        accessor: Accessor<E>,
        ty: ColumnType,
        column: impl Into<String>,
    ) -> Self {
        self.properties.push(PropertyLinkage {
            accessor,
            column: Some(column.into()),
            ty,
            nullable: false,
        });
        self
    }

    /// Declare the identifier property and its insertion policy. Exactly one
    /// identifier per inheritance chain is honored; composite identifiers are
    /// unsupported.
    pub fn identifier(
        mut self,
        accessor: Accessor<E>,
        ty: ColumnType,
        policy: IdentifierPolicy<E>,
    ) -> Self {
        self.identifier = Some(IdentifierLinkage {
            accessor,
            column: None,
            ty,
            policy,
        });
        self
    }

    /// Identifier with an explicit column name.
    pub fn identifier_column(
        mut self,
        accessor: Accessor<E>,
        ty: ColumnType,
        policy: IdentifierPolicy<E>,
        column: impl Into<String>,
    ) -> Self {
        self.identifier = Some(IdentifierLinkage {
            accessor,
            column: Some(column.into()),
            ty,
            policy,
        });
        self
    }

    /// Embed a value object; its columns land on the owner's table.
    pub fn embed<V: 'static>(
        mut self,
        name: impl Into<String>,
        get: impl Fn(&E) -> &V + Send + Sync + 'static,
        get_mut: impl Fn(&mut E) -> &mut V + Send + Sync + 'static,
        mapping: EmbeddableMapping<V>,
    ) -> Self {
        self.insets
            .push(rebase_inset(name.into(), Arc::new(get), Arc::new(get_mut), mapping));
        self
    }

    /// The identifier declared at this level or adopted from the nearest
    /// ancestor, walking the inheritance chain leaf-first.
    pub(crate) fn identifier_in_chain(&self) -> Option<&IdentifierLinkage<E>> {
        if let Some(identifier) = &self.identifier {
            return Some(identifier);
        }
        self.parent.as_deref().and_then(|p| p.identifier_in_chain())
    }

    /// Effective naming strategy: this level's, else the nearest ancestor's,
    /// else the property-name default.
    pub(crate) fn effective_naming(&self) -> ColumnNaming {
        if let Some(naming) = &self.naming {
            return naming.clone();
        }
        match self.parent.as_deref() {
            Some(parent) => parent.effective_naming(),
            None => ColumnNaming::default(),
        }
    }
}

impl<E> Clone for MappingConfiguration<E> {
    fn clone(&self) -> Self {
        Self {
            entity: self.entity.clone(),
            table: self.table.clone(),
            parent: self.parent.clone(),
            naming: self.naming.clone(),
            properties: self.properties.clone(),
            insets: self.insets.clone(),
            identifier: self.identifier.clone(),
            factory: Arc::clone(&self.factory),
        }
    }
}

impl<E> fmt::Debug for MappingConfiguration<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappingConfiguration")
            .field("entity", &self.entity)
            .field("table", &self.table)
            .field("properties", &self.properties.len())
            .field("insets", &self.insets.len())
            .field("has_identifier", &self.identifier.is_some())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}
