//! One-to-one relationships.
//!
//! The foreign key lives either on the source table (owning side, written
//! as a silent column with every owner insert) or on the target table
//! (mapped-by, written with a targeted update after the owner insert).
//! Loading always goes through a join node on the source persister.

use crate::mapping::{MappingError, SilentColumn};
use crate::persister::{
    DeleteListener, InsertListener, PersistError, Persister, UpdateListener,
};
use crate::query::{JoinKind, JoinNode};
use crate::relation::{
    ProjectOptionFn, ProjectOptionMutFn, RelationMode, SetRelatedFn,
};
use crate::schema::{ForeignKey, TableError};
use crate::value::null_of;
use sea_query::Value;
use std::sync::{Arc, Weak};

/// Configures a one-to-one relationship between two built persisters.
pub struct OneToOneBuilder<E, T> {
    name: String,
    source: Arc<Persister<E>>,
    target: Arc<Persister<T>>,
    get: ProjectOptionFn<E, T>,
    get_mut: ProjectOptionMutFn<E, T>,
    set: SetRelatedFn<E, T>,
    mode: RelationMode,
    mandatory: bool,
}

impl<E: 'static, T: 'static> OneToOneBuilder<E, T> {
    pub fn new(
        name: impl Into<String>,
        source: Arc<Persister<E>>,
        target: Arc<Persister<T>>,
        get: impl for<'a> Fn(&'a E) -> Option<&'a T> + Send + Sync + 'static,
        get_mut: impl for<'a> Fn(&'a mut E) -> Option<&'a mut T> + Send + Sync + 'static,
        set: impl Fn(&mut E, T) + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            target,
            get: Arc::new(get),
            get_mut: Arc::new(get_mut),
            set: Arc::new(set),
            mode: RelationMode::All,
            mandatory: false,
        }
    }

    pub fn mode(mut self, mode: RelationMode) -> Self {
        self.mode = mode;
        self
    }

    /// Require a related instance on every write; the join becomes inner.
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Finish setup with the foreign key on the source table.
    pub fn owning(self, column: impl Into<String>) -> Result<(), MappingError> {
        let column = column.into();
        let source_mapping = Arc::clone(self.source.mapping());
        let target_mapping = Arc::clone(self.target.mapping());
        let id_ty = target_mapping.identifier().column_type();
        let null = null_of(id_ty);

        if self.mode.writes_links() {
            let get = Arc::clone(&self.get);
            let tm = Arc::clone(&target_mapping);
            let null_value = null.clone();
            source_mapping.push_silent(
                SilentColumn::new(column.clone(), move |entity: &E| {
                    get(entity)
                        .map(|related| tm.id_value(related))
                        .unwrap_or_else(|| null_value.clone())
                }),
                id_ty,
                !self.mandatory,
            )?;
            source_mapping.add_foreign_key(ForeignKey {
                name: format!("fk_{}_{column}", source_mapping.table_name()),
                columns: vec![column.clone()],
                referenced_table: target_mapping.table_name().to_string(),
                referenced_columns: vec![target_mapping.id_column().to_string()],
            })?;
        } else if source_mapping.table().column(&column).is_none() {
            return Err(MappingError::Table(TableError::UnknownColumn {
                table: source_mapping.table_name().to_string(),
                column,
            }));
        }

        self.register_join(&column, target_mapping.id_column());

        if self.mandatory {
            let check = Arc::new(MandatoryCheck {
                relation: self.name.clone(),
                get: Arc::clone(&self.get),
            });
            self.source.listeners().add_insert(check.clone());
            self.source.listeners().add_update(check);
        }

        if self.mode.writes_links() {
            let cascade = Arc::new(OwningCascade {
                column,
                source: Arc::downgrade(&self.source),
                target: Arc::clone(&self.target),
                get: Arc::clone(&self.get),
                get_mut: Arc::clone(&self.get_mut),
                mode: self.mode,
                null,
            });
            self.source.listeners().add_insert(cascade.clone());
            self.source.listeners().add_update(cascade.clone());
            self.source.listeners().add_delete(cascade);
        }
        Ok(())
    }

    /// Finish setup with the foreign key on the target table.
    pub fn mapped_by(self, column: impl Into<String>) -> Result<(), MappingError> {
        let column = column.into();
        let source_mapping = Arc::clone(self.source.mapping());
        let target_mapping = Arc::clone(self.target.mapping());
        let id_ty = source_mapping.identifier().column_type();

        if self.mode.writes_links() {
            target_mapping.add_column_if_absent(&column, id_ty, true)?;
            target_mapping.add_foreign_key(ForeignKey {
                name: format!("fk_{}_{column}", target_mapping.table_name()),
                columns: vec![column.clone()],
                referenced_table: source_mapping.table_name().to_string(),
                referenced_columns: vec![source_mapping.id_column().to_string()],
            })?;
        } else if target_mapping.table().column(&column).is_none() {
            return Err(MappingError::Table(TableError::UnknownColumn {
                table: target_mapping.table_name().to_string(),
                column,
            }));
        }

        self.register_join(source_mapping.id_column(), &column);

        if self.mandatory {
            let check = Arc::new(MandatoryCheck {
                relation: self.name.clone(),
                get: Arc::clone(&self.get),
            });
            self.source.listeners().add_insert(check.clone());
            self.source.listeners().add_update(check);
        }

        if self.mode.writes_links() {
            let cascade = Arc::new(MappedCascade {
                column,
                source_mapping,
                target: Arc::clone(&self.target),
                get: Arc::clone(&self.get),
                get_mut: Arc::clone(&self.get_mut),
                mode: self.mode,
                null: null_of(id_ty),
            });
            self.source.listeners().add_insert(cascade.clone());
            self.source.listeners().add_update(cascade.clone());
            self.source.listeners().add_delete(cascade);
        }
        Ok(())
    }

    fn register_join(&self, left_column: &str, right_column: &str) {
        let target_mapping = Arc::clone(self.target.mapping());
        let kind = if self.mandatory {
            JoinKind::Inner
        } else {
            JoinKind::LeftOuter
        };
        let mut columns = vec![target_mapping.id_column().to_string()];
        columns.extend(
            target_mapping
                .properties()
                .iter()
                .map(|p| p.column().to_string()),
        );
        let set = Arc::clone(&self.set);
        let tm = Arc::clone(&target_mapping);
        self.source.joined().register(JoinNode::new(
            self.name.clone(),
            target_mapping.table_name(),
            left_column,
            right_column,
            kind,
            columns,
            target_mapping.id_column().to_string(),
            move |entity, row, prefix| {
                let related = tm.hydrate(row, prefix)?;
                set(entity, related);
                Ok(())
            },
        ));
    }
}

/// Rejects writes with an unset mandatory relation.
struct MandatoryCheck<E, T> {
    relation: String,
    get: ProjectOptionFn<E, T>,
}

impl<E, T> MandatoryCheck<E, T> {
    fn check(&self, entity: &E) -> Result<(), PersistError> {
        if (self.get)(entity).is_none() {
            return Err(PersistError::MandatoryRelation {
                relation: self.relation.clone(),
            });
        }
        Ok(())
    }
}

impl<E, T> InsertListener<E> for MandatoryCheck<E, T> {
    fn before_insert(&self, entities: &mut [&mut E]) -> Result<(), PersistError> {
        for entity in entities.iter() {
            self.check(entity)?;
        }
        Ok(())
    }
}

impl<E, T> UpdateListener<E> for MandatoryCheck<E, T> {
    fn before_update(&self, pairs: &mut [&mut (E, E)]) -> Result<(), PersistError> {
        for pair in pairs.iter() {
            self.check(&pair.1)?;
        }
        Ok(())
    }
}

/// Cascade for the owning side: targets are written before their owners so
/// the silent foreign-key column binds a real key.
struct OwningCascade<E, T> {
    column: String,
    source: Weak<Persister<E>>,
    target: Arc<Persister<T>>,
    get: ProjectOptionFn<E, T>,
    get_mut: ProjectOptionMutFn<E, T>,
    mode: RelationMode,
    null: Value,
}

impl<E: 'static, T: 'static> OwningCascade<E, T> {
    fn related_id(&self, entity: &E) -> Option<Value> {
        (self.get)(entity).map(|related| self.target.mapping().id_value(related))
    }
}

impl<E: 'static, T: 'static> InsertListener<E> for OwningCascade<E, T> {
    fn before_insert(&self, entities: &mut [&mut E]) -> Result<(), PersistError> {
        if !self.mode.cascades_lifecycle() {
            return Ok(());
        }
        let mut unpersisted: Vec<&mut T> = Vec::new();
        for entity in entities.iter_mut() {
            if let Some(related) = (self.get_mut)(entity) {
                if !self.target.mapping().is_persisted(related) {
                    unpersisted.push(related);
                }
            }
        }
        self.target.insert_refs(&mut unpersisted)
    }
}

impl<E: 'static, T: 'static> UpdateListener<E> for OwningCascade<E, T> {
    fn after_update(&self, pairs: &mut [&mut (E, E)]) -> Result<(), PersistError> {
        let Some(source) = self.source.upgrade() else {
            return Ok(());
        };
        for pair in pairs.iter_mut() {
            if self.mode.cascades_lifecycle() {
                if let Some(related) = (self.get_mut)(&mut pair.1) {
                    if !self.target.mapping().is_persisted(related) {
                        self.target.insert_refs(&mut [related])?;
                    }
                }
            }
            let old_id = self.related_id(&pair.0);
            let new_id = self.related_id(&pair.1);
            if old_id != new_id {
                let owner_id = source.mapping().identifier().bind_value(&pair.1)?;
                source.update_columns_by_id(
                    &owner_id,
                    &[(
                        self.column.clone(),
                        new_id.clone().unwrap_or_else(|| self.null.clone()),
                    )],
                )?;
                if self.mode.removes_orphans() {
                    if let Some(old) = (self.get)(&pair.0) {
                        if self.target.mapping().is_persisted(old) {
                            let stale = self.target.mapping().id_value(old);
                            self.target.delete_by_id(std::slice::from_ref(&stale))?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl<E: 'static, T: 'static> DeleteListener<E> for OwningCascade<E, T> {
    fn after_delete(&self, entities: &[&E]) -> Result<(), PersistError> {
        if !self.mode.cascades_lifecycle() {
            return Ok(());
        }
        for entity in entities {
            if let Some(related) = (self.get)(entity) {
                // Only targets with a row behind them; a never-inserted
                // target has nothing to remove.
                if self.target.mapping().is_persisted(related) {
                    let id = self.target.mapping().id_value(related);
                    self.target.delete_by_id(std::slice::from_ref(&id))?;
                }
            }
        }
        Ok(())
    }
}

/// Cascade for the mapped-by side: the target row carries the foreign key,
/// so it is written (or patched) after the owner exists and cleared before
/// the owner goes away.
struct MappedCascade<E, T> {
    column: String,
    source_mapping: Arc<crate::mapping::ResolvedEntityMapping<E>>,
    target: Arc<Persister<T>>,
    get: ProjectOptionFn<E, T>,
    get_mut: ProjectOptionMutFn<E, T>,
    mode: RelationMode,
    null: Value,
}

impl<E: 'static, T: 'static> MappedCascade<E, T> {
    fn attach(&self, owner_id: Value, related: &mut T) -> Result<(), PersistError> {
        if !self.target.mapping().is_persisted(related) {
            if self.mode.cascades_lifecycle() {
                let overlay = [SilentColumn::constant(self.column.clone(), owner_id)];
                return self.target.insert_with(&mut [related], &overlay);
            }
            return Ok(());
        }
        let related_id = self.target.mapping().identifier().bind_value(related)?;
        self.target
            .update_columns_by_id(&related_id, &[(self.column.clone(), owner_id)])?;
        Ok(())
    }
}

impl<E: 'static, T: 'static> InsertListener<E> for MappedCascade<E, T> {
    fn after_insert(&self, entities: &mut [&mut E]) -> Result<(), PersistError> {
        for entity in entities.iter_mut() {
            let owner_id = self.source_mapping.identifier().bind_value(entity)?;
            if let Some(related) = (self.get_mut)(entity) {
                self.attach(owner_id, related)?;
            }
        }
        Ok(())
    }
}

impl<E: 'static, T: 'static> UpdateListener<E> for MappedCascade<E, T> {
    fn after_update(&self, pairs: &mut [&mut (E, E)]) -> Result<(), PersistError> {
        for pair in pairs.iter_mut() {
            let old_id = (self.get)(&pair.0)
                .map(|related| self.target.mapping().identifier().bind_value(related))
                .transpose()?;
            let new_id = (self.get)(&pair.1)
                .map(|related| self.target.mapping().identifier().bind_value(related))
                .transpose()?;
            if old_id == new_id {
                continue;
            }
            if let Some(old) = (self.get)(&pair.0) {
                if self.target.mapping().is_persisted(old) {
                    let stale = self.target.mapping().identifier().bind_value(old)?;
                    if self.mode.removes_orphans() {
                        self.target.delete_by_id(std::slice::from_ref(&stale))?;
                    } else {
                        self.target.update_columns_by_id(
                            &stale,
                            &[(self.column.clone(), self.null.clone())],
                        )?;
                    }
                }
            }
            let owner_id = self.source_mapping.identifier().bind_value(&pair.1)?;
            if let Some(related) = (self.get_mut)(&mut pair.1) {
                self.attach(owner_id, related)?;
            }
        }
        Ok(())
    }
}

impl<E: 'static, T: 'static> DeleteListener<E> for MappedCascade<E, T> {
    fn before_delete(&self, entities: &[&E]) -> Result<(), PersistError> {
        let owner_ids = entities
            .iter()
            .map(|entity| self.source_mapping.identifier().bind_value(entity))
            .collect::<Result<Vec<_>, _>>()?;
        if self.mode.removes_orphans() {
            self.target.delete_where(&self.column, &owner_ids)?;
        } else {
            self.target.update_columns_where(
                &self.column,
                &owner_ids,
                &[(self.column.clone(), self.null.clone())],
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::Row;
    use crate::mapping::{Accessor, IdentifierPolicy, MappingConfiguration};
    use crate::persister::PersisterBuilder;
    use crate::schema::ColumnType;
    use crate::testing::MockConnectionProvider;

    #[derive(Default)]
    struct Profile {
        id: i64,
        bio: String,
    }

    #[derive(Default)]
    struct User {
        id: i64,
        name: String,
        profile: Option<Profile>,
    }

    fn user_persister(provider: &MockConnectionProvider) -> Arc<Persister<User>> {
        let config = MappingConfiguration::new("User", "users", User::default)
            .identifier(
                // Zero stands in for "no key yet" in these fixtures.
                Accessor::new(
                    "id",
                    |u: &User| {
                        if u.id == 0 {
                            Value::BigInt(None)
                        } else {
                            Value::BigInt(Some(u.id))
                        }
                    },
                    |u: &mut User, v: &Value| {
                        u.id = crate::value::FromColumnValue::from_column_value(v)?;
                        Ok(())
                    },
                ),
                ColumnType::BigInt,
                IdentifierPolicy::AfterInsert,
            )
            .property(
                Accessor::field(
                    "name",
                    |u: &User| u.name.clone(),
                    |u: &mut User, v| u.name = v,
                ),
                ColumnType::Text,
            );
        PersisterBuilder::new(config, Arc::new(provider.clone()))
            .build()
            .unwrap()
    }

    fn profile_persister(provider: &MockConnectionProvider) -> Arc<Persister<Profile>> {
        let config = MappingConfiguration::new("Profile", "profiles", Profile::default)
            .identifier(
                Accessor::new(
                    "id",
                    |p: &Profile| {
                        if p.id == 0 {
                            Value::BigInt(None)
                        } else {
                            Value::BigInt(Some(p.id))
                        }
                    },
                    |p: &mut Profile, v: &Value| {
                        p.id = crate::value::FromColumnValue::from_column_value(v)?;
                        Ok(())
                    },
                ),
                ColumnType::BigInt,
                IdentifierPolicy::AfterInsert,
            )
            .property(
                Accessor::field(
                    "bio",
                    |p: &Profile| p.bio.clone(),
                    |p: &mut Profile, v| p.bio = v,
                ),
                ColumnType::Text,
            );
        PersisterBuilder::new(config, Arc::new(provider.clone()))
            .build()
            .unwrap()
    }

    fn owning_builder(
        users: &Arc<Persister<User>>,
        profiles: &Arc<Persister<Profile>>,
    ) -> OneToOneBuilder<User, Profile> {
        OneToOneBuilder::new(
            "profile",
            users.clone(),
            profiles.clone(),
            |u: &User| u.profile.as_ref(),
            |u: &mut User| u.profile.as_mut(),
            |u: &mut User, p| u.profile = Some(p),
        )
    }

    fn id_row(id: i64) -> Row {
        Row::new(vec![("id".to_string(), Value::BigInt(Some(id)))])
    }

    #[test]
    fn test_owning_insert_writes_target_first_and_binds_key() {
        let provider = MockConnectionProvider::new();
        let users = user_persister(&provider);
        let profiles = profile_persister(&provider);
        owning_builder(&users, &profiles).owning("profile_id").unwrap();

        provider.with_executor(|e| {
            e.push_query_result(vec![id_row(5)]); // profile insert
            e.push_query_result(vec![id_row(1)]); // user insert
        });

        let mut people = vec![User {
            name: "ada".to_string(),
            profile: Some(Profile {
                bio: "b".to_string(),
                ..Profile::default()
            }),
            ..User::default()
        }];
        users.insert(&mut people).unwrap();

        let statements = provider.statements();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("INSERT INTO \"profiles\""), "{}", statements[0]);
        assert!(statements[1].contains("INSERT INTO \"users\""), "{}", statements[1]);
        assert!(statements[1].contains("\"profile_id\""), "{}", statements[1]);

        let binds = provider.with_executor(|e| e.executed().to_vec());
        assert!(binds[1].1 .0.contains(&Value::BigInt(Some(5))));
        assert_eq!(people[0].profile.as_ref().map(|p| p.id), Some(5));
    }

    #[test]
    fn test_mandatory_relation_rejected_before_any_statement() {
        let provider = MockConnectionProvider::new();
        let users = user_persister(&provider);
        let profiles = profile_persister(&provider);
        owning_builder(&users, &profiles)
            .mandatory()
            .owning("profile_id")
            .unwrap();

        let mut people = vec![User::default()];
        let err = users.insert(&mut people).unwrap_err();
        assert!(matches!(err, PersistError::MandatoryRelation { .. }));
        assert!(provider.statements().is_empty());
    }

    #[test]
    fn test_owning_select_joins_target_table() {
        let provider = MockConnectionProvider::new();
        let users = user_persister(&provider);
        let profiles = profile_persister(&provider);
        owning_builder(&users, &profiles).owning("profile_id").unwrap();

        provider.with_executor(|e| {
            e.push_query_result(vec![Row::new(vec![
                ("root_id".to_string(), Value::BigInt(Some(1))),
                ("root_name".to_string(), Value::String(Some("ada".to_string()))),
                ("profile_id".to_string(), Value::BigInt(Some(5))),
                ("profile_bio".to_string(), Value::String(Some("b".to_string()))),
            ])]);
        });

        let loaded = users.select(&[Value::BigInt(Some(1))]).unwrap();
        assert_eq!(loaded[0].profile.as_ref().map(|p| p.bio.as_str()), Some("b"));
        let sql = &provider.statements()[0];
        assert!(sql.contains("LEFT JOIN \"profiles\""), "{sql}");
    }

    #[test]
    fn test_owning_delete_skips_unpersisted_target() {
        let provider = MockConnectionProvider::new();
        let users = user_persister(&provider);
        let profiles = profile_persister(&provider);
        owning_builder(&users, &profiles).owning("profile_id").unwrap();

        let people = vec![User {
            id: 1,
            profile: Some(Profile {
                id: 0,
                bio: "draft".to_string(),
            }),
            ..User::default()
        }];
        users.delete(&people).unwrap();

        let statements = provider.statements();
        assert_eq!(statements.len(), 1);
        assert!(statements[0].starts_with("DELETE FROM \"users\""), "{}", statements[0]);
    }

    #[test]
    fn test_mapped_by_delete_clears_foreign_key_first() {
        let provider = MockConnectionProvider::new();
        let users = user_persister(&provider);
        let profiles = profile_persister(&provider);
        owning_builder(&users, &profiles).mapped_by("user_id").unwrap();

        let people = vec![User {
            id: 1,
            ..User::default()
        }];
        users.delete(&people).unwrap();

        let statements = provider.statements();
        assert_eq!(statements.len(), 2);
        assert!(statements[0].starts_with("UPDATE \"profiles\""), "{}", statements[0]);
        assert!(statements[1].starts_with("DELETE FROM \"users\""), "{}", statements[1]);
    }

    #[test]
    fn test_mapped_by_orphan_removal_deletes_target_rows() {
        let provider = MockConnectionProvider::new();
        let users = user_persister(&provider);
        let profiles = profile_persister(&provider);
        owning_builder(&users, &profiles)
            .mode(RelationMode::AllOrphanRemoval)
            .mapped_by("user_id")
            .unwrap();

        let people = vec![User {
            id: 1,
            ..User::default()
        }];
        users.delete(&people).unwrap();

        let statements = provider.statements();
        assert!(statements[0].starts_with("DELETE FROM \"profiles\""), "{}", statements[0]);
        assert!(statements[1].starts_with("DELETE FROM \"users\""), "{}", statements[1]);
    }
}
