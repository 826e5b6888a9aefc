//! Generic, field-whitelisted CRUD engine.
//!
//! A [`CrudService`] is parameterized over an [`Entity`] and runs every
//! operation against a [`Store`] (the persistence collaborator). Each
//! mutating operation is split into `before_*` hook -> `perform_*` -> `after_*`
//! hook; [`CrudHooks`] supplies no-op defaults so a specialization only
//! overrides what it needs.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;
use uuid::Uuid;

/// Input payload for create/update: field name -> JSON value
pub type Fields = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => f.write_str("create"),
            Operation::Update => f.write_str("update"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CrudError {
    #[error("{entity} not found")]
    NotFound { entity: &'static str },
    #[error("Key {key} is not allowed in {operation}_fields")]
    DisallowedField { key: String, operation: Operation },
    #[error("Field {0} is required")]
    MissingField(&'static str),
    #[error("Invalid value for {field}: expected {expected}")]
    InvalidValue {
        field: String,
        expected: &'static str,
    },
    #[error("{entity} already exists")]
    Duplicate { entity: &'static str },
    #[error("{0}")]
    Rejected(String),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CrudError {
    pub fn invalid(field: &str, expected: &'static str) -> Self {
        CrudError::InvalidValue {
            field: field.to_string(),
            expected,
        }
    }
}

/// A record the CRUD engine can construct and mutate from a [`Fields`] payload.
///
/// Field names are declared explicitly; nothing is discovered at runtime.
pub trait Entity: Clone + Send + Sync + 'static {
    /// Human-readable name used in error messages
    const NAME: &'static str;
    /// Every field a payload may name. Default whitelist for create and update.
    const FIELDS: &'static [&'static str];

    fn id(&self) -> Uuid;

    /// Build a new, not yet persisted entity.
    fn from_fields(id: Uuid, data: Fields) -> Result<Self, CrudError>;

    /// Assign a single field in memory.
    fn set_field(&mut self, field: &str, value: Value) -> Result<(), CrudError>;
}

/// Persistence collaborator for one entity type.
#[async_trait]
pub trait Store<E: Entity>: Send {
    /// Exactly one row with this id; zero or several is `NotFound`.
    async fn fetch_one(&mut self, id: Uuid) -> Result<E, CrudError>;
    async fn fetch_all(&mut self) -> Result<Vec<E>, CrudError>;
    async fn exists(&mut self, id: Uuid) -> Result<bool, CrudError>;
    async fn insert(&mut self, entity: &E) -> Result<(), CrudError>;
    /// Write the current field values of an existing entity.
    async fn save(&mut self, entity: &E) -> Result<(), CrudError>;
    async fn remove(&mut self, entity: &E) -> Result<(), CrudError>;
    async fn commit(&mut self) -> Result<(), CrudError>;
}

/// Entity-specific business rules around the base operations.
pub trait CrudHooks<E: Entity>: Send + Sync {
    /// Runs after whitelist validation, before the entity is built.
    fn before_create(&self, data: Fields) -> Result<Fields, CrudError> {
        Ok(data)
    }

    /// Runs after the entity was persisted (and committed, if requested).
    fn after_create(&self, _entity: &E) -> Result<(), CrudError> {
        Ok(())
    }

    fn before_update(&self, _instance: &E, data: Fields) -> Result<Fields, CrudError> {
        Ok(data)
    }

    fn after_update(&self, _instance: &E) -> Result<(), CrudError> {
        Ok(())
    }

    fn before_delete(&self, _instance: &E) -> Result<(), CrudError> {
        Ok(())
    }

    fn after_delete(&self, _instance: &E) -> Result<(), CrudError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoHooks;

impl<E: Entity> CrudHooks<E> for NoHooks {}

pub struct CrudService<E, H = NoHooks> {
    create_fields: BTreeSet<&'static str>,
    update_fields: BTreeSet<&'static str>,
    hooks: H,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> CrudService<E, NoHooks> {
    pub fn new() -> Self {
        Self::with_hooks(NoHooks)
    }
}

impl<E: Entity> Default for CrudService<E, NoHooks> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Entity, H: CrudHooks<E>> CrudService<E, H> {
    pub fn with_hooks(hooks: H) -> Self {
        Self {
            create_fields: E::FIELDS.iter().copied().collect(),
            update_fields: E::FIELDS.iter().copied().collect(),
            hooks,
            _entity: PhantomData,
        }
    }

    /// Restrict the keys accepted by [`CrudService::create`].
    pub fn create_fields(mut self, fields: &[&'static str]) -> Self {
        self.create_fields = fields.iter().copied().collect();
        self
    }

    /// Restrict the keys accepted by [`CrudService::update`].
    pub fn update_fields(mut self, fields: &[&'static str]) -> Self {
        self.update_fields = fields.iter().copied().collect();
        self
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    pub async fn get<S: Store<E>>(&self, store: &mut S, id: Uuid) -> Result<E, CrudError> {
        store.fetch_one(id).await
    }

    pub async fn exists<S: Store<E>>(&self, store: &mut S, id: Uuid) -> Result<bool, CrudError> {
        store.exists(id).await
    }

    pub async fn list<S: Store<E>>(&self, store: &mut S) -> Result<Vec<E>, CrudError> {
        store.fetch_all().await
    }

    /// Create an entity from `data`. With `commit == false` the insert stays
    /// in the store's open unit of work so several operations can be batched.
    pub async fn create<S: Store<E>>(
        &self,
        store: &mut S,
        data: Fields,
        commit: bool,
    ) -> Result<E, CrudError> {
        self.verify_keys(&data, Operation::Create)?;
        let data = self.hooks.before_create(data)?;
        let entity = self.perform_create(store, data, commit).await?;
        self.hooks.after_create(&entity)?;
        Ok(entity)
    }

    pub async fn perform_create<S: Store<E>>(
        &self,
        store: &mut S,
        data: Fields,
        commit: bool,
    ) -> Result<E, CrudError> {
        let entity = E::from_fields(Uuid::new_v4(), data)?;
        store.insert(&entity).await?;
        if commit {
            store.commit().await?;
        }
        Ok(entity)
    }

    /// Partial update: only the keys present in `data` change.
    pub async fn update<S: Store<E>>(
        &self,
        store: &mut S,
        instance: E,
        data: Fields,
        commit: bool,
    ) -> Result<E, CrudError> {
        self.verify_keys(&data, Operation::Update)?;
        let data = self.hooks.before_update(&instance, data)?;
        let updated = self.perform_update(store, instance, data, commit).await?;
        self.hooks.after_update(&updated)?;
        Ok(updated)
    }

    pub async fn perform_update<S: Store<E>>(
        &self,
        store: &mut S,
        mut instance: E,
        data: Fields,
        commit: bool,
    ) -> Result<E, CrudError> {
        for (field, value) in data {
            instance.set_field(&field, value)?;
        }
        store.save(&instance).await?;
        if commit {
            store.commit().await?;
        }
        Ok(instance)
    }

    pub async fn delete<S: Store<E>>(
        &self,
        store: &mut S,
        instance: E,
        commit: bool,
    ) -> Result<(), CrudError> {
        self.hooks.before_delete(&instance)?;
        self.perform_delete(store, &instance, commit).await?;
        self.hooks.after_delete(&instance)
    }

    pub async fn perform_delete<S: Store<E>>(
        &self,
        store: &mut S,
        instance: &E,
        commit: bool,
    ) -> Result<(), CrudError> {
        store.remove(instance).await?;
        if commit {
            store.commit().await?;
        }
        Ok(())
    }

    /// Reject the whole payload if any key is outside the whitelist.
    fn verify_keys(&self, data: &Fields, operation: Operation) -> Result<(), CrudError> {
        let allowed = match operation {
            Operation::Create => &self.create_fields,
            Operation::Update => &self.update_fields,
        };
        match data.keys().find(|key| !allowed.contains(key.as_str())) {
            Some(key) => Err(CrudError::DisallowedField {
                key: key.clone(),
                operation,
            }),
            None => Ok(()),
        }
    }
}
