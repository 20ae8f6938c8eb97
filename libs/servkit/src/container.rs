//! Named singleton resources with cohort-ordered teardown.
//!
//! The container creates a resource at most once per name, remembers which
//! disposal cohort it belongs to, and unwinds cohorts in descending order so
//! late-created resources (listeners) go down before what they depend on
//! (pools, clients). Release hooks are an explicit capability, not duck
//! typing: anything stored here implements [`Disposable`], possibly with the
//! default no-op hooks.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use crate::factory::ResourceFactory;

/// Optional release hooks invoked during disposal, sync first, then async.
///
/// Both hooks default to no-ops so plain values opt in with an empty impl.
#[async_trait]
pub trait Disposable: Any + Send + Sync {
    /// Synchronous release hook; runs before [`Disposable::release_async`].
    ///
    /// # Errors
    /// A failing hook aborts the remaining teardown sequence.
    fn release(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Asynchronous release hook; runs after [`Disposable::release`].
    ///
    /// # Errors
    /// A failing hook aborts the remaining teardown sequence.
    async fn release_async(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Structured container failures.
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("failed to build resource '{name}'")]
    Build {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("release hook failed for resource '{name}'")]
    Release {
        name: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("resource '{name}' is registered with a different type")]
    TypeMismatch { name: String },
}

struct Slot {
    // Two views of the same allocation: typed fetch goes through `Any`,
    // teardown goes through the capability vtable.
    instance: Arc<dyn Any + Send + Sync>,
    hooks: Arc<dyn Disposable>,
    cohort: i64,
}

#[derive(Default)]
struct ContainerState {
    slots: HashMap<String, Slot>,
    /// cohort → member names in registration order.
    cohorts: BTreeMap<i64, Vec<String>>,
    next_cohort: i64,
}

impl ContainerState {
    fn assign_cohort(&mut self, explicit: Option<i64>) -> i64 {
        match explicit {
            Some(c) => c,
            None => {
                let c = self.next_cohort;
                self.next_cohort += 1;
                c
            }
        }
    }

    fn insert(&mut self, name: &str, slot: Slot) {
        self.cohorts
            .entry(slot.cohort)
            .or_default()
            .push(name.to_owned());
        self.slots.insert(name.to_owned(), slot);
    }

    fn forget(&mut self, name: &str) {
        if let Some(slot) = self.slots.remove(name)
            && let Some(members) = self.cohorts.get_mut(&slot.cohort)
        {
            members.retain(|m| m != name);
            if members.is_empty() {
                self.cohorts.remove(&slot.cohort);
            }
        }
    }
}

/// Named singleton registry with descending-cohort disposal.
#[derive(Default)]
pub struct ResourceContainer {
    state: Mutex<ContainerState>,
}

impl std::fmt::Debug for ResourceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ResourceContainer")
            .field("resources", &state.slots.keys().collect::<Vec<_>>())
            .field("cohorts", &state.cohorts.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ResourceContainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn hit<T: Disposable>(&self, name: &str) -> Option<Result<Arc<T>, ContainerError>> {
        let state = self.state.lock();
        let slot = state.slots.get(name)?;
        Some(
            slot.instance
                .clone()
                .downcast::<T>()
                .map_err(|_| ContainerError::TypeMismatch {
                    name: name.to_owned(),
                }),
        )
    }

    fn store<T: Disposable>(&self, name: &str, instance: T, cohort: Option<i64>) -> Arc<T> {
        let instance = Arc::new(instance);
        let mut state = self.state.lock();
        // A concurrent create may have won the race across a suspension
        // point; never replace a live instance on the create paths.
        if let Some(slot) = state.slots.get(name)
            && let Ok(existing) = slot.instance.clone().downcast::<T>()
        {
            tracing::debug!(resource = name, "Resource appeared during build; keeping existing");
            return existing;
        }
        let cohort = state.assign_cohort(cohort);
        state.insert(
            name,
            Slot {
                instance: instance.clone(),
                hooks: instance.clone(),
                cohort,
            },
        );
        tracing::debug!(resource = name, cohort, "Resource registered");
        instance
    }

    /// Builds the resource via a synchronous factory unless `name` is already
    /// live, in which case the existing instance is returned and the factory
    /// is not invoked.
    ///
    /// # Errors
    /// [`ContainerError::Build`] if the factory fails,
    /// [`ContainerError::TypeMismatch`] on a cache hit with a different type.
    pub fn create_instance<T, F>(
        &self,
        name: &str,
        factory: F,
        cohort: Option<i64>,
    ) -> Result<Arc<T>, ContainerError>
    where
        T: Disposable,
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        if let Some(existing) = self.hit::<T>(name) {
            return existing;
        }
        let instance = ResourceFactory::from_fn(factory)
            .build_sync()
            .map_err(|source| ContainerError::Build {
                name: name.to_owned(),
                source,
            })?;
        Ok(self.store(name, instance, cohort))
    }

    /// Async-factory variant of [`ResourceContainer::create_instance`] with
    /// identical caching and cohort semantics.
    ///
    /// # Errors
    /// Same failure modes as the synchronous path.
    pub async fn create_instance_async<T, Fut>(
        &self,
        name: &str,
        factory: Fut,
        cohort: Option<i64>,
    ) -> Result<Arc<T>, ContainerError>
    where
        T: Disposable,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        if let Some(existing) = self.hit::<T>(name) {
            return existing;
        }
        let instance = ResourceFactory::from_async(factory)
            .build()
            .await
            .map_err(|source| ContainerError::Build {
                name: name.to_owned(),
                source,
            })?;
        Ok(self.store(name, instance, cohort))
    }

    /// Registers a pre-built instance under the usual cohort bookkeeping.
    ///
    /// Returns `false` (and mutates nothing) when `name` is already live and
    /// `override_existing` is `false`. Forced replacement does not run the
    /// old instance's release hooks.
    pub fn register_instance<T: Disposable>(
        &self,
        name: &str,
        instance: Arc<T>,
        cohort: Option<i64>,
        override_existing: bool,
    ) -> bool {
        let mut state = self.state.lock();
        if state.slots.contains_key(name) {
            if !override_existing {
                return false;
            }
            state.forget(name);
        }
        let cohort = state.assign_cohort(cohort);
        state.insert(
            name,
            Slot {
                instance: instance.clone(),
                hooks: instance,
                cohort,
            },
        );
        true
    }

    /// Returns the live instance for `name`, or `None` if it was never
    /// registered, was already disposed, or is stored under another type.
    /// Never triggers construction.
    #[must_use]
    pub fn fetch_instance<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let state = self.state.lock();
        let slot = state.slots.get(name)?;
        slot.instance.clone().downcast::<T>().ok()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().slots.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().slots.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.state.lock().slots.is_empty()
    }

    /// Runs the sync release hook, then the async release hook, then removes
    /// the resource. Disposing an absent name is a no-op.
    ///
    /// # Errors
    /// A failing hook propagates immediately; the entry stays in place.
    pub async fn dispose_instance(&self, name: &str) -> Result<(), ContainerError> {
        let hooks = {
            let state = self.state.lock();
            match state.slots.get(name) {
                Some(slot) => slot.hooks.clone(),
                None => return Ok(()),
            }
        };

        hooks.release().map_err(|source| ContainerError::Release {
            name: name.to_owned(),
            source,
        })?;
        hooks
            .release_async()
            .await
            .map_err(|source| ContainerError::Release {
                name: name.to_owned(),
                source,
            })?;

        self.state.lock().forget(name);
        tracing::debug!(resource = name, "Resource disposed");
        Ok(())
    }

    /// Disposes every resource, highest cohort first; within a cohort,
    /// members go down in registration order. A cohort is fully drained
    /// before the next-lower one starts.
    ///
    /// # Errors
    /// A failing hook aborts the sequence; remaining members and lower
    /// cohorts are left untouched.
    pub async fn dispose_all(&self) -> Result<(), ContainerError> {
        loop {
            let batch = {
                let state = self.state.lock();
                match state.cohorts.iter().next_back() {
                    Some((&cohort, members)) => (cohort, members.clone()),
                    None => break,
                }
            };
            tracing::debug!(cohort = batch.0, members = ?batch.1, "Disposing cohort");
            for name in &batch.1 {
                self.dispose_instance(name).await?;
            }
            // Guard against a stalled drain if the cohort somehow survived.
            self.state.lock().cohorts.remove(&batch.0);
        }
        Ok(())
    }
}
