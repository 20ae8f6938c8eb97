//! Resource construction indirection.
//!
//! A resource can be built from a pre-existing value, a synchronous factory
//! function, or an asynchronous factory, all consumed through one `build`
//! entry point. The container never cares how an instance came to be, and
//! tests substitute fakes without touching call sites.

use futures::future::BoxFuture;

type SyncFactory<T> = Box<dyn FnOnce() -> anyhow::Result<T> + Send>;

/// Tagged union of the supported construction shapes.
pub enum ResourceFactory<T> {
    /// Wraps a pre-built value (the zero-argument no-op factory case).
    Value(T),
    /// Synchronous construction; failure propagates to the caller.
    Sync(SyncFactory<T>),
    /// Asynchronous construction; rejection propagates to the caller.
    Async(BoxFuture<'static, anyhow::Result<T>>),
}

impl<T> ResourceFactory<T> {
    pub fn from_value(value: T) -> Self {
        Self::Value(value)
    }

    pub fn from_fn<F>(f: F) -> Self
    where
        F: FnOnce() -> anyhow::Result<T> + Send + 'static,
    {
        Self::Sync(Box::new(f))
    }

    pub fn from_async<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        Self::Async(Box::pin(fut))
    }

    /// Builds the resource, awaiting asynchronous kinds.
    ///
    /// # Errors
    /// Propagates whatever the underlying factory failed with.
    pub async fn build(self) -> anyhow::Result<T> {
        match self {
            Self::Value(v) => Ok(v),
            Self::Sync(f) => f(),
            Self::Async(fut) => fut.await,
        }
    }

    /// Builds the resource on a synchronous path.
    ///
    /// # Errors
    /// Fails for [`ResourceFactory::Async`]: an async factory handed to a
    /// sync call site is a caller bug, not something to block on.
    pub fn build_sync(self) -> anyhow::Result<T> {
        match self {
            Self::Value(v) => Ok(v),
            Self::Sync(f) => f(),
            Self::Async(_) => Err(anyhow::anyhow!(
                "async factory cannot be built on a synchronous path"
            )),
        }
    }
}

impl<T> std::fmt::Debug for ResourceFactory<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Value(_) => "Value",
            Self::Sync(_) => "Sync",
            Self::Async(_) => "Async",
        };
        f.debug_tuple("ResourceFactory").field(&kind).finish()
    }
}
