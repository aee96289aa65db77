//! Event registry: routing key → (schema, handler).
//!
//! Built once at startup through [`EventRegistryBuilder`] and frozen into an
//! [`EventRegistry`], which is shared behind an `Arc` by every worker task without locking.
//!
//! `E` is the application's event union (an enum with one variant per registered schema).
//! Each registration binds one variant type `T` to one handler of `T`.
//!
//! ```rust,ignore
//! let registry = EventRegistry::<QmsEvent>::builder()
//!     .register::<UserCertificateCreated, _>("QMS.UserCertificate.Create", handler)?
//!     .build();
//! ```

use crate::error::{HandlerError, RegistryError};
use crate::result::OperationResult;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed handler for one event schema.
#[async_trait]
pub trait EventHandler<T>: Send + Sync {
    /// Apply the event. Business rejections are `Ok` with an unsuccessful result;
    /// `Err` is reserved for infrastructure faults.
    async fn handle(&self, event: T) -> Result<OperationResult, HandlerError>;

    fn name(&self) -> &'static str;
}

/// Type-erased registry entry.
#[async_trait]
pub trait EventRoute<E>: Send + Sync {
    /// Deserialize a body against this entry's schema.
    fn decode(&self, body: &[u8]) -> Result<E, serde_json::Error>;

    async fn dispatch(&self, event: E) -> Result<OperationResult, HandlerError>;

    fn handler_name(&self) -> &'static str;
}

struct TypedRoute<T, H> {
    event_type: String,
    handler: Arc<H>,
    _schema: PhantomData<fn() -> T>,
}

#[async_trait]
impl<E, T, H> EventRoute<E> for TypedRoute<T, H>
where
    E: Send + 'static,
    T: DeserializeOwned + Into<E> + TryFrom<E> + Send + 'static,
    H: EventHandler<T> + 'static,
{
    fn decode(&self, body: &[u8]) -> Result<E, serde_json::Error> {
        serde_json::from_slice::<T>(body).map(Into::into)
    }

    async fn dispatch(&self, event: E) -> Result<OperationResult, HandlerError> {
        let typed = match T::try_from(event) {
            Ok(typed) => typed,
            Err(_) => {
                return Err(HandlerError::EventMismatch {
                    event_type: self.event_type.clone(),
                });
            }
        };
        self.handler.handle(typed).await
    }

    fn handler_name(&self) -> &'static str {
        self.handler.name()
    }
}

/// Immutable routing table.
pub struct EventRegistry<E> {
    routes: HashMap<String, Box<dyn EventRoute<E>>>,
}

impl<E: Send + 'static> EventRegistry<E> {
    pub fn builder() -> EventRegistryBuilder<E> {
        EventRegistryBuilder {
            routes: HashMap::new(),
        }
    }

    pub fn resolve(&self, event_type: &str) -> Option<&dyn EventRoute<E>> {
        self.routes.get(event_type).map(|route| route.as_ref())
    }

    pub fn contains(&self, event_type: &str) -> bool {
        self.routes.contains_key(event_type)
    }

    /// Registered routing keys, sorted.
    pub fn event_types(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

pub struct EventRegistryBuilder<E> {
    routes: HashMap<String, Box<dyn EventRoute<E>>>,
}

impl<E: Send + 'static> EventRegistryBuilder<E> {
    /// Bind `event_type` to schema `T` and `handler`. Each key may be bound once.
    pub fn register<T, H>(
        self,
        event_type: impl Into<String>,
        handler: H,
    ) -> Result<Self, RegistryError>
    where
        T: DeserializeOwned + Into<E> + TryFrom<E> + Send + 'static,
        H: EventHandler<T> + 'static,
    {
        self.register_arc::<T, H>(event_type, Arc::new(handler))
    }

    pub fn register_arc<T, H>(
        mut self,
        event_type: impl Into<String>,
        handler: Arc<H>,
    ) -> Result<Self, RegistryError>
    where
        T: DeserializeOwned + Into<E> + TryFrom<E> + Send + 'static,
        H: EventHandler<T> + 'static,
    {
        let event_type = event_type.into();
        if event_type.trim().is_empty() {
            return Err(RegistryError::EmptyEventType);
        }
        if self.routes.contains_key(&event_type) {
            return Err(RegistryError::DuplicateEventType(event_type));
        }

        let route = TypedRoute::<T, H> {
            event_type: event_type.clone(),
            handler,
            _schema: PhantomData,
        };
        self.routes.insert(event_type, Box::new(route));
        Ok(self)
    }

    pub fn build(self) -> EventRegistry<E> {
        EventRegistry {
            routes: self.routes,
        }
    }
}
