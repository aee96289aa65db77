//! QMS certificate domain.
//!
//! Events, the `user_certificates` table and the handlers that apply events to it.
//! [`registry`] wires every handler into the [`EventRegistry`] the processor dispatches
//! through.

pub mod entity;
pub mod events;
pub mod handler;
pub mod memory;
pub mod models;
pub mod postgres;
pub mod store;

use message_processor::{EventRegistry, RegistryError};
use std::sync::Arc;

pub use entity::{LATEST_INDEX, USER_CERTIFICATES_DDL};
pub use events::{QmsEvent, USER_CERTIFICATE_CREATE, UserCertificateCreated};
pub use handler::UserCertificateCreateHandler;
pub use memory::{FaultPoint, InMemoryCertificateStore};
pub use models::{CertificateValidationError, NewUserCertificate, UserCertificate};
pub use postgres::PgCertificateStore;
pub use store::{CertificateStore, latest_conflict};

/// Build the routing table for every QMS event backed by `store`.
pub fn registry<S: CertificateStore + 'static>(
    store: Arc<S>,
) -> Result<EventRegistry<QmsEvent>, RegistryError> {
    Ok(EventRegistry::<QmsEvent>::builder()
        .register::<UserCertificateCreated, _>(
            USER_CERTIFICATE_CREATE,
            UserCertificateCreateHandler::new(store),
        )?
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_routes_certificate_create() {
        let registry = registry(Arc::new(InMemoryCertificateStore::new())).unwrap();

        assert_eq!(registry.event_types(), vec![USER_CERTIFICATE_CREATE]);
        let route = registry.resolve(USER_CERTIFICATE_CREATE).unwrap();
        assert_eq!(route.handler_name(), "UserCertificateCreateHandler");
    }
}
