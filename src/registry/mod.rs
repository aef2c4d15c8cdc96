//! Backend registration: records, the keyed store, and the path router

mod registration;
mod router;
mod store;

pub use registration::{hash_fields, Registration, StatusProbe};
pub use router::PathRouter;
pub use store::{Registry, REGISTRY_ITEMS};
