//! Service layer shared by the engine and front-ends

mod local_store;

pub use local_store::LocalStore;
