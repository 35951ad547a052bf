//! SeaORM entities of the networked store.

pub mod job;

pub use job::Entity as Job;
