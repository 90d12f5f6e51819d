//! Storage plumbing shared by the rustaurant services: typed identifiers,
//! versioned document metadata, and the transactional document store.

pub mod documents;
pub mod ids;
pub mod persistence;
pub mod untyped_ids;
