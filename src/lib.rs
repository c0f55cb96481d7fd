//! Core services of the Hive engine: a tagged message bus, a lazy
//! resource loader, and the object event table driven by rooms.

pub mod engine;
pub mod error;
pub mod messenger;
pub mod object;
