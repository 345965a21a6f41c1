//! Command implementations

pub mod alias;
pub mod sync;
