//! Pipeline State Caching
//!
//! The on-disk pipeline library cache. PSO and root-signature databases
//! themselves live with the consuming application; the engine only keeps
//! the serialized library file warm.

pub mod library;

pub use library::PsoLibrary;
