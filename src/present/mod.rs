//! Presentation
//!
//! The dedicated presentation queue and its per-frame callback registry.

pub mod presentation;

pub use presentation::PresentationManager;
