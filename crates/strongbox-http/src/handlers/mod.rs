//! Admin HTTP handlers, grouped by resource.

pub mod backup;
pub mod health;
pub mod restore;

pub use backup::*;
pub use health::*;
pub use restore::*;
