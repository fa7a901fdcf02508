//! Named cache groups and the registry that serves them

#[allow(clippy::module_inception)]
pub mod group;
pub mod loader;
pub mod registry;

pub use group::{Group, GroupBuilder};
pub use loader::{Getter, GetterFn};
pub use registry::GroupRegistry;
