pub mod registry;
#[allow(clippy::module_inception)]
pub mod schema;
pub mod taxonomy;
