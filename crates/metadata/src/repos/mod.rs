//! Repository traits for node store operations.

pub mod nodes;
pub mod objects;

pub use nodes::NodeRepo;
pub use objects::ObjectRepo;
