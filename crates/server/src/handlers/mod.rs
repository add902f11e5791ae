//! HTTP request handlers.

pub mod archival;
pub mod chunks;
pub mod health;
pub mod nodes;

pub use archival::*;
pub use chunks::*;
pub use health::*;
pub use nodes::*;
