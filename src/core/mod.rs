pub mod error;
pub mod geometry;
pub mod model;

pub use error::TableFuseError;
