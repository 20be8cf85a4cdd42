pub mod class;
pub mod common;
pub mod error;
pub mod instance;
pub mod schema;

pub use class::*;
pub use common::*;
pub use error::*;
pub use instance::*;
pub use schema::*;
