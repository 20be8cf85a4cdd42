pub mod accessors;
pub mod collection;
pub mod deferred;
pub mod mutation;
pub mod query;
pub mod relationship_schema;
pub mod session;

pub use collection::*;
pub use deferred::*;
pub use query::{FetchPlan, Lookup};
pub use relationship_schema::*;
pub use session::Session;
