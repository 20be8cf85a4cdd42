pub mod memory;
pub mod registry;
pub mod relationship_cache;
pub mod traits;

pub use memory::*;
pub use registry::*;
pub use relationship_cache::*;
pub use traits::*;
