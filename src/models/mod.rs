pub mod candidate;
pub mod query;

pub use candidate::*;
pub use query::*;
