pub mod error;
pub mod parser;
pub mod taxonomy;
pub mod utils;

pub use error::{Result, TaxonomyError};
pub use taxonomy::Taxonomy;
