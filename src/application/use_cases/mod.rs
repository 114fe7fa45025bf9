mod cross_link;
mod deep_research;
mod generate_wiki;
mod index_repository;
mod search_index;
mod see_also;
mod source_refs;

pub use cross_link::*;
pub use deep_research::*;
pub use generate_wiki::*;
pub use index_repository::*;
pub use search_index::*;
pub use see_also::*;
pub use source_refs::*;
