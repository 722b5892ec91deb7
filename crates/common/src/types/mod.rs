mod classification;
mod extraction;
mod hierarchy;
mod import;
mod metadata;
mod node;
mod search;
mod similarity;
mod taxonomy;

pub use classification::*;
pub use extraction::*;
pub use hierarchy::*;
pub use import::*;
pub use metadata::*;
pub use node::*;
pub use search::*;
pub use similarity::*;
pub use taxonomy::*;
