mod node;
mod task;
mod universe;

pub use node::*;
pub use task::*;
pub use universe::*;
