mod task_info_repository;
mod universe_repository;

pub use task_info_repository::*;
pub use universe_repository::*;
