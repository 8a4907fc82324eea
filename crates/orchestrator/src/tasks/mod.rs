//! Concrete lifecycle tasks.

mod resume;

pub use resume::ResumeUniverse;
