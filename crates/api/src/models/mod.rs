pub mod event;
pub mod project;

pub use event::*;
pub use project::*;
