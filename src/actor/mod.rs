//! Actor layer - process actors, their loops and the system runner

pub mod log_view;
pub mod loops;
pub mod message;
pub mod process;
pub mod runner;

pub use log_view::*;
pub use loops::*;
pub use message::*;
pub use process::*;
pub use runner::*;
