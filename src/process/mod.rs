//! Process core: the application and the readers it keeps over upstream logs

pub mod application;
pub mod reader;

pub use application::*;
pub use reader::*;
