//! Core types of the runner: events, notifications, prompts, errors

pub mod constant;
pub mod error;
pub mod event;
pub mod identity;
pub mod notification;
pub mod prompt;
pub mod retry;
pub mod system;
