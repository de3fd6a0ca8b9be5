//! Stack definitions.

pub mod emailer;

pub use emailer::{EmailerStack, EmailerStackProps, HandlerSpec};
