#![forbid(unsafe_code)]

pub mod notifier;
pub mod policy;
pub mod registry;
pub mod service;
