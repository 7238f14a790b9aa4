#![forbid(unsafe_code)]

pub mod filter;
pub mod record;
pub mod repo;
pub mod store;
