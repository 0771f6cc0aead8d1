//! Application services layer.

pub mod error;
pub mod fanout;
pub mod pagination;
pub mod repos;
pub mod timeline;
