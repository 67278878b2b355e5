#[cfg(test)]
#[macro_use]
extern crate quickcheck;

pub mod compose;
pub mod config;
pub mod error;
pub mod host;
pub mod ident;
pub mod lifecycle;
pub mod limits;
pub mod logger;
pub mod password;
pub mod quantity;
pub mod registry;
pub mod runtime;
pub mod storage;
pub mod teardown;
pub mod utils;
