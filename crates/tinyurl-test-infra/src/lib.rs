//! Test fixtures for the tinyurl crates: disposable PostgreSQL and Redis
//! containers, plus scriptable in-memory fakes of the backend contracts.

pub mod error;
pub mod fake;
pub mod postgres;
pub mod redis;

pub use error::{Result, TestInfraError};
