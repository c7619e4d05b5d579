//! Search execution.
//!
//! [`SearchExecutor`] pairs an [`ExpressionCompiler`](crate::compiler::ExpressionCompiler)
//! with a [`SearchClient`] for the same backend and drives paging, counting
//! and continuation tokens on top of them.

pub mod client;
pub mod executor;

pub use client::{Projection, QueryPage, SearchClient};
pub use executor::SearchExecutor;
