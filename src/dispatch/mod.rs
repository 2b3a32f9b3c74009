//! Dispatch Module
//!
//! The facade queries enter through. `Dispatcher::get_search_invoker` chooses the nodes
//! a query runs on and hands back an invoker ready to search them.
//!
//! ## Submodules
//! - **`dispatcher`**: `Dispatcher`, group selection with retry.
//! - **`search_path`**: Parser and evaluator of `NODES/GROUPS` overrides.

pub mod dispatcher;
pub mod search_path;

#[cfg(test)]
mod tests;

use crate::error::DispatchError;

pub type Result<T> = std::result::Result<T, DispatchError>;
