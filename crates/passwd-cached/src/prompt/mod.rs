//! Interaction backends.
//!
//! This module provides implementations of the [`InteractionController`]
//! trait:
//!
//! - [`CliInteraction`]: terminal dialogs (production, headless)
//! - [`MockInteraction`]: scriptable mock for testing
//!
//! [`InteractionController`]: passwd_cache_core::InteractionController

mod cli;
mod mock;

pub use cli::CliInteraction;
pub use mock::MockInteraction;
