//! Mod dependency resolution and installation for a game launcher.
//!
//! # Usage
//! 1. Build a [`ManagerOptions`] describing the game's directories and version.
//! 1. Open a [`ModSession`] with a [`registry::Registry`] implementation such as [`registry::PortalRegistry`].
//! 1. Use [`ModManager::expand_dependencies`] to turn a set of requirements into the full transitive set.
//! 1. [`ModManager::check_dependency_set`] to plan the enable/disable/install/switch actions.
//! 1. [`ModManager::apply_actions`] to carry them out.
//! 1. Drop or [`ModSession::close`] the session to persist the mod list.

pub mod error;
pub use error::Result;
pub use error::Error;

pub mod config;
pub use config::ManagerOptions;

pub mod version;
pub mod dependency;
pub mod package;
pub mod registry;
pub mod ledger;
pub mod manager;
pub use manager::ModManager;
pub use manager::ModSession;
