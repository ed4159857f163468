//! Shared type definitions for usersync.
//!
//! Every crate in the workspace identifies a player by [`PlayerKey`]. The
//! relational row types live next to the queries that produce them in
//! `usersync-db`; this crate only holds what both sides of the sync need.
//!
//! # Modules
//!
//! - [`key`] -- [`PlayerKey`] and the [`RecordLookup`] used by admin commands

pub mod key;

pub use key::{KeyParseError, PlayerKey, RecordLookup};
