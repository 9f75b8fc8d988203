//! Database module: write models and SQL repositories.
//!
//! - `model`: borrowed row shapes for inserts.
//! - `repo`: SQL-only functions over the `instagram_accounts` and
//!   `instagram_posts` tables.
//!
//! External modules should import from `ig_ingest::db`; the repository API is
//! re-exported here.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::{NewAccount, NewPost};
