//! Integration tests against PostgreSQL.
//!
//! Each test runs in its own database; see `test_utils::db`.

mod runtime;
mod store;
