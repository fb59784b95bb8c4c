//! Shared helpers for tideflow integration tests.

pub mod db;
