//! In-process runtime: engines and workers wired through channels.
//!
//! - [`Runtime`] — Runs every engine and worker until shutdown
//! - [`RuntimeBuilder`] — Registers tasks and workflows, sets the configuration
//! - [`RuntimeHandle`] — Sends commands and reads engine states while running
//! - [`RuntimeConfig`] — Partitions, concurrency, caching, shutdown timeout
//!
//! # Example
//!
//! ```ignore
//! use tideflow::runtime::{Runtime, RuntimeConfig};
//!
//! let runtime = Runtime::builder(PgStore::new(pool))
//!     .task("email", email_task())
//!     .workflow(Onboarding)
//!     .config(RuntimeConfig::default())
//!     .build()?;
//!
//! let handle = runtime.handle();
//! runtime.run(shutdown_signal).await?;
//! ```

mod builder;
mod config;
mod lanes;
mod workers;

pub use builder::{Runtime, RuntimeBuilder, RuntimeHandle};
pub use config::RuntimeConfig;
