//! Lokstra — a service/router/deployment kernel over Axum.
//!
//! This is a thin facade over [`lokstra_core`]: a lazy-DI service registry,
//! a convention-driven auto-router, a pluggable-listener app shell with
//! graceful shutdown, and a transparent local-vs-remote proxy. Pull
//! everything a service needs with:
//!
//! ```ignore
//! use lokstra::prelude::*;
//! ```

pub use lokstra_core;
pub use lokstra_core::*;

/// Unified prelude — `use lokstra::prelude::*`.
pub mod prelude {
    pub use lokstra_core::prelude::*;
}
