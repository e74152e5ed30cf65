//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (YAML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → Config (validated, immutable)
//!     → shared via Arc to all subsystems
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; there is no reload path
//! - All fields have defaults so minimal configs stay minimal
//! - Validation separates syntactic (serde) from semantic checks and
//!   reports every violation at once rather than the first

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, ConfigError};
pub use schema::{
    AuthConfig, Config, RateLimitBackendConfig, RouteConfig, ServerConfig, UpstreamConfig,
};
