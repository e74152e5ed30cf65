//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Compilation (at startup):
//!     RouteConfig[]
//!     → Route (parsed upstream URL, protection specs)
//!     → sort by descending prefix length
//!     → freeze as immutable RouteTable
//!
//! Incoming Request (path)
//!     → RouteTable::match_path (first prefix hit = longest match)
//!     → Return: matched Route or None (404)
//! ```
//!
//! # Design Decisions
//! - Routes compiled at startup, immutable at runtime; matching is lock-free
//! - No regex in the hot path (prefix matching only)
//! - Longest prefix wins; declaration order breaks ties

pub mod router;

pub use router::{strip_path, Route, RouteTable};
