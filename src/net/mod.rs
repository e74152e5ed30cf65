//! Network address helpers: trusted-CIDR sets and client IP resolution.

pub mod cidr;
pub mod client_ip;

pub use cidr::CidrSet;
pub use client_ip::IpResolver;
