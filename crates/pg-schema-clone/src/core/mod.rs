//! Core types shared by every clone phase.

pub mod identifier;
pub mod request;
pub mod tenant;

pub use request::CloneRequest;
pub use tenant::derive_namespace_name;
