//! API layer for clinicqd

pub mod rest;

pub use rest::router::create_router;
