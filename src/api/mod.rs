//! Admin/control surface and worker intake.
//!
//! [`facade::AdminApi`] is the transport-agnostic entry point every
//! admin operation and worker report goes through; [`http`] exposes the
//! small local ops endpoint (health and system status) over axum.

pub mod facade;
pub mod http;

pub use facade::AdminApi;
