//! HTTP and WebSocket surface (spec §6): one module per route group,
//! mirroring the teacher's `http::{streams, races, admin, ...}` layout.

pub mod admin;
pub mod events;
pub mod metrics;
pub mod response;
pub mod status;
pub mod ws;
