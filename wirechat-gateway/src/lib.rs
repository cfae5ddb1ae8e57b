//! `WireChat` event gateway library.
//!
//! Exposes the gateway server for embedding in tests and for the
//! standalone binary. The gateway authenticates WebSocket sessions and
//! routes published events between users; it never interprets message
//! content.

pub mod config;
pub mod gateway;
