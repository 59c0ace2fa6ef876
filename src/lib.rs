//! Purpose: Crash-safe persistent map from FIX session id to last sequence number.
//! Exports: `api` (stable public surface).
//! Role: Consumed by a gateway that must know, after a restart, the last
//! inbound/outbound sequence number per session without replaying its archive.
//! Invariants: Single writer per index; durability comes from checksummed
//! sectors plus an atomic three-rename file flip through a passing place.
pub mod api;
mod core;
