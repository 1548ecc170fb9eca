//! Core types shared across the refetch facilities
//!
//! This crate provides the canonical field keys and event names used by the
//! structured logging macros in `refetch-core` and by the reference engine in
//! `refetch-store`.

pub mod schema;
