//! A forward proxy that rewrites outbound requests by injecting,
//! replacing, or stripping HTTP headers derived from per-request data
//! gathered from a pluggable set of data sources.
//!
//! Control flow per request: [`proxy`] selects a [`rules::Match`] via
//! [`rules::select`], evaluates its data sources via
//! [`resolver::resolve`], expands header templates via
//! [`header_builder::HeaderBuilder`], then mutates and forwards the
//! request.

pub mod config;
pub mod datasources;
pub mod errors;
pub mod header_builder;
pub mod proxy;
pub mod resolver;
pub mod rules;
