// src/dag/mod.rs

//! Repository dependency graph.
//!
//! Edges are never stored: [`graph::DependencyGraph`] derives
//! "dependent -> base" relations from the registry on every resolution.

pub mod graph;

pub use graph::{DependencyGraph, Resolution, Visited};
