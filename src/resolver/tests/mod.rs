//! Tests for the resolver
//!
//! Organized by guarantee

mod helpers;

mod cleanup_tests;
mod propagation_tests;
