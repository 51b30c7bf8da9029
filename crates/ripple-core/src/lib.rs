//! Ripple core crate.
//!
//! This crate holds the pure half of the ripple protocol:
//!
//! - `template`: the immutable template tree built from literal statics
//!   interleaved with dynamic slots, and its serialization into the compact
//!   "parts tree" wire form.
//! - `diff`: the structural diff between two parts trees of matching shape,
//!   producing the minimal delta a connected client needs to patch itself.
//!
//! The critical design rule is that both halves are pure functions of their
//! inputs: rendering never mutates the template, and diffing never needs to
//! understand *why* a tree changed, only which keys did. Everything stateful
//! (sessions, component registries, transports) lives in `ripple-live`.

pub mod diff;
pub mod template;

pub use diff::{diff, diff_arrays};
pub use template::{escape_html, Dynamic, LiveTemplate};
