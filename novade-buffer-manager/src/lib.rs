//! # Novade Buffer Manager
//!
//! This crate provides the render buffer type shared by the NovaDE scan-out
//! components. A [`RenderBuffer`] describes a block of pixel memory and carries
//! a typed capability table that other subsystems extend: exporters that hand
//! out derived objects (GEM handles, kernel framebuffer ids) and destructors
//! that release those objects together with the buffer.

pub mod buffer;

// Re-export key types for convenience.
pub use buffer::{BufferFormat, BufferId, Exporter, ObjectKind, RenderBuffer};
