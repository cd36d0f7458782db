//! Core execution algorithm and semantic runtime for W3C SCXML state charts.
//!
//! A chart (`chart`) is built once, in-process, via `ChartBuilder` — there is no XML
//! document loader here — and then driven by one or more `Session`s (`session`),
//! each its own single-threaded macrostep loop per W3C Appendix D. Sessions talk to
//! each other, and to the outside world, only by passing `Event`s through
//! `EventIOProcessor` implementations (`event_io_processor`); there is no shared
//! mutable state between sessions.

pub mod chart;
pub mod collections;
pub mod configuration;
pub mod datamodel;
#[cfg(feature = "ECMAScriptModel")]
pub mod ecma_datamodel;
pub mod error;
pub mod event;
pub mod event_io_processor;
pub mod executable_content;
pub mod executor;
pub mod invoke;
pub mod scheduler;
pub mod selector;
pub mod session;
