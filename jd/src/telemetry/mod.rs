//! Span tracing for RPC handlers and the scheduling loop
//!
//! The [`Tracer`] is the tracing handle carried in the dependency bundle.

mod tracer;

pub use tracer::{ActiveSpan, SpanRecord, SpanStatus, Tracer, TracerError, read_spans};
