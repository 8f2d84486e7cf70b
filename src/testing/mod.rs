//! Test doubles for the pipeline's seams: an adapter that replays a
//! script, a telemetry sink that records, and a VIN decoder that counts
//! calls. Nothing in the pipeline itself constructs these.

mod adapter;
mod decoder;
mod telemetry;

pub use adapter::ScriptedAdapter;
pub use decoder::CountingDecoder;
pub use telemetry::RecordingSink;
