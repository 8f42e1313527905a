//! Pipeline stages: consumer-and-producer composition.
//!
//! The only public API from this module is [`Processor`], a stage that
//! consumes an upstream stream, transforms each item, and republishes the
//! results to its own subscribers.

mod processor;

pub use processor::Processor;
