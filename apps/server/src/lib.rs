//! DeepMed server library: the axum HTTP surface over the core pipeline.

pub mod http;
