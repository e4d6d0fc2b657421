//! Integration tests: the engine against in-memory collaborators and the
//! streaming feeds against a local WebSocket server.

mod engine_flow;
mod feed_stream;
mod support;
