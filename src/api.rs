//! HTTP handlers of the client API and the worker API.
pub mod compose;
pub mod utils;
pub mod worker;
