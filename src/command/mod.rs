//! Command dispatch for connected sessions
//!
//! This module handles:
//! - Block reads and writes, synchronous and asynchronous
//! - Identify Controller / Identify Namespace
//! - Enumeration of sessions and their namespaces

mod dispatcher;
pub mod identify;

pub use dispatcher::{
    CommandDispatcher, IoCompletion, IoDirection, IoRequest, NamespaceEntry, RequestHandle,
};
pub use identify::{ControllerIdentify, IdentifyResult, NamespaceIdentify};
