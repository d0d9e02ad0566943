//! # lexbridge-shared
//!
//! Types shared by every LexBridge crate: identifiers and status enums, the
//! identity token consumed at connect time, the gateway wire protocol, and
//! common constants.

pub mod constants;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod types;
