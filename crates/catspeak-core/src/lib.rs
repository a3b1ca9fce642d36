//! Core types and logic for catspeak.
//!
//! This crate provides the reversible "cat speak" text codec and the shared
//! protocol types used by the CLI and the assistant daemon.
//!
//! # Modules
//!
//! - [`alphabet`]: The digit/symbol substitution table and escape marker
//! - [`codec`]: Text to symbol-string encoding and its inverse
//! - [`error`]: Codec errors and protocol error types with suggestions
//! - [`protocol`]: JSON-line request/response protocol
//!
//! # Encoding
//!
//! Every UTF-8 byte becomes four base-4 digits, least significant first.
//! Triples of equal digits collapse to `digit~`, then each digit is swapped
//! for its symbol:
//!
//! | Digit | Symbol |
//! |-------|--------|
//! | `0`   | `喵`   |
//! | `1`   | `呜`   |
//! | `2`   | `咪`   |
//! | `3`   | `嗷`   |
//!
//! ```
//! use catspeak_core::codec::{decode, encode};
//!
//! let cat = encode("A");
//! assert_eq!(cat, "呜喵喵呜");
//! assert_eq!(decode(&cat).unwrap(), "A");
//! ```

pub mod alphabet;
pub mod codec;
pub mod error;
pub mod protocol;
