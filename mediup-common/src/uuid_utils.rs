//! Identifier utilities
//!
//! Session and file identifiers are opaque strings on the wire; new ones are
//! UUIDv4 in hyphenated form.

use uuid::Uuid;

/// Generate a new identifier (UUIDv4, hyphenated)
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}
