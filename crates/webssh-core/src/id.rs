//! Session identifiers.

/// Opaque session handle handed to external callers.
pub type SessionId = String;

/// Generate a fresh random session ID (UUID v4, hyphenated).
pub fn generate_session_id() -> SessionId {
    uuid::Uuid::new_v4().to_string()
}
