//! # Interlink Types
//!
//! Shared type definitions for interlink.
//!
//! Kept separate from the client so that route layers translating failures
//! into HTTP responses can depend on the taxonomy alone.

// ============================================================================
// Error Types
// ============================================================================

pub mod error;

pub use error::{Error, Result};

// ============================================================================
// Registry Entities
// ============================================================================

pub mod endpoint;

pub use endpoint::{ServiceEndpoint, ServiceStatus};

// ============================================================================
// Wire Format
// ============================================================================

pub mod envelope;

pub use envelope::{
    ENCRYPTED_PAYLOAD_HEADER, ENCRYPTION_SERVICE_HEADER, EncryptedEnvelope, SERVICE_NAME_HEADER,
    TARGET_SERVICE_HEADER,
};
