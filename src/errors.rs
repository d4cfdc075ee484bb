//! Error Types
//!
//! This module defines the error types used throughout the crate.
//!
//! # Overview
//!
//! The main error type [`SigilError`] covers every failure mode of the
//! binding core:
//! - Layout errors (unknown type names, cyclic or malformed structs)
//! - Registration errors (missing callbacks, conflicting struct names)
//! - Runtime value errors (bounded collections rejecting inserts)
//! - Resource management errors (lookups, native object creation, readback)
//!
//! Layout and construction errors abort the operation without registering a
//! partial object. Runtime value errors are logged by the caller-facing API
//! and leave the previous state untouched.
//!
//! # Usage
//!
//! All fallible APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, SigilError>`.
//!
//! ```rust,ignore
//! use sigil::errors::{SigilError, Result};
//!
//! fn build() -> Result<()> {
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The main error type for the binding core.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigilError {
    // ========================================================================
    // Layout Errors
    // ========================================================================
    /// A type name could not be resolved during layout computation.
    #[error("Invalid type: {0}")]
    InvalidType(String),

    // ========================================================================
    // Registration Errors
    // ========================================================================
    /// A subscription call was made without a callback.
    #[error("Missing callback for `{0}`")]
    MissingCallback(&'static str),

    /// A struct was registered under a name that is already taken.
    #[error("Struct `{0}` is already registered")]
    SchemaConflict(String),

    /// A binding was used before a bind group layout assigned its slot.
    #[error("Binding `{0}` has not been placed in a bind group layout")]
    UnplacedBinding(String),

    // ========================================================================
    // Runtime Value Errors
    // ========================================================================
    /// A bounded collection rejected an insert.
    #[error("Capacity exceeded for {what} (capacity: {capacity})")]
    CapacityExceeded {
        /// Description of the collection that is full
        what: String,
        /// The fixed capacity of the collection
        capacity: usize,
    },

    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// A lookup by id or name found nothing.
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// The backend could not create a native object.
    #[error("Failed to create GPU resource: {0}")]
    ResourceCreation(String),

    /// A bind group value does not satisfy its layout binding.
    #[error("Binding mismatch for `{binding}`: {reason}")]
    BindingMismatch {
        /// Name of the layout binding
        binding: String,
        /// What went wrong
        reason: String,
    },

    /// A buffer readback failed.
    #[error("Buffer readback failed: {0}")]
    Readback(String),
}

/// Alias for `Result<T, SigilError>`.
pub type Result<T> = std::result::Result<T, SigilError>;
