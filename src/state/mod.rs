//! State module for tracking campaign progress
//!
//! # Components
//!
//! - `SessionStatus`: Lifecycle of a whole extraction session
//! - `ExtractionStatus`: Lifecycle of a single URL within a session
//! - `ErrorType`: Failure category persisted with failed attempts

mod error_type;
mod extraction_status;
mod session_status;

// Re-export main types
pub use error_type::ErrorType;
pub use extraction_status::ExtractionStatus;
pub use session_status::SessionStatus;
