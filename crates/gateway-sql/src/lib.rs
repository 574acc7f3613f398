//! # gateway-sql
//!
//! SQL validation/rewriting and JSON<->SQL conversion for the tenant query
//! gateway.
//!
//! This crate provides:
//! - Parsing and rewriting tenant-submitted SQL using `sqlparser`
//! - Tenant isolation via virtual-view table-function substitution
//!   (`spans` -> `spans_v0(project_id = '…')`), not predicate injection
//! - Converting a structured query intent to SQL and back
//!
//! ## How It Works
//!
//! The validator rewrites every allowed table reference so the underlying
//! store enforces tenant scoping inside the view function itself:
//!
//! **Before (from the UI/agent):**
//! ```sql
//! SELECT span_id, name FROM spans WHERE status = 'OK'
//! ```
//!
//! **After (sent to storage):**
//! ```sql
//! SELECT span_id, name FROM spans_v0(project_id = 'tenant_a') WHERE status = 'OK'
//! ```

pub mod analyzer;
pub mod builder;
pub mod error;
pub mod validator;

pub use error::{BuilderError, ValidationError};
pub use validator::{validate_and_secure_query, LegacyValidator, ValidateAndSecureQuery, Validator};
