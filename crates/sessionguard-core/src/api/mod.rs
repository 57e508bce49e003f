//! HTTP side of the session layer.
//!
//! This module provides the `RequestPipeline` that every authenticated call
//! goes through, the `ApiResponse` it yields, and the wire types of the
//! auth service.
//!
//! The service authenticates requests with a bearer access token and
//! protects state-changing calls with an `X-CSRF-Token` header.

pub mod error;
pub mod pipeline;
pub mod response;
pub mod types;

pub use error::ApiError;
pub use pipeline::{RequestOptions, RequestPipeline};
pub use response::ApiResponse;
pub use types::{LoginResponse, RefreshTokenResponse, SignupResponse, UserIdentity};
