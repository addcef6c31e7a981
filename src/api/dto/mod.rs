//! Data Transfer Objects for REST request/response serialization.
//!
//! Domain and service types that already derive `Serialize` and
//! `ToSchema` are returned as-is inside [`ApiResponse`].

pub mod backup_dto;
pub mod common_dto;
pub mod email_dto;

pub use backup_dto::*;
pub use common_dto::*;
pub use email_dto::*;
