//! Route handlers, one module per resource.

pub mod bookings;
pub mod health;
pub mod metrics;
pub mod orders;
pub mod sagas;
pub mod slots;

use std::str::FromStr;

use crate::error::ApiError;

/// Parses a UUID path segment into a typed id.
pub(crate) fn parse_id<T: FromStr>(kind: &str, raw: &str) -> Result<T, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {kind} id: {raw}")))
}
