//! Hard caps on stored data. Exceeding one is a validation error, never a panic.

/// Open (`Pending` or `Assigned`) appointments; finished ones are not counted.
pub const MAX_APPOINTMENTS: usize = 1_000_000;
pub const MAX_SERVICE_LEN: usize = 100;
pub const MAX_CUSTOMER_NAME_LEN: usize = 200;
/// Largest accepted HTTP request body, in bytes.
pub const MAX_BODY_BYTES: usize = 16 * 1024;
