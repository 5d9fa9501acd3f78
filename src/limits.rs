//! Hard caps on input sizes and store growth.

/// Max bytes in a booking's service label.
pub const MAX_SERVICE_LABEL_LEN: usize = 512;

/// Max live bookings held by a single provider.
pub const MAX_BOOKINGS_PER_PROVIDER: usize = 100_000;

/// Max bytes in one request line of the line protocol.
pub const MAX_LINE_LEN: usize = 64 * 1024;

/// Max bytes in an identity's display name.
pub const MAX_NAME_LEN: usize = 256;

/// Max bytes in an identity's email address.
pub const MAX_EMAIL_LEN: usize = 320;
