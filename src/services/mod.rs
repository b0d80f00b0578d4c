// Dining flow
pub mod carts;
pub mod orders;
pub mod qr_sessions;
pub mod tables;

// Settlement and loyalty
pub mod payments;
pub mod points;

pub mod customers;

// Shared helpers
pub mod qr_token;
pub mod session_locks;
pub mod vietqr;
