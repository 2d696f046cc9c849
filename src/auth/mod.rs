//! Authentication for CareCircle
//!
//! Provides:
//! - JWT session tokens (access and refresh)
//! - Password hashing with Argon2
//! - Bearer resolution into an authenticated user
//! - Account flows that end in a session
//! - Remembered devices that trade a rotating token for a session

pub mod account;
pub mod device;
pub mod jwt;
pub mod password;
pub mod session;

pub use account::{issue_session, Session};
pub use jwt::{extract_token_from_header, Claims, JwtValidator, TokenInput, TokenKind, TokenValidationResult};
pub use password::{hash_password, verify_password};
pub use session::{authenticate, AuthUser};
