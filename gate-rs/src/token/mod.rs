//! Bearer tokens for users and guests
//!
//! Access and refresh tokens are signed with distinct HS256 keys, and each
//! family is refused where the other is expected. There is no revocation
//! list: a token stops working when it expires or its session ends.

pub mod authority;
pub mod types;

pub use authority::TokenAuthority;
pub use types::{Claims, IssuedToken, TokenPair, TokenSubject, TokenUse};
