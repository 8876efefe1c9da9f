//! # Auth Token Codec
//!
//! Signs and verifies the two token kinds issued by `gardi`:
//!
//! - **Access tokens** carry the subject plus resolved `roles`/`permissions`
//!   and are short-lived bearer credentials.
//! - **Refresh tokens** carry only the subject; their single power is to mint
//!   a new pair through rotation.
//!
//! Both are compact HS256 JWTs signed with independent symmetric keys so a
//! leaked access key can never forge refresh material. The `jti` stamped into
//! a refresh token is reused as the `jti` of the access token minted with it,
//! which is what lets the session layer bind the pair to one lineage row.

mod error;
mod jwt;

pub use error::Error;
pub use jwt::{Claims, TokenCodec, TokenType};
