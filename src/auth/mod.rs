//! Authentication: JWT tokens, blacklist and middleware

pub mod blacklist;
pub mod jwt;
pub mod middleware;

pub use blacklist::{BlacklistedToken, MemoryTokenBlacklist, RevocationMeta, TokenBlacklistStore};
pub use jwt::{Claims, JwtService, TokenPair, TokenRejection, TokenType};
pub use middleware::{extract_token, jwt_auth_middleware, require_admin_middleware, AuthContext};
