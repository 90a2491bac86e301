//! Ambient runtime concerns shared by the server and worker binaries:
//! cooperative shutdown coordination and a token-bucket rate limiter.

pub mod rate_limiter;
pub mod shutdown;
