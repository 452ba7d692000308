use clap::ValueEnum;
use warp::http::header::{
    HeaderMap, HeaderValue, ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
    ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
};

/// The fixed CORS header set stamped on every response, preflight or not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CorsPolicy {
    /// Any origin, the methods and headers the client uses.
    Standard,
    /// As `standard`, but with credentials allowed and a wider header list.
    Credentials,
}

const CREDENTIALED_HEADERS: &str = "X-CSRF-Token, X-Requested-With, Accept, Accept-Version, \
    Content-Length, Content-MD5, Content-Type, Date, X-Api-Version, Authorization";

impl CorsPolicy {
    pub fn apply(self, headers: &mut HeaderMap) {
        let (methods, allowed) = match self {
            Self::Standard => ("GET, POST, PUT, DELETE, OPTIONS", "Content-Type, Authorization"),
            Self::Credentials => ("GET,OPTIONS,PATCH,DELETE,POST,PUT", CREDENTIALED_HEADERS),
        };

        if self == Self::Credentials {
            headers.insert(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
        headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
        headers.insert(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::from_static(methods));
        headers.insert(ACCESS_CONTROL_ALLOW_HEADERS, HeaderValue::from_static(allowed));
    }
}
