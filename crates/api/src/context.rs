use std::convert::Infallible;
use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::{HeaderMap, request::Parts};

use multibpo_auth::JwtClaims;
use multibpo_core::AccountId;
use multibpo_quota::ClientMetadata;

/// Authenticated account for a request, derived from the bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrincipalContext {
    account_id: AccountId,
}

impl PrincipalContext {
    pub fn new(account_id: AccountId) -> Self {
        Self { account_id }
    }

    pub fn from_claims(claims: &JwtClaims) -> Self {
        Self::new(claims.sub)
    }

    pub fn account_id(&self) -> AccountId {
        self.account_id
    }
}

/// Client IP and user agent, captured for the question log.
///
/// The IP is the first `X-Forwarded-For` hop, then `X-Real-IP`, then the
/// socket peer when the server runs with connect info.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientContext(pub ClientMetadata);

impl ClientContext {
    pub fn ip_address(&self) -> Option<IpAddr> {
        self.0.ip_address
    }

    pub fn into_metadata(self) -> ClientMetadata {
        self.0
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());

        Ok(ClientContext(ClientMetadata {
            ip_address: client_ip(&parts.headers).or(peer),
            user_agent: header_str(&parts.headers, axum::http::header::USER_AGENT.as_str())
                .unwrap_or_default()
                .to_string(),
        }))
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn client_ip(headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(forwarded) = header_str(headers, "x-forwarded-for") {
        if let Some(ip) = forwarded.split(',').next().and_then(|s| s.trim().parse().ok()) {
            return Some(ip);
        }
    }
    header_str(headers, "x-real-ip").and_then(|s| s.trim().parse().ok())
}
