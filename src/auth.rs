use axum::{
    extract::{ConnectInfo, FromRef, FromRequestParts, OptionalFromRequestParts},
    http::{header, request::Parts},
};
use std::{
    convert::Infallible,
    net::{IpAddr, SocketAddr},
};

use crate::{
    config::AppConfig,
    error::ApiError,
    review::Actor,
    session::{SessionError, SessionManager},
    token::{Role, TokenError},
};

/// AuthUser
///
/// The resolved identity of an authenticated request. `token` is kept so
/// logout can blacklist exactly the credential that was presented.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub role: Role,
    pub token: String,
}

impl AuthUser {
    pub fn can_upload(&self) -> bool {
        self.role.can_upload()
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn actor(&self) -> Actor {
        Actor {
            id: self.id,
            role: self.role,
        }
    }
}

/// AuthUser Extractor Implementation
///
/// Pulls the Bearer token from the Authorization header and runs it through
/// `SessionManager::validate` (signature, expiry, blacklist). Any failure
/// rejects the request before the handler runs: 401 for a bad credential,
/// 503 when the blacklist cannot be consulted.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    SessionManager: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let sessions = SessionManager::from_ref(state);

        let token = bearer_token(parts)
            .ok_or(ApiError::Session(SessionError::Malformed(TokenError::Malformed)))?;

        let claims = sessions.validate(token).await?;

        Ok(AuthUser {
            id: claims.sub,
            role: claims.role,
            token: token.to_string(),
        })
    }
}

/// Optional variant for routes that also serve anonymous callers. A missing
/// Authorization header yields `None`; a present but invalid one still rejects.
impl<S> OptionalFromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    SessionManager: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &S,
    ) -> Result<Option<Self>, Self::Rejection> {
        if !parts.headers.contains_key(header::AUTHORIZATION) {
            return Ok(None);
        }
        <AuthUser as FromRequestParts<S>>::from_request_parts(parts, state)
            .await
            .map(Some)
    }
}

/// ClientIp
///
/// Client address for login throttling. Forwarding headers are only believed
/// when the socket peer is a configured trusted proxy; otherwise the peer
/// itself is the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientIp(pub String);

impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
    AppConfig: FromRef<S>,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Some(peer) = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip())
        else {
            return Ok(ClientIp("unknown".to_string()));
        };

        let config = AppConfig::from_ref(state);
        let ip = if config.trusted_proxies.contains(&peer) {
            forwarded_client(parts, &config.trusted_proxies).unwrap_or(peer)
        } else {
            peer
        };

        Ok(ClientIp(ip.to_string()))
    }
}

/// Walks `x-forwarded-for` from the nearest hop outwards and returns the first
/// address that is not a trusted proxy, falling back to `x-real-ip`.
fn forwarded_client(parts: &Parts, trusted: &[IpAddr]) -> Option<IpAddr> {
    let header = |name: &str| {
        parts
            .headers
            .get(name)
            .and_then(|value| value.to_str().ok())
    };

    let hops: Vec<IpAddr> = header("x-forwarded-for")
        .map(|value| {
            value
                .split(',')
                .filter_map(|hop| hop.trim().parse().ok())
                .collect()
        })
        .unwrap_or_default();

    hops.iter()
        .rev()
        .find(|hop| !trusted.contains(hop))
        .or_else(|| hops.first())
        .copied()
        .or_else(|| header("x-real-ip").and_then(|value| value.trim().parse().ok()))
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}
