//! ---
//! mhe_section: "05-networking-external-interfaces"
//! mhe_subsection: "module"
//! mhe_type: "source"
//! mhe_scope: "code"
//! mhe_description: "HTTP Basic credential extraction."
//! mhe_version: "v0.0.0-prealpha"
//! mhe_owner: "tbd"
//! ---
use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use mhe_lifecycle::Credentials;

use crate::error::ApiError;

/// Target credentials carried in the `Authorization: Basic` header.
///
/// They are forwarded to the target validator untouched; the gateway keeps no
/// user store of its own.
pub struct BasicCredentials(pub Credentials);

#[axum::async_trait]
impl<S> FromRequestParts<S> for BasicCredentials
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .ok_or_else(|| ApiError::unauthorized("credentials required"))?;
        let header = header
            .to_str()
            .map_err(|_| ApiError::unauthorized("malformed authorization header"))?;
        parse_basic(header).map(BasicCredentials)
    }
}

fn parse_basic(header: &str) -> Result<Credentials, ApiError> {
    let malformed = || ApiError::unauthorized("malformed basic credentials");
    let (scheme, encoded) = header.trim().split_once(' ').ok_or_else(malformed)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(ApiError::unauthorized("unsupported authorization scheme"));
    }
    let decoded = STANDARD.decode(encoded.trim()).map_err(|_| malformed())?;
    let decoded = String::from_utf8(decoded).map_err(|_| malformed())?;
    let (username, password) = decoded.split_once(':').ok_or_else(malformed)?;
    if username.is_empty() {
        return Err(malformed());
    }
    Ok(Credentials::new(username, password))
}
