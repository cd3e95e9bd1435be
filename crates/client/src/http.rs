//! Requests, responses, and the [`Transport`] seam.
//!
//! The client never talks to the network itself. Every request goes through
//! a [`Transport`], which turns an [`ApiRequest`] into an [`ApiResponse`].
//! A transport returns `Ok` for every response it receives, whatever the
//! status; `Err` is reserved for requests that produced no response at all.

use std::{collections::BTreeMap, fmt, sync::Arc};

use async_trait::async_trait;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::{ClientError, Result};

/// Name of the authorization header. Header names are stored lowercase.
pub const AUTHORIZATION: &str = "authorization";

/// Scheme prefix of bearer authorization values.
pub const BEARER_PREFIX: &str = "Bearer ";

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        })
    }
}

/// An outbound request, relative to the client's origin.
#[derive(Clone, PartialEq)]
pub struct ApiRequest {
    /// Method.
    pub method: Method,
    /// Path relative to the origin, such as `account/token/refresh`.
    pub path: String,
    /// Headers, keyed by lowercase name.
    pub headers: BTreeMap<String, String>,
    /// JSON body.
    pub body: Option<serde_json::Value>,
}

impl ApiRequest {
    /// Creates a request without headers or body.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), headers: BTreeMap::new(), body: None }
    }

    /// Creates a `GET` request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// Creates a `POST` request with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] if `body` cannot be serialized.
    pub fn post(path: impl Into<String>, body: &impl Serialize) -> Result<Self> {
        Ok(Self::new(Method::Post, path).with_body(serde_json::to_value(body)?))
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets a header, replacing any previous value.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_header(name, value);
        self
    }

    /// Sets a header, replacing any previous value.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Removes a header.
    pub fn remove_header(&mut self, name: &str) -> Option<String> {
        self.headers.remove(&name.to_ascii_lowercase())
    }

    /// Returns a header value.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Returns the bearer token carried in the authorization header.
    #[must_use]
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.header(AUTHORIZATION)?;
        let (scheme, token) = value.split_once(' ')?;
        scheme.eq_ignore_ascii_case(BEARER_PREFIX.trim_end()).then(|| token.trim())
    }
}

impl fmt::Debug for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let headers: Vec<&str> = self.headers.keys().map(String::as_str).collect();
        f.debug_struct("ApiRequest")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("headers", &headers)
            .finish_non_exhaustive()
    }
}

/// A response received from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Headers, keyed by lowercase name.
    pub headers: BTreeMap<String, String>,
    /// JSON body, if any.
    pub body: Option<serde_json::Value>,
}

impl ApiResponse {
    /// Creates a response with a status and no body.
    #[must_use]
    pub fn with_status(status: u16) -> Self {
        Self { status, headers: BTreeMap::new(), body: None }
    }

    /// Creates a `200` response with a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] if `body` cannot be serialized.
    pub fn ok(body: &impl Serialize) -> Result<Self> {
        Ok(Self::with_status(200).with_body(serde_json::to_value(body)?))
    }

    /// Sets the JSON body.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Returns `true` for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Deserializes the body.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Decode`] if the body is missing or does not
    /// match `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let body = self.body.clone().unwrap_or(serde_json::Value::Null);
        Ok(serde_json::from_value(body)?)
    }
}

/// Sends requests to the server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends `request` and returns the response, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if no response was received.
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn send(&self, request: ApiRequest) -> Result<ApiResponse> {
        (**self).send(request).await
    }
}

/// The signed-in user as reported by the token endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedInUser {
    /// Account id.
    pub id: i64,
    /// Login name.
    pub username: String,
    /// Role names.
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Body of the generate endpoint.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SigninRequest<'a> {
    /// Login name.
    pub username: &'a str,
    /// Password.
    pub password: &'a str,
}

/// Body of the refresh and revoke endpoints.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest<'a> {
    /// The refresh token.
    pub refresh_token: &'a str,
}

/// Body returned by the generate and refresh endpoints.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    /// Token scheme, `"Bearer"`.
    pub token_type: String,
    /// Access token.
    pub access_token: String,
    /// Access token lifetime in milliseconds.
    pub access_token_expires_in: i64,
    /// Refresh token.
    pub refresh_token: String,
    /// Refresh token lifetime in milliseconds.
    pub refresh_token_expires_in: i64,
    /// The signed-in user.
    pub user: SignedInUser,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("token_type", &self.token_type)
            .field("access_token_expires_in", &self.access_token_expires_in)
            .field("refresh_token_expires_in", &self.refresh_token_expires_in)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}
