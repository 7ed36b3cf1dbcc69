//! Shared-secret authentication.
//!
//! Two credential schemes are supported:
//!
//! - **plain**: the client sends the raw secret in a custom header.
//! - **derived**: the client sends `hex(sha256(secret ++ salt))` as a bearer
//!   token, where the salt names the operation class. A token derived for
//!   share reads therefore never validates a sync write.
//!
//! The share export always takes a derived share token in the `psk` query
//! parameter.

use axum::http::{header, HeaderMap, HeaderName};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Default salt for sync-write tokens.
pub const DEFAULT_SYNC_SALT: &str = "kvsync-sync";
/// Default salt for share-read tokens.
pub const DEFAULT_SHARE_SALT: &str = "kvsync-share";
/// Default header carrying the raw secret under the plain scheme.
pub const DEFAULT_PSK_HEADER: &str = "x-sync-psk";
/// Query parameter carrying the share token.
pub const SHARE_QUERY_PARAM: &str = "psk";

/// The kind of operation a credential is checked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationClass {
    /// Writes through the merge engine, derived-token scheme.
    SyncWrite,
    /// Read-only share export.
    ShareRead,
    /// Raw shared secret, no scoping.
    Plain,
}

/// Credential scheme for the write routes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthScheme {
    /// Raw secret in a custom header.
    Plain,
    /// Salted-hash bearer token.
    #[default]
    Derived,
}

impl AuthScheme {
    /// Parse from string name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "plain" => Some(AuthScheme::Plain),
            "derived" => Some(AuthScheme::Derived),
            _ => None,
        }
    }

    /// Operation class the write routes are checked against.
    pub fn write_class(self) -> OperationClass {
        match self {
            AuthScheme::Plain => OperationClass::Plain,
            AuthScheme::Derived => OperationClass::SyncWrite,
        }
    }
}

/// Reasons a credential is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    /// The server has no secret; nothing can be authenticated.
    #[error("shared secret is not configured on the server")]
    NotConfigured,
    /// The request carried no credential.
    #[error("missing credential")]
    Missing,
    /// The credential did not match.
    #[error("invalid credential")]
    Mismatch,
}

/// Computes `hex(sha256(secret ++ salt))`.
pub fn derive_token(secret: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(salt.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Compares two credentials through their digests so the comparison time
/// does not depend on how many leading bytes match.
fn credentials_match(given: &str, expected: &str) -> bool {
    Sha256::digest(given.as_bytes()) == Sha256::digest(expected.as_bytes())
}

/// Validates request credentials against the configured secret.
#[derive(Clone)]
pub struct Authenticator {
    secret: Option<String>,
    scheme: AuthScheme,
    psk_header: HeaderName,
    sync_salt: String,
    share_salt: String,
}

impl std::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Authenticator")
            .field("configured", &self.is_configured())
            .field("scheme", &self.scheme)
            .field("psk_header", &self.psk_header)
            .finish_non_exhaustive()
    }
}

impl Authenticator {
    /// Creates an authenticator. An empty secret counts as unset.
    pub fn new(secret: Option<String>, scheme: AuthScheme) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
            scheme,
            psk_header: HeaderName::from_static(DEFAULT_PSK_HEADER),
            sync_salt: DEFAULT_SYNC_SALT.to_string(),
            share_salt: DEFAULT_SHARE_SALT.to_string(),
        }
    }

    /// Overrides the salts used to derive scoped tokens.
    pub fn with_salts(mut self, sync_salt: impl Into<String>, share_salt: impl Into<String>) -> Self {
        self.sync_salt = sync_salt.into();
        self.share_salt = share_salt.into();
        self
    }

    /// Overrides the header read under the plain scheme.
    pub fn with_psk_header(mut self, header: HeaderName) -> Self {
        self.psk_header = header;
        self
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }

    pub fn psk_header(&self) -> &HeaderName {
        &self.psk_header
    }

    /// Returns the credential a client must present for `class`.
    pub fn expected_credential(&self, class: OperationClass) -> Result<String, AuthError> {
        let secret = self.secret.as_deref().ok_or(AuthError::NotConfigured)?;
        Ok(match class {
            OperationClass::Plain => secret.to_string(),
            OperationClass::SyncWrite => derive_token(secret, &self.sync_salt),
            OperationClass::ShareRead => derive_token(secret, &self.share_salt),
        })
    }

    /// Checks `credential` for an operation of `class`.
    ///
    /// A missing server secret is reported before anything about the
    /// credential itself.
    pub fn verify(&self, class: OperationClass, credential: Option<&str>) -> Result<(), AuthError> {
        let expected = self.expected_credential(class)?;
        let credential = credential.ok_or(AuthError::Missing)?;
        if credentials_match(credential, &expected) {
            Ok(())
        } else {
            Err(AuthError::Mismatch)
        }
    }

    /// Pulls the write-route credential out of the request headers.
    pub fn write_credential<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        match self.scheme {
            AuthScheme::Plain => headers.get(&self.psk_header)?.to_str().ok(),
            AuthScheme::Derived => bearer_token(headers),
        }
    }

    /// Verifies the credential of a write request.
    pub fn verify_write(&self, headers: &HeaderMap) -> Result<(), AuthError> {
        self.verify(self.scheme.write_class(), self.write_credential(headers))
    }

    /// Verifies a share token.
    pub fn verify_share(&self, token: Option<&str>) -> Result<(), AuthError> {
        self.verify(OperationClass::ShareRead, token)
    }
}

/// Extracts `<token>` from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "correct horse battery staple";

    fn headers(name: &str, value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_bytes(name.as_bytes()).unwrap(),
            HeaderValue::from_str(value).unwrap(),
        );
        headers
    }

    #[test]
    fn test_derive_token_format() {
        let token = derive_token(SECRET, DEFAULT_SYNC_SALT);
        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert_eq!(token, derive_token(SECRET, DEFAULT_SYNC_SALT));
    }

    #[test]
    fn test_derive_token_known_value() {
        // sha256("abc")
        assert_eq!(
            derive_token("a", "bc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_salts_scope_tokens() {
        assert_ne!(
            derive_token(SECRET, DEFAULT_SYNC_SALT),
            derive_token(SECRET, DEFAULT_SHARE_SALT)
        );
    }

    #[test]
    fn test_unconfigured_secret() {
        let auth = Authenticator::new(None, AuthScheme::Derived);
        assert!(!auth.is_configured());
        assert_eq!(
            auth.verify(OperationClass::SyncWrite, Some("anything")),
            Err(AuthError::NotConfigured)
        );
        assert_eq!(
            auth.verify(OperationClass::Plain, None),
            Err(AuthError::NotConfigured)
        );

        let empty = Authenticator::new(Some(String::new()), AuthScheme::Plain);
        assert!(!empty.is_configured());
    }

    #[test]
    fn test_plain_class_is_exact() {
        let auth = Authenticator::new(Some(SECRET.into()), AuthScheme::Plain);
        assert!(auth.verify(OperationClass::Plain, Some(SECRET)).is_ok());
        assert_eq!(
            auth.verify(OperationClass::Plain, Some(&SECRET.to_uppercase())),
            Err(AuthError::Mismatch)
        );
        assert_eq!(
            auth.verify(OperationClass::Plain, Some(&format!("{SECRET} "))),
            Err(AuthError::Mismatch)
        );
        assert_eq!(
            auth.verify(OperationClass::Plain, None),
            Err(AuthError::Missing)
        );
    }

    #[test]
    fn test_share_token_rejected_for_sync_and_back() {
        let auth = Authenticator::new(Some(SECRET.into()), AuthScheme::Derived);
        let sync = derive_token(SECRET, DEFAULT_SYNC_SALT);
        let share = derive_token(SECRET, DEFAULT_SHARE_SALT);

        assert!(auth.verify(OperationClass::SyncWrite, Some(&sync)).is_ok());
        assert!(auth.verify(OperationClass::ShareRead, Some(&share)).is_ok());
        assert_eq!(
            auth.verify(OperationClass::SyncWrite, Some(&share)),
            Err(AuthError::Mismatch)
        );
        assert_eq!(
            auth.verify(OperationClass::ShareRead, Some(&sync)),
            Err(AuthError::Mismatch)
        );
        assert_eq!(
            auth.verify(OperationClass::SyncWrite, Some(SECRET)),
            Err(AuthError::Mismatch)
        );
    }

    #[test]
    fn test_custom_salts() {
        let auth = Authenticator::new(Some(SECRET.into()), AuthScheme::Derived)
            .with_salts("app-SYNC", "app-SHARE");
        let token = derive_token(SECRET, "app-SYNC");
        assert!(auth.verify(OperationClass::SyncWrite, Some(&token)).is_ok());
        assert_eq!(
            auth.expected_credential(OperationClass::ShareRead).unwrap(),
            derive_token(SECRET, "app-SHARE")
        );
    }

    #[test]
    fn test_write_credential_derived_scheme() {
        let auth = Authenticator::new(Some(SECRET.into()), AuthScheme::Derived);
        let token = derive_token(SECRET, DEFAULT_SYNC_SALT);

        let ok = headers("authorization", &format!("Bearer {token}"));
        assert!(auth.verify_write(&ok).is_ok());

        let no_prefix = headers("authorization", &token);
        assert_eq!(auth.verify_write(&no_prefix), Err(AuthError::Missing));

        let raw_header = headers(DEFAULT_PSK_HEADER, SECRET);
        assert_eq!(auth.verify_write(&raw_header), Err(AuthError::Missing));
    }

    #[test]
    fn test_write_credential_plain_scheme() {
        let auth = Authenticator::new(Some(SECRET.into()), AuthScheme::Plain)
            .with_psk_header(HeaderName::from_static("x-custom-psk"));

        assert!(auth.verify_write(&headers("x-custom-psk", SECRET)).is_ok());
        assert_eq!(
            auth.verify_write(&headers("x-custom-psk", "nope")),
            Err(AuthError::Mismatch)
        );
        assert_eq!(
            auth.verify_write(&headers(DEFAULT_PSK_HEADER, SECRET)),
            Err(AuthError::Missing)
        );
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let auth = Authenticator::new(Some(SECRET.into()), AuthScheme::Plain);
        assert!(!format!("{auth:?}").contains(SECRET));
    }

    #[test]
    fn test_scheme_parse() {
        assert_eq!(AuthScheme::parse("Plain"), Some(AuthScheme::Plain));
        assert_eq!(AuthScheme::parse("derived"), Some(AuthScheme::Derived));
        assert_eq!(AuthScheme::parse("oauth"), None);
        assert_eq!(AuthScheme::Derived.write_class(), OperationClass::SyncWrite);
    }
}
