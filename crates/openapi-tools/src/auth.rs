//! Credential binding for outbound requests.
//!
//! Secrets are looked up per security scheme name, uppercased with non-alphanumeric characters
//! replaced by `_`:
//!
//! | scheme kind       | variable(s)                               | placement                    |
//! |-------------------|-------------------------------------------|------------------------------|
//! | `apiKey`          | `<SCHEME>_API_KEY`                        | header, query, or cookie     |
//! | `http` bearer     | `<SCHEME>_TOKEN`                          | `Authorization: Bearer`      |
//! | `oauth2`          | `<SCHEME>_TOKEN`                          | `Authorization: Bearer`      |
//! | `http` basic      | `<SCHEME>_USERNAME`, `<SCHEME>_PASSWORD`  | `Authorization: Basic`       |
//!
//! Basic credentials may also come from configuration, which wins over the environment.

use crate::error::{OpenApiToolsError, Result};
use crate::index::{ApiKeyPlacement, OperationIndex, OperationRecord, SecuritySchemeKind};
use base64::Engine as _;
use restbridge_http::client::HttpRequest;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Where secret values come from.
pub trait SecretSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads secrets from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvSecrets;

impl SecretSource for EnvSecrets {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl SecretSource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl<T: SecretSource + ?Sized> SecretSource for Arc<T> {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BasicCredentials {
    pub username: String,
    pub password: String,
}

/// Binds credentials for an operation's primary security scheme.
pub struct AuthBinder<S> {
    secrets: S,
    basic: HashMap<String, BasicCredentials>,
}

impl<S: SecretSource> AuthBinder<S> {
    pub fn new(secrets: S, basic: HashMap<String, BasicCredentials>) -> Self {
        Self { secrets, basic }
    }

    /// Apply the first scheme of the operation's first security requirement.
    ///
    /// No-op when the operation has no requirement, or the first requirement is empty.
    ///
    /// # Errors
    ///
    /// Returns an auth error if the scheme is undeclared or unsupported, or its secret is
    /// missing or empty.
    pub fn apply(
        &self,
        index: &OperationIndex,
        op: &OperationRecord,
        request: &mut HttpRequest,
    ) -> Result<()> {
        let Some(scheme_name) = op.primary_security_scheme() else {
            return Ok(());
        };
        let scheme = index
            .security_scheme(scheme_name)
            .ok_or_else(|| OpenApiToolsError::UnknownSecurityScheme(scheme_name.to_string()))?;
        let prefix = env_prefix(scheme_name);

        match &scheme.kind {
            SecuritySchemeKind::ApiKey { name, placement } => {
                let secret = self.secret(scheme_name, &format!("{prefix}_API_KEY"))?;
                match placement {
                    ApiKeyPlacement::Header => request.set_header(name, &secret)?,
                    ApiKeyPlacement::Query => request.append_query_pair(name, &secret),
                    ApiKeyPlacement::Cookie => {
                        let cookie = match request.header("cookie") {
                            Some(existing) => format!("{existing}; {name}={secret}"),
                            None => format!("{name}={secret}"),
                        };
                        request.set_header("cookie", &cookie)?;
                    }
                }
            }
            SecuritySchemeKind::Bearer | SecuritySchemeKind::OAuth2 => {
                let token = self.secret(scheme_name, &format!("{prefix}_TOKEN"))?;
                request.set_header("authorization", &format!("Bearer {token}"))?;
            }
            SecuritySchemeKind::Basic => {
                let (user, pass) = match self.basic.get(scheme_name) {
                    Some(creds) => (creds.username.clone(), creds.password.clone()),
                    None => (
                        self.secret(scheme_name, &format!("{prefix}_USERNAME"))?,
                        self.secret(scheme_name, &format!("{prefix}_PASSWORD"))?,
                    ),
                };
                let encoded =
                    base64::engine::general_purpose::STANDARD.encode(format!("{user}:{pass}"));
                request.set_header("authorization", &format!("Basic {encoded}"))?;
            }
            SecuritySchemeKind::Unsupported(kind) => {
                return Err(OpenApiToolsError::UnsupportedSecurityScheme {
                    scheme: scheme_name.to_string(),
                    kind: kind.clone(),
                });
            }
        }

        tracing::debug!(scheme = %scheme_name, "bound credentials");
        Ok(())
    }

    fn secret(&self, scheme: &str, variable: &str) -> Result<String> {
        self.secrets
            .get(variable)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| OpenApiToolsError::MissingSecret {
                scheme: scheme.to_string(),
                variable: variable.to_string(),
            })
    }
}

/// `ApiKeyAuth` -> `APIKEYAUTH`, `petstore-auth` -> `PETSTORE_AUTH`.
#[must_use]
pub fn env_prefix(scheme_name: &str) -> String {
    scheme_name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}
