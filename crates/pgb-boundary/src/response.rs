//! JSON responses of the `boundary` CLI (`-format json`)

use serde::Deserialize;

use pgb_core::{BrokerError, TunnelHandle};

/// `boundary scopes list`
#[derive(Debug, Deserialize)]
pub(crate) struct ScopeList {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub items: Vec<Scope>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Scope {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

impl ScopeList {
    pub fn id_of(&self, name: &str) -> Result<String, BrokerError> {
        self.items
            .iter()
            .find(|s| s.name == name)
            .map(|s| s.id.clone())
            .ok_or_else(|| BrokerError::ScopeNotFound(name.to_string()))
    }
}

/// `boundary auth-methods list`
#[derive(Debug, Deserialize)]
pub(crate) struct AuthMethodList {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub items: Vec<AuthMethod>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct AuthMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub name: String,
}

impl AuthMethodList {
    /// First auth method of type `method`
    pub fn pick(&self, method: &str, scope_id: &str) -> Result<String, BrokerError> {
        for m in &self.items {
            tracing::debug!("Auth method {} ({}) {:?} in {}", m.id, m.kind, m.name, scope_id);
        }
        self.items
            .iter()
            .find(|m| m.kind == method)
            .map(|m| m.id.clone())
            .ok_or_else(|| BrokerError::AuthMethodNotFound {
                method: method.to_string(),
                scope: scope_id.to_string(),
            })
    }
}

/// `boundary authenticate`
#[derive(Debug, Deserialize)]
pub(crate) struct AuthResponse {
    item: AuthItem,
}

#[derive(Debug, Deserialize)]
struct AuthItem {
    attributes: AuthAttributes,
}

#[derive(Debug, Deserialize)]
struct AuthAttributes {
    token: String,
}

impl AuthResponse {
    pub fn into_token(self) -> String {
        self.item.attributes.token
    }
}

/// Descriptor `boundary connect` prints once the tunnel is listening
#[derive(Debug, Deserialize)]
pub(crate) struct ConnectResponse {
    address: String,
    port: u16,
    #[serde(default, deserialize_with = "null_as_empty")]
    credentials: Vec<BrokeredCredential>,
}

#[derive(Debug, Deserialize)]
struct BrokeredCredential {
    credential: Credential,
}

#[derive(Debug, Deserialize)]
struct Credential {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password: String,
}

impl ConnectResponse {
    pub fn into_handle(self, pid: u32) -> Result<TunnelHandle, BrokerError> {
        let credential = self
            .credentials
            .into_iter()
            .next()
            .ok_or(BrokerError::NoCredentials)?
            .credential;
        Ok(TunnelHandle {
            pid,
            host: self.address,
            port: self.port,
            username: credential.username,
            password: credential.password,
        })
    }
}

fn null_as_empty<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<Vec<T>>::deserialize(deserializer).map(|opt| opt.unwrap_or_default())
}
