use crate::ebay::config::{APP_ID, CERT_ID, DEV_ID, OAUTH_TOKEN_URL, REDIRECT_URI, SECRETS_PATH};
use crate::http::build_client;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EbayAuthError {
    #[error("missing ebay app credentials")]
    MissingCredentials,
    #[error("secrets file error: {0}")]
    Secrets(String),
    #[error("oauth request failed: {0}")]
    Request(String),
}

/// Credential block stored under the `api.ebay.com` key of the secrets file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppCredentials {
    #[serde(rename = "appid")]
    pub app_id: Option<String>,
    #[serde(rename = "certid")]
    pub cert_id: Option<String>,
    #[serde(rename = "devid")]
    pub dev_id: Option<String>,
    #[serde(rename = "redirecturi")]
    pub redirect_uri: Option<String>,
}

impl AppCredentials {
    pub fn from_env() -> Self {
        fn non_empty(value: &str) -> Option<String> {
            if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            }
        }
        Self {
            app_id: non_empty(&APP_ID),
            cert_id: non_empty(&CERT_ID),
            dev_id: non_empty(&DEV_ID),
            redirect_uri: non_empty(&REDIRECT_URI),
        }
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

const SECRETS_HOST_KEY: &str = "api.ebay.com";

/// Writes the YAML secrets descriptor if it does not exist yet. Content is
/// deterministic from env, so a concurrent duplicate write is harmless.
pub fn ensure_secrets_file(path: &Path, creds: &AppCredentials) -> Result<(), EbayAuthError> {
    if path.exists() {
        return Ok(());
    }
    let mut doc = BTreeMap::new();
    doc.insert(SECRETS_HOST_KEY.to_string(), creds.clone());
    let raw = serde_yaml::to_string(&doc).map_err(|err| EbayAuthError::Secrets(err.to_string()))?;
    std::fs::write(path, raw).map_err(|err| EbayAuthError::Secrets(err.to_string()))?;
    Ok(())
}

pub fn load_secrets_file(path: &Path) -> Result<AppCredentials, EbayAuthError> {
    let raw =
        std::fs::read_to_string(path).map_err(|err| EbayAuthError::Secrets(err.to_string()))?;
    let doc: BTreeMap<String, AppCredentials> =
        serde_yaml::from_str(&raw).map_err(|err| EbayAuthError::Secrets(err.to_string()))?;
    doc.get(SECRETS_HOST_KEY)
        .cloned()
        .ok_or(EbayAuthError::MissingCredentials)
}

fn basic_auth_header(creds: &AppCredentials) -> Result<String, EbayAuthError> {
    let (Some(app_id), Some(cert_id)) = (creds.app_id.as_deref(), creds.cert_id.as_deref()) else {
        return Err(EbayAuthError::MissingCredentials);
    };
    let raw = format!("{app_id}:{cert_id}");
    Ok(format!("Basic {}", BASE64.encode(raw)))
}

/// Client-credentials grant. Each call performs a fresh exchange; nothing is
/// cached here.
pub async fn get_app_access_token(scopes: &[&str]) -> Result<String, EbayAuthError> {
    let path = Path::new(SECRETS_PATH.as_str());
    ensure_secrets_file(path, &AppCredentials::from_env())?;
    let creds = load_secrets_file(path)?;
    let body = [
        ("grant_type", "client_credentials"),
        ("scope", &scopes.join(" ")),
    ];
    request_token(&creds, &body).await
}

async fn request_token(
    creds: &AppCredentials,
    params: &[(&str, &str)],
) -> Result<String, EbayAuthError> {
    let authorization = basic_auth_header(creds)?;
    let client = build_client();
    let response = client
        .post(OAUTH_TOKEN_URL.as_str())
        .header(reqwest::header::AUTHORIZATION, authorization)
        .form(&params)
        .send()
        .await
        .map_err(|err| EbayAuthError::Request(err.to_string()))?;

    if !response.status().is_success() {
        return Err(EbayAuthError::Request(format!(
            "HTTP {}",
            response.status()
        )));
    }

    let payload: TokenResponse = response
        .json()
        .await
        .map_err(|err| EbayAuthError::Request(err.to_string()))?;
    Ok(payload.access_token)
}
