use once_cell::sync::Lazy;
use std::env;

pub static EBAY_ENV: Lazy<String> =
    Lazy::new(|| env::var("EBAY_ENV").unwrap_or_else(|_| "PROD".to_string()));

pub static APP_ID: Lazy<String> = Lazy::new(|| env::var("APP_ID").unwrap_or_default());

pub static CERT_ID: Lazy<String> = Lazy::new(|| env::var("CERT_ID").unwrap_or_default());

pub static DEV_ID: Lazy<String> = Lazy::new(|| env::var("DEV_ID").unwrap_or_default());

pub static REDIRECT_URI: Lazy<String> = Lazy::new(|| env::var("REDIRECT_URI").unwrap_or_default());

pub static ROOT: Lazy<String> = Lazy::new(|| {
    if EBAY_ENV.as_str().eq_ignore_ascii_case("PROD") {
        "https://api.ebay.com".to_string()
    } else {
        "https://api.sandbox.ebay.com".to_string()
    }
});

pub static OAUTH_TOKEN_URL: Lazy<String> =
    Lazy::new(|| format!("{}/identity/v1/oauth2/token", *ROOT));

/// Path of the YAML secrets descriptor materialized from env on first use.
pub static SECRETS_PATH: Lazy<String> =
    Lazy::new(|| env::var("EBAY_SECRETS_PATH").unwrap_or_else(|_| "ebay.yaml".to_string()));

pub const BROWSE_SCOPE: &str = "https://api.ebay.com/oauth/api_scope";

/// Page size of the charity search query.
pub const SEARCH_LIMIT: u32 = 200;

/// Offset baked into the initial charity search URL. It does not advance;
/// pagination follows the server-supplied `next` URL instead.
pub const SEARCH_OFFSET: u32 = 200;
