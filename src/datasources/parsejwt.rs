//! The `parsejwt` built-in data source: extracts a bearer token from
//! the request, verifies its HMAC signature, and exposes its SHA-1 as
//! a cache fingerprint and `(exp - now)` as a cache TTL.
//!
//! `GetData`/`GetTemplateData` intentionally return empty mappings:
//! verified claims are not exposed into the template namespace. Only
//! the cache key/TTL derived from the token are surfaced.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sha1::{Digest, Sha1};

use super::{
    DataSource, DataSourceValue, RequestSession, Registry, SetupContext, SetupOutcome, TemplateValue,
};
use crate::errors::AppError;

const BEARER_PREFIX: &str = "Bearer, ";

#[derive(Debug, Clone, Deserialize)]
struct Options {
    #[serde(default, rename = "ignoreAuthorizationHeader")]
    ignore_authorization_header: bool,
    #[serde(default, rename = "tokenTemplate")]
    token_template: String,
    #[serde(default = "default_error_if_token_missing", rename = "errorIfTokenMissing")]
    error_if_token_missing: bool,
    #[serde(default, rename = "signingSecret")]
    signing_secret: String,
}

/// An unconfigured `errorIfTokenMissing` errors on a missing token,
/// matching `NewParseJwt`'s constructor default in the original.
fn default_error_if_token_missing() -> bool {
    true
}

impl Default for Options {
    fn default() -> Self {
        Self {
            ignore_authorization_header: false,
            token_template: String::new(),
            error_if_token_missing: default_error_if_token_missing(),
            signing_secret: String::new(),
        }
    }
}

struct ParseJwtDataSource {
    options: Options,
}

struct EmptySession;

#[async_trait]
impl RequestSession for EmptySession {
    async fn get_data(&self) -> Result<DataSourceValue, AppError> {
        Ok(DataSourceValue::Mapping(HashMap::new()))
    }

    fn get_template_data(&self, _data: &DataSourceValue) -> Result<HashMap<String, TemplateValue>, AppError> {
        Ok(HashMap::new())
    }
}

#[async_trait]
impl DataSource for ParseJwtDataSource {
    async fn setup(&self, ctx: &SetupContext<'_>) -> Result<SetupOutcome, AppError> {
        let token = self.extract_token(ctx)?;

        let token = match token {
            Some(t) if !t.is_empty() => t,
            _ => {
                if self.options.error_if_token_missing {
                    return Err(AppError::data_source("parsejwt: token missing"));
                }
                return Ok(SetupOutcome::new(EmptySession));
            }
        };

        let key = DecodingKey::from_secret(self.options.signing_secret.as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        let data = decode::<serde_json::Value>(&token, &key, &validation)
            .map_err(|e| AppError::data_source(format!("parsejwt: {e}")))?;

        let cache_key = {
            let mut hasher = Sha1::new();
            hasher.update(token.as_bytes());
            hex::encode(hasher.finalize())
        };

        let ttl = data
            .claims
            .get("exp")
            .and_then(|v| v.as_u64())
            .map(|exp| {
                let now = jsonwebtoken::get_current_timestamp();
                Duration::from_secs(exp.saturating_sub(now))
            })
            .unwrap_or_default();

        Ok(SetupOutcome::new(EmptySession).with_cache(cache_key, ttl))
    }
}

impl ParseJwtDataSource {
    /// Token retrieval order: the `Authorization` header (when it
    /// starts with the literal `"Bearer, "` prefix, comma included)
    /// unless `ignoreAuthorizationHeader` is set; otherwise the
    /// configured `tokenTemplate` rendered against the setup helper.
    fn extract_token(&self, ctx: &SetupContext<'_>) -> Result<Option<String>, AppError> {
        if !self.options.ignore_authorization_header {
            if let Some(value) = ctx.request.headers.get(http::header::AUTHORIZATION) {
                if let Ok(value) = value.to_str() {
                    if let Some(token) = value.strip_prefix(BEARER_PREFIX) {
                        return Ok(Some(token.to_string()));
                    }
                }
            }
        }

        if self.options.token_template.is_empty() {
            return Ok(None);
        }
        let rendered = ctx.helper.render_template(&self.options.token_template)?;
        Ok(Some(rendered))
    }
}

pub fn register(registry: &mut Registry) {
    registry.register("parsejwt", |options| {
        let parsed: Options = serde_yaml::from_value(options.clone())
            .map_err(|e| AppError::config(format!("parsejwt data source: {e}")))?;
        Ok(Arc::new(ParseJwtDataSource { options: parsed }) as Arc<dyn DataSource>)
    });
}
