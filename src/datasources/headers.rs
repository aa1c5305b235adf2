//! The `headers` built-in data source: copies inbound request headers
//! into the per-request context under operator-chosen keys.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use super::{
    DataSource, DataSourceValue, RequestSession, RequestView, Registry, SetupContext, SetupOutcome,
    TemplateValue,
};
use crate::errors::AppError;

#[derive(Debug, Clone, Deserialize)]
struct Options {
    #[serde(rename = "headersToKeys")]
    headers_to_keys: HashMap<String, String>,
}

struct HeadersDataSource {
    headers_to_keys: HashMap<String, String>,
}

struct HeadersSession {
    headers_to_keys: HashMap<String, String>,
    request: RequestView,
}

#[async_trait]
impl RequestSession for HeadersSession {
    async fn get_data(&self) -> Result<DataSourceValue, AppError> {
        let mut out: HashMap<String, Vec<String>> = HashMap::with_capacity(self.headers_to_keys.len());
        for (header_name, key) in &self.headers_to_keys {
            let values: Vec<String> = self
                .request
                .headers
                .get_all(header_name.as_str())
                .iter()
                .filter_map(|v| v.to_str().ok())
                .map(|v| v.to_string())
                .collect();
            out.insert(key.clone(), values);
        }
        Ok(DataSourceValue::MultiMapping(out))
    }

    fn get_template_data(&self, data: &DataSourceValue) -> Result<HashMap<String, TemplateValue>, AppError> {
        let mut out = HashMap::new();
        if let DataSourceValue::MultiMapping(map) = data {
            for (key, values) in map {
                out.insert(
                    key.clone(),
                    TemplateValue::Text(values.first().cloned().unwrap_or_default()),
                );
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl DataSource for HeadersDataSource {
    async fn setup(&self, ctx: &SetupContext<'_>) -> Result<SetupOutcome, AppError> {
        Ok(SetupOutcome::new(HeadersSession {
            headers_to_keys: self.headers_to_keys.clone(),
            request: ctx.request.clone(),
        }))
    }
}

pub fn register(registry: &mut Registry) {
    registry.register("headers", |options| {
        let parsed: Options = serde_yaml::from_value(options.clone())
            .map_err(|e| AppError::config(format!("headers data source: {e}")))?;
        Ok(Arc::new(HeadersDataSource {
            headers_to_keys: parsed.headers_to_keys,
        }) as Arc<dyn DataSource>)
    });
}
