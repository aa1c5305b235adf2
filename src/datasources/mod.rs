//! The DataSource contract: the pluggable capability that produces
//! per-request key/value data for header templates.
//!
//! A `DataSource` instance is a per-rule singleton shared across every
//! concurrent request against that rule, so it must never hold
//! per-request state (the incoming request, parsed tokens, ...)
//! directly on itself: that would be a data race once more than one
//! request is in flight. Here `setup` returns a [`RequestSession`], a
//! boxed, per-request object that owns whatever state
//! `get_data`/`get_template_data` need, so the `DataSource` impl
//! itself stays immutable and safely `Arc`-shared across concurrent
//! requests.

pub mod headers;
pub mod parsejwt;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderMap, Method, Uri};

use crate::errors::AppError;
use crate::header_builder::Template;

/// A read-only snapshot of the parts of the incoming request a data
/// source is allowed to see. Cheap to clone so it can be shared across
/// a wave of concurrently-running sources without locking the live
/// request.
#[derive(Debug, Clone)]
pub struct RequestView {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

impl RequestView {
    pub fn host(&self) -> Option<&str> {
        self.uri
            .host()
            .or_else(|| self.headers.get(http::header::HOST)?.to_str().ok())
    }
}

/// The opaque domain value a data source stores in the shared
/// `context` map.
#[derive(Debug, Clone)]
pub enum DataSourceValue {
    Strings(Vec<String>),
    Bytes(Vec<Vec<u8>>),
    Mapping(HashMap<String, String>),
    /// A mapping whose values are themselves ordered sequences, the
    /// shape the `headers` data source's raw `GetData` returns (one or
    /// more values per mapped key, before `GetTemplateData` narrows
    /// each down to its first value).
    MultiMapping(HashMap<String, Vec<String>>),
    Producers(Vec<Arc<dyn Producer>>),
}

impl DataSourceValue {
    pub fn len(&self) -> usize {
        match self {
            DataSourceValue::Strings(v) => v.len(),
            DataSourceValue::Bytes(v) => v.len(),
            DataSourceValue::Mapping(v) => v.len(),
            DataSourceValue::MultiMapping(v) => v.len(),
            DataSourceValue::Producers(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A best-effort flat rendering, used when a data source's raw
    /// value is referenced from another source's Setup-time template
    /// (e.g. `tokenTemplate`) rather than through `GetTemplateData`.
    pub fn first_as_text(&self) -> Option<String> {
        match self {
            DataSourceValue::Strings(v) => v.first().cloned(),
            DataSourceValue::Bytes(v) => v.first().map(|b| String::from_utf8_lossy(b).into_owned()),
            DataSourceValue::Mapping(v) => v.values().next().cloned(),
            DataSourceValue::MultiMapping(v) => v.values().next().and_then(|vs| vs.first()).cloned(),
            DataSourceValue::Producers(v) => v.first().map(|p| {
                let mut s = String::new();
                let _ = p.render(&mut s);
                s
            }),
        }
    }
}

/// A value destined for the template namespace: text, a byte blob, or
/// a deferred producer invoked at expansion time.
#[derive(Clone)]
pub enum TemplateValue {
    Text(String),
    Bytes(Vec<u8>),
    Producer(Arc<dyn Producer>),
}

impl TemplateValue {
    pub fn render(&self) -> String {
        match self {
            TemplateValue::Text(s) => s.clone(),
            TemplateValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            TemplateValue::Producer(p) => {
                let mut sink = String::new();
                let _ = p.render(&mut sink);
                sink
            }
        }
    }
}

/// A deferred, lazily-rendered template value.
pub trait Producer: Send + Sync + std::fmt::Debug {
    fn render(&self, sink: &mut dyn std::fmt::Write) -> std::fmt::Result;
}

/// Per-request state a data source needs between `get_data` and
/// `get_template_data`. Returned by `setup`; never stored on the
/// `DataSource` impl itself.
#[async_trait]
pub trait RequestSession: Send + Sync {
    async fn get_data(&self) -> Result<DataSourceValue, AppError>;
    fn get_template_data(&self, data: &DataSourceValue) -> Result<HashMap<String, TemplateValue>, AppError>;
}

/// What `setup` hands back: the per-request session plus the optional
/// cache fingerprint/TTL the (unimplemented) caching layer would use.
pub struct SetupOutcome {
    pub session: Box<dyn RequestSession>,
    pub cache_key: Option<String>,
    pub cache_ttl: Option<Duration>,
}

impl SetupOutcome {
    pub fn new(session: impl RequestSession + 'static) -> Self {
        Self {
            session: Box::new(session),
            cache_key: None,
            cache_ttl: None,
        }
    }

    pub fn with_cache(mut self, key: impl Into<String>, ttl: Duration) -> Self {
        self.cache_key = Some(key.into());
        self.cache_ttl = Some(ttl);
        self
    }
}

/// Everything `setup` is allowed to see: the incoming request, the
/// context completed so far by ancestor sources, and a helper exposing
/// the Setup-time templating utility.
pub struct SetupContext<'a> {
    pub request: &'a RequestView,
    pub context: &'a HashMap<String, DataSourceValue>,
    pub helper: &'a DataSourceHelper<'a>,
}

/// A context object passed into `setup`, exposing the shared context,
/// the incoming request, and a templating utility that can render a
/// template against `request.*` / `context_<name>` bindings.
pub struct DataSourceHelper<'a> {
    context: &'a HashMap<String, DataSourceValue>,
    request: &'a RequestView,
    name: &'a str,
}

impl<'a> DataSourceHelper<'a> {
    pub fn new(name: &'a str, context: &'a HashMap<String, DataSourceValue>, request: &'a RequestView) -> Self {
        Self { context, request, name }
    }

    pub fn context(&self) -> &HashMap<String, DataSourceValue> {
        self.context
    }

    pub fn request(&self) -> &RequestView {
        self.request
    }

    pub fn name(&self) -> &str {
        self.name
    }

    /// Renders a `{{key}}` template against a flat namespace built from
    /// the request (`request_method`, `request_host`, `request_path`,
    /// `request_header_<name>`) and every ancestor's raw value
    /// (`context_<dsName>`, best-effort flattened, see
    /// [`DataSourceValue::first_as_text`]). A flat namespace keeps this
    /// safe over an opaque `DataSourceValue`, where there is no
    /// reflection-based dotted-path field to traverse.
    pub fn render_template(&self, template_str: &str) -> Result<String, AppError> {
        let template = Template::compile(template_str)?;
        let namespace = self.flat_namespace();
        template.render(&namespace)
    }

    fn flat_namespace(&self) -> HashMap<String, String> {
        let mut ns = HashMap::new();
        ns.insert("request_method".to_string(), self.request.method.to_string());
        ns.insert("request_uri".to_string(), self.request.uri.to_string());
        ns.insert(
            "request_path".to_string(),
            self.request.uri.path().to_string(),
        );
        if let Some(host) = self.request.host() {
            ns.insert("request_host".to_string(), host.to_string());
        }
        for (name, value) in self.request.headers.iter() {
            if let Ok(v) = value.to_str() {
                ns.insert(format!("request_header_{}", name.as_str().to_lowercase()), v.to_string());
            }
        }
        for (name, value) in self.context.iter() {
            if let Some(text) = value.first_as_text() {
                ns.insert(format!("context_{name}"), text);
            }
        }
        ns
    }
}

/// The capability a concrete data source implements. Stateless across
/// requests by construction: `setup` is the only method that may
/// consult request-specific data, and it returns a fresh
/// [`RequestSession`] rather than mutating `self`.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn setup(&self, ctx: &SetupContext<'_>) -> Result<SetupOutcome, AppError>;
}

/// A single named, configured data source attached to a rule.
#[derive(Clone)]
pub struct DataSourceInfo {
    pub name: String,
    pub type_name: String,
    pub cache: bool,
    pub depends_on: Vec<String>,
    pub instance: Arc<dyn DataSource>,
}

/// Raw, as-configured options for one entry under `matches[].dataSources`.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct RawDataSourceOptions {
    #[serde(rename = "type")]
    pub type_name: String,
    #[serde(default)]
    pub cache: bool,
    #[serde(default, rename = "dependsOn")]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub options: serde_yaml::Value,
}

type Factory = Arc<dyn Fn(&serde_yaml::Value) -> Result<Arc<dyn DataSource>, AppError> + Send + Sync>;

/// Maps a data source's configured type-name to the factory that
/// parses its `options` document into a concrete, constructed
/// instance.
#[derive(Clone)]
pub struct Registry {
    factories: HashMap<String, Factory>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// A registry pre-loaded with the two built-in data sources the
    /// source ships with: `headers` and `parsejwt`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        headers::register(&mut registry);
        parsejwt::register(&mut registry);
        registry
    }

    pub fn register<F>(&mut self, type_name: &str, factory: F)
    where
        F: Fn(&serde_yaml::Value) -> Result<Arc<dyn DataSource>, AppError> + Send + Sync + 'static,
    {
        self.factories.insert(type_name.to_string(), Arc::new(factory));
    }

    pub fn create(&self, type_name: &str, options: &serde_yaml::Value) -> Result<Arc<dyn DataSource>, AppError> {
        let factory = self
            .factories
            .get(type_name)
            .ok_or_else(|| AppError::config(format!("could not find data source '{type_name}'")))?;
        factory(options)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Parses `matches[].dataSources` into fully-constructed
/// [`DataSourceInfo`] values via `registry`.
pub fn parse(
    raw: &HashMap<String, RawDataSourceOptions>,
    registry: &Registry,
) -> Result<HashMap<String, DataSourceInfo>, AppError> {
    let mut sources = HashMap::with_capacity(raw.len());
    for (name, options) in raw {
        let instance = registry.create(&options.type_name, &options.options)?;
        sources.insert(
            name.clone(),
            DataSourceInfo {
                name: name.clone(),
                type_name: options.type_name.clone(),
                cache: options.cache,
                depends_on: options.depends_on.clone(),
                instance,
            },
        );
    }
    Ok(sources)
}
