//! Rule (Match) construction and selection.

use std::collections::HashMap;

use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::datasources::{self, DataSourceInfo, RawDataSourceOptions, Registry};
use crate::errors::AppError;
use crate::header_builder::HeaderBuilder;
use crate::resolver;

/// Raw, as-configured shape of one entry under `matches`. `headers`
/// accepts either a scalar string or a list of strings per header.
#[derive(Debug, Clone, Deserialize)]
pub struct RawMatch {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default, rename = "urlRegex")]
    pub url_regex: String,
    #[serde(default)]
    pub always: bool,
    #[serde(default, rename = "errorIfMissing")]
    pub error_if_missing: Vec<String>,
    #[serde(default)]
    pub headers: HashMap<String, HeaderTemplates>,
    #[serde(default, rename = "dataSources")]
    pub data_sources: HashMap<String, RawDataSourceOptions>,
}

/// A header's configured template(s): one scalar string, or a list.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum HeaderTemplates {
    Single(String),
    Many(Vec<String>),
}

impl HeaderTemplates {
    fn into_vec(self) -> Vec<String> {
        match self {
            HeaderTemplates::Single(s) => vec![s],
            HeaderTemplates::Many(v) => v,
        }
    }
}

/// A declarative predicate plus its associated data sources and header
/// templates.
pub struct Match {
    pub index: usize,
    pub hosts: std::collections::HashSet<String>,
    pub url_regex: Option<Regex>,
    pub always: bool,
    pub error_if_missing: Vec<String>,
    pub data_sources: HashMap<String, DataSourceInfo>,
    pub header_builder: HeaderBuilder,
}

impl Match {
    pub fn from_raw(index: usize, raw: RawMatch, registry: &Registry) -> Result<Self, AppError> {
        let url_regex = if raw.url_regex.is_empty() {
            None
        } else {
            Some(Regex::new(&raw.url_regex)?)
        };

        let hosts: std::collections::HashSet<String> =
            raw.hosts.into_iter().map(|h| h.to_lowercase()).collect();

        let error_if_missing: Vec<String> = raw
            .error_if_missing
            .into_iter()
            .map(|h| h.to_lowercase())
            .collect();

        if !raw.always && hosts.is_empty() && url_regex.is_none() {
            warn!("matches[{index}] will never match");
        }

        let mut headers = HashMap::with_capacity(raw.headers.len());
        for (name, templates) in raw.headers {
            headers.insert(name.to_lowercase(), templates.into_vec());
        }
        let header_builder = HeaderBuilder::compile(&headers)?;

        let data_sources = datasources::parse(&raw.data_sources, registry)?;
        resolver::validate_dependencies(&data_sources)?;

        Ok(Match {
            index,
            hosts,
            url_regex,
            always: raw.always,
            error_if_missing,
            data_sources,
            header_builder,
        })
    }
}

/// Returns the first rule whose predicate fires for this host/URI, or
/// `None` if no rule matches (which is not an error: the request is
/// forwarded with no injected headers).
pub fn select<'a>(matches: &'a [Match], host: &str, request_uri: &str) -> Option<&'a Match> {
    let host = host.to_lowercase();
    matches.iter().find(|m| {
        m.always
            || m.hosts.contains(&host)
            || m.url_regex.as_ref().is_some_and(|rx| rx.is_match(request_uri))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_registry() -> Registry {
        Registry::new()
    }

    fn always_match(index: usize) -> Match {
        Match::from_raw(
            index,
            RawMatch {
                hosts: vec![],
                url_regex: String::new(),
                always: true,
                error_if_missing: vec![],
                headers: HashMap::new(),
                data_sources: HashMap::new(),
            },
            &empty_registry(),
        )
        .unwrap()
    }

    #[test]
    fn select_returns_first_matching_rule_in_document_order() {
        let host_match = Match::from_raw(
            0,
            RawMatch {
                hosts: vec!["Example.COM".to_string()],
                url_regex: String::new(),
                always: false,
                error_if_missing: vec![],
                headers: HashMap::new(),
                data_sources: HashMap::new(),
            },
            &empty_registry(),
        )
        .unwrap();
        let fallback = always_match(1);
        let matches = vec![host_match, fallback];

        let selected = select(&matches, "example.com", "/a").unwrap();
        assert_eq!(selected.index, 0);
    }

    #[test]
    fn select_falls_through_to_later_rule_when_earlier_does_not_match() {
        let host_match = Match::from_raw(
            0,
            RawMatch {
                hosts: vec!["other.example".to_string()],
                url_regex: String::new(),
                always: false,
                error_if_missing: vec![],
                headers: HashMap::new(),
                data_sources: HashMap::new(),
            },
            &empty_registry(),
        )
        .unwrap();
        let fallback = always_match(1);
        let matches = vec![host_match, fallback];

        let selected = select(&matches, "example.com", "/a").unwrap();
        assert_eq!(selected.index, 1);
    }

    #[test]
    fn select_returns_none_when_nothing_matches() {
        let host_match = Match::from_raw(
            0,
            RawMatch {
                hosts: vec!["other.example".to_string()],
                url_regex: String::new(),
                always: false,
                error_if_missing: vec![],
                headers: HashMap::new(),
                data_sources: HashMap::new(),
            },
            &empty_registry(),
        )
        .unwrap();
        assert!(select(&[host_match], "example.com", "/a").is_none());
    }

    #[test]
    fn url_regex_matches_request_uri() {
        let m = Match::from_raw(
            0,
            RawMatch {
                hosts: vec![],
                url_regex: r"^/api/.*".to_string(),
                always: false,
                error_if_missing: vec![],
                headers: HashMap::new(),
                data_sources: HashMap::new(),
            },
            &empty_registry(),
        )
        .unwrap();
        assert!(select(&[m], "anyhost", "/api/widgets").is_some());
    }
}
