//! Expands `{{key}}` placeholders in header-value templates against a
//! flat template namespace.
//!
//! No crate in the dependency graph offers a narrow, runtime-configured
//! mustache-style substitution engine (`askama` compiles templates at
//! build time against a known struct, which doesn't fit a namespace
//! whose keys are only known once the config is loaded), so the
//! compiled form (a sequence of literal/placeholder segments) is
//! implemented directly here; it is a handful of lines of parsing, not
//! ambient infrastructure.

use std::collections::HashMap;

use crate::datasources::TemplateValue;
use crate::errors::AppError;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone)]
enum Segment {
    Literal(String),
    Placeholder(String),
}

/// A single compiled `{{key}}` template.
#[derive(Debug, Clone)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    /// Parses `source`, failing if a `{{` is never closed.
    pub fn compile(source: &str) -> Result<Self, AppError> {
        let mut segments = Vec::new();
        let mut rest = source;
        loop {
            match rest.find(OPEN) {
                None => {
                    if !rest.is_empty() {
                        segments.push(Segment::Literal(rest.to_string()));
                    }
                    break;
                }
                Some(start) => {
                    if start > 0 {
                        segments.push(Segment::Literal(rest[..start].to_string()));
                    }
                    let after_open = &rest[start + OPEN.len()..];
                    let end = after_open.find(CLOSE).ok_or_else(|| {
                        AppError::template(format!("unterminated '{{{{' in template: {source}"))
                    })?;
                    let key = after_open[..end].trim().to_string();
                    segments.push(Segment::Placeholder(key));
                    rest = &after_open[end + CLOSE.len()..];
                }
            }
        }
        Ok(Template { segments })
    }

    /// Renders against a flat string namespace. Missing keys expand to
    /// an empty string.
    pub fn render(&self, namespace: &HashMap<String, String>) -> Result<String, AppError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(key) => {
                    if let Some(value) = namespace.get(key) {
                        out.push_str(value);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Renders against the resolution engine's template namespace,
    /// where a value may be text, a byte blob, or a deferred
    /// [`crate::datasources::Producer`] invoked at expansion time.
    pub fn render_values(&self, namespace: &HashMap<String, TemplateValue>) -> Result<String, AppError> {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Placeholder(key) => {
                    if let Some(value) = namespace.get(key) {
                        out.push_str(&value.render());
                    }
                }
            }
        }
        Ok(out)
    }
}

/// One builder per rule: owns the compiled templates for every header
/// the rule produces. A header may configure more than one template
/// string; every one is compiled and their rendered output is
/// newline-joined before the final split.
pub struct HeaderBuilder {
    header_to_templates: HashMap<String, Vec<Template>>,
}

impl HeaderBuilder {
    pub fn compile(header_to_template_strs: &HashMap<String, Vec<String>>) -> Result<Self, AppError> {
        let mut header_to_templates = HashMap::with_capacity(header_to_template_strs.len());
        for (header, templates) in header_to_template_strs {
            let compiled = templates
                .iter()
                .map(|t| Template::compile(t))
                .collect::<Result<Vec<_>, _>>()?;
            header_to_templates.insert(header.clone(), compiled);
        }
        Ok(Self { header_to_templates })
    }

    /// Expands every header's templates against `namespace`. A header
    /// whose combined rendered text is empty (after trimming
    /// whitespace) maps to `None`, a marker meaning "remove from
    /// request"; otherwise the text is split on `"\n"` into the ordered
    /// value sequence.
    pub fn generate_headers(
        &self,
        namespace: &HashMap<String, TemplateValue>,
    ) -> Result<HashMap<String, Option<Vec<String>>>, AppError> {
        let mut headers = HashMap::with_capacity(self.header_to_templates.len());
        for (header, templates) in &self.header_to_templates {
            let mut rendered_parts = Vec::with_capacity(templates.len());
            for template in templates {
                rendered_parts.push(template.render_values(namespace)?);
            }
            let rendered = rendered_parts.join("\n");
            if rendered.trim().is_empty() {
                headers.insert(header.clone(), None);
            } else {
                let values = rendered.split('\n').map(|s| s.to_string()).collect();
                headers.insert(header.clone(), Some(values));
            }
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_ns(pairs: &[(&str, &str)]) -> HashMap<String, TemplateValue> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), TemplateValue::Text(v.to_string())))
            .collect()
    }

    #[test]
    fn literal_only_template_renders_unchanged() {
        let t = Template::compile("static-value").unwrap();
        assert_eq!(t.render(&HashMap::new()).unwrap(), "static-value");
    }

    #[test]
    fn single_placeholder_is_substituted() {
        let t = Template::compile("hello {{name}}!").unwrap();
        let mut ns = HashMap::new();
        ns.insert("name".to_string(), "world".to_string());
        assert_eq!(t.render(&ns).unwrap(), "hello world!");
    }

    #[test]
    fn missing_key_expands_to_empty_string() {
        let t = Template::compile("x={{missing}}").unwrap();
        assert_eq!(t.render(&HashMap::new()).unwrap(), "x=");
    }

    #[test]
    fn unterminated_placeholder_is_a_template_error() {
        let err = Template::compile("{{oops").unwrap_err();
        assert!(matches!(err, AppError::Template(_)));
    }

    #[test]
    fn empty_render_produces_removal_marker() {
        let mut map = HashMap::new();
        map.insert("X-Baz".to_string(), vec!["{{missing}}".to_string()]);
        let builder = HeaderBuilder::compile(&map).unwrap();
        let result = builder.generate_headers(&text_ns(&[])).unwrap();
        assert_eq!(result.get("X-Baz").unwrap(), &None);
    }

    #[test]
    fn single_data_source_single_header() {
        let mut map = HashMap::new();
        map.insert("X-Baz".to_string(), vec!["{{hdr_baz}}".to_string()]);
        let builder = HeaderBuilder::compile(&map).unwrap();
        let result = builder
            .generate_headers(&text_ns(&[("hdr_baz", "bar")]))
            .unwrap();
        assert_eq!(result.get("X-Baz").unwrap(), &Some(vec!["bar".to_string()]));
    }

    #[test]
    fn multi_valued_templates_are_newline_joined_before_split() {
        let mut map = HashMap::new();
        map.insert(
            "X-Multi".to_string(),
            vec!["{{a}}".to_string(), "{{b}}".to_string()],
        );
        let builder = HeaderBuilder::compile(&map).unwrap();
        let result = builder
            .generate_headers(&text_ns(&[("a", "one"), ("b", "two")]))
            .unwrap();
        assert_eq!(
            result.get("X-Multi").unwrap(),
            &Some(vec!["one".to_string(), "two".to_string()])
        );
    }

    #[test]
    fn rendered_newlines_split_into_multiple_values() {
        let mut map = HashMap::new();
        map.insert("X-Lines".to_string(), vec!["{{v}}".to_string()]);
        let builder = HeaderBuilder::compile(&map).unwrap();
        let result = builder
            .generate_headers(&text_ns(&[("v", "a\nb\nc")]))
            .unwrap();
        assert_eq!(
            result.get("X-Lines").unwrap(),
            &Some(vec!["a".to_string(), "b".to_string(), "c".to_string()])
        );
    }
}
