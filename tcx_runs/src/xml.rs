//! Owned XML element tree with namespace-aware tag matching.

use std::fs;
use std::path::Path;

use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::NsReader;
use tracing::warn;

use crate::config::{ParseOptions, TagMode};
use crate::TcxError;

pub const TCX_NAMESPACE: &str = "http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2";

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Element {
    pub local_name: String,
    /// Resolved namespace URI, `None` when the element is unbound.
    pub namespace: Option<String>,
    pub attributes: Vec<(String, String)>,
    /// Trimmed text content directly inside this element.
    pub text: String,
    pub children: Vec<Element>,
}

impl Element {
    fn from_start(ns: &ResolveResult, start: &BytesStart) -> Result<Self, TcxError> {
        let namespace = match ns {
            ResolveResult::Bound(Namespace(uri)) => Some(String::from_utf8_lossy(uri).into_owned()),
            _ => None,
        };
        let mut attributes = Vec::new();
        for attr in start.attributes() {
            let attr = attr.map_err(quick_xml::Error::from)?;
            let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
            let value = attr.unescape_value()?.into_owned();
            attributes.push((key, value));
        }
        Ok(Self {
            local_name: String::from_utf8_lossy(start.local_name().as_ref()).into_owned(),
            namespace,
            attributes,
            text: String::new(),
            children: Vec::new(),
        })
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Text content, `None` when the element is empty.
    pub fn text(&self) -> Option<&str> {
        if self.text.is_empty() {
            None
        } else {
            Some(&self.text)
        }
    }

    /// Pre-order walk starting with `self`.
    pub fn descendants(&self) -> Descendants<'_> {
        Descendants { stack: vec![self] }
    }

    pub fn child<'a>(&'a self, tags: &TagMatcher, name: &str) -> Option<&'a Element> {
        self.children.iter().find(|child| tags.is(child, name))
    }

    pub fn children_named<'a>(
        &'a self,
        tags: &'a TagMatcher,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.children.iter().filter(move |child| tags.is(child, name))
    }

    pub fn descendants_named<'a>(
        &'a self,
        tags: &'a TagMatcher,
        name: &'a str,
    ) -> impl Iterator<Item = &'a Element> + 'a {
        self.descendants().filter(move |el| tags.is(el, name))
    }

    /// Raw `name=text` listing of the subtree below this element, used in
    /// skip diagnostics.
    pub fn describe_children(&self) -> String {
        self.descendants()
            .skip(1)
            .filter_map(|el| el.text().map(|text| format!("{}={}", el.local_name, text)))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

pub struct Descendants<'a> {
    stack: Vec<&'a Element>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = &'a Element;

    fn next(&mut self) -> Option<Self::Item> {
        let el = self.stack.pop()?;
        self.stack.extend(el.children.iter().rev());
        Some(el)
    }
}

/// Decides whether an element stands for a given TCX tag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TagMatcher {
    Qualified(String),
    Substring,
}

impl TagMatcher {
    pub fn is(&self, el: &Element, name: &str) -> bool {
        match self {
            TagMatcher::Qualified(uri) => {
                el.local_name == name && el.namespace.as_deref() == Some(uri.as_str())
            }
            TagMatcher::Substring => el.local_name.contains(name),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Document {
    root: Element,
    tags: TagMatcher,
}

impl Document {
    pub fn open(path: &Path, opts: &ParseOptions) -> Result<Self, TcxError> {
        let content = fs::read_to_string(path).map_err(|source| TcxError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, opts)
    }

    pub fn parse(input: &str, opts: &ParseOptions) -> Result<Self, TcxError> {
        let root = parse_tree(input)?;
        let tags = match opts.tag_mode {
            TagMode::Qualified => TagMatcher::Qualified(opts.namespace.clone()),
            TagMode::Substring => TagMatcher::Substring,
            TagMode::Auto => {
                if root.namespace.as_deref() == Some(opts.namespace.as_str()) {
                    TagMatcher::Qualified(opts.namespace.clone())
                } else {
                    warn!(
                        "Root <{}> is not in namespace {}, matching tags by substring",
                        root.local_name, opts.namespace
                    );
                    TagMatcher::Substring
                }
            }
        };
        Ok(Self { root, tags })
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn tags(&self) -> &TagMatcher {
        &self.tags
    }

    pub fn descendants_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Element> + 'a {
        self.root.descendants_named(&self.tags, name)
    }
}

fn parse_tree(input: &str) -> Result<Element, TcxError> {
    let mut reader = NsReader::from_str(input);
    reader.config_mut().trim_text(true);

    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let (ns, event) = reader.read_resolved_event()?;
        match event {
            Event::Start(start) => {
                let el = Element::from_start(&ns, &start)?;
                stack.push(el);
            }
            Event::Empty(start) => {
                let el = Element::from_start(&ns, &start)?;
                attach(&mut stack, &mut root, el)?;
            }
            Event::End(_) => {
                let el = stack
                    .pop()
                    .ok_or_else(|| TcxError::MalformedXml("unexpected closing tag".into()))?;
                attach(&mut stack, &mut root, el)?;
            }
            Event::Text(text) => {
                if let Some(current) = stack.last_mut() {
                    current.text.push_str(&text.unescape()?);
                }
            }
            Event::CData(data) => {
                if let Some(current) = stack.last_mut() {
                    current
                        .text
                        .push_str(String::from_utf8_lossy(&data.into_inner()).trim());
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = stack.last() {
        return Err(TcxError::MalformedXml(format!(
            "<{}> is never closed",
            open.local_name
        )));
    }
    root.ok_or_else(|| TcxError::MalformedXml("document has no root element".into()))
}

fn attach(
    stack: &mut [Element],
    root: &mut Option<Element>,
    el: Element,
) -> Result<(), TcxError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(el);
    } else if root.is_none() {
        *root = Some(el);
    } else {
        return Err(TcxError::MalformedXml(format!(
            "second root element <{}>",
            el.local_name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMESPACED: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<TrainingCenterDatabase xmlns="http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2"
    xmlns:ns3="http://www.garmin.com/xmlschemas/ActivityExtension/v2">
  <Activities>
    <Activity Sport="Running">
      <Id>2013-06-06T16:02:31Z</Id>
      <Lap StartTime="2013-06-06T16:02:31Z">
        <Track>
          <Trackpoint>
            <Time>2013-06-06T16:02:31Z</Time>
            <ns3:Time>not a tcx time</ns3:Time>
          </Trackpoint>
        </Track>
      </Lap>
    </Activity>
  </Activities>
</TrainingCenterDatabase>"#;

    #[test]
    fn test_parse_tree_resolves_namespaces() {
        let doc = Document::parse(NAMESPACED, &ParseOptions::default()).unwrap();
        assert_eq!(doc.root().local_name, "TrainingCenterDatabase");
        assert_eq!(doc.root().namespace.as_deref(), Some(TCX_NAMESPACE));
        assert_eq!(doc.tags(), &TagMatcher::Qualified(TCX_NAMESPACE.to_string()));

        let lap = doc.descendants_named("Lap").next().unwrap();
        assert_eq!(lap.attribute("StartTime"), Some("2013-06-06T16:02:31Z"));
    }

    #[test]
    fn test_qualified_match_ignores_foreign_namespace() {
        let doc = Document::parse(NAMESPACED, &ParseOptions::default()).unwrap();
        let tp = doc.descendants_named("Trackpoint").next().unwrap();
        let times: Vec<_> = tp.children_named(doc.tags(), "Time").collect();
        assert_eq!(times.len(), 1);
        assert_eq!(times[0].text(), Some("2013-06-06T16:02:31Z"));
    }

    #[test]
    fn test_auto_falls_back_to_substring_without_namespace() {
        let input = "<Db><Activities><Activity><Lap/></Activity></Activities></Db>";
        let doc = Document::parse(input, &ParseOptions::default()).unwrap();
        assert_eq!(doc.tags(), &TagMatcher::Substring);
        assert_eq!(doc.descendants_named("Activity").count(), 1);
        assert_eq!(doc.descendants_named("Lap").count(), 1);
    }

    #[test]
    fn test_forced_qualified_mode_finds_nothing_unbound() {
        let opts = ParseOptions {
            tag_mode: TagMode::Qualified,
            ..ParseOptions::default()
        };
        let doc = Document::parse("<Db><Lap/></Db>", &opts).unwrap();
        assert_eq!(doc.descendants_named("Lap").count(), 0);
    }

    #[test]
    fn test_unclosed_element_is_an_error() {
        let err = Document::parse("<Db><Lap>", &ParseOptions::default());
        assert!(err.is_err());
    }

    #[test]
    fn test_describe_children_lists_raw_values() {
        let doc = Document::parse(
            "<Trackpoint><Time>t0</Time><Position><LatitudeDegrees>40.1</LatitudeDegrees></Position></Trackpoint>",
            &ParseOptions::default(),
        )
        .unwrap();
        assert_eq!(
            doc.root().describe_children(),
            "Time=t0, LatitudeDegrees=40.1"
        );
    }
}
