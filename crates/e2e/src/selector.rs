//! Symbolic element references
//!
//! A [`LocatorRef`] names *how* an element is found, never a live handle. The
//! selector is capability-polymorphic: semantic selectors (test id, ARIA role,
//! label, text) are preferred, structural XPath remains available for legacy
//! paths. The occurrence index disambiguates repeated matches (list rows,
//! repeated buttons); index 0 is the first match in document order.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::E2eError;

/// How an element is found in a frame.
///
/// Written as a single-entry map keyed by the selector kind
/// (`css: .order_item`, `role: {role: button, name: Sair}`) or as the
/// `engine=value` shorthand string.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Selector {
    /// Structural document path, e.g. `html/body/div[2]/header//button`
    Xpath(String),
    /// CSS selector
    Css(String),
    /// `data-testid` attribute
    TestId(String),
    /// ARIA role with optional accessible name
    Role { role: String, name: Option<String> },
    /// Form control by its label text
    Label(String),
    /// Element by visible text
    Text(String),
}

impl Selector {
    pub fn xpath(path: impl Into<String>) -> Self {
        Self::Xpath(path.into())
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Self::Css(selector.into())
    }

    pub fn test_id(id: impl Into<String>) -> Self {
        Self::TestId(id.into())
    }

    pub fn role(role: impl Into<String>, name: Option<&str>) -> Self {
        Self::Role {
            role: role.into(),
            name: name.map(str::to_string),
        }
    }

    pub fn label(text: impl Into<String>) -> Self {
        Self::Label(text.into())
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Semantic selectors survive layout changes; structural ones do not.
    pub fn is_structural(&self) -> bool {
        matches!(self, Selector::Xpath(_) | Selector::Css(_))
    }

    /// Pair this selector with an occurrence index.
    pub fn nth(self, nth: usize) -> LocatorRef {
        LocatorRef {
            selector: self,
            nth,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Xpath(p) => write!(f, "xpath={p}"),
            Selector::Css(s) => write!(f, "css={s}"),
            Selector::TestId(id) => write!(f, "testid={id}"),
            Selector::Role { role, name: Some(n) } => write!(f, "role={role}[name={n}]"),
            Selector::Role { role, name: None } => write!(f, "role={role}"),
            Selector::Label(t) => write!(f, "label={t}"),
            Selector::Text(t) => write!(f, "text={t}"),
        }
    }
}

impl FromStr for Selector {
    type Err = E2eError;

    /// Parses the `engine=value` shorthand used in config files.
    ///
    /// Without an engine prefix, paths starting with `/` or `html` are XPath
    /// and everything else is CSS.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(E2eError::SpecParse("empty selector".to_string()));
        }

        let Some((engine, value)) = s.split_once('=') else {
            return Ok(bare_selector(s));
        };

        let selector = match engine {
            "xpath" => Selector::Xpath(value.to_string()),
            "css" => Selector::Css(value.to_string()),
            "testid" | "test_id" => Selector::TestId(value.to_string()),
            "label" => Selector::Label(value.to_string()),
            "text" => Selector::Text(value.to_string()),
            "role" => parse_role(value)?,
            // `input[name=email]` has an `=` but no engine prefix
            _ => bare_selector(s),
        };
        Ok(selector)
    }
}

fn bare_selector(s: &str) -> Selector {
    if s.starts_with('/') || s.starts_with("html") {
        Selector::Xpath(s.to_string())
    } else {
        Selector::Css(s.to_string())
    }
}

fn parse_role(value: &str) -> Result<Selector, E2eError> {
    match value.split_once('[') {
        None => Ok(Selector::role(value, None)),
        Some((role, rest)) => {
            let name = rest
                .strip_suffix(']')
                .and_then(|inner| inner.strip_prefix("name="))
                .map(|n| n.trim_matches('"'))
                .ok_or_else(|| E2eError::SpecParse(format!("bad role selector: role={value}")))?;
            Ok(Selector::role(role, Some(name)))
        }
    }
}

/// Selector plus occurrence index; resolved freshly on every use.
///
/// The serialized form is the selector map with an optional `nth` key
/// beside the kind: `{xpath: html/body/div[2]/button, nth: 1}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LocatorRef {
    pub selector: Selector,
    pub nth: usize,
}

impl LocatorRef {
    pub fn new(selector: Selector, nth: usize) -> Self {
        Self { selector, nth }
    }

    pub fn first(selector: Selector) -> Self {
        Self::new(selector, 0)
    }
}

impl fmt::Display for LocatorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.nth == 0 {
            write!(f, "{}", self.selector)
        } else {
            write!(f, "{} >> nth={}", self.selector, self.nth)
        }
    }
}

impl FromStr for LocatorRef {
    type Err = E2eError;

    /// Accepts an optional ` >> nth=N` suffix.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once(" >> nth=") {
            Some((sel, n)) => {
                let nth = n
                    .trim()
                    .parse()
                    .map_err(|_| E2eError::SpecParse(format!("bad occurrence index in '{s}'")))?;
                Ok(Self::new(sel.parse()?, nth))
            }
            None => Ok(Self::first(s.parse()?)),
        }
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RoleName {
    role: String,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Serialize)]
struct RoleNameRef<'a> {
    role: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

/// Map form shared by [`Selector`] and [`LocatorRef`]: one optional key per
/// selector kind, exactly one of which must be present.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct SelectorFields {
    #[serde(default)]
    xpath: Option<String>,
    #[serde(default)]
    css: Option<String>,
    #[serde(default)]
    test_id: Option<String>,
    #[serde(default)]
    role: Option<RoleName>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    nth: Option<usize>,
}

impl SelectorFields {
    fn into_parts<E: de::Error>(self) -> Result<(Selector, Option<usize>), E> {
        let mut kinds = Vec::with_capacity(1);
        if let Some(v) = self.xpath {
            kinds.push(Selector::Xpath(v));
        }
        if let Some(v) = self.css {
            kinds.push(Selector::Css(v));
        }
        if let Some(v) = self.test_id {
            kinds.push(Selector::TestId(v));
        }
        if let Some(v) = self.role {
            kinds.push(Selector::Role {
                role: v.role,
                name: v.name,
            });
        }
        if let Some(v) = self.label {
            kinds.push(Selector::Label(v));
        }
        if let Some(v) = self.text {
            kinds.push(Selector::Text(v));
        }

        let selector = match kinds.len() {
            1 => kinds.remove(0),
            0 => return Err(E::custom(format!("selector needs one of {SELECTOR_KINDS:?}"))),
            _ => {
                let found: Vec<String> = kinds.iter().map(Selector::to_string).collect();
                return Err(E::custom(format!(
                    "selector has more than one kind: {}",
                    found.join(", ")
                )));
            }
        };
        Ok((selector, self.nth))
    }
}

const SELECTOR_KINDS: &[&str] = &["xpath", "css", "test_id", "role", "label", "text"];

impl Selector {
    fn serialize_entry<M: SerializeMap>(&self, map: &mut M) -> Result<(), M::Error> {
        match self {
            Selector::Xpath(v) => map.serialize_entry("xpath", v),
            Selector::Css(v) => map.serialize_entry("css", v),
            Selector::TestId(v) => map.serialize_entry("test_id", v),
            Selector::Role { role, name } => map.serialize_entry(
                "role",
                &RoleNameRef {
                    role: role.as_str(),
                    name: name.as_deref(),
                },
            ),
            Selector::Label(v) => map.serialize_entry("label", v),
            Selector::Text(v) => map.serialize_entry("text", v),
        }
    }
}

impl Serialize for Selector {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        self.serialize_entry(&mut map)?;
        map.end()
    }
}

impl Serialize for LocatorRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.nth == 0 { 1 } else { 2 };
        let mut map = serializer.serialize_map(Some(len))?;
        self.selector.serialize_entry(&mut map)?;
        if self.nth != 0 {
            map.serialize_entry("nth", &self.nth)?;
        }
        map.end()
    }
}

/// Accepts the map form or the shorthand string, then hands the pair to
/// `build`.
struct SelectorVisitor<T> {
    expecting: &'static str,
    build: fn(Selector, Option<usize>) -> Result<T, String>,
}

impl<'de, T> Visitor<'de> for SelectorVisitor<T> {
    type Value = T;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.expecting)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<T, E> {
        let loc: LocatorRef = v.parse().map_err(|e: E2eError| E::custom(e))?;
        let nth = (loc.nth != 0).then_some(loc.nth);
        (self.build)(loc.selector, nth).map_err(E::custom)
    }

    fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<T, A::Error> {
        let fields = SelectorFields::deserialize(de::value::MapAccessDeserializer::new(map))?;
        let (selector, nth) = fields.into_parts::<A::Error>()?;
        (self.build)(selector, nth).map_err(de::Error::custom)
    }
}

impl<'de> Deserialize<'de> for Selector {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(SelectorVisitor {
            expecting: "a selector map such as `css: .order_item` or an `engine=value` string",
            build: |selector, nth| match nth {
                None => Ok(selector),
                Some(_) => Err(format!("occurrence index not allowed on a bare selector ({selector})")),
            },
        })
    }
}

impl<'de> Deserialize<'de> for LocatorRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(SelectorVisitor {
            expecting: "a locator map such as `{xpath: ..., nth: 1}` or an `engine=value` string",
            build: |selector, nth| Ok(LocatorRef::new(selector, nth.unwrap_or(0))),
        })
    }
}
