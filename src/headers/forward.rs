//! Typed version of the HTTP `Forwarded` header.
//!
//! See [RFC-7239](https://datatracker.ietf.org/doc/html/rfc7239)
//! for the specification of the `Forwarded` header.

use std::fmt;
use std::ops;
use std::str::FromStr;

use thiserror::Error;

use super::parser::{ForwardedHeaderError, ForwardedParser, ParseError};

/// The `Forwarded` header, a standard header for identifying the originating IP address of a client connecting to a web server through a proxy server.
///
/// This header is defined in [RFC-7239](https://datatracker.ietf.org/doc/html/rfc7239).
pub const FORWARDED: http::HeaderName = http::header::FORWARDED;

/// The parameters which can appear in a `Forwarded` element.
///
/// Names are matched case-insensitively when parsing and always rendered in lower case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "lowercase")
)]
pub enum Attribute {
    /// The interface where the request came in to the proxy server.
    By,

    /// The client that initiated the request, or a proxy in the chain.
    For,

    /// The `Host` request header as received by the proxy.
    Host,

    /// The protocol used to make the request, usually `http` or `https`.
    Proto,
}

impl Attribute {
    /// All attributes, in the order they are rendered.
    pub const ALL: [Attribute; 4] = [
        Attribute::By,
        Attribute::For,
        Attribute::Host,
        Attribute::Proto,
    ];

    /// The lower-case parameter name.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Attribute::By => "by",
            Attribute::For => "for",
            Attribute::Host => "host",
            Attribute::Proto => "proto",
        }
    }
}

impl fmt::Display for Attribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Attribute {
    type Err = UnknownAttribute;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Attribute::ALL
            .into_iter()
            .find(|attribute| attribute.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownAttribute(s.to_owned()))
    }
}

/// A parameter name which is not one of `by`, `for`, `host` or `proto`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown attribute: {0}")]
pub struct UnknownAttribute(String);

impl UnknownAttribute {
    /// The name as it appeared in the input.
    pub fn name(&self) -> &str {
        &self.0
    }
}

/// How pairs and elements are joined when rendering.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Separator {
    /// `;` between pairs, `,` between elements.
    #[default]
    Compact,

    /// `"; "` between pairs, `", "` between elements.
    Spaced,
}

impl Separator {
    /// The separator between the pairs of one element.
    pub const fn pair(self) -> &'static str {
        match self {
            Separator::Compact => ";",
            Separator::Spaced => "; ",
        }
    }

    /// The separator between elements.
    pub const fn element(self) -> &'static str {
        match self {
            Separator::Compact => ",",
            Separator::Spaced => ", ",
        }
    }

    fn from_alternate(alternate: bool) -> Self {
        if alternate {
            Separator::Spaced
        } else {
            Separator::Compact
        }
    }
}

/// Options for rendering a [`Forwarded`] chain as text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct RenderOptions {
    /// Use the spaced separators (`"; "` and `", "`).
    pub spaced: bool,

    /// Wrap the whole rendered value in double quotes, escaping quotes and backslashes.
    pub quoted: bool,
}

impl RenderOptions {
    /// Compact, unquoted output.
    pub const fn new() -> Self {
        Self {
            spaced: false,
            quoted: false,
        }
    }

    /// Set whether to use the spaced separators.
    pub const fn spaced(mut self, spaced: bool) -> Self {
        self.spaced = spaced;
        self
    }

    /// Set whether to quote the rendered value.
    pub const fn quoted(mut self, quoted: bool) -> Self {
        self.quoted = quoted;
        self
    }

    /// The separator selected by these options.
    pub const fn separator(&self) -> Separator {
        if self.spaced {
            Separator::Spaced
        } else {
            Separator::Compact
        }
    }
}

fn needs_quotes(value: &str) -> bool {
    value.contains(['"', ';', ',', ' '])
}

fn write_value<W: fmt::Write>(w: &mut W, value: &str) -> fmt::Result {
    if !needs_quotes(value) {
        return w.write_str(value);
    }

    w.write_char('"')?;
    for (i, part) in value.split('"').enumerate() {
        if i > 0 {
            w.write_str("\\\"")?;
        }
        w.write_str(part)?;
    }
    w.write_char('"')
}

/// One hop in a chain of proxies.
///
/// Each field is optional. Setting a field to the empty string clears it, so an
/// element never holds (or renders) an empty value.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Element {
    #[cfg_attr(
        feature = "serde",
        serde(
            default,
            skip_serializing_if = "Option::is_none",
            deserialize_with = "non_empty"
        )
    )]
    by: Option<String>,
    #[cfg_attr(
        feature = "serde",
        serde(
            default,
            skip_serializing_if = "Option::is_none",
            deserialize_with = "non_empty"
        )
    )]
    r#for: Option<String>,
    #[cfg_attr(
        feature = "serde",
        serde(
            default,
            skip_serializing_if = "Option::is_none",
            deserialize_with = "non_empty"
        )
    )]
    host: Option<String>,
    #[cfg_attr(
        feature = "serde",
        serde(
            default,
            skip_serializing_if = "Option::is_none",
            deserialize_with = "non_empty"
        )
    )]
    proto: Option<String>,
}

#[cfg(feature = "serde")]
fn non_empty<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value: Option<String> = serde::Deserialize::deserialize(deserializer)?;
    Ok(value.filter(|value| !value.is_empty()))
}

impl Element {
    /// Create an element with no fields set.
    pub fn new() -> Self {
        Self::default()
    }

    /// The `by` field, which identifies the interface that received the request.
    pub fn by(&self) -> Option<&str> {
        self.by.as_deref()
    }

    /// The `for` field, which identifies the client that initiated the request.
    pub fn r#for(&self) -> Option<&str> {
        self.r#for.as_deref()
    }

    /// The `host` field, which identifies the original host requested by the client.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// The `proto` field, which identifies the protocol used by the client to connect to the proxy.
    pub fn proto(&self) -> Option<&str> {
        self.proto.as_deref()
    }

    /// The value of a field.
    pub fn get(&self, attribute: Attribute) -> Option<&str> {
        self.slot(attribute).as_deref()
    }

    /// Set a field, replacing any previous value.
    ///
    /// An empty value clears the field.
    pub fn set(&mut self, attribute: Attribute, value: impl Into<String>) {
        let value = value.into();
        *self.slot_mut(attribute) = (!value.is_empty()).then_some(value);
    }

    /// Builder form of [`Element::set`].
    pub fn with(mut self, attribute: Attribute, value: impl Into<String>) -> Self {
        self.set(attribute, value);
        self
    }

    /// Clear a field, returning the previous value.
    pub fn remove(&mut self, attribute: Attribute) -> Option<String> {
        self.slot_mut(attribute).take()
    }

    /// Check if any of the fields are set.
    pub fn any(&self) -> bool {
        self.by.is_some() || self.r#for.is_some() || self.host.is_some() || self.proto.is_some()
    }

    /// Check if none of the fields are set.
    pub fn is_empty(&self) -> bool {
        !self.any()
    }

    /// The fields which are set, in rendering order.
    pub fn pairs(&self) -> impl Iterator<Item = (Attribute, &str)> + '_ {
        Attribute::ALL
            .into_iter()
            .filter_map(move |attribute| self.get(attribute).map(|value| (attribute, value)))
    }

    /// Render this element as `name=value` pairs.
    pub fn render(&self, separator: Separator) -> String {
        let mut out = String::new();
        // Writing to a `String` cannot fail.
        let _ = self.write_to(&mut out, separator);
        out
    }

    fn write_to<W: fmt::Write>(&self, w: &mut W, separator: Separator) -> fmt::Result {
        for (i, (attribute, value)) in self.pairs().enumerate() {
            if i > 0 {
                w.write_str(separator.pair())?;
            }
            w.write_str(attribute.as_str())?;
            w.write_char('=')?;
            write_value(w, value)?;
        }
        Ok(())
    }

    fn slot(&self, attribute: Attribute) -> &Option<String> {
        match attribute {
            Attribute::By => &self.by,
            Attribute::For => &self.r#for,
            Attribute::Host => &self.host,
            Attribute::Proto => &self.proto,
        }
    }

    fn slot_mut(&mut self, attribute: Attribute) -> &mut Option<String> {
        match attribute {
            Attribute::By => &mut self.by,
            Attribute::For => &mut self.r#for,
            Attribute::Host => &mut self.host,
            Attribute::Proto => &mut self.proto,
        }
    }
}

/// `{}` renders the compact form, `{:#}` the spaced form.
impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_to(f, Separator::from_alternate(f.alternate()))
    }
}

/// The full chain of `Forwarded` elements, in the order they were received.
///
/// Multiple `Forwarded` headers, or multiple comma separated elements in one header,
/// all contribute to a single chain. The chain is never reordered or deduplicated.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(transparent)
)]
pub struct Forwarded {
    elements: Vec<Element>,
}

impl Forwarded {
    /// Create an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty chain with room for `capacity` elements.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            elements: Vec::with_capacity(capacity),
        }
    }

    /// Parse a `Forwarded` field value with the default (permissive) parser.
    pub fn parse(raw: &str) -> Result<Self, ParseError> {
        ForwardedParser::new().parse(raw)
    }

    /// Parse and concatenate every `Forwarded` header in a header map.
    ///
    /// Returns [`ForwardedHeaderError::NotFound`] when no `Forwarded` header is present,
    /// which is distinct from a header which is present but empty.
    pub fn from_headers(headers: &http::HeaderMap) -> Result<Self, ForwardedHeaderError> {
        ForwardedParser::new().parse_headers(headers)
    }

    /// Append an element to the end of the chain.
    pub fn push(&mut self, element: Element) {
        self.elements.push(element);
    }

    /// The elements of the chain.
    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    /// Mutable access to the elements of the chain.
    pub fn elements_mut(&mut self) -> &mut [Element] {
        &mut self.elements
    }

    /// Convert into the underlying elements.
    pub fn into_elements(self) -> Vec<Element> {
        self.elements
    }

    /// Check if any element has a field set.
    pub fn any(&self) -> bool {
        self.elements.iter().any(Element::any)
    }

    /// Render the chain with the given separators.
    pub fn render(&self, separator: Separator) -> String {
        let mut out = String::new();
        let _ = self.write_to(&mut out, separator);
        out
    }

    /// Render the chain according to `options`.
    pub fn render_with(&self, options: RenderOptions) -> String {
        self.display(options).to_string()
    }

    /// A [`fmt::Display`] adaptor which renders the chain according to `options`.
    pub fn display(&self, options: RenderOptions) -> Rendered<'_> {
        Rendered {
            forwarded: self,
            options,
        }
    }

    /// Convert this chain to a `http::HeaderValue`, using the spaced form.
    pub fn to_header_value(&self) -> Result<http::HeaderValue, http::header::InvalidHeaderValue> {
        http::HeaderValue::try_from(self.render(Separator::Spaced))
    }

    /// Replace the `Forwarded` header in `headers` with this chain.
    ///
    /// Nothing is written when the chain is empty.
    pub fn set_header(
        &self,
        headers: &mut http::HeaderMap,
    ) -> Result<(), http::header::InvalidHeaderValue> {
        if self.elements.is_empty() {
            return Ok(());
        }

        headers.insert(FORWARDED, self.to_header_value()?);
        Ok(())
    }

    fn write_to<W: fmt::Write>(&self, w: &mut W, separator: Separator) -> fmt::Result {
        for (i, element) in self.elements.iter().enumerate() {
            if i > 0 {
                w.write_str(separator.element())?;
            }
            element.write_to(w, separator)?;
        }
        Ok(())
    }
}

/// `{}` renders the compact form, `{:#}` the spaced form.
impl fmt::Display for Forwarded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_to(f, Separator::from_alternate(f.alternate()))
    }
}

impl FromStr for Forwarded {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Forwarded::parse(s)
    }
}

impl ops::Deref for Forwarded {
    type Target = [Element];

    fn deref(&self) -> &Self::Target {
        &self.elements
    }
}

impl From<Vec<Element>> for Forwarded {
    fn from(elements: Vec<Element>) -> Self {
        Self { elements }
    }
}

impl From<Element> for Forwarded {
    fn from(element: Element) -> Self {
        Self {
            elements: vec![element],
        }
    }
}

impl FromIterator<Element> for Forwarded {
    fn from_iter<I: IntoIterator<Item = Element>>(iter: I) -> Self {
        Self {
            elements: iter.into_iter().collect(),
        }
    }
}

impl Extend<Element> for Forwarded {
    fn extend<I: IntoIterator<Item = Element>>(&mut self, iter: I) {
        self.elements.extend(iter);
    }
}

impl IntoIterator for Forwarded {
    type Item = Element;
    type IntoIter = std::vec::IntoIter<Self::Item>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.into_iter()
    }
}

impl<'a> IntoIterator for &'a Forwarded {
    type Item = &'a Element;
    type IntoIter = std::slice::Iter<'a, Element>;

    fn into_iter(self) -> Self::IntoIter {
        self.elements.iter()
    }
}

/// Renders a [`Forwarded`] chain with explicit [`RenderOptions`].
///
/// Created by [`Forwarded::display`].
#[derive(Debug, Clone, Copy)]
pub struct Rendered<'a> {
    forwarded: &'a Forwarded,
    options: RenderOptions,
}

impl fmt::Display for Rendered<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let separator = self.options.separator();
        if self.options.quoted {
            write!(f, "{:?}", self.forwarded.render(separator))
        } else {
            self.forwarded.write_to(f, separator)
        }
    }
}
