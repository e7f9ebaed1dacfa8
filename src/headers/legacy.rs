//! The de-facto `X-Forwarded-*` and `X-Real-*` headers which predate `Forwarded`.
//!
//! Each legacy header carries a single attribute for every hop, as a comma separated
//! list. Aligning them by position rebuilds the equivalent `Forwarded` chain.

use std::fmt;

use thiserror::Error;

use super::forward::{Attribute, Element, Forwarded};

/// The `X-Forwarded-By` header, identifying the interface where the request came in to the proxy.
pub const X_FORWARDED_BY: http::HeaderName =
    http::header::HeaderName::from_static("x-forwarded-by");

/// The `X-Forwarded-For` header, a de-facto standard header for identifying the originating IP
/// address of a client connecting to a web server through a proxy server. It has been replaced by `Forwarded`.
pub const X_FORWARDED_FOR: http::HeaderName =
    http::header::HeaderName::from_static("x-forwarded-for");

/// The `X-Forwarded-Host` header, a de-facto standard header for identifying the original host requested by the client in the `Host` HTTP request header.
pub const X_FORWARDED_HOST: http::HeaderName =
    http::header::HeaderName::from_static("x-forwarded-host");

/// The `X-Forwarded-Proto` header, a de-facto standard header for identifying the protocol (HTTP or HTTPS) that a client used to connect to your proxy or load balancer.
pub const X_FORWARDED_PROTO: http::HeaderName =
    http::header::HeaderName::from_static("x-forwarded-proto");

/// The `X-Real-IP` header, set by some proxies to the address of the client they saw.
pub const X_REAL_IP: http::HeaderName = http::header::HeaderName::from_static("x-real-ip");

/// The `X-Real-Host` header, set by some proxies to the host requested by the client.
pub const X_REAL_HOST: http::HeaderName = http::header::HeaderName::from_static("x-real-host");

/// A legacy forwarding header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegacyHeader {
    /// `X-Forwarded-By`, mapped to `by`.
    XForwardedBy,

    /// `X-Forwarded-For`, mapped to `for`.
    XForwardedFor,

    /// `X-Forwarded-Host`, mapped to `host`.
    XForwardedHost,

    /// `X-Forwarded-Proto`, mapped to `proto`.
    XForwardedProto,

    /// `X-Real-Host`, mapped to `host`.
    XRealHost,

    /// `X-Real-IP`, mapped to `for`.
    XRealIp,
}

impl LegacyHeader {
    /// Every legacy header, in the order [`align_headers`] applies them.
    ///
    /// The `X-Real-*` headers come last, so they take priority over
    /// `X-Forwarded-*` at the positions they share.
    pub const ALL: [LegacyHeader; 6] = [
        LegacyHeader::XForwardedBy,
        LegacyHeader::XForwardedFor,
        LegacyHeader::XForwardedHost,
        LegacyHeader::XForwardedProto,
        LegacyHeader::XRealHost,
        LegacyHeader::XRealIp,
    ];

    /// The `Forwarded` attribute this header carries.
    pub const fn attribute(&self) -> Attribute {
        match self {
            LegacyHeader::XForwardedBy => Attribute::By,
            LegacyHeader::XForwardedFor | LegacyHeader::XRealIp => Attribute::For,
            LegacyHeader::XForwardedHost | LegacyHeader::XRealHost => Attribute::Host,
            LegacyHeader::XForwardedProto => Attribute::Proto,
        }
    }

    /// The header name.
    pub const fn header_name(&self) -> http::HeaderName {
        match self {
            LegacyHeader::XForwardedBy => X_FORWARDED_BY,
            LegacyHeader::XForwardedFor => X_FORWARDED_FOR,
            LegacyHeader::XForwardedHost => X_FORWARDED_HOST,
            LegacyHeader::XForwardedProto => X_FORWARDED_PROTO,
            LegacyHeader::XRealHost => X_REAL_HOST,
            LegacyHeader::XRealIp => X_REAL_IP,
        }
    }

    /// Collect this header from a header map.
    ///
    /// Repeated header lines are joined with `,`. Lines which are not visible ASCII
    /// are skipped. Returns `None` when the header is absent.
    pub fn field(&self, headers: &http::HeaderMap) -> Option<LegacyField> {
        let name = self.header_name();
        let mut value: Option<String> = None;

        for entry in headers.get_all(&name) {
            let Ok(entry) = entry.to_str() else {
                tracing::debug!(header = %name, "skipping header value with opaque bytes");
                continue;
            };

            match value.as_mut() {
                Some(value) => {
                    value.push(',');
                    value.push_str(entry);
                }
                None => value = Some(entry.to_owned()),
            }
        }

        value.map(|value| LegacyField::from_header(*self, value))
    }
}

impl fmt::Display for LegacyHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.header_name().as_str())
    }
}

/// The raw value of a legacy header, tagged with the attribute it carries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LegacyField {
    attribute: Attribute,
    value: String,
}

impl LegacyField {
    /// Create a field carrying `attribute`.
    pub fn new(attribute: Attribute, value: impl Into<String>) -> Self {
        Self {
            attribute,
            value: value.into(),
        }
    }

    /// Create a field from the value of a legacy header.
    pub fn from_header(header: LegacyHeader, value: impl Into<String>) -> Self {
        Self::new(header.attribute(), value)
    }

    /// An `X-Forwarded-By` value.
    pub fn by(value: impl Into<String>) -> Self {
        Self::new(Attribute::By, value)
    }

    /// An `X-Forwarded-For` value.
    pub fn r#for(value: impl Into<String>) -> Self {
        Self::new(Attribute::For, value)
    }

    /// An `X-Forwarded-Host` value.
    pub fn host(value: impl Into<String>) -> Self {
        Self::new(Attribute::Host, value)
    }

    /// An `X-Forwarded-Proto` value.
    pub fn proto(value: impl Into<String>) -> Self {
        Self::new(Attribute::Proto, value)
    }

    /// An `X-Real-IP` value.
    pub fn real_ip(value: impl Into<String>) -> Self {
        Self::from_header(LegacyHeader::XRealIp, value)
    }

    /// An `X-Real-Host` value.
    pub fn real_host(value: impl Into<String>) -> Self {
        Self::from_header(LegacyHeader::XRealHost, value)
    }

    /// The attribute this field carries.
    pub fn attribute(&self) -> Attribute {
        self.attribute
    }

    /// The raw header value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// The per-hop values, split on `,` and trimmed.
    pub fn values(&self) -> impl Iterator<Item = &str> + '_ {
        self.value.split(',').map(str::trim)
    }

    /// The number of hops this field describes.
    ///
    /// An empty value still describes one (empty) hop.
    pub fn count(&self) -> usize {
        self.value.split(',').count()
    }

    fn apply(&self, elements: &mut [Element]) {
        for (element, value) in elements.iter_mut().zip(self.values()) {
            element.set(self.attribute, value);
        }
    }
}

/// Legacy fields passed to [`from_fields`] describe different numbers of hops.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid length: {attribute} field has {found} values, expected {expected}")]
pub struct LengthMismatch {
    attribute: Attribute,
    expected: usize,
    found: usize,
}

impl LengthMismatch {
    /// The attribute of the first field whose length differed.
    pub fn attribute(&self) -> Attribute {
        self.attribute
    }

    /// The number of values in the first field.
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// The number of values in the mismatched field.
    pub fn found(&self) -> usize {
        self.found
    }
}

/// Build a chain from legacy fields which must all describe the same number of hops.
///
/// Fields are applied in order, so when two fields carry the same attribute
/// the later one wins.
pub fn from_fields(fields: &[LegacyField]) -> Result<Forwarded, LengthMismatch> {
    let Some((first, rest)) = fields.split_first() else {
        return Ok(Forwarded::new());
    };

    let expected = first.count();
    for field in rest {
        let found = field.count();
        if found != expected {
            return Err(LengthMismatch {
                attribute: field.attribute,
                expected,
                found,
            });
        }
    }

    let mut elements = vec![Element::new(); expected];
    for field in fields {
        field.apply(&mut elements);
    }

    Ok(elements.into())
}

/// Build a chain from legacy fields of any length.
///
/// The chain is as long as the longest field. Each field is applied in order to the
/// positions it covers, overwriting what earlier fields set there, and leaves the
/// remaining positions alone.
pub fn align_fields(fields: &[LegacyField]) -> Forwarded {
    let size = fields.iter().map(LegacyField::count).max().unwrap_or(0);

    let mut elements = vec![Element::new(); size];
    for field in fields {
        field.apply(&mut elements);
    }

    elements.into()
}

/// Build a chain from every legacy header present in `headers`.
///
/// Headers are applied in [`LegacyHeader::ALL`] order, so `X-Real-IP` and
/// `X-Real-Host` override `X-Forwarded-For` and `X-Forwarded-Host` where they overlap.
pub fn align_headers(headers: &http::HeaderMap) -> Forwarded {
    let fields = LegacyHeader::ALL
        .iter()
        .filter_map(|header| header.field(headers))
        .collect::<Vec<_>>();

    align_fields(&fields)
}
