//! Middleware which records the forwarding chain of a request.
//!
//! The chain is resolved from the `Forwarded` header, the legacy `X-Forwarded-*`
//! headers, or both, and inserted into the request extensions as a [`Forwarded`]
//! value for the inner service to inspect.

use super::forward::{Forwarded, FORWARDED};
use super::legacy::align_headers;
use super::parser::{ForwardedHeaderError, ForwardedParser};

/// Which headers to read the forwarding chain from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ForwardedSource {
    /// Only the standard `Forwarded` header.
    Forwarded,

    /// Only the legacy `X-Forwarded-*` and `X-Real-*` headers.
    Legacy,

    /// The `Forwarded` header when present, otherwise the legacy headers.
    #[default]
    PreferForwarded,
}

/// Configuration for resolving the forwarding chain of a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ExtractForwardedConfig {
    /// Which headers to read.
    pub source: ForwardedSource,

    /// Parse the `Forwarded` header strictly.
    pub strict: bool,

    /// When the `Forwarded` header fails to parse, keep the elements parsed before the error.
    pub keep_partial: bool,
}

impl ExtractForwardedConfig {
    /// Resolve the forwarding chain from a set of request headers.
    ///
    /// Returns `None` when the selected headers are absent, or when the `Forwarded`
    /// header is invalid and `keep_partial` is not set.
    pub fn resolve(&self, headers: &http::HeaderMap) -> Option<Forwarded> {
        match self.source {
            ForwardedSource::Forwarded => self.standard(headers),
            ForwardedSource::Legacy => legacy(headers),
            ForwardedSource::PreferForwarded => {
                if headers.contains_key(FORWARDED) {
                    self.standard(headers)
                } else {
                    legacy(headers)
                }
            }
        }
    }

    fn standard(&self, headers: &http::HeaderMap) -> Option<Forwarded> {
        let parser = ForwardedParser::new().strict(self.strict);
        match parser.parse_headers(headers) {
            Ok(forwarded) => Some(forwarded),
            Err(ForwardedHeaderError::NotFound) => None,
            Err(ForwardedHeaderError::Parse(error)) => {
                tracing::debug!(%error, "invalid forwarded header");
                self.keep_partial.then(|| error.into_partial())
            }
            Err(error) => {
                tracing::debug!(%error, "unreadable forwarded header");
                None
            }
        }
    }
}

fn legacy(headers: &http::HeaderMap) -> Option<Forwarded> {
    let forwarded = align_headers(headers);
    if forwarded.is_empty() {
        None
    } else {
        tracing::trace!(
            elements = forwarded.len(),
            "aligned legacy forwarding headers"
        );
        Some(forwarded)
    }
}

/// A middleware which inserts the request's [`Forwarded`] chain into its extensions.
///
/// Requests are never rejected: when no chain can be resolved the extension is
/// simply not set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ExtractForwarded<S> {
    inner: S,
    config: ExtractForwardedConfig,
}

impl<S> ExtractForwarded<S> {
    /// Create a new `ExtractForwarded` middleware.
    pub fn new(inner: S, config: ExtractForwardedConfig) -> Self {
        Self { inner, config }
    }

    /// Set the configuration.
    pub fn config(mut self, config: ExtractForwardedConfig) -> Self {
        self.config = config;
        self
    }

    /// Get a reference to the inner service.
    pub fn service(&self) -> &S {
        &self.inner
    }

    /// Resolve the chain of a request and store it in the request extensions.
    pub fn extract<B>(&self, req: &mut http::Request<B>) {
        if let Some(forwarded) = self.config.resolve(req.headers()) {
            req.extensions_mut().insert(forwarded);
        }
    }
}

impl<S, B> tower::Service<http::Request<B>> for ExtractForwarded<S>
where
    S: tower::Service<http::Request<B>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = S::Future;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: http::Request<B>) -> Self::Future {
        self.extract(&mut req);
        self.inner.call(req)
    }
}

/// A layer which applies [`ExtractForwarded`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ExtractForwardedLayer {
    config: ExtractForwardedConfig,
}

impl ExtractForwardedLayer {
    /// Create a new `ExtractForwardedLayer` with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the configuration.
    pub fn config(mut self, config: ExtractForwardedConfig) -> Self {
        self.config = config;
        self
    }

    /// Set which headers to read.
    pub fn source(mut self, source: ForwardedSource) -> Self {
        self.config.source = source;
        self
    }

    /// Set whether to parse the `Forwarded` header strictly.
    pub fn strict(mut self, strict: bool) -> Self {
        self.config.strict = strict;
        self
    }

    /// Set whether to keep the elements parsed before an error.
    pub fn keep_partial(mut self, keep_partial: bool) -> Self {
        self.config.keep_partial = keep_partial;
        self
    }
}

impl<S> tower::layer::Layer<S> for ExtractForwardedLayer {
    type Service = ExtractForwarded<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ExtractForwarded {
            inner,
            config: self.config.clone(),
        }
    }
}
