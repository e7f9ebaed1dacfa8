//! Forwarding headers: the standard `Forwarded` header and its legacy predecessors.

pub mod extract;
pub mod forward;
pub mod legacy;
pub mod parser;

pub use extract::{
    ExtractForwarded, ExtractForwardedConfig, ExtractForwardedLayer, ForwardedSource,
};
pub use forward::{
    Attribute, Element, Forwarded, RenderOptions, Rendered, Separator, UnknownAttribute,
    FORWARDED,
};
pub use legacy::{
    align_fields, align_headers, from_fields, LegacyField, LegacyHeader, LengthMismatch,
    X_FORWARDED_BY, X_FORWARDED_FOR, X_FORWARDED_HOST, X_FORWARDED_PROTO, X_REAL_HOST, X_REAL_IP,
};
pub use parser::{ForwardedHeaderError, ForwardedParser, ParseError, ParseErrorKind};
