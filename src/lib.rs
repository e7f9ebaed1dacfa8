//! # HyForwarded
//!
//! `hyforwarded` parses and renders the HTTP `Forwarded` header
//! ([RFC 7239](https://datatracker.ietf.org/doc/html/rfc7239)), and rebuilds the same
//! chain from the legacy `X-Forwarded-*` and `X-Real-*` headers.
//!
//! ```
//! use hyforwarded::headers::{align_fields, Forwarded, LegacyField};
//!
//! let forwarded: Forwarded = "for=192.0.2.43, for=\"[2001:db8:cafe::17]\"".parse().unwrap();
//! assert_eq!(forwarded.to_string(), "for=192.0.2.43,for=[2001:db8:cafe::17]");
//! assert_eq!(format!("{forwarded:#}"), "for=192.0.2.43, for=[2001:db8:cafe::17]");
//!
//! let legacy = align_fields(&[
//!     LegacyField::host("example.com"),
//!     LegacyField::r#for("203.0.113.1, 203.0.113.2"),
//! ]);
//! assert_eq!(legacy.to_string(), "for=203.0.113.1;host=example.com,for=203.0.113.2");
//! ```

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod headers;
