//! Parser for `Forwarded` header field values.
//!
//! A field value is a comma separated list of elements, each a semicolon separated list
//! of `name=value` pairs, where the value is a token or a quoted string. See
//! [RFC 7239](https://datatracker.ietf.org/doc/html/rfc7239#section-4).

use nom::bytes::complete::{take_till, take_while};
use nom::IResult;
use thiserror::Error;

use super::forward::{Attribute, Element, Forwarded, UnknownAttribute, FORWARDED};

fn whitespace(input: &str) -> IResult<&str, &str> {
    take_while(|c: char| c == ' ')(input)
}

fn param_name(input: &str) -> IResult<&str, &str> {
    take_till(|c: char| c == ' ' || c == '=')(input)
}

fn bare_value(input: &str) -> IResult<&str, &str> {
    take_till(|c: char| matches!(c, ' ' | ';' | ','))(input)
}

/// A position in the input, advanced as the parser consumes it.
struct Cursor<'a> {
    input: &'a str,
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, offset: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.input[self.offset..]
    }

    fn is_empty(&self) -> bool {
        self.offset >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.offset += c.len_utf8();
        Some(c)
    }

    fn eat(&mut self, expected: char) -> bool {
        if self.peek() == Some(expected) {
            self.offset += expected.len_utf8();
            true
        } else {
            false
        }
    }

    /// Run a complete-input parser on the rest of the input, consuming what it matched.
    fn take<F>(&mut self, mut parser: F) -> &'a str
    where
        F: FnMut(&'a str) -> IResult<&'a str, &'a str>,
    {
        let rest = self.rest();
        match parser(rest) {
            Ok((remaining, matched)) => {
                self.offset += rest.len() - remaining.len();
                matched
            }
            Err(_) => "",
        }
    }

    fn skip_whitespace(&mut self) {
        self.take(whitespace);
    }

    /// Read a quoted string starting at the opening quote.
    ///
    /// Returns the unescaped contents, and whether the closing quote was found.
    fn quoted_string(&mut self) -> (String, bool) {
        self.bump();

        let mut value = String::new();
        let mut escaped = false;
        while let Some(c) = self.bump() {
            match c {
                _ if escaped => {
                    value.push(c);
                    escaped = false;
                }
                '\\' => escaped = true,
                '"' => return (value, true),
                _ => value.push(c),
            }
        }

        (value, false)
    }

    fn fail(&self, kind: ParseErrorKind) -> Failure {
        Failure {
            offset: self.offset,
            kind,
        }
    }
}

/// An error located at a byte offset, before the partial result is attached.
struct Failure {
    offset: usize,
    kind: ParseErrorKind,
}

impl Failure {
    fn into_error(self, input: &str, partial: Forwarded) -> ParseError {
        ParseError {
            position: input[..self.offset].chars().count() + 1,
            kind: self.kind,
            partial,
        }
    }
}

/// Parser for `Forwarded` field values.
///
/// The default parser is permissive: an unterminated quoted string produces whatever was
/// read before the input ended, and characters after the last element which are not
/// a `,` are ignored. Use [`ForwardedParser::strict`] to reject both.
#[derive(Debug, Default, Clone, PartialEq, Eq, Hash)]
pub struct ForwardedParser {
    capacity: usize,
    strict: bool,
}

impl ForwardedParser {
    /// Create a permissive parser.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-allocate room for `capacity` elements in each parsed chain.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set whether unterminated quoted strings and trailing characters are errors.
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Whether this parser is strict.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Parse a single `Forwarded` field value.
    ///
    /// On error, the elements completed before the failure are available from
    /// [`ParseError::partial`].
    pub fn parse(&self, raw: &str) -> Result<Forwarded, ParseError> {
        let mut forwarded = Forwarded::with_capacity(self.capacity);
        if raw.is_empty() {
            return Ok(forwarded);
        }

        let mut cursor = Cursor::new(raw);
        loop {
            match self.element(&mut cursor) {
                Ok(element) => forwarded.push(element),
                Err(failure) => return Err(failure.into_error(raw, forwarded)),
            }

            cursor.skip_whitespace();
            if !cursor.eat(',') {
                break;
            }
        }

        if self.strict && !cursor.is_empty() {
            return Err(cursor
                .fail(ParseErrorKind::TrailingCharacters)
                .into_error(raw, forwarded));
        }

        Ok(forwarded)
    }

    /// Parse and concatenate every `Forwarded` header in a header map.
    pub fn parse_headers(
        &self,
        headers: &http::HeaderMap,
    ) -> Result<Forwarded, ForwardedHeaderError> {
        let mut values = headers.get_all(FORWARDED).iter().peekable();
        if values.peek().is_none() {
            return Err(ForwardedHeaderError::NotFound);
        }

        let mut forwarded = Forwarded::new();
        for value in values {
            let raw = value
                .to_str()
                .map_err(|source| ForwardedHeaderError::InvalidHeaderValue {
                    source,
                    header: value.clone(),
                })?;

            match self.parse(raw) {
                Ok(elements) => forwarded.extend(elements),
                Err(error) => return Err(error.after(forwarded).into()),
            }
        }

        tracing::trace!(elements = forwarded.len(), "parsed forwarded headers");
        Ok(forwarded)
    }

    fn element(&self, cursor: &mut Cursor<'_>) -> Result<Element, Failure> {
        let mut element = Element::new();
        loop {
            let (attribute, value) = self.pair(cursor)?;
            element.set(attribute, value);

            cursor.skip_whitespace();
            if !cursor.eat(';') {
                break;
            }
        }

        Ok(element)
    }

    fn pair(&self, cursor: &mut Cursor<'_>) -> Result<(Attribute, String), Failure> {
        cursor.skip_whitespace();
        let start = cursor.offset;
        let name = cursor.take(param_name);
        if name.is_empty() && cursor.is_empty() {
            return Err(cursor.fail(ParseErrorKind::UnexpectedEnd));
        }

        let attribute = name.parse::<Attribute>().map_err(|error| Failure {
            offset: start,
            kind: ParseErrorKind::UnknownAttribute(error),
        })?;

        cursor.skip_whitespace();
        let at = cursor.fail(ParseErrorKind::UnexpectedEnd);
        match cursor.bump() {
            Some('=') => {}
            Some(found) => {
                return Err(Failure {
                    kind: ParseErrorKind::ExpectedEquals(found),
                    ..at
                })
            }
            None => return Err(at),
        }

        cursor.skip_whitespace();
        let value = match cursor.peek() {
            None => return Err(cursor.fail(ParseErrorKind::UnexpectedEnd)),
            Some('"') => {
                let open = cursor.fail(ParseErrorKind::UnterminatedQuote);
                let (value, closed) = cursor.quoted_string();
                if !closed && self.strict {
                    return Err(open);
                }
                value
            }
            Some(_) => cursor.take(bare_value).to_owned(),
        };

        Ok((attribute, value))
    }
}

/// The reason a `Forwarded` field value could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseErrorKind {
    /// A parameter name other than `by`, `for`, `host` or `proto`.
    #[error(transparent)]
    UnknownAttribute(#[from] UnknownAttribute),

    /// A parameter name was followed by something other than `=`.
    #[error("expected '=' but found {0:?}")]
    ExpectedEquals(char),

    /// The input ended where a name or value was expected.
    #[error("unexpected end of input")]
    UnexpectedEnd,

    /// A quoted string had no closing quote (strict parsing only).
    #[error("unterminated quoted string")]
    UnterminatedQuote,

    /// Characters remained after the last element (strict parsing only).
    #[error("unexpected characters after the last element")]
    TrailingCharacters,
}

/// An error parsing a `Forwarded` field value.
///
/// Displays as `<position>: <message>`, where the position is the 1-based character
/// index in the field value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{position}: {kind}")]
pub struct ParseError {
    position: usize,
    kind: ParseErrorKind,
    partial: Forwarded,
}

impl ParseError {
    /// The 1-based character position of the error.
    pub fn position(&self) -> usize {
        self.position
    }

    /// The reason for the error.
    pub fn kind(&self) -> &ParseErrorKind {
        &self.kind
    }

    /// A human readable description, without the position.
    pub fn message(&self) -> String {
        self.kind.to_string()
    }

    /// The elements which were completely parsed before the error.
    pub fn partial(&self) -> &Forwarded {
        &self.partial
    }

    /// Take the elements which were completely parsed before the error.
    pub fn into_partial(self) -> Forwarded {
        self.partial
    }

    /// Prefix the partial result with elements from earlier header lines.
    fn after(mut self, mut prefix: Forwarded) -> Self {
        prefix.extend(self.partial);
        self.partial = prefix;
        self
    }
}

/// An error reading the `Forwarded` header from a header map.
#[derive(Debug, Error)]
pub enum ForwardedHeaderError {
    /// No `Forwarded` header was present.
    #[error("no forwarded header found")]
    NotFound,

    /// A `Forwarded` header contained bytes which are not visible ASCII.
    #[error("header value for FORWARDED contains opaque bytes: {:?}", .header)]
    InvalidHeaderValue {
        /// The underlying conversion error.
        #[source]
        source: http::header::ToStrError,

        /// The offending header value.
        header: http::HeaderValue,
    },

    /// A `Forwarded` header could not be parsed.
    #[error(transparent)]
    Parse(#[from] ParseError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(pairs: &[(Attribute, &str)]) -> Element {
        pairs
            .iter()
            .fold(Element::new(), |element, (attribute, value)| {
                element.with(*attribute, *value)
            })
    }

    fn forwarded(elements: &[&[(Attribute, &str)]]) -> Forwarded {
        elements.iter().map(|pairs| element(pairs)).collect()
    }

    use Attribute::{By, For, Host, Proto};

    #[test]
    fn parse_valid() {
        let cases: Vec<(&str, Forwarded)> = vec![
            ("", Forwarded::new()),
            (
                "for=192.0.2.43, for=198.51.100.17",
                forwarded(&[&[(For, "192.0.2.43")], &[(For, "198.51.100.17")]]),
            ),
            (
                "for=192.0.2.60;proto=http ; by = 203.0.113.43",
                forwarded(&[&[
                    (For, "192.0.2.60"),
                    (Proto, "http"),
                    (By, "203.0.113.43"),
                ]]),
            ),
            (
                "for = _hidden, for=_SEVKISEK",
                forwarded(&[&[(For, "_hidden")], &[(For, "_SEVKISEK")]]),
            ),
            (
                "for=192.0.2.43,for=198.51.100.17;by=203.0.113.60;proto=http;host=example.com",
                forwarded(&[
                    &[(For, "192.0.2.43")],
                    &[
                        (For, "198.51.100.17"),
                        (By, "203.0.113.60"),
                        (Proto, "http"),
                        (Host, "example.com"),
                    ],
                ]),
            ),
            (
                "For=\"[2001:db8:cafe::17]:4711\"",
                forwarded(&[&[(For, "[2001:db8:cafe::17]:4711")]]),
            ),
            ("for=\"_gazonk\"", forwarded(&[&[(For, "_gazonk")]])),
            ("for=\"\"", forwarded(&[&[]])),
            ("by=\"\\\"\"", forwarded(&[&[(By, "\"")]])),
            ("by=\"a\\\\b\"", forwarded(&[&[(By, "a\\b")]])),
            ("by=\"\\n\"", forwarded(&[&[(By, "n")]])),
        ];

        for (raw, expected) in cases {
            let parsed = Forwarded::parse(raw).unwrap_or_else(|error| panic!("{raw}: {error}"));
            assert_eq!(parsed, expected, "parsing {raw:?}");
        }
    }

    #[test]
    fn rfc_example() {
        let parsed = Forwarded::parse("for=192.0.2.43, for=\"[2001:db8:cafe::17]\", for=unknown")
            .unwrap();

        assert_eq!(
            parsed.iter().filter_map(Element::r#for).collect::<Vec<_>>(),
            vec!["192.0.2.43", "[2001:db8:cafe::17]", "unknown"]
        );
        assert_eq!(
            parsed.to_string(),
            "for=192.0.2.43,for=[2001:db8:cafe::17],for=unknown"
        );
        assert_eq!(
            format!("{parsed:#}"),
            "for=192.0.2.43, for=[2001:db8:cafe::17], for=unknown"
        );
    }

    #[test]
    fn repeated_attribute_last_wins() {
        let parsed = Forwarded::parse("for=192.0.2.1;for=192.0.2.2;host=a;host=\"\"").unwrap();
        assert_eq!(parsed, forwarded(&[&[(For, "192.0.2.2")]]));
    }

    #[test]
    fn dangling_equals() {
        let error = Forwarded::parse("for=").unwrap_err();
        assert_eq!(error.kind(), &ParseErrorKind::UnexpectedEnd);
        assert_eq!(error.position(), 5);
        assert_eq!(error.to_string(), "5: unexpected end of input");
        assert!(error.partial().is_empty());

        let error = Forwarded::parse("for =  ").unwrap_err();
        assert_eq!(error.kind(), &ParseErrorKind::UnexpectedEnd);
        assert_eq!(error.position(), 8);
    }

    #[test]
    fn unknown_attribute() {
        let error = Forwarded::parse("bad=xxx").unwrap_err();
        assert!(matches!(
            error.kind(),
            ParseErrorKind::UnknownAttribute(name) if name.name() == "bad"
        ));
        assert_eq!(error.to_string(), "1: unknown attribute: bad");
        assert_eq!(error.message(), "unknown attribute: bad");
        assert!(error.partial().is_empty());

        let error = Forwarded::parse("for=192.0.2.1;  secret=1").unwrap_err();
        assert_eq!(error.position(), 17);
    }

    #[test]
    fn missing_equals() {
        let error = Forwarded::parse("for 192.0.2.1").unwrap_err();
        assert_eq!(error.kind(), &ParseErrorKind::ExpectedEquals('1'));
        assert_eq!(error.position(), 5);

        let error = Forwarded::parse("for").unwrap_err();
        assert_eq!(error.kind(), &ParseErrorKind::UnexpectedEnd);
        assert_eq!(error.position(), 4);
    }

    #[test]
    fn trailing_comma() {
        let error = Forwarded::parse("for=192.0.2.1,").unwrap_err();
        assert_eq!(error.kind(), &ParseErrorKind::UnexpectedEnd);
        assert_eq!(error.partial(), &forwarded(&[&[(For, "192.0.2.1")]]));
    }

    #[test]
    fn partial_result() {
        let error = Forwarded::parse("for=192.0.2.1, for=192.0.2.2;proto=https, by=x;nope=1")
            .unwrap_err();

        assert_eq!(
            error.into_partial(),
            forwarded(&[
                &[(For, "192.0.2.1")],
                &[(For, "192.0.2.2"), (Proto, "https")],
            ])
        );
    }

    #[test]
    fn position_counts_characters() {
        let error = Forwarded::parse("host=\"ü\";x=1").unwrap_err();
        assert_eq!(error.position(), 10);
    }

    #[test]
    fn permissive_trailing_characters() {
        let parsed = Forwarded::parse("for=192.0.2.1 garbage").unwrap();
        assert_eq!(parsed, forwarded(&[&[(For, "192.0.2.1")]]));

        let parsed = Forwarded::parse("for=\"192.0.2.1\"garbage").unwrap();
        assert_eq!(parsed, forwarded(&[&[(For, "192.0.2.1")]]));
    }

    #[test]
    fn permissive_unterminated_quote() {
        let parsed = Forwarded::parse("for=\"[2001:db8::1]").unwrap();
        assert_eq!(parsed, forwarded(&[&[(For, "[2001:db8::1]")]]));

        let parsed = Forwarded::parse("for=\"abc\\").unwrap();
        assert_eq!(parsed, forwarded(&[&[(For, "abc")]]));
    }

    #[test]
    fn strict_rejects_trailing_characters() {
        let parser = ForwardedParser::new().strict(true);
        assert!(parser.is_strict());

        let error = parser.parse("for=192.0.2.1 garbage").unwrap_err();
        assert_eq!(error.kind(), &ParseErrorKind::TrailingCharacters);
        assert_eq!(error.position(), 15);
        assert_eq!(error.partial(), &forwarded(&[&[(For, "192.0.2.1")]]));

        assert!(parser.parse("for=192.0.2.1 ").is_ok());
    }

    #[test]
    fn strict_rejects_unterminated_quote() {
        let parser = ForwardedParser::new().strict(true);
        let error = parser.parse("for=1, for=\"[2001:db8::1]").unwrap_err();
        assert_eq!(error.kind(), &ParseErrorKind::UnterminatedQuote);
        assert_eq!(error.position(), 12);
        assert_eq!(error.partial(), &forwarded(&[&[(For, "1")]]));
    }

    #[test]
    fn capacity() {
        let parsed = ForwardedParser::new()
            .with_capacity(8)
            .parse("for=192.0.2.1")
            .unwrap();
        assert!(parsed.elements().len() == 1);

        assert!(ForwardedParser::new().with_capacity(8).parse("").unwrap().is_empty());
    }

    #[test]
    fn headers_not_found() {
        let headers = http::HeaderMap::new();
        assert!(matches!(
            Forwarded::from_headers(&headers),
            Err(ForwardedHeaderError::NotFound)
        ));

        let mut headers = http::HeaderMap::new();
        headers.insert(FORWARDED, http::HeaderValue::from_static(""));
        assert_eq!(Forwarded::from_headers(&headers).unwrap(), Forwarded::new());
    }

    #[test]
    fn headers_concatenate() {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            http::HeaderName::from_bytes(b"Forwarded").unwrap(),
            "for=192.0.2.1, for=\"[2001:db8:cafe::18]:8080\"; proto=https"
                .parse()
                .unwrap(),
        );
        headers.append(FORWARDED, "for=192.0.2.5".parse().unwrap());

        assert_eq!(
            Forwarded::from_headers(&headers).unwrap(),
            forwarded(&[
                &[(For, "192.0.2.1")],
                &[(For, "[2001:db8:cafe::18]:8080"), (Proto, "https")],
                &[(For, "192.0.2.5")],
            ])
        );
    }

    #[test]
    fn headers_parse_error_keeps_earlier_lines() {
        let mut headers = http::HeaderMap::new();
        headers.insert(FORWARDED, "for=192.0.2.1".parse().unwrap());
        headers.append(FORWARDED, "for=192.0.2.2, bad=1".parse().unwrap());

        let Err(ForwardedHeaderError::Parse(error)) = Forwarded::from_headers(&headers) else {
            panic!("expected a parse error");
        };

        assert_eq!(error.position(), 16);
        assert_eq!(
            error.into_partial(),
            forwarded(&[&[(For, "192.0.2.1")], &[(For, "192.0.2.2")]])
        );
    }

    #[test]
    fn headers_opaque_bytes() {
        let mut headers = http::HeaderMap::new();
        headers.insert(
            FORWARDED,
            http::HeaderValue::from_bytes(b"for=\xfa").unwrap(),
        );

        assert!(matches!(
            Forwarded::from_headers(&headers),
            Err(ForwardedHeaderError::InvalidHeaderValue { .. })
        ));
    }
}
