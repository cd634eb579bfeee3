//! Line-oriented PING/QUIT protocol.
//!
//! The protocol served by `sockd` on accepted connections:
//! - Request: `PING\r\n` or `QUIT\r\n` (case-insensitive, bare `\n` accepted)
//! - Response: `PONG\r\n`, `BYE\r\n`, or `-ERR\r\n`
//!
//! # Example
//!
//! ```
//! use protocol_ping::{Request, Response};
//!
//! // Parse a request as received by the server
//! let (request, consumed) = Request::parse(b"ping\r\n").unwrap();
//! assert_eq!(request, Request::Ping);
//! assert_eq!(consumed, 6);
//!
//! // Encode the reply
//! let mut buf = [0u8; 16];
//! let len = Response::Pong.encode(&mut buf);
//! assert_eq!(&buf[..len], b"PONG\r\n");
//! ```

/// Longest request line accepted, including the line ending.
pub const MAX_LINE: usize = 64;

/// Parse error types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    /// Need more data to complete parsing.
    #[error("incomplete")]
    Incomplete,
    /// Invalid line. The whole line must be skipped.
    #[error("invalid line")]
    Invalid {
        /// Bytes up to and including the line ending, or 0 if the line is
        /// too long to ever complete.
        consumed: usize,
    },
}

/// Locate the end of the first line in `data`.
///
/// Returns the line without its ending and the number of bytes including the
/// ending.
fn line(data: &[u8]) -> Result<(&[u8], usize), ParseError> {
    match data.iter().position(|&b| b == b'\n') {
        Some(pos) => {
            let body = &data[..pos];
            let body = body.strip_suffix(b"\r").unwrap_or(body);
            Ok((body, pos + 1))
        }
        None if data.len() >= MAX_LINE => Err(ParseError::Invalid { consumed: 0 }),
        None => Err(ParseError::Incomplete),
    }
}

/// A PING protocol request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// PING command
    Ping,
    /// QUIT command: the server replies and ends the session.
    Quit,
}

impl Request {
    /// Parse one request line from the buffer.
    ///
    /// Returns the parsed request and number of bytes consumed, or an error.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), ParseError> {
        let (body, consumed) = line(data)?;
        if body.eq_ignore_ascii_case(b"PING") {
            Ok((Request::Ping, consumed))
        } else if body.eq_ignore_ascii_case(b"QUIT") {
            Ok((Request::Quit, consumed))
        } else {
            Err(ParseError::Invalid { consumed })
        }
    }

    /// Encode the request into the buffer.
    ///
    /// Returns the number of bytes written.
    pub fn encode(self, buf: &mut [u8]) -> usize {
        let data: &[u8] = match self {
            Request::Ping => b"PING\r\n",
            Request::Quit => b"QUIT\r\n",
        };
        buf[..data.len()].copy_from_slice(data);
        data.len()
    }

    /// Returns the encoded length of this request.
    pub const fn encoded_len(self) -> usize {
        6 // "PING\r\n" / "QUIT\r\n"
    }
}

/// A PING protocol response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Reply to PING.
    Pong,
    /// Reply to QUIT.
    Bye,
    /// Reply to an unrecognized line.
    Error,
}

impl Response {
    /// The wire form of this response.
    pub const fn as_bytes(self) -> &'static [u8] {
        match self {
            Response::Pong => b"PONG\r\n",
            Response::Bye => b"BYE\r\n",
            Response::Error => b"-ERR\r\n",
        }
    }

    /// Encode the response into the buffer.
    ///
    /// Returns the number of bytes written.
    pub fn encode(self, buf: &mut [u8]) -> usize {
        let data = self.as_bytes();
        buf[..data.len()].copy_from_slice(data);
        data.len()
    }

    /// Parse a response from the buffer, as a client would.
    pub fn parse(data: &[u8]) -> Result<(Self, usize), ParseError> {
        let (body, consumed) = line(data)?;
        match body {
            b"PONG" => Ok((Response::Pong, consumed)),
            b"BYE" => Ok((Response::Bye, consumed)),
            _ if body.starts_with(b"-") => Ok((Response::Error, consumed)),
            _ => Err(ParseError::Invalid { consumed }),
        }
    }

    /// Returns true if this is an error response.
    pub fn is_error(self) -> bool {
        matches!(self, Response::Error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ping() {
        assert_eq!(Request::parse(b"PING\r\n"), Ok((Request::Ping, 6)));
        assert_eq!(Request::parse(b"ping\n"), Ok((Request::Ping, 5)));
        assert_eq!(Request::parse(b"Ping\r\nPING\r\n"), Ok((Request::Ping, 6)));
    }

    #[test]
    fn test_parse_quit() {
        assert_eq!(Request::parse(b"QUIT\r\n"), Ok((Request::Quit, 6)));
        assert_eq!(Request::parse(b"quit\n"), Ok((Request::Quit, 5)));
    }

    #[test]
    fn test_parse_incomplete() {
        assert_eq!(Request::parse(b""), Err(ParseError::Incomplete));
        assert_eq!(Request::parse(b"PI"), Err(ParseError::Incomplete));
        assert_eq!(Request::parse(b"PING"), Err(ParseError::Incomplete));
        assert_eq!(Request::parse(b"PING\r"), Err(ParseError::Incomplete));
    }

    #[test]
    fn test_parse_invalid() {
        assert_eq!(
            Request::parse(b"HELLO\r\n"),
            Err(ParseError::Invalid { consumed: 7 })
        );
        assert_eq!(
            Request::parse(b"PING PING\r\n"),
            Err(ParseError::Invalid { consumed: 11 })
        );
        assert_eq!(
            Request::parse(&[b'x'; MAX_LINE]),
            Err(ParseError::Invalid { consumed: 0 })
        );
    }

    #[test]
    fn test_encode_request() {
        let mut buf = [0u8; 16];
        let len = Request::Ping.encode(&mut buf);
        assert_eq!(&buf[..len], b"PING\r\n");
        assert_eq!(len, Request::Ping.encoded_len());

        let len = Request::Quit.encode(&mut buf);
        assert_eq!(&buf[..len], b"QUIT\r\n");
    }

    #[test]
    fn test_encode_response() {
        let mut buf = [0u8; 16];

        let len = Response::Pong.encode(&mut buf);
        assert_eq!(&buf[..len], b"PONG\r\n");

        let len = Response::Bye.encode(&mut buf);
        assert_eq!(&buf[..len], b"BYE\r\n");

        let len = Response::Error.encode(&mut buf);
        assert_eq!(&buf[..len], b"-ERR\r\n");
    }

    #[test]
    fn test_parse_response() {
        assert_eq!(Response::parse(b"PONG\r\n"), Ok((Response::Pong, 6)));
        assert_eq!(Response::parse(b"BYE\r\n"), Ok((Response::Bye, 5)));
        let (resp, consumed) = Response::parse(b"-ERR unknown\r\n").unwrap();
        assert!(resp.is_error());
        assert_eq!(consumed, 14);
        assert_eq!(Response::parse(b"PON"), Err(ParseError::Incomplete));
    }
}
