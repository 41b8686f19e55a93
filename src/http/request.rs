use crate::{
    errors::*,
    http::types::{self, Header, HeaderMap},
    limits::ReqLimits,
    query::Query,
    server::connection::HttpConnection,
    transport::Conn,
    ConnectionData, Method, Url, Version,
};
use memchr::memchr_iter;
use std::{io, mem, net::SocketAddr, time::Duration};
use tokio::{io::AsyncReadExt, time::sleep};

/// High-performance HTTP request representation.
///
/// Uses strategic memory alignment for optimal cache performance.
/// Most data is zero-copy referenced from the connection's read buffer;
/// a chunked-transfer body is the one exception (see [`Body`]), since
/// unwrapping chunk framing requires an owned, differently-sized copy.
#[derive(Debug, Clone, PartialEq)]
#[repr(align(128))]
pub struct Request {
    method: Method,
    url: Url,
    version: Version,
    headers: HeaderMap,
    body: Body,

    pub(crate) client_addr: SocketAddr,
    pub(crate) server_addr: SocketAddr,
}

/// Request body representation.
///
/// A fixed-length body is a zero-copy slice into the connection buffer.
/// A chunked body is reassembled (chunk framing stripped) into an owned
/// buffer, since its decoded length and layout differ from the wire bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) enum Body {
    #[default]
    None,
    Borrowed(&'static [u8]),
    Owned(Vec<u8>),
}

impl Request {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        Request {
            method: Method::Get,
            url: Url::new(limits),
            version: Version::Http11,
            headers: HeaderMap::new(limits.header_count),
            body: Body::None,

            client_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            server_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
        }
    }

    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.method = Method::Get;
        self.url.clear();
        self.version = Version::Http11;
        self.headers.reset();
        self.body = Body::None;
    }
}

// Public API
impl Request {
    #[inline(always)]
    pub const fn method(&self) -> Method {
        self.method
    }

    #[inline(always)]
    pub const fn url(&self) -> &Url {
        &self.url
    }

    #[inline(always)]
    pub const fn version(&self) -> Version {
        self.version
    }

    /// Returns the first header value with case-insensitive name matching
    /// (per [RFC 7230](https://tools.ietf.org/html/rfc7230#section-3.2)).
    /// Uses linear search.
    ///
    /// # Arguments
    /// - `name`: Header name bytes (e.g., `b"content-type"`)
    #[inline(always)]
    pub fn header(&self, name: &[u8]) -> Option<&[u8]> {
        self.headers.get(name)
    }

    /// Returns the value of the `Content-Length` header if present.
    #[inline(always)]
    pub const fn content_length(&self) -> Option<usize> {
        self.headers.content_length
    }

    /// Returns the request body if present.
    ///
    /// For chunked-transfer requests this is the reassembled payload with
    /// chunk framing removed, not the raw wire bytes.
    #[inline(always)]
    pub fn body(&self) -> Option<&[u8]> {
        match &self.body {
            Body::None => None,
            Body::Borrowed(slice) => Some(slice),
            Body::Owned(vec) => Some(vec),
        }
    }

    /// Looks up a single cookie by name in the `Cookie` request header.
    ///
    /// Parses the header on demand (cookies are uncommon enough on most
    /// routes that eagerly splitting them on every request would waste
    /// cycles). Returns the first match per
    /// [RFC 6265, Section 4.2.2](https://tools.ietf.org/html/rfc6265#section-4.2.2).
    #[inline]
    pub fn cookie(&self, name: &[u8]) -> Option<&[u8]> {
        let header = self.header(b"cookie")?;
        crate::http::cookie::find(header, name)
    }

    /// The address of the connected client, as seen by this server.
    #[inline(always)]
    pub const fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// The local address the connection was accepted on.
    #[inline(always)]
    pub const fn server_addr(&self) -> SocketAddr {
        self.server_addr
    }
}

/// Outcome of one `parse()` attempt over the bytes accumulated so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    /// The request is fully parsed; re-entering `parse()` is unnecessary.
    Complete(Version),
    /// Not enough bytes are buffered yet to reach a decision. The caller
    /// should perform another socket read and call `parse()` again; all
    /// work already committed (matched headers, advanced position) is
    /// preserved across the retry.
    Incomplete,
}

/// Internal error type distinguishing "need more bytes" from a genuine,
/// wire-reportable parse failure. Never leaks past [`HttpConnection::parse`].
enum Step {
    More,
    Fail(ErrorKind),
}

impl<E: Into<ErrorKind>> From<E> for Step {
    fn from(err: E) -> Self {
        Step::Fail(err.into())
    }
}

type StepResult<T> = Result<T, Step>;

// If you don't like using HttpConnection instead of transmitting all the
// values, then you can't even imagine what happened here...
// It's a pity now that you can understand this code (when passing all the
//  values, I didn't understand it myself):(
impl<S: ConnectionData> HttpConnection<S> {
    #[inline]
    pub(crate) fn parse(&mut self) -> Result<Progress, ErrorKind> {
        match self.parse_inner() {
            Ok(()) => Ok(Progress::Complete(self.request.version)),
            Err(Step::More) => Ok(Progress::Incomplete),
            Err(Step::Fail(e)) => Err(e),
        }
    }

    #[inline]
    fn parse_inner(&mut self) -> StepResult<()> {
        self.parse_method()?;
        self.parse_url()?;
        self.check_version()?;
        self.parse_headers()?;
        self.check_body()?;

        Ok(())
    }
}

// Parse first line
impl<S: ConnectionData> HttpConnection<S> {
    // Basic methods
    #[inline]
    fn parse_method(&mut self) -> StepResult<()> {
        // "OPTIONS " - The longest possible method with a space (8 bytes)
        let slice = self.parser.get_slice_avail(0, 8).ok_or(Step::More)?;

        (self.request.method, self.parser.position) = Method::from_bytes(slice)?;
        Ok(())
    }

    #[inline]
    // Cannot replace with `get_slice` or `find_slice` method
    // due to ownership error. And there is no need to use `into_static`
    fn parse_url(&mut self) -> StepResult<()> {
        let posit = match self
            .parser
            .find_char(self.req_limits.precalc.url_window, b' ')
        {
            Scan::Found(pos) => pos,
            Scan::NeedMore => return Err(Step::More),
            Scan::NotFound => return Err(ErrorKind::InvalidUrl.into()),
        };
        let start = self.parser.position + 1;

        let parser = &mut self.parser;
        let url = &mut self.request.url;

        let mut last = 0;
        let start_pos = start + posit;
        let slice_url = &parser.buffer[start..start_pos];

        if slice_url.is_empty() || parser.buffer[start - 1] != b'/' {
            return Err(ErrorKind::InvalidUrl.into());
        }

        for index in memchr_iter(b'/', slice_url) {
            if url.parts.len() == self.req_limits.url_parts {
                return Err(ErrorKind::InvalidUrl.into());
            }

            let slice_part = parser
                .get_slice_static(start + last, index - last)
                .ok_or(ErrorKind::InvalidUrl)?;

            if !slice_part.is_empty() {
                url.parts.push(slice_part);
            }
            last = index + 1;
        }

        let range = [start + last, (posit - last).saturating_sub(1)];
        let (end, url_middle) = match parser.find_char_in(posit, start, b'?') {
            Some(q_pos) => {
                let slice = parser
                    .get_slice_static(q_pos, (range[0] + range[1]).saturating_sub(q_pos))
                    .ok_or(ErrorKind::InvalidUrl)?;
                let limit = url.query_parts.capacity();

                Query::parse_into(&mut url.query_parts, slice, limit)?;
                url.query = Some(slice);

                (q_pos, q_pos)
            }
            None => (posit, posit),
        };

        let slice = parser
            .get_slice_static(range[0], (parser.position + end).saturating_sub(range[0]))
            .ok_or(ErrorKind::InvalidUrl)?;

        if !slice.is_empty() {
            url.parts.push(slice);
        }

        url.path = parser
            .get_slice_static(parser.position, url_middle)
            .ok_or(ErrorKind::InvalidUrl)?;
        url.target = parser
            .get_slice_static(parser.position, posit)
            .ok_or(ErrorKind::InvalidUrl)?;

        parser.update_position(posit);

        Ok(())
    }

    #[inline]
    fn check_version(&mut self) -> StepResult<()> {
        // "HTTP/1.X\r\n" - HTTP version with line break (10 bytes)
        let slice = match self.parser.find_slice(10, b'\n') {
            Scan::Found(slice) => slice,
            Scan::NeedMore => return Err(Step::More),
            Scan::NotFound => return Err(ErrorKind::InvalidVersion.into()),
        };

        if !matches!(slice.len(), 8 | 9) {
            return Err(ErrorKind::InvalidVersion.into());
        }

        (self.response.version, self.response.keep_alive) = Version::from_bytes(&slice[..8])?;
        self.request.version = self.response.version;

        // Check for the use of the '\r' character
        self.parser.has_crlf = slice.last() == Some(&b'\r');

        Ok(())
    }
}

// Parse headers
impl<S: ConnectionData> HttpConnection<S> {
    // Basic methods
    #[inline]
    fn parse_headers(&mut self) -> StepResult<()> {
        for _ in 0..=self.req_limits.header_count {
            let Some(header) = self.parse_header()? else {
                return Ok(());
            };

            if !self.parse_special_header(&header)? {
                self.request.headers.headers.push(header);
            }
        }

        Err(ErrorKind::TooManyHeaders.into())
    }

    #[inline]
    fn parse_header(&mut self) -> StepResult<Option<Header>> {
        let parser = &mut self.parser;
        // HeaderName: Someone=data\r\n
        //                            |
        let end = match parser.find_char(self.req_limits.precalc.h_line, b'\n') {
            Scan::Found(end) => end,
            Scan::NeedMore => return Err(Step::More),
            Scan::NotFound => return Err(ErrorKind::InvalidHeader.into()),
        };

        match parser.get_slice_avail(parser.position + end - 1, 2) {
            Some([b'\r', b'\n']) if parser.has_crlf => {}
            Some([_, b'\n']) if !parser.has_crlf => {}
            _ => return Err(ErrorKind::InvalidHeader.into()),
        }

        // HeaderName: Someone=data\r\n
        //           |
        let Some(split) = parser.find_char_in(end, parser.position, b':') else {
            self.check_end_of_headers(end)?;
            return Ok(None);
        };

        if parser.get_slice_avail(parser.position + split, 2) != Some(b": ") {
            return Err(ErrorKind::InvalidHeader.into());
        }

        let value_start = split + 2;
        let len_value = end - value_start - parser.has_crlf as usize;

        if split > self.req_limits.header_name_size || len_value > self.req_limits.header_value_size
        {
            return Err(ErrorKind::InvalidHeader.into());
        }

        let name = {
            let name = parser
                .get_slice_mut(parser.position, split)
                .ok_or(ErrorKind::InvalidHeader)?;

            if name.is_empty() {
                return Err(ErrorKind::InvalidHeader.into());
            }

            types::to_lower_case(name);
            unsafe { Parser::into_static(name) }
        };

        let value = parser
            .get_slice_static(parser.position + value_start, len_value)
            .ok_or(ErrorKind::InvalidHeader)?;

        parser.update_position(end);

        Ok(Some(Header::new(name, value)))
    }

    #[inline]
    fn parse_special_header(&mut self, header: &Header) -> StepResult<bool> {
        match header.name {
            b"content-length" => self.parse_content_length(header.value)?,
            b"connection" => self.parse_connection(header.value)?,
            b"transfer-encoding" => self.parse_transfer_encoding(header.value)?,
            _ => return Ok(false),
        }
        Ok(true)
    }

    // Auxiliary methods
    #[inline]
    fn check_end_of_headers(&mut self, start: usize) -> StepResult<()> {
        let parser = &mut self.parser;
        // [\r, \n, \r, \n] or [x, x, \n, \n]
        let p_end = parser
            .get_slice_avail(parser.position + start - 3, 4)
            .ok_or(Step::More)?;

        if !match parser.has_crlf {
            true => p_end.ends_with(b"\r\n\r\n"),
            false => p_end.ends_with(b"\n\n"),
        } {
            return Err(ErrorKind::InvalidHeader.into());
        }

        parser.position += parser.has_crlf as usize + 1;

        Ok(())
    }

    #[inline]
    fn parse_content_length(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        if self.request.headers.transfer_encoding_chunked {
            return Err(ErrorKind::InvalidContentLength);
        }
        let len = types::slice_to_usize(value).ok_or(ErrorKind::InvalidContentLength)?;
        if len > self.req_limits.body_size {
            return Err(ErrorKind::BodyTooLarge);
        }
        self.request.headers.content_length = Some(len);
        Ok(())
    }

    #[inline]
    fn parse_connection(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        let mut normalized = [0; 10];
        let len = types::into_lower_case(value, &mut normalized);

        match &normalized[..len] {
            b"keep-alive" => self.response.keep_alive = true,
            b"close" => self.response.keep_alive = false,
            _ => return Err(ErrorKind::InvalidConnection),
        }

        Ok(())
    }

    #[inline]
    fn parse_transfer_encoding(&mut self, value: &[u8]) -> Result<(), ErrorKind> {
        let mut normalized = [0; 8];
        let len = types::into_lower_case(value, &mut normalized);

        if &normalized[..len] != b"chunked" {
            return Err(ErrorKind::InvalidHeader);
        }
        if self.request.headers.content_length.is_some() {
            return Err(ErrorKind::InvalidContentLength);
        }
        self.request.headers.transfer_encoding_chunked = true;
        Ok(())
    }
}

// Parse body
impl<S: ConnectionData> HttpConnection<S> {
    #[inline]
    fn check_body(&mut self) -> StepResult<()> {
        if self.request.headers.transfer_encoding_chunked {
            return self.check_chunked_body();
        }

        let parser = &self.parser;
        let body = parser.len.saturating_sub(parser.position);

        match self.request.headers.content_length {
            Some(len) if body >= len => {
                let slice = parser
                    .get_slice_static(parser.position, len)
                    .ok_or(ErrorKind::BodyMismatch {
                        expected: len,
                        available: body,
                    })?;

                self.request.body = super::request::Body::Borrowed(slice);
                self.parser.position += len;
                Ok(())
            }
            Some(_) => Err(Step::More),
            None => match body == 0 {
                true => Ok(()),
                // No Content-Length and no chunked framing: the body has no
                // declared end, so it can't be told apart from the next
                // pipelined request. Reject rather than read-until-EOF.
                false => Err(ErrorKind::UnexpectedBody(body).into()),
            },
        }
    }

    // Reassembles a `Transfer-Encoding: chunked` body into an owned buffer,
    // stripping chunk-size lines and trailing CRLFs as it goes. Runs
    // incrementally: each call resumes scanning from `chunk_state`, so a
    // chunk header or payload split across reads just yields `Step::More`.
    #[inline]
    fn check_chunked_body(&mut self) -> StepResult<()> {
        loop {
            match self.chunk_state.remaining {
                Some(0) => {
                    // Expect "0\r\n" size line (or "N\r\n" before a chunk).
                    // Trailing CRLF after the previous chunk's data already
                    // consumed by `take_chunk_data`; now expect the final
                    // "\r\n" that terminates the chunk stream.
                    let tail = self.parser.get_slice_avail(self.parser.position, 2).ok_or(Step::More)?;
                    if tail != b"\r\n" {
                        return Err(ErrorKind::InvalidHeader.into());
                    }
                    self.parser.position += 2;
                    self.request.body = Body::Owned(mem::take(&mut self.chunk_cache));
                    self.chunk_state.remaining = None;
                    return Ok(());
                }
                Some(remaining) => self.take_chunk_data(remaining)?,
                None => self.take_chunk_size()?,
            }
        }
    }

    #[inline]
    fn take_chunk_size(&mut self) -> StepResult<()> {
        let line = match self.parser.find_char(32, b'\n') {
            Scan::Found(pos) => self
                .parser
                .get_slice_avail(self.parser.position, pos)
                .ok_or(Step::More)?,
            Scan::NeedMore => return Err(Step::More),
            Scan::NotFound => return Err(ErrorKind::InvalidHeader.into()),
        };

        let trimmed = line.strip_suffix(b"\r").unwrap_or(line);
        let hex_len = trimmed
            .iter()
            .position(|&b| b == b';')
            .map_or(trimmed.len(), |i| i);
        let size = usize::from_str_radix(
            std::str::from_utf8(&trimmed[..hex_len]).map_err(|_| ErrorKind::InvalidHeader)?,
            16,
        )
        .map_err(|_| ErrorKind::InvalidHeader)?;

        if self.chunk_cache.len() + size > self.req_limits.body_size {
            return Err(ErrorKind::BodyTooLarge.into());
        }

        self.parser.position += line.len() + 1;
        self.chunk_state.remaining = Some(size);
        Ok(())
    }

    #[inline]
    fn take_chunk_data(&mut self, remaining: usize) -> StepResult<()> {
        let slice = self
            .parser
            .get_slice_avail(self.parser.position, remaining + 2)
            .ok_or(Step::More)?;

        if &slice[remaining..] != b"\r\n" {
            return Err(ErrorKind::InvalidHeader.into());
        }

        self.chunk_cache.extend_from_slice(&slice[..remaining]);
        self.parser.position += remaining + 2;
        self.chunk_state.remaining = Some(0);
        Ok(())
    }
}

//

/// Tracks progress through a chunked request body across multiple reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ChunkState {
    // `None` = expecting a chunk-size line. `Some(0)` = all chunk data read,
    // expecting either the next size line or the terminating CRLF (when the
    // cache was just finalized by `check_chunked_body`). `Some(n)` = `n`
    // bytes of chunk payload (plus trailing CRLF) still to read.
    pub(crate) remaining: Option<usize>,
}

impl ChunkState {
    #[inline(always)]
    pub(crate) fn reset(&mut self) {
        self.remaining = None;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scan<T> {
    Found(T),
    NeedMore,
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
#[repr(align(64))]
pub(crate) struct Parser {
    pub(crate) position: usize,
    len: usize,
    has_crlf: bool,
    buffer: Box<[u8]>,
}

impl Parser {
    #[inline(always)]
    pub(crate) fn new(limits: &ReqLimits) -> Self {
        let buffer = vec![0; limits.precalc.buffer].into_boxed_slice();

        Parser {
            position: 0,
            len: 0,
            has_crlf: false,
            buffer,
        }
    }

    #[cfg(test)]
    pub(crate) fn from<V: AsRef<[u8]>>(limits: &ReqLimits, value: V) -> Self {
        let mut buffer = vec![0; limits.precalc.buffer];

        let value = value.as_ref();
        buffer[0..value.len()].copy_from_slice(value);

        Parser {
            position: 0,
            len: value.len(),
            has_crlf: false,
            buffer: buffer.into_boxed_slice(),
        }
    }

    #[inline]
    pub(crate) fn reset(&mut self) {
        self.position = 0;
        self.len = 0;
        self.has_crlf = false;
        self.buffer.fill(0);
    }

    /// Whether bytes of a second, pipelined request are already sitting in
    /// the buffer past the one `position` last consumed up to.
    #[inline]
    pub(crate) fn has_pipelined_tail(&self) -> bool {
        self.position < self.len
    }

    /// Drops bytes already consumed by the last request and shifts any
    /// leftover bytes (the start of a pipelined next request) to the front
    /// of the buffer, so the next `parse()` cycle can pick up where this
    /// one left off instead of discarding already-received data.
    #[inline]
    pub(crate) fn reset_keep_tail(&mut self) {
        let tail = self.len - self.position;
        self.buffer.copy_within(self.position..self.len, 0);
        self.buffer[tail..].fill(0);

        self.position = 0;
        self.len = tail;
        self.has_crlf = false;
    }
}

// Work with Buffer
impl Parser {
    // Reading level
    #[inline]
    pub(crate) async fn fill_buffer(
        &mut self,
        stream: &mut Conn,
        time: Duration,
    ) -> Result<usize, io::Error> {
        if self.len >= self.buffer.len() {
            return Err(io::Error::new(io::ErrorKind::Other, "request buffer full"));
        }

        tokio::select! {
            biased;

            read_result = stream.read(&mut self.buffer[self.len..]) => {
                let n = read_result?;
                self.len += n;
                Ok(n)
            }
            _ = sleep(time) => {
                Err(io::Error::new(io::ErrorKind::TimedOut, "read timeout"))
            },
        }
    }

    // Search level
    #[inline]
    fn find_slice(&mut self, limit: usize, delimiter: u8) -> Scan<&[u8]> {
        let step = match self.find_char(limit, delimiter) {
            Scan::Found(step) => step,
            Scan::NeedMore => return Scan::NeedMore,
            Scan::NotFound => return Scan::NotFound,
        };
        let last_index = self.update_position(step);
        match self.get_slice_avail(last_index, step) {
            Some(slice) => Scan::Found(slice),
            None => Scan::NeedMore,
        }
    }

    #[inline]
    fn find_char(&self, limit: usize, delimiter: u8) -> Scan<usize> {
        self.find_char_in(limit, self.position, delimiter)
    }

    // Scans at most `limit` bytes starting at `from` for `delimiter`, bounded
    // by the bytes actually received so far (`self.len`) rather than the
    // buffer's full capacity. This is what makes parsing resumable across
    // reads: if fewer than `limit` bytes have arrived yet and none of them
    // is the delimiter, we report `NeedMore` instead of guessing from
    // uninitialized buffer tail.
    #[inline]
    fn find_char_in(&self, limit: usize, from: usize, delimiter: u8) -> Scan<usize> {
        let available = self.len.saturating_sub(from);
        let window = limit.min(available);

        if window > 0 {
            if let Some(idx) = memchr::memchr(delimiter, &self.buffer[from..from + window]) {
                return Scan::Found(idx);
            }
        }

        if available < limit {
            Scan::NeedMore
        } else {
            Scan::NotFound
        }
    }

    // Low level
    #[inline(always)]
    fn get_slice_avail(&self, start: usize, step: usize) -> Option<&[u8]> {
        if start + step > self.len {
            return None;
        }
        self.buffer.get(start..start + step)
    }

    #[inline(always)]
    fn get_slice_mut(&mut self, start: usize, step: usize) -> Option<&mut [u8]> {
        if start + step > self.len {
            return None;
        }
        self.buffer.get_mut(start..start + step)
    }

    #[inline(always)]
    fn update_position(&mut self, step: usize) -> usize {
        let old = self.position;
        self.position += step + 1;
        old
    }

    // Unsafe level
    #[inline(always)]
    fn get_slice_static(&self, start: usize, step: usize) -> Option<&'static [u8]> {
        let value = self.get_slice_avail(start, step)?;
        unsafe { Some(Self::into_static(value)) }
    }

    #[inline(always)]
    // SAFETY: into_static creates "temporary" references for tokio integration,
    // which become invalid after Request cleanup.
    // Parser: 'static (lives for entire program lifetime), buffer cleared via .fill(0).
    // Memory remains valid even if user holds references.
    // DO NOT SUGGEST FIXES without full server architecture context.
    const unsafe fn into_static(src: &[u8]) -> &'static [u8] {
        // Second `unsafe` for integration with the 2024 edition
        unsafe { mem::transmute(src) }
    }
}

#[cfg(test)]
mod request_self {
    use super::*;
    use crate::tools::*;

    #[test]
    fn reset() {
        let limits = ReqLimits::default();
        let mut t =
            HttpConnection::from_req("OPTIONS /qwe&q=1 HTTP/1.0\r\nHost: 127.0.0.1\r\n\r\n");

        assert_eq!(t.parse(), Ok(Progress::Complete(Version::Http10)));
        t.request.reset();
        assert_eq!(Request::new(&limits), t.request);
    }

    #[test]
    fn parse_method() {
        #[rustfmt::skip]
        let cases = [
            ("GET /url",   Some(Method::Get)),
            ("GET ",       Some(Method::Get)),
            ("PUT ",       Some(Method::Put)),
            ("POST ",      Some(Method::Post)),
            ("HEAD ",      Some(Method::Head)),
            ("PATCH ",     Some(Method::Patch)),
            ("DELETE ",    Some(Method::Delete)),
            ("OPTIONS ",   Some(Method::Options)),

            ("GETGETGET ", None),
        ];

        for (method, expected) in cases {
            let mut t = HttpConnection::from_req(method);

            if let Some(expected) = expected {
                assert!(t.parse_method().is_ok());
                assert_eq!(t.request.method(), expected);
            } else {
                assert!(matches!(t.parse_method(), Err(Step::Fail(ErrorKind::InvalidMethod))));
            }
        }
    }

    #[test]
    fn parse_method_incomplete() {
        // Fewer than 8 bytes received and no space yet: more data may arrive.
        let mut t = HttpConnection::from_req("GE");
        t.parser.len = 2;
        assert!(matches!(t.parse_method(), Err(Step::More)));
    }

    #[test]
    fn parse_url() {
        #[rustfmt::skip]
        let cases = [
            ("/ ",             Some((vec![], vec![]))),
            ("/// ",           Some((vec![], vec![]))),
            ("/? ",            Some((vec![], vec![]))),
            ("/?/ ",           Some((vec!["?"], vec![]))),
            ("/?? ",           Some((vec![], vec![]))),
            ("/???? ",         Some((vec![], vec![]))),

            ("/api/user ",     Some((vec!["api", "user"], vec![]))),
            ("///api//user ",  Some((vec!["api", "user"], vec![]))),
            ("/api/qwe/name/len ",  Some((vec!["api", "qwe", "name", "len"], vec![]))),
            ("/api//user/// ", Some((vec!["api", "user"], vec![]))),
            ("/api//user//? ", Some((vec!["api", "user"], vec![]))),

            ("/api ",          Some((vec!["api"], vec![]))),
            ("///api ",        Some((vec!["api"], vec![]))),
            ("/api// ",        Some((vec!["api"], vec![]))),
            ("//api///? ",     Some((vec!["api"], vec![]))),

            (
                "/api/find?user=qwe&id=223 ", Some((vec!["api", "find"],
                    vec![("user", "qwe"), ("id", "223")]
                ))
            ),
            (
                "/?user=qwe&id=223 ", Some((vec![],
                    vec![("user", "qwe"), ("id", "223")]
                ))
            ),
            (
                "/?debug&name=&=Qwe&key=sda&&id=123 ", Some((vec![],
                    vec![
                        ("debug", ""), ("name", ""), ("", "Qwe"),
                        ("key", "sda"), ("", "Qwe"), ("id", "123")
                    ]
                ))
            ),
            (
                "/?a=1&a=2&a=3 ",
                Some((vec![], vec![("a", "1"), ("a", "1"), ("a", "1")]))
            ),
            (
                "/?very=long=value=with=equals ",
                Some((vec![], vec![("very", "long=value=with=equals")]))
            ),

            ("qwe ",           None),
            (" ",              None),
            ("qwe/qwe ",       None),
        ];

        for (url, expected) in cases {
            let mut t = HttpConnection::from_req(url);

            if let Some((url, query)) = expected {
                assert!(t.parse_url().is_ok());

                url.iter().enumerate().for_each(|(i, value)| {
                    assert_eq!(str(t.request.url().path_segment(i)), Some(*value));
                });
                assert_eq!(str(t.request.url().path_segment(url.len())), None);

                query.iter().for_each(|(name, value)| {
                    assert_eq!(str(t.request.url().query(name.as_bytes())), Some(*value));
                });
            } else {
                assert!(matches!(t.parse_url(), Err(Step::Fail(ErrorKind::InvalidUrl))));
            }
        }
    }

    #[test]
    fn parse_url_full() {
        let mut t = HttpConnection::from_req("/api/users/123?sort=name&debug ");
        let segments = &[b"api" as &[u8], b"users" as &[u8], b"123" as &[u8]] as &[&[u8]];

        assert!(t.parse_url().is_ok());

        assert_eq!(
            str_op(t.request.url().target()),
            "/api/users/123?sort=name&debug"
        );
        assert_eq!(str_op(t.request.url().path()), "/api/users/123");

        assert!(t.request.url().matches(segments));
        assert!(t.request.url().starts_with(segments));
        assert!(t.request.url().starts_with(&segments[..1]));
        assert!(t.request.url().starts_with(&[]));
        assert!(t.request.url().ends_with(segments));
        assert!(t.request.url().ends_with(&segments[1..]));
        assert!(t.request.url().ends_with(&[]));

        assert_eq!(t.request.url().path_segments(), segments);
        assert_eq!(str(t.request.url().path_segment(0)), Some("api"));
        assert_eq!(str(t.request.url().path_segment(1)), Some("users"));
        assert_eq!(str(t.request.url().path_segment(2)), Some("123"));
        assert_eq!(str(t.request.url().path_segment(3)), None);

        assert_eq!(str(t.request.url().query_full()), Some("?sort=name&debug"));
        assert_eq!(str(t.request.url().query(b"sort")), Some("name"));
        assert_eq!(str(t.request.url().query(b"debug")), Some(""));
    }

    #[test]
    fn check_version() {
        #[rustfmt::skip]
        let cases = [
            ("HTTP/1.1\r\n e", Ok((Version::Http11, true))),
            ("HTTP/1.1\r\n",   Ok((Version::Http11, true))),
            ("HTTP/1.0\r\n",   Ok((Version::Http10, true))),
            ("HTTP/1.1\n",     Ok((Version::Http11, false))),
            ("HTTP/1.0\n",     Ok((Version::Http10, false))),

            ("HTTP/2.0\r\n",   Err(ErrorKind::UnsupportedVersion)),
            ("HTTP/0.9\r\n",   Err(ErrorKind::UnsupportedVersion)),
            ("http/1.1\r\n",   Err(ErrorKind::UnsupportedVersion)),

            ("HTTP/1.15\r\n",  Err(ErrorKind::InvalidVersion)),
            (" HTTP/1.1\r\n",  Err(ErrorKind::InvalidVersion)),
            ("HTTP/1.1\r \n",  Err(ErrorKind::InvalidVersion)),
        ];

        for (value, expected) in cases {
            let mut t = HttpConnection::from_req(value);

            match expected {
                Ok((version, has_crlf)) => {
                    assert!(t.check_version().is_ok());

                    assert_eq!(t.request.version, version);
                    assert_eq!(t.response.version, version);
                    assert_eq!(t.parser.has_crlf, has_crlf);

                    match t.request.version {
                        Version::Http11 => assert!(t.response.keep_alive),
                        Version::Http10 => assert!(!t.response.keep_alive),
                    }
                }
                Err(e) => {
                    assert!(matches!(t.check_version(), Err(Step::Fail(err)) if err == e));
                }
            }
        }
    }

    #[test]
    fn parse_header() {
        #[rustfmt::skip]
        let cases = [
            (true,  "HEADER: value\r\n", Some(("header", "value"))),
            (true,  "Header: value\r\n", Some(("header", "value"))),
            (true,  "header: value\r\n", Some(("header", "value"))),
            (true,  "header: \r\n",      Some(("header", ""))),

            (false, "HEADER: value\n",   Some(("header", "value"))),
            (false, "Header: value\n",   Some(("header", "value"))),
            (false, "header: value\n",   Some(("header", "value"))),
            (false, "header: \n",        Some(("header", ""))),
            (true,  "Header : v\r\n",    Some(("header ", "v"))),
            (false, "Header : v\n",      Some(("header ", "v"))),

            (true,  ": value\r\n",       None),
            (false, ": value\r\n",       None),
            (true,  ": \r\n",            None),
            (false, ": \r\n",            None),
            (true,  ": value\n",         None),
            (false, ": value\n",         None),
            (true,  ": \n",              None),
            (false, ": \n",              None),

            (false, "HEADER: value\r\n", Some(("header", "value\r"))),
            (false, "Header: value\r\n", Some(("header", "value\r"))),
            (false, "header: value\r\n", Some(("header", "value\r"))),
            (false, "header: \r\n",      Some(("header", "\r"))),
        ];

        for (has_crlf, header, expected) in cases {
            let mut t = HttpConnection::from_req(header);
            t.parser.has_crlf = has_crlf;

            if let Some((name, value)) = expected {
                let header = t.parse_header().unwrap().unwrap();

                assert_eq!(str_op(header.name), name);
                assert_eq!(str_op(header.value), value);
            } else {
                assert!(matches!(t.parse_header(), Err(Step::Fail(ErrorKind::InvalidHeader))));
            }
        }
    }

    #[test]
    fn parse_headers() {
        #[rustfmt::skip]
        let cases = [
            (
                true, "HEADER: value\r\n\r\n",
                Some((vec!["HEADER", "HeAdEr", "header"], "value")),
            ),
            (
                false, "HEADER: value\n\n",
                Some((vec!["HEADER", "HeAdEr", "header"], "value")),
            ),
            (
                true, "HEADER: value\r\nQwE: value\r\nasd: value\r\n\r\n",
                Some((vec!["header", "qwe", "asd"], "value")),
            ),
            (
                false, "HEADER: value\nQwE: value\nasd: value\n\n",
                Some((vec!["header", "qwe", "asd"], "value")),
            ),
            (
                true, "Empty-Value: \r\n\r\n",
                Some((vec!["empty-value"], "")),
            ),
            (
                true, "Space-Value:   \r\n\r\n",
                Some((vec!["space-value"], "  ")),
            ),
            (
                true, "Multi: value1\r\nMulti: value2\r\n\r\n",
                Some((vec!["multi"], "value1")),
            ),

            (true, ": empty-name\r\n\r\n", None),
            (true, "No-Colon value\r\n\r\n", None),
            (
                true, "Valid: ok\r\nInvalidname\r\nNext: value\r\n\r\n",
                None,
            ),
        ];

        for (has_crlf, headers, expected) in cases {
            let mut t = HttpConnection::from_req(headers);
            t.parser.has_crlf = has_crlf;

            if let Some((names, value)) = expected {
                assert!(t.parse_headers().is_ok());

                for name in names {
                    assert_eq!(str(t.request.header(name.as_bytes())), Some(value));
                }
            } else {
                assert!(matches!(t.parse_headers(), Err(Step::Fail(ErrorKind::InvalidHeader))));
            }
        }
    }

    #[test]
    fn parse_special_header() {
        #[rustfmt::skip]
        let cases = [
            ("content-length: 1256\n\n", Ok((Some(1256), None))),
            ("content-length: 4096\n\n", Ok((Some(4096), None))),
            (
                "content-length: 1256\nconnection: keep-alive\n\n",
                Ok((Some(1256), Some(true)))
            ),
            ("connection: keep-alive\n\n", Ok((None, Some(true)))),
            (
                "content-length: 1256\nconnection: close\n\n",
                Ok((Some(1256), Some(false)))
            ),
            ("connection: close\n\n", Ok((None, Some(false)))),


            ("connection: keep_alive\n\n", Err(ErrorKind::InvalidConnection)),
            ("connection: qwerrew\n\n", Err(ErrorKind::InvalidConnection)),
            ("content-length: 12asd\n\n", Err(ErrorKind::InvalidContentLength)),
            ("content-length: 123u64\n\n", Err(ErrorKind::InvalidContentLength)),
            ("content-length: 4097\n\n", Err(ErrorKind::BodyTooLarge)),
            ("content-length: 123.9435\n\n", Err(ErrorKind::InvalidContentLength)),
            (
                "content-length: 999999999999999999999\n\n",
                Err(ErrorKind::InvalidContentLength)
            ),
        ];

        for (headers, result) in cases {
            let mut t = HttpConnection::from_req(headers);

            match result {
                Ok((content_length, keep_alive)) => {
                    assert!(t.parse_headers().is_ok());
                    assert!(t.request.headers.headers.is_empty());

                    if let Some(len) = content_length {
                        assert_eq!(t.request.headers.content_length, Some(len));
                    }
                    if let Some(keep_alive) = keep_alive {
                        assert_eq!(t.response.keep_alive, keep_alive);
                    }
                }
                Err(e) => assert!(matches!(t.parse_headers(), Err(Step::Fail(err)) if err == e)),
            }
        }
    }

    macro_rules! parse_request {
        ($cases:expr) => {
            for (req, result) in $cases {
                let mut t = HttpConnection::from_req(req);

                if let Ok(result) = result {
                    assert_eq!(t.parse(), Ok(Progress::Complete(result.2)));

                    assert_eq!(t.request.method(), result.0);
                    assert_eq!(str_op(t.request.url().target()), result.1);
                    assert_eq!(t.response.version, result.2);

                    for (name, value) in result.3 {
                        assert_eq!(
                            str(t.request.header(name.as_bytes())),
                            Some(value.to_string()).as_deref()
                        );
                    }
                    assert_eq!(t.request.body(), result.4);
                    assert_eq!(t.response.keep_alive, result.5);
                } else if let Err(e) = result {
                    assert_eq!(t.parse(), Err(e));
                }
            }
        };
    }

    #[test]
    fn parse_valid_request() {
        #[rustfmt::skip]
        let cases = vec![
            (
                "GET / HTTP/1.1\r\n\r\n",
                Ok((
                    Method::Get, "/", Version::Http11,
                    vec![],
                    None, true
                )),
            ),
            (
                "GET /api/qwe/name/len/qwe HTTP/1.1\r\n\r\n",
                Ok((
                    Method::Get, "/api/qwe/name/len/qwe", Version::Http11,
                    vec![],
                    None, true
                )),
            ),
            (
                "GET / HTTP/1.1\n\n",
                Ok((
                    Method::Get, "/", Version::Http11,
                    vec![],
                    None, true
                )),
            ),
            (
                "POST /test HTTP/1.1\r\nHOST: 127.0.0.1\r\n\r\n",
                Ok((
                    Method::Post, "/test", Version::Http11,
                    vec![("host", "127.0.0.1")],
                    None, true,
                )),
            ),
            (
                "PUT /qwe HTTP/1.1\r\nHoSt: 127.0.0.1\r\nUser-Agent: curl\r\n\r\n",
                Ok((
                    Method::Put, "/qwe", Version::Http11,
                    vec![("host", "127.0.0.1"), ("user-agent", "curl")],
                    None, true,
                )),
            ),
            (
                "GET /file HTTP/1.1\ncontent-length: 12\n\nHello world!",
                Ok((
                    Method::Get, "/file", Version::Http11,
                    vec![],
                    Some(b"Hello world!" as &[u8]), true,
                )),
            ),
            (
                "HEAD / HTTP/1.1\r\nConnection: keep-alive\r\n\r\n",
                Ok((
                    Method::Head, "/", Version::Http11,
                    vec![],
                    None, true
                )),
            ),
            (
                "OPTIONS / HTTP/1.1\r\nCoNNEctIon: close\r\n\r\n",
                Ok((
                    Method::Options, "/", Version::Http11,
                    vec![],
                    None, false
                )),
            ),
            (
                "PATCH / HTTP/1.0\r\nconnection: keep-alive\r\n\r\n",
                Ok((
                    Method::Patch, "/", Version::Http10,
                    vec![],
                    None, true
                )),
            ),
            (
                "DELETE / HTTP/1.0\r\nConnection: close\r\n\r\n",
                Ok((
                    Method::Delete, "/", Version::Http10,
                    vec![],
                    None, false
                )),
            ),
            (
                "GET / HTTP/1.0\r\n\r\n",
                Ok((
                    Method::Get, "/", Version::Http10,
                    vec![],
                    None, false
                )),
            ),
            (
"POST /upload HTTP/1.1\r\nContent-Type: application/json\r
Content-Length: 17\r\n\r\n{\"data\": \"value\"}",
                Ok((
                    Method::Post, "/upload", Version::Http11,
                    vec![("content-type", "application/json")],
                    Some(b"{\"data\": \"value\"}" as &[u8]), true,
                )),
            ),
            (
                "GET /empty HTTP/1.1\r\nX-Empty: \r\nX-Space: \r\n\r\n",
                Ok((
                    Method::Get, "/empty", Version::Http11,
                    vec![("x-empty", ""), ("x-space", "")],
                    None, true,
                )),
            ),
            (
                "POST /chunked HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n4\r\nWiki\r\n5\r\npedia\r\n0\r\n\r\n",
                Ok((
                    Method::Post, "/chunked", Version::Http11,
                    vec![],
                    Some(b"Wikipedia" as &[u8]), true,
                )),
            ),
        ];

        parse_request! { cases }
    }

    #[test]
    fn parse_invalid_request() {
        #[rustfmt::skip]
        let cases = vec![
            (
                "GET / HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
                Ok((
                    Method::Get, "/", Version::Http11,
                    vec![("Host", "127.0.0.1")],
                    None::<&[u8]>, true
                )),
            ),
            (
                " GET/ HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
                Err(ErrorKind::InvalidMethod)
            ),
            (
                "GET/ HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
                Err(ErrorKind::InvalidMethod)
            ),
            (
                "GET  HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
                Err(ErrorKind::InvalidUrl)
            ),
            (
                "GET /HTTP/1.1\r\nHost: 127.0.0.1\r\n\r\n",
                Err(ErrorKind::InvalidVersion)
            ),
            (
                "GET / HTTP/1.1 \r\nHost: 127.0.0.1\r\n\r\n",
                Err(ErrorKind::InvalidVersion)
            ),
            (
                "GET / HTTP/1.1\r\nHost: 127.0.0.1\n\r\n",
                Err(ErrorKind::InvalidHeader)
            ),
            (
                "GET / HTTP/1.1\nHost: 127.0.0.1\r\n\r\n",
                Err(ErrorKind::InvalidHeader)
            ),
            (
                "GET / HTTP/1.1\r\nHost: 127.0.0.1\nq: w\r\n\r\n",
                Err(ErrorKind::InvalidHeader)
            ),
            (
                "GET /empty HTTP/1.1\r\nX-Empty:\r\nX-Space: \r\n\r\n",
                Err(ErrorKind::InvalidHeader)
            ),
            (
                "GET / HTTP/1.1\r\nQ: w\n\n",
                Err(ErrorKind::InvalidHeader)
            ),
            (
                "GET / HTTP/1.1\r\nQ: w\r\nW: w\n\n",
                Err(ErrorKind::InvalidHeader)
            ),
            (
                "POST / HTTP/1.1\r\nContent-Length: 999999999\r\n\r\nbody",
                Err(ErrorKind::BodyTooLarge),
            ),
            (
                "POST / HTTP/1.1\r\nContent-Length: invalid\r\n\r\nbody",
                Err(ErrorKind::InvalidContentLength),
            ),
        ];

        parse_request! { cases }
    }

    #[test]
    fn parse_body_incomplete_then_complete() {
        let mut t = HttpConnection::from_req("POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nshort");
        // Only 5 of the declared 10 body bytes are buffered: waiting on more.
        assert_eq!(t.parse(), Ok(Progress::Incomplete));

        // More data arrives in a second read.
        let extra = b"er text";
        let len = t.parser.len;
        t.parser.buffer[len..len + extra.len()].copy_from_slice(extra);
        t.parser.len += extra.len();

        assert_eq!(t.parse(), Ok(Progress::Complete(Version::Http11)));
        assert_eq!(t.request.body(), Some(b"short er t" as &[u8]));
    }

    #[test]
    fn check_limits() {
        use crate::query::Error as Qerror;

        let limits = ReqLimits::default().precalculate();

        let def_url = "/".to_string();
        let url_size = format!("/{}", "q".repeat(limits.url_size - 1));
        let url_parts = "/q".repeat(limits.url_parts + 1);
        let url_query_parts = format!("/?{}", vec!["q=w"; limits.url_query_parts].join("&"));

        let h_name = "N".repeat(limits.header_name_size);
        let h_value = "v".repeat(limits.header_value_size);

        let body = "b".repeat(limits.body_size);

        #[rustfmt::skip]
        let cases = vec![
            (
                format!("GET {} HTTP/1.1\n\n", url_size),
                Ok((
                    Method::Get, &url_size, Version::Http11,
                    vec![],
                    None, true
                )),
            ),
            (
                format!("GET {} HTTP/1.1\r\n\r\n",  url_parts),
                Ok((
                    Method::Get, &url_parts, Version::Http11,
                    vec![],
                    None, true
                )),
            ),
            (
                format!("GET {url_parts}/e HTTP/1.1\r\n\r\n"),
                Err(ErrorKind::InvalidUrl),
            ),
            (
                format!("GET {} HTTP/1.1\n\n", url_query_parts),
                Ok((
                    Method::Get, &url_query_parts, Version::Http11,
                    vec![],
                    None, true
                )),
            ),
            (
                format!(
                    "GET /?{} HTTP/1.1\n\n",
                    vec!["q=w"; limits.url_query_parts + 1].join("&")
                ),
                Err(ErrorKind::Query(
                    Qerror::OverLimit(limits.url_query_parts)
                )),
            ),

            (
                format!("GET / HTTP/1.1\r\n{h_name}: {h_value}\r\n\r\n"),
                Ok((
                    Method::Get, &def_url, Version::Http11,
                    vec![(&h_name, &h_value)],
                    None, true
                )),
            ),
            (
                format!("GET / HTTP/1.1\r\n{h_name}e: value\r\n\n"),
                Err(ErrorKind::InvalidHeader),
            ),
            (
                format!("GET / HTTP/1.1\r\nName: {h_value}e\r\n\r\n"),
                Err(ErrorKind::InvalidHeader),
            ),
            (
                format!(
                    "GET / HTTP/1.1\r\n{}\r\n",
                    format!("{h_name}: {h_value}\r\n")
                        .repeat(limits.header_count)
                ),
                Ok((
                    Method::Get, &def_url, Version::Http11,
                    vec![(&h_name, &h_value); limits.header_count],
                    None, true
                )),
            ),
            (
                format!(
                    "GET / HTTP/1.1\r\n{}\r\n",
                    format!("{h_name}: {h_value}\r\n")
                        .repeat(limits.header_count + 1)
                ),
                Err(ErrorKind::TooManyHeaders),
            ),

            (
                format!(
                    "GET / HTTP/1.1\nContent-Length: {}\n\n{body}",
                    limits.body_size
                ),
                Ok((
                    Method::Get, &def_url, Version::Http11,
                    vec![],
                    Some(body.as_bytes()), true
                )),
            ),
            (
                format!(
                    "GET / HTTP/1.1\nContent-Length: {}\n\n{body}e",
                    limits.body_size + 1,
                ),
                Err(ErrorKind::BodyTooLarge),
            ),
        ];

        parse_request! { cases }
    }
}

#[cfg(test)]
mod parser {
    use super::*;
    use crate::tools::*;

    #[test]
    fn reset() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::new(&limits);

        parser.position = 5;
        parser.len = 10;
        parser.has_crlf = true;
        parser.buffer[0] = b'X';

        parser.reset();

        assert_eq!(Parser::new(&limits), parser);
    }

    #[test]
    fn reset_keep_tail() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(&limits, b"GET / HTTP/1.1\r\n\r\nGET /next");

        parser.position = 19; // end of the first request
        parser.reset_keep_tail();

        assert_eq!(parser.position, 0);
        assert_eq!(parser.len, 9);
        assert_eq!(&parser.buffer[..9], b"GET /next");
    }

    // Search level
    #[test]
    fn find_slice() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(&limits, b"GET / HTTP/1.1");

        assert_eq!(parser.find_slice(10, b' '), Scan::Found(b"GET" as &[u8]));
        assert_eq!(parser.position, 4);

        assert_eq!(parser.find_slice(10, b' '), Scan::Found(b"/" as &[u8]));

        assert_eq!(parser.find_slice(0, b' '), Scan::NotFound);
    }

    #[test]
    fn find_char() {
        let limits = ReqLimits::default().precalculate();
        let parser = Parser::from(&limits, b"hello world\nnext line");

        assert_eq!(parser.find_char(20, b' '), Scan::Found(5));
        assert_eq!(parser.find_char(20, b'\n'), Scan::Found(11));
        assert_eq!(parser.find_char(5, b'x'), Scan::NotFound);
    }

    #[test]
    fn find_char_incomplete() {
        let limits = ReqLimits::default().precalculate();
        let parser = Parser::from(&limits, b"partial");

        // Only 7 real bytes received; asking for a window larger than that
        // and not finding the delimiter means "maybe more is coming".
        assert_eq!(parser.find_char(20, b'\n'), Scan::NeedMore);
    }

    // Low level
    #[test]
    fn get_slice_avail() {
        let limits = ReqLimits::default().precalculate();
        let parser = Parser::from(&limits, b"test data here");

        assert_eq!(str(parser.get_slice_avail(0, 4)), Some("test"));
        assert_eq!(str(parser.get_slice_avail(5, 4)), Some("data"));
        assert_eq!(parser.get_slice_avail(20, 5), None);
    }

    #[test]
    fn get_slice_mut() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(&limits, b"original");

        {
            let slice = parser.get_slice_mut(0, 8).unwrap();
            slice.copy_from_slice(b"modified");
        }

        assert_eq!(parser.get_slice_avail(0, 8), Some(b"modified".as_ref()));
    }

    #[test]
    fn get_slice_static() {
        let limits = ReqLimits::default().precalculate();
        let parser = Parser::from(&limits, b"static data");

        assert_eq!(str(parser.get_slice_static(0, 6)), Some("static"));
        assert_eq!(str(parser.get_slice_static(7, 4)), Some("data"));
        assert_eq!(parser.get_slice_static(20, 5), None);
    }

    #[test]
    fn update_position() {
        let limits = ReqLimits::default().precalculate();
        let mut parser = Parser::from(&limits, b"some data");

        let old_pos = parser.update_position(4);
        assert_eq!(old_pos, 0);
        assert_eq!(parser.position, 5);

        let old_pos = parser.update_position(3);
        assert_eq!(old_pos, 5);
        assert_eq!(parser.position, 9);
    }

    // Unsafe level
    #[test]
    fn into_static() {
        let vec = vec![1, 2, 3];
        let mut vec_mut = vec.clone();

        let vec_static = unsafe { Parser::into_static(&vec_mut) };
        assert_eq!(vec_mut, vec_static);

        vec_mut[0] = 2;
        assert_eq!(vec_mut, vec_static);
    }
}
