//! Response document rendering.
//!
//! A [`Formatter`] turns documents into response bodies. Streams wrap each
//! rendered document in a part of a `multipart/x-mixed-replace` body.

use std::fmt::Debug;

use hyper::body::Bytes;
use mtconnect_buffer::StreamFrame;
use mtconnect_types::{
    AssetDocument, CurrentDocument, ErrorDocument, Header, Observation, ProbeDocument,
    SampleDocument,
};
use serde::Serialize;
use thiserror::Error;

/// Boundary separating stream parts.
pub const MULTIPART_BOUNDARY: &str = "mtconnect-boundary";

/// Content type of a stream response.
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace;boundary=mtconnect-boundary";

/// A document could not be rendered.
#[derive(Debug, Error)]
#[error("Failed to render document: {0}")]
pub struct FormatError(String);

pub type FormatResult = Result<Bytes, FormatError>;

/// Renders response documents in one wire format.
pub trait Formatter: Send + Sync + Debug {
    /// Content type of rendered documents.
    fn content_type(&self) -> &'static str;

    fn probe(&self, doc: &ProbeDocument) -> FormatResult;

    fn current(&self, doc: &CurrentDocument) -> FormatResult;

    fn sample(&self, doc: &SampleDocument) -> FormatResult;

    fn assets(&self, doc: &AssetDocument) -> FormatResult;

    fn error(&self, doc: &ErrorDocument) -> FormatResult;

    /// A stream heartbeat: an empty sample ending at `end_sequence`.
    fn heartbeat(&self, header: &Header, end_sequence: u64) -> FormatResult;
}

/// JSON documents, field names as in the document types.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonFormatter;

impl JsonFormatter {
    fn render<T: Serialize>(doc: &T) -> FormatResult {
        serde_json::to_vec(doc)
            .map(Bytes::from)
            .map_err(|e| FormatError(e.to_string()))
    }
}

#[derive(Serialize)]
struct HeartbeatDocument<'a> {
    header: &'a Header,
    end_sequence: u64,
    observations: &'a [Observation],
}

impl Formatter for JsonFormatter {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn probe(&self, doc: &ProbeDocument) -> FormatResult {
        Self::render(doc)
    }

    fn current(&self, doc: &CurrentDocument) -> FormatResult {
        Self::render(doc)
    }

    fn sample(&self, doc: &SampleDocument) -> FormatResult {
        Self::render(doc)
    }

    fn assets(&self, doc: &AssetDocument) -> FormatResult {
        Self::render(doc)
    }

    fn error(&self, doc: &ErrorDocument) -> FormatResult {
        Self::render(doc)
    }

    fn heartbeat(&self, header: &Header, end_sequence: u64) -> FormatResult {
        Self::render(&HeartbeatDocument {
            header,
            end_sequence,
            observations: &[],
        })
    }
}

/// Render one stream frame as a multipart part.
pub fn render_part(formatter: &dyn Formatter, frame: &StreamFrame) -> FormatResult {
    let body = match frame {
        StreamFrame::Data(doc) => formatter.sample(doc)?,
        StreamFrame::Heartbeat {
            header,
            end_sequence,
        } => formatter.heartbeat(header, *end_sequence)?,
        StreamFrame::Error(doc) => formatter.error(doc)?,
    };

    let head = format!(
        "--{}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        MULTIPART_BOUNDARY,
        formatter.content_type(),
        body.len()
    );
    let mut out = Vec::with_capacity(head.len() + body.len() + 2);
    out.extend_from_slice(head.as_bytes());
    out.extend_from_slice(&body);
    out.extend_from_slice(b"\r\n");
    Ok(Bytes::from(out))
}

/// The closing boundary of a stream.
pub fn closing_boundary() -> Bytes {
    Bytes::from(format!("--{}--\r\n", MULTIPART_BOUNDARY))
}
