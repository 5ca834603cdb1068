//! multipart/form-data encoding of an upload.
//!
//! The body is rendered once into contiguous bytes so every retry sends the
//! exact same payload.

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

/// A fully rendered multipart body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipartPayload {
    pub boundary: String,
    pub body: Bytes,
}

impl MultipartPayload {
    /// `Content-Type` header value for this body.
    pub fn content_type(&self) -> String {
        format!("multipart/form-data; boundary={}", self.boundary)
    }
}

/// Builds a multipart body part by part.
#[derive(Debug)]
pub struct MultipartBuilder {
    boundary: String,
    buf: BytesMut,
}

impl Default for MultipartBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MultipartBuilder {
    pub fn new() -> Self {
        Self::with_boundary(Uuid::new_v4().simple().to_string())
    }

    pub fn with_boundary(boundary: impl Into<String>) -> Self {
        Self {
            boundary: boundary.into(),
            buf: BytesMut::new(),
        }
    }

    /// Append a file part.
    pub fn file(mut self, name: &str, filename: &str, contents: &[u8]) -> Self {
        self.open_part();
        self.buf.put_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\n",
                escape_quotes(name),
                escape_quotes(filename)
            )
            .as_bytes(),
        );
        self.buf
            .put_slice(b"Content-Type: application/octet-stream\r\n\r\n");
        self.buf.put_slice(contents);
        self.buf.put_slice(b"\r\n");
        self
    }

    /// Append a plain text field.
    pub fn text(mut self, name: &str, value: &str) -> Self {
        self.open_part();
        self.buf.put_slice(
            format!(
                "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
                escape_quotes(name)
            )
            .as_bytes(),
        );
        self.buf.put_slice(value.as_bytes());
        self.buf.put_slice(b"\r\n");
        self
    }

    /// Write the closing delimiter.
    pub fn finish(mut self) -> MultipartPayload {
        self.buf
            .put_slice(format!("--{}--\r\n", self.boundary).as_bytes());
        MultipartPayload {
            boundary: self.boundary,
            body: self.buf.freeze(),
        }
    }

    fn open_part(&mut self) {
        self.buf
            .put_slice(format!("--{}\r\n", self.boundary).as_bytes());
    }
}

fn escape_quotes(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
