//! The stdin/stdout contract with the calling process.

use crate::error::{EmbedError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use serde_json::ser::Formatter;
use std::io;

#[derive(Debug, Deserialize)]
pub struct EmbeddingRequest {
    #[serde(default)]
    pub texts: Option<Vec<String>>,
}

impl EmbeddingRequest {
    /// Parse a request document. Anything other than a JSON object whose
    /// `texts` (when present) is an array of strings is rejected.
    pub fn parse(input: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(input).map_err(|e| EmbedError::InputFormat(Some(e)))?;
        if !value.is_object() {
            return Err(EmbedError::InputFormat(None));
        }
        serde_json::from_value(value).map_err(|e| EmbedError::InputFormat(Some(e)))
    }

    /// The texts to embed; missing, null and empty are all the same error.
    pub fn into_texts(self) -> Result<Vec<String>> {
        match self.texts {
            Some(texts) if !texts.is_empty() => Ok(texts),
            _ => Err(EmbedError::EmptyInput),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct EmbeddingResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub model: String,
    pub dimension: usize,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl From<&EmbedError> for ErrorResponse {
    fn from(err: &EmbedError) -> Self {
        Self {
            error: err.to_string(),
        }
    }
}

/// One catalogue row for `--list-models`.
#[derive(Debug, Serialize)]
pub struct ModelEntry {
    pub id: &'static str,
    pub aliases: &'static [&'static str],
    pub backend: &'static str,
    /// `None` when the dimension is only known after loading
    pub dimension: Option<usize>,
    pub available: bool,
}

#[derive(Debug, Serialize)]
pub struct ModelListing {
    pub models: Vec<ModelEntry>,
}

/// Single-line JSON with `", "` and `": "` separators, the same layout as
/// Python's `json.dumps` defaults.
struct Spaced;

impl Formatter for Spaced {
    fn begin_array_value<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_key<W>(&mut self, writer: &mut W, first: bool) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        if first {
            Ok(())
        } else {
            writer.write_all(b", ")
        }
    }

    fn begin_object_value<W>(&mut self, writer: &mut W) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        writer.write_all(b": ")
    }
}

pub fn to_line<T: Serialize>(value: &T) -> serde_json::Result<String> {
    let mut buf = Vec::new();
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, Spaced);
    value.serialize(&mut ser)?;
    String::from_utf8(buf)
        .map_err(|e| serde_json::Error::io(io::Error::new(io::ErrorKind::InvalidData, e)))
}
