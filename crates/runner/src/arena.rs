//! Handle table for host-owned values the guest refers to by integer.

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;

use crate::{
    capability::net::NetRequest,
    error::{ArenaError, Error, Result},
};

/// Handle value reserved for "no value".
pub const ABSENT: i32 = -1;

pub type SharedArena = Arc<Mutex<Arena>>;

/// Markup body handed to an external DOM capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub html: String,
    /// Final response URL, used to resolve relative links.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
    Webp,
    Bmp,
}

impl ImageFormat {
    /// Sniff the container format from leading magic bytes.
    #[must_use]
    pub fn detect(data: &[u8]) -> Option<Self> {
        match data {
            [0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, ..] => Some(Self::Png),
            [0xff, 0xd8, 0xff, ..] => Some(Self::Jpeg),
            [b'G', b'I', b'F', b'8', b'7' | b'9', b'a', ..] => Some(Self::Gif),
            [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => Some(Self::Webp),
            [b'B', b'M', ..] => Some(Self::Bmp),
            _ => None,
        }
    }
}

/// Encoded image data of a recognised format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub format: ImageFormat,
    pub data: Bytes,
}

impl Image {
    /// Returns `None` when `data` is not a recognised image.
    #[must_use]
    pub fn from_bytes(data: Bytes) -> Option<Self> {
        ImageFormat::detect(&data).map(|format| Self { format, data })
    }
}

/// Every kind of value the arena can hold.
#[derive(Debug, Clone)]
pub enum Resource {
    Bytes(Bytes),
    Text(String),
    Request(NetRequest),
    Document(Document),
    Image(Image),
}

impl Resource {
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "text",
            Self::Request(_) => "request",
            Self::Document(_) => "document",
            Self::Image(_) => "image",
        }
    }

    /// Raw bytes of a buffer-like resource.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(b) => Some(b),
            Self::Text(s) => Some(s.as_bytes()),
            _ => None,
        }
    }
}

impl From<Bytes> for Resource {
    fn from(value: Bytes) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<u8>> for Resource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value.into())
    }
}

impl From<String> for Resource {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for Resource {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<NetRequest> for Resource {
    fn from(value: NetRequest) -> Self {
        Self::Request(value)
    }
}

impl From<Document> for Resource {
    fn from(value: Document) -> Self {
        Self::Document(value)
    }
}

impl From<Image> for Resource {
    fn from(value: Image) -> Self {
        Self::Image(value)
    }
}

/// Maps small positive handles to resources.
///
/// Handles count up from 1. Once the last entry is removed the counter starts
/// over at 1, so handles stay small for guests that release what they obtain.
#[derive(Debug)]
pub struct Arena {
    entries: HashMap<i32, Resource>,
    next: i32,
}

impl Default for Arena {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next: 1,
        }
    }
}

impl Arena {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn shared() -> SharedArena {
        Arc::new(Mutex::new(Self::new()))
    }

    pub fn store(&mut self, value: impl Into<Resource>) -> i32 {
        while self.entries.contains_key(&self.next) {
            self.advance();
        }
        let handle = self.next;
        self.entries.insert(handle, value.into());
        self.advance();
        handle
    }

    /// Encode `value` and store the resulting buffer.
    ///
    /// # Errors
    /// Returns [`Error::Encode`] if the value cannot be encoded.
    pub fn store_encoded<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<i32> {
        let bytes = sourcebridge_codec::to_bytes(value).map_err(Error::Encode)?;
        Ok(self.store(bytes))
    }

    #[must_use]
    pub fn fetch(&self, handle: i32) -> Option<&Resource> {
        self.entries.get(&handle)
    }

    pub fn fetch_mut(&mut self, handle: i32) -> Option<&mut Resource> {
        self.entries.get_mut(&handle)
    }

    /// Put `value` under `handle`, returning what was there.
    pub fn replace(&mut self, handle: i32, value: impl Into<Resource>) -> Option<Resource> {
        self.entries.insert(handle, value.into())
    }

    pub fn remove(&mut self, handle: i32) -> Option<Resource> {
        let removed = self.entries.remove(&handle);
        if self.entries.is_empty() {
            self.next = 1;
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bytes of a `Bytes` or `Text` resource.
    ///
    /// # Errors
    /// Fails if the handle is empty or holds another kind.
    pub fn bytes(&self, handle: i32) -> Result<&[u8], ArenaError> {
        let resource = self.get(handle)?;
        resource
            .as_bytes()
            .ok_or_else(|| wrong_kind(handle, "bytes", resource))
    }

    /// # Errors
    /// Fails if the handle is empty or holds another kind.
    pub fn request(&self, handle: i32) -> Result<&NetRequest, ArenaError> {
        match self.get(handle)? {
            Resource::Request(request) => Ok(request),
            other => Err(wrong_kind(handle, "request", other)),
        }
    }

    /// # Errors
    /// Fails if the handle is empty or holds another kind.
    pub fn request_mut(&mut self, handle: i32) -> Result<&mut NetRequest, ArenaError> {
        match self.entries.get_mut(&handle) {
            Some(Resource::Request(request)) => Ok(request),
            Some(other) => Err(wrong_kind(handle, "request", other)),
            None => Err(ArenaError::Missing(handle)),
        }
    }

    /// # Errors
    /// Fails if the handle is empty or holds another kind.
    pub fn image(&self, handle: i32) -> Result<&Image, ArenaError> {
        match self.get(handle)? {
            Resource::Image(image) => Ok(image),
            other => Err(wrong_kind(handle, "image", other)),
        }
    }

    /// # Errors
    /// Fails if the handle is empty or holds another kind.
    pub fn document(&self, handle: i32) -> Result<&Document, ArenaError> {
        match self.get(handle)? {
            Resource::Document(document) => Ok(document),
            other => Err(wrong_kind(handle, "document", other)),
        }
    }

    fn get(&self, handle: i32) -> Result<&Resource, ArenaError> {
        self.entries.get(&handle).ok_or(ArenaError::Missing(handle))
    }

    const fn advance(&mut self) {
        self.next = match self.next.checked_add(1) {
            Some(next) => next,
            None => 1,
        };
    }
}

const fn wrong_kind(handle: i32, expected: &'static str, found: &Resource) -> ArenaError {
    ArenaError::WrongKind {
        handle,
        expected,
        found: found.kind(),
    }
}
