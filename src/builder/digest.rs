//! Running content digest for one ingestion invocation
//!
//! Every source copied into a builder opens a new section tagged with a
//! content type ("file", "dir"). A single section reports its own type and
//! hash; several sections collapse into a "multi" digest over the list of
//! `type:hex` entries, so the result always changes when more content is
//! fed in without a restart.

use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Write};

/// Content type reported when more than one section was digested
pub const MULTI_CONTENT_TYPE: &str = "multi";

#[derive(Clone)]
struct Section {
    content_type: String,
    hasher: Sha256,
}

impl Section {
    fn hex(&self) -> String {
        hex::encode(self.hasher.clone().finalize())
    }
}

/// Accumulates the digest of content ingested into a builder
#[derive(Clone, Default)]
pub struct ContentDigester {
    sections: Vec<Section>,
}

/// Snapshot of a [`ContentDigester`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentDigest {
    /// Empty when nothing was digested
    pub content_type: String,
    /// Hex-encoded SHA-256
    pub hex: String,
}

impl ContentDigest {
    /// `type:` prefix used in history annotations, empty when untyped
    pub fn type_prefix(&self) -> String {
        if self.content_type.is_empty() {
            String::new()
        } else {
            format!("{}:", self.content_type)
        }
    }
}

impl ContentDigester {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget everything digested so far
    pub fn restart(&mut self) {
        self.sections.clear();
    }

    /// Open a new section; subsequent writes are hashed into it
    pub fn start(&mut self, content_type: impl Into<String>) {
        self.sections.push(Section {
            content_type: content_type.into(),
            hasher: Sha256::new(),
        });
    }

    /// Feed bytes into the current section, opening an untyped one if needed
    pub fn update(&mut self, data: &[u8]) {
        if self.sections.is_empty() {
            self.start("");
        }
        if let Some(section) = self.sections.last_mut() {
            section.hasher.update(data);
        }
    }

    /// Read the accumulated digest without resetting it
    pub fn digest(&self) -> ContentDigest {
        match self.sections.as_slice() {
            [] => ContentDigest {
                content_type: String::new(),
                hex: hex::encode(Sha256::digest(b"")),
            },
            [only] => ContentDigest {
                content_type: only.content_type.clone(),
                hex: only.hex(),
            },
            many => {
                let combined = many
                    .iter()
                    .map(|s| {
                        if s.content_type.is_empty() {
                            s.hex()
                        } else {
                            format!("{}:{}", s.content_type, s.hex())
                        }
                    })
                    .collect::<Vec<_>>()
                    .join(",");
                ContentDigest {
                    content_type: MULTI_CONTENT_TYPE.to_string(),
                    hex: hex::encode(Sha256::digest(combined.as_bytes())),
                }
            }
        }
    }

    /// Borrow the digester as an `io::Write` sink
    pub fn writer(&mut self) -> DigestWriter<'_> {
        DigestWriter { digester: self }
    }
}

impl fmt::Debug for ContentDigester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentDigester")
            .field("sections", &self.sections.len())
            .field("digest", &self.digest())
            .finish()
    }
}

/// `io::Write` adapter feeding a [`ContentDigester`]
pub struct DigestWriter<'a> {
    digester: &'a mut ContentDigester,
}

impl Write for DigestWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.digester.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
