//! Pluggable compression backend.
//!
//! Handles the transformation of raw chunk payloads into compressed bytes and back.
//! This module defines the [`Compression`] scheme enum used in headers, the
//! [`Compressor`] trait, and a registry of the algorithms compiled into the crate.
//!
//! * `NONE`: pass-through.
//! * `LZ4`: LZ4 block prefixed with the little-endian `u32` uncompressed length
//!   (feature `lz4_flex`).
//! * `SNAPPY`: raw snappy block (feature `snap`).

use std::borrow::Cow;
use std::fmt;
use std::sync::OnceLock;

use crate::constants::{V6_LZ4_LIMIT, V6_SNAPPY_LIMIT};
use crate::error::{Error, Result};

/// A compression scheme as named in file headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Compression {
    /// Stored as-is.
    None,
    /// LZ4 block with size prefix.
    Lz4,
    /// Raw snappy.
    Snappy,
}

impl Compression {
    /// All schemes, in registry order.
    pub const ALL: [Compression; 3] = [Compression::None, Compression::Lz4, Compression::Snappy];

    /// Name used by generations 1-5 (`"NONE"`, `"LZ4"`, `"SNAPPY"`).
    pub fn name(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::Lz4 => "LZ4",
            Self::Snappy => "SNAPPY",
        }
    }

    /// Fixed-width code used by generation 6 (`"NON"`, `"LZ4"`, `"SNA"`).
    ///
    /// Always three characters so the header length does not depend on the codec.
    pub fn code(self) -> &'static str {
        match self {
            Self::None => "NON",
            Self::Lz4 => "LZ4",
            Self::Snappy => "SNA",
        }
    }

    /// Parses a generation 1-5 scheme name. Case-insensitive.
    pub fn from_name(name: &str) -> Result<Self> {
        match name.to_ascii_uppercase().as_str() {
            "NONE" => Ok(Self::None),
            "LZ4" => Ok(Self::Lz4),
            "SNAPPY" => Ok(Self::Snappy),
            _ => Err(Error::UnsupportedCodec {
                scheme: name.to_string(),
            }),
        }
    }

    /// Parses a generation 6 three-letter code.
    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "NON" => Ok(Self::None),
            "LZ4" => Ok(Self::Lz4),
            "SNA" => Ok(Self::Snappy),
            _ => Err(Error::UnsupportedCodec {
                scheme: code.to_string(),
            }),
        }
    }

    /// Codec chosen for an unpinned generation 6 chunk whose encoded payload is
    /// `len` bytes long.
    ///
    /// LZ4 below `0x7E00_0000`, SNAPPY below `0xFFFF_FFFF`, NONE above that. This
    /// ordering matches the files written by the simulator and must not change.
    pub fn select_for_len(len: usize) -> Self {
        let len = len as u64;
        if len < V6_LZ4_LIMIT {
            Self::Lz4
        } else if len < V6_SNAPPY_LIMIT {
            Self::Snappy
        } else {
            Self::None
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::None => 0,
            Self::Lz4 => 1,
            Self::Snappy => 2,
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Interface for compression algorithms.
pub trait Compressor: Send + Sync + fmt::Debug {
    /// The scheme this compressor implements.
    fn scheme(&self) -> Compression;

    /// Compresses the data.
    ///
    /// May borrow the input when no transformation is needed.
    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>>;

    /// Decompresses the data.
    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>>;
}

// --- No Compression (Pass-through) ---

/// A compressor that performs no compression.
#[derive(Debug, Clone, Copy)]
pub struct NoCompression;

impl Compressor for NoCompression {
    fn scheme(&self) -> Compression {
        Compression::None
    }

    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(data))
    }

    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Borrowed(data))
    }
}

// --- LZ4 Implementation ---

#[cfg(feature = "lz4_flex")]
/// A compressor using the LZ4 block format with a prepended size.
#[derive(Debug, Clone, Copy)]
pub struct Lz4Compressor;

#[cfg(feature = "lz4_flex")]
impl Compressor for Lz4Compressor {
    fn scheme(&self) -> Compression {
        Compression::Lz4
    }

    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        Ok(Cow::Owned(lz4_flex::compress_prepend_size(data)))
    }

    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let vec = lz4_flex::decompress_size_prepended(data).map_err(|e| Error::Codec {
            scheme: Compression::Lz4,
            reason: e.to_string(),
        })?;
        Ok(Cow::Owned(vec))
    }
}

// --- Snappy Implementation ---

#[cfg(feature = "snap")]
/// A compressor using raw snappy blocks.
#[derive(Debug, Clone, Copy)]
pub struct SnappyCompressor;

#[cfg(feature = "snap")]
impl Compressor for SnappyCompressor {
    fn scheme(&self) -> Compression {
        Compression::Snappy
    }

    fn compress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let compressed = snap::raw::Encoder::new()
            .compress_vec(data)
            .map_err(|e| Error::Codec {
                scheme: Compression::Snappy,
                reason: e.to_string(),
            })?;
        Ok(Cow::Owned(compressed))
    }

    fn decompress<'a>(&self, data: &'a [u8]) -> Result<Cow<'a, [u8]>> {
        let decompressed = snap::raw::Decoder::new()
            .decompress_vec(data)
            .map_err(|e| Error::Codec {
                scheme: Compression::Snappy,
                reason: e.to_string(),
            })?;
        Ok(Cow::Owned(decompressed))
    }
}

// --- REGISTRY ---

/// Registry mapping each [`Compression`] scheme to its implementation.
///
/// Schemes whose feature is disabled have no entry and report
/// [`Error::UnsupportedCodec`].
#[derive(Debug)]
pub struct CompressorRegistry {
    algorithms: Vec<Option<Box<dyn Compressor>>>,
}

impl CompressorRegistry {
    /// Creates a registry with every compiled-in algorithm registered.
    pub fn new() -> Self {
        let mut reg = Self {
            algorithms: Compression::ALL.iter().map(|_| None).collect(),
        };

        reg.register(Box::new(NoCompression));

        #[cfg(feature = "lz4_flex")]
        reg.register(Box::new(Lz4Compressor));

        #[cfg(feature = "snap")]
        reg.register(Box::new(SnappyCompressor));

        reg
    }

    /// Registers a compressor, replacing any previous one for the same scheme.
    pub fn register(&mut self, algo: Box<dyn Compressor>) {
        let slot = algo.scheme().slot();
        if let Some(entry) = self.algorithms.get_mut(slot) {
            *entry = Some(algo);
        }
    }

    /// Retrieves the compressor for `scheme`.
    pub fn get(&self, scheme: Compression) -> Result<&dyn Compressor> {
        self.algorithms
            .get(scheme.slot())
            .and_then(|opt| opt.as_deref())
            .ok_or_else(|| Error::UnsupportedCodec {
                scheme: scheme.name().to_string(),
            })
    }
}

impl Default for CompressorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide default registry.
pub fn registry() -> &'static CompressorRegistry {
    static REGISTRY: OnceLock<CompressorRegistry> = OnceLock::new();
    REGISTRY.get_or_init(CompressorRegistry::new)
}

/// Compresses `data` with `scheme`.
pub fn compress(data: &[u8], scheme: Compression) -> Result<Vec<u8>> {
    registry()
        .get(scheme)?
        .compress(data)
        .map(Cow::into_owned)
}

/// Decompresses `data` that was compressed with `scheme`.
pub fn decompress(data: &[u8], scheme: Compression) -> Result<Vec<u8>> {
    registry()
        .get(scheme)?
        .decompress(data)
        .map(Cow::into_owned)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn names_and_codes_map_both_ways() {
        for scheme in Compression::ALL {
            assert_eq!(Compression::from_name(scheme.name()).unwrap(), scheme);
            assert_eq!(Compression::from_code(scheme.code()).unwrap(), scheme);
            assert_eq!(scheme.code().len(), 3);
        }
        assert_eq!(Compression::from_name("snappy").unwrap(), Compression::Snappy);
        assert!(matches!(
            Compression::from_name("ZSTD"),
            Err(Error::UnsupportedCodec { .. })
        ));
        assert!(matches!(
            Compression::from_code("NONE"),
            Err(Error::UnsupportedCodec { .. })
        ));
    }

    #[test]
    fn v6_selection_thresholds() {
        assert_eq!(Compression::select_for_len(0), Compression::Lz4);
        assert_eq!(Compression::select_for_len(0x7DFF_FFFF), Compression::Lz4);
        assert_eq!(Compression::select_for_len(0x7E00_0000), Compression::Snappy);
        assert_eq!(Compression::select_for_len(0xFFFF_FFFE), Compression::Snappy);
        assert_eq!(Compression::select_for_len(0xFFFF_FFFF), Compression::None);
    }

    #[test]
    fn pass_through_borrows() {
        let data = b"individualHumans";
        let out = NoCompression.compress(data).unwrap();
        assert!(matches!(out, Cow::Borrowed(_)));
    }

    #[test]
    fn every_compiled_codec_round_trips_empty_input() {
        for scheme in Compression::ALL {
            if registry().get(scheme).is_err() {
                continue;
            }
            let packed = compress(&[], scheme).unwrap();
            assert!(decompress(&packed, scheme).unwrap().is_empty());
        }
    }
}
