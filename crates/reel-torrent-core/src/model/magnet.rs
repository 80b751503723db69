//! Content hash parsing for magnet-style descriptors.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{TorrentError, TorrentResult};

const HEX_LEN: usize = 40;
const BASE32_LEN: usize = 32;
const HASH_BYTES: usize = 20;
const BTIH_PREFIX: &str = "urn:btih:";

/// Canonical content identifier: 40 lower-case hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InfoHash(String);

impl InfoHash {
    /// Parse a hex or base32 BitTorrent v1 info hash.
    ///
    /// # Errors
    ///
    /// Returns [`TorrentError::InvalidDescriptor`] when the input is neither
    /// 40 hex characters nor 32 base32 characters.
    pub fn parse(raw: &str) -> TorrentResult<Self> {
        let raw = raw.trim();
        if raw.len() == HEX_LEN && raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Ok(Self(raw.to_ascii_lowercase()));
        }
        if raw.len() == BASE32_LEN {
            if let Some(bytes) = decode_base32(raw) {
                return Ok(Self(bytes.iter().map(|b| format!("{b:02x}")).collect()));
            }
        }
        Err(TorrentError::InvalidDescriptor {
            reason: "info hash must be 40 hex or 32 base32 characters",
        })
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for InfoHash {
    type Err = TorrentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for InfoHash {
    type Error = TorrentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<InfoHash> for String {
    fn from(value: InfoHash) -> Self {
        value.0
    }
}

/// Fields extracted from a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDescriptor {
    pub hash: InfoHash,
    /// `dn` parameter, if present.
    pub display_name: Option<String>,
    /// `tr` parameters in order of appearance.
    pub trackers: Vec<String>,
}

/// Parse a magnet URI, or a bare info hash, into its components.
pub(crate) fn parse_descriptor(uri: &str) -> TorrentResult<ParsedDescriptor> {
    let uri = uri.trim();
    if uri.is_empty() {
        return Err(TorrentError::InvalidDescriptor {
            reason: "descriptor is empty",
        });
    }
    if !uri.contains(':') {
        return Ok(ParsedDescriptor {
            hash: InfoHash::parse(uri)?,
            display_name: None,
            trackers: Vec::new(),
        });
    }

    let url = Url::parse(uri).map_err(|_| TorrentError::InvalidDescriptor {
        reason: "descriptor is not a valid URI",
    })?;
    if url.scheme() != "magnet" {
        return Err(TorrentError::InvalidDescriptor {
            reason: "descriptor scheme must be magnet",
        });
    }

    let mut hash = None;
    let mut display_name = None;
    let mut trackers = Vec::new();
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "xt" if hash.is_none() => {
                if let Some(raw) = value
                    .get(..BTIH_PREFIX.len())
                    .filter(|prefix| prefix.eq_ignore_ascii_case(BTIH_PREFIX))
                    .map(|_| &value[BTIH_PREFIX.len()..])
                {
                    hash = Some(InfoHash::parse(raw)?);
                }
            }
            "dn" => display_name = Some(value.into_owned()),
            "tr" => trackers.push(value.into_owned()),
            _ => {}
        }
    }

    let hash = hash.ok_or(TorrentError::InvalidDescriptor {
        reason: "magnet has no urn:btih exact topic",
    })?;
    Ok(ParsedDescriptor {
        hash,
        display_name,
        trackers,
    })
}

fn decode_base32(raw: &str) -> Option<[u8; HASH_BYTES]> {
    let mut out = [0_u8; HASH_BYTES];
    let mut buffer: u32 = 0;
    let mut bits = 0_u32;
    let mut index = 0;
    for ch in raw.bytes() {
        let value = match ch.to_ascii_uppercase() {
            c @ b'A'..=b'Z' => c - b'A',
            c @ b'2'..=b'7' => c - b'2' + 26,
            _ => return None,
        };
        buffer = (buffer << 5) | u32::from(value);
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            *out.get_mut(index)? = ((buffer >> bits) & 0xFF) as u8;
            index += 1;
            buffer &= (1 << bits) - 1;
        }
    }
    (index == HASH_BYTES).then_some(out)
}
