use std::fmt;
use std::str::FromStr;

use data_encoding::BASE32_NOPAD;

use crate::error::{FiniError, Result};
use crate::util::varint::{get_uvarint, put_uvarint};

pub const CID_V1: u64 = 0x01;
pub const RAW: u64 = 0x55;
pub const DAG_CBOR: u64 = 0x71;
pub const BLAKE3: u64 = 0x1e;
pub const DIGEST_LEN: usize = 32;

/// CIDv1 over a BLAKE3-256 multihash.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid {
    codec: u64,
    digest: [u8; DIGEST_LEN],
}

impl Cid {
    pub fn new(codec: u64, digest: [u8; DIGEST_LEN]) -> Self {
        Self { codec, digest }
    }

    pub fn raw(data: &[u8]) -> Self {
        Self::new(RAW, *blake3::hash(data).as_bytes())
    }

    pub fn dag_cbor(data: &[u8]) -> Self {
        Self::new(DAG_CBOR, *blake3::hash(data).as_bytes())
    }

    pub fn codec(&self) -> u64 {
        self.codec
    }

    pub fn digest(&self) -> &[u8; DIGEST_LEN] {
        &self.digest
    }

    /// True when `data` hashes to this CID's digest.
    pub fn verifies(&self, data: &[u8]) -> bool {
        blake3::hash(data).as_bytes() == &self.digest
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + DIGEST_LEN);
        put_uvarint(&mut out, CID_V1);
        put_uvarint(&mut out, self.codec);
        put_uvarint(&mut out, BLAKE3);
        put_uvarint(&mut out, DIGEST_LEN as u64);
        out.extend_from_slice(&self.digest);
        out
    }

    /// Parse a binary CID from the front of `buf`; returns it and bytes consumed.
    pub fn read_bytes(buf: &[u8]) -> Result<(Self, usize)> {
        let mut off = 0;
        let mut next = |buf: &[u8]| -> Result<u64> {
            let (v, n) = get_uvarint(&buf[off.min(buf.len())..])?;
            off += n;
            Ok(v)
        };
        let version = next(buf)?;
        let codec = next(buf)?;
        let hash = next(buf)?;
        let len = next(buf)? as usize;
        if version != CID_V1 {
            return Err(FiniError::Format(format!("unsupported CID version {version}")));
        }
        if hash != BLAKE3 || len != DIGEST_LEN {
            return Err(FiniError::Format(format!(
                "unsupported multihash 0x{hash:x}/{len}"
            )));
        }
        let end = off + DIGEST_LEN;
        if buf.len() < end {
            return Err(FiniError::Format("truncated CID digest".into()));
        }
        let mut digest = [0u8; DIGEST_LEN];
        digest.copy_from_slice(&buf[off..end]);
        Ok((Self { codec, digest }, end))
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // multibase 'b': lowercase RFC 4648 base32 without padding
        let enc = BASE32_NOPAD.encode(&self.to_bytes());
        write!(f, "b{}", enc.to_ascii_lowercase())
    }
}

impl FromStr for Cid {
    type Err = FiniError;

    fn from_str(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix('b')
            .ok_or_else(|| FiniError::Format(format!("unsupported multibase in `{s}`")))?;
        let bytes = BASE32_NOPAD
            .decode(body.to_ascii_uppercase().as_bytes())
            .map_err(|e| FiniError::Format(format!("bad base32 CID: {e}")))?;
        let (cid, used) = Cid::read_bytes(&bytes)?;
        if used != bytes.len() {
            return Err(FiniError::Format("trailing bytes after CID".into()));
        }
        Ok(cid)
    }
}
