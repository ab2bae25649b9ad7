use std::io::{ErrorKind, Read, Write};

use ciborium::value::{Integer, Value};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{FiniError, Result};
use crate::pack::cid::Cid;
use crate::util::varint::{get_uvarint, put_uvarint, uvarint_len};

pub const CAR_VERSION: u64 = 1;
const CID_TAG: u64 = 42;

/// DAG-CBOR link: tag 42 over the binary CID with the identity multibase prefix.
pub fn link(cid: &Cid) -> Value {
    let mut bytes = Vec::with_capacity(40);
    bytes.push(0x00);
    bytes.extend_from_slice(&cid.to_bytes());
    Value::Tag(CID_TAG, Box::new(Value::Bytes(bytes)))
}

fn unlink(v: &Value) -> Result<Cid> {
    match v {
        Value::Tag(CID_TAG, inner) => match inner.as_ref() {
            Value::Bytes(b) if b.first() == Some(&0x00) => Ok(Cid::read_bytes(&b[1..])?.0),
            _ => Err(FiniError::Format("malformed CID link".into())),
        },
        _ => Err(FiniError::Format("expected CID link".into())),
    }
}

pub fn encode_cbor(v: &Value) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(v, &mut buf)
        .map_err(|e| FiniError::Encoding(format!("cbor encode: {e}")))?;
    Ok(buf)
}

fn header(roots: &[Cid]) -> Value {
    // canonical DAG-CBOR orders keys by length first
    Value::Map(vec![
        (
            Value::Text("roots".into()),
            Value::Array(roots.iter().map(link).collect()),
        ),
        (
            Value::Text("version".into()),
            Value::Integer(Integer::from(CAR_VERSION)),
        ),
    ])
}

/// Streams a CARv1: one header section, then `cid || data` sections.
pub struct CarWriter<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> CarWriter<W> {
    pub fn new(inner: W, roots: &[Cid]) -> Result<Self> {
        let mut w = Self { inner, written: 0 };
        let head = encode_cbor(&header(roots))?;
        w.section(&[&head])?;
        Ok(w)
    }

    pub fn write_block(&mut self, cid: &Cid, data: &[u8]) -> Result<()> {
        let cid_bytes = cid.to_bytes();
        self.section(&[&cid_bytes, data])
    }

    fn section(&mut self, parts: &[&[u8]]) -> Result<()> {
        let body_len: usize = parts.iter().map(|p| p.len()).sum();
        let mut prefix = Vec::with_capacity(uvarint_len(body_len as u64));
        put_uvarint(&mut prefix, body_len as u64);
        self.inner.write_all(&prefix)?;
        for p in parts {
            self.inner.write_all(p)?;
        }
        self.written += (prefix.len() + body_len) as u64;
        Ok(())
    }

    pub fn finish(mut self) -> Result<(W, u64)> {
        self.inner.flush()?;
        Ok((self.inner, self.written))
    }
}

/// Next framed section (length prefix included) from an async CAR stream;
/// `None` at a clean end of stream.
pub async fn read_section<R: AsyncRead + Unpin>(r: &mut R) -> Result<Option<Vec<u8>>> {
    let mut section = Vec::with_capacity(10);
    loop {
        let byte = match r.read_u8().await {
            Ok(b) => b,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof && section.is_empty() => {
                return Ok(None);
            }
            Err(e) => return Err(truncated(e)),
        };
        section.push(byte);
        if byte < 0x80 {
            break;
        }
        if section.len() >= 10 {
            return Err(FiniError::Format("overlong section length".into()));
        }
    }
    let (len, start) = get_uvarint(&section)?;
    section.resize(start + len as usize, 0);
    r.read_exact(&mut section[start..]).await.map_err(truncated)?;
    Ok(Some(section))
}

fn truncated(e: std::io::Error) -> FiniError {
    if e.kind() == ErrorKind::UnexpectedEof {
        FiniError::Format("truncated CAR section".into())
    } else {
        e.into()
    }
}

#[derive(Debug, Default)]
pub struct CarContents {
    pub roots: Vec<Cid>,
    pub blocks: Vec<(Cid, Vec<u8>)>,
}

/// Read a whole CARv1, checking every block against its CID.
pub fn read_car<R: Read>(mut r: R) -> Result<CarContents> {
    let mut buf = Vec::new();
    r.read_to_end(&mut buf)?;

    let mut sections = Vec::new();
    let mut off = 0usize;
    while off < buf.len() {
        let (len, n) = get_uvarint(&buf[off..])?;
        let start = off + n;
        let end = start + len as usize;
        if end > buf.len() {
            return Err(FiniError::Format("truncated CAR section".into()));
        }
        sections.push(&buf[start..end]);
        off = end;
    }

    let Some((head, rest)) = sections.split_first() else {
        return Err(FiniError::Format("empty CAR stream".into()));
    };
    let head: Value = ciborium::de::from_reader(*head)
        .map_err(|e| FiniError::Format(format!("CAR header decode: {e}")))?;
    let mut contents = CarContents::default();
    let mut version = None;
    for (k, v) in head.as_map().into_iter().flatten() {
        match (k.as_text(), v) {
            (Some("roots"), Value::Array(items)) => {
                contents.roots = items.iter().map(unlink).collect::<Result<_>>()?
            }
            (Some("version"), Value::Integer(i)) => version = Some(u64::try_from(*i).unwrap_or(0)),
            _ => {}
        }
    }
    if version != Some(CAR_VERSION) {
        return Err(FiniError::Format("not a CARv1 stream".into()));
    }

    for body in rest {
        let (cid, used) = Cid::read_bytes(body)?;
        let data = &body[used..];
        if !cid.verifies(data) {
            return Err(FiniError::Format(format!("block {cid} fails verification")));
        }
        contents.blocks.push((cid, data.to_vec()));
    }
    Ok(contents)
}
