//! SSH wire helpers for the agent: the `publickey` userauth payload that a
//! client asks the agent to sign, and the `string`-framed signature blob.

use ssh_key::{Algorithm, Signature};

const SSH_MSG_USERAUTH_REQUEST: u8 = 50;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("truncated at offset {0}")]
    Truncated(usize),
    #[error("not a userauth request (message type {0})")]
    NotUserauth(u8),
    #[error("invalid utf-8 in {0}")]
    Utf8(&'static str),
    #[error("invalid signature: {0}")]
    Signature(String),
}

/// Cursor over SSH wire-encoded data.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub const fn position(&self) -> usize {
        self.pos
    }

    pub const fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(WireError::Truncated(self.pos))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn byte(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn boolean(&mut self) -> Result<bool, WireError> {
        Ok(self.byte()? != 0)
    }

    pub fn string(&mut self) -> Result<&'a [u8], WireError> {
        let at = self.pos;
        let len: [u8; 4] = self
            .take(4)?
            .try_into()
            .map_err(|_| WireError::Truncated(at))?;
        let len = usize::try_from(u32::from_be_bytes(len)).map_err(|_| WireError::Truncated(at))?;
        self.take(len)
    }

    pub fn utf8(&mut self, field: &'static str) -> Result<&'a str, WireError> {
        std::str::from_utf8(self.string()?).map_err(|_| WireError::Utf8(field))
    }
}

/// Append an SSH `string`.
pub fn put_string(out: &mut Vec<u8>, value: &[u8]) {
    // Agent payloads are far below 4 GiB; saturate rather than wrap.
    let len = u32::try_from(value.len()).unwrap_or(u32::MAX);
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(value);
}

/// A parsed `SSH_MSG_USERAUTH_REQUEST` signing payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserauthPayload<'a> {
    pub session_id: &'a [u8],
    pub user: &'a str,
    pub algorithm: &'a str,
    /// The payload up to, but not including, the trailing public key blob.
    without_public_key: &'a [u8],
}

impl<'a> UserauthPayload<'a> {
    pub fn parse(data: &'a [u8]) -> Result<Self, WireError> {
        let mut r = Reader::new(data);
        let session_id = r.string()?;
        let kind = r.byte()?;
        if kind != SSH_MSG_USERAUTH_REQUEST {
            return Err(WireError::NotUserauth(kind));
        }
        let user = r.utf8("user")?;
        let _service = r.utf8("service")?;
        let _method = r.utf8("method")?;
        let _has_signature = r.boolean()?;
        let algorithm = r.utf8("algorithm")?;
        let end = r.position();
        let _public_key = r.string()?;
        Ok(Self {
            session_id,
            user,
            algorithm,
            without_public_key: &data[..end],
        })
    }

    /// The payload the phone signs after reinserting its own public key.
    pub fn stripped(&self) -> Vec<u8> {
        self.without_public_key.to_vec()
    }
}

/// Decode an SSH signature blob: `string algorithm || string signature`.
pub fn decode_signature(wire: &[u8]) -> Result<Signature, WireError> {
    let mut r = Reader::new(wire);
    let name = r.utf8("signature algorithm")?;
    let blob = r.string()?;
    let algorithm = Algorithm::new(name).map_err(|e| WireError::Signature(e.to_string()))?;
    Signature::new(algorithm, blob.to_vec()).map_err(|e| WireError::Signature(e.to_string()))
}

/// Encode `signature` as an SSH signature blob.
pub fn encode_signature(signature: &Signature) -> Vec<u8> {
    let mut out = Vec::new();
    put_string(&mut out, signature.algorithm().as_str().as_bytes());
    put_string(&mut out, signature.as_bytes());
    out
}
