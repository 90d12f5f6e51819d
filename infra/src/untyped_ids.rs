use std::fmt;
use std::hash::Hasher;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use data_encoding::BASE32_DNSSEC;
use err_derive::Error;
use hex_slice::AsHex;
use serde::{Deserialize, Serialize};

use crate::ids::Id;

const ENCODED_LEN: usize = 16;

/// An identifier without an entity attached. The high half is a nanosecond
/// timestamp, so ids from one `IdGen` sort in creation order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct UntypedId {
    stamp: u64,
    random: u64,
}

#[derive(Debug, Clone, Error)]
pub enum UntypedIdParseError {
    #[error(display = "Unparseable id: {}", _0)]
    Encoding(data_encoding::DecodeError),
    #[error(display = "Id should decode to {} bytes; got {}", _0, _1)]
    Length(usize, usize),
}

/// Hands out time-ordered identifiers. Clones share the same clock, so ids
/// are strictly increasing across every handle.
#[derive(Debug, Clone, Default)]
pub struct IdGen {
    last: Arc<AtomicU64>,
}

impl UntypedId {
    pub fn hashed(bytes: &[u8]) -> Self {
        let mut halves = [0u64; 2];
        for (i, half) in halves.iter_mut().enumerate() {
            let mut h = siphasher::sip::SipHasher24::new_with_keys(0, i as u64);
            h.write(bytes);
            *half = h.finish();
        }
        UntypedId {
            stamp: halves[0],
            random: halves[1],
        }
    }

    pub fn timestamp(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.stamp)
    }

    pub fn random(&self) -> u64 {
        self.random
    }

    pub fn typed<T>(self) -> Id<T> {
        Id::from_untyped(self)
    }

    fn to_bytes(&self) -> [u8; ENCODED_LEN] {
        let mut val = [0u8; ENCODED_LEN];
        val[..8].copy_from_slice(&self.stamp.to_be_bytes());
        val[8..].copy_from_slice(&self.random.to_be_bytes());
        val
    }

    fn from_bytes(val: [u8; ENCODED_LEN]) -> Self {
        let mut stamp = [0u8; 8];
        let mut random = [0u8; 8];
        stamp.copy_from_slice(&val[..8]);
        random.copy_from_slice(&val[8..]);
        UntypedId {
            stamp: u64::from_be_bytes(stamp),
            random: u64::from_be_bytes(random),
        }
    }
}

impl IdGen {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn untyped(&self) -> UntypedId {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or_default();
        let next = |last: u64| std::cmp::max(now, last + 1);
        let prev = match self
            .last
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(next(last)))
        {
            Ok(prev) | Err(prev) => prev,
        };
        UntypedId {
            stamp: next(prev),
            random: rand::random(),
        }
    }

    pub fn generate<T>(&self) -> Id<T> {
        self.untyped().typed()
    }
}

impl fmt::Display for UntypedId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        write!(fmt, "{}", BASE32_DNSSEC.encode(&self.to_bytes()))
    }
}

impl fmt::Debug for UntypedId {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_tuple("UntypedId")
            .field(&format_args!("{:x}", self.to_bytes().as_hex()))
            .finish()
    }
}

impl std::str::FromStr for UntypedId {
    type Err = UntypedIdParseError;
    fn from_str(src: &str) -> Result<Self, Self::Err> {
        let bytes = BASE32_DNSSEC
            .decode(src.as_bytes())
            .map_err(UntypedIdParseError::Encoding)?;
        if bytes.len() != ENCODED_LEN {
            return Err(UntypedIdParseError::Length(ENCODED_LEN, bytes.len()));
        }
        let mut val = [0u8; ENCODED_LEN];
        val.copy_from_slice(&bytes);
        Ok(UntypedId::from_bytes(val))
    }
}

impl From<UntypedId> for String {
    fn from(id: UntypedId) -> String {
        id.to_string()
    }
}

impl std::convert::TryFrom<String> for UntypedId {
    type Error = UntypedIdParseError;
    fn try_from(src: String) -> Result<Self, Self::Error> {
        src.parse()
    }
}
