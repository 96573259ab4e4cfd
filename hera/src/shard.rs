//! Shard routing.
//!
//! The shard of a key is `murmur3_x86_32(key, SEED) % num_shards`, where
//! `num_shards` is asked from the server once per connection.
use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    Encode,
    encode::Encoded,
    error::ClientError,
    protocol::opcode::MAX_SCUTTLE_BUCKETS,
    statement::ShardingInfo,
};

/// Seed of the shard key hash.
pub const SEED: u32 = 0x183d1db4;

/// MurmurHash3, x86 32 bit variant.
pub fn murmur3_x86_32(data: &[u8], seed: u32) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;

    let mut h = seed;
    let mut chunks = data.chunks_exact(4);

    for chunk in &mut chunks {
        let k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        h ^= k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let k = tail
            .iter()
            .enumerate()
            .fold(0u32, |k, (i, b)| k | u32::from(*b) << (8 * i));
        h ^= k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2);
    }

    h ^= data.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^ (h >> 16)
}

/// Hash a shard key.
pub fn hash(key: &[u8]) -> u32 {
    murmur3_x86_32(key, SEED)
}

/// Map a hash to a shard id.
pub fn shard_for(hash: u32, num_shards: u32) -> Result<u32, ClientError> {
    match num_shards {
        0 => Err(ClientError::new("number of shards is zero")),
        n => Ok(hash % n),
    }
}

/// Scuttle bucket of a decimal shard key value.
///
/// The value is hashed as the 8 little endian bytes of its `i64`.
pub fn scuttle_id(value: &[u8]) -> Result<u32, ClientError> {
    let parsed = std::str::from_utf8(value).ok().and_then(|v| v.parse::<i64>().ok());
    let Some(n) = parsed else {
        return Err(ClientError::new(format!(
            "shard key value is not an integer: {:?}",
            String::from_utf8_lossy(value)
        )));
    };
    Ok(hash(&n.to_le_bytes()) % MAX_SCUTTLE_BUCKETS)
}

/// Where one shard key routes to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShardAssignment {
    pub shard_key: Bytes,
    pub hash: u32,
    pub shard_id: u32,
    pub num_shards: u32,
}

impl ShardAssignment {
    pub fn new(shard_key: impl Into<Bytes>, num_shards: u32) -> Result<Self, ClientError> {
        let shard_key = shard_key.into();
        let hash = hash(&shard_key);
        let shard_id = shard_for(hash, num_shards)?;
        Ok(Self { shard_key, hash, shard_id, num_shards })
    }
}

/// Build the `SHARD_KEY` payload `key=v1;v2` from hinted bind positions.
///
/// Every scuttle position is bound to the scuttle id of its key value.
/// Positions are 1 based. Returns `None` if the hint names no position.
pub fn shard_key_payload(
    info: &ShardingInfo,
    binds: &mut Vec<Encoded>,
) -> Result<Option<Bytes>, ClientError> {
    if info.key_positions.is_empty() {
        return Ok(None);
    }
    if info.key_positions.len() != info.scuttle_positions.len() {
        return Err(ClientError::new(
            "shard key and scuttle id position count mismatch",
        ));
    }

    let mut payload = BytesMut::with_capacity(info.key.len() + 16);
    payload.put_slice(info.key.as_bytes());
    payload.put_u8(b'=');

    for (i, (&key_pos, &scuttle_pos)) in
        info.key_positions.iter().zip(&info.scuttle_positions).enumerate()
    {
        if i != 0 {
            payload.put_u8(b';');
        }

        let Some(value) = key_pos.checked_sub(1).and_then(|i| binds.get(i)) else {
            return Err(ClientError::new(format!(
                "shard key parameter {key_pos} is not bound"
            )));
        };
        let value = value.value().clone();
        payload.put_slice(&value);

        let Some(slot) = scuttle_pos.checked_sub(1) else {
            return Err(ClientError::new("scuttle id position 0"));
        };
        if binds.len() <= slot {
            binds.resize(slot + 1, Encoded::null());
        }
        binds[slot] = scuttle_id(&value)?.encode();
    }

    Ok(Some(payload.freeze()))
}

/// Per connection shard routing state.
///
/// Either an explicit shard id or a one shot shard key may be pending.
#[derive(Debug, Default)]
pub struct ShardRouter {
    enabled: bool,
    num_shards: Option<u32>,
    shard_id: Option<u32>,
    pending: Option<Bytes>,
}

impl ShardRouter {
    pub fn new(enabled: bool) -> Self {
        Self { enabled, ..Default::default() }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Cached shard count, `None` until asked from the server.
    pub fn num_shards(&self) -> Option<u32> {
        self.num_shards
    }

    pub fn set_num_shards(&mut self, num_shards: u32) {
        self.num_shards = Some(num_shards);
    }

    /// Explicit shard id, set through `SET_SHARD_ID`.
    pub fn shard_id(&self) -> Option<u32> {
        self.shard_id
    }

    pub fn set_shard_id(&mut self, shard_id: Option<u32>) {
        self.shard_id = shard_id;
    }

    /// Set a one shot `key=value` hint for the next statement.
    pub fn set_shard_key(&mut self, key: &str, value: &str) {
        self.pending = Some(Bytes::from(format!("{key}={value}")));
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Clear both the explicit shard id and the pending hint.
    pub fn reset(&mut self) {
        self.shard_id = None;
        self.pending = None;
    }

    /// Decide the `SHARD_KEY` payload of the next statement.
    ///
    /// A pending hint is consumed, otherwise the statement sharding hint is
    /// evaluated against `binds`. A statement hint while an explicit shard id
    /// is set is an error.
    pub fn resolve(
        &mut self,
        hint: Option<&ShardingInfo>,
        binds: &mut Vec<Encoded>,
    ) -> Result<Option<Bytes>, ClientError> {
        if !self.enabled {
            return Ok(None);
        }

        match self.shard_id {
            None => match self.pending.take() {
                Some(payload) => Ok(Some(payload)),
                None => match hint {
                    Some(info) => shard_key_payload(info, binds),
                    None => Ok(None),
                },
            },
            Some(_) if hint.is_some() => {
                Err(ClientError::new("the shard hint was not reset"))
            }
            Some(_) if self.pending.is_some() => Err(ClientError::new(
                "the shard hint was not reset before setting new hint",
            )),
            Some(_) => Ok(None),
        }
    }
}
