//! Reassembly of chunked property-exchange transactions.
//!
//! Each remote device gets up to 128 concurrent transactions, one per 7-bit
//! request id. Chunks are appended until the final one arrives, then the
//! concatenated header is parsed and the body decoded.

use std::collections::BTreeMap;

use midi_ci_core::encoding::{self, Encoding};
use midi_ci_core::message::PropertyChunk;
use midi_ci_core::property_header::status;
use midi_ci_core::{
    ChunkCount, PropertyReplyHeader, PropertyRequestHeader, PropertySubscriptionHeader,
};
use serde_json::Value;
use thiserror::Error;

/// Number of distinct property-exchange request ids.
pub const NUM_REQUEST_IDS: usize = 128;

/// Why a transaction ended without a usable message.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeError {
    #[error("Transaction ended before its final chunk")]
    Partial,

    #[error("Transaction terminated by a notify message")]
    Notify,

    #[error("Too many simultaneous transactions")]
    TooManyTransactions,

    #[error("Chunks arrived out of sequence")]
    InconsistentChunks,
}

/// A completed transaction: parsed header and decoded body.
///
/// A well-formed response may still report a failure in its header, so
/// check the status before using the body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyExchangeResponse {
    pub header: Value,
    pub body: Vec<u8>,
}

impl PropertyExchangeResponse {
    pub fn reply_header(&self) -> PropertyReplyHeader {
        PropertyReplyHeader::from_json(&self.header)
    }

    pub fn request_header(&self) -> PropertyRequestHeader {
        PropertyRequestHeader::from_json(&self.header)
    }

    pub fn subscription_header(&self) -> PropertySubscriptionHeader {
        PropertySubscriptionHeader::from_json(&self.header)
    }
}

pub type PropertyExchangeResult = Result<PropertyExchangeResponse, ExchangeError>;

/// Chunks of one transaction received so far.
#[derive(Debug, Default)]
struct Reassembly {
    header: Vec<u8>,
    body: Vec<u8>,
    last_chunk: u16,
    total: Option<ChunkCount>,
}

impl Reassembly {
    fn add_chunk(&mut self, chunk: &PropertyChunk) -> Option<PropertyExchangeResult> {
        if !self.accepts(chunk) {
            tracing::warn!(
                "Request {} chunk {} of {:?} does not follow chunk {} of {:?}",
                chunk.request_id,
                chunk.this_chunk,
                chunk.total_chunks,
                self.last_chunk,
                self.total
            );
            return Some(Err(ExchangeError::InconsistentChunks));
        }
        self.last_chunk = chunk.this_chunk;
        self.total = Some(chunk.total_chunks);
        self.header.extend_from_slice(&chunk.header);
        self.body.extend_from_slice(&chunk.data);

        if chunk.this_chunk != 0 && !chunk.is_last() {
            return None;
        }
        if chunk.total_chunks.to_wire() != chunk.this_chunk {
            return Some(Err(ExchangeError::Partial));
        }
        Some(self.finish())
    }

    fn accepts(&self, chunk: &PropertyChunk) -> bool {
        if chunk.this_chunk != 0 && chunk.this_chunk != self.last_chunk.wrapping_add(1) {
            return false;
        }
        if let ChunkCount::Known(total) = chunk.total_chunks {
            if chunk.this_chunk > total {
                return false;
            }
        }
        match (self.total, chunk.total_chunks) {
            (None, _) => true,
            (Some(before), now) if before == now => true,
            // Streams learn their length on the last chunk
            (Some(ChunkCount::Unknown), ChunkCount::Known(_)) => chunk.is_last(),
            _ => false,
        }
    }

    fn finish(&mut self) -> PropertyExchangeResult {
        let header = encoding::json_from_7bit_text(&self.header).unwrap_or_else(|e| {
            tracing::warn!("Unreadable property exchange header: {}", e);
            Value::Null
        });

        if header.get("status").and_then(Value::as_i64) == Some(status::TOO_MANY_REQUESTS) {
            return Err(ExchangeError::TooManyTransactions);
        }

        let encoding = header
            .get("mutualEncoding")
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
            .unwrap_or(Encoding::Ascii);
        let body = encoding::decode(&self.body, encoding).unwrap_or_else(|e| {
            tracing::warn!("Could not decode {} property body: {}", encoding.as_str(), e);
            Vec::new()
        });

        Ok(PropertyExchangeResponse { header, body })
    }

    /// A notify message ends the transaction unless it only reports that a
    /// reply is pending.
    fn notify(header: &[u8]) -> Option<PropertyExchangeResult> {
        let header = encoding::json_from_7bit_text(header).ok()?;
        let code = header.as_object()?.get("status")?.as_i64()?;
        if code == status::NOTIFY_PENDING {
            return None;
        }
        Some(Err(ExchangeError::Notify))
    }
}

struct Slot<T> {
    key: u64,
    reassembly: Reassembly,
    context: T,
}

/// One remote device's transactions, indexed by request id.
///
/// Every transaction also gets a key that is never reused, so stale handles
/// cannot address a later transaction with the same request id.
pub struct ExchangeCache<T> {
    slots: Vec<Option<Slot<T>>>,
    keys: BTreeMap<u64, u8>,
    last_key: u64,
}

impl<T> Default for ExchangeCache<T> {
    fn default() -> Self {
        Self {
            slots: std::iter::repeat_with(|| None).take(NUM_REQUEST_IDS).collect(),
            keys: BTreeMap::new(),
            last_key: 0,
        }
    }
}

impl<T> ExchangeCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a transaction on `id`, replacing any transaction already
    /// using it.
    pub fn prime(&mut self, id: u8, context: T) -> u64 {
        let id = id & 0x7f;
        self.last_key += 1;
        let key = self.last_key;
        let slot = &mut self.slots[usize::from(id)];
        if let Some(old) = slot.take() {
            tracing::warn!("Request id {} reused while transaction {} was in flight", id, old.key);
            self.keys.remove(&old.key);
        }
        *slot = Some(Slot {
            key,
            reassembly: Reassembly::default(),
            context,
        });
        self.keys.insert(key, id);
        key
    }

    /// Drops a transaction, returning its context if it was still running.
    pub fn terminate(&mut self, key: u64) -> Option<T> {
        let id = self.keys.remove(&key)?;
        self.slots[usize::from(id)].take().map(|slot| slot.context)
    }

    /// Adds a chunk to the transaction on its request id. Returns the
    /// context and result once the transaction is over.
    pub fn add_chunk(&mut self, chunk: &PropertyChunk) -> Option<(T, PropertyExchangeResult)> {
        self.update(chunk.request_id, |r| r.add_chunk(chunk))
    }

    pub fn notify(&mut self, id: u8, header: &[u8]) -> Option<(T, PropertyExchangeResult)> {
        self.update(id, |_| Reassembly::notify(header))
    }

    fn update(
        &mut self,
        id: u8,
        f: impl FnOnce(&mut Reassembly) -> Option<PropertyExchangeResult>,
    ) -> Option<(T, PropertyExchangeResult)> {
        let slot = self.slots.get_mut(usize::from(id))?;
        let result = f(&mut slot.as_mut()?.reassembly)?;
        let done = slot.take()?;
        self.keys.remove(&done.key);
        Some((done.context, result))
    }

    pub fn key_for_id(&self, id: u8) -> Option<u64> {
        self.slots.get(usize::from(id))?.as_ref().map(|slot| slot.key)
    }

    pub fn id_for_key(&self, key: u64) -> Option<u8> {
        self.keys.get(&key).copied()
    }

    pub fn has_transaction(&self, id: u8) -> bool {
        self.key_for_id(id).is_some()
    }

    pub fn count_ongoing(&self) -> usize {
        self.keys.len()
    }

    pub fn ongoing_keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.keys.keys().copied()
    }

    /// Lowest free request id, unless `max_simultaneous` transactions are
    /// already running.
    pub fn find_unused_id(&self, max_simultaneous: u8) -> Option<u8> {
        if self.count_ongoing() >= usize::from(max_simultaneous) {
            return None;
        }
        self.slots.iter().position(Option::is_none).map(|i| i as u8)
    }
}

/// Transactions a remote device started with us.
#[derive(Default)]
pub struct ResponderExchangeCache {
    inner: ExchangeCache<()>,
}

impl ResponderExchangeCache {
    /// Makes room for a transaction on `id`. Chunks of a transaction that is
    /// already running keep going to it.
    pub fn prime(&mut self, id: u8, max_simultaneous: u8) -> Result<(), ExchangeError> {
        if self.inner.has_transaction(id) {
            return Ok(());
        }
        if self.inner.count_ongoing() >= usize::from(max_simultaneous) {
            return Err(ExchangeError::TooManyTransactions);
        }
        self.inner.prime(id, ());
        Ok(())
    }

    pub fn add_chunk(&mut self, chunk: &PropertyChunk) -> Option<PropertyExchangeResult> {
        self.inner.add_chunk(chunk).map(|(_, result)| result)
    }

    pub fn notify(&mut self, id: u8, header: &[u8]) -> Option<PropertyExchangeResult> {
        self.inner.notify(id, header).map(|(_, result)| result)
    }

    pub fn count_ongoing(&self) -> usize {
        self.inner.count_ongoing()
    }
}

/// Transactions we started with a remote device, each carrying a context
/// to hand back when the reply completes.
pub struct InitiatorExchangeCache<T> {
    inner: ExchangeCache<T>,
}

impl<T> Default for InitiatorExchangeCache<T> {
    fn default() -> Self {
        Self {
            inner: ExchangeCache::default(),
        }
    }
}

impl<T> InitiatorExchangeCache<T> {
    /// Allocates a request id, returning it with the transaction key.
    pub fn prime(&mut self, max_simultaneous: u8, context: T) -> Option<(u8, u64)> {
        let id = self.inner.find_unused_id(max_simultaneous)?;
        Some((id, self.inner.prime(id, context)))
    }

    pub fn terminate(&mut self, key: u64) -> Option<T> {
        self.inner.terminate(key)
    }

    pub fn add_chunk(&mut self, chunk: &PropertyChunk) -> Option<(T, PropertyExchangeResult)> {
        self.inner.add_chunk(chunk)
    }

    pub fn notify(&mut self, id: u8, header: &[u8]) -> Option<(T, PropertyExchangeResult)> {
        self.inner.notify(id, header)
    }

    pub fn id_for_key(&self, key: u64) -> Option<u8> {
        self.inner.id_for_key(key)
    }

    pub fn key_for_id(&self, id: u8) -> Option<u64> {
        self.inner.key_for_id(id)
    }

    pub fn ongoing_keys(&self) -> impl Iterator<Item = u64> + '_ {
        self.inner.ongoing_keys()
    }

    pub fn count_ongoing(&self) -> usize {
        self.inner.count_ongoing()
    }
}
