//! Splits property-exchange payloads into bounded-size messages.
//!
//! Every chunk is a complete CI message:
//!
//! ```text
//! header (13) | request id (1) | header length (2) | header bytes (chunk 1 only)
//!             | total chunks (2) | this chunk (2) | body length (2) | body bytes
//! ```
//!
//! The fixed fields take 22 bytes, so each chunk has room for
//! `chunk_size - (header_for_chunk + 22)` body bytes.

use std::io::{self, Read};

use midi_ci_core::marshal::{Writer, MAX_U14};
use midi_ci_core::message::Header;
use midi_ci_core::{parser, ChannelInGroup, ChunkCount, Muid, IMPLEMENTATION_VERSION};

use crate::error::ChunkError;
use crate::output::BufferOutput;

/// Bytes in a chunk that are neither inquiry header nor body.
pub const CHUNK_OVERHEAD: usize = 22;

/// Chunk sizes above this are clamped so that every length fits its 14-bit field.
pub const MAX_CHUNK_SIZE: usize = 1 << 14;

/// A body to be split into chunks.
pub trait ChunkSource {
    /// Reads up to `buf.len()` bytes, returning how many were read.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Total body length, if known up front.
    fn total_len(&self) -> Option<usize>;

    /// True once every byte has been read.
    fn is_exhausted(&mut self) -> bool;
}

/// A body held in memory.
#[derive(Debug, Clone)]
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl ChunkSource for SliceSource<'_> {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        n
    }

    fn total_len(&self) -> Option<usize> {
        Some(self.data.len())
    }

    fn is_exhausted(&mut self) -> bool {
        self.pos == self.data.len()
    }
}

/// A body of unknown length read from any [`Read`].
///
/// Keeps one byte of look-ahead to tell when the reader is exhausted. Read
/// errors end the body early.
pub struct StreamSource<R> {
    reader: R,
    peeked: Option<u8>,
    done: bool,
}

impl<R: Read> StreamSource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            peeked: None,
            done: false,
        }
    }

    fn read_some(&mut self, buf: &mut [u8]) -> usize {
        loop {
            match self.reader.read(buf) {
                Ok(0) => {
                    self.done = true;
                    return 0;
                }
                Ok(n) => return n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::warn!("Property body read failed, truncating: {}", e);
                    self.done = true;
                    return 0;
                }
            }
        }
    }
}

impl<R: Read> ChunkSource for StreamSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let mut filled = 0;
        if let (Some(byte), Some(first)) = (self.peeked, buf.first_mut()) {
            *first = byte;
            self.peeked = None;
            filled = 1;
        }
        while filled < buf.len() && !self.done {
            filled += self.read_some(&mut buf[filled..]);
        }
        filled
    }

    fn total_len(&self) -> Option<usize> {
        None
    }

    fn is_exhausted(&mut self) -> bool {
        if self.peeked.is_some() {
            return false;
        }
        if self.done {
            return true;
        }
        let mut byte = [0u8];
        if self.read_some(&mut byte) == 1 {
            self.peeked = Some(byte[0]);
        }
        self.peeked.is_none()
    }
}

/// Fixed parameters of a chunk sequence.
#[derive(Debug, Clone, Copy)]
pub struct ChunkParams {
    pub chunk_size: usize,
    /// Sub-ID #2 of every chunk
    pub kind: u8,
    pub request_id: u8,
    pub source: Muid,
    pub destination: Muid,
}

/// Lazily produces the chunks of one property-exchange message.
///
/// Not restartable: the body source is consumed as chunks are produced.
pub struct PropertyChunker<S> {
    params: ChunkParams,
    header: Vec<u8>,
    body: S,
    storage: Vec<u8>,
    this_chunk: u16,
    total: ChunkCount,
    finished: bool,
}

impl<S: ChunkSource> PropertyChunker<S> {
    pub fn new(mut params: ChunkParams, header: Vec<u8>, mut body: S) -> Result<Self, ChunkError> {
        params.chunk_size = params.chunk_size.min(MAX_CHUNK_SIZE);

        let first_room = params
            .chunk_size
            .checked_sub(header.len() + CHUNK_OVERHEAD)
            .ok_or(ChunkError::HeaderTooLarge {
                chunk_size: params.chunk_size,
                header_len: header.len(),
            })?;
        if first_room == 0 && !body.is_exhausted() {
            return Err(ChunkError::HeaderTooLarge {
                chunk_size: params.chunk_size,
                header_len: header.len(),
            });
        }

        let total = match body.total_len() {
            Some(len) => {
                let rest_room = params.chunk_size - CHUNK_OVERHEAD;
                let chunks = if len <= first_room {
                    1
                } else {
                    1 + (len - first_room).div_ceil(rest_room)
                };
                match u16::try_from(chunks) {
                    Ok(n) if usize::from(n) <= MAX_U14 => ChunkCount::Known(n),
                    _ => return Err(ChunkError::TooManyChunks(chunks)),
                }
            }
            None => ChunkCount::Unknown,
        };

        Ok(Self {
            params,
            header,
            body,
            storage: Vec::with_capacity(params.chunk_size),
            this_chunk: 1,
            total,
            finished: false,
        })
    }

    /// Inquiry header bytes carried by the current chunk.
    fn header_for_chunk(&self) -> &[u8] {
        if self.this_chunk == 1 {
            &self.header
        } else {
            &[]
        }
    }

    fn room_for_body(&self) -> usize {
        self.params.chunk_size - (self.header_for_chunk().len() + CHUNK_OVERHEAD)
    }

    /// Writes the next chunk into the internal buffer and returns it, or
    /// `None` once the body has been fully emitted.
    pub fn next_chunk(&mut self) -> Option<&[u8]> {
        if self.finished {
            return None;
        }
        if usize::from(self.this_chunk) > MAX_U14 {
            tracing::warn!("Property body exceeds the chunk index range, truncating");
            self.finished = true;
            return None;
        }

        let room = self.room_for_body();
        let header_len = self.header_for_chunk().len();
        let fixed = Header::LEN + 1 + 2 + header_len;

        self.storage.clear();
        {
            let mut w = Writer::append_to(&mut self.storage);
            let header = Header {
                device_id: ChannelInGroup::WholeBlock,
                category: self.params.kind,
                version: IMPLEMENTATION_VERSION,
                source: self.params.source,
                destination: self.params.destination,
            };
            parser::write_header(&mut w, &header, self.params.kind);
            w.u7(self.params.request_id).u14(header_len as u16);
        }
        let header = if self.this_chunk == 1 { &self.header[..] } else { &[][..] };
        self.storage.extend_from_slice(header);
        // total, index and body length are patched after reading
        self.storage.resize(fixed + 6 + room, 0);

        let read = self.body.read(&mut self.storage[fixed + 6..]);
        self.storage.truncate(fixed + 6 + read);

        let last = self.body.is_exhausted();
        let total = if last {
            ChunkCount::Known(self.this_chunk)
        } else {
            self.total
        };

        let mut trailer = Vec::with_capacity(6);
        Writer::append_to(&mut trailer)
            .u14(total.to_wire())
            .u14(self.this_chunk)
            .u14(read as u16);
        self.storage[fixed..fixed + 6].copy_from_slice(&trailer);

        if last {
            self.finished = true;
        } else {
            self.this_chunk += 1;
        }
        Some(self.storage.as_slice())
    }
}

impl<S: ChunkSource> Iterator for PropertyChunker<S> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        self.next_chunk().map(<[u8]>::to_vec)
    }
}

/// Sends a body as a sequence of chunks on `group`. Returns the number of
/// chunks sent.
pub fn send_chunked<S: ChunkSource>(
    output: &mut dyn BufferOutput,
    group: u8,
    params: ChunkParams,
    header: Vec<u8>,
    body: S,
) -> Result<u16, ChunkError> {
    let mut chunker = PropertyChunker::new(params, header, body)?;
    let mut sent = 0;
    while let Some(chunk) = chunker.next_chunk() {
        output.send(group, chunk);
        sent += 1;
    }
    tracing::trace!(
        "Sent {:#04x} request {} in {} chunks",
        params.kind,
        params.request_id,
        sent
    );
    Ok(sent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use midi_ci_core::message::{category, Body};
    use proptest::prelude::*;

    const CHUNK_SIZE: usize = 64;

    fn params(chunk_size: usize) -> ChunkParams {
        ChunkParams {
            chunk_size,
            kind: category::PE_GET_DATA_RESPONSE,
            request_id: 7,
            source: Muid::new(0x10).unwrap(),
            destination: Muid::new(0x20).unwrap(),
        }
    }

    fn collect<S: ChunkSource>(header: &[u8], body: S) -> Vec<midi_ci_core::message::PropertyChunk> {
        PropertyChunker::new(params(CHUNK_SIZE), header.to_vec(), body)
            .unwrap()
            .map(|bytes| {
                assert!(bytes.len() <= CHUNK_SIZE);
                match parser::parse(&bytes).0.and_then(|p| p.body) {
                    Some(Body::PropertyGetDataResponse(chunk)) => chunk,
                    other => panic!("unexpected chunk {other:?}"),
                }
            })
            .collect()
    }

    fn body_of(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 128) as u8).collect()
    }

    #[test]
    fn test_empty_body_is_one_chunk() {
        let chunks = collect(b"{}", SliceSource::new(&[]));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].total_chunks, ChunkCount::Known(1));
        assert_eq!(chunks[0].this_chunk, 1);
        assert_eq!(chunks[0].header, b"{}");
        assert!(chunks[0].data.is_empty());
    }

    #[test]
    fn test_header_only_on_first_chunk() {
        let body = body_of(200);
        let chunks = collect(b"{\"status\":200}", SliceSource::new(&body));
        assert!(chunks.len() > 1);
        assert_eq!(chunks[0].header, b"{\"status\":200}");
        assert!(chunks[1..].iter().all(|c| c.header.is_empty()));

        let n = chunks.len() as u16;
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.this_chunk, i as u16 + 1);
            assert_eq!(chunk.total_chunks, ChunkCount::Known(n));
            assert_eq!(chunk.request_id, 7);
        }
    }

    #[test]
    fn test_header_too_large() {
        let header = vec![b' '; CHUNK_SIZE - CHUNK_OVERHEAD + 1];
        let err = PropertyChunker::new(params(CHUNK_SIZE), header, SliceSource::new(&[1]))
            .err()
            .unwrap();
        assert_eq!(
            err,
            ChunkError::HeaderTooLarge {
                chunk_size: CHUNK_SIZE,
                header_len: CHUNK_SIZE - CHUNK_OVERHEAD + 1
            }
        );

        // A header that exactly fills the chunk is fine when there is no body
        let header = vec![b' '; CHUNK_SIZE - CHUNK_OVERHEAD];
        assert!(PropertyChunker::new(params(CHUNK_SIZE), header.clone(), SliceSource::new(&[])).is_ok());
        assert!(PropertyChunker::new(params(CHUNK_SIZE), header, SliceSource::new(&[1])).is_err());
    }

    #[test]
    fn test_unknown_length_stream() {
        let body = body_of(150);
        let chunks = collect(b"", StreamSource::new(io::Cursor::new(body.clone())));
        let last = chunks.len() - 1;
        for chunk in &chunks[..last] {
            assert_eq!(chunk.total_chunks, ChunkCount::Unknown);
        }
        assert_eq!(chunks[last].total_chunks, ChunkCount::Known(chunks.len() as u16));
        let joined: Vec<u8> = chunks.iter().flat_map(|c| c.data.clone()).collect();
        assert_eq!(joined, body);
    }

    #[test]
    fn test_stream_boundary_exactly_full() {
        // Body fills the first chunk exactly; look-ahead must still end the sequence there
        let room = CHUNK_SIZE - CHUNK_OVERHEAD;
        let chunks = collect(b"", StreamSource::new(io::Cursor::new(body_of(room))));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].total_chunks, ChunkCount::Known(1));
    }

    #[test]
    fn test_send_chunked_counts() {
        let mut out = crate::output::CollectingOutput::new(Muid::new(0x10).unwrap());
        let body = body_of(100);
        let sent = send_chunked(&mut out, 2, params(CHUNK_SIZE), Vec::new(), SliceSource::new(&body))
            .unwrap();
        assert_eq!(usize::from(sent), out.sent.len());
        assert!(out.sent.iter().all(|(group, _)| *group == 2));
    }

    proptest! {
        #[test]
        fn prop_round_trip_and_counts(pick in 0usize..6, header_len in 0usize..10) {
            let room = CHUNK_SIZE - CHUNK_OVERHEAD;
            let len = [0, 1, room - 1, room, room + 1, 10 * room][pick];
            let body = body_of(len);
            let header = vec![b'h'; header_len];
            let chunks = collect(&header, SliceSource::new(&body));

            let joined: Vec<u8> = chunks.iter().flat_map(|c| c.data.clone()).collect();
            prop_assert_eq!(&joined, &body);

            let n = chunks.len() as u16;
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.this_chunk, i as u16 + 1);
                prop_assert_eq!(chunk.total_chunks, ChunkCount::Known(n));
            }
            if header_len == 0 && len > 0 {
                prop_assert_eq!(usize::from(n), len.div_ceil(room));
            }
        }
    }
}
