use crate::protocol::{self, FixedPoint, RecordKind, HEADER_SIZE};

/// One decoded record. Lives only until its builders have run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawSample {
    pub kind: RecordKind,
    /// Payload elements in the representation given by `fixed_point()`.
    pub data: [i32; 3],
    /// Pedometer step flag from the tag.
    pub step: bool,
    pub timestamp: i64,
}

impl RawSample {
    pub fn fixed_point(&self) -> FixedPoint {
        self.kind.fixed_point()
    }
}

/// Once consumed bytes pass this mark they are dropped from the front.
const COMPACT_THRESHOLD: usize = 4096;

/// Reassembles records from arbitrarily split reads.
///
/// Bytes of a record that straddles a read boundary stay buffered until the
/// rest arrives. Unknown tags are skipped two bytes at a time until a known
/// tag lines up again; they never stop the stream.
#[derive(Debug, Default)]
pub struct RecordReader {
    buf: Vec<u8>,
    head: usize,
    resyncing: bool,
    skipped_bytes: u64,
    records: u64,
}

impl RecordReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
            ..Self::default()
        }
    }

    /// Append freshly read bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        if self.head == self.buf.len() {
            self.buf.clear();
            self.head = 0;
        } else if self.head >= COMPACT_THRESHOLD {
            self.buf.drain(..self.head);
            self.head = 0;
        }
        self.buf.extend_from_slice(bytes);
    }

    /// Extract the next complete record, or `None` when only a partial
    /// record (or nothing) is buffered.
    pub fn next_record(&mut self) -> Option<RawSample> {
        loop {
            let avail = &self.buf[self.head..];
            if avail.len() < HEADER_SIZE {
                return None;
            }
            let tag = u16::from_le_bytes([avail[0], avail[1]]);
            let (kind, step) = match RecordKind::from_tag(tag) {
                Some(k) => k,
                None => {
                    if !self.resyncing {
                        log::warn!("unknown record tag 0x{:04x}, resynchronising", tag);
                        self.resyncing = true;
                    }
                    self.head += HEADER_SIZE;
                    self.skipped_bytes += HEADER_SIZE as u64;
                    continue;
                }
            };
            if avail.len() < kind.record_len() {
                return None;
            }
            if self.resyncing {
                log::debug!("resynchronised after {} skipped bytes", self.skipped_bytes);
                self.resyncing = false;
            }

            let payload_end = HEADER_SIZE + kind.payload_len();
            let data = protocol::decode_payload(kind, &avail[HEADER_SIZE..payload_end]);
            let timestamp = protocol::decode_timestamp(&avail[payload_end..]);
            self.head += kind.record_len();
            self.records += 1;
            log::trace!("{:?} {:?} ts={}", kind, data, timestamp);
            return Some(RawSample {
                kind,
                data,
                step,
                timestamp,
            });
        }
    }

    /// Drain every complete record currently buffered.
    pub fn records(&mut self) -> impl Iterator<Item = RawSample> + '_ {
        std::iter::from_fn(move || self.next_record())
    }

    /// Bytes buffered but not yet consumed (a partial record).
    pub fn pending_bytes(&self) -> usize {
        self.buf.len() - self.head
    }

    /// Bytes discarded behind unknown tags since construction.
    pub fn skipped_bytes(&self) -> u64 {
        self.skipped_bytes
    }

    pub fn records_decoded(&self) -> u64 {
        self.records
    }

    /// Drop any buffered partial record, e.g. after the buffer was flushed.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.head = 0;
        self.resyncing = false;
    }
}
