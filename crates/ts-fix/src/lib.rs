//! Streaming MPEG-TS timestamp rewriter.
//!
//! Concatenated segments from a live HLS source carry per-segment PCR/PTS
//! values that are only meaningful within a segment. [`TsFixer`] rewrites a
//! packet stream so that the first observed PCR and the first observed PTS
//! both land on a caller-chosen start time, with every later timestamp
//! shifted by the same per-kind offset. PCRs and PTSs get independent
//! offsets: real streams exhibit differing initial offsets for each kind,
//! and the rewritten stream must begin its actual content at the requested
//! time.

pub mod error;
pub mod timestamp;

use bytes::{Bytes, BytesMut};

pub use error::TsFixError;
use timestamp::{PTS_TAG, decode_pcr, decode_ts, encode_pcr, encode_ts};

/// Result type for TS rewriting operations
pub type Result<T> = std::result::Result<T, TsFixError>;

/// Transport stream packet size in bytes.
pub const PACKET_SIZE: usize = 188;

// The reported end time is padded to the time of the next expected frame, or
// the last frame here would overlap the first frame of whatever follows. The
// true frame rate isn't knowable from PCR times alone (dropped frames throw
// it off), so assume 30fps and add 33ms. Consistent and predictable beats
// exact.
const NOMINAL_PCR_INTERVAL: f64 = 0.033;

#[derive(Clone, Copy)]
enum TimestampKind {
    Pcr,
    Pts,
}

/// Rewrites timestamps in an MPEG-TS byte stream.
///
/// Feed arbitrary chunks with [`feed`](Self::feed); whole 188-byte packets
/// are rewritten and returned, the remainder is buffered. Call
/// [`end`](Self::end) once the stream is exhausted to assert no partial
/// packet remains and obtain the final end time (start time + video
/// duration). All timestamps are seconds.
pub struct TsFixer {
    start_time: f64,
    end_time: f64,
    pcr_offset: Option<f64>,
    pts_offset: Option<f64>,
    buffer: BytesMut,
}

impl TsFixer {
    pub fn new(start_time: f64) -> Self {
        Self {
            start_time,
            // The first PCR is by definition rewritten to start_time, so this
            // is a safe "latest" value: a stream with no PCR frames at all
            // ends at its start time.
            end_time: start_time,
            pcr_offset: None,
            pts_offset: None,
            buffer: BytesMut::new(),
        }
    }

    /// Buffer more stream data, returning the rewritten bytes of every whole
    /// packet now available.
    pub fn feed(&mut self, data: &[u8]) -> Result<Bytes> {
        self.buffer.extend_from_slice(data);
        let mut output = BytesMut::with_capacity(self.buffer.len() - self.buffer.len() % PACKET_SIZE);
        while self.buffer.len() >= PACKET_SIZE {
            let mut packet = self.buffer.split_to(PACKET_SIZE);
            self.fix_packet(&mut packet)?;
            output.unsplit(packet);
        }
        Ok(output.freeze())
    }

    /// Finish the stream: assert no partial packet is buffered and return the
    /// final end time.
    pub fn end(self) -> Result<f64> {
        if !self.buffer.is_empty() {
            return Err(TsFixError::TruncatedPacket(self.buffer.len()));
        }
        Ok(self.end_time)
    }

    /// Convert one timestamp, calibrating this kind's offset on first sight.
    fn convert_time(&mut self, old_time: f64, kind: TimestampKind) -> f64 {
        let offset = match kind {
            TimestampKind::Pcr => &mut self.pcr_offset,
            TimestampKind::Pts => &mut self.pts_offset,
        };
        let offset = *offset.get_or_insert(self.start_time - old_time);
        // The second packet of a kind may land slightly earlier than the
        // first (eg. audio vs video start times differ). Clamp so nothing
        // ever precedes the requested start; minor artifacting on the first
        // packet beats emitting invalid timestamps.
        let new_time = (old_time + offset).max(self.start_time);
        self.end_time = self.end_time.max(new_time + NOMINAL_PCR_INTERVAL);
        new_time
    }

    /// Rewrite one 188-byte packet in place.
    ///
    /// Parses just far enough to find the PCR (in the adaptation field) and
    /// the PTS (in a PES header at a payload unit start), and re-encodes
    /// them shifted onto the unified timeline.
    fn fix_packet(&mut self, packet: &mut [u8]) -> Result<()> {
        debug_assert_eq!(packet.len(), PACKET_SIZE);

        // 4 byte header: "G" | TEI(1) PUSI(1) PRI(1) PID(5) | PID(8) | TSC(2) AFC(2) CC(4)
        if packet[0] != 0x47 {
            return Err(TsFixError::BadSyncByte(packet[0]));
        }
        if packet[1] & 0x80 != 0 {
            return Err(TsFixError::TransportError);
        }
        let pusi = packet[1] & 0x40 != 0;
        if packet[3] & 0xc0 != 0 {
            return Err(TsFixError::Scrambled);
        }
        let has_adaptation_field = packet[3] & 0x20 != 0;
        let has_payload = packet[3] & 0x10 != 0;

        let payload_index = if has_adaptation_field {
            let field_length = packet[4] as usize;
            // A zero-length adaptation field is seen in the wild; treat it
            // as not present.
            if field_length > 0 {
                // The PCR is the first optional section when present, so the
                // other flag bits don't matter here.
                let has_pcr = packet[5] & 0x10 != 0;
                if has_pcr {
                    if field_length < 7 {
                        return Err(TsFixError::AdaptationFieldTooSmall);
                    }
                    let raw: &[u8; 6] = packet[6..12].try_into().expect("6 bytes");
                    let new_time = self.convert_time(decode_pcr(raw), TimestampKind::Pcr);
                    packet[6..12].copy_from_slice(&encode_pcr(new_time));
                }
            }
            5 + field_length
        } else {
            4
        };

        if pusi {
            if !has_payload {
                return Err(TsFixError::PusiWithoutPayload);
            }
            if payload_index >= PACKET_SIZE {
                return Err(TsFixError::UnitHeaderTooSmall);
            }
            let payload_pointer = packet[payload_index] as usize;
            let unit_index = payload_index + 1 + payload_pointer;
            // Elementary streams begin with an 0x0001 prefix past the
            // pointer byte; program tables don't. Only elementary stream
            // unit headers carry timestamps.
            if packet.get(unit_index..unit_index + 2) == Some(&[0x00, 0x01]) {
                // unit header: 00, 01, stream id, length(2), then PES flags.
                // The PTS/DTS indicator bits live in the second flags byte.
                if unit_index + 6 >= PACKET_SIZE {
                    return Err(TsFixError::UnitHeaderTooSmall);
                }
                let flags = packet[unit_index + 6];
                let has_pts = flags & 0x80 != 0;
                let has_dts = flags & 0x40 != 0;
                if has_dts {
                    return Err(TsFixError::DtsNotSupported);
                }
                // PTS is the first optional field, no need to look further.
                if has_pts {
                    let pts_index = unit_index + 8;
                    if pts_index + 5 > PACKET_SIZE {
                        return Err(TsFixError::PtsTooSmall);
                    }
                    let raw: &[u8; 5] = packet[pts_index..pts_index + 5].try_into().expect("5 bytes");
                    let pts = decode_ts(raw, PTS_TAG)?;
                    let new_time = self.convert_time(pts, TimestampKind::Pts);
                    packet[pts_index..pts_index + 5].copy_from_slice(&encode_ts(new_time, PTS_TAG));
                }
            }
        }

        Ok(())
    }
}
