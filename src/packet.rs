//! Decoding of the three-part reply sent by the DAS producer
//!
//! ```text
//! part 0  header      i32 set_count | f64 timestamp            packed, 12 bytes
//! part 1  attributes  f64 x 6 | i32 x 7                       native alignment
//! part 2  payload     f32 x (time_points * space_points)      row-major
//! ```
//!
//! Everything is in the host's byte order. The header is packed while the attribute
//! block follows native struct alignment, so the two parts are laid out by different
//! rules even though they carry the same primitive types.

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::{
    error::{Error, Result},
    matrix::Matrix,
};

/// Byte size of the packed header
pub const HEADER_SIZE: usize = 12;
/// Field layout of the attribute block, in wire order
const ATTRIBUTE_FIELDS: [Field; 13] = [
    Field::F64,
    Field::F64,
    Field::F64,
    Field::F64,
    Field::F64,
    Field::F64,
    Field::I32,
    Field::I32,
    Field::I32,
    Field::I32,
    Field::I32,
    Field::I32,
    Field::I32,
];
/// Byte size of the aligned attribute block
pub const ATTRIBUTES_SIZE: usize = aligned_size(&ATTRIBUTE_FIELDS);

#[derive(Clone, Copy)]
enum Field {
    I32,
    F64,
}

impl Field {
    const fn size(self) -> usize {
        match self {
            Field::I32 => 4,
            Field::F64 => 8,
        }
    }
}

/// Size of a field sequence where each field starts on a multiple of its own size.
/// No trailing padding is added after the last field.
const fn aligned_size(fields: &[Field]) -> usize {
    let mut offset: usize = 0;
    let mut i = 0;
    while i < fields.len() {
        let size = fields[i].size();
        offset = offset.div_ceil(size) * size + size;
        i += 1;
    }
    offset
}

/// Sequential native-endian reader over one message part
struct Cursor<'a> {
    buf: &'a [u8],
    offset: usize,
    aligned: bool,
}

impl<'a> Cursor<'a> {
    fn packed(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            aligned: false,
        }
    }

    fn aligned(buf: &'a [u8]) -> Self {
        Self {
            buf,
            offset: 0,
            aligned: true,
        }
    }

    fn take<const N: usize>(&mut self) -> [u8; N] {
        if self.aligned {
            self.offset = self.offset.div_ceil(N) * N;
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.buf[self.offset..self.offset + N]);
        self.offset += N;
        bytes
    }

    fn i32(&mut self) -> i32 {
        i32::from_ne_bytes(self.take())
    }

    fn f64(&mut self) -> f64 {
        f64::from_ne_bytes(self.take())
    }
}

/// Writer counterpart of [`Cursor`]
struct Sink {
    buf: Vec<u8>,
    aligned: bool,
}

impl Sink {
    fn put<const N: usize>(&mut self, bytes: [u8; N]) {
        if self.aligned {
            let padded = self.buf.len().div_ceil(N) * N;
            self.buf.resize(padded, 0);
        }
        self.buf.extend_from_slice(&bytes);
    }
}

/// One acquisition window as delivered by the producer
#[derive(Clone, Debug, PartialEq)]
pub struct Packet {
    pub set_count: i32,
    /// UNIX epoch seconds
    pub timestamp: f64,
    /// `[distance_step_m, time_step_ms, reserved]`
    pub spacing: [f64; 3],
    pub origin: [f64; 3],
    /// `[space_start, space_end, _, time_end, _, _]`
    pub index: [i32; 6],
    pub unit_size: i32,
    /// Shape `(time_points, space_points)` when `decoded`
    pub samples: Matrix,
    pub decoded: bool,
}

impl Packet {
    pub fn space_points(&self) -> usize {
        points(self.index[1])
    }

    pub fn time_points(&self) -> usize {
        points(self.index[3])
    }

    /// Sample spacing in meters
    pub fn dx(&self) -> f64 {
        self.spacing[0]
    }

    /// Sample period in seconds (the wire carries milliseconds)
    pub fn dt(&self) -> f64 {
        self.spacing[1] / 1000.0
    }

    /// Native sampling rate, truncated to whole samples per second
    pub fn native_sps(&self) -> u32 {
        (1.0 / self.dt()) as u32
    }

    /// Acquisition time as a UTC datetime
    pub fn time(&self) -> Option<DateTime<Utc>> {
        utc(self.timestamp)
    }
}

fn points(end: i32) -> usize {
    usize::try_from(end.saturating_add(1)).unwrap_or(0)
}

/// Convert fractional UNIX seconds into a UTC datetime
pub fn utc(timestamp: f64) -> Option<DateTime<Utc>> {
    if !timestamp.is_finite() {
        return None;
    }
    let secs = timestamp.floor();
    let nanos = ((timestamp - secs) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(secs as i64, nanos)
}

/// Decode a producer reply.
///
/// A malformed header or attribute block is a hard [`Error::Protocol`]. A payload that
/// does not match the declared shape is logged and reported through `decoded = false`.
pub fn decode<B: AsRef<[u8]>>(parts: &[B]) -> Result<Packet> {
    if parts.len() < 3 {
        return Err(Error::Protocol(format!(
            "expected 3 message parts, got {}",
            parts.len()
        )));
    }
    let (header, attributes, payload) = (parts[0].as_ref(), parts[1].as_ref(), parts[2].as_ref());
    if header.len() != HEADER_SIZE {
        return Err(Error::Protocol(format!(
            "header is {} bytes, expected {HEADER_SIZE}",
            header.len()
        )));
    }
    if attributes.len() != ATTRIBUTES_SIZE {
        return Err(Error::Protocol(format!(
            "attribute block is {} bytes, expected {ATTRIBUTES_SIZE}",
            attributes.len()
        )));
    }

    let mut cur = Cursor::packed(header);
    let set_count = cur.i32();
    let timestamp = cur.f64();

    let mut cur = Cursor::aligned(attributes);
    let spacing = [cur.f64(), cur.f64(), cur.f64()];
    let origin = [cur.f64(), cur.f64(), cur.f64()];
    let mut index = [0i32; 6];
    for v in index.iter_mut() {
        *v = cur.i32();
    }
    let unit_size = cur.i32();

    let mut packet = Packet {
        set_count,
        timestamp,
        spacing,
        origin,
        index,
        unit_size,
        samples: Matrix::default(),
        decoded: false,
    };

    match unpack_samples(payload, packet.time_points(), packet.space_points()) {
        Ok(samples) => {
            packet.samples = samples;
            packet.decoded = true;
            debug!(
                points = packet.samples.as_slice().len(),
                time = ?packet.time(),
                timestamp,
                "Received packet"
            );
        }
        Err(e) => error!(timestamp, "Data matrix and shape info mismatched: {}", e),
    }
    Ok(packet)
}

fn unpack_samples(payload: &[u8], time_points: usize, space_points: usize) -> Result<Matrix> {
    let mismatch = Error::ShapeMismatch {
        floats: payload.len() / 4,
        time_points,
        space_points,
    };
    if payload.len() % 4 != 0 || time_points == 0 {
        return Err(mismatch);
    }
    // Reply buffers carry no alignment guarantee, so copy out word by word
    let data: Vec<f32> = payload
        .chunks_exact(4)
        .map(|w| f32::from_ne_bytes([w[0], w[1], w[2], w[3]]))
        .collect();
    Matrix::from_vec(time_points, space_points, data).ok_or(mismatch)
}

/// Inverse of [`decode`]: lay a packet out as the producer would send it
pub fn encode(packet: &Packet) -> [Vec<u8>; 3] {
    let mut header = Sink {
        buf: Vec::with_capacity(HEADER_SIZE),
        aligned: false,
    };
    header.put(packet.set_count.to_ne_bytes());
    header.put(packet.timestamp.to_ne_bytes());

    let mut attributes = Sink {
        buf: Vec::with_capacity(ATTRIBUTES_SIZE),
        aligned: true,
    };
    for v in packet.spacing.iter().chain(packet.origin.iter()) {
        attributes.put(v.to_ne_bytes());
    }
    for v in packet.index.iter().chain(std::iter::once(&packet.unit_size)) {
        attributes.put(v.to_ne_bytes());
    }

    let payload = packet
        .samples
        .as_slice()
        .iter()
        .flat_map(|v| v.to_ne_bytes())
        .collect();
    [header.buf, attributes.buf, payload]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn attributes(spacing: [f64; 3], origin: [f64; 3], index: [i32; 6], unit_size: i32) -> Vec<u8> {
        let mut buf = Vec::new();
        for v in spacing.iter().chain(origin.iter()) {
            buf.extend_from_slice(&v.to_ne_bytes());
        }
        for v in index.iter().chain(std::iter::once(&unit_size)) {
            buf.extend_from_slice(&v.to_ne_bytes());
        }
        buf
    }

    fn header(set_count: i32, timestamp: f64) -> Vec<u8> {
        let mut buf = set_count.to_ne_bytes().to_vec();
        buf.extend_from_slice(&timestamp.to_ne_bytes());
        buf
    }

    #[test]
    fn test_layout_sizes() {
        assert_eq!(HEADER_SIZE, 12);
        assert_eq!(ATTRIBUTES_SIZE, 76);
        // An i32 ahead of an f64 gets padded when aligned
        assert_eq!(aligned_size(&[Field::I32, Field::F64]), 16);
    }

    #[test]
    fn test_reference_packet() {
        let payload = vec![0u8; 1600 * 3334 * 4];
        let parts = [
            header(7, 1690449193.04),
            attributes([4.8, 2.5, 1.0], [0.0; 3], [0, 3333, 0, 1599, 0, 0], 4),
            payload,
        ];
        let packet = decode(&parts).unwrap();
        assert_eq!(packet.set_count, 7);
        assert_eq!(packet.timestamp, 1690449193.04);
        assert!(packet.decoded);
        assert_eq!(packet.time_points(), 1600);
        assert_eq!(packet.space_points(), 3334);
        assert_eq!(packet.samples.shape(), (1600, 3334));
        assert!((packet.dt() - 0.0025).abs() < 1e-12);
        assert_eq!(packet.native_sps(), 400);
        assert_eq!(packet.unit_size, 4);
    }

    #[test]
    fn test_too_few_parts() {
        let parts = [header(1, 1.0), attributes([1.0; 3], [0.0; 3], [0; 6], 4)];
        assert!(matches!(decode(&parts), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_bad_header() {
        // Native alignment would pad the header to 16 bytes, which we must reject
        let mut padded = 1i32.to_ne_bytes().to_vec();
        padded.extend_from_slice(&[0u8; 4]);
        padded.extend_from_slice(&1.0f64.to_ne_bytes());
        let parts = [padded, attributes([1.0; 3], [0.0; 3], [0; 6], 4), vec![0u8; 4]];
        assert!(matches!(decode(&parts), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_shape_mismatch_is_not_an_error() {
        let parts = [
            header(1, 12.5),
            attributes([1.0, 1.0, 1.0], [0.0; 3], [0, 3, 0, 4, 0, 0], 4),
            vec![0u8; 4 * 19],
        ];
        let packet = decode(&parts).unwrap();
        assert!(!packet.decoded);
        assert_eq!(packet.timestamp, 12.5);
    }

    #[test]
    fn test_ragged_payload() {
        let parts = [
            header(1, 12.5),
            attributes([1.0, 1.0, 1.0], [0.0; 3], [0, 0, 0, 0, 0, 0], 4),
            vec![0u8; 5],
        ];
        assert!(!decode(&parts).unwrap().decoded);
    }

    #[test]
    fn test_utc() {
        let t = utc(1690449193.5).unwrap();
        assert_eq!(t.format("%Y%m%d %H:%M:%S%.3f").to_string(), "20230727 09:13:13.500");
        assert!(utc(f64::NAN).is_none());
    }

    proptest! {
        #[test]
        fn metadata_survives_reencoding(
            set_count in any::<i32>(),
            timestamp in 0f64..4e9,
            spacing in prop::array::uniform3(0.001f64..100.0),
            origin in prop::array::uniform3(-1e3f64..1e3),
            rows in 1i32..8,
            cols in 1i32..8,
            unit_size in any::<i32>(),
        ) {
            let index = [0, cols - 1, 0, rows - 1, 0, 0];
            let samples = Matrix::zeros(rows as usize, cols as usize);
            let packet = Packet {
                set_count, timestamp, spacing, origin, index, unit_size, samples, decoded: true,
            };
            let decoded = decode(&encode(&packet)).unwrap();
            prop_assert_eq!(decoded, packet);
        }
    }
}
