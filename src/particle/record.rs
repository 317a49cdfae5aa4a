//! Flat binary particle record used for migration and restart streams.
//!
//! A stream is a two-word header `[words per record, record count]`
//! followed by the records. All words are 8 bytes in native byte order, so a
//! record read back reproduces every field bit for bit.

use anyhow::Result;
use bytemuck::{Pod, Zeroable};

use crate::error::TrackingError;

/// Positional base fields followed by the particle payload.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ParticleRecord {
    pub cell: u64,
    pub position: [f64; 3],
    pub step_fraction: f64,
    /// Face the particle sits on, -1 when inside a cell. Processor
    /// migrations store the face index local to the processor patch.
    pub face: i64,
    /// Time owed from an earlier increment.
    pub carry: f64,
    pub diameter: f64,
    pub mass: f64,
    pub u: [f64; 3],
    pub move_u: [f64; 3],
    pub ensemble_u: [f64; 3],
    pub position_old: [f64; 3],
    pub u_old: [f64; 3],
    pub tag: i64,
    pub engine_rank: i64,
    pub kind: i64,
    pub density: f64,
    pub n0: u64,
    pub sum_delta_fb: [f64; 3],
}

/// Number of 8-byte words in one record.
pub const WORDS: usize = std::mem::size_of::<ParticleRecord>() / 8;

const HEADER_BYTES: usize = 16;

pub fn encode_records(records: &[ParticleRecord]) -> Vec<u8> {
    let header = [WORDS as u64, records.len() as u64];
    let mut bytes = Vec::with_capacity(HEADER_BYTES + std::mem::size_of_val(records));
    bytes.extend_from_slice(bytemuck::cast_slice(&header[..]));
    bytes.extend_from_slice(bytemuck::cast_slice(records));
    bytes
}

pub fn decode_records(bytes: &[u8]) -> Result<Vec<ParticleRecord>> {
    let mismatch = |msg: String| TrackingError::SerializationMismatch(msg);
    if bytes.len() < HEADER_BYTES {
        return Err(mismatch(format!("stream of {} bytes has no header", bytes.len())).into());
    }
    let words: u64 = bytemuck::pod_read_unaligned(&bytes[0..8]);
    let count: u64 = bytemuck::pod_read_unaligned(&bytes[8..16]);
    if words != WORDS as u64 {
        return Err(mismatch(format!(
            "writer used {words} words per record, reader expects {WORDS}"
        ))
        .into());
    }
    let size = std::mem::size_of::<ParticleRecord>();
    let body = &bytes[HEADER_BYTES..];
    if body.len() as u64 != count * size as u64 {
        return Err(mismatch(format!(
            "header announces {count} records but the body holds {} bytes",
            body.len()
        ))
        .into());
    }
    Ok(body
        .chunks_exact(size)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}
