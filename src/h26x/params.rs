// SPDX-License-Identifier: GPL-2.0-or-later

//! Parameter-set cache and id patcher.
//!
//! Renumbers SPS/PPS ids densely from 0 in insertion order, collapsing
//! byte-identical (after id normalization) parameter sets so that streams
//! fed through this adapter from sources with colliding or sparse ids still
//! produce a decodable, compact `avcC`/`hvcC`.

use std::collections::HashMap;

use thiserror::Error;

use crate::bits::{BitReader, BitWriter};
use crate::nal::{emit_emulation_prevention, strip_emulation_prevention};

const MAX_SPS: usize = 32;
const MAX_PPS: usize = 256;

#[derive(Debug, Error)]
pub enum H26xError {
    #[error("malformed NAL unit: fewer readable bits than the header requires")]
    Malformed,

    #[error("too many distinct SPS (limit {MAX_SPS})")]
    TooManySps,

    #[error("too many distinct PPS (limit {MAX_PPS})")]
    TooManyPps,

    #[error("PPS references SPS id {0} before it was installed")]
    UnknownSpsRef(u32),

    #[error("slice references PPS id {0} before it was installed")]
    UnknownPpsRef(u32),

    #[error("bad arguments: {0}")]
    BadArguments(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Avc,
    Hevc,
}

/// Number of significant bits in `rbsp`: the position just past the last
/// set bit (the `rbsp_stop_one_bit`). Trailing zero bits are not counted.
fn significant_bits(rbsp: &[u8]) -> usize {
    let mut total = rbsp.len() * 8;
    while total > 0 {
        let idx = total - 1;
        let byte = rbsp[idx / 8];
        let bit = (byte >> (7 - (idx % 8))) & 1;
        if bit == 1 {
            return total;
        }
        total -= 1;
    }
    0
}

fn copy_bits_value(r: &mut BitReader<'_>, w: &mut BitWriter, n: u32) -> Result<u32, H26xError> {
    let v = r.read_bits(n).map_err(|_| H26xError::Malformed)?;
    w.write_bits(n, v);
    Ok(v)
}

fn copy_bits(r: &mut BitReader<'_>, w: &mut BitWriter, n: u32) -> Result<(), H26xError> {
    copy_bits_value(r, w, n).map(|_| ())
}

fn copy_ue(r: &mut BitReader<'_>, w: &mut BitWriter) -> Result<u32, H26xError> {
    let v = r.read_ue().map_err(|_| H26xError::Malformed)?;
    w.write_ue(v);
    Ok(v)
}

fn copy_remaining(r: &mut BitReader<'_>, w: &mut BitWriter, end_bit: usize) -> Result<(), H26xError> {
    while r.bit_position() < end_bit {
        copy_bits(r, w, 1)?;
    }
    Ok(())
}

/// `profile_tier_level(profilePresentFlag=1, maxNumSubLayersMinus1)` per the
/// HEVC bitstream syntax. Copied bit-for-bit; values are never interpreted.
fn copy_profile_tier_level(
    r: &mut BitReader<'_>,
    w: &mut BitWriter,
    max_sub_layers_minus1: u32,
) -> Result<(), H26xError> {
    copy_bits(r, w, 88)?; // general profile/tier/idc, compatibility and constraint flags
    copy_bits(r, w, 8)?; // general_level_idc

    let mut profile_present = Vec::with_capacity(max_sub_layers_minus1 as usize);
    let mut level_present = Vec::with_capacity(max_sub_layers_minus1 as usize);
    for _ in 0..max_sub_layers_minus1 {
        profile_present.push(copy_bits_value(r, w, 1)? == 1);
        level_present.push(copy_bits_value(r, w, 1)? == 1);
    }
    if max_sub_layers_minus1 > 0 {
        for _ in max_sub_layers_minus1..8 {
            copy_bits(r, w, 2)?;
        }
    }
    for i in 0..max_sub_layers_minus1 as usize {
        if profile_present[i] {
            copy_bits(r, w, 88)?;
        }
        if level_present[i] {
            copy_bits(r, w, 8)?;
        }
    }
    Ok(())
}

fn skip_profile_tier_level(r: &mut BitReader<'_>, max_sub_layers_minus1: u32) -> Result<(), H26xError> {
    let mut sink = BitWriter::new();
    copy_profile_tier_level(r, &mut sink, max_sub_layers_minus1)
}

fn avc_rewrite_sps_id(nal: &[u8], new_id: u32) -> Result<Vec<u8>, H26xError> {
    let rbsp = strip_emulation_prevention(nal);
    let sig_bits = significant_bits(&rbsp);
    if sig_bits < 32 {
        return Err(H26xError::Malformed);
    }
    let mut r = BitReader::new(&rbsp);
    let mut w = BitWriter::new();
    copy_bits(&mut r, &mut w, 32)?; // nal header + profile_idc + constraint flags + level_idc
    r.read_ue().map_err(|_| H26xError::Malformed)?;
    w.write_ue(new_id);
    copy_remaining(&mut r, &mut w, sig_bits)?;
    Ok(emit_emulation_prevention(&w.finish(), false))
}

fn hevc_rewrite_sps_id(nal: &[u8], new_id: u32) -> Result<Vec<u8>, H26xError> {
    let rbsp = strip_emulation_prevention(nal);
    let sig_bits = significant_bits(&rbsp);
    if sig_bits < 24 {
        return Err(H26xError::Malformed);
    }
    let mut r = BitReader::new(&rbsp);
    let mut w = BitWriter::new();
    copy_bits(&mut r, &mut w, 16)?; // nal header
    copy_bits(&mut r, &mut w, 4)?; // sps_video_parameter_set_id
    let max_sub_layers_minus1 = copy_bits_value(&mut r, &mut w, 3)?; // sps_max_sub_layers_minus1
    copy_bits(&mut r, &mut w, 1)?; // sps_temporal_id_nesting_flag
    copy_profile_tier_level(&mut r, &mut w, max_sub_layers_minus1)?;
    r.read_ue().map_err(|_| H26xError::Malformed)?;
    w.write_ue(new_id);
    copy_remaining(&mut r, &mut w, sig_bits)?;
    Ok(emit_emulation_prevention(&w.finish(), false))
}

fn rewrite_two_ids(nal: &[u8], header_bits: u32, new_first: u32, new_second: u32) -> Result<Vec<u8>, H26xError> {
    let rbsp = strip_emulation_prevention(nal);
    let sig_bits = significant_bits(&rbsp);
    if sig_bits < header_bits as usize {
        return Err(H26xError::Malformed);
    }
    let mut r = BitReader::new(&rbsp);
    let mut w = BitWriter::new();
    copy_bits(&mut r, &mut w, header_bits)?;
    r.read_ue().map_err(|_| H26xError::Malformed)?;
    w.write_ue(new_first);
    r.read_ue().map_err(|_| H26xError::Malformed)?;
    w.write_ue(new_second);
    copy_remaining(&mut r, &mut w, sig_bits)?;
    Ok(emit_emulation_prevention(&w.finish(), false))
}

fn avc_rewrite_slice_pps_id(nal: &[u8], new_pps_id: u32) -> Result<Vec<u8>, H26xError> {
    let rbsp = strip_emulation_prevention(nal);
    let sig_bits = significant_bits(&rbsp);
    if sig_bits < 8 {
        return Err(H26xError::Malformed);
    }
    let mut r = BitReader::new(&rbsp);
    let mut w = BitWriter::new();
    copy_bits(&mut r, &mut w, 8)?;
    copy_ue(&mut r, &mut w)?; // first_mb_in_slice
    copy_ue(&mut r, &mut w)?; // slice_type
    r.read_ue().map_err(|_| H26xError::Malformed)?;
    w.write_ue(new_pps_id);
    copy_remaining(&mut r, &mut w, sig_bits)?;
    Ok(emit_emulation_prevention(&w.finish(), false))
}

fn hevc_rewrite_slice_pps_id(nal: &[u8], new_pps_id: u32) -> Result<Vec<u8>, H26xError> {
    if nal.is_empty() {
        return Err(H26xError::Malformed);
    }
    let nal_unit_type = (nal[0] >> 1) & 0x3F;
    let rbsp = strip_emulation_prevention(nal);
    let sig_bits = significant_bits(&rbsp);
    if sig_bits < 17 {
        return Err(H26xError::Malformed);
    }
    let mut r = BitReader::new(&rbsp);
    let mut w = BitWriter::new();
    copy_bits(&mut r, &mut w, 16)?; // nal header
    copy_bits(&mut r, &mut w, 1)?; // first_slice_segment_in_pic_flag
    if (16..=23).contains(&nal_unit_type) {
        copy_bits(&mut r, &mut w, 1)?; // no_output_of_prior_pics_flag
    }
    r.read_ue().map_err(|_| H26xError::Malformed)?;
    w.write_ue(new_pps_id);
    copy_remaining(&mut r, &mut w, sig_bits)?;
    Ok(emit_emulation_prevention(&w.finish(), false))
}

fn rewrite_sps_id(codec: Codec, nal: &[u8], new_id: u32) -> Result<Vec<u8>, H26xError> {
    match codec {
        Codec::Avc => avc_rewrite_sps_id(nal, new_id),
        Codec::Hevc => hevc_rewrite_sps_id(nal, new_id),
    }
}

fn rewrite_pps_ids(codec: Codec, nal: &[u8], new_pps_id: u32, new_sps_id: u32) -> Result<Vec<u8>, H26xError> {
    let header_bits = match codec {
        Codec::Avc => 8,
        Codec::Hevc => 16,
    };
    rewrite_two_ids(nal, header_bits, new_pps_id, new_sps_id)
}

fn rewrite_slice_pps_id(codec: Codec, nal: &[u8], new_pps_id: u32) -> Result<Vec<u8>, H26xError> {
    match codec {
        Codec::Avc => avc_rewrite_slice_pps_id(nal, new_pps_id),
        Codec::Hevc => hevc_rewrite_slice_pps_id(nal, new_pps_id),
    }
}

fn parse_sps_id(codec: Codec, nal: &[u8]) -> Result<u32, H26xError> {
    let rbsp = strip_emulation_prevention(nal);
    let mut r = BitReader::new(&rbsp);
    match codec {
        Codec::Avc => {
            r.skip_bits(32).map_err(|_| H26xError::Malformed)?;
        }
        Codec::Hevc => {
            r.skip_bits(16).map_err(|_| H26xError::Malformed)?;
            r.skip_bits(4).map_err(|_| H26xError::Malformed)?;
            let max_sub_layers_minus1 = r.read_bits(3).map_err(|_| H26xError::Malformed)?;
            r.skip_bits(1).map_err(|_| H26xError::Malformed)?;
            skip_profile_tier_level(&mut r, max_sub_layers_minus1)?;
        }
    }
    r.read_ue().map_err(|_| H26xError::Malformed)
}

fn parse_pps_ids(codec: Codec, nal: &[u8]) -> Result<(u32, u32), H26xError> {
    let rbsp = strip_emulation_prevention(nal);
    let mut r = BitReader::new(&rbsp);
    let header_bits = match codec {
        Codec::Avc => 8,
        Codec::Hevc => 16,
    };
    r.skip_bits(header_bits).map_err(|_| H26xError::Malformed)?;
    let pps_id = r.read_ue().map_err(|_| H26xError::Malformed)?;
    let sps_id = r.read_ue().map_err(|_| H26xError::Malformed)?;
    Ok((pps_id, sps_id))
}

fn parse_slice_pps_id(codec: Codec, nal: &[u8]) -> Result<u32, H26xError> {
    match codec {
        Codec::Avc => {
            let rbsp = strip_emulation_prevention(nal);
            let mut r = BitReader::new(&rbsp);
            r.skip_bits(8).map_err(|_| H26xError::Malformed)?;
            r.read_ue().map_err(|_| H26xError::Malformed)?; // first_mb_in_slice
            r.read_ue().map_err(|_| H26xError::Malformed)?; // slice_type
            r.read_ue().map_err(|_| H26xError::Malformed)
        }
        Codec::Hevc => {
            if nal.is_empty() {
                return Err(H26xError::Malformed);
            }
            let nal_unit_type = (nal[0] >> 1) & 0x3F;
            let rbsp = strip_emulation_prevention(nal);
            let mut r = BitReader::new(&rbsp);
            r.skip_bits(16).map_err(|_| H26xError::Malformed)?;
            r.skip_bits(1).map_err(|_| H26xError::Malformed)?;
            if (16..=23).contains(&nal_unit_type) {
                r.skip_bits(1).map_err(|_| H26xError::Malformed)?;
            }
            r.read_ue().map_err(|_| H26xError::Malformed)
        }
    }
}

/// Owns the dense SPS/PPS id space for one H.26x track.
pub struct ParamSetCache {
    codec: Codec,
    sps: Vec<Vec<u8>>,
    pps: Vec<Vec<u8>>,
    sps_remap: HashMap<u32, u32>,
    pps_remap: HashMap<u32, u32>,
}

impl ParamSetCache {
    #[must_use]
    pub fn new(codec: Codec) -> Self {
        Self {
            codec,
            sps: Vec::new(),
            pps: Vec::new(),
            sps_remap: HashMap::new(),
            pps_remap: HashMap::new(),
        }
    }

    /// Installs an SPS/VPS-carrying NAL, returning its dense assigned id.
    pub fn install_sps(&mut self, nal: &[u8]) -> Result<u32, H26xError> {
        let original_id = parse_sps_id(self.codec, nal)?;
        let lookup = rewrite_sps_id(self.codec, nal, 0)?;
        if let Some(idx) = self.sps.iter().position(|s| s == &lookup) {
            let idx = u32::try_from(idx).expect("sps cache bounded by MAX_SPS");
            self.sps_remap.insert(original_id, idx);
            return Ok(idx);
        }
        if self.sps.len() >= MAX_SPS {
            return Err(H26xError::TooManySps);
        }
        let new_idx = u32::try_from(self.sps.len()).expect("sps cache bounded by MAX_SPS");
        self.sps.push(rewrite_sps_id(self.codec, nal, new_idx)?);
        self.sps_remap.insert(original_id, new_idx);
        Ok(new_idx)
    }

    /// Installs a PPS-carrying NAL, returning its dense assigned id. The
    /// referenced SPS must already have been installed.
    pub fn install_pps(&mut self, nal: &[u8]) -> Result<u32, H26xError> {
        let (original_pps_id, original_sps_ref) = parse_pps_ids(self.codec, nal)?;
        let resolved_sps = *self
            .sps_remap
            .get(&original_sps_ref)
            .ok_or(H26xError::UnknownSpsRef(original_sps_ref))?;
        let lookup = rewrite_pps_ids(self.codec, nal, 0, resolved_sps)?;
        if let Some(idx) = self.pps.iter().position(|s| s == &lookup) {
            let idx = u32::try_from(idx).expect("pps cache bounded by MAX_PPS");
            self.pps_remap.insert(original_pps_id, idx);
            return Ok(idx);
        }
        if self.pps.len() >= MAX_PPS {
            return Err(H26xError::TooManyPps);
        }
        let new_idx = u32::try_from(self.pps.len()).expect("pps cache bounded by MAX_PPS");
        self.pps.push(rewrite_pps_ids(self.codec, nal, new_idx, resolved_sps)?);
        self.pps_remap.insert(original_pps_id, new_idx);
        Ok(new_idx)
    }

    /// Rewrites a slice NAL's `pic_parameter_set_id` through the PPS remap.
    pub fn patch_slice(&self, nal: &[u8]) -> Result<Vec<u8>, H26xError> {
        let original_pps_id = parse_slice_pps_id(self.codec, nal)?;
        let resolved = *self
            .pps_remap
            .get(&original_pps_id)
            .ok_or(H26xError::UnknownPpsRef(original_pps_id))?;
        rewrite_slice_pps_id(self.codec, nal, resolved)
    }

    #[must_use]
    pub fn sps(&self, id: u32) -> Option<&[u8]> {
        self.sps.get(id as usize).map(Vec::as_slice)
    }

    #[must_use]
    pub fn pps(&self, id: u32) -> Option<&[u8]> {
        self.pps.get(id as usize).map(Vec::as_slice)
    }

    #[must_use]
    pub fn sps_count(&self) -> usize {
        self.sps.len()
    }

    #[must_use]
    pub fn pps_count(&self) -> usize {
        self.pps.len()
    }
}
