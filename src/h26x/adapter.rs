// SPDX-License-Identifier: GPL-2.0-or-later

//! Adapts a stream of Annex-B framed AVC or HEVC NAL units onto an MP4 mux
//! track: installs parameter sets, patches slice `pic_parameter_set_id`
//! references through the dense id space, and classifies each slice as a
//! random-access point, a continuation of the previous sample, or a plain
//! sample.

use thiserror::Error;

use crate::bits::BitReader;
use crate::params::{Codec, H26xError, ParamSetCache};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleKind {
    Default,
    RandomAccess,
    Continuation,
}

/// What the mux side needs to do with a newly installed or installable NAL.
pub trait MuxSink {
    type Error: std::error::Error;

    fn add_track(&mut self, is_hevc: bool, width: u32, height: u32) -> Result<u32, Self::Error>;
    fn set_vps(&mut self, track_id: u32, data: &[u8]) -> Result<(), Self::Error>;
    fn set_sps(&mut self, track_id: u32, data: &[u8]) -> Result<(), Self::Error>;
    fn set_pps(&mut self, track_id: u32, data: &[u8]) -> Result<(), Self::Error>;
    fn put_sample(
        &mut self,
        track_id: u32,
        data: &[u8],
        duration: u32,
        kind: SampleKind,
    ) -> Result<(), Self::Error>;
}

#[derive(Debug, Error)]
pub enum H26xAdapterError<E: std::error::Error> {
    #[error("parameter set: {0}")]
    ParamSet(#[from] H26xError),

    #[error("mux: {0}")]
    Mux(E),
}

const AVC_NAL_SLICE: u8 = 1;
const AVC_NAL_IDR_SLICE: u8 = 5;
const AVC_NAL_SPS: u8 = 7;
const AVC_NAL_PPS: u8 = 8;
const AVC_NAL_AUD: u8 = 9;

const HEVC_NAL_VPS: u8 = 32;
const HEVC_NAL_SPS: u8 = 33;
const HEVC_NAL_PPS: u8 = 34;
const HEVC_NAL_AUD: u8 = 35;

fn avc_first_mb_is_zero(rbsp_after_header: &[u8]) -> Result<bool, H26xError> {
    let mut r = BitReader::new(rbsp_after_header);
    Ok(r.read_ue().map_err(|_| H26xError::Malformed)? == 0)
}

fn hevc_first_slice_segment_flag(nal: &[u8]) -> Result<bool, H26xError> {
    if nal.len() < 3 {
        return Err(H26xError::Malformed);
    }
    let mut r = BitReader::new(&nal[2..]);
    Ok(r.read_bits(1).map_err(|_| H26xError::Malformed)? == 1)
}

/// Adapts one H.26x elementary stream onto one mux track.
pub struct H26xAdapter<M: MuxSink> {
    mux: M,
    track_id: u32,
    is_hevc: bool,
    need_vps: bool,
    need_sps: bool,
    need_pps: bool,
    need_idr: bool,
    sps_patcher: ParamSetCache,
}

impl<M: MuxSink> H26xAdapter<M> {
    pub fn init(mut mux: M, width: u32, height: u32, is_hevc: bool) -> Result<Self, H26xAdapterError<M::Error>> {
        let track_id = mux
            .add_track(is_hevc, width, height)
            .map_err(H26xAdapterError::Mux)?;
        Ok(Self {
            mux,
            track_id,
            is_hevc,
            need_vps: is_hevc,
            need_sps: true,
            need_pps: true,
            need_idr: true,
            sps_patcher: ParamSetCache::new(if is_hevc { Codec::Hevc } else { Codec::Avc }),
        })
    }

    #[must_use]
    pub fn track_id(&self) -> u32 {
        self.track_id
    }

    pub fn write_nal(&mut self, nal: &[u8], duration: u32) -> Result<(), H26xAdapterError<M::Error>> {
        if nal.is_empty() {
            return Err(H26xAdapterError::ParamSet(H26xError::Malformed));
        }
        if self.is_hevc {
            self.write_hevc_nal(nal, duration)
        } else {
            self.write_avc_nal(nal, duration)
        }
    }

    pub fn close(self) -> M {
        self.mux
    }

    /// Drops the sample silently while any `need_*` flag remains set, per
    /// the adapter invariant; otherwise patches and forwards it.
    fn emit_vcl(&mut self, nal: &[u8], duration: u32, kind: SampleKind) -> Result<(), H26xAdapterError<M::Error>> {
        if self.need_vps || self.need_sps || self.need_pps || self.need_idr {
            return Ok(());
        }
        let patched = self.sps_patcher.patch_slice(nal)?;
        self.mux
            .put_sample(self.track_id, &patched, duration, kind)
            .map_err(H26xAdapterError::Mux)
    }

    fn write_avc_nal(&mut self, nal: &[u8], duration: u32) -> Result<(), H26xAdapterError<M::Error>> {
        let nal_unit_type = nal[0] & 0x1F;
        match nal_unit_type {
            AVC_NAL_SPS => {
                let id = self.sps_patcher.install_sps(nal)?;
                self.need_sps = false;
                let bytes = self.sps_patcher.sps(id).expect("just installed").to_vec();
                self.mux
                    .set_sps(self.track_id, &bytes)
                    .map_err(H26xAdapterError::Mux)
            }
            AVC_NAL_PPS => {
                if self.need_sps {
                    return Err(H26xAdapterError::ParamSet(H26xError::BadArguments(
                        "PPS arrived before SPS",
                    )));
                }
                let id = self.sps_patcher.install_pps(nal)?;
                self.need_pps = false;
                let bytes = self.sps_patcher.pps(id).expect("just installed").to_vec();
                self.mux
                    .set_pps(self.track_id, &bytes)
                    .map_err(H26xAdapterError::Mux)
            }
            AVC_NAL_AUD => Ok(()),
            AVC_NAL_IDR_SLICE => {
                if self.need_sps {
                    return Err(H26xAdapterError::ParamSet(H26xError::BadArguments(
                        "IDR slice arrived before SPS",
                    )));
                }
                if !self.need_pps {
                    self.need_idr = false;
                }
                let new_access_unit = avc_first_mb_is_zero(&nal[1..])?;
                let kind = if !new_access_unit {
                    SampleKind::Continuation
                } else {
                    SampleKind::RandomAccess
                };
                self.emit_vcl(nal, duration, kind)
            }
            AVC_NAL_SLICE => {
                let new_access_unit = avc_first_mb_is_zero(&nal[1..])?;
                let kind = if new_access_unit {
                    SampleKind::Default
                } else {
                    SampleKind::Continuation
                };
                self.emit_vcl(nal, duration, kind)
            }
            _ => self.emit_vcl(nal, duration, SampleKind::Continuation),
        }
    }

    fn write_hevc_nal(&mut self, nal: &[u8], duration: u32) -> Result<(), H26xAdapterError<M::Error>> {
        if nal.len() < 2 {
            return Err(H26xAdapterError::ParamSet(H26xError::Malformed));
        }
        let nal_unit_type = (nal[0] >> 1) & 0x3F;
        match nal_unit_type {
            HEVC_NAL_VPS => {
                self.need_vps = false;
                self.mux.set_vps(self.track_id, nal).map_err(H26xAdapterError::Mux)
            }
            HEVC_NAL_SPS => {
                let id = self.sps_patcher.install_sps(nal)?;
                self.need_sps = false;
                let bytes = self.sps_patcher.sps(id).expect("just installed").to_vec();
                self.mux
                    .set_sps(self.track_id, &bytes)
                    .map_err(H26xAdapterError::Mux)
            }
            HEVC_NAL_PPS => {
                if self.need_sps {
                    return Err(H26xAdapterError::ParamSet(H26xError::BadArguments(
                        "PPS arrived before SPS",
                    )));
                }
                let id = self.sps_patcher.install_pps(nal)?;
                self.need_pps = false;
                let bytes = self.sps_patcher.pps(id).expect("just installed").to_vec();
                self.mux
                    .set_pps(self.track_id, &bytes)
                    .map_err(H26xAdapterError::Mux)
            }
            HEVC_NAL_AUD => Ok(()),
            0..=31 => {
                // IDR/BLA/CRA range, ITU-T H.265 Table 7-1.
                let is_irap = (16..=21).contains(&nal_unit_type);
                if is_irap && (self.need_vps || self.need_sps) {
                    return Err(H26xAdapterError::ParamSet(H26xError::BadArguments(
                        "IRAP slice arrived before VPS/SPS",
                    )));
                }
                if is_irap && !self.need_vps && !self.need_sps && !self.need_pps {
                    self.need_idr = false;
                }
                let first_slice = hevc_first_slice_segment_flag(nal)?;
                let kind = if !first_slice {
                    SampleKind::Continuation
                } else if is_irap {
                    SampleKind::RandomAccess
                } else {
                    SampleKind::Default
                };
                self.emit_vcl(nal, duration, kind)
            }
            _ => self.emit_vcl(nal, duration, SampleKind::Continuation),
        }
    }
}
