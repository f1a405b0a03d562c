// SPDX-License-Identifier: GPL-2.0-or-later

use crate::error::DemuxError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackKind {
    Avc,
    Hevc,
    Aac,
    Other,
}

/// Accumulates the pieces of a `trak` as the box walker visits them, in
/// whatever order the file happens to store its children.
#[derive(Default, Debug)]
pub(crate) struct TrackBuilder {
    pub track_id: u32,
    pub timescale: u32,
    pub duration: u64,
    pub language: [u8; 3],
    pub kind: TrackKind,
    pub width: u16,
    pub height: u16,
    pub channel_count: u16,
    pub sample_rate: u32,
    pub dsi: Vec<u8>,
    pub sps: Vec<Vec<u8>>,
    pub pps: Vec<Vec<u8>>,
    pub stsz: Vec<u32>,
    pub stsc: Vec<mp4::StscEntry>,
    pub chunk_offsets: Vec<u64>,
    pub stts: Vec<mp4::SttsEntry>,
    pub stss: Option<Vec<u32>>,
}

impl Default for TrackKind {
    fn default() -> Self {
        Self::Other
    }
}

/// A fully resolved track: every sample's absolute file offset, size and
/// duration is known up front, so `Demuxer::frame_offset` is a table lookup.
#[derive(Debug)]
pub struct Track {
    pub track_id: u32,
    pub timescale: u32,
    pub duration: u64,
    pub language: [u8; 3],
    pub kind: TrackKind,
    pub width: u16,
    pub height: u16,
    pub channel_count: u16,
    pub sample_rate: u32,
    pub(crate) dsi: Vec<u8>,
    pub(crate) sps: Vec<Vec<u8>>,
    pub(crate) pps: Vec<Vec<u8>>,
    pub(crate) sample_offsets: Vec<u64>,
    pub(crate) sample_sizes: Vec<u32>,
    pub(crate) sample_durations: Vec<u32>,
    pub(crate) sample_timestamps: Vec<u64>,
    pub(crate) sync_samples: Option<Vec<u32>>,
}

impl Track {
    #[must_use]
    pub fn sample_count(&self) -> u32 {
        #[allow(clippy::cast_possible_truncation)]
        (self.sample_sizes.len() as u32)
    }

    #[must_use]
    pub fn decoder_specific_info(&self) -> &[u8] {
        &self.dsi
    }

    /// True when `sample_index` (0-based) is a random-access point. Tracks
    /// with no `stss` table are all-sync, e.g. most audio tracks.
    #[must_use]
    pub fn is_sync_sample(&self, sample_index: u32) -> bool {
        match &self.sync_samples {
            Some(stss) => stss.contains(&(sample_index + 1)),
            None => true,
        }
    }

    pub(crate) fn frame_offset(&self, sample_index: u32) -> Result<(u64, u32), DemuxError> {
        let i = sample_index as usize;
        let offset = *self
            .sample_offsets
            .get(i)
            .ok_or(DemuxError::SampleOutOfRange(
                self.track_id,
                sample_index,
                self.sample_count(),
            ))?;
        let size = self.sample_sizes[i];
        Ok((offset, size))
    }

    pub(crate) fn sample_duration(&self, sample_index: u32) -> Option<u32> {
        self.sample_durations.get(sample_index as usize).copied()
    }

    pub(crate) fn sample_timestamp(&self, sample_index: u32) -> Option<u64> {
        self.sample_timestamps.get(sample_index as usize).copied()
    }

    pub(crate) fn sps(&self, index: usize) -> Option<&[u8]> {
        self.sps.get(index).map(Vec::as_slice)
    }

    pub(crate) fn pps(&self, index: usize) -> Option<&[u8]> {
        self.pps.get(index).map(Vec::as_slice)
    }
}

impl TrackBuilder {
    pub(crate) fn finish(self) -> Result<Track, DemuxError> {
        let sample_offsets =
            resolve_sample_offsets(&self.chunk_offsets, &self.stsc, &self.stsz).map_err(
                |reason| DemuxError::InconsistentSampleTables(self.track_id, reason),
            )?;
        let sample_durations = mp4::expand_stts(&self.stts);
        let mut sample_timestamps = Vec::with_capacity(sample_durations.len());
        let mut running = 0u64;
        for duration in &sample_durations {
            sample_timestamps.push(running);
            running += u64::from(*duration);
        }
        Ok(Track {
            track_id: self.track_id,
            timescale: self.timescale,
            duration: self.duration,
            language: self.language,
            kind: self.kind,
            width: self.width,
            height: self.height,
            channel_count: self.channel_count,
            sample_rate: self.sample_rate,
            dsi: self.dsi,
            sps: self.sps,
            pps: self.pps,
            sample_offsets,
            sample_sizes: self.stsz,
            sample_durations,
            sample_timestamps,
            sync_samples: self.stss,
        })
    }
}

/// Resolves `stco`/`co64` chunk offsets plus the `stsc` run-length mapping
/// and `stsz` sizes into one absolute file offset per sample, in sample
/// order. Chunk numbers in `stsc` are 1-based per ISO/IEC 14496-12.
fn resolve_sample_offsets(
    chunk_offsets: &[u64],
    stsc: &[mp4::StscEntry],
    sample_sizes: &[u32],
) -> Result<Vec<u64>, &'static str> {
    if stsc.is_empty() {
        return if sample_sizes.is_empty() {
            Ok(Vec::new())
        } else {
            Err("samples exist but the stsc table is empty")
        };
    }

    let mut offsets = Vec::with_capacity(sample_sizes.len());
    let mut sample_idx = 0usize;
    for (run_idx, entry) in stsc.iter().enumerate() {
        let first_chunk = entry.first_chunk as usize;
        let next_first_chunk = stsc
            .get(run_idx + 1)
            .map_or(chunk_offsets.len() + 1, |e| e.first_chunk as usize);
        if first_chunk == 0 || next_first_chunk < first_chunk {
            return Err("stsc chunk run is not monotonically increasing");
        }
        for chunk_no in first_chunk..next_first_chunk {
            let chunk_offset = *chunk_offsets
                .get(chunk_no - 1)
                .ok_or("stsc references a chunk beyond stco/co64")?;
            let mut running = chunk_offset;
            for _ in 0..entry.samples_per_chunk {
                let size = *sample_sizes
                    .get(sample_idx)
                    .ok_or("stsz has fewer entries than stsc/stco imply")?;
                offsets.push(running);
                running += u64::from(size);
                sample_idx += 1;
            }
        }
    }
    if sample_idx != sample_sizes.len() {
        return Err("stsc/stco describe fewer samples than stsz lists");
    }
    Ok(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn entry(first_chunk: u32, samples_per_chunk: u32) -> mp4::StscEntry {
        mp4::StscEntry {
            first_chunk,
            samples_per_chunk,
            sample_description_index: 1,
        }
    }

    #[test]
    fn single_run_single_chunk() {
        let offsets = resolve_sample_offsets(&[1000], &[entry(1, 3)], &[10, 20, 30]).unwrap();
        assert_eq!(vec![1000, 1010, 1030], offsets);
    }

    #[test]
    fn multiple_chunks_one_sample_each() {
        let offsets =
            resolve_sample_offsets(&[100, 500, 900], &[entry(1, 1)], &[50, 50, 50]).unwrap();
        assert_eq!(vec![100, 500, 900], offsets);
    }

    #[test]
    fn two_runs_with_different_samples_per_chunk() {
        let stsc = vec![entry(1, 2), entry(3, 1)];
        let offsets =
            resolve_sample_offsets(&[0, 100, 200], &stsc, &[10, 10, 10, 10]).unwrap();
        assert_eq!(vec![0, 10, 100, 200], offsets);
    }

    #[test]
    fn mismatched_sample_count_is_rejected() {
        let err = resolve_sample_offsets(&[0], &[entry(1, 3)], &[10, 10]).unwrap_err();
        assert_eq!("stsz has fewer entries than stsc/stco imply", err);
    }
}
