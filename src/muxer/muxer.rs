// SPDX-License-Identifier: GPL-2.0-or-later

mod error;
mod moov;
mod sink;
mod track;

use std::sync::Arc;

use common::buffer::GrowableBuffer;
use common::log::{ArcLogger, LogEntry, LogLevel, NullLogger};
use h26x::SampleKind;

pub use error::MuxError;
pub use sink::AsyncSink;
pub use track::TrackKind;

use track::{append_dedup, MuxTrack, PendingSample, SampleDescriptor};

fn marshal_to_vec(boxes: &mp4::Boxes) -> Result<Vec<u8>, MuxError> {
    let mut buf = Vec::with_capacity(boxes.size());
    boxes.marshal(&mut buf)?;
    Ok(buf)
}

/// Incrementally builds an ISO-BMFF file: random-access (one seekable
/// `mdat`), sequential (one small `mdat` per sample, one-sample write lag,
/// no seeks), or fragmented (`moof`/`mdat` pairs after an init segment).
/// Bookkeeping (`add_*_track`, `set_*`, `put_sample`) is synchronous and
/// in-memory; only `close` touches the sink, with a single write of
/// everything accumulated so far.
pub struct Muxer {
    buffer: GrowableBuffer,
    tracks: Vec<MuxTrack>,
    next_track_id: u32,
    sequential: bool,
    fragmented: bool,
    /// Offset of the random-access mode's single shared `mdat` header,
    /// patched with the final size at `close`.
    mdat_header_offset: Option<usize>,
    fragment_sequence: u32,
    init_segment_written: bool,
    text_comment: Option<String>,
    logger: ArcLogger,
}

impl Muxer {
    #[must_use]
    pub fn open(sequential: bool, fragmented: bool) -> Self {
        Self::open_with_logger(sequential, fragmented, Arc::new(NullLogger))
    }

    #[must_use]
    pub fn open_with_logger(sequential: bool, fragmented: bool, logger: ArcLogger) -> Self {
        let mut buffer = GrowableBuffer::default();
        let ftyp = marshal_to_vec(&moov::build_ftyp())
            .expect("ftyp is a fixed 24-byte box, never fails to marshal");
        buffer.put(&ftyp);

        let mdat_header_offset = if sequential || fragmented {
            None
        } else {
            let offset = buffer.put(&[0, 0, 0, 0]);
            buffer.put(b"mdat");
            Some(offset)
        };

        logger.log(LogEntry::new(
            LogLevel::Debug,
            "muxer",
            format!("opened (sequential={sequential}, fragmented={fragmented})"),
        ));

        Self {
            buffer,
            tracks: Vec::new(),
            next_track_id: 1,
            sequential,
            fragmented,
            mdat_header_offset,
            fragment_sequence: 0,
            init_segment_written: false,
            text_comment: None,
            logger,
        }
    }

    fn push_track(&mut self, kind: TrackKind) -> u32 {
        let track_id = self.next_track_id;
        self.next_track_id += 1;
        let timescale = match kind {
            TrackKind::Video { .. } => 90000,
            TrackKind::Audio { sample_rate, .. } => sample_rate,
            TrackKind::Private { .. } => 1000,
        };
        self.tracks.push(MuxTrack::new(track_id, kind, timescale));
        track_id
    }

    pub fn add_video_track(&mut self, is_hevc: bool, width: u32, height: u32) -> Result<u32, MuxError> {
        if width == 0 || height == 0 {
            return Err(MuxError::BadArguments);
        }
        Ok(self.push_track(TrackKind::Video { is_hevc, width, height }))
    }

    pub fn add_audio_track(&mut self, channel_count: u16, sample_rate: u32) -> Result<u32, MuxError> {
        if channel_count == 0 || sample_rate == 0 {
            return Err(MuxError::BadArguments);
        }
        Ok(self.push_track(TrackKind::Audio { channel_count, sample_rate }))
    }

    /// `object_type_indication` must be in the user-private range the esds
    /// tag reserves for streams that are neither audio nor video.
    pub fn add_private_track(&mut self, object_type_indication: u8) -> Result<u32, MuxError> {
        if !(0xC0..=0xFE).contains(&object_type_indication) {
            return Err(MuxError::BadArguments);
        }
        Ok(self.push_track(TrackKind::Private { object_type_indication }))
    }

    fn track(&self, track_id: u32) -> Result<&MuxTrack, MuxError> {
        self.tracks
            .iter()
            .find(|t| t.track_id == track_id)
            .ok_or(MuxError::UnknownTrack(track_id))
    }

    fn track_mut(&mut self, track_id: u32) -> Result<&mut MuxTrack, MuxError> {
        self.tracks
            .iter_mut()
            .find(|t| t.track_id == track_id)
            .ok_or(MuxError::UnknownTrack(track_id))
    }

    pub fn set_vps(&mut self, track_id: u32, data: &[u8]) -> Result<(), MuxError> {
        let track = self.track_mut(track_id)?;
        if !track.is_video() {
            return Err(MuxError::NotVideoTrack(track_id));
        }
        append_dedup(&mut track.vps, data);
        Ok(())
    }

    pub fn set_sps(&mut self, track_id: u32, data: &[u8]) -> Result<(), MuxError> {
        let track = self.track_mut(track_id)?;
        if !track.is_video() {
            return Err(MuxError::NotVideoTrack(track_id));
        }
        append_dedup(&mut track.sps, data);
        Ok(())
    }

    pub fn set_pps(&mut self, track_id: u32, data: &[u8]) -> Result<(), MuxError> {
        let track = self.track_mut(track_id)?;
        if !track.is_video() {
            return Err(MuxError::NotVideoTrack(track_id));
        }
        append_dedup(&mut track.pps, data);
        Ok(())
    }

    /// Decoder-specific info for an audio or private track's `esds`. Only
    /// one slot exists per track.
    pub fn set_dsi(&mut self, track_id: u32, data: &[u8]) -> Result<(), MuxError> {
        let track = self.track_mut(track_id)?;
        if track.is_video() {
            return Err(MuxError::NotAudioTrack(track_id));
        }
        if track.dsi.is_some() {
            return Err(MuxError::OnlyOneDsiAllowed(track_id));
        }
        track.dsi = Some(data.to_vec());
        Ok(())
    }

    pub fn set_text_comment(&mut self, comment: String) {
        self.text_comment = Some(comment);
    }

    pub fn put_sample(
        &mut self,
        track_id: u32,
        data: &[u8],
        duration: u32,
        kind: SampleKind,
    ) -> Result<(), MuxError> {
        self.track(track_id)?;
        if self.fragmented {
            self.ensure_init_segment_written()?;
            self.put_sample_fragmented(track_id, data, duration, kind)
        } else if self.sequential {
            self.put_sample_sequential(track_id, data, duration, kind)
        } else {
            self.put_sample_random_access(track_id, data, duration, kind)
        }
    }

    fn put_sample_random_access(
        &mut self,
        track_id: u32,
        data: &[u8],
        duration: u32,
        kind: SampleKind,
    ) -> Result<(), MuxError> {
        if kind == SampleKind::Continuation {
            // Appends contiguously onto the buffer's tail, immediately
            // after the sample this extends; no other track's bytes can
            // land between a sample and its own continuation calls.
            self.buffer.put(data);
            let extra = u64::try_from(data.len())?;
            let track = self.track_mut(track_id)?;
            let last = track
                .samples
                .last_mut()
                .ok_or(MuxError::NoPendingSample(track_id))?;
            last.size += extra;
            return Ok(());
        }

        let offset = self.buffer.put(data);
        let track = self.track_mut(track_id)?;
        track.samples.push(SampleDescriptor {
            offset: u64::try_from(offset)?,
            size: u64::try_from(data.len())?,
            duration,
            is_sync: kind == SampleKind::RandomAccess,
        });
        Ok(())
    }

    fn put_sample_sequential(
        &mut self,
        track_id: u32,
        data: &[u8],
        duration: u32,
        kind: SampleKind,
    ) -> Result<(), MuxError> {
        if kind == SampleKind::Continuation {
            let track = self.track_mut(track_id)?;
            let pending = track.pending.as_mut().ok_or(MuxError::NoPendingSample(track_id))?;
            pending.data.extend_from_slice(data);
            return Ok(());
        }

        self.flush_pending_track(track_id)?;
        let track = self.track_mut(track_id)?;
        track.pending = Some(PendingSample {
            data: data.to_vec(),
            duration,
            is_sync: kind == SampleKind::RandomAccess,
        });
        Ok(())
    }

    fn put_sample_fragmented(
        &mut self,
        track_id: u32,
        data: &[u8],
        duration: u32,
        kind: SampleKind,
    ) -> Result<(), MuxError> {
        if kind == SampleKind::Continuation {
            let track = self.track_mut(track_id)?;
            let pending = track.pending.as_mut().ok_or(MuxError::NoPendingSample(track_id))?;
            pending.data.extend_from_slice(data);
            return Ok(());
        }

        self.flush_pending_fragment(track_id)?;
        let track = self.track_mut(track_id)?;
        track.pending = Some(PendingSample {
            data: data.to_vec(),
            duration,
            is_sync: kind == SampleKind::RandomAccess,
        });
        Ok(())
    }

    /// Writes the one sample `put_sample_sequential` is holding back (if
    /// any) as a standalone `mdat`, now that its full length is known.
    fn flush_pending_track(&mut self, track_id: u32) -> Result<(), MuxError> {
        let track = self.track_mut(track_id)?;
        let Some(pending) = track.pending.take() else {
            return Ok(());
        };

        let mdat_size = u32::try_from(pending.data.len() + 8)?;
        self.buffer.put(&mdat_size.to_be_bytes());
        self.buffer.put(b"mdat");
        let data_offset = self.buffer.put(&pending.data);

        let track = self.track_mut(track_id)?;
        track.samples.push(SampleDescriptor {
            offset: u64::try_from(data_offset)?,
            size: u64::try_from(pending.data.len())?,
            duration: pending.duration,
            is_sync: pending.is_sync,
        });
        Ok(())
    }

    /// Writes the one sample `put_sample_fragmented` is holding back (if
    /// any) as a `moof`/`mdat` pair. `trun.data_offset` is computed by
    /// building a throwaway fragment to measure its own size first.
    fn flush_pending_fragment(&mut self, track_id: u32) -> Result<(), MuxError> {
        let track = self.track_mut(track_id)?;
        let Some(pending) = track.pending.take() else {
            return Ok(());
        };
        let base_media_decode_time = track.duration();
        let sample = SampleDescriptor {
            offset: 0,
            size: u64::try_from(pending.data.len())?,
            duration: pending.duration,
            is_sync: pending.is_sync,
        };

        self.fragment_sequence += 1;
        let draft = moov::build_moof(track_id, self.fragment_sequence, base_media_decode_time, &sample, 0)?;
        let draft_size = i32::try_from(draft.size())?;
        let moof = moov::build_moof(
            track_id,
            self.fragment_sequence,
            base_media_decode_time,
            &sample,
            draft_size + 8,
        )?;
        let moof_bytes = marshal_to_vec(&moof)?;
        self.buffer.put(&moof_bytes);

        let mdat_size = u32::try_from(pending.data.len() + 8)?;
        self.buffer.put(&mdat_size.to_be_bytes());
        self.buffer.put(b"mdat");
        self.buffer.put(&pending.data);

        let track = self.track_mut(track_id)?;
        track.samples.push(sample);
        Ok(())
    }

    /// Writes the `ftyp`-following init segment (`moov` with `mvex`/`trex`
    /// and empty `stbl` tables) once, lazily, on the first sample: tracks
    /// and parameter sets must already be installed by then, but arrive
    /// after `open`.
    fn ensure_init_segment_written(&mut self) -> Result<(), MuxError> {
        if self.init_segment_written {
            return Ok(());
        }
        let moov = moov::build_moov(&self.tracks, true, self.text_comment.as_deref())?;
        let bytes = marshal_to_vec(&moov)?;
        self.buffer.put(&bytes);
        self.init_segment_written = true;
        Ok(())
    }

    /// Finishes the file and hands every byte produced so far to `sink` in
    /// one write. Non-fragmented output patches the random-access mode's
    /// `mdat` size in place before this call; no seek is ever issued
    /// against `sink` itself.
    pub async fn close<S: AsyncSink>(&mut self, sink: &mut S) -> Result<(), MuxError> {
        let track_ids: Vec<u32> = self.tracks.iter().map(|t| t.track_id).collect();

        if self.fragmented {
            for &track_id in &track_ids {
                self.flush_pending_fragment(track_id)?;
            }
        } else if self.sequential {
            for &track_id in &track_ids {
                self.flush_pending_track(track_id)?;
            }
        } else if let Some(header_offset) = self.mdat_header_offset {
            let mdat_size = u32::try_from(self.buffer.len() - header_offset)?;
            self.buffer.patch(header_offset, &mdat_size.to_be_bytes());
        }

        if !self.fragmented {
            let moov = moov::build_moov(&self.tracks, false, self.text_comment.as_deref())?;
            let bytes = marshal_to_vec(&moov)?;
            self.buffer.put(&bytes);
        }

        self.logger.log(LogEntry::new(
            LogLevel::Info,
            "muxer",
            format!("closing: {} byte(s) across {} track(s)", self.buffer.len(), self.tracks.len()),
        ));

        sink.write(0, self.buffer.as_slice()).await?;
        Ok(())
    }
}

impl h26x::MuxSink for Muxer {
    type Error = MuxError;

    fn add_track(&mut self, is_hevc: bool, width: u32, height: u32) -> Result<u32, MuxError> {
        self.add_video_track(is_hevc, width, height)
    }

    fn set_vps(&mut self, track_id: u32, data: &[u8]) -> Result<(), MuxError> {
        self.set_vps(track_id, data)
    }

    fn set_sps(&mut self, track_id: u32, data: &[u8]) -> Result<(), MuxError> {
        self.set_sps(track_id, data)
    }

    fn set_pps(&mut self, track_id: u32, data: &[u8]) -> Result<(), MuxError> {
        self.set_pps(track_id, data)
    }

    fn put_sample(&mut self, track_id: u32, data: &[u8], duration: u32, kind: SampleKind) -> Result<(), MuxError> {
        self.put_sample(track_id, data, duration, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    struct VecSink {
        data: Vec<u8>,
    }

    #[async_trait::async_trait]
    impl AsyncSink for VecSink {
        async fn write(&mut self, offset: u64, buf: &[u8]) -> Result<(), std::io::Error> {
            assert_eq!(0, offset);
            self.data = buf.to_vec();
            Ok(())
        }
    }

    #[test]
    fn track_ids_assigned_in_order() {
        let mut mux = Muxer::open(false, false);
        let a = mux.add_video_track(false, 640, 480).unwrap();
        let b = mux.add_audio_track(2, 48000).unwrap();
        assert_eq!(1, a);
        assert_eq!(2, b);
    }

    #[test]
    fn add_video_track_rejects_zero_dimensions() {
        let mut mux = Muxer::open(false, false);
        assert!(matches!(mux.add_video_track(false, 0, 480), Err(MuxError::BadArguments)));
    }

    #[test]
    fn add_private_track_rejects_out_of_range_oti() {
        let mut mux = Muxer::open(false, false);
        assert!(matches!(mux.add_private_track(0x40), Err(MuxError::BadArguments)));
        assert!(mux.add_private_track(0xC0).is_ok());
    }

    #[test]
    fn set_dsi_allows_only_one_slot() {
        let mut mux = Muxer::open(false, false);
        let track_id = mux.add_audio_track(2, 48000).unwrap();
        mux.set_dsi(track_id, b"dsi-one").unwrap();
        assert!(matches!(
            mux.set_dsi(track_id, b"dsi-two"),
            Err(MuxError::OnlyOneDsiAllowed(_))
        ));
    }

    #[test]
    fn put_sample_random_access_records_contiguous_offsets() {
        let mut mux = Muxer::open(false, false);
        let track_id = mux.add_video_track(false, 640, 480).unwrap();
        mux.set_sps(track_id, &[0x67, 0x42, 0x00, 0x1f]).unwrap();
        mux.set_pps(track_id, &[0x68, 0xce, 0x38, 0x80]).unwrap();

        mux.put_sample(track_id, b"first-frame", 3000, SampleKind::RandomAccess).unwrap();
        mux.put_sample(track_id, b"second-frame", 3000, SampleKind::Default).unwrap();

        let track = mux.track(track_id).unwrap();
        assert_eq!(2, track.samples.len());
        assert!(track.samples[0].is_sync);
        assert!(!track.samples[1].is_sync);
        assert_eq!(
            track.samples[0].offset + track.samples[0].size,
            track.samples[1].offset
        );
    }

    #[tokio::test]
    async fn close_writes_ftyp_mdat_moov_in_order() {
        let mut mux = Muxer::open(false, false);
        let track_id = mux.add_video_track(false, 64, 64).unwrap();
        mux.set_sps(track_id, &[0x67, 0x42, 0x00, 0x1f]).unwrap();
        mux.set_pps(track_id, &[0x68, 0xce, 0x38, 0x80]).unwrap();
        mux.put_sample(track_id, b"frame-bytes", 3000, SampleKind::RandomAccess).unwrap();

        let mut sink = VecSink { data: Vec::new() };
        mux.close(&mut sink).await.unwrap();

        assert_eq!(b"ftyp", &sink.data[4..8]);
        let ftyp_box_size = 24; // fixed prefix: size(4) + 'ftyp'(4) + major(4) + minor(4) + 2 compatible brands(4 each)
        assert_eq!(b"mdat", &sink.data[ftyp_box_size + 4..ftyp_box_size + 8]);
        assert!(sink.data.windows(4).any(|w| w == b"moov"));
    }

    #[tokio::test]
    async fn close_sequential_mode_needs_no_patched_sizes() {
        let mut mux = Muxer::open(true, false);
        let track_id = mux.add_audio_track(2, 48000).unwrap();
        mux.put_sample(track_id, b"a", 1024, SampleKind::RandomAccess).unwrap();
        mux.put_sample(track_id, b"bb", 1024, SampleKind::Default).unwrap();

        let mut sink = VecSink { data: Vec::new() };
        mux.close(&mut sink).await.unwrap();

        let track = mux.track(track_id).unwrap();
        assert_eq!(2, track.samples.len());
        assert!(sink.data.windows(4).any(|w| w == b"moov"));
    }

    #[tokio::test]
    async fn fragmented_mode_writes_init_segment_before_first_moof() {
        let mut mux = Muxer::open(false, true);
        let track_id = mux.add_video_track(false, 64, 64).unwrap();
        mux.set_sps(track_id, &[0x67, 0x42, 0x00, 0x1f]).unwrap();
        mux.set_pps(track_id, &[0x68, 0xce, 0x38, 0x80]).unwrap();
        mux.put_sample(track_id, b"frame-one", 3000, SampleKind::RandomAccess).unwrap();
        mux.put_sample(track_id, b"frame-two", 3000, SampleKind::Default).unwrap();

        let mut sink = VecSink { data: Vec::new() };
        mux.close(&mut sink).await.unwrap();

        let moov_pos = sink.data.windows(4).position(|w| w == b"moov").unwrap();
        let moof_pos = sink.data.windows(4).position(|w| w == b"moof").unwrap();
        assert!(moov_pos < moof_pos);
        assert_eq!(2, sink.data.windows(4).filter(|w| *w == b"moof").count());
    }

    #[test]
    fn set_text_comment_is_carried_into_moov() {
        let mut mux = Muxer::open(false, false);
        mux.set_text_comment("hello".to_owned());
        assert_eq!(Some("hello"), mux.text_comment.as_deref());
    }
}
