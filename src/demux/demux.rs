// SPDX-License-Identifier: GPL-2.0-or-later

mod error;
mod reader;
mod track;
mod walk;

use common::log::{ArcLogger, LogEntry, LogLevel, NullLogger};

pub use error::DemuxError;
pub use reader::AsyncSource;
pub use track::{Track, TrackKind};

/// Everything a caller needs to pull one sample's bytes out of the file and
/// place it on a timeline: `MP4D_frame_offset`'s Rust shape.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameRef {
    pub offset: u64,
    pub size: u32,
    pub timestamp: u64,
    pub duration: u32,
}

pub struct Demuxer {
    movie_timescale: u32,
    movie_duration: u64,
    tracks: Vec<track::Track>,
    mdat_regions: Vec<(u64, u64)>,
    text_comment: Option<String>,
    logger: ArcLogger,
}

impl std::fmt::Debug for Demuxer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Demuxer")
            .field("movie_timescale", &self.movie_timescale)
            .field("movie_duration", &self.movie_duration)
            .field("tracks", &self.tracks)
            .field("mdat_regions", &self.mdat_regions)
            .field("text_comment", &self.text_comment)
            .finish_non_exhaustive()
    }
}

impl Demuxer {
    /// Reads `moov` in full, recording every track's sample index, and
    /// notes (without buffering) where each `mdat` region sits. Actual
    /// sample bytes are fetched later, lazily, via the same `read_cb`.
    pub async fn open<S: AsyncSource>(read_cb: S, file_size: u64) -> Result<Self, DemuxError> {
        Self::open_with_logger(read_cb, file_size, std::sync::Arc::new(NullLogger)).await
    }

    pub async fn open_with_logger<S: AsyncSource>(
        mut read_cb: S,
        file_size: u64,
        logger: ArcLogger,
    ) -> Result<Self, DemuxError> {
        let (parsed, mdat_regions) = walk::read_top_level(&mut read_cb, file_size, &logger).await?;
        logger.log(LogEntry::new(
            LogLevel::Info,
            "demux",
            format!(
                "parsed moov: {} track(s), {} mdat region(s)",
                parsed.tracks.len(),
                mdat_regions.len()
            ),
        ));

        let mut tracks = Vec::with_capacity(parsed.tracks.len());
        for builder in parsed.tracks {
            let track_id = builder.track_id;
            match builder.finish() {
                Ok(track) => tracks.push(track),
                Err(e) => {
                    logger.log(LogEntry::new(
                        LogLevel::Error,
                        "demux",
                        format!("track {track_id}: {e}"),
                    ));
                    return Err(e);
                }
            }
        }

        Ok(Self {
            movie_timescale: parsed.movie_timescale,
            movie_duration: parsed.movie_duration,
            tracks,
            mdat_regions,
            text_comment: parsed.text_comment,
            logger,
        })
    }

    #[must_use]
    pub fn text_comment(&self) -> Option<&str> {
        self.text_comment.as_deref()
    }

    #[must_use]
    pub fn movie_timescale(&self) -> u32 {
        self.movie_timescale
    }

    #[must_use]
    pub fn movie_duration(&self) -> u64 {
        self.movie_duration
    }

    #[must_use]
    pub fn tracks(&self) -> &[track::Track] {
        &self.tracks
    }

    #[must_use]
    pub fn mdat_regions(&self) -> &[(u64, u64)] {
        &self.mdat_regions
    }

    fn track(&self, track_id: u32) -> Result<&track::Track, DemuxError> {
        self.tracks
            .iter()
            .find(|t| t.track_id == track_id)
            .ok_or(DemuxError::UnknownTrack(track_id))
    }

    /// Resolves sample `n` (0-based) of `track_id` to its absolute file
    /// offset, size, reconstructed timestamp and duration.
    pub fn frame_offset(&self, track_id: u32, n: u32) -> Result<FrameRef, DemuxError> {
        let track = self.track(track_id)?;
        let (offset, size) = track.frame_offset(n)?;
        let timestamp = track.sample_timestamp(n).unwrap_or(0);
        let duration = track.sample_duration(n).unwrap_or(0);
        Ok(FrameRef {
            offset,
            size,
            timestamp,
            duration,
        })
    }

    /// Reads sample `n`'s bytes from the backing store into a freshly
    /// allocated buffer, using the `frame_offset` resolution above.
    pub async fn read_sample<S: AsyncSource>(
        &self,
        source: &mut S,
        track_id: u32,
        n: u32,
    ) -> Result<Vec<u8>, DemuxError> {
        let frame = self.frame_offset(track_id, n)?;
        let mut buf = vec![0u8; frame.size as usize];
        source.read(frame.offset, &mut buf).await?;
        Ok(buf)
    }

    /// Returns the `n`th SPS carried in the track's `avcC`/`hvcC`.
    pub fn read_sps(&self, track_id: u32, n: usize) -> Result<&[u8], DemuxError> {
        let track = self.track(track_id)?;
        if !matches!(track.kind, TrackKind::Avc | TrackKind::Hevc) {
            return Err(DemuxError::NotH26x(track_id));
        }
        track.sps(n).ok_or(DemuxError::MissingSampleEntry(track_id))
    }

    /// Returns the `n`th PPS carried in the track's `avcC`/`hvcC`.
    pub fn read_pps(&self, track_id: u32, n: usize) -> Result<&[u8], DemuxError> {
        let track = self.track(track_id)?;
        if !matches!(track.kind, TrackKind::Avc | TrackKind::Hevc) {
            return Err(DemuxError::NotH26x(track_id));
        }
        track.pps(n).ok_or(DemuxError::MissingSampleEntry(track_id))
    }

    /// Closing is just dropping; kept as an explicit method so callers
    /// mirror the mux side's `close` and logging happens at a known point.
    pub fn close(self) {
        self.logger.log(LogEntry::new(
            LogLevel::Debug,
            "demux",
            "closed".to_owned(),
        ));
    }
}
