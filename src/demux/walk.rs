// SPDX-License-Identifier: GPL-2.0-or-later

//! Box-tree descent. Depth is tracked with a plain counter rather than an
//! explicit frame stack because every walker here is a direct recursive
//! call of `for_each_child`; the counter enforces the same nesting cap a
//! stack-based walker would.

use common::log::ArcLogger;

use crate::error::DemuxError;
use crate::reader::AsyncSource;
use crate::track::{TrackBuilder, TrackKind};

const MAX_DEPTH: usize = 64;

#[derive(Debug)]
pub(crate) struct ParsedMoov {
    pub movie_timescale: u32,
    pub movie_duration: u64,
    pub tracks: Vec<TrackBuilder>,
    pub text_comment: Option<String>,
}

pub(crate) async fn read_top_level<S: AsyncSource>(
    source: &mut S,
    file_size: u64,
    logger: &ArcLogger,
) -> Result<(ParsedMoov, Vec<(u64, u64)>), DemuxError> {
    if file_size < 8 {
        return Err(DemuxError::FileTooSmall(file_size));
    }

    let mut offset = 0u64;
    let mut moov = None;
    let mut mdat_regions = Vec::new();
    let mut header_buf = [0u8; 16];

    while offset + 8 <= file_size {
        let remaining = file_size - offset;
        let head_len = usize_from(remaining.min(16))?;
        source.read(offset, &mut header_buf[..head_len]).await?;
        let header = mp4::read_box_header(&header_buf[..head_len], remaining)?;
        let payload_offset = offset + header.header_len;

        match &header.box_type {
            b"moov" => {
                let mut buf = vec![0u8; usize_from(header.payload_len)?];
                source.read(payload_offset, &mut buf).await?;
                moov = Some(walk_moov(&buf, 0, logger)?);
            }
            b"mdat" => {
                mdat_regions.push((payload_offset, header.payload_len));
            }
            _ => {}
        }

        offset = payload_offset
            .checked_add(header.payload_len)
            .ok_or_else(|| mp4::Mp4Error::BadBoxSize(header.payload_len))?;
    }

    Ok((moov.ok_or(DemuxError::MissingMoov)?, mdat_regions))
}

fn usize_from(v: u64) -> Result<usize, DemuxError> {
    usize::try_from(v).map_err(|_| DemuxError::FileTooSmall(v))
}

/// Visits every immediate child box of `data`, handing each `(box_type,
/// payload)` pair to `f`. `depth` is the nesting depth of `data` itself.
fn for_each_child<F>(data: &[u8], depth: usize, mut f: F) -> Result<(), DemuxError>
where
    F: FnMut(mp4::BoxType, &[u8], usize) -> Result<(), DemuxError>,
{
    if depth > MAX_DEPTH {
        return Err(mp4::Mp4Error::TooDeep(MAX_DEPTH).into());
    }
    let mut pos = 0usize;
    while pos + 8 <= data.len() {
        let remaining = (data.len() - pos) as u64;
        let header = mp4::read_box_header(&data[pos..], remaining)?;
        let header_len = usize_from(header.header_len)?;
        let payload_len = usize_from(header.payload_len)?;
        let payload = data
            .get(pos + header_len..pos + header_len + payload_len)
            .ok_or(mp4::Mp4Error::Truncated(pos + header_len + payload_len, data.len()))?;
        f(header.box_type, payload, depth + 1)?;
        pos += header_len + payload_len;
    }
    Ok(())
}

fn walk_moov(data: &[u8], depth: usize, logger: &ArcLogger) -> Result<ParsedMoov, DemuxError> {
    let mut movie_timescale = 0;
    let mut movie_duration = 0;
    let mut tracks = Vec::new();
    let mut text_comment = None;

    for_each_child(data, depth, |box_type, payload, child_depth| {
        match &box_type {
            b"mvhd" => {
                let parsed = mp4::Mvhd::unmarshal(payload)?;
                movie_timescale = parsed.timescale;
                movie_duration = parsed.duration;
            }
            b"trak" => tracks.push(walk_trak(payload, child_depth)?),
            b"udta" => text_comment = walk_udta(payload, child_depth, logger)?,
            _ => {}
        }
        Ok(())
    })?;

    Ok(ParsedMoov {
        movie_timescale,
        movie_duration,
        tracks,
        text_comment,
    })
}

fn walk_udta(data: &[u8], depth: usize, logger: &ArcLogger) -> Result<Option<String>, DemuxError> {
    let mut comment = None;
    for_each_child(data, depth, |box_type, payload, child_depth| {
        if box_type == *b"meta" {
            comment = walk_meta(payload, child_depth, logger)?;
        }
        Ok(())
    })?;
    Ok(comment)
}

/// ISO `meta` is a `FullBox`: a 4-byte version/flags field precedes its
/// children. Some QuickTime-derived writers emit a bare container with no
/// such header, so the first four bytes are already the first child's box
/// size. Distinguished by peeking where a plausible box type would sit
/// under each interpretation and preferring whichever one parses as ASCII.
fn walk_meta(data: &[u8], depth: usize, logger: &ArcLogger) -> Result<Option<String>, DemuxError> {
    let iso_type = data.get(8..12);
    let bare_type = data.get(4..8);
    let children = if iso_type.is_some_and(is_plausible_box_type) {
        data.get(4..).unwrap_or(&[])
    } else if bare_type.is_some_and(is_plausible_box_type) {
        let preview = data.get(..data.len().min(32)).unwrap_or(data);
        logger.log(common::log::LogEntry::new(
            common::log::LogLevel::Debug,
            "demux",
            format!(
                "meta box has no FullBox header, parsing as bare container:\n{}",
                pretty_hex::pretty_hex(&preview)
            ),
        ));
        data
    } else {
        return Ok(None);
    };

    let mut comment = None;
    for_each_child(children, depth, |box_type, payload, child_depth| {
        if box_type == *b"ilst" {
            comment = walk_ilst(payload, child_depth)?;
        }
        Ok(())
    })?;
    Ok(comment)
}

fn is_plausible_box_type(candidate: &[u8]) -> bool {
    candidate.iter().all(|b| b.is_ascii_alphanumeric())
}

fn walk_ilst(data: &[u8], depth: usize) -> Result<Option<String>, DemuxError> {
    let mut comment = None;
    for_each_child(data, depth, |box_type, payload, _| {
        if box_type == *b"\xa9cmt" {
            comment = Some(mp4::MetaTag::unmarshal(payload)?);
        }
        Ok(())
    })?;
    Ok(comment)
}

fn walk_trak(data: &[u8], depth: usize) -> Result<TrackBuilder, DemuxError> {
    let mut track = TrackBuilder::default();

    for_each_child(data, depth, |box_type, payload, child_depth| {
        match &box_type {
            b"tkhd" => track.track_id = mp4::Tkhd::unmarshal_track_id(payload)?,
            b"mdia" => walk_mdia(payload, child_depth, &mut track)?,
            _ => {}
        }
        Ok(())
    })?;

    Ok(track)
}

fn walk_mdia(data: &[u8], depth: usize, track: &mut TrackBuilder) -> Result<(), DemuxError> {
    for_each_child(data, depth, |box_type, payload, child_depth| {
        match &box_type {
            b"mdhd" => {
                let parsed = mp4::Mdhd::unmarshal(payload)?;
                track.timescale = parsed.timescale;
                track.duration = parsed.duration;
                track.language = parsed.language;
            }
            b"minf" => walk_minf(payload, child_depth, track)?,
            _ => {}
        }
        Ok(())
    })
}

fn walk_minf(data: &[u8], depth: usize, track: &mut TrackBuilder) -> Result<(), DemuxError> {
    for_each_child(data, depth, |box_type, payload, child_depth| {
        if box_type == *b"stbl" {
            walk_stbl(payload, child_depth, track)?;
        }
        Ok(())
    })
}

fn walk_stbl(data: &[u8], depth: usize, track: &mut TrackBuilder) -> Result<(), DemuxError> {
    for_each_child(data, depth, |box_type, payload, child_depth| {
        match &box_type {
            b"stsd" => walk_stsd(payload, child_depth, track)?,
            b"stts" => track.stts = mp4::Stts::unmarshal(payload)?,
            b"stsc" => track.stsc = mp4::Stsc::unmarshal(payload)?,
            b"stsz" => track.stsz = mp4::Stsz::unmarshal(payload)?,
            b"stz2" => track.stsz = mp4::Stz2::unmarshal(payload)?,
            b"stco" => track.chunk_offsets = mp4::Stco::unmarshal(payload)?,
            b"co64" => track.chunk_offsets = mp4::Co64::unmarshal(payload)?,
            b"stss" => track.stss = Some(mp4::Stss::unmarshal(payload)?),
            _ => {}
        }
        Ok(())
    })
}

/// `stsd`'s payload is `FullBox(4) + entry_count(4)` before its children,
/// unlike every other container box in this tree.
fn walk_stsd(data: &[u8], depth: usize, track: &mut TrackBuilder) -> Result<(), DemuxError> {
    let children = data
        .get(8..)
        .ok_or(mp4::Mp4Error::Truncated(8, data.len()))?;

    for_each_child(children, depth, |box_type, payload, child_depth| {
        match &box_type {
            b"avc1" => {
                track.kind = TrackKind::Avc;
                let (w, h) = mp4::Avc1::unmarshal_dimensions(payload)?;
                track.width = w;
                track.height = h;
                walk_visual_sample_entry(payload, child_depth, track)?;
            }
            b"hvc1" => {
                track.kind = TrackKind::Hevc;
                let (w, h) = mp4::Hvc1::unmarshal_dimensions(payload)?;
                track.width = w;
                track.height = h;
                walk_visual_sample_entry(payload, child_depth, track)?;
            }
            b"mp4a" => {
                track.kind = TrackKind::Aac;
                let (channels, rate) = mp4::Mp4a::unmarshal(payload)?;
                track.channel_count = channels;
                track.sample_rate = rate;
                walk_audio_sample_entry(payload, child_depth, track)?;
            }
            _ => {}
        }
        Ok(())
    })
}

// Fixed-field length shared by `avc1` and `hvc1`; nested boxes (`avcC`/
// `hvcC`, `btrt`, ...) start right after it.
const VISUAL_SAMPLE_ENTRY_LEN: usize = 78;
// Fixed-field length of `mp4a`; `esds` starts right after it.
const AUDIO_SAMPLE_ENTRY_LEN: usize = 28;

fn walk_visual_sample_entry(
    data: &[u8],
    depth: usize,
    track: &mut TrackBuilder,
) -> Result<(), DemuxError> {
    let Some(rest) = data.get(VISUAL_SAMPLE_ENTRY_LEN..) else {
        return Ok(());
    };
    for_each_child(rest, depth, |box_type, payload, _| {
        match &box_type {
            b"avcC" => {
                track.dsi = payload.to_vec();
                let parsed = mp4::AvcC::unmarshal(payload)?;
                track.sps = parsed.sequence_parameter_sets;
                track.pps = parsed.picture_parameter_sets;
            }
            b"hvcC" => {
                track.dsi = payload.to_vec();
                let parsed = mp4::HvcC::unmarshal(payload)?;
                track.sps = parsed.sequence_parameter_sets;
                track.pps = parsed.picture_parameter_sets;
            }
            _ => {}
        }
        Ok(())
    })
}

fn walk_audio_sample_entry(
    data: &[u8],
    depth: usize,
    track: &mut TrackBuilder,
) -> Result<(), DemuxError> {
    let Some(rest) = data.get(AUDIO_SAMPLE_ENTRY_LEN..) else {
        return Ok(());
    };
    for_each_child(rest, depth, |box_type, payload, _| {
        if box_type == *b"esds" {
            let parsed = mp4::Esds::unmarshal(payload)?;
            track.dsi = parsed.decoder_specific_info;
        }
        Ok(())
    })
}
