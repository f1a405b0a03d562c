// SPDX-License-Identifier: GPL-2.0-or-later

use crate::error::MuxError;
use crate::track::{MuxTrack, SampleDescriptor, TrackKind};

/// Movie-level timescale. `tkhd.duration` and `mvhd.duration` are expressed
/// in this timescale; each track's own `mdhd.duration` stays in the
/// track's native timescale.
pub(crate) const MOVIE_TIMESCALE: u32 = 1000;

pub(crate) fn build_ftyp() -> mp4::Boxes {
    mp4::Boxes::new(mp4::Ftyp {
        major_brand: *b"mp42",
        minor_version: 0,
        compatible_brands: vec![
            mp4::CompatibleBrandElem(*b"mp42"),
            mp4::CompatibleBrandElem(*b"isom"),
        ],
    })
}

fn track_duration_movie_units(track: &MuxTrack) -> u64 {
    track
        .duration()
        .saturating_mul(u64::from(MOVIE_TIMESCALE))
        / u64::from(track.timescale.max(1))
}

/// Assembles the full `moov` tree. For fragmented output this is the
/// initialization segment: `mvex`/`trex` are present and every `stbl` table
/// is empty, since samples arrive later as `moof`/`mdat` pairs.
pub(crate) fn build_moov(
    tracks: &[MuxTrack],
    fragmented: bool,
    text_comment: Option<&str>,
) -> Result<mp4::Boxes, MuxError> {
    let next_track_id = tracks.iter().map(|t| t.track_id).max().unwrap_or(0) + 1;
    let movie_duration = tracks
        .iter()
        .map(track_duration_movie_units)
        .max()
        .unwrap_or(0);

    let mut moov = mp4::Boxes::new(mp4::Moov).with_child(mp4::Boxes::new(mp4::Mvhd {
        flags: [0, 0, 0],
        version: mp4::MvhdVersion::V0(mp4::MvhdV0 {
            duration: u32::try_from(movie_duration)?,
            ..Default::default()
        }),
        timescale: MOVIE_TIMESCALE,
        rate: 0x0001_0000,
        volume: 0x0100,
        reserved: 0,
        reserved2: [0, 0],
        matrix: [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000],
        pre_defined: [0; 6],
        next_track_id,
    }));

    for track in tracks {
        moov = moov.with_child(build_trak(track, fragmented)?);
    }

    if fragmented {
        let mut mvex = mp4::Boxes::new(mp4::Mvex);
        for track in tracks {
            mvex = mvex.with_child(mp4::Boxes::new(mp4::Trex {
                full_box: mp4::FullBox::default(),
                track_id: track.track_id,
                default_sample_description_index: 1,
                default_sample_duration: 0,
                default_sample_size: 0,
                default_sample_flags: 0,
            }));
        }
        moov = moov.with_child(mvex);
    }

    if let Some(comment) = text_comment {
        moov = moov.with_child(build_udta(comment));
    }

    Ok(moov)
}

/// `udta -> meta -> [hdlr(mdir), ilst -> \xa9cmt]`, the iTunes-style comment
/// tag quicktime/ffmpeg readers look for.
fn build_udta(comment: &str) -> mp4::Boxes {
    let hdlr = mp4::Boxes::new(mp4::Hdlr {
        full_box: mp4::FullBox::default(),
        pre_defined: 0,
        handler_type: *b"mdir",
        reserved: [0; 3],
        name: String::new(),
    });
    let ilst = mp4::Boxes::new(mp4::Ilst).with_child(mp4::Boxes::new(mp4::MetaTag {
        tag: *b"\xa9cmt",
        value: comment.to_owned(),
    }));
    let meta = mp4::Boxes::new(mp4::Meta::default()).with_children2(hdlr, ilst);
    mp4::Boxes::new(mp4::Udta).with_child(meta)
}

fn build_trak(track: &MuxTrack, fragmented: bool) -> Result<mp4::Boxes, MuxError> {
    let (handler_type, handler_name): ([u8; 4], &str) = match track.kind {
        TrackKind::Video { .. } => (*b"vide", "VideoHandler"),
        TrackKind::Audio { .. } => (*b"soun", "SoundHandler"),
        TrackKind::Private { .. } => (*b"appl", "PrivateHandler"),
    };
    let (width, height) = match track.kind {
        TrackKind::Video { width, height, .. } => (width, height),
        TrackKind::Audio { .. } | TrackKind::Private { .. } => (0, 0),
    };
    let volume: i16 = if matches!(track.kind, TrackKind::Audio { .. }) {
        0x0100
    } else {
        0
    };

    let tkhd = mp4::Boxes::new(mp4::Tkhd {
        flags: [0, 0, 3], // enabled | in_movie | in_preview
        version: mp4::TkhdVersion::V0(mp4::TkhdV0 {
            duration: u32::try_from(track_duration_movie_units(track))?,
            ..Default::default()
        }),
        track_id: track.track_id,
        reserved0: 0,
        reserved1: [0, 0],
        layer: 0,
        alternate_group: 0,
        volume,
        reserved2: 0,
        matrix: [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000],
        width: width << 16,
        height: height << 16,
    });

    let mdhd = mp4::Boxes::new(mp4::Mdhd {
        flags: [0, 0, 0],
        version: mp4::MdhdVersion::V0(mp4::MdhdV0 {
            duration: u32::try_from(track.duration())?,
            ..Default::default()
        }),
        timescale: track.timescale,
        pad: false,
        language: *b"und",
        pre_defined: 0,
    });

    let hdlr = mp4::Boxes::new(mp4::Hdlr {
        full_box: mp4::FullBox::default(),
        pre_defined: 0,
        handler_type,
        reserved: [0; 3],
        name: handler_name.to_owned(),
    });

    let minf = build_minf(track, fragmented)?;
    let mdia = mp4::Boxes::new(mp4::Mdia).with_children3(mdhd, hdlr, minf);

    Ok(mp4::Boxes::new(mp4::Trak).with_children2(tkhd, mdia))
}

fn build_minf(track: &MuxTrack, fragmented: bool) -> Result<mp4::Boxes, MuxError> {
    let media_header = match track.kind {
        TrackKind::Video { .. } => mp4::Boxes::new(mp4::Vmhd::default()),
        TrackKind::Audio { .. } => mp4::Boxes::new(mp4::Smhd::default()),
        TrackKind::Private { .. } => mp4::Boxes::new(mp4::Vmhd::default()),
    };

    let samples: &[SampleDescriptor] = if fragmented { &[] } else { &track.samples };
    let stsz = samples
        .iter()
        .map(|s| u32::try_from(s.size))
        .collect::<Result<Vec<_>, _>>()?;

    let mut stbl = mp4::Boxes::new(mp4::Stbl)
        .with_child(build_stsd(track)?)
        .with_child(mp4::Boxes::new(mp4::Stts {
            full_box: mp4::FullBox::default(),
            entries: build_stts(samples),
        }))
        .with_child(mp4::Boxes::new(mp4::Stsc {
            full_box: mp4::FullBox::default(),
            entries: vec![mp4::StscEntry {
                first_chunk: 1,
                samples_per_chunk: 1,
                sample_description_index: 1,
            }],
        }))
        .with_child(mp4::Boxes::new(mp4::Stsz {
            full_box: mp4::FullBox::default(),
            sample_size: 0,
            sample_count: u32::try_from(stsz.len())?,
            entry_sizes: stsz,
        }))
        .with_child(build_stco(samples)?);

    if let Some(sync_samples) = build_stss(samples) {
        stbl = stbl.with_child(mp4::Boxes::new(mp4::Stss {
            full_box: mp4::FullBox::default(),
            sample_numbers: sync_samples,
        }));
    }

    Ok(mp4::Boxes::new(mp4::Minf)
        .with_child(media_header)
        .with_child(build_dinf())
        .with_child(stbl))
}

fn build_dinf() -> mp4::Boxes {
    mp4::Boxes::new(mp4::Dinf).with_child(
        mp4::Boxes::new(mp4::Dref {
            full_box: mp4::FullBox::default(),
            entry_count: 1,
        })
        .with_child(mp4::Boxes::new(mp4::Url {
            full_box: mp4::FullBox {
                version: 0,
                flags: mp4::u32_to_flags(mp4::URL_NOPT),
            },
            location: String::new(),
        })),
    )
}

fn build_stsd(track: &MuxTrack) -> Result<mp4::Boxes, MuxError> {
    let entry = match track.kind {
        TrackKind::Video {
            is_hevc: false,
            width,
            height,
        } => build_avc1(track, width, height)?,
        TrackKind::Video {
            is_hevc: true,
            width,
            height,
        } => build_hvc1(track, width, height)?,
        TrackKind::Audio {
            channel_count,
            sample_rate,
        } => build_mp4a(track, channel_count, sample_rate, 0x40),
        TrackKind::Private {
            object_type_indication,
        } => build_mp4s(track, object_type_indication),
    };
    Ok(mp4::Boxes::new(mp4::Stsd {
        full_box: mp4::FullBox::default(),
        entry_count: 1,
    })
    .with_child(entry))
}

fn build_avc1(track: &MuxTrack, width: u32, height: u32) -> Result<mp4::Boxes, MuxError> {
    let avc1 = mp4::Avc1 {
        sample_entry: mp4::SampleEntry {
            reserved: [0; 6],
            data_reference_index: 1,
        },
        pre_defined: 0,
        reserved: 0,
        pre_defined2: [0; 3],
        width: u16::try_from(width)?,
        height: u16::try_from(height)?,
        horiz_resolution: 0x0048_0000,
        vert_resolution: 0x0048_0000,
        reserved2: 0,
        frame_count: 1,
        compressor_name: [0; 32],
        depth: 24,
        pre_defined3: -1,
    };

    let sps = track
        .sps
        .first()
        .ok_or(MuxError::MissingParameterSet(track.track_id, "sps"))?;
    // The high-profile extension fields are never emitted here rather
    // than parsing the SPS to see whether the profile allows them.
    let avcc = mp4::AvcC {
        configuration_version: 1,
        profile: sps.get(1).copied().unwrap_or(0),
        profile_compatibility: sps.get(2).copied().unwrap_or(0),
        level: sps.get(3).copied().unwrap_or(0),
        reserved: 0b11_1111,
        length_size_minus_one: 3,
        reserved2: 0b111,
        num_of_sequence_parameter_sets: u8::try_from(track.sps.len())?,
        sequence_parameter_sets: track
            .sps
            .iter()
            .cloned()
            .map(mp4::AvcParameterSet::new)
            .collect(),
        num_of_picture_parameter_sets: u8::try_from(track.pps.len())?,
        picture_parameter_sets: track
            .pps
            .iter()
            .cloned()
            .map(mp4::AvcParameterSet::new)
            .collect(),
        high_profile_fields_enabled: false,
        reserved3: 0,
        chroma_format: 0,
        reserved4: 0,
        bitdepth_luma_minus_8: 0,
        reserved5: 0,
        bitdepth_chroma_minus_8: 0,
        num_of_sequence_parameter_set_ext: 0,
        sequence_parameter_sets_ext: Vec::new(),
    };

    Ok(mp4::Boxes::new(avc1).with_child(mp4::Boxes::new(avcc)))
}

fn build_hvc1(track: &MuxTrack, width: u32, height: u32) -> Result<mp4::Boxes, MuxError> {
    let hvc1 = mp4::Hvc1 {
        sample_entry: mp4::SampleEntry {
            reserved: [0; 6],
            data_reference_index: 1,
        },
        pre_defined: 0,
        reserved: 0,
        pre_defined2: [0; 3],
        width: u16::try_from(width)?,
        height: u16::try_from(height)?,
        horiz_resolution: 0x0048_0000,
        vert_resolution: 0x0048_0000,
        reserved2: 0,
        frame_count: 1,
        compressor_name: [0; 32],
        depth: 24,
        pre_defined3: -1,
    };

    let mut parameter_sets = Vec::new();
    if !track.vps.is_empty() {
        parameter_sets.push(mp4::HvcParameterSet {
            array_completeness: true,
            nal_unit_type: 32,
            nal_units: track.vps.clone(),
        });
    }
    if track.sps.is_empty() {
        return Err(MuxError::MissingParameterSet(track.track_id, "sps"));
    }
    parameter_sets.push(mp4::HvcParameterSet {
        array_completeness: true,
        nal_unit_type: 33,
        nal_units: track.sps.clone(),
    });
    if !track.pps.is_empty() {
        parameter_sets.push(mp4::HvcParameterSet {
            array_completeness: true,
            nal_unit_type: 34,
            nal_units: track.pps.clone(),
        });
    }

    // Profile/tier/level fields are hardcoded placeholders, same as the C
    // original: deriving them for real means parsing the VPS/SPS profile_
    // tier_level() structure, which is out of scope here.
    let hvcc = mp4::HvcC {
        configuration_version: 1,
        general_profile_space: 0,
        general_tier_flag: false,
        general_profile_idc: 1,
        general_profile_compatibility_flags: 0x6000_0000,
        general_constraint_indicator_flags: 0,
        general_level_idc: 120,
        min_spatial_segmentation_idc: 0,
        parallelism_type: 0,
        chroma_format_idc: 1,
        bit_depth_luma_minus8: 0,
        bit_depth_chroma_minus8: 0,
        avg_frame_rate: 0,
        constant_frame_rate: 0,
        num_temporal_layers: 1,
        temporal_id_nested: true,
        length_size_minus_one: 3,
        parameter_sets,
    };

    Ok(mp4::Boxes::new(hvc1).with_child(mp4::Boxes::new(hvcc)))
}

fn build_mp4a(
    track: &MuxTrack,
    channel_count: u16,
    sample_rate: u32,
    object_type_indication: u8,
) -> mp4::Boxes {
    let mp4a = mp4::Mp4a {
        sample_entry: mp4::SampleEntry {
            reserved: [0; 6],
            data_reference_index: 1,
        },
        reserved: [0; 2],
        channel_count,
        sample_size: 16,
        pre_defined: 0,
        reserved2: 0,
        sample_rate: sample_rate << 16,
    };

    let esds = mp4::Esds {
        full_box: mp4::FullBox::default(),
        es_id: u16::try_from(track.track_id).unwrap_or(0),
        object_type_indication,
        stream_type: 0x05, // audio stream
        buffer_size_db: 0,
        max_bitrate: 0,
        avg_bitrate: 0,
        decoder_specific_info: track.dsi.clone().unwrap_or_default(),
    };

    mp4::Boxes::new(mp4a).with_child(mp4::Boxes::new(esds))
}

/// Generic stream sample entry for tracks that are neither audio nor video;
/// `esds` still carries the decoder-specific-info bytes if the caller set any.
fn build_mp4s(track: &MuxTrack, object_type_indication: u8) -> mp4::Boxes {
    let mp4s = mp4::Mp4s {
        sample_entry: mp4::SampleEntry {
            reserved: [0; 6],
            data_reference_index: 1,
        },
    };

    let esds = mp4::Esds {
        full_box: mp4::FullBox::default(),
        es_id: u16::try_from(track.track_id).unwrap_or(0),
        object_type_indication,
        stream_type: 0x20, // private/user stream
        buffer_size_db: 0,
        max_bitrate: 0,
        avg_bitrate: 0,
        decoder_specific_info: track.dsi.clone().unwrap_or_default(),
    };

    mp4::Boxes::new(mp4s).with_child(mp4::Boxes::new(esds))
}

/// Run-length encodes sample durations into `stts` entries while walking
/// samples in order.
fn build_stts(samples: &[SampleDescriptor]) -> Vec<mp4::SttsEntry> {
    let mut entries: Vec<mp4::SttsEntry> = Vec::new();
    for sample in samples {
        match entries.last_mut() {
            Some(last) if last.sample_delta == sample.duration => last.sample_count += 1,
            _ => entries.push(mp4::SttsEntry {
                sample_count: 1,
                sample_delta: sample.duration,
            }),
        }
    }
    entries
}

fn build_stco(samples: &[SampleDescriptor]) -> Result<mp4::Boxes, MuxError> {
    let needs_co64 = samples.iter().any(|s| s.offset > u64::from(u32::MAX));
    if needs_co64 {
        Ok(mp4::Boxes::new(mp4::Co64 {
            full_box: mp4::FullBox::default(),
            chunk_offsets: samples.iter().map(|s| s.offset).collect(),
        }))
    } else {
        let offsets = samples
            .iter()
            .map(|s| u32::try_from(s.offset))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(mp4::Boxes::new(mp4::Stco {
            full_box: mp4::FullBox::default(),
            chunk_offsets: offsets,
        }))
    }
}

/// `None` when every sample is a random-access point, matching the demux
/// side's convention of treating a missing `stss` as all-sync.
fn build_stss(samples: &[SampleDescriptor]) -> Option<Vec<u32>> {
    if samples.iter().all(|s| s.is_sync) {
        return None;
    }
    Some(
        samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_sync)
            .map(|(i, _)| u32::try_from(i + 1).unwrap_or(u32::MAX))
            .collect(),
    )
}

/// Builds one `moof` carrying a single sample for `track_id`. `data_offset`
/// is the byte offset from the start of this `moof` to the sample's first
/// byte in the `mdat` that immediately follows; callers compute it by
/// building a throwaway fragment with `data_offset = 0` to measure
/// `moof.size()`, then rebuilding with the real value.
pub(crate) fn build_moof(
    track_id: u32,
    sequence_number: u32,
    base_media_decode_time: u64,
    sample: &SampleDescriptor,
    data_offset: i32,
) -> Result<mp4::Boxes, MuxError> {
    let trun_flags = mp4::TRUN_DATA_OFFSET_PRESENT
        | mp4::TRUN_SAMPLE_DURATION_PRESENT
        | mp4::TRUN_SAMPLE_SIZE_PRESENT
        | mp4::TRUN_SAMPLE_FLAGS_PRESENT;
    let sample_flags: u32 = if sample.is_sync { 0x0200_0000 } else { 0x0101_0000 };
    let sample_size = u32::try_from(sample.size)?;

    Ok(mp4::Boxes::new(mp4::Moof).with_children2(
        mp4::Boxes::new(mp4::Mfhd {
            full_box: mp4::FullBox::default(),
            sequence_number,
        }),
        mp4::Boxes::new(mp4::Traf).with_children3(
            mp4::Boxes::new(mp4::Tfhd {
                full_box: mp4::FullBox {
                    version: 0,
                    flags: mp4::u32_to_flags(mp4::TFHD_DEFAULT_SAMPLE_FLAGS_PRESENT),
                },
                track_id,
                default_sample_flags: sample_flags,
                ..Default::default()
            }),
            mp4::Boxes::new(mp4::Tfdt {
                flags: [0, 0, 0],
                base_media_decode_time: mp4::TfdtBaseMediaDecodeTime::V1(base_media_decode_time),
            }),
            mp4::Boxes::new(mp4::Trun {
                flags: mp4::u32_to_flags(trun_flags),
                data_offset,
                first_sample_flags: 0,
                entries: mp4::TrunEntries::V0(vec![mp4::TrunEntryV0 {
                    sample_duration: sample.duration,
                    sample_size,
                    sample_flags,
                    sample_composition_time_offset: 0,
                }]),
            }),
        ),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample(offset: u64, size: u64, duration: u32, is_sync: bool) -> SampleDescriptor {
        SampleDescriptor { offset, size, duration, is_sync }
    }

    #[test]
    fn stts_coalesces_equal_runs() {
        let samples = vec![
            sample(0, 10, 3000, true),
            sample(10, 10, 3000, false),
            sample(20, 10, 1500, false),
        ];
        let entries = build_stts(&samples);
        assert_eq!(2, entries.len());
        assert_eq!(2, entries[0].sample_count);
        assert_eq!(3000, entries[0].sample_delta);
        assert_eq!(1, entries[1].sample_count);
        assert_eq!(1500, entries[1].sample_delta);
    }

    #[test]
    fn stss_omitted_when_all_sync() {
        let samples = vec![sample(0, 10, 1, true), sample(10, 10, 1, true)];
        assert!(build_stss(&samples).is_none());
    }

    #[test]
    fn stss_lists_sync_samples_only() {
        let samples = vec![
            sample(0, 10, 1, true),
            sample(10, 10, 1, false),
            sample(20, 10, 1, true),
        ];
        assert_eq!(Some(vec![1, 3]), build_stss(&samples));
    }

    #[test]
    fn stco_picks_co64_once_an_offset_overflows_u32() {
        let samples = vec![sample(u64::from(u32::MAX) + 1, 10, 1, true)];
        let boxes = build_stco(&samples).unwrap();
        assert_eq!(*b"co64", boxes.mp4_box.box_type());
    }
}
