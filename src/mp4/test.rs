#![allow(clippy::cast_possible_truncation, clippy::as_conversions)]

use crate::*;
use pretty_assertions::assert_eq;
use test_case::test_case;

#[test_case(
        Box::new(Btrt{
            buffer_size_db: 0x1234_5678,
            max_bitrate: 0x3456_789a,
            avg_bitrate: 0x5678_9abc,
        }),
        &[
            0x12, 0x34, 0x56, 0x78, // buffer_size_db.
            0x34, 0x56, 0x78, 0x9a, // max_bitrate.
            0x56, 0x78, 0x9a, 0xbc, // avg_bitrate.
        ]; "btrt"
    )]
#[test_case(
        Box::new(Ctts{
            flags: [0, 0, 0],
            entries: CttsEntries::V0(vec![
                CttsEntryV0{ sample_count: 0x0123_4567, sample_offset: 0x1234_5678 },
                CttsEntryV0{ sample_count: 0x89ab_cdef, sample_offset: 0x789a_bcde },
            ]),
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x00, 0x00, 0x00, 0x02, // entry count
            0x01, 0x23, 0x45, 0x67, // sample count
            0x12, 0x34, 0x56, 0x78, // sample offset
            0x89, 0xab, 0xcd, 0xef, // sample count
            0x78, 0x9a, 0xbc, 0xde, // sample offset
        ]; "ctts: version 0"
    )]
#[test_case(
        Box::new(Ctts{
            flags: [0, 0, 0],
            entries: CttsEntries::V1(vec![
                CttsEntryV1{ sample_count: 0x0123_4567, sample_offset: -2 },
            ]),
        }),
        &[
            1,                // version
            0x00, 0x00, 0x00, // flags
            0x00, 0x00, 0x00, 0x01, // entry count
            0x01, 0x23, 0x45, 0x67, // sample count
            0xff, 0xff, 0xff, 0xfe, // sample offset (-2)
        ]; "ctts: version 1"
    )]
#[test_case(Box::new(Dinf{}), &[]; "dinf")]
#[test_case(
        Box::new(Dref{
            full_box: FullBox{ version: 0, flags: [0, 0, 0] },
            entry_count: 1,
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x00, 0x00, 0x00, 0x01, // entry count
        ]; "dref"
    )]
#[test_case(
        Box::new(Url{
            full_box: FullBox{ version: 0, flags: [0, 0, URL_NOPT as u8] },
            location: String::new(),
        }),
        &[
            0,                // version
            0x00, 0x00, 0x01, // flags
        ]; "url"
    )]
#[test_case(
        Box::new(Ftyp{
            major_brand: *b"isom",
            minor_version: 0x0000_0200,
            compatible_brands: vec![
                CompatibleBrandElem(*b"isom"),
                CompatibleBrandElem(*b"iso2"),
                CompatibleBrandElem(*b"mp41"),
            ],
        }),
        &[
            b'i', b's', b'o', b'm', // major brand
            0x00, 0x00, 0x02, 0x00, // minor version
            b'i', b's', b'o', b'm',
            b'i', b's', b'o', b'2',
            b'm', b'p', b'4', b'1',
        ]; "ftyp"
    )]
#[test_case(
        Box::new(Hdlr{
            full_box: FullBox{ version: 0, flags: [0, 0, 0] },
            pre_defined: 0,
            handler_type: *b"vide",
            reserved: [0; 3],
            name: "VideoHandler".to_owned(),
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x00, 0x00, 0x00, 0x00, // pre_defined
            b'v', b'i', b'd', b'e', // handler_type
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, // reserved
            b'V', b'i', b'd', b'e', b'o', b'H', b'a', b'n', b'd', b'l', b'e', b'r', 0x00, // name
        ]; "hdlr"
    )]
#[test_case(Box::new(Mdia{}), &[]; "mdia")]
#[test_case(
        Box::new(Mdhd{
            flags: [0, 0, 0],
            version: MdhdVersion::V0(MdhdV0{
                creation_time: 0x1234_5678,
                modification_time: 0x2345_6789,
                duration: 0x0203_0405,
            }),
            timescale: 0x0102_0304,
            pad: true,
            language: [b'j' - 0x60, b'p' - 0x60, b'n' - 0x60], // 0x0a, 0x10, 0x0e
            pre_defined: 0,
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x12, 0x34, 0x56, 0x78, // creation time
            0x23, 0x45, 0x67, 0x89, // modification time
            0x01, 0x02, 0x03, 0x04, // timescale
            0x02, 0x03, 0x04, 0x05, // duration
            0xaa, 0x0e, // pad, language (1 01010 10000 01110)
            0x00, 0x00, // pre defined
        ]; "mdhd: version 0"
    )]
#[test_case(
        Box::new(Mdhd{
            flags: [0, 0, 0],
            version: MdhdVersion::V1(MdhdV1{
                creation_time: 0x1234_5678_9abc_def0,
                modification_time: 0x2345_6789_abcd_ef01,
                duration: 0x0203_0405_0607_0809,
            }),
            timescale: 0x0102_0304,
            pad: true,
            language: [b'j' - 0x60, b'p' - 0x60, b'n' - 0x60],
            pre_defined: 0,
        }),
        &[
            1,                // version
            0x00, 0x00, 0x00, // flags
            0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, // creation time
            0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, // modification time
            0x01, 0x02, 0x03, 0x04, // timescale
            0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, // duration
            0xaa, 0x0e, // pad, language
            0x00, 0x00, // pre defined
        ]; "mdhd: version 1"
    )]
#[test_case(
        Box::new(Mdhd{
            flags: [0, 0, 0],
            version: MdhdVersion::V0(MdhdV0::default()),
            timescale: 0x0102_0304,
            pad: false,
            language: *b"und",
            pre_defined: 0,
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x0, 0x0, 0x0, 0x0, // creation time
            0x0, 0x0, 0x0, 0x0, // modification time
            0x01, 0x02, 0x03, 0x04, // timescale
            0x00, 0x00, 0x00, 0x00, // duration
            0x55, 0xc4, // pad, language
            0x00, 0x00, // pre defined
        ]; "mdhd: language"
    )]
#[test_case(
        Box::new(Mfhd{
            full_box: FullBox{ version: 0, flags: [0, 0, 0] },
            sequence_number: 7,
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x00, 0x00, 0x00, 0x07, // sequence number
        ]; "mfhd"
    )]
#[test_case(Box::new(Minf{}), &[]; "minf")]
#[test_case(Box::new(Moof{}), &[]; "moof")]
#[test_case(Box::new(Moov{}), &[]; "moov")]
#[test_case(Box::new(Mvex{}), &[]; "mvex")]
#[test_case(
        Box::new(Mvhd{
            flags: [0, 0, 0],
            version: MvhdVersion::V0(MvhdV0{
                creation_time: 0x0123_4567,
                modification_time: 0x2345_6789,
                duration: 0x6789_abcd,
            }),
            timescale: 0x4567_89ab,
            rate: -0x0123_4567,
            volume: 0x0123,
            reserved: 0,
            reserved2: [0; 2],
            matrix: [0; 9],
            pre_defined: [0; 6],
            next_track_id: 0xabcd_ef01,
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x01, 0x23, 0x45, 0x67, // creation time
            0x23, 0x45, 0x67, 0x89, // modification time
            0x45, 0x67, 0x89, 0xab, // timescale
            0x67, 0x89, 0xab, 0xcd, // duration
            0xfe, 0xdc, 0xba, 0x99, // rate
            0x01, 0x23, // volume
            0x00, 0x00, // reserved
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // reserved2
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // matrix
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // pre-defined
            0xab, 0xcd, 0xef, 0x01, // next track ID
        ]; "mvhd: version 0"
    )]
#[test_case(
        Box::new(Mvhd{
            flags: [0, 0, 0],
            version: MvhdVersion::V1(MvhdV1{
                creation_time: 0x0123_4567_89ab_cdef,
                modification_time: 0x2345_6789_abcd_ef01,
                duration: 0x4567_89ab_cdef_0123,
            }),
            timescale: 0x89ab_cdef,
            rate: -0x0123_4567,
            volume: 0x0123,
            reserved: 0,
            reserved2: [0; 2],
            matrix: [0; 9],
            pre_defined: [0; 6],
            next_track_id: 0xabcd_ef01,
        }),
        &[
            1,                // version
            0x00, 0x00, 0x00, // flags
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, // creation time
            0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, // modification time
            0x89, 0xab, 0xcd, 0xef, // timescale
            0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, 0x23, // duration
            0xfe, 0xdc, 0xba, 0x99, // rate
            0x01, 0x23, // volume
            0x00, 0x00, // reserved
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // reserved2
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // matrix
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // pre-defined
            0xab, 0xcd, 0xef, 0x01, // next track ID
        ]; "mvhd: version 1"
    )]
#[test_case(
        Box::new(Avc1{
            sample_entry: SampleEntry{ reserved: [0; 6], data_reference_index: 1 },
            pre_defined: 0,
            reserved: 0,
            pre_defined2: [0; 3],
            width: 1920,
            height: 1080,
            horiz_resolution: 0x0048_0000,
            vert_resolution: 0x0048_0000,
            reserved2: 0,
            frame_count: 1,
            compressor_name: [0; 32],
            depth: 0x0018,
            pre_defined3: -1,
        }),
        &[
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // sample entry reserved
            0x00, 0x01, // data reference index
            0x00, 0x00, // pre_defined
            0x00, 0x00, // reserved
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // pre_defined2
            0x07, 0x80, // width
            0x04, 0x38, // height
            0x00, 0x48, 0x00, 0x00, // horiz res
            0x00, 0x48, 0x00, 0x00, // vert res
            0x00, 0x00, 0x00, 0x00, // reserved2
            0x00, 0x01, // frame count
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // compressor_name
            0x00, 0x18, // depth
            0xff, 0xff, // pre_defined3
        ]; "avc1"
    )]
#[test_case(
        Box::new(AvcC{
            configuration_version: 0x12,
            profile: AVC_MAIN_PROFILE,
            profile_compatibility: 0x40,
            level: 0x1f,
            reserved: 0x3f,
            length_size_minus_one: 0x2,
            reserved2: 0x7,
            num_of_sequence_parameter_sets: 2,
            sequence_parameter_sets: vec![
                AvcParameterSet::new(vec![0x12, 0x34]),
                AvcParameterSet::new(vec![0x12, 0x34, 0x56]),
            ],
            num_of_picture_parameter_sets: 2,
            picture_parameter_sets: vec![
                AvcParameterSet::new(vec![0xab, 0xcd]),
                AvcParameterSet::new(vec![0xab, 0xcd, 0xef]),
            ],
            high_profile_fields_enabled: false,
            reserved3: 0,
            chroma_format: 0,
            reserved4: 0,
            bitdepth_luma_minus_8: 0,
            reserved5: 0,
            bitdepth_chroma_minus_8: 0,
            num_of_sequence_parameter_set_ext: 0,
            sequence_parameter_sets_ext: vec![],
        }),
        &[
            0x12,       // configuration version
            0x4d,       // profile
            0x40,       // profile compatibility
            0x1f,       // level
            0xfe,       // reserved, lengthSizeMinusOne
            0xe2,       // reserved, numOfsequence_parameter_sets
            0x00, 0x02, // length
            0x12, 0x34, // nalUnit
            0x00, 0x03, // length
            0x12, 0x34, 0x56, // nalUnit
            0x02,       // numOfpicture_parameter_sets
            0x00, 0x02, // length
            0xab, 0xcd, // nalUnit
            0x00, 0x03, // length
            0xab, 0xcd, 0xef, // nalUnit
        ]; "AvcC main profile"
    )]
#[test_case(
        Box::new(AvcC{
            configuration_version: 0x12,
            profile: AVC_HIGH_PROFILE,
            profile_compatibility: 0x00,
            level: 0x28,
            reserved: 0x3f,
            length_size_minus_one: 0x2,
            reserved2: 0x7,
            num_of_sequence_parameter_sets: 1,
            sequence_parameter_sets: vec![AvcParameterSet::new(vec![0x01])],
            num_of_picture_parameter_sets: 1,
            picture_parameter_sets: vec![AvcParameterSet::new(vec![0x02])],
            high_profile_fields_enabled: true,
            reserved3: 0x3f,
            chroma_format: 0x1,
            reserved4: 0x1f,
            bitdepth_luma_minus_8: 0x2,
            reserved5: 0x1f,
            bitdepth_chroma_minus_8: 0x3,
            num_of_sequence_parameter_set_ext: 1,
            sequence_parameter_sets_ext: vec![AvcParameterSet::new(vec![0x03])],
        }),
        &[
            0x12,       // configuration version
            0x64,       // profile
            0x00,       // profile compatibility
            0x28,       // level
            0xfe,       // reserved, lengthSizeMinusOne
            0xe1,       // reserved, numOfsequence_parameter_sets
            0x00, 0x01, 0x01, // sps
            0x01,       // numOfpicture_parameter_sets
            0x00, 0x01, 0x02, // pps
            0xfd,       // reserved, chromaFormat
            0xfa,       // reserved, bitdepthLumaMinus8
            0xfb,       // reserved, bitdepthChromaMinus8
            0x01,       // numOfsequence_parameter_set_ext
            0x00, 0x01, 0x03, // sps ext
        ]; "AvcC high profile with extension"
    )]
#[test_case(Box::new(Stbl{}), &[]; "stbl")]
#[test_case(
        Box::new(Stco{
            full_box: FullBox{ version: 0, flags: [0, 0, 0] },
            chunk_offsets: vec![0x0000_0024, 0x0001_0024],
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x00, 0x00, 0x00, 0x02, // entry count
            0x00, 0x00, 0x00, 0x24,
            0x00, 0x01, 0x00, 0x24,
        ]; "stco"
    )]
#[test_case(
        Box::new(Co64{
            full_box: FullBox{ version: 0, flags: [0, 0, 0] },
            chunk_offsets: vec![0x1_0000_0024, 0x2_0000_0024],
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x00, 0x00, 0x00, 0x02, // entry count
            0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x24,
            0x00, 0x00, 0x00, 0x02, 0x00, 0x00, 0x00, 0x24,
        ]; "co64"
    )]
#[test_case(
        Box::new(Stsc{
            full_box: FullBox{ version: 0, flags: [0, 0, 0] },
            entries: vec![StscEntry{
                first_chunk: 1,
                samples_per_chunk: 30,
                sample_description_index: 1,
            }],
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x00, 0x00, 0x00, 0x01, // entry count
            0x00, 0x00, 0x00, 0x01, // first chunk
            0x00, 0x00, 0x00, 0x1e, // samples per chunk
            0x00, 0x00, 0x00, 0x01, // sample description index
        ]; "stsc"
    )]
#[test_case(
        Box::new(Stsd{
            full_box: FullBox{ version: 0, flags: [0, 0, 0] },
            entry_count: 1,
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x00, 0x00, 0x00, 0x01, // entry count
        ]; "stsd"
    )]
#[test_case(
        Box::new(Stss{
            full_box: FullBox{ version: 0, flags: [0, 0, 0] },
            sample_numbers: vec![1, 31, 61],
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x00, 0x00, 0x00, 0x03, // entry count
            0x00, 0x00, 0x00, 0x01,
            0x00, 0x00, 0x00, 0x1f,
            0x00, 0x00, 0x00, 0x3d,
        ]; "stss"
    )]
#[test_case(
        Box::new(Stsz{
            full_box: FullBox{ version: 0, flags: [0, 0, 0] },
            sample_size: 512,
            sample_count: 10,
            entry_sizes: vec![],
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x00, 0x00, 0x02, 0x00, // common sample size
            0x00, 0x00, 0x00, 0x0a, // sample count
        ]; "stsz: common sample size"
    )]
#[test_case(
        Box::new(Stsz{
            full_box: FullBox{ version: 0, flags: [0, 0, 0] },
            sample_size: 0,
            sample_count: 2,
            entry_sizes: vec![100, 200],
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x00, 0x00, 0x00, 0x00, // sample size (varies per sample)
            0x00, 0x00, 0x00, 0x02, // sample count
            0x00, 0x00, 0x00, 0x64,
            0x00, 0x00, 0x00, 0xc8,
        ]; "stsz: sample size array"
    )]
#[test_case(
        Box::new(Stz2{
            full_box: FullBox{ version: 0, flags: [0, 0, 0] },
            reserved: [0; 3],
            field_size: 16,
            entry_sizes: vec![100, 200],
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x00, 0x00, 0x00, // reserved
            16,               // field size
            0x00, 0x00, 0x00, 0x02, // sample count
            0x00, 0x64,
            0x00, 0xc8,
        ]; "stz2: 16 bit"
    )]
#[test_case(
        Box::new(Stts{
            full_box: FullBox{ version: 0, flags: [0, 0, 0] },
            entries: vec![SttsEntry{ sample_count: 250, sample_delta: 3600 }],
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x00, 0x00, 0x00, 0x01, // entry count
            0x00, 0x00, 0x00, 0xfa, // sample count
            0x00, 0x00, 0x0e, 0x10, // sample delta
        ]; "stts"
    )]
#[test_case(
        Box::new(Tfdt{
            flags: [0, 0, 0],
            base_media_decode_time: TfdtBaseMediaDecodeTime::V0(0x0123_4567),
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x01, 0x23, 0x45, 0x67, // base media decode time
        ]; "tfdt: version 0"
    )]
#[test_case(
        Box::new(Tfdt{
            flags: [0, 0, 0],
            base_media_decode_time: TfdtBaseMediaDecodeTime::V1(0x0123_4567_89ab_cdef),
        }),
        &[
            1,                // version
            0x00, 0x00, 0x00, // flags
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, // base media decode time
        ]; "tfdt: version 1"
    )]
#[test_case(
        Box::new(Tfhd{
            full_box: FullBox{ version: 0, flags: [0, 0, 0] },
            track_id: 1,
            base_data_offset: 0,
            sample_descroption_index: 0,
            default_sample_duration: 0,
            default_sample_size: 0,
            default_sample_flags: 0,
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x00, 0x00, 0x00, 0x01, // track id
        ]; "tfhd: no flags"
    )]
#[test_case(
        Box::new(Tfhd{
            full_box: FullBox{
                version: 0,
                flags: u32_to_flags(TFHD_BASE_DATA_OFFSET_PRESENT | TFHD_DEFAULT_SAMPLE_DURATION_PRESENT),
            },
            track_id: 1,
            base_data_offset: 0x1122_3344_5566_7788,
            sample_descroption_index: 0,
            default_sample_duration: 3600,
            default_sample_size: 0,
            default_sample_flags: 0,
        }),
        &[
            0,                // version
            0x00, 0x00, 0x09, // flags
            0x00, 0x00, 0x00, 0x01, // track id
            0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, // base data offset
            0x00, 0x00, 0x0e, 0x10, // default sample duration
        ]; "tfhd: base data offset & default sample duration"
    )]
#[test_case(
        Box::new(Tkhd{
            flags: [0, 0, 7],
            version: TkhdVersion::V0(TkhdV0{
                creation_time: 0x0123_4567,
                modification_time: 0x2345_6789,
                duration: 0x0203_0405,
            }),
            track_id: 1,
            reserved0: 0,
            reserved1: [0; 2],
            layer: 0,
            alternate_group: 0,
            volume: 0,
            reserved2: 0,
            matrix: [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000],
            width: 1920 << 16,
            height: 1080 << 16,
        }),
        &[
            0,                // version
            0x00, 0x00, 0x07, // flags
            0x01, 0x23, 0x45, 0x67, // creation time
            0x23, 0x45, 0x67, 0x89, // modification time
            0x00, 0x00, 0x00, 0x01, // track id
            0x00, 0x00, 0x00, 0x00, // reserved0
            0x02, 0x03, 0x04, 0x05, // duration
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // reserved1
            0x00, 0x00, // layer
            0x00, 0x00, // alternate group
            0x00, 0x00, // volume
            0x00, 0x00, // reserved2
            0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00, // matrix
            0x07, 0x80, 0x00, 0x00, // width
            0x04, 0x38, 0x00, 0x00, // height
        ]; "tkhd version 0"
    )]
#[test_case(
        Box::new(Tkhd{
            flags: [0, 0, 7],
            version: TkhdVersion::V1(TkhdV1{
                creation_time: 0x0123_4567_89ab_cdef,
                modification_time: 0x2345_6789_abcd_ef01,
                duration: 0x0203_0405_0607_0809,
            }),
            track_id: 1,
            reserved0: 0,
            reserved1: [0; 2],
            layer: 0,
            alternate_group: 0,
            volume: 0,
            reserved2: 0,
            matrix: [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000],
            width: 1920 << 16,
            height: 1080 << 16,
        }),
        &[
            1,                // version
            0x00, 0x00, 0x07, // flags
            0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, // creation time
            0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef, 0x01, // modification time
            0x00, 0x00, 0x00, 0x01, // track id
            0x00, 0x00, 0x00, 0x00, // reserved0
            0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, // duration
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // reserved1
            0x00, 0x00, // layer
            0x00, 0x00, // alternate group
            0x00, 0x00, // volume
            0x00, 0x00, // reserved2
            0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00, // matrix
            0x07, 0x80, 0x00, 0x00, // width
            0x04, 0x38, 0x00, 0x00, // height
        ]; "tkhd version 1"
    )]
#[test_case(Box::new(Traf{}), &[]; "traf")]
#[test_case(Box::new(Trak{}), &[]; "trak")]
#[test_case(
        Box::new(Trex{
            full_box: FullBox{ version: 0, flags: [0, 0, 0] },
            track_id: 1,
            default_sample_description_index: 1,
            default_sample_duration: 3600,
            default_sample_size: 0,
            default_sample_flags: 0x0001_0000,
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x00, 0x00, 0x00, 0x01, // track id
            0x00, 0x00, 0x00, 0x01, // default sample description index
            0x00, 0x00, 0x0e, 0x10, // default sample duration
            0x00, 0x00, 0x00, 0x00, // default sample size
            0x00, 0x01, 0x00, 0x00, // default sample flags
        ]; "trex"
    )]
#[test_case(
        Box::new(Trun{
            flags: u32_to_flags(TRUN_SAMPLE_DURATION_PRESENT),
            data_offset: 0,
            first_sample_flags: 0,
            entries: TrunEntries::V0(vec![
                TrunEntryV0{ sample_duration: 100, sample_size: 0, sample_flags: 0, sample_composition_time_offset: 0 },
                TrunEntryV0{ sample_duration: 101, sample_size: 0, sample_flags: 0, sample_composition_time_offset: 0 },
            ]),
        }),
        &[
            0,                // version
            0x00, 0x01, 0x00, // flags
            0x00, 0x00, 0x00, 0x02, // sample count
            0x00, 0x00, 0x00, 0x64, // sample duration
            0x00, 0x00, 0x00, 0x65, // sample duration
        ]; "trun: version=0 duration only"
    )]
#[test_case(
        Box::new(Trun{
            flags: u32_to_flags(
                TRUN_DATA_OFFSET_PRESENT
                    | TRUN_SAMPLE_SIZE_PRESENT
                    | TRUN_SAMPLE_FLAGS_PRESENT
                    | TRUN_SAMPLE_COMPOSITION_TIME_OFFSET_PRESENT,
            ),
            data_offset: 0x32,
            first_sample_flags: 0,
            entries: TrunEntries::V0(vec![TrunEntryV0{
                sample_duration: 0,
                sample_size: 100,
                sample_flags: 0x0200_0000,
                sample_composition_time_offset: 200,
            }]),
        }),
        &[
            0,                // version
            0x00, 0x0e, 0x01, // flags
            0x00, 0x00, 0x00, 0x01, // sample count
            0x00, 0x00, 0x00, 0x32, // data offset
            0x00, 0x00, 0x00, 0x64, // sample size
            0x02, 0x00, 0x00, 0x00, // sample flags
            0x00, 0x00, 0x00, 0xc8, // composition time offset
        ]; "trun: version=0 data offset/size/flags/cts"
    )]
#[test_case(
        Box::new(Trun{
            flags: u32_to_flags(TRUN_SAMPLE_COMPOSITION_TIME_OFFSET_PRESENT),
            data_offset: 0,
            first_sample_flags: 0,
            entries: TrunEntries::V1(vec![TrunEntryV1{
                sample_duration: 0,
                sample_size: 0,
                sample_flags: 0,
                sample_composition_time_offset: -202,
            }]),
        }),
        &[
            1,                // version
            0x00, 0x08, 0x00, // flags
            0x00, 0x00, 0x00, 0x01, // sample count
            0xff, 0xff, 0xff, 0x36, // composition time offset (-202)
        ]; "trun: version=1 negative cts"
    )]
#[test_case(
        Box::new(Vmhd{
            full_box: FullBox{ version: 0, flags: [0, 0, 1] },
            graphics_mode: 0x0123,
            opcolor: [0x2345, 0x4567, 0x6789],
        }),
        &[
            0,                // version
            0x00, 0x00, 0x01, // flags
            0x01, 0x23, // graphics mode
            0x23, 0x45, 0x45, 0x67, 0x67, 0x89, // opcolor
        ]; "vmhd"
    )]
#[test_case(
        Box::new(Smhd{
            full_box: FullBox{ version: 0, flags: [0, 0, 0] },
            balance: 0,
            reserved: 0,
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x00, 0x00, // balance
            0x00, 0x00, // reserved
        ]; "smhd"
    )]
#[test_case(
        Box::new(Free(vec![0; 5])),
        &[0, 0, 0, 0, 0]; "free"
    )]
#[test_case(Box::new(Udta{}), &[]; "udta")]
#[test_case(Box::new(Ilst{}), &[]; "ilst")]
#[test_case(
        Box::new(Meta{
            full_box: FullBox{ version: 0, flags: [0, 0, 0] },
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
        ]; "meta"
    )]
#[test_case(
        Box::new(MetaTag{
            tag: *b"\xa9cmt",
            value: "hi".to_owned(),
        }),
        &[
            0x00, 0x00, 0x00, 0x12, b'd', b'a', b't', b'a', // data box header, size 18
            0x00, 0x00, 0x00, 0x01, // type indicator: UTF-8
            0x00, 0x00, 0x00, 0x00, // locale indicator
            b'h', b'i', // value
        ]; "meta tag comment"
    )]
#[test_case(
        Box::new(Hvc1{
            sample_entry: SampleEntry{ reserved: [0; 6], data_reference_index: 1 },
            pre_defined: 0,
            reserved: 0,
            pre_defined2: [0; 3],
            width: 1920,
            height: 1080,
            horiz_resolution: 0x0048_0000,
            vert_resolution: 0x0048_0000,
            reserved2: 0,
            frame_count: 1,
            compressor_name: [0; 32],
            depth: 0x0018,
            pre_defined3: -1,
        }),
        &[
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // sample entry reserved
            0x00, 0x01, // data reference index
            0x00, 0x00, // pre_defined
            0x00, 0x00, // reserved
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // pre_defined2
            0x07, 0x80, // width
            0x04, 0x38, // height
            0x00, 0x48, 0x00, 0x00, // horiz res
            0x00, 0x48, 0x00, 0x00, // vert res
            0x00, 0x00, 0x00, 0x00, // reserved2
            0x00, 0x01, // frame count
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // compressor_name
            0x00, 0x18, // depth
            0xff, 0xff, // pre_defined3
        ]; "hvc1"
    )]
#[test_case(
        Box::new(HvcC{
            configuration_version: 1,
            general_profile_space: 0,
            general_tier_flag: false,
            general_profile_idc: 1,
            general_profile_compatibility_flags: 0x6000_0000,
            general_constraint_indicator_flags: 0x9000_0000_0000,
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
            parameter_sets: vec![
                HvcParameterSet{
                    array_completeness: true,
                    nal_unit_type: 33, // SPS
                    nal_units: vec![vec![0x12, 0x34]],
                },
            ],
        }),
        &[
            0x01,       // configuration version
            0x01,       // profile space/tier/profile idc
            0x60, 0x00, 0x00, 0x00, // profile compatibility
            0x90, 0x00, 0x00, 0x00, 0x00, 0x00, // constraint indicator
            0x78,       // level idc
            0xf0, 0x00, // reserved, min spatial segmentation
            0xfc,       // reserved, parallelism type
            0xfd,       // reserved, chroma format idc
            0xf8,       // reserved, bit depth luma
            0xf8,       // reserved, bit depth chroma
            0x00, 0x00, // avg frame rate
            0x0f,       // const frame rate, num temporal layers, temporal id nested, length size minus one
            0x01,       // num of arrays
            0xa1,       // array completeness, reserved, nal unit type (33)
            0x00, 0x01, // num nalus
            0x00, 0x02, 0x12, 0x34, // nalu
        ]; "hvcC"
    )]
#[test_case(
        Box::new(Mp4a{
            sample_entry: SampleEntry{ reserved: [0; 6], data_reference_index: 1 },
            reserved: [0; 2],
            channel_count: 2,
            sample_size: 16,
            pre_defined: 0,
            reserved2: 0,
            sample_rate: 48000 << 16,
        }),
        &[
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // sample entry reserved
            0x00, 0x01, // data reference index
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // reserved
            0x00, 0x02, // channel count
            0x00, 0x10, // sample size
            0x00, 0x00, // pre_defined
            0x00, 0x00, // reserved2
            0xbb, 0x80, 0x00, 0x00, // sample rate 48000.0
        ]; "mp4a"
    )]
#[test_case(
        Box::new(Esds{
            full_box: FullBox{ version: 0, flags: [0, 0, 0] },
            es_id: 1,
            object_type_indication: 0x40,
            stream_type: 0x05,
            buffer_size_db: 0,
            max_bitrate: 128_000,
            avg_bitrate: 128_000,
            decoder_specific_info: vec![0x12, 0x10],
        }),
        &[
            0,                // version
            0x00, 0x00, 0x00, // flags
            0x03, 0x19,       // ES_Descriptor tag, length=25
            0x00, 0x01,       // ES_ID
            0x00,             // flags
            0x04, 0x11,       // DecoderConfigDescriptor tag, length=17
            0x40,             // object type indication
            0x14,             // stream type << 2
            0x00, 0x00, 0x00, // buffer size db
            0x00, 0x01, 0xf4, 0x00, // max bitrate
            0x00, 0x01, 0xf4, 0x00, // avg bitrate
            0x05, 0x02,       // DecoderSpecificInfo tag, length=2
            0x12, 0x10,       // AudioSpecificConfig
            0x06, 0x01,       // SLConfigDescriptor tag, length=1
            0x02,             // predefined
        ]; "esds"
    )]
#[test_case(
        Box::new(Mp4s{
            sample_entry: SampleEntry{ reserved: [0; 6], data_reference_index: 1 },
        }),
        &[
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // sample entry reserved
            0x00, 0x01, // data reference index
        ]; "mp4s"
    )]
fn test_box_types(src: Box<dyn ImmutableBox>, bin: &[u8]) {
    let size = src.size();
    let boxes = Boxes {
        mp4_box: src,
        children: vec![],
    };

    let mut buf = Vec::<u8>::with_capacity(size);
    boxes.mp4_box.marshal(&mut buf).unwrap();

    assert_eq!({ size }, buf.len());
    assert_eq!(bin, buf);
}

#[test]
fn avcc_inconsistent_high_profile_is_an_error() {
    let avcc = AvcC {
        configuration_version: 1,
        profile: AVC_MAIN_PROFILE,
        profile_compatibility: 0,
        level: 0,
        reserved: 0,
        length_size_minus_one: 0,
        reserved2: 0,
        num_of_sequence_parameter_sets: 0,
        sequence_parameter_sets: vec![],
        num_of_picture_parameter_sets: 0,
        picture_parameter_sets: vec![],
        high_profile_fields_enabled: true,
        reserved3: 0,
        chroma_format: 0,
        reserved4: 0,
        bitdepth_luma_minus_8: 0,
        reserved5: 0,
        bitdepth_chroma_minus_8: 0,
        num_of_sequence_parameter_set_ext: 0,
        sequence_parameter_sets_ext: vec![],
    };
    let mut buf = Vec::new();
    assert!(matches!(
        avcc.marshal(&mut buf),
        Err(Mp4Error::InconsistentAvcProfile(AVC_MAIN_PROFILE))
    ));
}

#[test]
fn meta_tag_unmarshal_recovers_comment_value() {
    let tag = MetaTag {
        tag: *b"\xa9cmt",
        value: "recorded by camera 3".to_owned(),
    };
    let mut buf = Vec::new();
    tag.marshal(&mut buf).unwrap();

    let value = MetaTag::unmarshal(&buf).unwrap();
    assert_eq!("recorded by camera 3", value);
}
