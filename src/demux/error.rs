// SPDX-License-Identifier: GPL-2.0-or-later

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DemuxError {
    #[error("read: {0}")]
    Read(#[from] std::io::Error),

    #[error("box: {0}")]
    Box(#[from] mp4::Mp4Error),

    #[error("file is only {0} bytes, too small to contain a box tree")]
    FileTooSmall(u64),

    #[error("no moov box found")]
    MissingMoov,

    #[error("track {0} has no stsd sample entry")]
    MissingSampleEntry(u32),

    #[error("track {0} has no sample at index {1}, it only has {2}")]
    SampleOutOfRange(u32, u32, u32),

    #[error("track {0} not found")]
    UnknownTrack(u32),

    #[error("track {0} is not an H.264/H.265 track")]
    NotH26x(u32),

    #[error("track {0}: {1}")]
    InconsistentSampleTables(u32, &'static str),
}
