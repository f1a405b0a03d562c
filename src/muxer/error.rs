// SPDX-License-Identifier: GPL-2.0-or-later

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("unknown track {0}")]
    UnknownTrack(u32),

    #[error("track {0} already has a decoder-specific-info/SPS slot filled")]
    OnlyOneDsiAllowed(u32),

    #[error("track {0} is not a video track")]
    NotVideoTrack(u32),

    #[error("track {0} is not an audio track")]
    NotAudioTrack(u32),

    #[error("track {0} has no {1} set")]
    MissingParameterSet(u32, &'static str),

    #[error("width/height must be non-zero for a video track")]
    BadArguments,

    #[error("no pending sample buffered for track {0}")]
    NoPendingSample(u32),

    #[error("box assembly: {0}")]
    Mp4(#[from] mp4::Mp4Error),

    #[error("write: {0}")]
    Write(#[from] std::io::Error),

    #[error("int conversion: {0}")]
    FromInt(#[from] std::num::TryFromIntError),
}
