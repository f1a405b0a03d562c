// SPDX-License-Identifier: GPL-2.0-or-later

use async_trait::async_trait;

/// Destination a finished file is handed to, mirroring `demux::AsyncSource`
/// on the write side. `offset` is always the current end of what the muxer
/// has written so far; the one backward rewrite random-access mode needs
/// (patching the `mdat` size once the total payload length is known) is
/// applied inside the muxer's own buffer before anything reaches `write`,
/// so implementors never need to seek.
#[async_trait]
pub trait AsyncSink {
    async fn write(&mut self, offset: u64, buf: &[u8]) -> Result<(), std::io::Error>;
}
