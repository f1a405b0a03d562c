// SPDX-License-Identifier: GPL-2.0-or-later

//! The read side of the async I/O boundary. The demuxer never owns a file
//! handle directly; the host hands it something that can satisfy random
//! reads, the same way the muxer is handed something that can satisfy
//! random writes.

use async_trait::async_trait;

#[async_trait]
pub trait AsyncSource: Send {
    async fn read(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), std::io::Error>;
}
