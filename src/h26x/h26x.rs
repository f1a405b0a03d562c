// SPDX-License-Identifier: GPL-2.0-or-later

mod adapter;
mod bits;
mod nal;
mod params;

pub use adapter::{H26xAdapter, H26xAdapterError, MuxSink, SampleKind};
pub use bits::{BitReader, BitWriter, BitsError};
pub use nal::{emit_emulation_prevention, strip_emulation_prevention, NalUnits};
pub use params::{Codec, H26xError, ParamSetCache};
