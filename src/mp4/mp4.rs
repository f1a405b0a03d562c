#![allow(dead_code)]

#[cfg(test)]
mod test;

use std::io::Write;

use thiserror::Error;

// Mpeg box type.
pub type BoxType = [u8; 4];

//pub type ImmutableBoxes = Vec<dyn ImmutableBox>;

// ImmutableBox is the common trait of boxes.
pub trait ImmutableBox {
    // Type returns the BoxType.
    fn box_type(&self) -> BoxType;

    // Size returns the marshaled size in bytes.
    // The size must be known before marshaling
    // since the box header contains the size.
    fn size(&self) -> usize;

    // Marshal box to writer.
    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error>;
}

#[derive(Debug, Error)]
pub enum Mp4Error {
    #[error("write: {0}")]
    Write(#[from] std::io::Error),

    #[error("from int: {0} {1}")]
    FromInt(String, std::num::TryFromIntError),

    #[error("avcC: profile {0} does not support high profile fields")]
    InconsistentAvcProfile(u8),

    #[error("esds: descriptor payload of {0} bytes exceeds encodable length")]
    DescriptorTooLarge(usize),

    #[error("box header needs at least {0} bytes, only {1} available")]
    Truncated(usize, usize),

    #[error("box size {0} is smaller than its own header")]
    BadBoxSize(u64),

    #[error("{0}: unsupported FullBox version {1}")]
    UnsupportedVersion(&'static str, u8),

    #[error("{0}: descriptor tag {1:#x} exceeds its enclosing descriptor")]
    DescriptorOverrun(&'static str, u8),

    #[error("box tree nested deeper than the {0} frame limit")]
    TooDeep(usize),
}

// Tree of boxes that can be marshaled together.
pub struct Boxes {
    pub mp4_box: Box<dyn ImmutableBox>,
    pub children: Vec<Boxes>,
}

impl Boxes {
    #[must_use]
    pub fn new<T: Into<Box<dyn ImmutableBox>>>(mp4_box: T) -> Self {
        Self {
            mp4_box: mp4_box.into(),
            children: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_child(mut self, child: Boxes) -> Self {
        self.children.push(child);
        self
    }

    #[must_use]
    pub fn with_children2(mut self, child1: Boxes, child2: Boxes) -> Self {
        self.children.extend([child1, child2]);
        self
    }
    #[must_use]

    pub fn with_children3(mut self, child1: Boxes, child2: Boxes, child3: Boxes) -> Self {
        self.children.extend([child1, child2, child3]);
        self
    }

    #[must_use]
    pub fn with_children4(
        mut self,
        child1: Boxes,
        child2: Boxes,
        child3: Boxes,
        child4: Boxes,
    ) -> Self {
        self.children.extend([child1, child2, child3, child4]);
        self
    }

    #[must_use]
    pub fn with_children5(
        mut self,
        child1: Boxes,
        child2: Boxes,
        child3: Boxes,
        child4: Boxes,
        child5: Boxes,
    ) -> Self {
        self.children
            .extend([child1, child2, child3, child4, child5]);
        self
    }

    #[must_use]
    pub fn with_children6(
        mut self,
        child1: Boxes,
        child2: Boxes,
        child3: Boxes,
        child4: Boxes,
        child5: Boxes,
        child6: Boxes,
    ) -> Self {
        self.children
            .extend([child1, child2, child3, child4, child5, child6]);
        self
    }

    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn with_children7(
        mut self,
        child1: Boxes,
        child2: Boxes,
        child3: Boxes,
        child4: Boxes,
        child5: Boxes,
        child6: Boxes,
        child7: Boxes,
    ) -> Self {
        self.children
            .extend([child1, child2, child3, child4, child5, child6, child7]);
        self
    }

    // Size returns the total size of the box including children.
    #[must_use]
    pub fn size(&self) -> usize {
        let mut total = self.mp4_box.size() + 8;

        for child in &self.children {
            let size = child.size();
            total += size;
        }

        total
    }

    // Marshal box including children.
    pub fn marshal<W: Write>(&self, w: &mut W) -> Result<(), Mp4Error> {
        let size = self.size();

        write_box_info(w, size, self.mp4_box.box_type())?;

        // The size of a empty box is 8 bytes.
        if size != 8 {
            self.mp4_box.marshal(w)?;
        }

        for child in &self.children {
            child.marshal(w)?;
        }
        Ok(())
    }
}

pub fn write_box_info<W: Write + ?Sized>(w: &mut W, size: usize, typ: BoxType) -> Result<(), Mp4Error> {
    w.write_all(
        &u32::try_from(size)
            .map_err(|e| Mp4Error::FromInt("write box info".to_owned(), e))?
            .to_be_bytes(),
    )?;
    w.write_all(&typ)?;
    Ok(())
}

pub fn write_single_box<W: Write>(w: &mut W, b: &dyn ImmutableBox) -> Result<usize, Mp4Error> {
    let size = 8 + b.size();

    write_box_info(w, size, b.box_type())?;

    // The size of a empty box is 8 bytes.
    if size != 8 {
        b.marshal(w)?;
    }
    Ok(size)
}

/*
// Marshal ImmutableBoxes to writer.
fn (boxes ImmutableBoxes) marshal(&self, w: &mut dyn std::io::Write) -> Result<(), MarshalError> {
    for _, b := range boxes {
        if _, err := WriteSingleBox(w, b); err != nil {
            return err
        }
    }
    return nil
}

// Size combined size of boxes.
fn (boxes ImmutableBoxes) size(&self) -> usize {
    var n int
    for _, b := range boxes {
        n += 8
        n += b.Size()
    }
    return n
}

*/
/************************* FullBox **************************/

#[derive(Clone, Copy, Default)]
pub struct FullBox {
    pub version: u8,
    pub flags: [u8; 3],
}

impl FullBox {
    fn get_flags(self) -> u32 {
        parse_fullbox_flags(self.flags)
    }

    fn check_flag(self, flag: u32) -> bool {
        self.get_flags() & flag != 0
    }

    pub fn marshal_field(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        w.write_all(&[self.version])?;
        w.write_all(&self.flags)?;
        Ok(())
    }
}

fn parse_fullbox_flags(flags: [u8; 3]) -> u32 {
    (u32::from(flags[0]) << 16) ^ (u32::from(flags[1]) << 8) ^ (u32::from(flags[2]))
}

fn check_fullbox_flag(flags: [u8; 3], flag: u32) -> bool {
    let flags = parse_fullbox_flags(flags);
    flags & flag != 0
}

#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
pub fn u32_to_flags(v: u32) -> [u8; 3] {
    [(v >> 16) as u8, (v >> 8) as u8, v as u8]
}

/********************** box reading (demux side) ***********************/

fn read_u16(bytes: &[u8], at: usize) -> Result<u16, Mp4Error> {
    let slice = bytes
        .get(at..at + 2)
        .ok_or(Mp4Error::Truncated(at + 2, bytes.len()))?;
    Ok(u16::from_be_bytes(slice.try_into().expect("checked len")))
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32, Mp4Error> {
    let slice = bytes
        .get(at..at + 4)
        .ok_or(Mp4Error::Truncated(at + 4, bytes.len()))?;
    Ok(u32::from_be_bytes(slice.try_into().expect("checked len")))
}

fn read_u64(bytes: &[u8], at: usize) -> Result<u64, Mp4Error> {
    let slice = bytes
        .get(at..at + 8)
        .ok_or(Mp4Error::Truncated(at + 8, bytes.len()))?;
    Ok(u64::from_be_bytes(slice.try_into().expect("checked len")))
}

/// One parsed atom header: type, how many bytes the header itself took
/// (8 or 16, for the `largesize` form), and the payload length that follows.
#[derive(Debug, Clone, Copy)]
pub struct BoxHeader {
    pub box_type: BoxType,
    pub header_len: u64,
    pub payload_len: u64,
}

/// Parses the atom header at the front of `bytes`. `bytes_left_in_parent` is
/// the number of bytes remaining in the enclosing box or file, used to
/// resolve the `size == 0` ("extends to EOF") and `size == 0xFFFFFFFF` forms.
pub fn read_box_header(bytes: &[u8], bytes_left_in_parent: u64) -> Result<BoxHeader, Mp4Error> {
    if bytes.len() < 8 {
        return Err(Mp4Error::Truncated(8, bytes.len()));
    }
    let size32 = read_u32(bytes, 0)?;
    let box_type: BoxType = bytes[4..8].try_into().expect("checked len");
    match size32 {
        1 => {
            if bytes.len() < 16 {
                return Err(Mp4Error::Truncated(16, bytes.len()));
            }
            let largesize = read_u64(bytes, 8)?;
            let payload_len = largesize
                .checked_sub(16)
                .ok_or(Mp4Error::BadBoxSize(largesize))?;
            Ok(BoxHeader {
                box_type,
                header_len: 16,
                payload_len,
            })
        }
        0 | 0xFFFF_FFFF => Ok(BoxHeader {
            box_type,
            header_len: 8,
            payload_len: bytes_left_in_parent.saturating_sub(8),
        }),
        small => {
            let small = u64::from(small);
            let payload_len = small
                .checked_sub(8)
                .ok_or(Mp4Error::BadBoxSize(small))?;
            Ok(BoxHeader {
                box_type,
                header_len: 8,
                payload_len,
            })
        }
    }
}

/// Splits the leading `{version, flags}` FullBox header off `data`.
pub fn read_fullbox_header(data: &[u8]) -> Result<(FullBox, &[u8]), Mp4Error> {
    if data.len() < 4 {
        return Err(Mp4Error::Truncated(4, data.len()));
    }
    let full_box = FullBox {
        version: data[0],
        flags: [data[1], data[2], data[3]],
    };
    Ok((full_box, &data[4..]))
}

/// Tag byte + multi-byte length (7 bits per byte, MSB = continuation), as
/// used by the MPEG-4 object descriptor tree nested inside `esds`. Returns
/// `(tag, payload_len, bytes_consumed_by_the_header)`.
fn read_descriptor_header(data: &[u8]) -> Result<(u8, usize, usize), Mp4Error> {
    if data.is_empty() {
        return Err(Mp4Error::Truncated(1, 0));
    }
    let tag = data[0];
    let mut len: usize = 0;
    let mut consumed = 1;
    loop {
        let byte = *data
            .get(consumed)
            .ok_or(Mp4Error::Truncated(consumed + 1, data.len()))?;
        len = (len << 7) | usize::from(byte & 0x7f);
        consumed += 1;
        if byte & 0x80 == 0 {
            break;
        }
        if consumed > 5 {
            return Err(Mp4Error::DescriptorOverrun("object descriptor", tag));
        }
    }
    if consumed + len > data.len() {
        return Err(Mp4Error::DescriptorOverrun("object descriptor", tag));
    }
    Ok((tag, len, consumed))
}

/*************************** btrt ****************************/

pub const TYPE_BTRT: BoxType = *b"btrt";

pub struct Btrt {
    pub buffer_size_db: u32,
    pub max_bitrate: u32,
    pub avg_bitrate: u32,
}

impl ImmutableBox for Btrt {
    fn box_type(&self) -> BoxType {
        TYPE_BTRT
    }

    fn size(&self) -> usize {
        12
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        w.write_all(&self.buffer_size_db.to_be_bytes())?;
        w.write_all(&self.max_bitrate.to_be_bytes())?;
        w.write_all(&self.avg_bitrate.to_be_bytes())?;
        Ok(())
    }
}

impl From<Btrt> for Box<dyn ImmutableBox> {
    fn from(value: Btrt) -> Self {
        Box::new(value)
    }
}

/*************************** ctts ****************************/

pub const TYPE_CTTS: BoxType = *b"ctts";

pub struct Ctts {
    pub flags: [u8; 3],
    pub entries: CttsEntries,
}

pub enum CttsEntries {
    V0(Vec<CttsEntryV0>),
    V1(Vec<CttsEntryV1>),
}

#[derive(Clone, Copy)]
pub struct CttsEntryV0 {
    pub sample_count: u32,
    pub sample_offset: u32,
}

#[derive(Clone, Copy)]
pub struct CttsEntryV1 {
    pub sample_count: u32,
    pub sample_offset: i32,
}

impl ImmutableBox for Ctts {
    fn box_type(&self) -> BoxType {
        TYPE_CTTS
    }

    fn size(&self) -> usize {
        let num_entries = match &self.entries {
            CttsEntries::V0(v) => v.len(),
            CttsEntries::V1(v) => v.len(),
        };
        8 + num_entries * 8
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        match &self.entries {
            CttsEntries::V0(entries) => {
                w.write_all(&[0])?;
                w.write_all(&self.flags)?;

                w.write_all(
                    &(u32::try_from(entries.len())
                        .map_err(|e| Mp4Error::FromInt("ctts".to_owned(), e))?)
                    .to_be_bytes(),
                )?;
                for entry in entries {
                    w.write_all(&entry.sample_count.to_be_bytes())?;
                    w.write_all(&entry.sample_offset.to_be_bytes())?;
                }
            }
            CttsEntries::V1(entries) => {
                w.write_all(&[1])?;
                w.write_all(&self.flags)?;

                w.write_all(
                    &(u32::try_from(entries.len())
                        .map_err(|e| Mp4Error::FromInt("ctts".to_owned(), e))?)
                    .to_be_bytes(),
                )?;
                for entry in entries {
                    w.write_all(&entry.sample_count.to_be_bytes())?;
                    w.write_all(&entry.sample_offset.to_be_bytes())?;
                }
            }
        }

        Ok(())
    }
}

impl From<Ctts> for Box<dyn ImmutableBox> {
    fn from(value: Ctts) -> Self {
        Box::new(value)
    }
}

/*************************** dinf ****************************/

pub const TYPE_DINF: BoxType = *b"dinf";

pub struct Dinf;

impl ImmutableBox for Dinf {
    fn box_type(&self) -> BoxType {
        TYPE_DINF
    }

    fn size(&self) -> usize {
        0
    }

    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<Dinf> for Box<dyn ImmutableBox> {
    fn from(value: Dinf) -> Self {
        Box::new(value)
    }
}

/*************************** dref ****************************/

pub const TYPE_DREF: BoxType = *b"dref";

pub struct Dref {
    pub full_box: FullBox,
    pub entry_count: u32,
}

impl ImmutableBox for Dref {
    fn box_type(&self) -> BoxType {
        TYPE_DREF
    }

    fn size(&self) -> usize {
        8
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(&self.entry_count.to_be_bytes())?;
        Ok(())
    }
}

impl From<Dref> for Box<dyn ImmutableBox> {
    fn from(value: Dref) -> Self {
        Box::new(value)
    }
}

/*************************** url ****************************/

pub const TYPE_URL: BoxType = *b"url ";

pub struct Url {
    pub full_box: FullBox,
    pub location: String,
}

pub const URL_NOPT: u32 = 0x0000_0001;

impl ImmutableBox for Url {
    fn box_type(&self) -> BoxType {
        TYPE_URL
    }

    fn size(&self) -> usize {
        if self.full_box.check_flag(URL_NOPT) {
            4
        } else {
            self.location.len() + 5
        }
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        if !self.full_box.check_flag(URL_NOPT) {
            w.write_all((self.location.clone() + "\0").as_bytes())?;
        }
        Ok(())
    }
}

impl From<Url> for Box<dyn ImmutableBox> {
    fn from(value: Url) -> Self {
        Box::new(value)
    }
}

/*************************** edts ****************************/

pub const TYPE_EDTS: BoxType = *b"edts";

pub struct Edts;

impl ImmutableBox for Edts {
    fn box_type(&self) -> BoxType {
        TYPE_EDTS
    }

    fn size(&self) -> usize {
        0
    }

    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<Edts> for Box<dyn ImmutableBox> {
    fn from(value: Edts) -> Self {
        Box::new(value)
    }
}

/*************************** elst ****************************/

pub const TYPE_ELST: BoxType = *b"elst";

#[derive(Clone)]
pub struct Elst {
    pub flags: [u8; 3],
    pub entries: ElstEntries,
}

impl ImmutableBox for Elst {
    fn box_type(&self) -> BoxType {
        TYPE_ELST
    }

    fn size(&self) -> usize {
        match &self.entries {
            ElstEntries::V0(v) => 8 + v.len() * 12,
            ElstEntries::V1(v) => 8 + v.len() * 20,
        }
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        match &self.entries {
            ElstEntries::V0(entries) => {
                w.write_all(&[0])?;
                w.write_all(&self.flags)?;
                w.write_all(
                    &u32::try_from(entries.len())
                        .map_err(|e| Mp4Error::FromInt("elst".to_owned(), e))?
                        .to_be_bytes(),
                )?;
                for entry in entries {
                    w.write_all(&entry.segment_duration.to_be_bytes())?;
                    w.write_all(&entry.media_time.to_be_bytes())?;
                    w.write_all(&entry.media_rate_integer.to_be_bytes())?;
                    w.write_all(&entry.media_rate_fraction.to_be_bytes())?;
                }
            }
            ElstEntries::V1(entries) => {
                w.write_all(&[1])?;
                w.write_all(&self.flags)?;
                w.write_all(
                    &u32::try_from(entries.len())
                        .map_err(|e| Mp4Error::FromInt("elst".to_owned(), e))?
                        .to_be_bytes(),
                )?;
                for entry in entries {
                    w.write_all(&entry.segment_duration.to_be_bytes())?;
                    w.write_all(&entry.media_time.to_be_bytes())?;
                    w.write_all(&entry.media_rate_integer.to_be_bytes())?;
                    w.write_all(&entry.media_rate_fraction.to_be_bytes())?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub enum ElstEntries {
    V0(Vec<ElstEntryV0>),
    V1(Vec<ElstEntryV1>),
}

#[derive(Clone)]
pub struct ElstEntryV0 {
    pub segment_duration: u32,
    pub media_time: i32,
    pub media_rate_integer: i16,
    pub media_rate_fraction: i16,
}

impl Default for ElstEntryV0 {
    fn default() -> Self {
        Self {
            segment_duration: 0,
            media_time: 0,
            media_rate_integer: 1,
            media_rate_fraction: 0,
        }
    }
}

#[derive(Clone)]
pub struct ElstEntryV1 {
    pub segment_duration: u64,
    pub media_time: i64,
    pub media_rate_integer: i16,
    pub media_rate_fraction: i16,
}

impl Default for ElstEntryV1 {
    fn default() -> Self {
        Self {
            segment_duration: 0,
            media_time: 0,
            media_rate_integer: 1,
            media_rate_fraction: 0,
        }
    }
}

impl From<Elst> for Box<dyn ImmutableBox> {
    fn from(value: Elst) -> Self {
        Box::new(value)
    }
}

/*************************** ftyp ****************************/

pub const TYPE_FTYP: BoxType = *b"ftyp";

pub struct Ftyp {
    pub major_brand: [u8; 4],
    pub minor_version: u32,
    pub compatible_brands: Vec<CompatibleBrandElem>,
}

#[repr(transparent)]
pub struct CompatibleBrandElem(pub [u8; 4]);

impl ImmutableBox for Ftyp {
    fn box_type(&self) -> BoxType {
        TYPE_FTYP
    }

    fn size(&self) -> usize {
        8 + self.compatible_brands.len() * 4
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        w.write_all(&self.major_brand)?;
        w.write_all(&self.minor_version.to_be_bytes())?;
        for brands in &self.compatible_brands {
            w.write_all(&brands.0)?;
        }
        Ok(())
    }
}

impl From<Ftyp> for Box<dyn ImmutableBox> {
    fn from(value: Ftyp) -> Self {
        Box::new(value)
    }
}

/*************************** hdlr ****************************/

pub const TYPE_HDLR: BoxType = *b"hdlr";

#[derive(Default)]
pub struct Hdlr {
    pub full_box: FullBox,
    // Predefined corresponds to component_type of QuickTime.
    // pre_defined of ISO-14496 has albufays zero,
    // hobufever component_type has "mhlr" or "dhlr".
    pub pre_defined: u32,
    pub handler_type: [u8; 4],
    pub reserved: [u32; 3],
    pub name: String,
}

impl ImmutableBox for Hdlr {
    fn box_type(&self) -> BoxType {
        TYPE_HDLR
    }

    fn size(&self) -> usize {
        25 + self.name.len()
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(&self.pre_defined.to_be_bytes())?;
        w.write_all(&self.handler_type)?;
        for reserved in &self.reserved {
            w.write_all(&reserved.to_be_bytes())?;
        }
        w.write_all((self.name.clone() + "\0").as_bytes())?;
        Ok(())
    }
}

impl From<Hdlr> for Box<dyn ImmutableBox> {
    fn from(value: Hdlr) -> Self {
        Box::new(value)
    }
}

impl Hdlr {
    /// Extracts just the 4CC the demuxer keys its track kind on.
    pub fn unmarshal_handler_type(data: &[u8]) -> Result<[u8; 4], Mp4Error> {
        let (_, rest) = read_fullbox_header(data)?;
        let slice = rest
            .get(4..8)
            .ok_or(Mp4Error::Truncated(8, rest.len()))?;
        Ok(slice.try_into().expect("checked len"))
    }
}

/*************************** mdat ****************************/

pub const TYPE_MDAT: BoxType = *b"mdat";

pub struct Mdat(pub Vec<u8>);

impl ImmutableBox for Mdat {
    fn box_type(&self) -> BoxType {
        TYPE_MDAT
    }

    fn size(&self) -> usize {
        self.0.len()
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        w.write_all(&self.0)?;
        Ok(())
    }
}

impl From<Mdat> for Box<dyn ImmutableBox> {
    fn from(value: Mdat) -> Self {
        Box::new(value)
    }
}

/*************************** mdia ****************************/

pub const TYPE_MDIA: BoxType = *b"mdia";

pub struct Mdia;

impl ImmutableBox for Mdia {
    fn box_type(&self) -> BoxType {
        TYPE_MDIA
    }

    fn size(&self) -> usize {
        0
    }

    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<Mdia> for Box<dyn ImmutableBox> {
    fn from(value: Mdia) -> Self {
        Box::new(value)
    }
}

/*************************** mdhd ****************************/

pub const TYPE_MDHD: BoxType = *b"mdhd";

#[derive(Default)]
pub struct Mdhd {
    pub flags: [u8; 3],
    pub version: MdhdVersion,
    pub timescale: u32,

    pub pad: bool,         // 1 bit.
    pub language: [u8; 3], // 5 bits. ISO-639-2/T language code
    pub pre_defined: u16,
}

pub enum MdhdVersion {
    V0(MdhdV0),
    V1(MdhdV1),
}

impl Default for MdhdVersion {
    fn default() -> Self {
        Self::V0(MdhdV0::default())
    }
}

#[derive(Default)]
pub struct MdhdV0 {
    pub creation_time: u32,
    pub modification_time: u32,
    pub duration: u32,
}

pub struct MdhdV1 {
    pub creation_time: u64,
    pub modification_time: u64,
    pub duration: u64,
}

impl ImmutableBox for Mdhd {
    fn box_type(&self) -> BoxType {
        TYPE_MDHD
    }

    fn size(&self) -> usize {
        match self.version {
            MdhdVersion::V0(_) => 24,
            MdhdVersion::V1(_) => 36,
        }
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        match &self.version {
            MdhdVersion::V0(v) => {
                w.write_all(&[0])?;
                w.write_all(&self.flags)?;
                w.write_all(&v.creation_time.to_be_bytes())?;
                w.write_all(&v.modification_time.to_be_bytes())?;
                w.write_all(&self.timescale.to_be_bytes())?;
                w.write_all(&v.duration.to_be_bytes())?;
            }
            MdhdVersion::V1(v) => {
                w.write_all(&[1])?;
                w.write_all(&self.flags)?;
                w.write_all(&v.creation_time.to_be_bytes())?;
                w.write_all(&v.modification_time.to_be_bytes())?;
                w.write_all(&self.timescale.to_be_bytes())?;
                w.write_all(&v.duration.to_be_bytes())?;
            }
        }

        if self.pad {
            w.write_all(&[(0b0000_0001 << 7
                | (self.language[0] & 0b0001_1111) << 2
                | (self.language[1] & 0b0001_1111) >> 3)])?;
        } else {
            w.write_all(&[
                ((self.language[0] & 0b0001_1111) << 2 | (self.language[1] & 0b0001_1111) >> 3)
            ])?;
        }

        w.write_all(&[(self.language[1] << 5 | self.language[2] & 0b0001_1111)])?;
        w.write_all(&self.pre_defined.to_be_bytes())?;
        Ok(())
    }
}

impl From<Mdhd> for Box<dyn ImmutableBox> {
    fn from(value: Mdhd) -> Self {
        Box::new(value)
    }
}

pub struct ParsedMdhd {
    pub timescale: u32,
    pub duration: u64,
    pub language: [u8; 3],
}

impl Mdhd {
    pub fn unmarshal(data: &[u8]) -> Result<ParsedMdhd, Mp4Error> {
        let (full_box, rest) = read_fullbox_header(data)?;
        let (timescale, duration, lang_field_at) = match full_box.version {
            0 => (read_u32(rest, 8)?, u64::from(read_u32(rest, 12)?), 16),
            1 => (read_u32(rest, 16)?, read_u64(rest, 20)?, 28),
            v => return Err(Mp4Error::UnsupportedVersion("mdhd", v)),
        };
        // `language` stores the raw 5-bit codes (as `Mdhd::marshal` does), not
        // the offset-by-0x60 ASCII characters they represent.
        let packed = read_u16(rest, lang_field_at)?;
        let language = [
            u8::try_from((packed >> 10) & 0x1f).expect("5 bits fits in u8"),
            u8::try_from((packed >> 5) & 0x1f).expect("5 bits fits in u8"),
            u8::try_from(packed & 0x1f).expect("5 bits fits in u8"),
        ];
        Ok(ParsedMdhd {
            timescale,
            duration,
            language,
        })
    }
}

/*************************** mfhd ****************************/

pub const TYPE_MFHD: BoxType = *b"mfhd";

pub struct Mfhd {
    pub full_box: FullBox,
    pub sequence_number: u32,
}

impl ImmutableBox for Mfhd {
    fn box_type(&self) -> BoxType {
        TYPE_MFHD
    }

    fn size(&self) -> usize {
        8
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(&self.sequence_number.to_be_bytes())?;
        Ok(())
    }
}

impl From<Mfhd> for Box<dyn ImmutableBox> {
    fn from(value: Mfhd) -> Self {
        Box::new(value)
    }
}

/*************************** minf ****************************/

pub const TYPE_MINF: BoxType = *b"minf";

pub struct Minf;

impl ImmutableBox for Minf {
    fn box_type(&self) -> BoxType {
        TYPE_MINF
    }

    fn size(&self) -> usize {
        0
    }

    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<Minf> for Box<dyn ImmutableBox> {
    fn from(value: Minf) -> Self {
        Box::new(value)
    }
}

/*************************** moof ****************************/

pub const TYPE_MOOF: BoxType = *b"moof";

pub struct Moof;

impl ImmutableBox for Moof {
    fn box_type(&self) -> BoxType {
        TYPE_MOOF
    }

    fn size(&self) -> usize {
        0
    }

    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<Moof> for Box<dyn ImmutableBox> {
    fn from(value: Moof) -> Self {
        Box::new(value)
    }
}

/*************************** moov ****************************/

pub const TYPE_MOOV: BoxType = *b"moov";

pub struct Moov;

impl ImmutableBox for Moov {
    fn box_type(&self) -> BoxType {
        TYPE_MOOV
    }

    fn size(&self) -> usize {
        0
    }

    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<Moov> for Box<dyn ImmutableBox> {
    fn from(value: Moov) -> Self {
        Box::new(value)
    }
}

/*************************** mvex ****************************/

pub const TYPE_MVEX: BoxType = *b"mvex";

pub struct Mvex;

impl ImmutableBox for Mvex {
    fn box_type(&self) -> BoxType {
        TYPE_MVEX
    }

    fn size(&self) -> usize {
        0
    }

    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<Mvex> for Box<dyn ImmutableBox> {
    fn from(value: Mvex) -> Self {
        Box::new(value)
    }
}

/*************************** mvhd ****************************/

pub const TYPE_MVHD: BoxType = *b"mvhd";

#[derive(Default)]
pub struct Mvhd {
    pub flags: [u8; 3],
    pub version: MvhdVersion,
    pub timescale: u32,
    pub rate: i32,   // fixed-point 16.16 - template=0x00010000
    pub volume: i16, // template=0x0100
    pub reserved: i16,
    pub reserved2: [i32; 2],
    pub matrix: [i32; 9], // template={ 0x00010000,0,0,0,0x00010000,0,0,0,0x40000000 }
    pub pre_defined: [i32; 6],
    pub next_track_id: u32,
}

pub enum MvhdVersion {
    V0(MvhdV0),
    V1(MvhdV1),
}

impl Default for MvhdVersion {
    fn default() -> Self {
        Self::V0(MvhdV0::default())
    }
}

#[derive(Default)]
pub struct MvhdV0 {
    pub creation_time: u32,
    pub modification_time: u32,
    pub duration: u32,
}

pub struct MvhdV1 {
    pub creation_time: u64,
    pub modification_time: u64,
    pub duration: u64,
}

impl ImmutableBox for Mvhd {
    fn box_type(&self) -> BoxType {
        TYPE_MVHD
    }

    fn size(&self) -> usize {
        match self.version {
            MvhdVersion::V0(_) => 100,
            MvhdVersion::V1(_) => 112,
        }
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        match &self.version {
            MvhdVersion::V0(v) => {
                w.write_all(&[0])?;
                w.write_all(&self.flags)?;
                w.write_all(&v.creation_time.to_be_bytes())?;
                w.write_all(&v.modification_time.to_be_bytes())?;
                w.write_all(&self.timescale.to_be_bytes())?;
                w.write_all(&v.duration.to_be_bytes())?;
            }
            MvhdVersion::V1(v) => {
                w.write_all(&[1])?;
                w.write_all(&self.flags)?;
                w.write_all(&v.creation_time.to_be_bytes())?;
                w.write_all(&v.modification_time.to_be_bytes())?;
                w.write_all(&self.timescale.to_be_bytes())?;
                w.write_all(&v.duration.to_be_bytes())?;
            }
        }

        w.write_all(&self.rate.to_be_bytes())?;
        w.write_all(&self.volume.to_be_bytes())?;
        w.write_all(&self.reserved.to_be_bytes())?;

        for reserved in &self.reserved2 {
            w.write_all(&reserved.to_be_bytes())?;
        }
        for matrix in &self.matrix {
            w.write_all(&matrix.to_be_bytes())?;
        }
        for pre_defined in &self.pre_defined {
            w.write_all(&pre_defined.to_be_bytes())?;
        }

        w.write_all(&self.next_track_id.to_be_bytes())?;

        Ok(())
    }
}

impl From<Mvhd> for Box<dyn ImmutableBox> {
    fn from(value: Mvhd) -> Self {
        Box::new(value)
    }
}

/// Fields the demuxer actually needs out of `mvhd`: overall timescale and
/// duration. The rest of the box (rate, volume, matrix, `next_track_id`) is
/// write-side only.
pub struct ParsedMvhd {
    pub timescale: u32,
    pub duration: u64,
}

impl Mvhd {
    pub fn unmarshal(data: &[u8]) -> Result<ParsedMvhd, Mp4Error> {
        let (full_box, rest) = read_fullbox_header(data)?;
        match full_box.version {
            0 => Ok(ParsedMvhd {
                timescale: read_u32(rest, 8)?,
                duration: u64::from(read_u32(rest, 12)?),
            }),
            1 => Ok(ParsedMvhd {
                timescale: read_u32(rest, 16)?,
                duration: read_u64(rest, 20)?,
            }),
            v => Err(Mp4Error::UnsupportedVersion("mvhd", v)),
        }
    }
}

/*********************** SampleEntry *************************/

#[derive(Default)]
pub struct SampleEntry {
    pub reserved: [u8; 6],
    pub data_reference_index: u16,
}

impl SampleEntry {
    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        for reserved in &self.reserved {
            w.write_all(&reserved.to_be_bytes())?;
        }
        w.write_all(&self.data_reference_index.to_be_bytes())?;
        Ok(())
    }
}

/*********************** avc1 *************************/

pub const TYPE_AVC1: BoxType = *b"avc1";

#[derive(Default)]
pub struct Avc1 {
    pub sample_entry: SampleEntry,
    pub pre_defined: u16,
    pub reserved: u16,
    pub pre_defined2: [u32; 3],
    pub width: u16,
    pub height: u16,
    pub horiz_resolution: u32,
    pub vert_resolution: u32,
    pub reserved2: u32,
    pub frame_count: u16,
    pub compressor_name: [u8; 32],
    pub depth: u16,
    pub pre_defined3: i16,
}

impl ImmutableBox for Avc1 {
    fn box_type(&self) -> BoxType {
        TYPE_AVC1
    }

    fn size(&self) -> usize {
        78
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.sample_entry.marshal(w)?;
        w.write_all(&self.pre_defined.to_be_bytes())?;
        w.write_all(&self.reserved.to_be_bytes())?;
        for pre_defined in &self.pre_defined2 {
            w.write_all(&pre_defined.to_be_bytes())?;
        }
        w.write_all(&self.width.to_be_bytes())?;
        w.write_all(&self.height.to_be_bytes())?;
        w.write_all(&self.horiz_resolution.to_be_bytes())?;
        w.write_all(&self.vert_resolution.to_be_bytes())?;
        w.write_all(&self.reserved2.to_be_bytes())?;
        w.write_all(&self.frame_count.to_be_bytes())?;
        w.write_all(&self.compressor_name)?;
        w.write_all(&self.depth.to_be_bytes())?;
        w.write_all(&self.pre_defined3.to_be_bytes())?;
        Ok(())
    }
}

impl From<Avc1> for Box<dyn ImmutableBox> {
    fn from(value: Avc1) -> Self {
        Box::new(value)
    }
}

impl Avc1 {
    /// `avc1`'s own fixed fields end with width/height at a known offset;
    /// everything after (`avcC`, `btrt`, ...) is nested boxes the demuxer's
    /// envelope walker descends into separately.
    pub fn unmarshal_dimensions(data: &[u8]) -> Result<(u16, u16), Mp4Error> {
        Ok((read_u16(data, 24)?, read_u16(data, 26)?))
    }
}

/**************** AVCDecoderConfiguration ****************.*/
pub const AVC_BASELINE_PROFILE: u8 = 66; // 0x42
pub const AVC_MAIN_PROFILE: u8 = 77; // 0x4d
pub const AVC_EXTENDED_PROFILE: u8 = 88; // 0x58
pub const AVC_HIGH_PROFILE: u8 = 100; // 0x64
pub const AVC_HIGH_10_PROFILE: u8 = 110; // 0x6e
pub const AVC_HIGH_422_PROFILE: u8 = 122; // 0x7a

pub struct AvcParameterSet(Vec<u8>);

impl AvcParameterSet {
    #[must_use]
    pub fn new(data: Vec<u8>) -> Self {
        Self(data)
    }

    fn field_size(&self) -> usize {
        self.0.len() + 2
    }

    fn marshal_field(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        w.write_all(
            &u16::try_from(self.0.len())
                .map_err(|e| Mp4Error::FromInt("parameter set".to_owned(), e))?
                .to_be_bytes(),
        )?;
        w.write_all(&self.0)?;
        Ok(())
    }
}

/*************************** avcC ****************************/

pub const TYPE_AVCC: BoxType = *b"avcC";

pub struct AvcC {
    pub configuration_version: u8,
    pub profile: u8,
    pub profile_compatibility: u8,
    pub level: u8,
    pub reserved: u8,                       // 6 bits.
    pub length_size_minus_one: u8,          // 2 bits.
    pub reserved2: u8,                      // 3 bits.
    pub num_of_sequence_parameter_sets: u8, // 5 bits.
    pub sequence_parameter_sets: Vec<AvcParameterSet>,
    pub num_of_picture_parameter_sets: u8,
    pub picture_parameter_sets: Vec<AvcParameterSet>,
    pub high_profile_fields_enabled: bool,
    pub reserved3: u8,               // 6 bits.
    pub chroma_format: u8,           // 2 bits.
    pub reserved4: u8,               // 5 bits.
    pub bitdepth_luma_minus_8: u8,   // 3 bits.
    pub reserved5: u8,               // 5 bits.
    pub bitdepth_chroma_minus_8: u8, // 3 bits.
    pub num_of_sequence_parameter_set_ext: u8,
    pub sequence_parameter_sets_ext: Vec<AvcParameterSet>,
}

impl ImmutableBox for AvcC {
    fn box_type(&self) -> BoxType {
        TYPE_AVCC
    }

    fn size(&self) -> usize {
        let mut total = 7;
        for sets in &self.sequence_parameter_sets {
            total += sets.field_size();
        }
        for sets in &self.picture_parameter_sets {
            total += sets.field_size();
        }
        if self.reserved3 != 0 {
            total += 4;
            for sets in &self.sequence_parameter_sets_ext {
                total += sets.field_size();
            }
        }
        total
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        w.write_all(&self.configuration_version.to_be_bytes())?;
        w.write_all(&self.profile.to_be_bytes())?;
        w.write_all(&self.profile_compatibility.to_be_bytes())?;
        w.write_all(&self.level.to_be_bytes())?;
        w.write_all(&[self.reserved << 2 | self.length_size_minus_one & 0b0000_0011])?;
        w.write_all(&[self.reserved2 << 5 | self.num_of_sequence_parameter_sets & 0b0001_1111])?;
        for sets in &self.sequence_parameter_sets {
            sets.marshal_field(w)?;
        }
        w.write_all(&self.num_of_picture_parameter_sets.to_be_bytes())?;
        for sets in &self.picture_parameter_sets {
            sets.marshal_field(w)?;
        }
        if self.high_profile_fields_enabled
            && self.profile != AVC_HIGH_PROFILE
            && self.profile != AVC_HIGH_10_PROFILE
            && self.profile != AVC_HIGH_422_PROFILE
            && self.profile != 144
        {
            return Err(Mp4Error::InconsistentAvcProfile(self.profile));
        }
        if self.reserved3 != 0 {
            w.write_all(&[self.reserved3 << 2 | self.chroma_format & 0b0000_0011])?;
            w.write_all(&[self.reserved4 << 3 | self.bitdepth_luma_minus_8 & 0b0000_0111])?;
            w.write_all(&[self.reserved5 << 3 | self.bitdepth_chroma_minus_8 & 0b0000_0111])?;
            w.write_all(&self.num_of_sequence_parameter_set_ext.to_be_bytes())?;
            for sets in &self.sequence_parameter_sets_ext {
                sets.marshal_field(w)?;
            }
        }
        Ok(())
    }
}

impl From<AvcC> for Box<dyn ImmutableBox> {
    fn from(value: AvcC) -> Self {
        Box::new(value)
    }
}

pub struct ParsedAvcC {
    pub sequence_parameter_sets: Vec<Vec<u8>>,
    pub picture_parameter_sets: Vec<Vec<u8>>,
}

impl AvcC {
    pub fn unmarshal(data: &[u8]) -> Result<ParsedAvcC, Mp4Error> {
        let num_sps = *data.get(5).ok_or(Mp4Error::Truncated(6, data.len()))? & 0b0001_1111;
        let mut pos = 6;
        let mut sequence_parameter_sets = Vec::new();
        for _ in 0..num_sps {
            let len = usize::from(read_u16(data, pos)?);
            let nalu = data
                .get(pos + 2..pos + 2 + len)
                .ok_or(Mp4Error::Truncated(pos + 2 + len, data.len()))?;
            sequence_parameter_sets.push(nalu.to_vec());
            pos += 2 + len;
        }
        let num_pps = *data.get(pos).ok_or(Mp4Error::Truncated(pos + 1, data.len()))?;
        pos += 1;
        let mut picture_parameter_sets = Vec::new();
        for _ in 0..num_pps {
            let len = usize::from(read_u16(data, pos)?);
            let nalu = data
                .get(pos + 2..pos + 2 + len)
                .ok_or(Mp4Error::Truncated(pos + 2 + len, data.len()))?;
            picture_parameter_sets.push(nalu.to_vec());
            pos += 2 + len;
        }
        Ok(ParsedAvcC {
            sequence_parameter_sets,
            picture_parameter_sets,
        })
    }
}

/*************************** stbl ****************************/

pub const TYPE_STBL: BoxType = *b"stbl";

pub struct Stbl;

impl ImmutableBox for Stbl {
    fn box_type(&self) -> BoxType {
        TYPE_STBL
    }

    fn size(&self) -> usize {
        0
    }

    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<Stbl> for Box<dyn ImmutableBox> {
    fn from(value: Stbl) -> Self {
        Box::new(value)
    }
}

/*************************** stco ****************************/

pub const TYPE_STCO: BoxType = *b"stco";

#[derive(Default)]
pub struct Stco {
    pub full_box: FullBox,
    pub chunk_offsets: Vec<u32>,
}

impl ImmutableBox for Stco {
    fn box_type(&self) -> BoxType {
        TYPE_STCO
    }

    fn size(&self) -> usize {
        8 + (self.chunk_offsets.len()) * 4
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(
            &u32::try_from(self.chunk_offsets.len())
                .map_err(|e| Mp4Error::FromInt("stco".to_owned(), e))?
                .to_be_bytes(),
        )?;
        for offset in &self.chunk_offsets {
            w.write_all(&offset.to_be_bytes())?;
        }
        Ok(())
    }
}

impl From<Stco> for Box<dyn ImmutableBox> {
    fn from(value: Stco) -> Self {
        Box::new(value)
    }
}

impl Stco {
    /// Returns chunk offsets promoted to `u64` so callers can treat `stco`
    /// and `co64` uniformly.
    pub fn unmarshal(data: &[u8]) -> Result<Vec<u64>, Mp4Error> {
        let (_, rest) = read_fullbox_header(data)?;
        let entry_count = read_u32(rest, 0)? as usize;
        (0..entry_count)
            .map(|i| Ok(u64::from(read_u32(rest, 4 + i * 4)?)))
            .collect()
    }
}

/*************************** stsc ****************************/

pub const TYPE_STSC: BoxType = *b"stsc";

#[derive(Clone, Copy, Debug)]
pub struct StscEntry {
    pub first_chunk: u32,
    pub samples_per_chunk: u32,
    pub sample_description_index: u32,
}

impl StscEntry {
    fn marshal_field(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        w.write_all(&self.first_chunk.to_be_bytes())?;
        w.write_all(&self.samples_per_chunk.to_be_bytes())?;
        w.write_all(&self.sample_description_index.to_be_bytes())?;
        Ok(())
    }
}

#[derive(Default)]
pub struct Stsc {
    pub full_box: FullBox,
    pub entries: Vec<StscEntry>,
}

impl ImmutableBox for Stsc {
    fn box_type(&self) -> BoxType {
        TYPE_STSC
    }

    fn size(&self) -> usize {
        8 + self.entries.len() * 12
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(
            &u32::try_from(self.entries.len())
                .map_err(|e| Mp4Error::FromInt("stsc".to_owned(), e))?
                .to_be_bytes(),
        )?; // Entry count.
        for entry in &self.entries {
            entry.marshal_field(w)?;
        }
        Ok(())
    }
}

impl From<Stsc> for Box<dyn ImmutableBox> {
    fn from(value: Stsc) -> Self {
        Box::new(value)
    }
}

impl Stsc {
    pub fn unmarshal(data: &[u8]) -> Result<Vec<StscEntry>, Mp4Error> {
        let (_, rest) = read_fullbox_header(data)?;
        let entry_count = read_u32(rest, 0)? as usize;
        (0..entry_count)
            .map(|i| {
                let at = 4 + i * 12;
                Ok(StscEntry {
                    first_chunk: read_u32(rest, at)?,
                    samples_per_chunk: read_u32(rest, at + 4)?,
                    sample_description_index: read_u32(rest, at + 8)?,
                })
            })
            .collect()
    }
}

/*************************** stsd ****************************/

pub const TYPE_STSD: BoxType = *b"stsd";

pub struct Stsd {
    pub full_box: FullBox,
    pub entry_count: u32,
}

impl ImmutableBox for Stsd {
    fn box_type(&self) -> BoxType {
        TYPE_STSD
    }

    fn size(&self) -> usize {
        8
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(&self.entry_count.to_be_bytes())?;
        Ok(())
    }
}

impl From<Stsd> for Box<dyn ImmutableBox> {
    fn from(value: Stsd) -> Self {
        Box::new(value)
    }
}

/*************************** stss ****************************/

pub const TYPE_STSS: BoxType = *b"stss";

pub struct Stss {
    pub full_box: FullBox,
    pub sample_numbers: Vec<u32>,
}

impl ImmutableBox for Stss {
    fn box_type(&self) -> BoxType {
        TYPE_STSS
    }

    fn size(&self) -> usize {
        8 + self.sample_numbers.len() * 4
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(
            &u32::try_from(self.sample_numbers.len())
                .map_err(|e| Mp4Error::FromInt("stss".to_owned(), e))?
                .to_be_bytes(),
        )?; // Entry count.
        for number in &self.sample_numbers {
            w.write_all(&number.to_be_bytes())?;
        }
        Ok(())
    }
}

impl From<Stss> for Box<dyn ImmutableBox> {
    fn from(value: Stss) -> Self {
        Box::new(value)
    }
}

impl Stss {
    pub fn unmarshal(data: &[u8]) -> Result<Vec<u32>, Mp4Error> {
        let (_, rest) = read_fullbox_header(data)?;
        let entry_count = read_u32(rest, 0)? as usize;
        (0..entry_count)
            .map(|i| read_u32(rest, 4 + i * 4))
            .collect()
    }
}

/*************************** stsz ****************************/

pub const TYPE_STSZ: BoxType = *b"stsz";

#[derive(Default)]
pub struct Stsz {
    pub full_box: FullBox,
    pub sample_size: u32,
    pub sample_count: u32,
    pub entry_sizes: Vec<u32>,
}

impl ImmutableBox for Stsz {
    fn box_type(&self) -> BoxType {
        TYPE_STSZ
    }

    fn size(&self) -> usize {
        12 + self.entry_sizes.len() * 4
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(&self.sample_size.to_be_bytes())?;
        w.write_all(&self.sample_count.to_be_bytes())?;
        for entry in &self.entry_sizes {
            w.write_all(&entry.to_be_bytes())?;
        }
        Ok(())
    }
}

impl From<Stsz> for Box<dyn ImmutableBox> {
    fn from(value: Stsz) -> Self {
        Box::new(value)
    }
}

impl Stsz {
    /// Returns the per-sample size list. When `sample_size != 0` every
    /// sample shares that one size and no `entry_sizes` table follows.
    pub fn unmarshal(data: &[u8]) -> Result<Vec<u32>, Mp4Error> {
        let (_, rest) = read_fullbox_header(data)?;
        let sample_size = read_u32(rest, 0)?;
        let sample_count = read_u32(rest, 4)?;
        if sample_size != 0 {
            return Ok(vec![sample_size; sample_count as usize]);
        }
        (0..sample_count as usize)
            .map(|i| read_u32(rest, 8 + i * 4))
            .collect()
    }
}

/*************************** stts ****************************/

pub const TYPE_STTS: BoxType = *b"stts";

#[derive(Default)]
pub struct Stts {
    pub full_box: FullBox,
    pub entries: Vec<SttsEntry>,
}

#[derive(Clone, Debug)]
pub struct SttsEntry {
    pub sample_count: u32,
    pub sample_delta: u32,
}

impl SttsEntry {
    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        w.write_all(&self.sample_count.to_be_bytes())?;
        w.write_all(&self.sample_delta.to_be_bytes())?;
        Ok(())
    }
}

impl ImmutableBox for Stts {
    fn box_type(&self) -> BoxType {
        TYPE_STTS
    }

    fn size(&self) -> usize {
        8 + self.entries.len() * 8
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(
            &u32::try_from(self.entries.len())
                .map_err(|e| Mp4Error::FromInt("stts".to_owned(), e))?
                .to_be_bytes(),
        )?;
        for entry in &self.entries {
            entry.marshal(w)?;
        }
        Ok(())
    }
}

impl From<Stts> for Box<dyn ImmutableBox> {
    fn from(value: Stts) -> Self {
        Box::new(value)
    }
}

impl Stts {
    pub fn unmarshal(data: &[u8]) -> Result<Vec<SttsEntry>, Mp4Error> {
        let (_, rest) = read_fullbox_header(data)?;
        let entry_count = read_u32(rest, 0)? as usize;
        (0..entry_count)
            .map(|i| {
                let at = 4 + i * 8;
                Ok(SttsEntry {
                    sample_count: read_u32(rest, at)?,
                    sample_delta: read_u32(rest, at + 4)?,
                })
            })
            .collect()
    }
}

/// Expands `stts` run-length entries into one duration per sample.
#[must_use]
pub fn expand_stts(entries: &[SttsEntry]) -> Vec<u32> {
    let mut durations = Vec::new();
    for entry in entries {
        durations.extend(std::iter::repeat(entry.sample_delta).take(entry.sample_count as usize));
    }
    durations
}

/*************************** tfdt ****************************/

pub const TYPE_TFDT: BoxType = *b"tfdt";

pub struct Tfdt {
    pub flags: [u8; 3],
    pub base_media_decode_time: TfdtBaseMediaDecodeTime,
}

pub enum TfdtBaseMediaDecodeTime {
    V0(u32),
    V1(u64),
}

impl ImmutableBox for Tfdt {
    fn box_type(&self) -> BoxType {
        TYPE_TFDT
    }

    fn size(&self) -> usize {
        match self.base_media_decode_time {
            TfdtBaseMediaDecodeTime::V0(_) => 8,
            TfdtBaseMediaDecodeTime::V1(_) => 12,
        }
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        match self.base_media_decode_time {
            TfdtBaseMediaDecodeTime::V0(v) => {
                w.write_all(&[0])?;
                w.write_all(&self.flags)?;
                w.write_all(&v.to_be_bytes())?;
            }
            TfdtBaseMediaDecodeTime::V1(v) => {
                w.write_all(&[1])?;
                w.write_all(&self.flags)?;
                w.write_all(&v.to_be_bytes())?;
            }
        }
        Ok(())
    }
}

impl From<Tfdt> for Box<dyn ImmutableBox> {
    fn from(value: Tfdt) -> Self {
        Box::new(value)
    }
}

/*************************** tfhd ****************************/

pub const TYPE_TFHD: BoxType = *b"tfhd";

#[derive(Default)]
pub struct Tfhd {
    pub full_box: FullBox,
    pub track_id: u32,

    // optional
    pub base_data_offset: u64,
    pub sample_descroption_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

pub const TFHD_BASE_DATA_OFFSET_PRESENT: u32 = 0x0000_0001;
pub const TFHD_SAMPLE_DESCRIPTION_INDEX_PRESENT: u32 = 0x0000_0002;
pub const TFHD_DEFAULT_SAMPLE_DURATION_PRESENT: u32 = 0x0000_0008;
pub const TFHD_DEFAULT_SAMPLE_SIZE_PRESENT: u32 = 0x0000_0010;
pub const TFHD_DEFAULT_SAMPLE_FLAGS_PRESENT: u32 = 0x0000_0020;

impl ImmutableBox for Tfhd {
    fn box_type(&self) -> BoxType {
        TYPE_TFHD
    }

    fn size(&self) -> usize {
        let mut total: usize = 8;
        if self.full_box.check_flag(TFHD_BASE_DATA_OFFSET_PRESENT) {
            total += 8;
        }
        if self
            .full_box
            .check_flag(TFHD_SAMPLE_DESCRIPTION_INDEX_PRESENT)
        {
            total += 4;
        }
        if self
            .full_box
            .check_flag(TFHD_DEFAULT_SAMPLE_DURATION_PRESENT)
        {
            total += 4;
        }
        if self.full_box.check_flag(TFHD_DEFAULT_SAMPLE_SIZE_PRESENT) {
            total += 4;
        }
        if self.full_box.check_flag(TFHD_DEFAULT_SAMPLE_FLAGS_PRESENT) {
            total += 4;
        }
        total
    }

    // Marshal box to writer.
    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(&self.track_id.to_be_bytes())?;
        if self.full_box.check_flag(TFHD_BASE_DATA_OFFSET_PRESENT) {
            w.write_all(&self.base_data_offset.to_be_bytes())?;
        }
        if self
            .full_box
            .check_flag(TFHD_SAMPLE_DESCRIPTION_INDEX_PRESENT)
        {
            w.write_all(&self.sample_descroption_index.to_be_bytes())?;
        }
        if self
            .full_box
            .check_flag(TFHD_DEFAULT_SAMPLE_DURATION_PRESENT)
        {
            w.write_all(&self.default_sample_duration.to_be_bytes())?;
        }
        if self.full_box.check_flag(TFHD_DEFAULT_SAMPLE_SIZE_PRESENT) {
            w.write_all(&self.default_sample_size.to_be_bytes())?;
        }
        if self.full_box.check_flag(TFHD_DEFAULT_SAMPLE_FLAGS_PRESENT) {
            w.write_all(&self.default_sample_flags.to_be_bytes())?;
        }
        Ok(())
    }
}

impl From<Tfhd> for Box<dyn ImmutableBox> {
    fn from(value: Tfhd) -> Self {
        Box::new(value)
    }
}

/*************************** tkhd ****************************/

pub const TYPE_TKHD: BoxType = *b"tkhd";

#[derive(Default)]
pub struct Tkhd {
    pub flags: [u8; 3],
    pub version: TkhdVersion,
    pub track_id: u32,
    pub reserved0: u32,
    pub reserved1: [u32; 2],
    pub layer: i16,           // template=0
    pub alternate_group: i16, // template=0
    pub volume: i16,          // template={if track_is_audio 0x0100 else 0}
    pub reserved2: u16,
    pub matrix: [i32; 9], // template={ 0x00010000,0,0,0,0x00010000,0,0,0,0x40000000 };
    pub width: u32,       // fixed-point 16.16
    pub height: u32,      // fixed-point 16.16
}

pub enum TkhdVersion {
    V0(TkhdV0),
    V1(TkhdV1),
}

impl Default for TkhdVersion {
    fn default() -> Self {
        Self::V0(TkhdV0::default())
    }
}

#[derive(Default)]
pub struct TkhdV0 {
    pub creation_time: u32,
    pub modification_time: u32,
    pub duration: u32,
}

pub struct TkhdV1 {
    pub creation_time: u64,
    pub modification_time: u64,
    pub duration: u64,
}

impl ImmutableBox for Tkhd {
    fn box_type(&self) -> BoxType {
        TYPE_TKHD
    }

    fn size(&self) -> usize {
        match self.version {
            TkhdVersion::V0(_) => 84,
            TkhdVersion::V1(_) => 96,
        }
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        match &self.version {
            TkhdVersion::V0(v) => {
                w.write_all(&[0])?;
                w.write_all(&self.flags)?;
                w.write_all(&v.creation_time.to_be_bytes())?;
                w.write_all(&v.modification_time.to_be_bytes())?;
                w.write_all(&self.track_id.to_be_bytes())?;
                w.write_all(&self.reserved0.to_be_bytes())?;
                w.write_all(&v.duration.to_be_bytes())?;
            }
            TkhdVersion::V1(v) => {
                w.write_all(&[1])?;
                w.write_all(&self.flags)?;
                w.write_all(&v.creation_time.to_be_bytes())?;
                w.write_all(&v.modification_time.to_be_bytes())?;
                w.write_all(&self.track_id.to_be_bytes())?;
                w.write_all(&self.reserved0.to_be_bytes())?;
                w.write_all(&v.duration.to_be_bytes())?;
            }
        }

        for reserved in &self.reserved1 {
            w.write_all(&reserved.to_be_bytes())?;
        }
        w.write_all(&self.layer.to_be_bytes())?;
        w.write_all(&self.alternate_group.to_be_bytes())?;
        w.write_all(&self.volume.to_be_bytes())?;
        w.write_all(&self.reserved2.to_be_bytes())?;
        for matrix in &self.matrix {
            w.write_all(&matrix.to_be_bytes())?;
        }
        w.write_all(&self.width.to_be_bytes())?;
        w.write_all(&self.height.to_be_bytes())?;

        Ok(())
    }
}

impl From<Tkhd> for Box<dyn ImmutableBox> {
    fn from(value: Tkhd) -> Self {
        Box::new(value)
    }
}

impl Tkhd {
    pub fn unmarshal_track_id(data: &[u8]) -> Result<u32, Mp4Error> {
        let (full_box, rest) = read_fullbox_header(data)?;
        match full_box.version {
            0 => read_u32(rest, 8),
            1 => read_u32(rest, 16),
            v => Err(Mp4Error::UnsupportedVersion("tkhd", v)),
        }
    }
}

/*************************** traf ****************************/

pub const TYPE_TRAF: BoxType = *b"traf";

pub struct Traf;

impl ImmutableBox for Traf {
    fn box_type(&self) -> BoxType {
        TYPE_TRAF
    }

    fn size(&self) -> usize {
        0
    }

    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<Traf> for Box<dyn ImmutableBox> {
    fn from(value: Traf) -> Self {
        Box::new(value)
    }
}

/*************************** trak ****************************/

pub const TYPE_TRAK: BoxType = *b"trak";

pub struct Trak;

impl ImmutableBox for Trak {
    fn box_type(&self) -> BoxType {
        TYPE_TRAK
    }

    fn size(&self) -> usize {
        0
    }

    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<Trak> for Box<dyn ImmutableBox> {
    fn from(value: Trak) -> Self {
        Box::new(value)
    }
}

/*************************** trex ****************************/

pub const TYPE_TREX: BoxType = *b"trex";

#[derive(Default)]
pub struct Trex {
    pub full_box: FullBox,
    pub track_id: u32,
    pub default_sample_description_index: u32,
    pub default_sample_duration: u32,
    pub default_sample_size: u32,
    pub default_sample_flags: u32,
}

impl ImmutableBox for Trex {
    fn box_type(&self) -> BoxType {
        TYPE_TREX
    }

    fn size(&self) -> usize {
        24
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(&self.track_id.to_be_bytes())?;
        w.write_all(&self.default_sample_description_index.to_be_bytes())?;
        w.write_all(&self.default_sample_duration.to_be_bytes())?;
        w.write_all(&self.default_sample_size.to_be_bytes())?;
        w.write_all(&self.default_sample_flags.to_be_bytes())?;
        Ok(())
    }
}

impl From<Trex> for Box<dyn ImmutableBox> {
    fn from(value: Trex) -> Self {
        Box::new(value)
    }
}

/*************************** trun ****************************/

pub const TRUN_DATA_OFFSET_PRESENT: u32 = 0b0000_0000_0001;
pub const TRUN_FIRST_SAMPLE_FLAGS_PRESENT: u32 = 0b0000_0000_0100;
pub const TRUN_SAMPLE_DURATION_PRESENT: u32 = 0b0001_0000_0000;
pub const TRUN_SAMPLE_SIZE_PRESENT: u32 = 0b0010_0000_0000;
pub const TRUN_SAMPLE_FLAGS_PRESENT: u32 = 0b0100_0000_0000;
pub const TRUN_SAMPLE_COMPOSITION_TIME_OFFSET_PRESENT: u32 = 0b1000_0000_0000;

pub enum TrunEntries {
    V0(Vec<TrunEntryV0>),
    V1(Vec<TrunEntryV1>),
}

impl TrunEntries {
    fn len(&self) -> usize {
        match self {
            TrunEntries::V0(entries) => entries.len(),
            TrunEntries::V1(entries) => entries.len(),
        }
    }
}

pub struct TrunEntryV0 {
    pub sample_duration: u32,
    pub sample_size: u32,
    pub sample_flags: u32,
    pub sample_composition_time_offset: u32,
}

impl TrunEntryV0 {
    fn marshal_field(&self, w: &mut dyn std::io::Write, flags: [u8; 3]) -> Result<(), Mp4Error> {
        if check_fullbox_flag(flags, TRUN_SAMPLE_DURATION_PRESENT) {
            w.write_all(&self.sample_duration.to_be_bytes())?;
        }
        if check_fullbox_flag(flags, TRUN_SAMPLE_SIZE_PRESENT) {
            w.write_all(&self.sample_size.to_be_bytes())?;
        }
        if check_fullbox_flag(flags, TRUN_SAMPLE_FLAGS_PRESENT) {
            w.write_all(&self.sample_flags.to_be_bytes())?;
        }
        if check_fullbox_flag(flags, TRUN_SAMPLE_COMPOSITION_TIME_OFFSET_PRESENT) {
            w.write_all(&self.sample_composition_time_offset.to_be_bytes())?;
        }
        Ok(())
    }
}

pub struct TrunEntryV1 {
    pub sample_duration: u32,
    pub sample_size: u32,
    pub sample_flags: u32,
    pub sample_composition_time_offset: i32,
}

impl TrunEntryV1 {
    fn marshal_field(&self, w: &mut dyn std::io::Write, flags: [u8; 3]) -> Result<(), Mp4Error> {
        if check_fullbox_flag(flags, TRUN_SAMPLE_DURATION_PRESENT) {
            w.write_all(&self.sample_duration.to_be_bytes())?;
        }
        if check_fullbox_flag(flags, TRUN_SAMPLE_SIZE_PRESENT) {
            w.write_all(&self.sample_size.to_be_bytes())?;
        }
        if check_fullbox_flag(flags, TRUN_SAMPLE_FLAGS_PRESENT) {
            w.write_all(&self.sample_flags.to_be_bytes())?;
        }
        if check_fullbox_flag(flags, TRUN_SAMPLE_COMPOSITION_TIME_OFFSET_PRESENT) {
            w.write_all(&self.sample_composition_time_offset.to_be_bytes())?;
        }
        Ok(())
    }
}

pub const TYPE_TRUN: BoxType = *b"trun";

pub struct Trun {
    pub flags: [u8; 3],

    pub data_offset: i32,
    pub first_sample_flags: u32,
    pub entries: TrunEntries,
}

fn trun_field_size(fullbox_flags: [u8; 3]) -> usize {
    let mut total = 0;
    if check_fullbox_flag(fullbox_flags, TRUN_SAMPLE_DURATION_PRESENT) {
        total += 4;
    }
    if check_fullbox_flag(fullbox_flags, TRUN_SAMPLE_SIZE_PRESENT) {
        total += 4;
    }
    if check_fullbox_flag(fullbox_flags, TRUN_SAMPLE_FLAGS_PRESENT) {
        total += 4;
    }
    if check_fullbox_flag(fullbox_flags, TRUN_SAMPLE_COMPOSITION_TIME_OFFSET_PRESENT) {
        total += 4;
    }
    total
}

impl ImmutableBox for Trun {
    fn box_type(&self) -> BoxType {
        TYPE_TRUN
    }

    fn size(&self) -> usize {
        let mut total = 8;
        if check_fullbox_flag(self.flags, TRUN_DATA_OFFSET_PRESENT) {
            total += 4;
        }
        if check_fullbox_flag(self.flags, TRUN_FIRST_SAMPLE_FLAGS_PRESENT) {
            total += 4;
        }
        let field_size = trun_field_size(self.flags);
        total += field_size * self.entries.len();
        total
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        match &self.entries {
            TrunEntries::V0(_) => w.write_all(&[0])?,
            TrunEntries::V1(_) => w.write_all(&[1])?,
        }
        w.write_all(&self.flags)?;
        w.write_all(
            &u32::try_from(self.entries.len())
                .map_err(|e| Mp4Error::FromInt("trun".to_owned(), e))?
                .to_be_bytes(),
        )?;
        if check_fullbox_flag(self.flags, TRUN_DATA_OFFSET_PRESENT) {
            w.write_all(&self.data_offset.to_be_bytes())?;
        }
        if check_fullbox_flag(self.flags, TRUN_FIRST_SAMPLE_FLAGS_PRESENT) {
            w.write_all(&self.first_sample_flags.to_be_bytes())?;
        }
        match &self.entries {
            TrunEntries::V0(entries) => {
                for entry in entries {
                    entry.marshal_field(w, self.flags)?;
                }
            }
            TrunEntries::V1(entries) => {
                for entry in entries {
                    entry.marshal_field(w, self.flags)?;
                }
            }
        };
        Ok(())
    }
}

impl From<Trun> for Box<dyn ImmutableBox> {
    fn from(value: Trun) -> Self {
        Box::new(value)
    }
}

/*************************** vmhd ****************************/

pub const TYPE_VMHD: BoxType = *b"vmhd";

#[derive(Default)]
pub struct Vmhd {
    pub full_box: FullBox,
    pub graphics_mode: u16, // template=0
    pub opcolor: [u16; 3],  // template={0, 0, 0}
}

impl ImmutableBox for Vmhd {
    fn box_type(&self) -> BoxType {
        TYPE_VMHD
    }

    fn size(&self) -> usize {
        12
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(&self.graphics_mode.to_be_bytes())?;
        for color in &self.opcolor {
            w.write_all(&color.to_be_bytes())?;
        }
        Ok(())
    }
}

impl From<Vmhd> for Box<dyn ImmutableBox> {
    fn from(value: Vmhd) -> Self {
        Box::new(value)
    }
}

/*************************** smhd ****************************/

pub const TYPE_SMHD: BoxType = *b"smhd";

#[derive(Default)]
pub struct Smhd {
    pub full_box: FullBox,
    pub balance: i16, // template=0
    pub reserved: u16,
}

impl ImmutableBox for Smhd {
    fn box_type(&self) -> BoxType {
        TYPE_SMHD
    }

    fn size(&self) -> usize {
        8
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(&self.balance.to_be_bytes())?;
        w.write_all(&self.reserved.to_be_bytes())?;
        Ok(())
    }
}

impl From<Smhd> for Box<dyn ImmutableBox> {
    fn from(value: Smhd) -> Self {
        Box::new(value)
    }
}

/*************************** co64 ****************************/

pub const TYPE_CO64: BoxType = *b"co64";

#[derive(Default)]
pub struct Co64 {
    pub full_box: FullBox,
    pub chunk_offsets: Vec<u64>,
}

impl ImmutableBox for Co64 {
    fn box_type(&self) -> BoxType {
        TYPE_CO64
    }

    fn size(&self) -> usize {
        8 + self.chunk_offsets.len() * 8
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(
            &u32::try_from(self.chunk_offsets.len())
                .map_err(|e| Mp4Error::FromInt("co64".to_owned(), e))?
                .to_be_bytes(),
        )?;
        for offset in &self.chunk_offsets {
            w.write_all(&offset.to_be_bytes())?;
        }
        Ok(())
    }
}

impl From<Co64> for Box<dyn ImmutableBox> {
    fn from(value: Co64) -> Self {
        Box::new(value)
    }
}

impl Co64 {
    pub fn unmarshal(data: &[u8]) -> Result<Vec<u64>, Mp4Error> {
        let (_, rest) = read_fullbox_header(data)?;
        let entry_count = read_u32(rest, 0)? as usize;
        (0..entry_count)
            .map(|i| read_u64(rest, 4 + i * 8))
            .collect()
    }
}

/*************************** stz2 ****************************/

pub const TYPE_STZ2: BoxType = *b"stz2";

// Compact sample size table. field_size is always 16 in practice here
// (this muxer never emits the 4 or 8 bit packings), but the field is
// kept general since the box format allows it.
#[derive(Default)]
pub struct Stz2 {
    pub full_box: FullBox,
    pub reserved: [u8; 3],
    pub field_size: u8, // 4, 8 or 16
    pub entry_sizes: Vec<u16>,
}

impl ImmutableBox for Stz2 {
    fn box_type(&self) -> BoxType {
        TYPE_STZ2
    }

    fn size(&self) -> usize {
        let bits = usize::from(self.field_size) * self.entry_sizes.len();
        12 + bits.div_ceil(8)
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        w.write_all(&self.reserved)?;
        w.write_all(&[self.field_size])?;
        w.write_all(
            &u32::try_from(self.entry_sizes.len())
                .map_err(|e| Mp4Error::FromInt("stz2".to_owned(), e))?
                .to_be_bytes(),
        )?;
        match self.field_size {
            16 => {
                for entry in &self.entry_sizes {
                    w.write_all(&entry.to_be_bytes())?;
                }
            }
            8 => {
                for entry in &self.entry_sizes {
                    w.write_all(&[u8::try_from(*entry)
                        .map_err(|e| Mp4Error::FromInt("stz2 entry".to_owned(), e))?])?;
                }
            }
            4 => {
                for pair in self.entry_sizes.chunks(2) {
                    let hi = pair[0] & 0x0f;
                    let lo = pair.get(1).copied().unwrap_or(0) & 0x0f;
                    #[allow(clippy::cast_possible_truncation)]
                    w.write_all(&[((hi << 4) | lo) as u8])?;
                }
            }
            other => return Err(Mp4Error::DescriptorTooLarge(usize::from(other))),
        }
        Ok(())
    }
}

impl From<Stz2> for Box<dyn ImmutableBox> {
    fn from(value: Stz2) -> Self {
        Box::new(value)
    }
}

impl Stz2 {
    pub fn unmarshal(data: &[u8]) -> Result<Vec<u32>, Mp4Error> {
        let (_, rest) = read_fullbox_header(data)?;
        let field_size = *rest.get(3).ok_or(Mp4Error::Truncated(4, rest.len()))?;
        let sample_count = read_u32(rest, 4)? as usize;
        let entries = rest.get(8..).ok_or(Mp4Error::Truncated(8, rest.len()))?;
        match field_size {
            16 => (0..sample_count)
                .map(|i| Ok(u32::from(read_u16(entries, i * 2)?)))
                .collect(),
            8 => (0..sample_count)
                .map(|i| {
                    entries
                        .get(i)
                        .copied()
                        .map(u32::from)
                        .ok_or(Mp4Error::Truncated(i + 1, entries.len()))
                })
                .collect(),
            4 => (0..sample_count)
                .map(|i| {
                    let byte = entries
                        .get(i / 2)
                        .copied()
                        .ok_or(Mp4Error::Truncated(i / 2 + 1, entries.len()))?;
                    Ok(u32::from(if i % 2 == 0 { byte >> 4 } else { byte & 0x0f }))
                })
                .collect(),
            other => Err(Mp4Error::DescriptorTooLarge(usize::from(other))),
        }
    }
}

/*************************** free ****************************/

pub const TYPE_FREE: BoxType = *b"free";

// Padding box; its payload is never interpreted by a reader.
pub struct Free(pub Vec<u8>);

impl ImmutableBox for Free {
    fn box_type(&self) -> BoxType {
        TYPE_FREE
    }

    fn size(&self) -> usize {
        self.0.len()
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        w.write_all(&self.0)?;
        Ok(())
    }
}

impl From<Free> for Box<dyn ImmutableBox> {
    fn from(value: Free) -> Self {
        Box::new(value)
    }
}

/*************************** udta / meta / ilst ****************************/

pub const TYPE_UDTA: BoxType = *b"udta";

pub struct Udta;

impl ImmutableBox for Udta {
    fn box_type(&self) -> BoxType {
        TYPE_UDTA
    }

    fn size(&self) -> usize {
        0
    }

    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<Udta> for Box<dyn ImmutableBox> {
    fn from(value: Udta) -> Self {
        Box::new(value)
    }
}

pub const TYPE_META: BoxType = *b"meta";

#[derive(Default)]
pub struct Meta {
    pub full_box: FullBox,
}

impl ImmutableBox for Meta {
    fn box_type(&self) -> BoxType {
        TYPE_META
    }

    fn size(&self) -> usize {
        4
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;
        Ok(())
    }
}

impl From<Meta> for Box<dyn ImmutableBox> {
    fn from(value: Meta) -> Self {
        Box::new(value)
    }
}

pub const TYPE_ILST: BoxType = *b"ilst";

pub struct Ilst;

impl ImmutableBox for Ilst {
    fn box_type(&self) -> BoxType {
        TYPE_ILST
    }

    fn size(&self) -> usize {
        0
    }

    fn marshal(&self, _: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        Ok(())
    }
}

impl From<Ilst> for Box<dyn ImmutableBox> {
    fn from(value: Ilst) -> Self {
        Box::new(value)
    }
}

// A single text metadata tag, e.g. the well-known "\xa9cmt" comment tag.
// Holds its own 4cc because iTunes-style tags vary the box type per entry,
// unlike every other box in this module.
pub struct MetaTag {
    pub tag: BoxType,
    pub value: String,
}

impl ImmutableBox for MetaTag {
    fn box_type(&self) -> BoxType {
        self.tag
    }

    fn size(&self) -> usize {
        16 + self.value.len()
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        // Nested "data" box: type(4) + version/flags(4) + reserved(4) + value.
        write_box_info(w, 16 + self.value.len(), *b"data")?;
        w.write_all(&[0, 0, 0, 1])?; // type indicator: UTF-8 text.
        w.write_all(&[0, 0, 0, 0])?; // locale indicator.
        w.write_all(self.value.as_bytes())?;
        Ok(())
    }
}

impl From<MetaTag> for Box<dyn ImmutableBox> {
    fn from(value: MetaTag) -> Self {
        Box::new(value)
    }
}

impl MetaTag {
    /// `data` is the tag box's own payload: a nested `data` box whose
    /// type(4) + version/flags(4) + reserved(4) header we skip to reach
    /// the UTF-8 value.
    pub fn unmarshal(data: &[u8]) -> Result<String, Mp4Error> {
        let value = data
            .get(16..)
            .ok_or(Mp4Error::Truncated(16, data.len()))?;
        Ok(String::from_utf8_lossy(value).into_owned())
    }
}

/*********************** hvc1 *************************/

pub const TYPE_HVC1: BoxType = *b"hvc1";

#[derive(Default)]
pub struct Hvc1 {
    pub sample_entry: SampleEntry,
    pub pre_defined: u16,
    pub reserved: u16,
    pub pre_defined2: [u32; 3],
    pub width: u16,
    pub height: u16,
    pub horiz_resolution: u32,
    pub vert_resolution: u32,
    pub reserved2: u32,
    pub frame_count: u16,
    pub compressor_name: [u8; 32],
    pub depth: u16,
    pub pre_defined3: i16,
}

impl ImmutableBox for Hvc1 {
    fn box_type(&self) -> BoxType {
        TYPE_HVC1
    }

    fn size(&self) -> usize {
        78
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.sample_entry.marshal(w)?;
        w.write_all(&self.pre_defined.to_be_bytes())?;
        w.write_all(&self.reserved.to_be_bytes())?;
        for pre_defined in &self.pre_defined2 {
            w.write_all(&pre_defined.to_be_bytes())?;
        }
        w.write_all(&self.width.to_be_bytes())?;
        w.write_all(&self.height.to_be_bytes())?;
        w.write_all(&self.horiz_resolution.to_be_bytes())?;
        w.write_all(&self.vert_resolution.to_be_bytes())?;
        w.write_all(&self.reserved2.to_be_bytes())?;
        w.write_all(&self.frame_count.to_be_bytes())?;
        w.write_all(&self.compressor_name)?;
        w.write_all(&self.depth.to_be_bytes())?;
        w.write_all(&self.pre_defined3.to_be_bytes())?;
        Ok(())
    }
}

impl From<Hvc1> for Box<dyn ImmutableBox> {
    fn from(value: Hvc1) -> Self {
        Box::new(value)
    }
}

impl Hvc1 {
    pub fn unmarshal_dimensions(data: &[u8]) -> Result<(u16, u16), Mp4Error> {
        Ok((read_u16(data, 24)?, read_u16(data, 26)?))
    }
}

/**************** HEVCDecoderConfigurationRecord ****************/

pub const TYPE_HVCC: BoxType = *b"hvcC";

pub struct HvcParameterSet {
    pub array_completeness: bool,
    pub nal_unit_type: u8, // 6 bits: 32=VPS, 33=SPS, 34=PPS
    pub nal_units: Vec<Vec<u8>>,
}

impl HvcParameterSet {
    fn field_size(&self) -> usize {
        3 + self.nal_units.iter().map(|n| 2 + n.len()).sum::<usize>()
    }

    fn marshal_field(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        let completeness: u8 = u8::from(self.array_completeness) << 7;
        w.write_all(&[completeness | (self.nal_unit_type & 0b0011_1111)])?;
        w.write_all(
            &u16::try_from(self.nal_units.len())
                .map_err(|e| Mp4Error::FromInt("hvcC array".to_owned(), e))?
                .to_be_bytes(),
        )?;
        for nalu in &self.nal_units {
            w.write_all(
                &u16::try_from(nalu.len())
                    .map_err(|e| Mp4Error::FromInt("hvcC nalu".to_owned(), e))?
                    .to_be_bytes(),
            )?;
            w.write_all(nalu)?;
        }
        Ok(())
    }
}

pub struct HvcC {
    pub configuration_version: u8,
    pub general_profile_space: u8, // 2 bits
    pub general_tier_flag: bool,
    pub general_profile_idc: u8, // 5 bits
    pub general_profile_compatibility_flags: u32,
    pub general_constraint_indicator_flags: u64, // 48 bits used
    pub general_level_idc: u8,
    pub min_spatial_segmentation_idc: u16, // 12 bits
    pub parallelism_type: u8,              // 2 bits
    pub chroma_format_idc: u8,             // 2 bits
    pub bit_depth_luma_minus8: u8,         // 3 bits
    pub bit_depth_chroma_minus8: u8,       // 3 bits
    pub avg_frame_rate: u16,
    pub constant_frame_rate: u8, // 2 bits
    pub num_temporal_layers: u8, // 3 bits
    pub temporal_id_nested: bool,
    pub length_size_minus_one: u8, // 2 bits
    pub parameter_sets: Vec<HvcParameterSet>,
}

impl ImmutableBox for HvcC {
    fn box_type(&self) -> BoxType {
        TYPE_HVCC
    }

    fn size(&self) -> usize {
        23 + self
            .parameter_sets
            .iter()
            .map(HvcParameterSet::field_size)
            .sum::<usize>()
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        w.write_all(&[self.configuration_version])?;
        w.write_all(&[(self.general_profile_space << 6)
            | (u8::from(self.general_tier_flag) << 5)
            | (self.general_profile_idc & 0b0001_1111)])?;
        w.write_all(&self.general_profile_compatibility_flags.to_be_bytes())?;
        w.write_all(&self.general_constraint_indicator_flags.to_be_bytes()[2..8])?;
        w.write_all(&[self.general_level_idc])?;
        w.write_all(&(0xf000 | self.min_spatial_segmentation_idc).to_be_bytes())?;
        w.write_all(&[0b1111_1100 | (self.parallelism_type & 0b11)])?;
        w.write_all(&[0b1111_1100 | (self.chroma_format_idc & 0b11)])?;
        w.write_all(&[0b1111_1000 | (self.bit_depth_luma_minus8 & 0b111)])?;
        w.write_all(&[0b1111_1000 | (self.bit_depth_chroma_minus8 & 0b111)])?;
        w.write_all(&self.avg_frame_rate.to_be_bytes())?;
        w.write_all(&[(self.constant_frame_rate << 6)
            | (self.num_temporal_layers << 3)
            | (u8::from(self.temporal_id_nested) << 2)
            | (self.length_size_minus_one & 0b11)])?;
        w.write_all(&[u8::try_from(self.parameter_sets.len())
            .map_err(|e| Mp4Error::FromInt("hvcC".to_owned(), e))?])?;
        for set in &self.parameter_sets {
            set.marshal_field(w)?;
        }
        Ok(())
    }
}

impl From<HvcC> for Box<dyn ImmutableBox> {
    fn from(value: HvcC) -> Self {
        Box::new(value)
    }
}

pub struct ParsedHvcC {
    pub sequence_parameter_sets: Vec<Vec<u8>>,
    pub picture_parameter_sets: Vec<Vec<u8>>,
}

impl HvcC {
    /// Walks the `numOfArrays` NAL-unit arrays, keeping only SPS (33) and
    /// PPS (34); VPS and any other array kinds are skipped.
    pub fn unmarshal(data: &[u8]) -> Result<ParsedHvcC, Mp4Error> {
        let num_arrays = *data.get(22).ok_or(Mp4Error::Truncated(23, data.len()))?;
        let mut pos = 23;
        let mut sequence_parameter_sets = Vec::new();
        let mut picture_parameter_sets = Vec::new();
        for _ in 0..num_arrays {
            let header = *data.get(pos).ok_or(Mp4Error::Truncated(pos + 1, data.len()))?;
            let nal_unit_type = header & 0b0011_1111;
            pos += 1;
            let count = usize::from(read_u16(data, pos)?);
            pos += 2;
            for _ in 0..count {
                let len = usize::from(read_u16(data, pos)?);
                let nalu = data
                    .get(pos + 2..pos + 2 + len)
                    .ok_or(Mp4Error::Truncated(pos + 2 + len, data.len()))?;
                pos += 2 + len;
                match nal_unit_type {
                    33 => sequence_parameter_sets.push(nalu.to_vec()),
                    34 => picture_parameter_sets.push(nalu.to_vec()),
                    _ => {}
                }
            }
        }
        Ok(ParsedHvcC {
            sequence_parameter_sets,
            picture_parameter_sets,
        })
    }
}

/*********************** mp4a *************************/

pub const TYPE_MP4A: BoxType = *b"mp4a";

#[derive(Default)]
pub struct Mp4a {
    pub sample_entry: SampleEntry,
    pub reserved: [u32; 2],
    pub channel_count: u16,
    pub sample_size: u16,
    pub pre_defined: u16,
    pub reserved2: u16,
    pub sample_rate: u32, // 16.16 fixed point
}

impl ImmutableBox for Mp4a {
    fn box_type(&self) -> BoxType {
        TYPE_MP4A
    }

    fn size(&self) -> usize {
        28
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.sample_entry.marshal(w)?;
        for reserved in &self.reserved {
            w.write_all(&reserved.to_be_bytes())?;
        }
        w.write_all(&self.channel_count.to_be_bytes())?;
        w.write_all(&self.sample_size.to_be_bytes())?;
        w.write_all(&self.pre_defined.to_be_bytes())?;
        w.write_all(&self.reserved2.to_be_bytes())?;
        w.write_all(&self.sample_rate.to_be_bytes())?;
        Ok(())
    }
}

impl From<Mp4a> for Box<dyn ImmutableBox> {
    fn from(value: Mp4a) -> Self {
        Box::new(value)
    }
}

impl Mp4a {
    /// Returns `(channel_count, sample_rate)`; `sample_rate` is the whole-Hz
    /// part of the 16.16 fixed-point field, which is all any AAC track needs.
    pub fn unmarshal(data: &[u8]) -> Result<(u16, u32), Mp4Error> {
        Ok((read_u16(data, 16)?, read_u32(data, 24)? >> 16))
    }
}

/*********************** mp4s *************************/

// Generic MPEG-4 stream sample entry (ISO/IEC 14496-12 12.5), used for
// tracks that are neither audio nor video (object_type_indication in the
// 0xC0-0xFE user-private range); carries no fields of its own beyond the
// base SampleEntry, with its `esds` describing the actual stream type.
pub const TYPE_MP4S: BoxType = *b"mp4s";

#[derive(Default)]
pub struct Mp4s {
    pub sample_entry: SampleEntry,
}

impl ImmutableBox for Mp4s {
    fn box_type(&self) -> BoxType {
        TYPE_MP4S
    }

    fn size(&self) -> usize {
        8
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.sample_entry.marshal(w)
    }
}

impl From<Mp4s> for Box<dyn ImmutableBox> {
    fn from(value: Mp4s) -> Self {
        Box::new(value)
    }
}

/**************** esds / MPEG-4 object descriptors ****************/

pub const TYPE_ESDS: BoxType = *b"esds";

const DESCRIPTOR_TAG_ES: u8 = 0x03;
const DESCRIPTOR_TAG_DECODER_CONFIG: u8 = 0x04;
const DESCRIPTOR_TAG_DECODER_SPECIFIC_INFO: u8 = 0x05;
const DESCRIPTOR_TAG_SL_CONFIG: u8 = 0x06;

// Number of bytes needed to encode `len` as an MPEG-4 descriptor length
// field (ISO/IEC 14496-1 expandable class tags), one byte per 7 bits.
fn descriptor_length_size(len: usize) -> usize {
    let mut n = 1;
    let mut remaining = len >> 7;
    while remaining > 0 {
        n += 1;
        remaining >>= 7;
    }
    n
}

fn write_descriptor_length(w: &mut dyn std::io::Write, len: usize) -> Result<(), Mp4Error> {
    let n = descriptor_length_size(len);
    if n > 4 {
        return Err(Mp4Error::DescriptorTooLarge(len));
    }
    for i in (0..n).rev() {
        #[allow(clippy::cast_possible_truncation)]
        let byte = ((len >> (7 * i)) & 0x7f) as u8;
        let continuation = if i == 0 { 0 } else { 0x80 };
        w.write_all(&[byte | continuation])?;
    }
    Ok(())
}

fn write_descriptor_header(
    w: &mut dyn std::io::Write,
    tag: u8,
    payload_len: usize,
) -> Result<(), Mp4Error> {
    w.write_all(&[tag])?;
    write_descriptor_length(w, payload_len)
}

fn descriptor_total_size(payload_len: usize) -> usize {
    1 + descriptor_length_size(payload_len) + payload_len
}

// Elementary Stream Descriptor, carrying the DecoderSpecificInfo payload
// (e.g. an AAC AudioSpecificConfig) inside a DecoderConfigDescriptor inside
// an SLConfigDescriptor-terminated ES_Descriptor, per ISO/IEC 14496-1.
pub struct Esds {
    pub full_box: FullBox,
    pub es_id: u16,
    pub object_type_indication: u8, // 0x40 = AAC, 0x6b = MP3
    pub stream_type: u8,            // 6 bits, 0x05 = audio stream
    pub buffer_size_db: u32,        // 24 bits used
    pub max_bitrate: u32,
    pub avg_bitrate: u32,
    pub decoder_specific_info: Vec<u8>,
}

impl Esds {
    fn decoder_specific_info_total(&self) -> usize {
        descriptor_total_size(self.decoder_specific_info.len())
    }

    fn decoder_config_payload_len(&self) -> usize {
        13 + self.decoder_specific_info_total()
    }

    fn decoder_config_total(&self) -> usize {
        descriptor_total_size(self.decoder_config_payload_len())
    }

    const SL_CONFIG_TOTAL: usize = 3; // tag(1) + length(1) + predefined(1)

    fn es_payload_len(&self) -> usize {
        3 + self.decoder_config_total() + Self::SL_CONFIG_TOTAL
    }
}

impl ImmutableBox for Esds {
    fn box_type(&self) -> BoxType {
        TYPE_ESDS
    }

    fn size(&self) -> usize {
        4 + descriptor_total_size(self.es_payload_len())
    }

    fn marshal(&self, w: &mut dyn std::io::Write) -> Result<(), Mp4Error> {
        self.full_box.marshal_field(w)?;

        write_descriptor_header(w, DESCRIPTOR_TAG_ES, self.es_payload_len())?;
        w.write_all(&self.es_id.to_be_bytes())?;
        w.write_all(&[0])?; // streamDependence/URL/OCR flags, stream priority: none set.

        write_descriptor_header(
            w,
            DESCRIPTOR_TAG_DECODER_CONFIG,
            self.decoder_config_payload_len(),
        )?;
        w.write_all(&[self.object_type_indication])?;
        w.write_all(&[(self.stream_type & 0b0011_1111) << 2])?; // upStream=0, reserved=1.
        let buf_size = self.buffer_size_db.to_be_bytes();
        w.write_all(&buf_size[1..4])?;
        w.write_all(&self.max_bitrate.to_be_bytes())?;
        w.write_all(&self.avg_bitrate.to_be_bytes())?;

        write_descriptor_header(
            w,
            DESCRIPTOR_TAG_DECODER_SPECIFIC_INFO,
            self.decoder_specific_info.len(),
        )?;
        w.write_all(&self.decoder_specific_info)?;

        write_descriptor_header(w, DESCRIPTOR_TAG_SL_CONFIG, 1)?;
        w.write_all(&[0x02])?; // predefined: MP4 file.

        Ok(())
    }
}

impl From<Esds> for Box<dyn ImmutableBox> {
    fn from(value: Esds) -> Self {
        Box::new(value)
    }
}

pub struct ParsedEsds {
    pub object_type_indication: u8,
    pub stream_type: u8,
    pub avg_bitrate: u32,
    pub decoder_specific_info: Vec<u8>,
}

impl Esds {
    /// Walks `ES_Descriptor(3) -> DecoderConfigDescriptor(4) ->
    /// DecoderSpecificInfo(5)`, ignoring the `SLConfigDescriptor` tail.
    pub fn unmarshal(data: &[u8]) -> Result<ParsedEsds, Mp4Error> {
        let (_, rest) = read_fullbox_header(data)?;

        let (tag, es_len, es_header_len) = read_descriptor_header(rest)?;
        if tag != DESCRIPTOR_TAG_ES {
            return Err(Mp4Error::DescriptorOverrun("esds", tag));
        }
        let es_payload = rest
            .get(es_header_len..es_header_len + es_len)
            .ok_or(Mp4Error::Truncated(es_header_len + es_len, rest.len()))?;

        let mut object_type_indication = 0;
        let mut stream_type = 0;
        let mut avg_bitrate = 0;
        let mut decoder_specific_info = Vec::new();

        // es_id(2) + stream dependence/URL/OCR flags(1) precede the nested descriptors.
        let mut pos = 3;
        while pos < es_payload.len() {
            let (inner_tag, inner_len, inner_header_len) =
                read_descriptor_header(&es_payload[pos..])?;
            let inner_start = pos + inner_header_len;
            let inner_payload = es_payload
                .get(inner_start..inner_start + inner_len)
                .ok_or(Mp4Error::Truncated(inner_start + inner_len, es_payload.len()))?;

            if inner_tag == DESCRIPTOR_TAG_DECODER_CONFIG {
                object_type_indication = *inner_payload
                    .first()
                    .ok_or(Mp4Error::Truncated(1, inner_payload.len()))?;
                stream_type = inner_payload.get(1).map_or(0, |b| b >> 2);
                avg_bitrate = read_u32(inner_payload, 9)?;

                let mut dpos = 13;
                while dpos < inner_payload.len() {
                    let (d_tag, d_len, d_header_len) =
                        read_descriptor_header(&inner_payload[dpos..])?;
                    let d_start = dpos + d_header_len;
                    let d_payload = inner_payload
                        .get(d_start..d_start + d_len)
                        .ok_or(Mp4Error::Truncated(d_start + d_len, inner_payload.len()))?;
                    if d_tag == DESCRIPTOR_TAG_DECODER_SPECIFIC_INFO {
                        decoder_specific_info = d_payload.to_vec();
                    }
                    dpos = d_start + d_len;
                }
            }
            pos = inner_start + inner_len;
        }

        Ok(ParsedEsds {
            object_type_indication,
            stream_type,
            avg_bitrate,
            decoder_specific_info,
        })
    }
}
