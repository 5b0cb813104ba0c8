use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use thiserror::Error;

/// Size in bytes of the header record.
pub const HEADER_SIZE: u32 = 256;
/// Bytes of ASCII space padding closing the header record.
pub const HEADER_PADDING: usize = 60;
/// GADGET2 particle type holding halo (dark matter) particles.
pub const HALO_TYPE: usize = 1;

pub const HEAD: BlockTag = BlockTag(*b"HEAD");
pub const POS: BlockTag = BlockTag(*b"POS ");
pub const VEL: BlockTag = BlockTag(*b"VEL ");
pub const ID: BlockTag = BlockTag(*b"ID  ");

#[derive(Debug, Error)]
pub enum Gadget2Error {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Expected block \"{expected}\", found \"{found}\"")]
    BadTag { expected: BlockTag, found: BlockTag },
    #[error("Malformed block framing: {0}")]
    Framing(String),
    #[error("Block of {0} bytes exceeds the 4-byte size field")]
    BlockTooLarge(usize),
    #[error("{0} particles exceed the particle counts of the header")]
    TooManyParticles(usize),
}

/// The four-character name of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockTag(pub [u8; 4]);

impl std::fmt::Display for BlockTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// The fixed 256-byte header record.
///
/// Fields are stored in declaration order, little-endian, followed by
/// [`HEADER_PADDING`] spaces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gadget2Header {
    pub npart: [u32; 6],
    pub massarr: [f64; 6],
    pub time: f64,
    pub redshift: f64,
    pub flag_sfr: i32,
    pub flag_feedback: i32,
    pub nall: [i32; 6],
    pub flag_cooling: i32,
    pub num_files: i32,
    pub box_size: f64,
    pub omega0: f64,
    pub omega_lambda: f64,
    pub hubble_param: f64,
    pub flag_age: i32,
    pub flag_metals: i32,
    pub nall_hw: [i32; 6],
    pub flag_entr_ics: i32,
}

impl Gadget2Header {
    /// Writes the 256-byte header record (without block framing).
    pub fn write_to(&self, writer: &mut impl Write) -> io::Result<()> {
        for &n in &self.npart {
            writer.write_u32::<LittleEndian>(n)?;
        }
        for &m in &self.massarr {
            writer.write_f64::<LittleEndian>(m)?;
        }
        writer.write_f64::<LittleEndian>(self.time)?;
        writer.write_f64::<LittleEndian>(self.redshift)?;
        writer.write_i32::<LittleEndian>(self.flag_sfr)?;
        writer.write_i32::<LittleEndian>(self.flag_feedback)?;
        for &n in &self.nall {
            writer.write_i32::<LittleEndian>(n)?;
        }
        writer.write_i32::<LittleEndian>(self.flag_cooling)?;
        writer.write_i32::<LittleEndian>(self.num_files)?;
        writer.write_f64::<LittleEndian>(self.box_size)?;
        writer.write_f64::<LittleEndian>(self.omega0)?;
        writer.write_f64::<LittleEndian>(self.omega_lambda)?;
        writer.write_f64::<LittleEndian>(self.hubble_param)?;
        writer.write_i32::<LittleEndian>(self.flag_age)?;
        writer.write_i32::<LittleEndian>(self.flag_metals)?;
        for &n in &self.nall_hw {
            writer.write_i32::<LittleEndian>(n)?;
        }
        writer.write_i32::<LittleEndian>(self.flag_entr_ics)?;
        writer.write_all(&[b' '; HEADER_PADDING])
    }

    /// Reads the 256-byte header record (without block framing).
    pub fn read_from(reader: &mut impl Read) -> io::Result<Self> {
        let mut header = Self::default();
        reader.read_u32_into::<LittleEndian>(&mut header.npart)?;
        reader.read_f64_into::<LittleEndian>(&mut header.massarr)?;
        header.time = reader.read_f64::<LittleEndian>()?;
        header.redshift = reader.read_f64::<LittleEndian>()?;
        header.flag_sfr = reader.read_i32::<LittleEndian>()?;
        header.flag_feedback = reader.read_i32::<LittleEndian>()?;
        reader.read_i32_into::<LittleEndian>(&mut header.nall)?;
        header.flag_cooling = reader.read_i32::<LittleEndian>()?;
        header.num_files = reader.read_i32::<LittleEndian>()?;
        header.box_size = reader.read_f64::<LittleEndian>()?;
        header.omega0 = reader.read_f64::<LittleEndian>()?;
        header.omega_lambda = reader.read_f64::<LittleEndian>()?;
        header.hubble_param = reader.read_f64::<LittleEndian>()?;
        header.flag_age = reader.read_i32::<LittleEndian>()?;
        header.flag_metals = reader.read_i32::<LittleEndian>()?;
        reader.read_i32_into::<LittleEndian>(&mut header.nall_hw)?;
        header.flag_entr_ics = reader.read_i32::<LittleEndian>()?;
        let mut padding = [0u8; HEADER_PADDING];
        reader.read_exact(&mut padding)?;
        Ok(header)
    }
}

/// Converts a payload size to the 4-byte size field.
pub fn block_size(bytes: usize) -> Result<u32, Gadget2Error> {
    u32::try_from(bytes)
        .ok()
        .filter(|size| size.checked_add(8).is_some())
        .ok_or(Gadget2Error::BlockTooLarge(bytes))
}

/// Writes the tag record and the opening size bracket of a block:
/// `[8]["TAG "][size + 8][8][size]`.
pub fn write_block_start(writer: &mut impl Write, tag: BlockTag, size: u32) -> io::Result<()> {
    writer.write_u32::<LittleEndian>(8)?;
    writer.write_all(&tag.0)?;
    writer.write_u32::<LittleEndian>(size + 8)?;
    writer.write_u32::<LittleEndian>(8)?;
    writer.write_u32::<LittleEndian>(size)
}

/// Writes the closing size bracket of a block.
pub fn write_block_end(writer: &mut impl Write, size: u32) -> io::Result<()> {
    writer.write_u32::<LittleEndian>(size)
}

/// A cursor over the blocks of a file, following the size brackets.
///
/// Every record (the tag record as well as the payload record) is bracketed
/// by its size; the cursor jumps from record to record by those sizes.
#[derive(Debug)]
pub struct BlockReader<R> {
    inner: R,
    offset: u64,
}

impl<R: Read + Seek> BlockReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, offset: 0 }
    }

    /// Moves to the next record and returns the size of its contents,
    /// leaving the reader positioned at the first content byte.
    fn next_record(&mut self) -> Result<u32, Gadget2Error> {
        self.inner.seek(SeekFrom::Start(self.offset))?;
        let size = self.inner.read_u32::<LittleEndian>()?;
        self.offset += 8 + u64::from(size);
        Ok(size)
    }

    /// Enters the next block, verifying its tag.
    ///
    /// # Return
    ///
    /// The payload size in bytes. The reader is positioned at the first
    /// payload byte.
    ///
    /// # Errors
    ///
    /// Returns [`Gadget2Error::BadTag`] if the block carries a different tag
    /// and [`Gadget2Error::Framing`] if its brackets are inconsistent.
    pub fn enter(&mut self, expected: BlockTag) -> Result<u32, Gadget2Error> {
        let tag_record = self.next_record()?;
        if tag_record != 8 {
            return Err(Gadget2Error::Framing(format!(
                "tag record of {} bytes, expected 8",
                tag_record
            )));
        }
        let mut tag = [0u8; 4];
        self.inner.read_exact(&mut tag)?;
        let found = BlockTag(tag);
        if found != expected {
            return Err(Gadget2Error::BadTag { expected, found });
        }
        let announced = self.inner.read_u32::<LittleEndian>()?;
        let size = self.next_record()?;
        if u64::from(announced) != u64::from(size) + 8 {
            return Err(Gadget2Error::Framing(format!(
                "block \"{}\" announces {} bytes but holds {}",
                expected, announced, size
            )));
        }
        Ok(size)
    }

    /// Skips `bytes` within the current payload.
    pub fn skip(&mut self, bytes: u64) -> Result<(), Gadget2Error> {
        self.inner.seek(SeekFrom::Current(bytes as i64))?;
        Ok(())
    }

    pub fn read_header(&mut self) -> Result<Gadget2Header, Gadget2Error> {
        let size = self.enter(HEAD)?;
        if size != HEADER_SIZE {
            return Err(Gadget2Error::Framing(format!(
                "header of {} bytes, expected {}",
                size, HEADER_SIZE
            )));
        }
        Ok(Gadget2Header::read_from(&mut self.inner)?)
    }

    pub fn read_f32s(&mut self, count: usize) -> Result<Vec<f32>, Gadget2Error> {
        let mut values = vec![0f32; count];
        self.inner.read_f32_into::<LittleEndian>(&mut values)?;
        Ok(values)
    }

    pub fn read_u32s(&mut self, count: usize) -> Result<Vec<u32>, Gadget2Error> {
        let mut values = vec![0u32; count];
        self.inner.read_u32_into::<LittleEndian>(&mut values)?;
        Ok(values)
    }
}

/// Whether `path` starts with a HEAD block. Never fails.
pub fn probe(path: &Path) -> bool {
    let check = || -> io::Result<bool> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(4))?;
        let mut tag = [0u8; 4];
        file.read_exact(&mut tag)?;
        Ok(BlockTag(tag) == HEAD)
    };
    check().unwrap_or(false)
}
