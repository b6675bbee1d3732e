use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use std::io::{Cursor, Write};

use crate::error::{ZipError, ZipResult};

pub const MAX_16_BITS: u64 = 0xFFFF;
pub const MAX_32_BITS: u64 = 0xFFFF_FFFF;

/// General purpose bit flags
pub const FLAG_ENCRYPTED: u16 = 0x0001;
pub const FLAG_LEVEL: u16 = 0x0006;
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
pub const FLAG_ENHANCED_DEFLATING: u16 = 0x0010;
pub const FLAG_LANGUAGE_ENCODING: u16 = 0x0800;

/// MS-DOS directory bit in the low byte of the external attributes
pub const MSDOS_DIRECTORY: u32 = 0x10;

pub const VERSION_DEFLATE: u16 = 0x14;
pub const VERSION_ZIP64: u16 = 0x2D;
pub const VERSION_AES: u16 = 0x33;

pub const METHOD_STORED: u16 = 0;
pub const METHOD_DEFLATE: u16 = 8;
pub const METHOD_AES: u16 = 99;

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    /// WinZip AES placeholder; the real method lives in the AES extra field
    Aes,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            METHOD_STORED => CompressionMethod::Stored,
            METHOD_DEFLATE => CompressionMethod::Deflate,
            METHOD_AES => CompressionMethod::Aes,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => METHOD_STORED,
            CompressionMethod::Deflate => METHOD_DEFLATE,
            CompressionMethod::Aes => METHOD_AES,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

fn check_signature(data: &[u8], signature: u32, size: usize, what: &'static str) -> ZipResult<()> {
    if data.len() < size {
        return Err(ZipError::InvalidArchive(what));
    }
    let mut cursor = Cursor::new(data);
    if cursor.read_u32::<LittleEndian>()? != signature {
        return Err(ZipError::InvalidArchive(what));
    }
    Ok(())
}

/// End of Central Directory (EOCD) - 22 bytes minimum
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: u32 = 0x0605_4b50;
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        check_signature(
            data,
            Self::SIGNATURE,
            Self::SIZE,
            "End of central directory not found",
        )?;
        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>()?,
            disk_with_cd: cursor.read_u16::<LittleEndian>()?,
            disk_entries: cursor.read_u16::<LittleEndian>()?,
            total_entries: cursor.read_u16::<LittleEndian>()?,
            cd_size: cursor.read_u32::<LittleEndian>()?,
            cd_offset: cursor.read_u32::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    /// Any sentinel means the real values live in the Zip64 record.
    pub fn is_zip64(&self) -> bool {
        self.total_entries as u64 == MAX_16_BITS
            || self.cd_size as u64 == MAX_32_BITS
            || self.cd_offset as u64 == MAX_32_BITS
    }

    pub fn write<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_u32::<LittleEndian>(Self::SIGNATURE)?;
        out.write_u16::<LittleEndian>(self.disk_number)?;
        out.write_u16::<LittleEndian>(self.disk_with_cd)?;
        out.write_u16::<LittleEndian>(self.disk_entries)?;
        out.write_u16::<LittleEndian>(self.total_entries)?;
        out.write_u32::<LittleEndian>(self.cd_size)?;
        out.write_u32::<LittleEndian>(self.cd_offset)?;
        out.write_u16::<LittleEndian>(self.comment_len)
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: u32 = 0x0706_4b50;
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        check_signature(
            data,
            Self::SIGNATURE,
            Self::SIZE,
            "Zip64 end of central directory locator not found",
        )?;
        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>()?,
            eocd64_offset: cursor.read_u64::<LittleEndian>()?,
            total_disks: cursor.read_u32::<LittleEndian>()?,
        })
    }

    pub fn write<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_u32::<LittleEndian>(Self::SIGNATURE)?;
        out.write_u32::<LittleEndian>(self.disk_with_eocd64)?;
        out.write_u64::<LittleEndian>(self.eocd64_offset)?;
        out.write_u32::<LittleEndian>(self.total_disks)
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: u32 = 0x0606_4b50;
    pub const MIN_SIZE: usize = 56;

    pub fn has_signature(data: &[u8]) -> bool {
        check_signature(data, Self::SIGNATURE, 4, "").is_ok()
    }

    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        check_signature(
            data,
            Self::SIGNATURE,
            Self::MIN_SIZE,
            "Zip64 end of central directory not found",
        )?;
        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>()?,
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            disk_number: cursor.read_u32::<LittleEndian>()?,
            disk_with_cd: cursor.read_u32::<LittleEndian>()?,
            disk_entries: cursor.read_u64::<LittleEndian>()?,
            total_entries: cursor.read_u64::<LittleEndian>()?,
            cd_size: cursor.read_u64::<LittleEndian>()?,
            cd_offset: cursor.read_u64::<LittleEndian>()?,
        })
    }

    pub fn write<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_u32::<LittleEndian>(Self::SIGNATURE)?;
        out.write_u64::<LittleEndian>(self.eocd64_size)?;
        out.write_u16::<LittleEndian>(self.version_made_by)?;
        out.write_u16::<LittleEndian>(self.version_needed)?;
        out.write_u32::<LittleEndian>(self.disk_number)?;
        out.write_u32::<LittleEndian>(self.disk_with_cd)?;
        out.write_u64::<LittleEndian>(self.disk_entries)?;
        out.write_u64::<LittleEndian>(self.total_entries)?;
        out.write_u64::<LittleEndian>(self.cd_size)?;
        out.write_u64::<LittleEndian>(self.cd_offset)
    }
}

/// Central Directory File Header (CDFH), fixed part - 46 bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CentralDirectoryHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name_len: u16,
    pub extra_len: u16,
    pub comment_len: u16,
    pub disk_start: u16,
    pub internal_attr: u16,
    pub external_attr: u32,
    pub lfh_offset: u32,
}

impl CentralDirectoryHeader {
    pub const SIGNATURE: u32 = 0x0201_4b50;
    pub const SIZE: usize = 46;

    pub fn has_signature(data: &[u8]) -> bool {
        check_signature(data, Self::SIGNATURE, 4, "").is_ok()
    }

    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        check_signature(
            data,
            Self::SIGNATURE,
            Self::SIZE,
            "Central directory header not found",
        )?;
        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            version_made_by: cursor.read_u16::<LittleEndian>()?,
            version_needed: cursor.read_u16::<LittleEndian>()?,
            flags: cursor.read_u16::<LittleEndian>()?,
            method: cursor.read_u16::<LittleEndian>()?,
            last_mod_time: cursor.read_u16::<LittleEndian>()?,
            last_mod_date: cursor.read_u16::<LittleEndian>()?,
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()?,
            uncompressed_size: cursor.read_u32::<LittleEndian>()?,
            name_len: cursor.read_u16::<LittleEndian>()?,
            extra_len: cursor.read_u16::<LittleEndian>()?,
            comment_len: cursor.read_u16::<LittleEndian>()?,
            disk_start: cursor.read_u16::<LittleEndian>()?,
            internal_attr: cursor.read_u16::<LittleEndian>()?,
            external_attr: cursor.read_u32::<LittleEndian>()?,
            lfh_offset: cursor.read_u32::<LittleEndian>()?,
        })
    }

    /// Total record length including the variable parts
    pub fn record_len(&self) -> usize {
        Self::SIZE + self.name_len as usize + self.extra_len as usize + self.comment_len as usize
    }

    pub fn write<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_u32::<LittleEndian>(Self::SIGNATURE)?;
        out.write_u16::<LittleEndian>(self.version_made_by)?;
        out.write_u16::<LittleEndian>(self.version_needed)?;
        out.write_u16::<LittleEndian>(self.flags)?;
        out.write_u16::<LittleEndian>(self.method)?;
        out.write_u16::<LittleEndian>(self.last_mod_time)?;
        out.write_u16::<LittleEndian>(self.last_mod_date)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        out.write_u32::<LittleEndian>(self.compressed_size)?;
        out.write_u32::<LittleEndian>(self.uncompressed_size)?;
        out.write_u16::<LittleEndian>(self.name_len)?;
        out.write_u16::<LittleEndian>(self.extra_len)?;
        out.write_u16::<LittleEndian>(self.comment_len)?;
        out.write_u16::<LittleEndian>(self.disk_start)?;
        out.write_u16::<LittleEndian>(self.internal_attr)?;
        out.write_u32::<LittleEndian>(self.external_attr)?;
        out.write_u32::<LittleEndian>(self.lfh_offset)
    }
}

/// Local File Header (LFH), fixed part - 30 bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub name_len: u16,
    pub extra_len: u16,
}

impl LocalFileHeader {
    pub const SIGNATURE: u32 = 0x0403_4b50;
    pub const SIZE: usize = 30;

    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        check_signature(data, Self::SIGNATURE, Self::SIZE, "Local file header not found")?;
        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            version_needed: cursor.read_u16::<LittleEndian>()?,
            flags: cursor.read_u16::<LittleEndian>()?,
            method: cursor.read_u16::<LittleEndian>()?,
            last_mod_time: cursor.read_u16::<LittleEndian>()?,
            last_mod_date: cursor.read_u16::<LittleEndian>()?,
            crc32: cursor.read_u32::<LittleEndian>()?,
            compressed_size: cursor.read_u32::<LittleEndian>()?,
            uncompressed_size: cursor.read_u32::<LittleEndian>()?,
            name_len: cursor.read_u16::<LittleEndian>()?,
            extra_len: cursor.read_u16::<LittleEndian>()?,
        })
    }

    pub fn write<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        out.write_u32::<LittleEndian>(Self::SIGNATURE)?;
        out.write_u16::<LittleEndian>(self.version_needed)?;
        out.write_u16::<LittleEndian>(self.flags)?;
        out.write_u16::<LittleEndian>(self.method)?;
        out.write_u16::<LittleEndian>(self.last_mod_time)?;
        out.write_u16::<LittleEndian>(self.last_mod_date)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        out.write_u32::<LittleEndian>(self.compressed_size)?;
        out.write_u32::<LittleEndian>(self.uncompressed_size)?;
        out.write_u16::<LittleEndian>(self.name_len)?;
        out.write_u16::<LittleEndian>(self.extra_len)
    }
}

/// Trailer carrying the CRC and sizes once the data has been written
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    pub const SIGNATURE: u32 = 0x0807_4b50;

    pub fn len(zip64: bool) -> usize {
        if zip64 { 24 } else { 16 }
    }

    pub fn write<W: Write>(&self, out: &mut W, zip64: bool) -> std::io::Result<()> {
        out.write_u32::<LittleEndian>(Self::SIGNATURE)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        if zip64 {
            out.write_u64::<LittleEndian>(self.compressed_size)?;
            out.write_u64::<LittleEndian>(self.uncompressed_size)
        } else {
            out.write_u32::<LittleEndian>(self.compressed_size as u32)?;
            out.write_u32::<LittleEndian>(self.uncompressed_size as u32)
        }
    }
}

/// Decode an MS-DOS date and time; `None` if the fields are out of range.
pub fn parse_msdos(time: u16, date: u16) -> Option<NaiveDateTime> {
    let seconds = (time & 0x1F) as u32 * 2;
    let minutes = ((time >> 5) & 0x3F) as u32;
    let hours = (time >> 11) as u32;

    let days = (date & 0x1F) as u32;
    let months = ((date >> 5) & 0x0F) as u32;
    let years = (date >> 9) as i32 + 1980;

    NaiveDate::from_ymd_opt(years, months, days)?.and_hms_opt(hours, minutes, seconds)
}

/// Encode a timestamp as MS-DOS `(time, date)`. Seconds are rounded down to even.
pub fn to_msdos(datetime: &NaiveDateTime) -> (u16, u16) {
    let time = (datetime.hour() << 11) | (datetime.minute() << 5) | (datetime.second() / 2);
    let date = (((datetime.year() - 1980).max(0) as u32) << 9)
        | (datetime.month() << 5)
        | datetime.day();
    (time as u16, date as u16)
}

pub fn msdos_range() -> (NaiveDateTime, NaiveDateTime) {
    let start = NaiveDate::from_ymd_opt(1980, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0));
    let end = NaiveDate::from_ymd_opt(2107, 12, 31).and_then(|d| d.and_hms_opt(23, 59, 59));
    (
        start.unwrap_or(NaiveDateTime::MIN),
        end.unwrap_or(NaiveDateTime::MAX),
    )
}
