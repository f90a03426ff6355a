//! Command descriptor block decoding.
//!
//! Multi-byte fields are big-endian and frequently misaligned, so they are
//! read byte-wise from the block.

use crate::{Error, Result};
use std::fmt;

/// TEST UNIT READY
pub const TEST_UNIT_READY: u8 = 0x00;
/// READ(6)
pub const READ_6: u8 = 0x08;
/// WRITE(6)
pub const WRITE_6: u8 = 0x0a;
/// INQUIRY
pub const INQUIRY: u8 = 0x12;
/// MODE SENSE(6)
pub const MODE_SENSE: u8 = 0x1a;
/// READ CAPACITY(10)
pub const READ_CAPACITY: u8 = 0x25;
/// READ(10)
pub const READ_10: u8 = 0x28;
/// WRITE(10)
pub const WRITE_10: u8 = 0x2a;
/// REPORT LUNS
pub const REPORT_LUNS: u8 = 0xa0;

/// Longest CDB accepted.
pub const MAX_CDB_LEN: usize = 16;

/// Mode page: caching.
pub const MODE_PAGE_CACHING: u8 = 0x08;
/// Mode page: return all pages.
pub const MODE_PAGE_ALL: u8 = 0x3f;

/// Raw command descriptor block.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Cdb {
    bytes: [u8; MAX_CDB_LEN],
    len: u8,
}

impl Cdb {
    /// Copy a CDB.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCdb`] if `bytes` is empty or longer than
    /// [`MAX_CDB_LEN`].
    pub fn new(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() || bytes.len() > MAX_CDB_LEN {
            return Err(Error::InvalidCdb(format!("length {} not in 1..={MAX_CDB_LEN}", bytes.len())));
        }
        let mut buf = [0u8; MAX_CDB_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        #[allow(clippy::cast_possible_truncation)]
        Ok(Self { bytes: buf, len: bytes.len() as u8 })
    }

    /// Operation code (first byte).
    #[must_use]
    pub fn opcode(&self) -> u8 {
        self.bytes[0]
    }

    /// The CDB bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..usize::from(self.len)]
    }

    /// Number of bytes in the CDB.
    #[must_use]
    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    /// Always false; a CDB holds at least the opcode.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn require(&self, needed: usize) -> Result<&[u8]> {
        if self.len() < needed {
            return Err(Error::InvalidCdb(format!(
                "opcode {:#04x} needs {needed} bytes, got {}",
                self.opcode(),
                self.len()
            )));
        }
        Ok(self.as_bytes())
    }

    /// Build READ(10)/WRITE(10).
    #[must_use]
    pub fn rw10(write: bool, lba: u32, blocks: u16) -> Self {
        let mut b = [0u8; 10];
        b[0] = if write { WRITE_10 } else { READ_10 };
        b[2..6].copy_from_slice(&lba.to_be_bytes());
        b[7..9].copy_from_slice(&blocks.to_be_bytes());
        Self::from_fixed(&b)
    }

    /// Build READ(6)/WRITE(6). Only the low 21 bits of `lba` are encoded; a
    /// `blocks` value of 0 means 256.
    #[must_use]
    pub fn rw6(write: bool, lba: u32, blocks: u8) -> Self {
        let lba = lba & 0x1f_ffff;
        let be = lba.to_be_bytes();
        Self::from_fixed(&[if write { WRITE_6 } else { READ_6 }, be[1], be[2], be[3], blocks, 0])
    }

    /// Build INQUIRY.
    #[must_use]
    pub fn inquiry(evpd: bool, page_code: u8, alloc_len: u16) -> Self {
        let len = alloc_len.to_be_bytes();
        Self::from_fixed(&[INQUIRY, u8::from(evpd), page_code, len[0], len[1], 0])
    }

    /// Build MODE SENSE(6).
    #[must_use]
    pub fn mode_sense(page_code: u8, alloc_len: u8) -> Self {
        Self::from_fixed(&[MODE_SENSE, 0, page_code & 0x3f, 0, alloc_len, 0])
    }

    /// Build a CDB with only the opcode set, padded to `len` bytes.
    #[must_use]
    pub fn opcode_only(opcode: u8, len: usize) -> Self {
        let mut b = [0u8; MAX_CDB_LEN];
        b[0] = opcode;
        Self::from_fixed(&b[..len.clamp(1, MAX_CDB_LEN)])
    }

    fn from_fixed(bytes: &[u8]) -> Self {
        let mut buf = [0u8; MAX_CDB_LEN];
        buf[..bytes.len()].copy_from_slice(bytes);
        #[allow(clippy::cast_possible_truncation)]
        Self { bytes: buf, len: bytes.len() as u8 }
    }
}

impl fmt::Debug for Cdb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cdb(")?;
        for (i, b) in self.as_bytes().iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{b:02x}")?;
        }
        write!(f, ")")
    }
}

fn get_u16(b: &[u8]) -> u16 {
    u16::from_be_bytes([b[0], b[1]])
}

fn get_u24(b: &[u8]) -> u32 {
    u32::from_be_bytes([0, b[0], b[1], b[2]])
}

fn get_u32(b: &[u8]) -> u32 {
    u32::from_be_bytes([b[0], b[1], b[2], b[3]])
}

/// Which CDB layout a READ/WRITE came in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RwForm {
    /// 6-byte: 21-bit LBA, 8-bit count (0 = 256).
    Six,
    /// 10-byte: 32-bit LBA, 16-bit count.
    Ten,
}

/// Decoded operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScsiOp {
    /// TEST UNIT READY.
    TestUnitReady,
    /// INQUIRY, standard or vital product data.
    Inquiry {
        /// EVPD bit.
        evpd: bool,
        /// Requested VPD page.
        page_code: u8,
    },
    /// REPORT LUNS.
    ReportLuns,
    /// READ CAPACITY(10).
    ReadCapacity,
    /// MODE SENSE(6).
    ModeSense {
        /// Requested page code (low 6 bits).
        page_code: u8,
        /// Allocation length.
        alloc_len: u8,
    },
    /// READ(6)/READ(10).
    Read {
        /// First logical block.
        lba: u32,
        /// Number of blocks.
        blocks: u32,
        /// CDB layout.
        form: RwForm,
    },
    /// WRITE(6)/WRITE(10).
    Write {
        /// First logical block.
        lba: u32,
        /// Number of blocks.
        blocks: u32,
        /// CDB layout.
        form: RwForm,
    },
    /// Opcode this target does not implement.
    Unknown(u8),
}

impl ScsiOp {
    /// Decode a CDB.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCdb`] if the block is too short for its opcode.
    /// Unrecognized opcodes decode to [`ScsiOp::Unknown`].
    pub fn parse(cdb: &Cdb) -> Result<Self> {
        let op = match cdb.opcode() {
            TEST_UNIT_READY => Self::TestUnitReady,
            INQUIRY => {
                let b = cdb.require(3)?;
                Self::Inquiry { evpd: b[1] & 1 != 0, page_code: b[2] }
            }
            REPORT_LUNS => Self::ReportLuns,
            READ_CAPACITY => Self::ReadCapacity,
            MODE_SENSE => {
                let b = cdb.require(5)?;
                Self::ModeSense { page_code: b[2] & 0x3f, alloc_len: b[4] }
            }
            READ_6 | WRITE_6 => {
                let b = cdb.require(5)?;
                let lba = get_u24(&b[1..4]) & 0x1f_ffff;
                let blocks = if b[4] == 0 { 256 } else { u32::from(b[4]) };
                if b[0] == READ_6 {
                    Self::Read { lba, blocks, form: RwForm::Six }
                } else {
                    Self::Write { lba, blocks, form: RwForm::Six }
                }
            }
            READ_10 | WRITE_10 => {
                let b = cdb.require(9)?;
                let lba = get_u32(&b[2..6]);
                let blocks = u32::from(get_u16(&b[7..9]));
                if b[0] == READ_10 {
                    Self::Read { lba, blocks, form: RwForm::Ten }
                } else {
                    Self::Write { lba, blocks, form: RwForm::Ten }
                }
            }
            other => Self::Unknown(other),
        };
        Ok(op)
    }

    /// True for READ and WRITE.
    #[must_use]
    pub fn is_data_transfer(&self) -> bool {
        matches!(self, Self::Read { .. } | Self::Write { .. })
    }

    /// Short name for logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::TestUnitReady => "TEST_UNIT_READY",
            Self::Inquiry { .. } => "INQUIRY",
            Self::ReportLuns => "REPORT_LUNS",
            Self::ReadCapacity => "READ_CAPACITY",
            Self::ModeSense { .. } => "MODE_SENSE",
            Self::Read { form: RwForm::Six, .. } => "READ_6",
            Self::Read { form: RwForm::Ten, .. } => "READ_10",
            Self::Write { form: RwForm::Six, .. } => "WRITE_6",
            Self::Write { form: RwForm::Ten, .. } => "WRITE_10",
            Self::Unknown(_) => "UNKNOWN",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cdb_new_rejects_bad_lengths() {
        assert!(Cdb::new(&[]).is_err());
        assert!(Cdb::new(&[0u8; 17]).is_err());
        assert_eq!(Cdb::new(&[0x12, 0, 0, 0, 36, 0]).unwrap().len(), 6);
    }

    #[test]
    fn test_parse_read_10() {
        let cdb = Cdb::new(&[0x28, 0, 0x01, 0x02, 0x03, 0x04, 0, 0x01, 0x00, 0]).unwrap();
        assert_eq!(
            ScsiOp::parse(&cdb).unwrap(),
            ScsiOp::Read { lba: 0x0102_0304, blocks: 256, form: RwForm::Ten }
        );
    }

    #[test]
    fn test_parse_write_10_builder() {
        let cdb = Cdb::rw10(true, 0xdead_beef, 4);
        assert_eq!(
            ScsiOp::parse(&cdb).unwrap(),
            ScsiOp::Write { lba: 0xdead_beef, blocks: 4, form: RwForm::Ten }
        );
    }

    #[test]
    fn test_parse_read_6_masks_lba_to_21_bits() {
        let cdb = Cdb::new(&[0x08, 0xff, 0xff, 0xff, 8, 0]).unwrap();
        assert_eq!(
            ScsiOp::parse(&cdb).unwrap(),
            ScsiOp::Read { lba: 0x1f_ffff, blocks: 8, form: RwForm::Six }
        );
    }

    #[test]
    fn test_parse_rw6_zero_count_means_256() {
        let cdb = Cdb::rw6(true, 10, 0);
        assert_eq!(
            ScsiOp::parse(&cdb).unwrap(),
            ScsiOp::Write { lba: 10, blocks: 256, form: RwForm::Six }
        );
    }

    #[test]
    fn test_parse_rw10_zero_count_is_zero() {
        let cdb = Cdb::rw10(false, 10, 0);
        assert_eq!(
            ScsiOp::parse(&cdb).unwrap(),
            ScsiOp::Read { lba: 10, blocks: 0, form: RwForm::Ten }
        );
    }

    #[test]
    fn test_parse_inquiry_and_mode_sense() {
        assert_eq!(
            ScsiOp::parse(&Cdb::inquiry(true, 0x80, 255)).unwrap(),
            ScsiOp::Inquiry { evpd: true, page_code: 0x80 }
        );
        assert_eq!(
            ScsiOp::parse(&Cdb::mode_sense(0x3f, 192)).unwrap(),
            ScsiOp::ModeSense { page_code: 0x3f, alloc_len: 192 }
        );
    }

    #[test]
    fn test_parse_mode_sense_ignores_page_control_bits() {
        let cdb = Cdb::new(&[0x1a, 0, 0xc8, 0, 7, 0]).unwrap();
        assert_eq!(
            ScsiOp::parse(&cdb).unwrap(),
            ScsiOp::ModeSense { page_code: 0x08, alloc_len: 7 }
        );
    }

    #[test]
    fn test_parse_short_cdb_is_error() {
        let cdb = Cdb::new(&[0x28, 0, 0, 0]).unwrap();
        assert!(matches!(ScsiOp::parse(&cdb), Err(Error::InvalidCdb(_))));
    }

    #[test]
    fn test_parse_unknown_opcode() {
        let cdb = Cdb::opcode_only(0x35, 10);
        assert_eq!(ScsiOp::parse(&cdb).unwrap(), ScsiOp::Unknown(0x35));
    }

    #[test]
    fn test_parse_no_data_opcodes() {
        assert_eq!(
            ScsiOp::parse(&Cdb::opcode_only(TEST_UNIT_READY, 6)).unwrap(),
            ScsiOp::TestUnitReady
        );
        assert_eq!(ScsiOp::parse(&Cdb::opcode_only(REPORT_LUNS, 12)).unwrap(), ScsiOp::ReportLuns);
        assert_eq!(
            ScsiOp::parse(&Cdb::opcode_only(READ_CAPACITY, 10)).unwrap(),
            ScsiOp::ReadCapacity
        );
    }

    #[test]
    fn test_op_names() {
        assert_eq!(ScsiOp::parse(&Cdb::rw6(false, 0, 1)).unwrap().name(), "READ_6");
        assert_eq!(ScsiOp::parse(&Cdb::rw10(true, 0, 1)).unwrap().name(), "WRITE_10");
        assert!(ScsiOp::parse(&Cdb::rw10(true, 0, 1)).unwrap().is_data_transfer());
        assert!(!ScsiOp::ReportLuns.is_data_transfer());
    }

    #[test]
    fn test_cdb_debug_hex() {
        let cdb = Cdb::new(&[0x12, 0x01, 0x00]).unwrap();
        assert_eq!(format!("{cdb:?}"), "Cdb(12 01 00)");
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn parse_never_panics(bytes in prop::collection::vec(any::<u8>(), 1..=MAX_CDB_LEN)) {
                let cdb = Cdb::new(&bytes).unwrap();
                let _ = ScsiOp::parse(&cdb);
            }

            #[test]
            fn rw10_fields_survive_encoding(write in any::<bool>(), lba in any::<u32>(), blocks in any::<u16>()) {
                let op = ScsiOp::parse(&Cdb::rw10(write, lba, blocks)).unwrap();
                let blocks = u32::from(blocks);
                let expected = if write {
                    ScsiOp::Write { lba, blocks, form: RwForm::Ten }
                } else {
                    ScsiOp::Read { lba, blocks, form: RwForm::Ten }
                };
                prop_assert_eq!(op, expected);
            }

            #[test]
            fn rw6_count_zero_means_256(lba in 0u32..0x20_0000, blocks in any::<u8>()) {
                let op = ScsiOp::parse(&Cdb::rw6(false, lba, blocks)).unwrap();
                let want = if blocks == 0 { 256 } else { u32::from(blocks) };
                prop_assert_eq!(op, ScsiOp::Read { lba, blocks: want, form: RwForm::Six });
            }
        }
    }
}
