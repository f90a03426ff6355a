//! Sense data for non-success completions.

/// Size of the sense buffer carried by every command.
pub const SENSE_BUFFER_SIZE: usize = 96;

/// Response code for current errors in fixed format.
pub const FIXED_SENSE_CURRENT: u8 = 0x70;

/// Additional sense length written into fixed-format sense.
pub const FIXED_SENSE_ADDITIONAL_LEN: u8 = 11;

/// ASC: logical block address out of range.
pub const ASC_LBA_OUT_OF_RANGE: u8 = 0x21;
/// ASC: invalid field in CDB.
pub const ASC_INVALID_FIELD_IN_CDB: u8 = 0x24;

/// Sense keys used by this target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SenseKey {
    /// No sense.
    NoSense = 0x00,
    /// Device not ready.
    NotReady = 0x02,
    /// Medium error.
    MediumError = 0x03,
    /// Hardware error.
    HardwareError = 0x04,
    /// Illegal request.
    IllegalRequest = 0x05,
    /// Unit attention.
    UnitAttention = 0x06,
    /// Aborted command.
    AbortedCommand = 0x0b,
}

impl SenseKey {
    /// Decode a sense key nibble.
    #[must_use]
    pub fn from_u8(key: u8) -> Option<Self> {
        match key & 0x0f {
            0x00 => Some(Self::NoSense),
            0x02 => Some(Self::NotReady),
            0x03 => Some(Self::MediumError),
            0x04 => Some(Self::HardwareError),
            0x05 => Some(Self::IllegalRequest),
            0x06 => Some(Self::UnitAttention),
            0x0b => Some(Self::AbortedCommand),
            _ => None,
        }
    }
}

/// Key, additional sense code and qualifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseRecord {
    /// Sense key.
    pub key: SenseKey,
    /// Additional sense code.
    pub asc: u8,
    /// Additional sense code qualifier.
    pub ascq: u8,
}

impl SenseRecord {
    /// Build a record.
    #[must_use]
    pub const fn new(key: SenseKey, asc: u8, ascq: u8) -> Self {
        Self { key, asc, ascq }
    }

    /// ILLEGAL REQUEST / LBA out of range.
    #[must_use]
    pub const fn lba_out_of_range() -> Self {
        Self::new(SenseKey::IllegalRequest, ASC_LBA_OUT_OF_RANGE, 0)
    }

    /// ILLEGAL REQUEST / invalid field in CDB.
    #[must_use]
    pub const fn invalid_field_in_cdb() -> Self {
        Self::new(SenseKey::IllegalRequest, ASC_INVALID_FIELD_IN_CDB, 0)
    }

    /// Encode as fixed-format sense into a zeroed buffer.
    #[must_use]
    pub fn to_fixed(&self) -> [u8; SENSE_BUFFER_SIZE] {
        let mut buf = [0u8; SENSE_BUFFER_SIZE];
        buf[0] = FIXED_SENSE_CURRENT;
        buf[2] = self.key as u8;
        buf[7] = FIXED_SENSE_ADDITIONAL_LEN;
        buf[12] = self.asc;
        buf[13] = self.ascq;
        buf
    }

    /// Decode fixed-format sense. Returns `None` for other response codes or
    /// unknown sense keys.
    #[must_use]
    pub fn from_fixed(buf: &[u8]) -> Option<Self> {
        if buf.len() < 14 || buf[0] & 0x7f != FIXED_SENSE_CURRENT {
            return None;
        }
        Some(Self { key: SenseKey::from_u8(buf[2])?, asc: buf[12], ascq: buf[13] })
    }
}
