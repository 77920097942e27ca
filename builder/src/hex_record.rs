// Licensed under the Apache-2.0 license

//! Intel-HEX line records.

use crate::error::RecordError;
use ihex::{ReaderError, Record};
use num_enum::TryFromPrimitive;

#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive)]
#[repr(u8)]
pub enum RecordType {
    Data = 0x00,
    EndOfFile = 0x01,
    ExtendedSegmentAddress = 0x02,
    StartSegmentAddress = 0x03,
    ExtendedLinearAddress = 0x04,
    StartLinearAddress = 0x05,
}

/// One decoded and checksum-verified line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HexRecord {
    /// Load offset of a data record, zero for every other type.
    pub address: u16,
    pub record_type: RecordType,
    /// Payload bytes in file order.
    pub data: Vec<u8>,
}

impl From<Record> for HexRecord {
    fn from(record: Record) -> Self {
        let (address, record_type, data) = match record {
            Record::Data { offset, value } => (offset, RecordType::Data, value),
            Record::EndOfFile => (0, RecordType::EndOfFile, Vec::new()),
            Record::ExtendedSegmentAddress(segment) => (
                0,
                RecordType::ExtendedSegmentAddress,
                segment.to_be_bytes().to_vec(),
            ),
            Record::StartSegmentAddress { cs, ip } => (
                0,
                RecordType::StartSegmentAddress,
                [cs.to_be_bytes(), ip.to_be_bytes()].concat(),
            ),
            Record::ExtendedLinearAddress(upper) => (
                0,
                RecordType::ExtendedLinearAddress,
                upper.to_be_bytes().to_vec(),
            ),
            Record::StartLinearAddress(start) => (
                0,
                RecordType::StartLinearAddress,
                start.to_be_bytes().to_vec(),
            ),
        };
        HexRecord {
            address,
            record_type,
            data,
        }
    }
}

/// Value of the two hex digits at `at`, if present and valid.
fn hex_byte(line: &str, at: usize) -> Option<u8> {
    line.get(at..at + 2).and_then(|digits| u8::from_str_radix(digits, 16).ok())
}

/// Maps a reader error to the record error it reports, using the raw line
/// for the record type where the reader does not carry it.
fn record_error(line: &str, err: ReaderError) -> RecordError {
    match err {
        ReaderError::MissingStartCode => RecordError::MissingColon,
        ReaderError::ContainsInvalidCharacters => RecordError::InvalidHex,
        ReaderError::ChecksumMismatch(..) => RecordError::Checksum,
        ReaderError::UnsupportedRecordType(record_type) => RecordError::UnknownType(record_type),
        ReaderError::InvalidLengthForType => {
            let record_type = hex_byte(line, 7).unwrap_or(0);
            let expected = match RecordType::try_from(record_type) {
                Ok(RecordType::ExtendedSegmentAddress | RecordType::ExtendedLinearAddress) => 2,
                Ok(RecordType::StartSegmentAddress | RecordType::StartLinearAddress) => 4,
                _ => 0,
            };
            RecordError::BadPayload(record_type, expected)
        }
        ReaderError::RecordTooShort
        | ReaderError::RecordTooLong
        | ReaderError::RecordNotEvenLength
        | ReaderError::PayloadLengthMismatch => RecordError::LengthMismatch,
    }
}

impl HexRecord {
    /// Parses `:LLAAAATT<data>CC`. Trailing whitespace (line endings) is
    /// ignored; anything else after the checksum is an error.
    pub fn parse(line: &[u8]) -> Result<Self, RecordError> {
        let line = core::str::from_utf8(line).map_err(|_| RecordError::InvalidHex)?.trim_end();
        if !line.starts_with(':') {
            return Err(RecordError::MissingColon);
        }
        let record = Record::from_record_string(line).map_err(|e| record_error(line, e))?;
        // The reader drops the address of an end record; the trailing byte
        // must still be the one of the canonical `:00000001FF`.
        if matches!(record, Record::EndOfFile) && hex_byte(line, line.len() - 2) != Some(0xFF) {
            return Err(RecordError::BadEndRecord);
        }
        Ok(record.into())
    }

    /// First two data bytes as a big-endian value.
    pub fn value_u16(&self) -> u16 {
        match self.data.as_slice() {
            [hi, lo, ..] => u16::from_be_bytes([*hi, *lo]),
            _ => 0,
        }
    }

    /// Start address carried by a start segment or start linear record.
    pub fn start_address(&self) -> Option<u32> {
        let &[a, b, c, d] = self.data.as_slice() else {
            return None;
        };
        let high = u16::from_be_bytes([a, b]) as u32;
        let low = u16::from_be_bytes([c, d]) as u32;
        match self.record_type {
            RecordType::StartSegmentAddress => Some((high << 4) + low),
            RecordType::StartLinearAddress => Some((high << 16) | low),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_record() {
        let record = HexRecord::parse(b":0400100001020304E2\r\n").unwrap();
        assert_eq!(record.address, 0x0010);
        assert_eq!(record.record_type, RecordType::Data);
        assert_eq!(record.data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_parse_end_record() {
        let record = HexRecord::parse(b":00000001FF").unwrap();
        assert_eq!(record.record_type, RecordType::EndOfFile);
        assert!(record.data.is_empty());
        // Valid checksum, but the trailing byte is not FF.
        assert_eq!(
            HexRecord::parse(b":00000101FE"),
            Err(RecordError::BadEndRecord)
        );
    }

    #[test]
    fn test_corrupted_checksum_is_rejected() {
        assert_eq!(
            HexRecord::parse(b":0400100001020304E3"),
            Err(RecordError::Checksum)
        );
    }

    #[test]
    fn test_malformed_lines() {
        assert_eq!(
            HexRecord::parse(b"0400100001020304E2"),
            Err(RecordError::MissingColon)
        );
        assert_eq!(HexRecord::parse(b""), Err(RecordError::MissingColon));
        assert_eq!(
            HexRecord::parse(b":04001000010203G4E2"),
            Err(RecordError::InvalidHex)
        );
        assert_eq!(
            HexRecord::parse(b":0400100001020304E"),
            Err(RecordError::LengthMismatch)
        );
        assert_eq!(
            HexRecord::parse(b":0500100001020304E1"),
            Err(RecordError::LengthMismatch)
        );
        assert_eq!(
            HexRecord::parse(b":00000006FA"),
            Err(RecordError::UnknownType(6))
        );
    }

    #[test]
    fn test_address_records() {
        let record = HexRecord::parse(b":020000021200EA").unwrap();
        assert_eq!(record.record_type, RecordType::ExtendedSegmentAddress);
        assert_eq!(record.value_u16(), 0x1200);

        let record = HexRecord::parse(b":020000040800F2").unwrap();
        assert_eq!(record.record_type, RecordType::ExtendedLinearAddress);
        assert_eq!(record.value_u16(), 0x0800);

        let record = HexRecord::parse(b":0400000300003800C1").unwrap();
        assert_eq!(record.start_address(), Some(0x3800));

        let record = HexRecord::parse(b":04000005000000CD2A").unwrap();
        assert_eq!(record.start_address(), Some(0xCD));

        assert_eq!(
            HexRecord::parse(b":0100000408F3"),
            Err(RecordError::BadPayload(4, 2))
        );
    }
}
