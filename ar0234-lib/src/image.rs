//! Ar0234 firmware image file
//!
//! Text images: one record per line, `<hex address> <hex byte> ...`, `//`
//! comments of which `// CRC 0x....` and `// Size 0x....` carry metadata,
//! and legacy `[TOTALSIZE` / `[BLOCKSIZE` headers that are ignored

use super::crc;
use super::definitions::{
    FLASH_APP_MAX, FLASH_APP_START, FLASH_NVM_MAX, FLASH_NVM_SIZE, FLASH_NVM_START,
    ISP_FLASH_MAX, MAX_CHUNK,
};
use super::protocol::ProtocolError;
use std::fmt;

/// Which flash regions an update cycle writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateIntent {
    None,
    Mcu,
    Nvm,
    McuNvm,
    Isp,
    /// Provisioning from a bare bootloader
    Boot,
}

impl fmt::Display for UpdateIntent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            UpdateIntent::None => "none",
            UpdateIntent::Mcu => "mcu",
            UpdateIntent::Nvm => "nvm",
            UpdateIntent::McuNvm => "mcu+nvm",
            UpdateIntent::Isp => "isp",
            UpdateIntent::Boot => "boot",
        };
        f.write_str(name)
    }
}

/// Single flash write decoded from one image line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub address: u32,
    pub bytes: Vec<u8>,
}

// Bits 8-9 of a legacy NVM offset select a page, wired in reverse order
const NVM_PAGE_SWAP: [u32; 4] = [0x300, 0x200, 0x100, 0x000];

/// Device address a record of `len` bytes is written to under `intent`,
/// `None` when skipped.
///
/// Region bounds are inclusive on both ends. A record starting inside its
/// region must also end there.
pub fn flash_target(
    intent: UpdateIntent,
    address: u32,
    len: usize,
) -> Result<Option<u32>, ProtocolError> {
    let last = u32::try_from(len.saturating_sub(1))
        .ok()
        .and_then(|span| address.checked_add(span))
        .unwrap_or(u32::MAX);
    let within = |start: u32, end: u32| -> Result<Option<u32>, ProtocolError> {
        if !(start..=end).contains(&address) {
            return Ok(None);
        }
        if last > end {
            return Err(ProtocolError::InvalidArgument(format!(
                "{} byte record at 0x{:X} runs past 0x{:X}",
                len, address, end
            )));
        }
        Ok(Some(address))
    };

    match intent {
        UpdateIntent::Mcu => within(FLASH_APP_START, FLASH_APP_MAX),
        UpdateIntent::McuNvm | UpdateIntent::Boot => within(FLASH_APP_START, FLASH_NVM_MAX),
        UpdateIntent::Nvm => {
            if address >= FLASH_NVM_START {
                return within(FLASH_NVM_START, FLASH_NVM_MAX);
            }
            if address >= FLASH_NVM_SIZE {
                return Ok(None);
            }
            // Legacy offsets are swapped page by page, a record cannot span two
            let page_end = address | 0xFF;
            if last > page_end {
                return Err(ProtocolError::InvalidArgument(format!(
                    "{} byte NVM record at 0x{:X} crosses a page boundary",
                    len, address
                )));
            }
            let page = ((address >> 8) & 0x3) as usize;
            Ok(Some(
                FLASH_NVM_START + ((address & 0xFCFF) | NVM_PAGE_SWAP[page]),
            ))
        }
        UpdateIntent::Isp => within(0, ISP_FLASH_MAX),
        UpdateIntent::None => Ok(None),
    }
}

enum Line {
    Skip,
    Crc(u16),
    Size(u32),
    Record(WriteRecord),
}

fn parse_error(line: usize, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::Parse {
        line,
        reason: reason.into(),
    }
}

// Hex literal following `0x` in a metadata comment
fn metadata_value(line_no: usize, line: &str) -> Result<u32, ProtocolError> {
    let missing = || parse_error(line_no, format!("no 0x value in \"{}\"", line));

    let pos = line
        .find("0x")
        .or_else(|| line.find("0X"))
        .ok_or_else(missing)?;
    let digits: String = line[pos + 2..]
        .chars()
        .take_while(|c| c.is_ascii_hexdigit())
        .collect();
    if digits.is_empty() {
        return Err(missing());
    }

    u32::from_str_radix(&digits, 16)
        .map_err(|_| parse_error(line_no, format!("bad metadata value in \"{}\"", line)))
}

fn classify(line_no: usize, line: &str) -> Result<Line, ProtocolError> {
    let line = line.trim_end_matches('\r');

    if line.starts_with("// CRC") {
        let crc = metadata_value(line_no, line)?;
        let crc = u16::try_from(crc)
            .map_err(|_| parse_error(line_no, format!("CRC 0x{:X} wider than 16 bits", crc)))?;
        return Ok(Line::Crc(crc));
    }

    if line.starts_with("// Size") {
        return Ok(Line::Size(metadata_value(line_no, line)?));
    }

    if line.starts_with("//")
        || line.starts_with("[TOTALSIZE")
        || line.starts_with("[BLOCKSIZE")
        || line.trim().is_empty()
    {
        return Ok(Line::Skip);
    }

    let mut words = line.split_whitespace();

    // Address
    let address = words.next().unwrap_or("");
    let address = u32::from_str_radix(address, 16)
        .map_err(|_| parse_error(line_no, format!("bad address \"{}\"", address)))?;

    // Payload
    let mut bytes = Vec::with_capacity(MAX_CHUNK);
    for word in words {
        let byte = u8::from_str_radix(word, 16)
            .map_err(|_| parse_error(line_no, format!("bad data byte \"{}\"", word)))?;
        bytes.push(byte);
    }

    if bytes.is_empty() {
        return Err(parse_error(line_no, "record without data"));
    }
    if bytes.len() > MAX_CHUNK {
        return Err(parse_error(
            line_no,
            format!("{} data bytes, at most {}", bytes.len(), MAX_CHUNK),
        ));
    }

    Ok(Line::Record(WriteRecord { address, bytes }))
}

/// Validated firmware image with its declared metadata
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    text: String,
    crc: Option<u16>,
    size: Option<u32>,
    record_count: usize,
}

impl FirmwareImage {
    /// Check every line up front, so a corrupt image never reaches the flash
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        let text = std::str::from_utf8(data)
            .map_err(|err| parse_error(0, format!("image is not text: {}", err)))?
            .to_string();

        let mut crc = None;
        let mut size = None;
        let mut record_count = 0;

        for (index, line) in text.lines().enumerate() {
            match classify(index + 1, line)? {
                Line::Crc(value) => crc = Some(value),
                Line::Size(value) => size = Some(value),
                Line::Record(_) => record_count += 1,
                Line::Skip => {}
            }
        }

        Ok(FirmwareImage {
            text,
            crc,
            size,
            record_count,
        })
    }

    /// CRC declared by the `// CRC` header
    pub fn crc(&self) -> Option<u16> {
        self.crc
    }

    /// Size declared by the `// Size` header
    pub fn size(&self) -> Option<u32> {
        self.size
    }

    pub fn record_count(&self) -> usize {
        self.record_count
    }

    /// Records in file order, restarting from the first line on every call
    pub fn records(&self) -> Records<'_> {
        Records {
            lines: self.text.lines().enumerate(),
        }
    }

    /// Host-side CRC-16 over the payload of all records, in file order
    pub fn payload_crc(&self) -> Result<u16, ProtocolError> {
        let mut digest = crc::digest();
        for record in self.records() {
            digest.update(&record?.bytes);
        }
        Ok(digest.finalize())
    }

    pub fn payload_len(&self) -> Result<usize, ProtocolError> {
        self.records()
            .try_fold(0, |total, record| Ok(total + record?.bytes.len()))
    }
}

pub struct Records<'a> {
    lines: std::iter::Enumerate<std::str::Lines<'a>>,
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<WriteRecord, ProtocolError>;

    fn next(&mut self) -> Option<Self::Item> {
        for (index, line) in self.lines.by_ref() {
            match classify(index + 1, line) {
                Ok(Line::Record(record)) => return Some(Ok(record)),
                Ok(_) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn records(image: &FirmwareImage) -> Vec<WriteRecord> {
        image.records().collect::<Result<_, _>>().unwrap()
    }

    #[test]
    fn single_record() {
        let image = FirmwareImage::parse(b"00001A00 01 02 03\n").unwrap();
        assert_eq!(
            records(&image),
            vec![WriteRecord {
                address: 0x1A00,
                bytes: vec![0x01, 0x02, 0x03]
            }]
        );
        assert_eq!(image.crc(), None);
        assert_eq!(image.size(), None);
    }

    #[test]
    fn comments_and_headers_yield_nothing() {
        let text = "// generated image\r\n[TOTALSIZE 1024]\r\n[BLOCKSIZE 64]\r\n\r\n";
        let image = FirmwareImage::parse(text.as_bytes()).unwrap();
        assert_eq!(image.record_count(), 0);
        assert!(records(&image).is_empty());
    }

    #[test]
    fn metadata_lines() {
        let text = "// CRC 0x1234\n// Size 0x00004000\n00000000 FF\n";
        let image = FirmwareImage::parse(text.as_bytes()).unwrap();
        assert_eq!(image.crc(), Some(0x1234));
        assert_eq!(image.size(), Some(0x4000));
        assert_eq!(image.record_count(), 1);
    }

    #[test]
    fn metadata_requires_hex_value() {
        for text in [
            &b"// CRC\n"[..],
            b"// CRC BEEF\n",
            b"// Size of image follows\n",
            b"00001A00 01\n// Size 0x\n",
        ] {
            assert!(
                matches!(FirmwareImage::parse(text), Err(ProtocolError::Parse { .. })),
                "{:?} accepted",
                String::from_utf8_lossy(text)
            );
        }

        let err = FirmwareImage::parse(b"// CRC\n// Size of image follows\n").unwrap_err();
        assert!(matches!(err, ProtocolError::Parse { line: 1, .. }));

        let image = FirmwareImage::parse(b"// CRC 0XBEEF\n").unwrap();
        assert_eq!(image.crc(), Some(0xBEEF));
    }

    #[test]
    fn crlf_and_restart() {
        let text = "00001A00 AA BB\r\n00001A02 CC\r\n";
        let image = FirmwareImage::parse(text.as_bytes()).unwrap();
        let first = records(&image);
        let second = records(&image);
        assert_eq!(first, second);
        assert_eq!(first[1].bytes, vec![0xCC]);
        assert_eq!(image.payload_len().unwrap(), 3);
        assert_eq!(image.payload_crc().unwrap(), crc::crc16(&[0xAA, 0xBB, 0xCC]));
    }

    #[test]
    fn malformed_address_aborts_parse() {
        let err = FirmwareImage::parse(b"00001A00 01\nZZ 01 02\n").unwrap_err();
        assert_eq!(
            err,
            ProtocolError::Parse {
                line: 2,
                reason: "bad address \"ZZ\"".to_string()
            }
        );
    }

    #[test]
    fn malformed_byte_and_oversized_lines() {
        assert!(matches!(
            FirmwareImage::parse(b"1A00 01 XYZ\n"),
            Err(ProtocolError::Parse { line: 1, .. })
        ));

        let mut line = String::from("1A00");
        for _ in 0..65 {
            line.push_str(" 00");
        }
        assert!(matches!(
            FirmwareImage::parse(line.as_bytes()),
            Err(ProtocolError::Parse { line: 1, .. })
        ));
    }

    // Start address of a one-byte record
    fn target(intent: UpdateIntent, address: u32) -> Option<u32> {
        flash_target(intent, address, 1).unwrap()
    }

    #[test]
    fn nvm_remap_swaps_pages() {
        assert_eq!(target(UpdateIntent::Nvm, 0x000), Some(0xF700));
        assert_eq!(target(UpdateIntent::Nvm, 0x100), Some(0xF600));
        assert_eq!(target(UpdateIntent::Nvm, 0x200), Some(0xF500));
        assert_eq!(target(UpdateIntent::Nvm, 0x300), Some(0xF400));
        assert_eq!(target(UpdateIntent::Nvm, 0x3FF), Some(0xF4FF));
        assert_eq!(target(UpdateIntent::Nvm, 0x042), Some(0xF742));
    }

    #[test]
    fn nvm_bounds() {
        assert_eq!(target(UpdateIntent::Nvm, 0x400), None);
        assert_eq!(target(UpdateIntent::Nvm, 0xF3FF), None);
        assert_eq!(target(UpdateIntent::Nvm, 0xF400), Some(0xF400));
        assert_eq!(target(UpdateIntent::Nvm, 0xF7FF), Some(0xF7FF));
        assert_eq!(target(UpdateIntent::Nvm, 0xF800), None);
    }

    #[test]
    fn app_and_combined_bounds() {
        assert_eq!(target(UpdateIntent::Mcu, 0x19FF), None);
        assert_eq!(target(UpdateIntent::Mcu, 0x1A00), Some(0x1A00));
        assert_eq!(target(UpdateIntent::Mcu, 0xF3FF), Some(0xF3FF));
        assert_eq!(target(UpdateIntent::Mcu, 0xF400), None);

        for intent in [UpdateIntent::McuNvm, UpdateIntent::Boot] {
            assert_eq!(target(intent, 0x1A00), Some(0x1A00));
            assert_eq!(target(intent, 0xF400), Some(0xF400));
            assert_eq!(target(intent, 0xF7FF), Some(0xF7FF));
            assert_eq!(target(intent, 0x0000), None);
            assert_eq!(target(intent, 0xF800), None);
        }

        assert_eq!(target(UpdateIntent::None, 0x1A00), None);
    }

    #[test]
    fn records_must_end_inside_their_region() {
        assert_eq!(flash_target(UpdateIntent::Mcu, 0xF3C0, 64), Ok(Some(0xF3C0)));
        assert!(matches!(
            flash_target(UpdateIntent::Mcu, 0xF3F0, 64),
            Err(ProtocolError::InvalidArgument(_))
        ));
        // Combined images run straight on into the NVM region
        assert_eq!(flash_target(UpdateIntent::McuNvm, 0xF3F0, 64), Ok(Some(0xF3F0)));
        assert!(flash_target(UpdateIntent::Boot, 0xF7F0, 17).is_err());
        assert!(flash_target(UpdateIntent::Nvm, 0xF7C1, 64).is_err());
        assert!(flash_target(UpdateIntent::Isp, 0x00FF_FFF0, 64).is_err());

        // Legacy NVM pages are swapped individually
        assert_eq!(flash_target(UpdateIntent::Nvm, 0x0C0, 64), Ok(Some(0xF7C0)));
        assert!(flash_target(UpdateIntent::Nvm, 0x0F0, 32).is_err());
    }
}
