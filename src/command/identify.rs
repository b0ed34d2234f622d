//! Identify data snapshots
//!
//! Identify pages are 4096 bytes; only the fields this layer reports are
//! decoded. The encoders are used by the loopback target.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{NvmfError, NvmfResult};

/// Size of an identify data page
pub const IDENTIFY_PAGE_LEN: usize = 4096;

/// Identify snapshot handed to the caller, who owns it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifyResult {
    Controller(ControllerIdentify),
    Namespace(NamespaceIdentify),
}

/// Decoded Identify Controller fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerIdentify {
    pub vendor_id: u16,
    pub serial_number: String,
    pub model_number: String,
    pub firmware_revision: String,
    pub controller_id: u16,
    pub namespace_count: u32,
}

/// Decoded Identify Namespace fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceIdentify {
    pub nsid: u32,
    /// Namespace size in logical blocks
    pub size_blocks: u64,
    pub capacity_blocks: u64,
    pub utilization_blocks: u64,
    /// log2 of the formatted LBA data size
    pub lba_data_shift: u8,
    pub nguid: [u8; 16],
}

impl NamespaceIdentify {
    /// Formatted logical block size in bytes
    pub fn block_size(&self) -> u64 {
        1u64 << self.lba_data_shift
    }
}

impl ControllerIdentify {
    /// Parse an Identify Controller page
    pub fn parse(page: &[u8]) -> NvmfResult<Self> {
        check_page(page)?;

        let vendor_id = (&page[0..2]).get_u16_le();
        let serial_number = ascii_field(&page[4..24]);
        let model_number = ascii_field(&page[24..64]);
        let firmware_revision = ascii_field(&page[64..72]);
        let controller_id = (&page[78..80]).get_u16_le();
        let namespace_count = (&page[516..520]).get_u32_le();

        Ok(Self {
            vendor_id,
            serial_number,
            model_number,
            firmware_revision,
            controller_id,
            namespace_count,
        })
    }

    /// Encode into an Identify Controller page
    pub fn to_page(&self) -> Bytes {
        let mut page = BytesMut::zeroed(IDENTIFY_PAGE_LEN);
        (&mut page[0..2]).put_u16_le(self.vendor_id);
        put_ascii(&mut page[4..24], &self.serial_number);
        put_ascii(&mut page[24..64], &self.model_number);
        put_ascii(&mut page[64..72], &self.firmware_revision);
        (&mut page[78..80]).put_u16_le(self.controller_id);
        (&mut page[516..520]).put_u32_le(self.namespace_count);
        page.freeze()
    }
}

impl NamespaceIdentify {
    /// Parse an Identify Namespace page for `nsid`
    pub fn parse(nsid: u32, page: &[u8]) -> NvmfResult<Self> {
        check_page(page)?;

        let size_blocks = (&page[0..8]).get_u64_le();
        let capacity_blocks = (&page[8..16]).get_u64_le();
        let utilization_blocks = (&page[16..24]).get_u64_le();
        let format_index = (page[26] & 0x0f) as usize;
        let lbaf = 128 + format_index * 4;
        let lba_data_shift = page[lbaf + 2];

        let mut nguid = [0u8; 16];
        nguid.copy_from_slice(&page[104..120]);

        if lba_data_shift < 9 || lba_data_shift > 16 {
            return Err(NvmfError::TransportError(format!(
                "namespace {} reports unusable LBA data size 2^{}",
                nsid, lba_data_shift
            )));
        }

        Ok(Self {
            nsid,
            size_blocks,
            capacity_blocks,
            utilization_blocks,
            lba_data_shift,
            nguid,
        })
    }

    /// Encode into an Identify Namespace page using LBA format 0
    pub fn to_page(&self) -> Bytes {
        let mut page = BytesMut::zeroed(IDENTIFY_PAGE_LEN);
        (&mut page[0..8]).put_u64_le(self.size_blocks);
        (&mut page[8..16]).put_u64_le(self.capacity_blocks);
        (&mut page[16..24]).put_u64_le(self.utilization_blocks);
        page[25] = 0; // one LBA format
        page[26] = 0; // formatted with LBA format 0
        page[104..120].copy_from_slice(&self.nguid);
        page[128 + 2] = self.lba_data_shift;
        page.freeze()
    }
}

fn check_page(page: &[u8]) -> NvmfResult<()> {
    if page.len() < IDENTIFY_PAGE_LEN {
        return Err(NvmfError::TransportError(format!(
            "identify page is {} bytes, expected {}",
            page.len(),
            IDENTIFY_PAGE_LEN
        )));
    }
    Ok(())
}

/// Space-padded ASCII field
fn ascii_field(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw)
        .trim_end_matches([' ', '\0'])
        .to_string()
}

fn put_ascii(field: &mut [u8], value: &str) {
    field.fill(b' ');
    let len = value.len().min(field.len());
    field[..len].copy_from_slice(&value.as_bytes()[..len]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_controller_page_fields() {
        let identify = ControllerIdentify {
            vendor_id: 0x1b36,
            serial_number: "SN0001".into(),
            model_number: "Loopback".into(),
            firmware_revision: "1.0".into(),
            controller_id: 7,
            namespace_count: 2,
        };

        let page = identify.to_page();
        assert_eq!(page.len(), IDENTIFY_PAGE_LEN);
        // Serial number is space padded on the wire
        assert_eq!(&page[4..12], b"SN0001  ");
        assert_eq!(ControllerIdentify::parse(&page).unwrap(), identify);
    }

    #[test]
    fn test_namespace_block_size() {
        let identify = NamespaceIdentify {
            nsid: 1,
            size_blocks: 10,
            capacity_blocks: 10,
            utilization_blocks: 0,
            lba_data_shift: 9,
            nguid: [3u8; 16],
        };

        let parsed = NamespaceIdentify::parse(1, &identify.to_page()).unwrap();
        assert_eq!(parsed.block_size(), 512);
        assert_eq!(parsed.capacity_blocks, 10);
        assert_eq!(parsed.nguid, [3u8; 16]);
    }

    #[test]
    fn test_short_page_rejected() {
        let result = ControllerIdentify::parse(&[0u8; 100]);
        assert!(matches!(result, Err(NvmfError::TransportError(_))));
    }

    #[test]
    fn test_unformatted_namespace_rejected() {
        let page = BytesMut::zeroed(IDENTIFY_PAGE_LEN);
        let result = NamespaceIdentify::parse(1, &page);
        assert!(matches!(result, Err(NvmfError::TransportError(_))));
    }
}
