//! Advertising data decoding
//!
//! An advertising payload is a sequence of length-type-value records: one
//! length byte covering the type byte and the data, one type byte, then the
//! data. Each record decodes by its type into an [`AdRecord`]; types without a
//! dedicated variant are kept as [`AdRecord::Other`].

use crate::constants::*;
use crate::uuid::Uuid;
use bitflags::bitflags;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

bitflags! {
    /// Contents of the Flags record
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AdFlags: u8 {
        const LE_LIMITED_DISCOVERABLE = 0x01;
        const LE_GENERAL_DISCOVERABLE = 0x02;
        const BR_EDR_NOT_SUPPORTED = 0x04;
        const SIMULTANEOUS_LE_BR_EDR_CONTROLLER = 0x08;
        const SIMULTANEOUS_LE_BR_EDR_HOST = 0x10;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdRecord {
    Flags(AdFlags),
    ServiceUuids { complete: bool, uuids: Vec<Uuid> },
    LocalName { complete: bool, name: String },
    TxPowerLevel(i8),
    ServiceData { uuid: Uuid, data: Vec<u8> },
    Appearance(u16),
    ManufacturerData { company_id: u16, data: Vec<u8> },
    Other { ad_type: u8, data: Vec<u8> },
}

impl AdRecord {
    /// Decodes one record body. Bodies too short for their type fall back to
    /// `Other` so nothing is dropped.
    pub fn decode(ad_type: u8, data: &[u8]) -> AdRecord {
        Self::decode_typed(ad_type, data).unwrap_or_else(|| AdRecord::Other {
            ad_type,
            data: data.to_vec(),
        })
    }

    fn decode_typed(ad_type: u8, data: &[u8]) -> Option<AdRecord> {
        let mut cursor = Cursor::new(data);
        let record = match ad_type {
            AD_TYPE_FLAGS => AdRecord::Flags(AdFlags::from_bits_truncate(*data.first()?)),
            AD_TYPE_INCOMPLETE_UUID16 | AD_TYPE_COMPLETE_UUID16 => AdRecord::ServiceUuids {
                complete: ad_type == AD_TYPE_COMPLETE_UUID16,
                uuids: uuid_list(data, 2)?,
            },
            AD_TYPE_INCOMPLETE_UUID32 | AD_TYPE_COMPLETE_UUID32 => AdRecord::ServiceUuids {
                complete: ad_type == AD_TYPE_COMPLETE_UUID32,
                uuids: uuid_list(data, 4)?,
            },
            AD_TYPE_INCOMPLETE_UUID128 | AD_TYPE_COMPLETE_UUID128 => AdRecord::ServiceUuids {
                complete: ad_type == AD_TYPE_COMPLETE_UUID128,
                uuids: uuid_list(data, 16)?,
            },
            AD_TYPE_SHORT_LOCAL_NAME | AD_TYPE_COMPLETE_LOCAL_NAME => AdRecord::LocalName {
                complete: ad_type == AD_TYPE_COMPLETE_LOCAL_NAME,
                name: String::from_utf8_lossy(data).into_owned(),
            },
            AD_TYPE_TX_POWER_LEVEL => AdRecord::TxPowerLevel(cursor.read_i8().ok()?),
            AD_TYPE_SERVICE_DATA_UUID16 => AdRecord::ServiceData {
                uuid: Uuid::from_u16(cursor.read_u16::<LittleEndian>().ok()?),
                data: data[2..].to_vec(),
            },
            AD_TYPE_APPEARANCE => AdRecord::Appearance(cursor.read_u16::<LittleEndian>().ok()?),
            AD_TYPE_MANUFACTURER_DATA => AdRecord::ManufacturerData {
                company_id: cursor.read_u16::<LittleEndian>().ok()?,
                data: data[2..].to_vec(),
            },
            _ => return None,
        };
        Some(record)
    }
}

fn uuid_list(data: &[u8], width: usize) -> Option<Vec<Uuid>> {
    if data.len() % width != 0 {
        return None;
    }
    data.chunks_exact(width)
        .map(Uuid::try_from_slice_le)
        .collect()
}

/// Splits a raw payload into `(type, data)` pairs.
///
/// A zero length byte ends the payload (the remainder is padding), and a
/// record that claims more bytes than remain is discarded.
pub fn parse_advertising_data(data: &[u8]) -> Vec<(u8, &[u8])> {
    let mut result = Vec::new();
    let mut i = 0;

    while i < data.len() {
        let length = data[i] as usize;
        if length == 0 || i + 1 + length > data.len() {
            break;
        }

        let ad_type = data[i + 1];
        result.push((ad_type, &data[i + 2..i + 1 + length]));

        i += 1 + length;
    }

    result
}

/// A decoded advertising payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Advertisement {
    pub records: Vec<AdRecord>,
}

impl Advertisement {
    pub fn parse(data: &[u8]) -> Self {
        let records = parse_advertising_data(data)
            .into_iter()
            .map(|(ad_type, body)| AdRecord::decode(ad_type, body))
            .collect();
        Advertisement { records }
    }

    /// The advertised name, preferring the complete name over the short one.
    pub fn local_name(&self) -> Option<&str> {
        let mut short = None;
        for record in &self.records {
            if let AdRecord::LocalName { complete, name } = record {
                if *complete {
                    return Some(name);
                }
                short = short.or(Some(name.as_str()));
            }
        }
        short
    }

    pub fn flags(&self) -> Option<AdFlags> {
        self.records.iter().find_map(|record| match record {
            AdRecord::Flags(flags) => Some(*flags),
            _ => None,
        })
    }

    pub fn tx_power(&self) -> Option<i8> {
        self.records.iter().find_map(|record| match record {
            AdRecord::TxPowerLevel(level) => Some(*level),
            _ => None,
        })
    }

    pub fn service_uuids(&self) -> Vec<Uuid> {
        self.records
            .iter()
            .filter_map(|record| match record {
                AdRecord::ServiceUuids { uuids, .. } => Some(uuids.iter().copied()),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn manufacturer_data(&self, company_id: u16) -> Option<&[u8]> {
        self.records.iter().find_map(|record| match record {
            AdRecord::ManufacturerData {
                company_id: id,
                data,
            } if *id == company_id => Some(data.as_slice()),
            _ => None,
        })
    }
}
