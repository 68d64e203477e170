//! Wire format of the node's CAN messages.
//!
//! Every message is a standard (11-bit) data frame. The identifier names
//! the message type, never the sending sensor. Payload fields are unsigned
//! 16-bit values, most significant byte first:
//!
//! | ID    | Message       | Payload                          |
//! |-------|---------------|----------------------------------|
//! | 0x100 | Concentration | PM1.0, PM2.5, PM10 (env, µg/m³)   |
//! | 0x101 | AQI (US)      | PM2.5 AQI, PM10 AQI              |
//! | 0x102 | Gas           | AQI-UBA, TVOC ppb, eCO2 ppm      |

use crate::sensors::{GasReading, ParticulateReading};
use arrayvec::ArrayString;
use core::fmt::Write;
use heapless::Vec;
use serde::{Deserialize, Serialize};
use static_assertions::{const_assert, const_assert_ne};
use thiserror::Error;

pub const MAX_PAYLOAD_LEN: usize = 8;
pub const MAX_STANDARD_ID: u16 = 0x7FF;

pub const CAN_ID_PM_CONCENTRATION: u16 = 0x100;
pub const CAN_ID_PM_AQI_US: u16 = 0x101;
pub const CAN_ID_GAS: u16 = 0x102;

pub const CONCENTRATION_PAYLOAD_LEN: usize = 6;
pub const AQI_PAYLOAD_LEN: usize = 4;
pub const GAS_PAYLOAD_LEN: usize = 6;

const_assert!(CAN_ID_GAS <= MAX_STANDARD_ID);
const_assert_ne!(CAN_ID_PM_CONCENTRATION, CAN_ID_PM_AQI_US);
const_assert_ne!(CAN_ID_PM_AQI_US, CAN_ID_GAS);
const_assert!(CONCENTRATION_PAYLOAD_LEN <= MAX_PAYLOAD_LEN);
const_assert!(GAS_PAYLOAD_LEN <= MAX_PAYLOAD_LEN);

/// Room for `7FF#0102030405060708`.
pub type FrameText = ArrayString<24>;

pub type Payload = Vec<u8, MAX_PAYLOAD_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("identifier {0:#x} does not fit in 11 bits")]
    IdOutOfRange(u32),
    #[error("payload of {0} bytes exceeds 8")]
    PayloadTooLong(usize),
    #[error("expected {expected} payload bytes, got {actual}")]
    WrongLength { expected: usize, actual: usize },
    #[error("unknown message identifier {0:#05x}")]
    UnknownId(u16),
    #[error("malformed frame text")]
    Malformed,
}

/// 11-bit standard CAN identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StandardId(u16);

impl StandardId {
    pub const fn new(raw: u16) -> Option<Self> {
        if raw <= MAX_STANDARD_ID {
            Some(Self(raw))
        } else {
            None
        }
    }

    pub const fn as_raw(self) -> u16 {
        self.0
    }
}

impl TryFrom<u32> for StandardId {
    type Error = FrameError;

    fn try_from(raw: u32) -> Result<Self, FrameError> {
        u16::try_from(raw)
            .ok()
            .and_then(StandardId::new)
            .ok_or(FrameError::IdOutOfRange(raw))
    }
}

/// Message types carried on the bus, one identifier each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    Concentration,
    Aqi,
    Gas,
}

impl MessageKind {
    pub const ALL: [MessageKind; 3] = [MessageKind::Concentration, MessageKind::Aqi, MessageKind::Gas];

    pub const fn id(self) -> StandardId {
        match self {
            MessageKind::Concentration => StandardId(CAN_ID_PM_CONCENTRATION),
            MessageKind::Aqi => StandardId(CAN_ID_PM_AQI_US),
            MessageKind::Gas => StandardId(CAN_ID_GAS),
        }
    }

    pub const fn payload_len(self) -> usize {
        match self {
            MessageKind::Concentration => CONCENTRATION_PAYLOAD_LEN,
            MessageKind::Aqi => AQI_PAYLOAD_LEN,
            MessageKind::Gas => GAS_PAYLOAD_LEN,
        }
    }

    pub fn from_id(id: StandardId) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.id() == id)
    }
}

impl core::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            MessageKind::Concentration => write!(f, "PM concentration"),
            MessageKind::Aqi => write!(f, "PM AQI (US)"),
            MessageKind::Gas => write!(f, "gas"),
        }
    }
}

/// Standard data frame. The length code is derived from the payload, so it
/// can never disagree with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    id: StandardId,
    payload: Payload,
}

impl CanFrame {
    pub fn new(id: StandardId, data: &[u8]) -> Result<Self, FrameError> {
        let payload = Vec::from_slice(data).map_err(|()| FrameError::PayloadTooLong(data.len()))?;
        Ok(Self { id, payload })
    }

    pub fn id(&self) -> StandardId {
        self.id
    }

    pub fn data(&self) -> &[u8] {
        &self.payload
    }

    pub fn dlc(&self) -> u8 {
        self.payload.len() as u8
    }

    /// candump notation, e.g. `100#0005012C0019`.
    pub fn to_text(&self) -> FrameText {
        let mut text = FrameText::new();
        // Capacity covers the longest possible frame
        let _ = write!(text, "{:03X}#", self.id.as_raw());
        for byte in self.payload.iter() {
            let _ = write!(text, "{:02X}", byte);
        }
        text
    }

    /// Parse candump notation.
    pub fn parse(text: &str) -> Result<Self, FrameError> {
        let (id_text, data_text) = text.trim().split_once('#').ok_or(FrameError::Malformed)?;
        let raw_id = u32::from_str_radix(id_text, 16).map_err(|_| FrameError::Malformed)?;
        let id = StandardId::try_from(raw_id)?;

        if !data_text.is_ascii() || data_text.len() % 2 != 0 {
            return Err(FrameError::Malformed);
        }
        let len = data_text.len() / 2;
        if len > MAX_PAYLOAD_LEN {
            return Err(FrameError::PayloadTooLong(len));
        }

        let mut payload = Payload::new();
        for i in 0..len {
            let byte = u8::from_str_radix(&data_text[i * 2..i * 2 + 2], 16)
                .map_err(|_| FrameError::Malformed)?;
            let _ = payload.push(byte);
        }
        Ok(Self { id, payload })
    }
}

/// Big-endian u16 field. Wider sources are truncated by the caller's cast
/// (wraparound), never range-checked.
pub fn put_u16(buffer: &mut [u8], at: usize, value: u16) {
    buffer[at..at + 2].copy_from_slice(&value.to_be_bytes());
}

pub fn get_u16(buffer: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([buffer[at], buffer[at + 1]])
}

pub fn encode_concentration(reading: &ParticulateReading) -> [u8; CONCENTRATION_PAYLOAD_LEN] {
    let mut payload = [0u8; CONCENTRATION_PAYLOAD_LEN];
    put_u16(&mut payload, 0, reading.pm1_env);
    put_u16(&mut payload, 2, reading.pm25_env);
    put_u16(&mut payload, 4, reading.pm10_env);
    payload
}

pub fn encode_aqi(reading: &ParticulateReading) -> [u8; AQI_PAYLOAD_LEN] {
    let mut payload = [0u8; AQI_PAYLOAD_LEN];
    put_u16(&mut payload, 0, reading.aqi_pm25_us);
    put_u16(&mut payload, 2, reading.aqi_pm10_us);
    payload
}

pub fn encode_gas(reading: &GasReading) -> [u8; GAS_PAYLOAD_LEN] {
    let mut payload = [0u8; GAS_PAYLOAD_LEN];
    put_u16(&mut payload, 0, reading.aqi_index);
    put_u16(&mut payload, 2, reading.tvoc_ppb);
    put_u16(&mut payload, 4, reading.eco2_ppm);
    payload
}

/// Both particulate messages, concentration first.
pub fn particulate_frames(reading: &ParticulateReading) -> [(MessageKind, Payload); 2] {
    [
        (MessageKind::Concentration, to_payload(&encode_concentration(reading))),
        (MessageKind::Aqi, to_payload(&encode_aqi(reading))),
    ]
}

pub fn gas_frame(reading: &GasReading) -> (MessageKind, Payload) {
    (MessageKind::Gas, to_payload(&encode_gas(reading)))
}

fn to_payload(bytes: &[u8]) -> Payload {
    let mut payload = Payload::new();
    for &b in bytes.iter().take(MAX_PAYLOAD_LEN) {
        let _ = payload.push(b);
    }
    payload
}

/// Fields recovered from a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "message", rename_all = "snake_case")]
pub enum DecodedMessage {
    Concentration { pm1_env: u16, pm25_env: u16, pm10_env: u16 },
    Aqi { aqi_pm25_us: u16, aqi_pm10_us: u16 },
    Gas { aqi_index: u16, tvoc_ppb: u16, eco2_ppm: u16 },
}

pub fn decode(frame: &CanFrame) -> Result<DecodedMessage, FrameError> {
    let kind = MessageKind::from_id(frame.id()).ok_or(FrameError::UnknownId(frame.id().as_raw()))?;
    let data = frame.data();
    if data.len() != kind.payload_len() {
        return Err(FrameError::WrongLength { expected: kind.payload_len(), actual: data.len() });
    }

    Ok(match kind {
        MessageKind::Concentration => DecodedMessage::Concentration {
            pm1_env: get_u16(data, 0),
            pm25_env: get_u16(data, 2),
            pm10_env: get_u16(data, 4),
        },
        MessageKind::Aqi => DecodedMessage::Aqi {
            aqi_pm25_us: get_u16(data, 0),
            aqi_pm10_us: get_u16(data, 2),
        },
        MessageKind::Gas => DecodedMessage::Gas {
            aqi_index: get_u16(data, 0),
            tvoc_ppb: get_u16(data, 2),
            eco2_ppm: get_u16(data, 4),
        },
    })
}
