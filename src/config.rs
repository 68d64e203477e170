use serde::{Deserialize, Serialize};

// Bus wiring
pub const CAN_TX_PIN: u8 = 5;
pub const CAN_RX_PIN: u8 = 4;
pub const CAN_BITRATE_BPS: u32 = 500_000;

// PMS5003 UART wiring (sensor TX -> PM_RX_PIN)
pub const PM_RX_PIN: u8 = 26;
pub const PM_TX_PIN: u8 = 27;
pub const PM_BAUD_RATE: u32 = 9600;

pub const TRANSMIT_INTERVAL_MS: u64 = 2000;
pub const CAN_SEND_TIMEOUT_MS: u64 = 100;

// Device boot time before the first presence check may succeed
pub const PM_SETTLE_TIMEOUT_MS: u64 = 3000;
pub const I2C_SETTLE_TIMEOUT_MS: u64 = 100;

pub const AHT2X_ADDRESS: u8 = 0x38;
pub const ENS160_PRIMARY_ADDRESS: u8 = 0x53;
pub const ENS160_SECONDARY_ADDRESS: u8 = 0x52;

/// Startup constants. Read once at boot and never changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub can_tx_pin: u8,
    pub can_rx_pin: u8,
    pub can_bitrate_bps: u32,
    pub pm_rx_pin: u8,
    pub pm_tx_pin: u8,
    pub pm_baud_rate: u32,
    pub interval_ms: u64,
    pub send_timeout_ms: u64,
    pub pm_settle_timeout_ms: u64,
    pub i2c_settle_timeout_ms: u64,
    /// Candidate addresses, tried in order.
    pub climate_addresses: heapless::Vec<u8, 4>,
    pub gas_addresses: heapless::Vec<u8, 4>,
    /// Refuse to boot without the particulate sensor.
    pub require_particulate: bool,
    /// Also publish gas readings on the bus.
    pub publish_gas: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        let mut climate_addresses = heapless::Vec::new();
        let _ = climate_addresses.push(AHT2X_ADDRESS);

        let mut gas_addresses = heapless::Vec::new();
        let _ = gas_addresses.push(ENS160_PRIMARY_ADDRESS);
        let _ = gas_addresses.push(ENS160_SECONDARY_ADDRESS);

        Self {
            can_tx_pin: CAN_TX_PIN,
            can_rx_pin: CAN_RX_PIN,
            can_bitrate_bps: CAN_BITRATE_BPS,
            pm_rx_pin: PM_RX_PIN,
            pm_tx_pin: PM_TX_PIN,
            pm_baud_rate: PM_BAUD_RATE,
            interval_ms: TRANSMIT_INTERVAL_MS,
            send_timeout_ms: CAN_SEND_TIMEOUT_MS,
            pm_settle_timeout_ms: PM_SETTLE_TIMEOUT_MS,
            i2c_settle_timeout_ms: I2C_SETTLE_TIMEOUT_MS,
            climate_addresses,
            gas_addresses,
            require_particulate: false,
            publish_gas: false,
        }
    }
}

impl NodeConfig {
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
