use crate::error::{DecodeError, UnknownCommand};
use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Selects the decoder used for the reply to a [`Command`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CommandKind {
    Version,
    BatteryInfo,
    SerialNumber,
}

/// A fixed request frame understood by the BMS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    name: &'static str,
    kind: CommandKind,
    payload: [u8; 8],
}

impl Command {
    const fn new(name: &'static str, kind: CommandKind, payload: [u8; 8]) -> Self {
        Self {
            name,
            kind,
            payload,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// The bytes written to the characteristic, verbatim.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

pub const GET_VERSION: Command = Command::new(
    "GET_VERSION",
    CommandKind::Version,
    [0x00, 0x00, 0x04, 0x01, 0x16, 0x55, 0xAA, 0x1A],
);

pub const GET_BATTERY_INFO: Command = Command::new(
    "GET_BATTERY_INFO",
    CommandKind::BatteryInfo,
    [0x00, 0x00, 0x04, 0x01, 0x13, 0x55, 0xAA, 0x17],
);

pub const SERIAL_NUMBER: Command = Command::new(
    "SERIAL_NUMBER",
    CommandKind::SerialNumber,
    [0x00, 0x00, 0x04, 0x01, 0x10, 0x55, 0xAA, 0x14],
);

static COMMANDS: [Command; 3] = [GET_VERSION, GET_BATTERY_INFO, SERIAL_NUMBER];

/// The set of commands polled in one pass, in polling order.
///
/// The default catalog holds every known command. Use [`CommandCatalog::select`]
/// to poll only some of them.
#[derive(Debug, Clone)]
pub struct CommandCatalog {
    commands: Vec<&'static Command>,
}

impl Default for CommandCatalog {
    fn default() -> Self {
        Self {
            commands: COMMANDS.iter().collect(),
        }
    }
}

impl CommandCatalog {
    pub fn lookup(&self, name: &str) -> Option<&'static Command> {
        self.commands.iter().copied().find(|c| c.name == name)
    }

    pub fn commands(&self) -> &[&'static Command] {
        &self.commands
    }

    /// Builds a catalog holding only the named commands, in the given order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, UnknownCommand> {
        let commands = names
            .iter()
            .map(|name| {
                self.lookup(name.as_ref())
                    .ok_or_else(|| UnknownCommand(name.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { commands })
    }
}

/// Location of a field inside a response frame.
#[derive(Debug, Clone, Copy)]
struct Field {
    offset: usize,
    width: usize,
}

impl Field {
    const fn new(offset: usize, width: usize) -> Self {
        Self { offset, width }
    }

    const fn end(&self) -> usize {
        self.offset + self.width
    }

    fn slice<'a>(&self, buffer: &'a [u8]) -> &'a [u8] {
        &buffer[self.offset..self.end()]
    }

    /// Plain big-endian read of the field.
    fn read(&self, buffer: &[u8]) -> u32 {
        read_be(self.slice(buffer))
    }
}

// Battery info frame layout
const PACK_VOLTAGE: Field = Field::new(8, 4);
const VOLTAGE: Field = Field::new(12, 4);
const CELL_PACK: Field = Field::new(16, 32);
const CURRENT: Field = Field::new(48, 4);
const CELL_TEMPERATURE: Field = Field::new(52, 2);
const MOSFET_TEMPERATURE: Field = Field::new(54, 2);
const REMAIN_AH: Field = Field::new(62, 2);
const FACTORY_AH: Field = Field::new(64, 2);
const HEAT: Field = Field::new(68, 4);
const PROTECT_STATE: Field = Field::new(76, 4);
const FAILURE_STATE: Field = Field::new(80, 4);
const EQUILIBRIUM_STATE: Field = Field::new(84, 4);
const BATTERY_STATE: Field = Field::new(88, 2);
const SOC: Field = Field::new(90, 2);
const SOH: Field = Field::new(92, 4);
const DISCHARGES_COUNT: Field = Field::new(96, 4);
const DISCHARGES_AH_COUNT: Field = Field::new(100, 4);

// Version frame layout, relative to VERSION_BLOCK
const VERSION_BLOCK: usize = 8;
const FIRMWARE_MAJOR: Field = Field::new(0, 2);
const FIRMWARE_MINOR: Field = Field::new(2, 2);
const FIRMWARE_PATCH: Field = Field::new(4, 2);
const MANUFACTURE_YEAR: Field = Field::new(6, 2);
const MANUFACTURE_MONTH: Field = Field::new(8, 1);
const MANUFACTURE_DAY: Field = Field::new(9, 1);

const MILLI: f64 = 1000.0;
const CENTI: f64 = 100.0;
// Converts raw voltage counts times amperes into watts.
const WATT_DIVISOR: f64 = 10000.0;
const FULL_CHARGE_BATTERY_STATE: u16 = 4;
const FULL_SOC: u16 = 100;

/// Accumulates up to four bytes, most significant first.
fn read_be(bytes: &[u8]) -> u32 {
    debug_assert!(bytes.len() <= 4);
    bytes.iter().fold(0, |acc, &b| (acc << 8) | u32::from(b))
}

/// Reverses four bytes, then reads them big-endian.
fn read_reversed_be32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[3], bytes[2], bytes[1], bytes[0]])
}

/// Reads a cell voltage pair stored low byte first.
fn read_swapped_pair(pair: &[u8]) -> u16 {
    u16::from_be_bytes([pair[1], pair[0]])
}

fn round_to_cents(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn validate_len(buffer: &[u8], reply_size: usize) -> std::result::Result<(), DecodeError> {
    if buffer.len() < reply_size {
        log::warn!(
            "Invalid buffer size - required={} received={}",
            reply_size,
            buffer.len()
        );
        return Err(DecodeError::Truncated {
            required: reply_size,
            received: buffer.len(),
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BatteryStatus {
    Standby,
    Charging,
    Discharging,
    FullCharge,
}

impl BatteryStatus {
    fn derive(current: f64, soc: u16, battery_state: u16) -> Self {
        if soc >= FULL_SOC || battery_state == FULL_CHARGE_BATTERY_STATE {
            BatteryStatus::FullCharge
        } else if current > 0.0 {
            BatteryStatus::Charging
        } else if current < 0.0 {
            BatteryStatus::Discharging
        } else {
            BatteryStatus::Standby
        }
    }
}

impl fmt::Display for BatteryStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BatteryStatus::Standby => write!(f, "Standby"),
            BatteryStatus::Charging => write!(f, "Charging"),
            BatteryStatus::Discharging => write!(f, "Discharging"),
            BatteryStatus::FullCharge => write!(f, "Full Charge"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BalanceStatus {
    Balancing,
    Balanced,
}

impl fmt::Display for BalanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            BalanceStatus::Balancing => {
                write!(f, "Battery cells are being balanced for better performance.")
            }
            BalanceStatus::Balanced => write!(f, "All cells are well-balanced."),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum CellStatus {
    Fault,
    Ok,
}

impl fmt::Display for CellStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            CellStatus::Fault => write!(f, "Fault alert! There may be a problem with cell."),
            CellStatus::Ok => write!(f, "Battery is in optimal working condition."),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum HeatStatus {
    On,
    Off,
}

impl fmt::Display for HeatStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HeatStatus::On => write!(f, "Self-heating is on"),
            HeatStatus::Off => write!(f, "Self-heating is off"),
        }
    }
}

/// Battery telemetry reported in reply to [`GET_BATTERY_INFO`].
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BatteryInfo {
    /// Raw pack voltage counts
    pub pack_voltage: u32,
    /// Raw battery voltage counts
    pub voltage: u32,
    /// Cell number (starting at 1) to cell voltage in V. Empty slots are left out.
    pub cell_voltages: BTreeMap<u8, f64>,
    /// Current in A, positive while charging
    pub current: f64,
    pub watt: f64,
    pub remain_ah: f64,
    pub factory_ah: f64,
    /// Device native units, not converted
    pub cell_temperature: u16,
    /// Device native units, not converted
    pub mosfet_temperature: u16,
    pub heat: String,
    pub discharge_switch_on: bool,
    pub protect_state: String,
    pub failure_state: [u8; 4],
    pub equilibrium_state: u32,
    pub battery_state: u16,
    pub soc: u16,
    pub soh: u32,
    pub discharges_count: u32,
    pub discharges_ah_count: u32,
    pub battery_status: BatteryStatus,
    pub balance_status: BalanceStatus,
    pub cell_status: CellStatus,
    pub heat_status: HeatStatus,
}

impl BatteryInfo {
    pub fn reply_size() -> usize {
        DISCHARGES_AH_COUNT.end()
    }

    pub fn decode(rx_buffer: &[u8]) -> std::result::Result<Self, DecodeError> {
        validate_len(rx_buffer, Self::reply_size())?;

        let voltage = read_reversed_be32(VOLTAGE.slice(rx_buffer));

        let mut cell_voltages = BTreeMap::new();
        for (index, pair) in CELL_PACK.slice(rx_buffer).chunks_exact(2).enumerate() {
            let millivolts = read_swapped_pair(pair);
            if millivolts == 0 {
                continue;
            }
            let cell = index as u8 + 1;
            log::trace!("cell #{} mV={}", cell, millivolts);
            cell_voltages.insert(cell, f64::from(millivolts) / MILLI);
        }

        // The field is transmitted as a two's complement 32 bit value.
        let current = f64::from(CURRENT.read(rx_buffer) as i32) / MILLI;
        let watt = round_to_cents(f64::from(voltage) * current / WATT_DIVISOR);

        let heat = hex::encode(HEAT.slice(rx_buffer));
        // `byte >> 7` is at most 1, so this reads as "on" for every frame.
        // The test is kept as the device tooling defines it.
        let discharge_switch_on = rx_buffer[HEAT.offset] >> 7 < 8;

        let mut failure_state = [0; 4];
        failure_state.copy_from_slice(FAILURE_STATE.slice(rx_buffer));
        let equilibrium_state = EQUILIBRIUM_STATE.read(rx_buffer);
        let battery_state = BATTERY_STATE.read(rx_buffer) as u16;
        let soc = SOC.read(rx_buffer) as u16;

        let heat_status = if heat.as_bytes().get(7) == Some(&b'2') {
            HeatStatus::On
        } else {
            HeatStatus::Off
        };

        Ok(Self {
            pack_voltage: read_reversed_be32(PACK_VOLTAGE.slice(rx_buffer)),
            voltage,
            cell_voltages,
            current,
            watt,
            remain_ah: f64::from(REMAIN_AH.read(rx_buffer)) / CENTI,
            factory_ah: f64::from(FACTORY_AH.read(rx_buffer)) / CENTI,
            cell_temperature: CELL_TEMPERATURE.read(rx_buffer) as u16,
            mosfet_temperature: MOSFET_TEMPERATURE.read(rx_buffer) as u16,
            heat,
            discharge_switch_on,
            protect_state: hex::encode(PROTECT_STATE.slice(rx_buffer)),
            failure_state,
            equilibrium_state,
            battery_state,
            soc,
            soh: SOH.read(rx_buffer),
            discharges_count: DISCHARGES_COUNT.read(rx_buffer),
            discharges_ah_count: DISCHARGES_AH_COUNT.read(rx_buffer),
            battery_status: BatteryStatus::derive(current, soc, battery_state),
            balance_status: if equilibrium_state > 0 {
                BalanceStatus::Balancing
            } else {
                BalanceStatus::Balanced
            },
            cell_status: if failure_state[0] > 0 || failure_state[1] > 0 {
                CellStatus::Fault
            } else {
                CellStatus::Ok
            },
            heat_status,
        })
    }
}

/// Firmware and hardware identification reported in reply to [`GET_VERSION`].
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Version {
    /// `major.minor.patch`
    pub firmware_version: String,
    /// `year-month-day`, without zero padding
    pub manufacture_date: String,
    pub hardware_version: String,
}

impl Version {
    pub fn reply_size() -> usize {
        VERSION_BLOCK + MANUFACTURE_DAY.end()
    }

    pub fn decode(rx_buffer: &[u8]) -> std::result::Result<Self, DecodeError> {
        validate_len(rx_buffer, Self::reply_size())?;
        let block = &rx_buffer[VERSION_BLOCK..];

        let firmware_version = format!(
            "{}.{}.{}",
            FIRMWARE_MAJOR.read(block),
            FIRMWARE_MINOR.read(block),
            FIRMWARE_PATCH.read(block)
        );
        let manufacture_date = format!(
            "{}-{}-{}",
            MANUFACTURE_YEAR.read(block),
            MANUFACTURE_MONTH.read(block),
            MANUFACTURE_DAY.read(block)
        );
        let hardware_version = block
            .iter()
            .step_by(2)
            .filter(|b| (0x20..=0x7E).contains(*b))
            .map(|&b| char::from(b))
            .collect();

        Ok(Self {
            firmware_version,
            manufacture_date,
            hardware_version,
        })
    }
}

/// Reply to [`SERIAL_NUMBER`], kept as received.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SerialNumber {
    /// Lowercase hex of the whole frame
    pub raw: String,
}

impl SerialNumber {
    pub fn decode(rx_buffer: &[u8]) -> Self {
        Self {
            raw: hex::encode(rx_buffer),
        }
    }
}

/// A decoded reply to any catalog command.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(untagged))]
pub enum Response {
    Version(Version),
    BatteryInfo(BatteryInfo),
    SerialNumber(SerialNumber),
}

impl Response {
    pub fn decode(kind: CommandKind, rx_buffer: &[u8]) -> std::result::Result<Self, DecodeError> {
        Ok(match kind {
            CommandKind::Version => Response::Version(Version::decode(rx_buffer)?),
            CommandKind::BatteryInfo => Response::BatteryInfo(BatteryInfo::decode(rx_buffer)?),
            CommandKind::SerialNumber => Response::SerialNumber(SerialNumber::decode(rx_buffer)),
        })
    }
}
