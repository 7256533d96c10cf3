//! Positional decoding of the status replies.
//!
//! Replies are space separated fields in a fixed order. The number of fields
//! is part of the contract: a reply with the wrong count is rejected whole,
//! never half decoded.

use crate::error::DecodeError;
use crate::voltronic::reply::Reply;

use nom::{
    bytes::complete::take_till1,
    character::complete::{space0, space1},
    combinator::all_consuming,
    multi::separated_list0,
    sequence::delimited,
    IResult,
};
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::Serialize;

// Fields {{{
fn tokens(input: &str) -> IResult<&str, Vec<&str>> {
    all_consuming(delimited(
        space0,
        separated_list0(space1, take_till1(|c: char| c == ' ')),
        space0,
    ))(input)
}

/// Cursor over the fields of one reply.
struct Fields<'a> {
    command: &'static str,
    tokens: std::vec::IntoIter<&'a str>,
}

impl<'a> Fields<'a> {
    /// Split `body`, accepting only the field counts in `counts`.
    fn new(
        command: &'static str,
        body: &'a [u8],
        counts: &[usize],
        expected: &'static str,
    ) -> Result<Self, DecodeError> {
        let text = std::str::from_utf8(body).map_err(|_| DecodeError::TypeMismatch {
            command,
            field: "payload",
            value: String::from_utf8_lossy(body).into_owned(),
        })?;

        let (_, tokens) = tokens(text).map_err(|_| DecodeError::TypeMismatch {
            command,
            field: "payload",
            value: text.to_string(),
        })?;

        if !counts.contains(&tokens.len()) {
            return Err(DecodeError::FieldCountMismatch {
                command,
                expected,
                got: tokens.len(),
            });
        }

        Ok(Self {
            command,
            tokens: tokens.into_iter(),
        })
    }

    fn remaining(&self) -> usize {
        self.tokens.len()
    }

    fn next(&mut self, field: &'static str) -> Result<&'a str, DecodeError> {
        // counts were checked up front, so running dry means a layout bug
        self.tokens.next().ok_or(DecodeError::FieldCountMismatch {
            command: self.command,
            expected: field,
            got: 0,
        })
    }

    fn mismatch(&self, field: &'static str, value: &str) -> DecodeError {
        DecodeError::TypeMismatch {
            command: self.command,
            field,
            value: value.to_string(),
        }
    }

    fn float(&mut self, field: &'static str) -> Result<f64, DecodeError> {
        let token = self.next(field)?;
        match all_consuming(nom::number::complete::double::<&str, ()>)(token) {
            Ok((_, value)) if value.is_finite() => Ok(value),
            _ => Err(self.mismatch(field, token)),
        }
    }

    fn int(&mut self, field: &'static str) -> Result<i32, DecodeError> {
        let token = self.next(field)?;
        all_consuming(nom::character::complete::i32::<&str, ()>)(token)
            .map(|(_, value)| value)
            .map_err(|_| self.mismatch(field, token))
    }

    /// Fixed width block of characters.
    fn block(&mut self, field: &'static str, width: usize) -> Result<String, DecodeError> {
        let token = self.next(field)?;
        if token.len() != width {
            return Err(self.mismatch(field, token));
        }
        Ok(token.to_string())
    }

    /// Fixed width block of `0`/`1` flags.
    fn bits(&mut self, field: &'static str, width: usize) -> Result<String, DecodeError> {
        let block = self.block(field, width)?;
        if !block.bytes().all(|b| b == b'0' || b == b'1') {
            return Err(self.mismatch(field, &block));
        }
        Ok(block)
    }
} // }}}

// Operational {{{
/// Flags from the 8 character device status block of QPIGS.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DeviceStatus(String);

impl DeviceStatus {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Flag `index` as 0 or 1.
    pub fn flag(&self, index: usize) -> u8 {
        match self.0.as_bytes().get(index) {
            Some(b'1') => 1,
            _ => 0,
        }
    }

    pub fn load_on(&self) -> u8 {
        self.flag(3)
    }

    pub fn scc_charging(&self) -> u8 {
        self.flag(6)
    }

    pub fn ac_charging(&self) -> u8 {
        self.flag(7)
    }
}

/// Fields appended to QPIGS by later firmware.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OperationalExtension {
    pub battery_voltage_offset: i32,
    pub eeprom_version: String,
    pub pv_charging_power: i32,
    pub device_status_2: String,
}

/// QPIGS: general status.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Operational {
    pub grid_voltage: f64,
    pub grid_frequency: f64,
    pub ac_output_voltage: f64,
    pub ac_output_frequency: f64,
    pub ac_output_apparent_power: i32,
    pub ac_output_active_power: i32,
    pub output_load_percent: i32,
    pub bus_voltage: i32,
    pub battery_voltage: f64,
    pub battery_charging_current: i32,
    pub battery_capacity: i32,
    pub heatsink_temperature: i32,
    pub pv_input_current: f64,
    pub pv_input_voltage: f64,
    pub scc_battery_voltage: f64,
    pub battery_discharge_current: i32,
    pub device_status: DeviceStatus,
    pub extension: Option<OperationalExtension>,
}

impl Operational {
    pub const COMMAND: &'static str = "QPIGS";

    pub fn decode(reply: &Reply) -> Result<Self, DecodeError> {
        Self::parse(reply.body())
    }

    pub fn parse(body: &[u8]) -> Result<Self, DecodeError> {
        let mut f = Fields::new(Self::COMMAND, body, &[17, 21], "17 or 21")?;

        let mut r = Self {
            grid_voltage: f.float("grid_voltage")?,
            grid_frequency: f.float("grid_frequency")?,
            ac_output_voltage: f.float("ac_output_voltage")?,
            ac_output_frequency: f.float("ac_output_frequency")?,
            ac_output_apparent_power: f.int("ac_output_apparent_power")?,
            ac_output_active_power: f.int("ac_output_active_power")?,
            output_load_percent: f.int("output_load_percent")?,
            bus_voltage: f.int("bus_voltage")?,
            battery_voltage: f.float("battery_voltage")?,
            battery_charging_current: f.int("battery_charging_current")?,
            battery_capacity: f.int("battery_capacity")?,
            heatsink_temperature: f.int("heatsink_temperature")?,
            pv_input_current: f.float("pv_input_current")?,
            pv_input_voltage: f.float("pv_input_voltage")?,
            scc_battery_voltage: f.float("scc_battery_voltage")?,
            battery_discharge_current: f.int("battery_discharge_current")?,
            device_status: DeviceStatus(f.bits("device_status", 8)?),
            extension: None,
        };

        if f.remaining() > 0 {
            r.extension = Some(OperationalExtension {
                battery_voltage_offset: f.int("battery_voltage_offset")?,
                eeprom_version: f.block("eeprom_version", 2)?,
                pv_charging_power: f.int("pv_charging_power")?,
                device_status_2: f.bits("device_status_2", 3)?,
            });
        }

        Ok(r)
    }
} // }}}

// Ratings {{{
/// Fields appended to QPIRI by later firmware.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RatingsExtension {
    pub pv_ok_condition: i32,
    pub pv_power_balance: i32,
}

/// QPIRI: rated information and current settings.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Ratings {
    pub grid_rating_voltage: f64,
    // per protocol; several firmwares report the rated frequency here
    pub grid_rating_current: f64,
    pub ac_output_rating_voltage: f64,
    pub ac_output_rating_frequency: f64,
    pub ac_output_rating_current: f64,
    pub ac_output_rating_apparent_power: i32,
    pub ac_output_rating_active_power: i32,
    pub battery_rating_voltage: f64,
    pub battery_recharge_voltage: f64,
    pub battery_under_voltage: f64,
    pub battery_bulk_voltage: f64,
    pub battery_float_voltage: f64,
    /// 0 AGM, 1 flooded, 2 user
    pub battery_type: i32,
    pub max_ac_charging_current: i32,
    pub max_charging_current: i32,
    /// 0 appliance, 1 UPS
    pub input_voltage_range: i32,
    /// 0 utility first, 1 solar first, 2 SBU first
    pub output_source_priority: i32,
    /// 0 utility first, 1 solar first, 2 solar + utility, 3 solar only
    pub charger_source_priority: i32,
    pub parallel_max_num: String,
    pub machine_type: i32,
    pub topology: i32,
    pub output_mode: i32,
    pub battery_redischarge_voltage: f64,
    pub extension: Option<RatingsExtension>,
}

impl Ratings {
    pub const COMMAND: &'static str = "QPIRI";

    pub fn decode(reply: &Reply) -> Result<Self, DecodeError> {
        Self::parse(reply.body())
    }

    pub fn parse(body: &[u8]) -> Result<Self, DecodeError> {
        let mut f = Fields::new(Self::COMMAND, body, &[23, 25], "23 or 25")?;

        let mut r = Self {
            grid_rating_voltage: f.float("grid_rating_voltage")?,
            grid_rating_current: f.float("grid_rating_current")?,
            ac_output_rating_voltage: f.float("ac_output_rating_voltage")?,
            ac_output_rating_frequency: f.float("ac_output_rating_frequency")?,
            ac_output_rating_current: f.float("ac_output_rating_current")?,
            ac_output_rating_apparent_power: f.int("ac_output_rating_apparent_power")?,
            ac_output_rating_active_power: f.int("ac_output_rating_active_power")?,
            battery_rating_voltage: f.float("battery_rating_voltage")?,
            battery_recharge_voltage: f.float("battery_recharge_voltage")?,
            battery_under_voltage: f.float("battery_under_voltage")?,
            battery_bulk_voltage: f.float("battery_bulk_voltage")?,
            battery_float_voltage: f.float("battery_float_voltage")?,
            battery_type: f.int("battery_type")?,
            max_ac_charging_current: f.int("max_ac_charging_current")?,
            max_charging_current: f.int("max_charging_current")?,
            input_voltage_range: f.int("input_voltage_range")?,
            output_source_priority: f.int("output_source_priority")?,
            charger_source_priority: f.int("charger_source_priority")?,
            parallel_max_num: f.block("parallel_max_num", 1)?,
            machine_type: f.int("machine_type")?,
            topology: f.int("topology")?,
            output_mode: f.int("output_mode")?,
            battery_redischarge_voltage: f.float("battery_redischarge_voltage")?,
            extension: None,
        };

        if f.remaining() > 0 {
            r.extension = Some(RatingsExtension {
                pv_ok_condition: f.int("pv_ok_condition")?,
                pv_power_balance: f.int("pv_power_balance")?,
            });
        }

        Ok(r)
    }
} // }}}

// Mode {{{
#[derive(Clone, Copy, Debug, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Mode {
    PowerOn = b'P',
    Standby = b'S',
    Line = b'L',
    Battery = b'B',
    Fault = b'F',
    PowerSaving = b'H',
}

impl Mode {
    pub const COMMAND: &'static str = "QMOD";

    pub fn decode(reply: &Reply) -> Result<Self, DecodeError> {
        Self::parse(reply.body())
    }

    pub fn parse(body: &[u8]) -> Result<Self, DecodeError> {
        let [c] = body else {
            return Err(DecodeError::FieldCountMismatch {
                command: Self::COMMAND,
                expected: "1 character",
                got: body.len(),
            });
        };

        Self::try_from(*c).map_err(|_| DecodeError::TypeMismatch {
            command: Self::COMMAND,
            field: "mode",
            value: String::from_utf8_lossy(body).into_owned(),
        })
    }

    /// Numeric code used in the published record.
    pub fn code(self) -> u8 {
        match self {
            Self::PowerOn => 1,
            Self::Standby => 2,
            Self::Line => 3,
            Self::Battery => 4,
            Self::Fault => 5,
            Self::PowerSaving => 6,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::PowerOn => "power on",
            Self::Standby => "standby",
            Self::Line => "line",
            Self::Battery => "battery",
            Self::Fault => "fault",
            Self::PowerSaving => "power saving",
        };
        write!(f, "{}", name)
    }
} // }}}

// Warnings {{{
// bit position -> meaning, from the PIP protocol description; None is reserved
const WARNING_NAMES: [Option<&str>; 32] = [
    None,
    Some("inverter_fault"),
    Some("bus_over"),
    Some("bus_under"),
    Some("bus_soft_fail"),
    Some("line_fail"),
    Some("opv_short"),
    Some("inverter_voltage_too_low"),
    Some("inverter_voltage_too_high"),
    Some("over_temperature"),
    Some("fan_locked"),
    Some("battery_voltage_high"),
    Some("battery_low_alarm"),
    None,
    Some("battery_under_shutdown"),
    None,
    Some("over_load"),
    Some("eeprom_fault"),
    Some("inverter_over_current"),
    Some("inverter_soft_fail"),
    Some("self_test_fail"),
    Some("op_dc_voltage_over"),
    Some("battery_open"),
    Some("current_sensor_fail"),
    Some("battery_short"),
    Some("power_limit"),
    Some("pv_voltage_high"),
    Some("mppt_overload_fault"),
    Some("mppt_overload_warning"),
    Some("battery_too_low_to_charge"),
    None,
    None,
];

/// QPIWS: warning bits, most significant first.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Warnings {
    bits: String,
}

impl Warnings {
    pub const COMMAND: &'static str = "QPIWS";

    pub fn decode(reply: &Reply) -> Result<Self, DecodeError> {
        Self::parse(reply.body())
    }

    pub fn parse(body: &[u8]) -> Result<Self, DecodeError> {
        if body.len() != 32 && body.len() != 36 {
            return Err(DecodeError::FieldCountMismatch {
                command: Self::COMMAND,
                expected: "32 or 36 flags",
                got: body.len(),
            });
        }

        if !body.iter().all(|b| *b == b'0' || *b == b'1') {
            return Err(DecodeError::TypeMismatch {
                command: Self::COMMAND,
                field: "warnings",
                value: String::from_utf8_lossy(body).into_owned(),
            });
        }

        Ok(Self {
            bits: String::from_utf8_lossy(body).into_owned(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.bits
    }

    pub fn any(&self) -> bool {
        self.bits.contains('1')
    }

    /// Names of the set bits that have a meaning.
    pub fn active(&self) -> Vec<&'static str> {
        self.bits
            .bytes()
            .zip(WARNING_NAMES.iter())
            .filter(|(bit, _)| *bit == b'1')
            .filter_map(|(_, name)| *name)
            .collect()
    }
} // }}}

// Telemetry {{{
/// Calibration corrections from the configuration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleFactors {
    pub amperage: f64,
    pub watt: f64,
}

impl Default for ScaleFactors {
    fn default() -> Self {
        Self {
            amperage: 1.0,
            watt: 1.0,
        }
    }
}

impl ScaleFactors {
    pub fn adjusted_current(&self, raw_current: f64) -> f64 {
        raw_current * self.amperage
    }

    /// PV power from the SCC voltage rather than the PV input voltage: the
    /// reported PV current is what flows into the battery, at battery voltage.
    pub fn derived_power(&self, scc_voltage: f64, raw_current: f64) -> f64 {
        (scc_voltage * self.adjusted_current(raw_current)) * self.watt
    }
}

/// The record handed to the output side: decoded fields from all four
/// replies plus the derived values.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Telemetry {
    #[serde(rename = "Inverter_mode")]
    pub inverter_mode: u8,
    #[serde(rename = "AC_grid_voltage")]
    pub ac_grid_voltage: f64,
    #[serde(rename = "AC_grid_frequency")]
    pub ac_grid_frequency: f64,
    #[serde(rename = "AC_out_voltage")]
    pub ac_out_voltage: f64,
    #[serde(rename = "AC_out_frequency")]
    pub ac_out_frequency: f64,
    #[serde(rename = "PV_in_voltage")]
    pub pv_in_voltage: f64,
    #[serde(rename = "PV_in_current")]
    pub pv_in_current: f64,
    #[serde(rename = "PV_in_watts")]
    pub pv_in_watts: f64,
    #[serde(rename = "SCC_voltage")]
    pub scc_voltage: f64,
    #[serde(rename = "Load_pct")]
    pub load_pct: i32,
    #[serde(rename = "Load_watt")]
    pub load_watt: i32,
    #[serde(rename = "Load_va")]
    pub load_va: i32,
    #[serde(rename = "Bus_voltage")]
    pub bus_voltage: i32,
    #[serde(rename = "Heatsink_temperature")]
    pub heatsink_temperature: i32,
    #[serde(rename = "Battery_capacity")]
    pub battery_capacity: i32,
    #[serde(rename = "Battery_voltage")]
    pub battery_voltage: f64,
    #[serde(rename = "Battery_charge_current")]
    pub battery_charge_current: i32,
    #[serde(rename = "Battery_discharge_current")]
    pub battery_discharge_current: i32,
    #[serde(rename = "Load_status_on")]
    pub load_status_on: u8,
    #[serde(rename = "SCC_charge_on")]
    pub scc_charge_on: u8,
    #[serde(rename = "AC_charge_on")]
    pub ac_charge_on: u8,
    #[serde(rename = "Battery_recharge_voltage")]
    pub battery_recharge_voltage: f64,
    #[serde(rename = "Battery_under_voltage")]
    pub battery_under_voltage: f64,
    #[serde(rename = "Battery_bulk_voltage")]
    pub battery_bulk_voltage: f64,
    #[serde(rename = "Battery_float_voltage")]
    pub battery_float_voltage: f64,
    #[serde(rename = "Max_grid_charge_current")]
    pub max_grid_charge_current: i32,
    #[serde(rename = "Max_charge_current")]
    pub max_charge_current: i32,
    #[serde(rename = "Out_source_priority")]
    pub out_source_priority: i32,
    #[serde(rename = "Charger_source_priority")]
    pub charger_source_priority: i32,
    #[serde(rename = "Battery_redischarge_voltage")]
    pub battery_redischarge_voltage: f64,
    #[serde(rename = "Warnings")]
    pub warnings: String,
    #[serde(rename = "Active_warnings")]
    pub active_warnings: Vec<&'static str>,
}

impl Telemetry {
    pub fn new(
        mode: Mode,
        op: &Operational,
        ratings: &Ratings,
        warnings: &Warnings,
        factors: ScaleFactors,
    ) -> Self {
        Self {
            inverter_mode: mode.code(),
            ac_grid_voltage: op.grid_voltage,
            ac_grid_frequency: op.grid_frequency,
            ac_out_voltage: op.ac_output_voltage,
            ac_out_frequency: op.ac_output_frequency,
            pv_in_voltage: op.pv_input_voltage,
            pv_in_current: factors.adjusted_current(op.pv_input_current),
            pv_in_watts: factors.derived_power(op.scc_battery_voltage, op.pv_input_current),
            scc_voltage: op.scc_battery_voltage,
            load_pct: op.output_load_percent,
            load_watt: op.ac_output_active_power,
            load_va: op.ac_output_apparent_power,
            bus_voltage: op.bus_voltage,
            heatsink_temperature: op.heatsink_temperature,
            battery_capacity: op.battery_capacity,
            battery_voltage: op.battery_voltage,
            battery_charge_current: op.battery_charging_current,
            battery_discharge_current: op.battery_discharge_current,
            load_status_on: op.device_status.load_on(),
            scc_charge_on: op.device_status.scc_charging(),
            ac_charge_on: op.device_status.ac_charging(),
            battery_recharge_voltage: ratings.battery_recharge_voltage,
            battery_under_voltage: ratings.battery_under_voltage,
            battery_bulk_voltage: ratings.battery_bulk_voltage,
            battery_float_voltage: ratings.battery_float_voltage,
            max_grid_charge_current: ratings.max_ac_charging_current,
            max_charge_current: ratings.max_charging_current,
            out_source_priority: ratings.output_source_priority,
            charger_source_priority: ratings.charger_source_priority,
            battery_redischarge_voltage: ratings.battery_redischarge_voltage,
            warnings: warnings.as_str().to_string(),
            active_warnings: warnings.active(),
        }
    }
} // }}}
