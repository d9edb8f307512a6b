//! # Mock Device
//!
//! A device-side implementation of the reference protocol, used in-process over a
//! loopback and out-of-process by the `mock_device` binary.
//!
//! ## Behaviour
//!
//! - `trigger_notification` asks the device to post one of its own notifications
//!   (`date`, `heartbeat` or `bitwise_complement`). Other ids are ignored.
//! - Incoming `motor_control`, `motor_report` and `bitfields` notifications are
//!   answered asynchronously with a notification of their own.

use std::sync::Arc;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use tracing::debug;
use tracing::warn;

use loamrun::Peer;
use loamrun::PeerHandle;
use loamrun::peer;

use crate::bindings;
use crate::bindings::BitfieldStruct;
use crate::bindings::Client;
use crate::bindings::ListFirstAttr;
use crate::bindings::ListLastAttr;
use crate::bindings::ListMidAttr;
use crate::bindings::MockDate;
use crate::bindings::MockLfsr;
use crate::bindings::MockMotorControl;
use crate::bindings::MockMotorReport;
use crate::bindings::MotorDirection;
use crate::bindings::MotorState;
use crate::bindings::Voltages;

pub const LFSR_POLYNOMIAL: u64 = 0xD800_0000_0000_0000;

/// Substituted for a zero seed, which would never leave zero.
pub const LFSR_ZERO_SEED: u64 = 0x1F2E_3D4C_5B6A_7988;

pub const COMPLEMENT_VALUE: u64 = 0xAAAA_AAAA_AAAA_AAAA;

pub const MOTOR_REPORT_SAMPLES: usize = 20;

pub struct MockDevice {
    handle: PeerHandle,
}

impl MockDevice {
    pub fn new(handle: PeerHandle) -> Self {
        Self { handle }
    }
}

fn now() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// Year, month and day of a count of days since 1970-01-01.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month, day)
}

/// UTC date of a Unix timestamp, with `as_text` formatted as `DDMMYYYY`.
pub fn mock_date(epoch: i64) -> MockDate {
    let (year, month, day) = civil_from_days(epoch.div_euclid(86_400));
    MockDate {
        day: day as u16,
        month: month as u8,
        year: year as i32,
        as_text: format!("{:02}{:02}{:04}", day, month, year),
    }
}

/// Galois LFSR stepped `iter` times from `seed`.
pub fn lfsr(seed: u64, iter: u8) -> u64 {
    let mut value = if seed == 0 { LFSR_ZERO_SEED } else { seed };
    for _ in 0..iter {
        let feedback = value & 1;
        value >>= 1;
        if feedback == 1 {
            value ^= LFSR_POLYNOMIAL;
        }
    }
    value
}

fn min_max(data: &[i16]) -> (i16, i16) {
    let min = data.iter().copied().min().unwrap_or(i16::MAX);
    let max = data.iter().copied().max().unwrap_or(i16::MIN);
    (min, max)
}

/// Every member inverted within its width, `temp` pinned to `MV_37_50`.
pub fn complement(config: &BitfieldStruct) -> BitfieldStruct {
    BitfieldStruct {
        channel: !config.channel,
        inom: !config.inom & 0x1F,
        hsc: !config.hsc & 0x0F,
        tnom: !config.tnom & 0x1FF,
        temp: Voltages::MV_37_50,
        ststart: !config.ststart & 0x07,
        ccm: !config.ccm & 1,
        set: !config.set & 1,
        state: !config.state & 1,
        clear: !config.clear & 1,
    }
}

impl bindings::Handlers for MockDevice {
    fn trigger_notification(&self, rpc_id: u16) -> Result<(), String> {
        let posted = match rpc_id {
            bindings::DATE_ID => bindings::post_date(&self.handle, &bindings::DateArgs { date: mock_date(now()) }),
            bindings::HEARTBEAT_ID => bindings::post_heartbeat(&self.handle, &bindings::HeartbeatArgs {}),
            bindings::BITWISE_COMPLEMENT_ID => bindings::post_bitwise_complement(
                &self.handle,
                &bindings::BitwiseComplementArgs { value: COMPLEMENT_VALUE, complement: !COMPLEMENT_VALUE },
            ),
            other => {
                debug!(id = other, "ignoring trigger for unknown notification");
                return Ok(());
            }
        };
        posted.map_err(|e| e.to_string())
    }

    fn add_int(&self, a: u32, b: u32) -> Result<u32, String> {
        Ok(a.wrapping_add(b))
    }

    fn sum_list(&self, a: Vec<u32>) -> Result<u32, String> {
        Ok(a.into_iter().fold(0u32, u32::wrapping_add))
    }

    fn void_return(&self, _x: i16) -> Result<(), String> {
        Ok(())
    }

    fn void_full(&self) -> Result<(), String> {
        Ok(())
    }

    fn divide_float(&self, a: f32, b: f32) -> Result<f32, String> {
        Ok(a / b)
    }

    fn caesar_cipher(&self, text: String, offset: u8) -> Result<String, String> {
        let shifted: Vec<u8> = text.bytes().map(|b| b.wrapping_add(offset)).collect();
        String::from_utf8(shifted).map_err(|_| "ciphertext is not valid UTF-8".to_string())
    }

    fn sort_bytes(&self, mut data: Vec<u8>) -> Result<Vec<u8>, String> {
        data.sort_unstable();
        Ok(data)
    }

    fn list_first_attr(&self, data: Vec<i16>) -> Result<ListFirstAttr, String> {
        let (min, max) = min_max(&data);
        Ok(ListFirstAttr { data, min, max })
    }

    fn list_mid_attr(&self, data: Vec<i16>) -> Result<ListMidAttr, String> {
        let (min, max) = min_max(&data);
        Ok(ListMidAttr { min, data, max })
    }

    fn list_last_attr(&self, data: Vec<i16>) -> Result<ListLastAttr, String> {
        let (min, max) = min_max(&data);
        Ok(ListLastAttr { min, max, data })
    }

    fn epoch_to_date(&self, epoch: i32) -> Result<MockDate, String> {
        Ok(mock_date(epoch as i64))
    }

    fn emoji(&self, text: String) -> Result<String, String> {
        let reply = if text == "😘" { "🥰" } else { "🤔" };
        Ok(reply.to_string())
    }

    fn get_random_number(&self, seed: u64, iter: u8) -> Result<MockLfsr, String> {
        Ok(MockLfsr { polynomial: LFSR_POLYNOMIAL, value: lfsr(seed, iter), timestamp: mock_date(now()) })
    }

    fn struct_in_param(&self, structure: ListFirstAttr) -> Result<(), String> {
        if structure.data.len() != 10 || structure.min != 1 || structure.max != 10 {
            return Err(format!("unexpected structure {:?}", structure));
        }
        Ok(())
    }
}

/// Serves every call on `peer` and subscribes the asynchronous replies.
pub fn attach(peer: &Peer) -> peer::Result<()> {
    bindings::serve(peer, Arc::new(MockDevice::new(peer.handle())))?;
    let client = Client::new(peer);

    let handle = peer.handle();
    client.on_motor_control(move |args| {
        let control = args.control;
        if control.state != MotorState::ON || control.direction != MotorDirection::UP || control.pwm_duty != 50 {
            warn!(?control, "unexpected motor control");
            return;
        }
        let report = MockMotorReport {
            state: MotorState::STOP,
            direction: MotorDirection::DOWN,
            voltage: (11..11 + MOTOR_REPORT_SAMPLES as u16).collect(),
        };
        if let Err(e) = bindings::post_motor_report(&handle, &bindings::MotorReportArgs { report }) {
            warn!(error = %e, "failed to post motor report");
        }
    })?;

    let handle = peer.handle();
    client.on_motor_report(move |args| {
        let report = args.report;
        if report.state != MotorState::START
            || report.direction != MotorDirection::UP
            || report.voltage.len() != MOTOR_REPORT_SAMPLES
        {
            warn!(?report, "unexpected motor report");
            return;
        }
        let control = MockMotorControl { state: MotorState::STOP, direction: MotorDirection::DOWN, pwm_duty: 1200 };
        if let Err(e) = bindings::post_motor_control(&handle, &bindings::MotorControlArgs { control }) {
            warn!(error = %e, "failed to post motor control");
        }
    })?;

    let handle = peer.handle();
    client.on_bitfields(move |args| {
        let config = complement(&args.config);
        if let Err(e) = bindings::post_bitfields(&handle, &bindings::BitfieldsArgs { config }) {
            warn!(error = %e, "failed to post bitfields");
        }
    })?;

    client.on_date(|args| debug!(date = %args.date.as_text, "date received"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_date() {
        let date = mock_date(1_706_109_534);
        assert_eq!((date.day, date.month, date.year), (24, 1, 2024));
        assert_eq!(date.as_text, "24012024");

        assert_eq!(mock_date(0).as_text, "01011970");
        assert_eq!(mock_date(951_782_400).as_text, "29022000");
        assert_eq!(mock_date(-86_400).as_text, "31121969");
    }

    #[test]
    fn test_lfsr() {
        assert_eq!(lfsr(0x1111_1111_1111_1118, 1), 0x0888_8888_8888_888C);
        assert_eq!(lfsr(0x1111_1111_1111_1118, 0), 0x1111_1111_1111_1118);
        assert_eq!(lfsr(0, 0), LFSR_ZERO_SEED);
        assert_eq!(lfsr(1, 1), LFSR_POLYNOMIAL);
    }

    #[test]
    fn test_complement_keeps_widths() {
        let config = BitfieldStruct {
            channel: 0,
            inom: 1,
            hsc: 0,
            tnom: 1,
            temp: Voltages::MV_110_92,
            ststart: 1,
            ccm: 0,
            set: 1,
            state: 0,
            clear: 1,
        };
        let flipped = complement(&config);
        assert_eq!(flipped.channel, 0xFF);
        assert_eq!(flipped.inom, 0x1E);
        assert_eq!(flipped.hsc, 0x0F);
        assert_eq!(flipped.tnom, 0x1FE);
        assert_eq!(flipped.temp, Voltages::MV_37_50);
        assert_eq!(flipped.ststart, 0x06);
        assert_eq!((flipped.ccm, flipped.set, flipped.state, flipped.clear), (1, 0, 1, 0));
    }
}
