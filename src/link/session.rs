//! # Link Session
//!
//! Drives one inverter over the radio: transmits a request, listens on the two
//! receive channels paired with the transmit channel, reassembles the answer
//! and retries whole request/response cycles until the data checks out or the
//! timeout expires.
//!
//! ```text
//! Idle -> Requesting -> Reassembled | Retrying | TimedOut
//! ```
//!
//! Commands carry no explicit acknowledgment. A command counts as received
//! once the inverter's event counter changes.
//!
//! All waiting is busy-polling against [`Clock::now_ms`]. The session owns the
//! transceiver exclusively; services must serialize calls into one session.

use tracing::{debug, info, trace, warn};

use super::clock::Clock;
use super::status::StatusFlags;
use crate::error::{HmLinkError, Result};
use crate::hm::decoder::{parse_telemetry, verify_reassembled, Fragment, TelemetryRecord, STALE_MASK, VALID_MASK};
use crate::hm::encoder::{build_command_frame, build_info_request, power_limit_modifier, OutboundFrame};
use crate::hm::protocol::{rx_channels, Command, InverterIdentity, DTU_SERIAL, TX_CHANNELS};
use crate::hm::reassembly::{Absorbed, ReassemblyTracker};
use crate::radio::{PowerLevel, RadioError, Transceiver};

/// How long to listen on one receive channel per cycle
pub const DEFAULT_RX_WINDOW_MS: u64 = 7;

/// Default bound for one telemetry fetch
pub const DEFAULT_TIMEOUT_MS: u64 = 2000;

/// Default number of fetches tried to read the event counter around a command
pub const DEFAULT_BASELINE_ATTEMPTS: u32 = 10;

/// Channel sweeps before a command is reported unacknowledged
pub const COMMAND_SWEEPS: u32 = 9;

/// Pipe the DTU address is opened on
const DTU_PIPE: u8 = 1;

/// Auto-ack enable mask (pipe 1)
const AUTO_ACK_PIPES: u8 = 0b10;

/// Session parameters, fixed for the session's lifetime
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Serial this node identifies itself with
    pub dtu_serial: u64,
    pub power_level: PowerLevel,
    /// RF channel requests go out on (one of [`TX_CHANNELS`])
    pub tx_channel: u8,
    pub timeout_ms: u64,
    pub rx_window_ms: u64,
    pub baseline_attempts: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            dtu_serial: DTU_SERIAL,
            power_level: PowerLevel::Min,
            tx_channel: TX_CHANNELS[0],
            timeout_ms: DEFAULT_TIMEOUT_MS,
            rx_window_ms: DEFAULT_RX_WINDOW_MS,
            baseline_attempts: DEFAULT_BASELINE_ATTEMPTS,
        }
    }
}

/// RF channel for a transmit channel index (0..=4)
///
/// # Errors
///
/// Returns `InvalidTxChannel` for indices outside the channel table.
pub fn tx_channel_for_index(index: u8) -> Result<u8> {
    TX_CHANNELS
        .get(index as usize)
        .copied()
        .ok_or(HmLinkError::InvalidTxChannel(index))
}

/// Radio link to a single inverter
#[derive(Debug)]
pub struct LinkSession<R, C> {
    radio: R,
    clock: C,
    inverter: InverterIdentity,
    config: LinkConfig,
    rx_channels: [u8; 2],
}

impl<R, C> LinkSession<R, C>
where
    R: Transceiver,
    C: Clock,
{
    /// Create a session and apply the configured transmit power
    ///
    /// # Errors
    ///
    /// Returns `InvalidTxChannel` if `config.tx_channel` is not a transmit
    /// channel, or `Radio` if the transceiver cannot be configured.
    pub fn new(mut radio: R, clock: C, inverter: InverterIdentity, config: LinkConfig) -> Result<Self> {
        let rx_channels =
            rx_channels(config.tx_channel).ok_or(HmLinkError::InvalidTxChannel(config.tx_channel))?;

        radio.set_power_level(config.power_level)?;

        info!(
            "Link to inverter {} ({}) on channel {}, listening on {:?}",
            inverter.serial(),
            inverter.family(),
            config.tx_channel,
            rx_channels
        );

        Ok(Self {
            radio,
            clock,
            inverter,
            config,
            rx_channels,
        })
    }

    pub fn inverter(&self) -> &InverterIdentity {
        &self.inverter
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Give back the transceiver
    pub fn into_radio(self) -> R {
        self.radio
    }

    /// Request one telemetry sample
    ///
    /// Always returns a record with the family's field count. When the fetch
    /// times out every value is zero and `TIMED_OUT` is set; check
    /// [`StatusFlags::is_valid`] before trusting the numbers.
    ///
    /// # Errors
    ///
    /// Only transceiver bus faults are errors.
    pub fn fetch_telemetry(&mut self) -> Result<(TelemetryRecord, StatusFlags)> {
        let schema = self.inverter.family().schema();
        let mut tracker = ReassemblyTracker::new(schema);
        let mut flags = StatusFlags::empty();

        let frame = build_info_request(&self.inverter, self.config.dtu_serial, self.clock.epoch_seconds());
        let started = self.clock.now_ms();
        let mut cycles = 0u32;

        let assembled = loop {
            if self.clock.now_ms().saturating_sub(started) > self.config.timeout_ms {
                flags.insert(StatusFlags::TIMED_OUT);
                break None;
            }

            cycles += 1;
            self.transmit(&frame, self.config.tx_channel)?;

            for channel in self.rx_channels {
                self.listen(channel, &mut tracker, &mut flags)?;
                if tracker.is_complete() {
                    break;
                }
            }

            if !tracker.is_complete() {
                trace!("Cycle {}: still missing {:02X?}", cycles, tracker.outstanding());
                continue;
            }

            let buffer = tracker.assemble();
            if verify_reassembled(&buffer) {
                flags.insert(StatusFlags::DATA_VALID);
                break Some(buffer);
            }

            warn!("Reassembled response failed CRC16, requesting again");
            flags.insert(StatusFlags::REASSEMBLY_CHECKSUM_ERROR);
            tracker.reset();
        };

        let record = match assembled {
            Some(buffer) => {
                debug!("Telemetry received after {} cycle(s)", cycles);
                parse_telemetry(&buffer, schema, VALID_MASK)
            }
            None => {
                warn!(
                    "Telemetry fetch timed out after {} ms ({} cycle(s))",
                    self.config.timeout_ms, cycles
                );
                parse_telemetry(&vec![0; schema.assembled_len], schema, STALE_MASK)
            }
        };

        Ok((record, flags))
    }

    /// Send a device control command and wait for the inverter to react
    ///
    /// The frame is broadcast on every transmit channel per sweep, since the
    /// channel the inverter listens on is unknown. After each sweep the event
    /// counter is read again; a change means the command arrived. After
    /// [`COMMAND_SWEEPS`] sweeps without a change `COMMAND_UNACKNOWLEDGED` is
    /// set. The returned flags also carry those of the last telemetry read.
    ///
    /// # Errors
    ///
    /// Returns `BaselineUnavailable` if no telemetry could be read before
    /// sending, so there is nothing to compare against. Transceiver bus faults
    /// are errors too.
    pub fn send_command(&mut self, command: Command, value: Option<u16>, modifier: u16) -> Result<StatusFlags> {
        let (baseline, _) = self.read_event_counter()?;
        let baseline = baseline.ok_or(HmLinkError::BaselineUnavailable {
            attempts: self.config.baseline_attempts,
        })?;
        debug!("Event counter before {:?}: {}", command, baseline);

        let frame = build_command_frame(&self.inverter, self.config.dtu_serial, command, value, modifier);
        let mut status = StatusFlags::empty();

        for sweep in 1..=COMMAND_SWEEPS {
            for channel in TX_CHANNELS {
                self.transmit(&frame, channel)?;
            }

            let (event, flags) = self.read_event_counter()?;
            status = flags;

            match event {
                Some(event) if event != baseline => {
                    info!("{:?} acknowledged after {} sweep(s) (event {} -> {})", command, sweep, baseline, event);
                    return Ok(status);
                }
                Some(_) => debug!("Sweep {}: event counter unchanged", sweep),
                None => debug!("Sweep {}: event counter unreadable", sweep),
            }
        }

        warn!("{:?} not acknowledged after {} sweeps", command, COMMAND_SWEEPS);
        status.insert(StatusFlags::COMMAND_UNACKNOWLEDGED);
        Ok(status)
    }

    /// Send a power limit once, without waiting for acknowledgment
    ///
    /// # Arguments
    ///
    /// * `limit` - Watts, or percent when `relative`
    /// * `relative` - Interpret `limit` as a percentage of rated power
    /// * `persist` - Keep the limit across an inverter power cycle
    pub fn set_power_limit(&mut self, limit: u16, relative: bool, persist: bool) -> Result<()> {
        let frame = build_command_frame(
            &self.inverter,
            self.config.dtu_serial,
            Command::SetPowerLimit,
            Some(limit),
            power_limit_modifier(relative, persist),
        );

        info!(
            "Setting power limit to {}{} ({})",
            limit,
            if relative { "%" } else { " W" },
            if persist { "persistent" } else { "until restart" }
        );
        self.transmit(&frame, self.config.tx_channel)
    }

    /// Fetch telemetry until a sample arrives or the attempt budget runs out
    fn read_event_counter(&mut self) -> Result<(Option<u32>, StatusFlags)> {
        let schema = self.inverter.family().schema();
        let mut last = StatusFlags::empty();

        for attempt in 1..=self.config.baseline_attempts {
            let (record, flags) = self.fetch_telemetry()?;
            if !flags.timed_out() {
                return Ok((record.event_counter(schema), flags));
            }

            debug!(
                "Event counter read {}/{} timed out",
                attempt, self.config.baseline_attempts
            );
            last = flags;
        }

        Ok((None, last))
    }

    fn transmit(&mut self, frame: &OutboundFrame, channel: u8) -> Result<()> {
        self.radio.flush_transmit_buffer()?;
        self.radio.set_channel(channel)?;
        self.radio.stop_listening()?;
        self.radio.open_transmit_pipe(&frame.inverter_address())?;
        self.radio.open_receive_pipe(DTU_PIPE, &frame.dtu_address())?;
        self.radio.enable_auto_ack(AUTO_ACK_PIPES)?;

        match self.radio.send(frame.as_bytes()) {
            Ok(()) => trace!("Frame 0x{:02X} sent on channel {}", frame.frame_type(), channel),
            Err(RadioError::SendFailed) => {
                trace!("Frame 0x{:02X} not acknowledged on channel {}", frame.frame_type(), channel)
            }
            Err(e) => return Err(e.into()),
        }

        Ok(())
    }

    fn listen(&mut self, channel: u8, tracker: &mut ReassemblyTracker, flags: &mut StatusFlags) -> Result<()> {
        self.radio.enable_dynamic_payload_length()?;
        self.radio.set_channel(channel)?;
        self.radio.start_listening()?;

        let opened = self.clock.now_ms();
        while self.clock.now_ms().saturating_sub(opened) < self.config.rx_window_ms {
            if tracker.is_complete() {
                break;
            }
            if !self.radio.has_incoming_data()? {
                continue;
            }

            let fragment = Fragment::from_raw(&self.radio.receive_fixed_frame()?);
            match tracker.absorb(fragment) {
                Absorbed::ChecksumMismatch => {
                    debug!("Fragment CRC8 mismatch on channel {}", channel);
                    flags.insert(StatusFlags::FRAME_CHECKSUM_ERROR);
                    break;
                }
                Absorbed::Complete => break,
                Absorbed::Incomplete => {}
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hm::protocol::{Family, FRAME_TYPE_REQ_DEVCONTROL, FRAME_TYPE_REQ_INFO};
    use crate::link::clock::mocks::SteppingClock;
    use crate::radio::mocks::ScriptedRadio;
    use crate::radio::MockTransceiver;

    const FAMILY1_SERIAL: u64 = 112183212262;
    const FAMILY2_SERIAL: u64 = 114172220000;
    const FAMILY3_SERIAL: u64 = 116100000001;

    fn session(radio: ScriptedRadio, config: LinkConfig) -> LinkSession<ScriptedRadio, SteppingClock> {
        let serial = radio.link.lock().unwrap().inverter_serial;
        let inverter = InverterIdentity::new(serial).unwrap();
        LinkSession::new(radio, SteppingClock::new(1), inverter, config).unwrap()
    }

    #[test]
    fn test_tx_channel_for_index() {
        assert_eq!(tx_channel_for_index(0).unwrap(), 3);
        assert_eq!(tx_channel_for_index(4).unwrap(), 75);
        assert!(matches!(tx_channel_for_index(5), Err(HmLinkError::InvalidTxChannel(5))));
    }

    #[test]
    fn test_default_config() {
        let config = LinkConfig::default();
        assert_eq!(config.dtu_serial, DTU_SERIAL);
        assert_eq!(config.tx_channel, 3);
        assert_eq!(config.timeout_ms, 2000);
        assert_eq!(config.rx_window_ms, 7);
        assert_eq!(config.baseline_attempts, 10);
    }

    #[test]
    fn test_new_rejects_unknown_tx_channel() {
        let radio = ScriptedRadio::new(FAMILY1_SERIAL);
        let inverter = InverterIdentity::new(FAMILY1_SERIAL).unwrap();
        let config = LinkConfig {
            tx_channel: 4,
            ..LinkConfig::default()
        };

        let result = LinkSession::new(radio, SteppingClock::new(1), inverter, config);
        assert!(matches!(result, Err(HmLinkError::InvalidTxChannel(4))));
    }

    #[test]
    fn test_new_applies_power_level() {
        let radio = ScriptedRadio::new(FAMILY1_SERIAL);
        let link = radio.link.clone();
        let config = LinkConfig {
            power_level: PowerLevel::High,
            ..LinkConfig::default()
        };

        let session = session(radio, config);
        assert_eq!(link.lock().unwrap().power_level, Some(PowerLevel::High));
        assert_eq!(session.inverter().family(), Family::Family1);
    }

    #[test]
    fn test_fetch_telemetry_each_family() {
        for serial in [FAMILY1_SERIAL, FAMILY2_SERIAL, FAMILY3_SERIAL] {
            let radio = ScriptedRadio::new(serial).with(|link| link.event_counter = 42);
            let mut session = session(radio, LinkConfig::default());
            let schema = session.inverter().family().schema();

            let (record, status) = session.fetch_telemetry().unwrap();

            assert_eq!(status, StatusFlags::DATA_VALID, "serial {}", serial);
            assert_eq!(record.len(), schema.field_count());
            assert_eq!(record.get(0), Some(1));
            assert_eq!(record.event_counter(schema), Some(42));
        }
    }

    #[test]
    fn test_fetch_keeps_yield_totals_above_16_bits() {
        // Family1 field 3 and Family2 fields 6/7 are 4-byte lifetime totals
        let radio = ScriptedRadio::new(FAMILY2_SERIAL)
            .with(|link| link.field_values = vec![(6, 100_000), (7, 0x0123_4567)]);
        let mut session = session(radio, LinkConfig::default());

        let (record, status) = session.fetch_telemetry().unwrap();

        assert!(status.is_valid());
        assert_eq!(record.get(6), Some(100_000));
        assert_eq!(record.get(7), Some(0x0123_4567));
        assert_eq!(record.get(8), Some(9));
    }

    #[test]
    fn test_fetch_transmits_and_listens_on_paired_channels() {
        let radio = ScriptedRadio::new(FAMILY2_SERIAL);
        let link = radio.link.clone();
        let config = LinkConfig {
            tx_channel: 40,
            ..LinkConfig::default()
        };
        let mut session = session(radio, config);

        session.fetch_telemetry().unwrap();

        let link = link.lock().unwrap();
        assert_eq!(link.sent.len(), 1);
        let (channel, frame) = &link.sent[0];
        assert_eq!(*channel, 40);
        assert_eq!(frame[0], FRAME_TYPE_REQ_INFO);
        assert_eq!(frame.len(), 27);
        assert_eq!(link.listened.first(), Some(&3));
        assert_eq!(link.tx_address, Some([0x01, 0x72, 0x22, 0x00, 0x00]));
        assert_eq!(link.rx_pipes.last(), Some(&(1, [0x01, 0x78, 0x56, 0x30, 0x01])));
        assert_eq!(link.auto_ack_mask, Some(0b10));
        assert!(link.dynamic_payloads);
    }

    #[test]
    fn test_timeout_zero_without_answer() {
        let radio = ScriptedRadio::new(FAMILY1_SERIAL).with(|link| link.silent = true);
        let config = LinkConfig {
            timeout_ms: 0,
            ..LinkConfig::default()
        };
        let mut session = session(radio, config);

        let (record, status) = session.fetch_telemetry().unwrap();

        assert!(status.timed_out());
        assert!(!status.is_valid());
        assert_eq!(record.len(), 13);
        assert!(record.values().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_silent_inverter_retries_until_timeout() {
        let radio = ScriptedRadio::new(FAMILY3_SERIAL).with(|link| link.silent = true);
        let link = radio.link.clone();
        let config = LinkConfig {
            timeout_ms: 100,
            ..LinkConfig::default()
        };
        let mut session = session(radio, config);

        let (record, status) = session.fetch_telemetry().unwrap();

        assert_eq!(status, StatusFlags::TIMED_OUT);
        assert_eq!(record.len(), 26);
        assert!(link.lock().unwrap().info_requests_received() > 1);
    }

    #[test]
    fn test_reassembly_checksum_failure_requests_again() {
        let radio = ScriptedRadio::new(FAMILY2_SERIAL)
            .with(|link| link.corrupt_reassembly = 1);
        let link = radio.link.clone();
        let mut session = session(radio, LinkConfig::default());

        let (record, status) = session.fetch_telemetry().unwrap();

        assert!(status.is_valid());
        assert!(status.contains(StatusFlags::REASSEMBLY_CHECKSUM_ERROR));
        assert_eq!(record.get(0), Some(1));
        assert_eq!(link.lock().unwrap().info_requests_received(), 2);
    }

    #[test]
    fn test_fragment_checksum_failure_is_sticky() {
        let radio = ScriptedRadio::new(FAMILY1_SERIAL)
            .with(|link| link.corrupt_last_fragment = 1);
        let link = radio.link.clone();
        let mut session = session(radio, LinkConfig::default());

        let (_record, status) = session.fetch_telemetry().unwrap();

        assert_eq!(status, StatusFlags::DATA_VALID | StatusFlags::FRAME_CHECKSUM_ERROR);
        assert_eq!(link.lock().unwrap().info_requests_received(), 2);
    }

    #[test]
    fn test_unacknowledged_send_keeps_listening() {
        let radio = ScriptedRadio::new(FAMILY1_SERIAL).with(|link| link.send_fails = true);
        let config = LinkConfig {
            timeout_ms: 30,
            ..LinkConfig::default()
        };
        let mut session = session(radio, config);

        let (_record, status) = session.fetch_telemetry().unwrap();
        assert!(status.timed_out());
    }

    #[test]
    fn test_bus_fault_is_an_error() {
        let radio = ScriptedRadio::new(FAMILY1_SERIAL);
        let link = radio.link.clone();
        let mut session = session(radio, LinkConfig::default());
        link.lock().unwrap().bus_fault = true;

        match session.fetch_telemetry() {
            Err(HmLinkError::Radio(RadioError::Bus(_))) => {}
            other => panic!("Expected bus error, got: {:?}", other),
        }
    }

    #[test]
    fn test_send_command_acknowledged() {
        let radio = ScriptedRadio::new(FAMILY1_SERIAL).with(|link| {
            link.event_counter = 5;
            link.acknowledge_after_commands = Some(3);
        });
        let link = radio.link.clone();
        let mut session = session(radio, LinkConfig::default());

        let status = session.send_command(Command::Off, None, 0).unwrap();

        assert!(status.is_valid());
        assert!(!status.contains(StatusFlags::COMMAND_UNACKNOWLEDGED));

        let link = link.lock().unwrap();
        // One sweep covers all five channels
        assert_eq!(link.commands_received(), 5);
        let channels: Vec<u8> = link
            .sent
            .iter()
            .filter(|(_, frame)| frame[0] == FRAME_TYPE_REQ_DEVCONTROL)
            .map(|(channel, _)| *channel)
            .collect();
        assert_eq!(channels, TX_CHANNELS.to_vec());
        assert_eq!(link.event_counter, 6);
    }

    #[test]
    fn test_send_command_unacknowledged_after_nine_sweeps() {
        let radio = ScriptedRadio::new(FAMILY1_SERIAL);
        let link = radio.link.clone();
        let mut session = session(radio, LinkConfig::default());

        let status = session.send_command(Command::On, None, 0).unwrap();

        assert!(status.contains(StatusFlags::COMMAND_UNACKNOWLEDGED));
        assert!(status.is_valid());

        let link = link.lock().unwrap();
        assert_eq!(link.commands_received(), (COMMAND_SWEEPS as usize) * TX_CHANNELS.len());
        // Baseline plus one read per sweep
        assert_eq!(link.info_requests_received(), 1 + COMMAND_SWEEPS as usize);
    }

    #[test]
    fn test_send_command_without_baseline() {
        let radio = ScriptedRadio::new(FAMILY1_SERIAL).with(|link| link.silent = true);
        let link = radio.link.clone();
        let config = LinkConfig {
            timeout_ms: 20,
            baseline_attempts: 3,
            ..LinkConfig::default()
        };
        let mut session = session(radio, config);

        match session.send_command(Command::On, None, 0) {
            Err(HmLinkError::BaselineUnavailable { attempts }) => assert_eq!(attempts, 3),
            other => panic!("Expected BaselineUnavailable, got: {:?}", other),
        }
        assert_eq!(link.lock().unwrap().commands_received(), 0);
    }

    #[test]
    fn test_set_power_limit_sends_once() {
        let mut radio = MockTransceiver::new();
        radio.expect_set_power_level().times(1).returning(|_| Ok(()));
        radio.expect_flush_transmit_buffer().times(1).returning(|| Ok(()));
        radio.expect_set_channel().withf(|channel| *channel == 23).times(1).returning(|_| Ok(()));
        radio.expect_stop_listening().times(1).returning(|| Ok(()));
        radio
            .expect_open_transmit_pipe()
            .withf(|address| address[1..] == [0x83, 0x21, 0x22, 0x62])
            .times(1)
            .returning(|_| Ok(()));
        radio
            .expect_open_receive_pipe()
            .withf(|pipe, _| *pipe == 1)
            .times(1)
            .returning(|_, _| Ok(()));
        radio.expect_enable_auto_ack().times(1).returning(|_| Ok(()));
        radio
            .expect_send()
            .withf(|frame| {
                frame.to_vec()
                    == vec![
                        0x51, 0x83, 0x21, 0x22, 0x62, 0x78, 0x56, 0x30, 0x01, 0x80, 0x0B, 0x00, 0x03,
                        0xE8, 0x01, 0x01, 0x40, 0x41, 0xCD,
                    ]
            })
            .times(1)
            .returning(|_| Ok(()));

        let inverter = InverterIdentity::new(FAMILY1_SERIAL).unwrap();
        let config = LinkConfig {
            tx_channel: 23,
            ..LinkConfig::default()
        };
        let mut session = LinkSession::new(radio, SteppingClock::new(1), inverter, config).unwrap();

        session.set_power_limit(1000, true, true).unwrap();
    }

    #[test]
    fn test_set_power_limit_ignores_missing_ack() {
        let mut radio = MockTransceiver::new();
        radio.expect_set_power_level().returning(|_| Ok(()));
        radio.expect_flush_transmit_buffer().returning(|| Ok(()));
        radio.expect_set_channel().returning(|_| Ok(()));
        radio.expect_stop_listening().returning(|| Ok(()));
        radio.expect_open_transmit_pipe().returning(|_| Ok(()));
        radio.expect_open_receive_pipe().returning(|_, _| Ok(()));
        radio.expect_enable_auto_ack().returning(|_| Ok(()));
        radio.expect_send().times(1).returning(|_| Err(RadioError::SendFailed));

        let inverter = InverterIdentity::new(FAMILY1_SERIAL).unwrap();
        let mut session =
            LinkSession::new(radio, SteppingClock::new(1), inverter, LinkConfig::default()).unwrap();

        assert!(session.set_power_limit(50, false, false).is_ok());
    }
}
