//! The streaming core: RX resynchronization and parsing, command routing,
//! per-sensor streaming state machines and the tick scheduler.
//!
//! One `Core` instance is strictly single-threaded and cooperatively
//! scheduled; the only concurrent entry point is [`Core::on_rx`], which
//! touches nothing but the SPSC RX ring. All buffers are caller-provided
//! and bound in by reference; the core allocates nothing after
//! construction.

use log::{debug, trace, warn};

use crate::buffer::ByteQueue;
use crate::dispatch::{
    parse_noarg, parse_sensor_id, parse_set_period, CmdArgs, CmdHandler, CmdParser, CommandTable,
    ErrorCode, Response, CMD_GET_PERIOD, CMD_GET_SENSORS, CMD_PING, CMD_READ_SENSOR,
    CMD_SET_PERIOD, CMD_START_STREAM, CMD_STOP_STREAM,
};
use crate::frame::{parse_frame, FrameError, FrameHeader, FrameType, MAGIC, CRC_LEN, HDR_LEN, FRAME_MAX_BYTES, MAX_PAYLOAD};
use crate::interface::{Clock, SensorAdapter, SensorStatus, Transport};
use crate::tx::TxQueue;

/// Smallest accepted stream period.
pub const MIN_PERIOD_MS: u16 = 1;
/// Largest accepted stream period.
pub const MAX_PERIOD_MS: u16 = 10_000;
/// Sensor registry capacity.
pub const MAX_SENSORS: usize = 8;
/// Largest sample a stream payload can carry next to the runtime id.
pub const MAX_SAMPLE_BYTES: usize = MAX_PAYLOAD - 1;

/// Poll attempts granted to a blocking on-demand read before giving up.
const READ_POLL_BUDGET: u32 = 256;

/// Error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The sensor registry is full.
    RegistryFull,
}

/// Per-sensor streaming state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamState {
    Idle,
    SensorStart,
    SensorPoll,
    Ready,
    Error,
}

/// Per-sensor stream bookkeeping, one slot per registered sensor.
struct SensorSlot<'a> {
    runtime_id: u8,
    adapter: &'a dyn SensorAdapter,
    ready: bool,
    streaming: bool,
    seq: u32,
    state: StreamState,
    period_ms: u16,
    default_period_ms: u16,
    max_payload: u16,
    last_emit_ms: u32,
}

impl<'a> SensorSlot<'a> {
    /// Advances the state machine by exactly one transition.
    fn step(&mut self, tx: &mut TxQueue<'_>, t: u32, target: &str) {
        match self.state {
            StreamState::Idle => {
                if t.wrapping_sub(self.last_emit_ms) >= self.period_ms as u32 {
                    self.state = StreamState::SensorStart;
                }
            }
            StreamState::SensorStart => {
                self.state = match self.adapter.start() {
                    SensorStatus::Ready => StreamState::Ready,
                    SensorStatus::Busy => StreamState::SensorPoll,
                    SensorStatus::Error => StreamState::Error,
                };
            }
            StreamState::SensorPoll => {
                self.state = match self.adapter.poll() {
                    SensorStatus::Ready => StreamState::Ready,
                    SensorStatus::Busy => StreamState::SensorPoll,
                    SensorStatus::Error => StreamState::Error,
                };
            }
            StreamState::Ready => {
                let mut payload = [0u8; MAX_PAYLOAD];
                payload[0] = self.runtime_id;
                let cap = (self.max_payload as usize - 1).min(MAX_SAMPLE_BYTES);
                let filled = self.adapter.fill(&mut payload[1..1 + cap]);
                if filled == 0 {
                    self.state = StreamState::Idle;
                    return;
                }
                tx.send_stream(&payload[..1 + filled], t, self.seq);
                self.seq = self.seq.wrapping_add(1);
                self.last_emit_ms = t;
                self.state = StreamState::Idle;
            }
            StreamState::Error => {
                warn!(target: target, "sensor {}: adapter error, streaming stopped", self.runtime_id);
                self.streaming = false;
                self.state = StreamState::Idle;
            }
        }
    }
}

/// The protocol engine. Generic over the transport and timebase; sensors
/// and buffers are registered by reference at wiring time.
pub struct Core<'a, T, C> {
    name: String,
    transport: &'a T,
    clock: &'a C,
    rx: &'a dyn ByteQueue,
    tx: TxQueue<'a>,
    commands: CommandTable<T, C>,
    sensors: heapless::Vec<SensorSlot<'a>, MAX_SENSORS>,
    crc_errors: u32,
    resync_dropped: u32,
    cmds_dispatched: u32,
}

impl<'a, T, C> Core<'a, T, C>
where
    T: Transport,
    C: Clock,
{
    /// Binds the caller-owned RX and TX buffers, transport and timebase
    /// into a fresh core and installs the default command set.
    /// # Arguments
    /// * `name` - identifier string for log targets.
    /// * `transport` - the byte-pipe transport adapter.
    /// * `clock` - monotonic millisecond timebase.
    /// * `rx` - RX ring, also fed by the transport's receive callback.
    /// * `tx` - TX stream ring.
    pub fn new(
        name: String,
        transport: &'a T,
        clock: &'a C,
        rx: &'a dyn ByteQueue,
        tx: &'a dyn ByteQueue,
    ) -> Self {
        let tx = TxQueue::new(tx, MAX_PAYLOAD as u16, name.clone());
        let mut core = Core {
            name,
            transport,
            clock,
            rx,
            tx,
            commands: CommandTable::new(),
            sensors: heapless::Vec::new(),
            crc_errors: 0,
            resync_dropped: 0,
            cmds_dispatched: 0,
        };
        core.attach_default_commands();
        core
    }

    fn attach_default_commands(&mut self) {
        self.commands.register(CMD_START_STREAM, parse_sensor_id, cmd_start_stream);
        self.commands.register(CMD_STOP_STREAM, parse_sensor_id, cmd_stop_stream);
        self.commands.register(CMD_SET_PERIOD, parse_set_period, cmd_set_period);
        self.commands.register(CMD_GET_PERIOD, parse_sensor_id, cmd_get_period);
        self.commands.register(CMD_PING, parse_noarg, cmd_ping);
        self.commands.register(CMD_GET_SENSORS, parse_noarg, cmd_get_sensors);
        self.commands.register(CMD_READ_SENSOR, parse_sensor_id, cmd_read_sensor);
    }

    /// Extends (or replaces) an entry of the command table.
    pub fn register_command(&mut self, opcode: u8, parser: CmdParser, handler: CmdHandler<T, C>) {
        self.commands.register(opcode, parser, handler);
    }

    /// Adds a sensor to the registry and returns its runtime id (assigned
    /// in registration order, starting at 1). The default period is
    /// clamped into the accepted range.
    pub fn register_sensor(
        &mut self,
        adapter: &'a dyn SensorAdapter,
        default_period_ms: u16,
    ) -> Result<u8, Error> {
        let period = default_period_ms.clamp(MIN_PERIOD_MS, MAX_PERIOD_MS);
        let runtime_id = self.sensors.len() as u8 + 1;
        let slot = SensorSlot {
            runtime_id,
            adapter,
            ready: true,
            streaming: false,
            seq: 0,
            state: StreamState::Idle,
            period_ms: period,
            default_period_ms: period,
            max_payload: MAX_PAYLOAD as u16,
            last_emit_ms: 0,
        };
        self.sensors.push(slot).map_err(|_| Error::RegistryFull)?;
        debug!(target: self.name.as_str(), "registered sensor runtime_id={} type=0x{:02x}", runtime_id, adapter.type_id());
        Ok(runtime_id)
    }

    /// Feeds raw transport bytes into the RX ring, at most `u16::MAX` per
    /// call. The whole chunk is dropped when it does not fit
    /// (drop-newest); the ring's rejected-bytes counter records it.
    ///
    /// An interrupt-context RX callback instead holds its own reference
    /// to the ring (the ring is `Sync` under the SPSC contract) and
    /// appends directly; this method is the single-threaded equivalent.
    pub fn on_rx(&self, data: &[u8]) {
        let n = data.len().min(u16::MAX as usize);
        self.rx.append(&data[..n]);
    }

    /// One scheduler pass: drain and dispatch buffered commands, advance
    /// each streaming sensor by one state-machine step, then write at
    /// most one frame to the transport.
    ///
    /// Call from the main loop at least as fast as the smallest
    /// configured stream period.
    pub fn tick(&mut self) {
        self.process_rx();
        self.run_sensors();
        self.tx.pump(self.transport);
    }

    /// Parses every complete frame buffered in the RX ring, resyncing on
    /// the magic across corrupt or partial prefixes.
    fn process_rx(&mut self) {
        let magic = MAGIC.to_le_bytes();
        loop {
            let used = self.rx.used();
            if used < HDR_LEN + CRC_LEN {
                break;
            }
            // Stage the head through a linear window so frames wrapping
            // the ring boundary parse the same as contiguous ones.
            let mut scratch = [0u8; FRAME_MAX_BYTES];
            let window_len = used.min(FRAME_MAX_BYTES);
            let n = self.rx.copy_from_tail(&mut scratch[..window_len]);
            let window = &scratch[..n];

            if window[..2] != magic {
                // Hunt for the next magic in the window; a trailing lone
                // first-magic-byte may complete once more bytes arrive.
                let skip = window.windows(2).position(|w| w == magic);
                let dropped = match skip {
                    Some(pos) => pos,
                    None if window[n - 1] == magic[0] => n - 1,
                    None => n,
                };
                self.rx.pop(dropped);
                self.resync_dropped += dropped as u32;
                trace!(target: self.name.as_str(), "resync: dropped {} bytes", dropped);
                if skip.is_none() {
                    break;
                }
                continue;
            }

            match parse_frame(window) {
                Ok(None) => break,
                Err(err) => {
                    if err == FrameError::BadCrc {
                        self.crc_errors += 1;
                        warn!(target: self.name.as_str(), "crc mismatch, dropping a byte");
                    }
                    self.rx.pop(1);
                    self.resync_dropped += 1;
                }
                Ok(Some(parsed)) => {
                    if parsed.header.frame_type == FrameType::Cmd {
                        self.handle_cmd(parsed.header, parsed.payload);
                    } else {
                        trace!(target: self.name.as_str(), "discarding inbound {:?} frame", parsed.header.frame_type);
                    }
                    self.rx.pop(parsed.consumed);
                }
            }
        }
    }

    /// Runs a command through the dispatcher and forms exactly one
    /// ACK or NACK, echoing the command id and sequence number.
    fn handle_cmd(&mut self, header: FrameHeader, payload: &[u8]) {
        self.cmds_dispatched += 1;
        debug!(target: self.name.as_str(), "cmd 0x{:02x} seq={} payload_len={}", header.cmd_id, header.seq, payload.len());

        if payload.len() > MAX_PAYLOAD {
            let now = self.clock.now_ms();
            self.tx.send_response(
                FrameType::Nack,
                header.cmd_id,
                header.seq,
                now,
                &[ErrorCode::InvalidLen as u8],
            );
            return;
        }

        let mut resp = Response::new();
        let ok = self.dispatch(header.cmd_id, payload, &mut resp);
        let now = self.clock.now_ms();
        if ok {
            self.tx.send_response(FrameType::Ack, header.cmd_id, header.seq, now, resp.as_slice());
        } else {
            if resp.is_empty() {
                resp.set_error(ErrorCode::InvalidCmd);
            }
            self.tx.send_response(FrameType::Nack, header.cmd_id, header.seq, now, resp.as_slice());
        }
    }

    /// Looks up, parses and executes one command. False means NACK; the
    /// handler may have written an error code into `resp`.
    pub fn dispatch(&mut self, cmd_id: u8, payload: &[u8], resp: &mut Response) -> bool {
        let Some((parser, handler)) = self.commands.lookup(cmd_id) else {
            trace!(target: self.name.as_str(), "unknown opcode 0x{:02x}", cmd_id);
            return false;
        };
        let Some(args) = parser(payload) else {
            return false;
        };
        handler(self, &args, resp)
    }

    fn run_sensors(&mut self) {
        let t = self.clock.now_ms();
        let Core { sensors, tx, name, .. } = self;
        for slot in sensors.iter_mut() {
            if slot.ready && slot.streaming {
                slot.step(tx, t, name.as_str());
            }
        }
    }

    fn sensor_mut(&mut self, runtime_id: u8) -> Option<&mut SensorSlot<'a>> {
        self.sensors.iter_mut().find(|s| s.runtime_id == runtime_id)
    }

    fn sensor(&self, runtime_id: u8) -> Option<&SensorSlot<'a>> {
        self.sensors.iter().find(|s| s.runtime_id == runtime_id)
    }

    /// Number of registered sensors.
    pub fn num_sensors(&self) -> usize {
        self.sensors.len()
    }

    /// Whether a sensor is currently streaming.
    pub fn streaming(&self, runtime_id: u8) -> Option<bool> {
        self.sensor(runtime_id).map(|s| s.streaming)
    }

    /// A sensor's current stream period.
    pub fn period_ms(&self, runtime_id: u8) -> Option<u16> {
        self.sensor(runtime_id).map(|s| s.period_ms)
    }

    /// The period a sensor was registered with.
    pub fn default_period_ms(&self, runtime_id: u8) -> Option<u16> {
        self.sensor(runtime_id).map(|s| s.default_period_ms)
    }

    pub fn get_crc_error_cnt(&self) -> u32 {
        self.crc_errors
    }

    pub fn get_resync_dropped_cnt(&self) -> u32 {
        self.resync_dropped
    }

    pub fn get_cmd_cnt(&self) -> u32 {
        self.cmds_dispatched
    }

    pub fn get_tx_drop_cnt(&self) -> u32 {
        self.tx.frames_dropped()
    }

    pub fn get_response_overwrite_cnt(&self) -> u32 {
        self.tx.response_overwrites()
    }
}

fn cmd_ping<T: Transport, C: Clock>(
    _core: &mut Core<'_, T, C>,
    _args: &CmdArgs,
    _resp: &mut Response,
) -> bool {
    true
}

fn cmd_get_sensors<T: Transport, C: Clock>(
    core: &mut Core<'_, T, C>,
    _args: &CmdArgs,
    resp: &mut Response,
) -> bool {
    for slot in core.sensors.iter() {
        if !resp.put(&[slot.runtime_id, slot.adapter.type_id()]) {
            resp.set_error(ErrorCode::Overflow);
            return false;
        }
    }
    true
}

fn cmd_start_stream<T: Transport, C: Clock>(
    core: &mut Core<'_, T, C>,
    args: &CmdArgs,
    resp: &mut Response,
) -> bool {
    let &CmdArgs::Sensor { id } = args else {
        resp.set_error(ErrorCode::Internal);
        return false;
    };
    let Some(slot) = core.sensor_mut(id) else {
        resp.set_error(ErrorCode::InvalidValue);
        return false;
    };
    slot.streaming = true;
    slot.state = StreamState::Idle;
    slot.seq = 0;
    true
}

fn cmd_stop_stream<T: Transport, C: Clock>(
    core: &mut Core<'_, T, C>,
    args: &CmdArgs,
    resp: &mut Response,
) -> bool {
    let &CmdArgs::Sensor { id } = args else {
        resp.set_error(ErrorCode::Internal);
        return false;
    };
    let Some(slot) = core.sensor_mut(id) else {
        resp.set_error(ErrorCode::InvalidValue);
        return false;
    };
    slot.streaming = false;
    slot.state = StreamState::Idle;
    true
}

fn cmd_set_period<T: Transport, C: Clock>(
    core: &mut Core<'_, T, C>,
    args: &CmdArgs,
    resp: &mut Response,
) -> bool {
    let &CmdArgs::Period { id, period_ms } = args else {
        resp.set_error(ErrorCode::Internal);
        return false;
    };
    let Some(slot) = core.sensor_mut(id) else {
        resp.set_error(ErrorCode::InvalidValue);
        return false;
    };
    if !(MIN_PERIOD_MS..=MAX_PERIOD_MS).contains(&period_ms) {
        resp.set_error(ErrorCode::InvalidValue);
        return false;
    }
    slot.period_ms = period_ms;
    true
}

fn cmd_get_period<T: Transport, C: Clock>(
    core: &mut Core<'_, T, C>,
    args: &CmdArgs,
    resp: &mut Response,
) -> bool {
    let &CmdArgs::Sensor { id } = args else {
        resp.set_error(ErrorCode::Internal);
        return false;
    };
    let Some(slot) = core.sensor(id) else {
        resp.set_error(ErrorCode::InvalidValue);
        return false;
    };
    if !resp.put(&(slot.period_ms as u32).to_le_bytes()) {
        resp.set_error(ErrorCode::Overflow);
        return false;
    }
    true
}

/// On-demand single read. Refused while the sensor streams; otherwise the
/// acquisition runs to completion here, within a bounded poll budget.
fn cmd_read_sensor<T: Transport, C: Clock>(
    core: &mut Core<'_, T, C>,
    args: &CmdArgs,
    resp: &mut Response,
) -> bool {
    let &CmdArgs::Sensor { id } = args else {
        resp.set_error(ErrorCode::Internal);
        return false;
    };
    let Some(slot) = core.sensor_mut(id) else {
        resp.set_error(ErrorCode::InvalidValue);
        return false;
    };
    if slot.streaming {
        resp.set_error(ErrorCode::SensorBusy);
        return false;
    }

    let mut status = slot.adapter.start();
    let mut budget = READ_POLL_BUDGET;
    while status == SensorStatus::Busy && budget > 0 {
        status = slot.adapter.poll();
        budget -= 1;
    }
    if status != SensorStatus::Ready {
        resp.set_error(ErrorCode::Internal);
        return false;
    }

    let mut payload = [0u8; MAX_PAYLOAD];
    payload[0] = slot.runtime_id;
    let cap = (slot.max_payload as usize - 1).min(MAX_SAMPLE_BYTES);
    let filled = slot.adapter.fill(&mut payload[1..1 + cap]);
    if filled == 0 {
        resp.set_error(ErrorCode::Internal);
        return false;
    }
    if !resp.put(&payload[..1 + filled]) {
        resp.set_error(ErrorCode::Overflow);
        return false;
    }
    true
}
