//! Loopback demo: a host-side driver talking to the streaming core over
//! an in-memory transport, with one synthetic power-monitor sensor.
//!
//! Run with `RUST_LOG=trace cargo run --example loopback` to watch the
//! core's internals.

use std::cell::{Cell, RefCell};

use log::LevelFilter;

use stream_core::{
    parse_frame, write_frame, Clock, Core, FrameType, RingBuffer, SensorAdapter, SensorStatus,
    Transport, TxWrite, CMD_GET_SENSORS, CMD_SET_PERIOD, CMD_START_STREAM, CMD_STOP_STREAM,
    DEFAULT_RX_RING_CAPACITY, DEFAULT_TX_RING_CAPACITY, FRAME_MAX_BYTES,
};

struct LoopbackLink {
    sent: RefCell<Vec<Vec<u8>>>,
}

impl Transport for LoopbackLink {
    fn tx_write(&self, data: &[u8]) -> TxWrite {
        self.sent.borrow_mut().push(data.to_vec());
        TxWrite::Sent(data.len())
    }

    fn link_ready(&self) -> bool {
        true
    }

    fn best_chunk(&self) -> u16 {
        FRAME_MAX_BYTES as u16
    }
}

struct SimClock {
    now: Cell<u32>,
}

impl Clock for SimClock {
    fn now_ms(&self) -> u32 {
        self.now.get()
    }
}

/// Synthetic current/voltage monitor: 6-byte samples, one acquisition
/// deferred to poll now and then.
struct PowerMonitor {
    reading: Cell<u16>,
    defer: Cell<bool>,
}

impl SensorAdapter for PowerMonitor {
    fn start(&self) -> SensorStatus {
        let defer = self.defer.get();
        self.defer.set(!defer);
        if defer {
            SensorStatus::Busy
        } else {
            SensorStatus::Ready
        }
    }

    fn poll(&self) -> SensorStatus {
        SensorStatus::Ready
    }

    fn fill(&self, dst: &mut [u8]) -> usize {
        let current = self.reading.get();
        self.reading.set(current.wrapping_add(7));
        let voltage = 3300u16 + (current % 50);
        dst[..2].copy_from_slice(&current.to_le_bytes());
        dst[2..4].copy_from_slice(&voltage.to_le_bytes());
        dst[4..6].copy_from_slice(&(current / 10).to_le_bytes());
        6
    }

    fn sample_size(&self) -> usize {
        6
    }

    fn type_id(&self) -> u8 {
        0x01
    }
}

fn send_cmd(core: &Core<'_, LoopbackLink, SimClock>, cmd_id: u8, payload: &[u8], seq: u32) {
    let mut buf = [0u8; FRAME_MAX_BYTES];
    let len = write_frame(&mut buf, FrameType::Cmd, cmd_id, payload, seq, 0).unwrap();
    core.on_rx(&buf[..len]);
}

fn print_device_output(link: &LoopbackLink) {
    for raw in link.sent.borrow_mut().drain(..) {
        let frame = parse_frame(&raw).unwrap().unwrap();
        match frame.header.frame_type {
            FrameType::Stream => {
                let current = u16::from_le_bytes([frame.payload[1], frame.payload[2]]);
                let voltage = u16::from_le_bytes([frame.payload[3], frame.payload[4]]);
                println!(
                    "STREAM sensor={} seq={} ts={}ms current={} voltage={}mV",
                    frame.payload[0], frame.header.seq, frame.header.ts_ms, current, voltage
                );
            }
            kind => {
                println!(
                    "{:?} cmd=0x{:02x} seq={} payload={:02x?}",
                    kind, frame.header.cmd_id, frame.header.seq, frame.payload
                );
            }
        }
    }
}

fn main() {
    log::set_max_level(LevelFilter::Trace);
    env_logger::init();

    let link = LoopbackLink {
        sent: RefCell::new(Vec::new()),
    };
    let clock = SimClock { now: Cell::new(0) };
    let rx = RingBuffer::new(DEFAULT_RX_RING_CAPACITY).unwrap();
    let tx = RingBuffer::new(DEFAULT_TX_RING_CAPACITY).unwrap();
    let sensor = PowerMonitor {
        reading: Cell::new(0),
        defer: Cell::new(false),
    };

    let mut core = Core::new(String::from("pscope"), &link, &clock, &rx, &tx);
    let id = core.register_sensor(&sensor, 100).unwrap();
    println!("registered power monitor as runtime id {}", id);

    // one command per tick; responses share the single priority slot
    send_cmd(&core, CMD_GET_SENSORS, &[], 1);
    core.tick();
    send_cmd(&core, CMD_SET_PERIOD, &[id, 0x32, 0x00], 2); // 50 ms
    core.tick();
    send_cmd(&core, CMD_START_STREAM, &[id], 3);

    // ~half a second of device time at a 1 ms tick
    for _ in 0..500 {
        clock.now.set(clock.now.get() + 1);
        core.tick();
    }
    print_device_output(&link);

    send_cmd(&core, CMD_STOP_STREAM, &[id], 4);
    core.tick();
    print_device_output(&link);

    println!(
        "tx drops: {}, crc errors: {}, rx highwater: {}",
        core.get_tx_drop_cnt(),
        core.get_crc_error_cnt(),
        rx.highwater()
    );
}
