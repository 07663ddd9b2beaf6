//! # stream-core
//! The transport- and sensor-agnostic streaming core of a sensor-telemetry
//! device. It parses length-delimited CRC-protected frames out of a raw
//! byte stream, executes host commands against registered sensors, and
//! emits periodic stream frames, arbitrating the TX path so command
//! replies always go out before best-effort stream traffic.
//!
//! Hardware enters only through trait seams ([`Transport`], [`Clock`],
//! [`SensorAdapter`]); buffers are caller-owned SPSC rings bound in by
//! reference. That keeps the core testable on a host and reusable across
//! UART and USB-CDC targets alike.

//! ## Example
//! ```
//! use std::cell::{Cell, RefCell};
//! use stream_core::{
//!     parse_frame, write_frame, Clock, Core, FrameType, RingBuffer, SensorAdapter,
//!     SensorStatus, Transport, TxWrite, CMD_PING, DEFAULT_RX_RING_CAPACITY,
//!     DEFAULT_TX_RING_CAPACITY, FRAME_MAX_BYTES,
//! };
//!
//! struct Loopback {
//!     sent: RefCell<Vec<Vec<u8>>>,
//! }
//!
//! impl Transport for Loopback {
//!     fn tx_write(&self, data: &[u8]) -> TxWrite {
//!         self.sent.borrow_mut().push(data.to_vec());
//!         TxWrite::Sent(data.len())
//!     }
//!
//!     fn link_ready(&self) -> bool {
//!         true
//!     }
//!
//!     fn best_chunk(&self) -> u16 {
//!         FRAME_MAX_BYTES as u16
//!     }
//! }
//!
//! struct FixedClock(Cell<u32>);
//!
//! impl Clock for FixedClock {
//!     fn now_ms(&self) -> u32 {
//!         self.0.get()
//!     }
//! }
//!
//! struct PowerMonitor;
//!
//! impl SensorAdapter for PowerMonitor {
//!     fn start(&self) -> SensorStatus {
//!         SensorStatus::Ready
//!     }
//!
//!     fn poll(&self) -> SensorStatus {
//!         SensorStatus::Ready
//!     }
//!
//!     fn fill(&self, dst: &mut [u8]) -> usize {
//!         dst[..4].copy_from_slice(&[0x10, 0x27, 0x64, 0x00]);
//!         4
//!     }
//!
//!     fn sample_size(&self) -> usize {
//!         4
//!     }
//!
//!     fn type_id(&self) -> u8 {
//!         0x01
//!     }
//! }
//!
//! let transport = Loopback { sent: RefCell::new(Vec::new()) };
//! let clock = FixedClock(Cell::new(0));
//! let rx = RingBuffer::new(DEFAULT_RX_RING_CAPACITY).unwrap();
//! let tx = RingBuffer::new(DEFAULT_TX_RING_CAPACITY).unwrap();
//! let sensor = PowerMonitor;
//!
//! let mut core = Core::new(String::from("dev"), &transport, &clock, &rx, &tx);
//! core.register_sensor(&sensor, 100).unwrap();
//!
//! // The host pings the device.
//! let mut ping = [0u8; FRAME_MAX_BYTES];
//! let len = write_frame(&mut ping, FrameType::Cmd, CMD_PING, &[], 1, 0).unwrap();
//! core.on_rx(&ping[..len]);
//! core.tick();
//!
//! let sent = transport.sent.borrow();
//! let ack = parse_frame(&sent[0]).unwrap().unwrap();
//! assert_eq!(ack.header.frame_type, FrameType::Ack);
//! assert_eq!(ack.header.cmd_id, CMD_PING);
//! assert_eq!(ack.header.seq, 1);
//! ```

mod buffer;
mod context;
mod crc;
mod dispatch;
mod frame;
mod interface;
mod ring;
mod sanity;
mod tx;

pub use buffer::ByteQueue;
pub use context::{Core, Error, MAX_PERIOD_MS, MAX_SAMPLE_BYTES, MAX_SENSORS, MIN_PERIOD_MS};
pub use crc::{crc16, Crc16, CRC_SEED};
pub use dispatch::{
    parse_noarg, parse_raw, parse_sensor_id, parse_set_period, CmdArgs, CmdHandler, CmdParser,
    CommandTable, ErrorCode, Response, CMD_GET_PERIOD, CMD_GET_SENSORS, CMD_PING, CMD_READ_SENSOR,
    CMD_SET_PERIOD, CMD_START_STREAM, CMD_STOP_STREAM,
};
pub use frame::{
    head_frame_len, parse_frame, write_frame, FrameError, FrameHeader, FrameType, ParsedFrame,
    CRC_LEN, FRAME_MAX_BYTES, HDR_LEN, MAGIC, MAX_PAYLOAD, PROTOCOL_VERSION,
};
pub use interface::{Clock, SensorAdapter, SensorStatus, Transport, TxWrite};
pub use ring::{RingBuffer, DEFAULT_RX_RING_CAPACITY, DEFAULT_TX_RING_CAPACITY, MAX_RING_CAPACITY};
pub use tx::TxQueue;
