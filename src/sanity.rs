//! Compile-time constraints tying the size constants together. A frame
//! must always fit the rings and a single transport write.

use crate::context::{MAX_PERIOD_MS, MAX_SAMPLE_BYTES, MIN_PERIOD_MS};
use crate::frame::{CRC_LEN, FRAME_MAX_BYTES, HDR_LEN, MAX_PAYLOAD};
use crate::ring::{DEFAULT_RX_RING_CAPACITY, DEFAULT_TX_RING_CAPACITY, MAX_RING_CAPACITY};

const _: () = assert!(HDR_LEN == 16);
const _: () = assert!(HDR_LEN + MAX_PAYLOAD + CRC_LEN == FRAME_MAX_BYTES);
const _: () = assert!(1 + MAX_SAMPLE_BYTES <= MAX_PAYLOAD);
const _: () = assert!(FRAME_MAX_BYTES <= DEFAULT_TX_RING_CAPACITY - 1);
const _: () = assert!(FRAME_MAX_BYTES <= DEFAULT_RX_RING_CAPACITY - 1);
const _: () = assert!(DEFAULT_TX_RING_CAPACITY.is_power_of_two());
const _: () = assert!(DEFAULT_RX_RING_CAPACITY.is_power_of_two());
const _: () = assert!(DEFAULT_TX_RING_CAPACITY <= MAX_RING_CAPACITY);
const _: () = assert!(DEFAULT_RX_RING_CAPACITY <= MAX_RING_CAPACITY);
const _: () = assert!(MIN_PERIOD_MS > 0);
const _: () = assert!(MIN_PERIOD_MS <= MAX_PERIOD_MS);
