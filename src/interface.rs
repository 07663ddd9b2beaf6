//! Hardware-facing trait seams. The core never touches a peripheral
//! directly: transports, the timebase and sensors are wired in by the
//! target behind these traits. Implementations use interior mutability
//! where they carry state, since every method takes `&self`.

/// Outcome of a single transport write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxWrite {
    /// Bytes accepted by the link. Only a full-length `Sent` counts as
    /// delivered; a short write is retried like `Busy`.
    Sent(usize),
    /// Link not ready for this write; retry on a later pump.
    Busy,
    /// Transport-level failure; the frame stays queued.
    Error,
}

/// Byte-pipe transport (UART, USB-CDC, loopback test double).
///
/// The RX direction is wired by the embedding: the transport's receive
/// callback appends raw bytes to the core's RX ring (interrupt context
/// permitted), typically through [`Core::on_rx`](crate::Core::on_rx) or by
/// holding a reference to the ring itself.
pub trait Transport {
    /// Attempts exactly one write. All-or-nothing from the caller's
    /// perspective; any staging buffer is the transport's business.
    fn tx_write(&self, data: &[u8]) -> TxWrite;

    /// True when the link can transmit right now (e.g. USB configured and
    /// DTR asserted).
    fn link_ready(&self) -> bool;

    /// Maximum safe single-write length. Must be at least
    /// [`FRAME_MAX_BYTES`](crate::FRAME_MAX_BYTES) so a full frame always
    /// fits in one write.
    fn best_chunk(&self) -> u16;
}

/// Monotonic millisecond timebase. May wrap; all interval arithmetic in
/// the core is wrapping subtraction.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

/// Result of a sensor `start` or `poll` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorStatus {
    /// A sample is ready to be read out via `fill`.
    Ready,
    /// Acquisition in progress; poll again on a later tick.
    Busy,
    /// Acquisition failed. Terminal for the current sample.
    Error,
}

/// Cooperative sensor adapter.
///
/// `start` kicks off one acquisition and may complete synchronously
/// (`Ready`) or defer (`Busy`), in which case the core calls `poll` on
/// subsequent ticks until `Ready` or `Error`. Short internal blocking
/// (an I2C transaction, say) is tolerated but shapes the real stream
/// period.
pub trait SensorAdapter {
    fn start(&self) -> SensorStatus;

    fn poll(&self) -> SensorStatus;

    /// Copies the acquired sample into `dst`, returning the number of
    /// bytes written; 0 means no sample is available.
    fn fill(&self, dst: &mut [u8]) -> usize;

    /// Size of one sample in bytes.
    fn sample_size(&self) -> usize;

    /// Identifier of the sensor kind, used by the host to decode stream
    /// payloads.
    fn type_id(&self) -> u8;
}
