/// Byte-container seam shared by the TX and RX paths.
///
/// All methods take `&self`: the canonical implementation is the SPSC
/// [`RingBuffer`](crate::RingBuffer), whose producer side (`append`) and
/// consumer side (everything else) may live on different execution
/// contexts. The single-producer single-consumer discipline is the
/// caller's contract, not the trait's.
pub trait ByteQueue {
    /// Total backing capacity. One slot is reserved, so at most
    /// `capacity() - 1` bytes are ever buffered.
    fn capacity(&self) -> usize;

    /// Bytes currently buffered.
    fn used(&self) -> usize;

    /// Bytes that can still be appended.
    fn free(&self) -> usize;

    /// Discards all buffered bytes. Consumer-side.
    fn clear(&self);

    /// All-or-nothing append. Returns false (buffering nothing) when
    /// `src` does not fit.
    fn append(&self, src: &[u8]) -> bool;

    /// Advances the read end past `n` buffered bytes. `n` beyond `used()`
    /// is clipped.
    fn pop(&self, n: usize);

    /// Non-destructive copy from the read end into `dst`, handling
    /// wraparound. Returns the number of bytes copied
    /// (`min(dst.len(), used())`).
    fn copy_from_tail(&self, dst: &mut [u8]) -> usize;

    /// The longest contiguous run of buffered bytes starting at the read
    /// end. Consumer-side; does not advance.
    fn peek_linear(&self) -> &[u8];
}
