//! TX engine: stream queue with frame-aware drop-oldest, a single-entry
//! response priority slot, and a one-frame-per-call transport pump.
//!
//! Responses (ACK/NACK) and stream frames travel different paths. A
//! response is formatted straight into the slot and is never dropped once
//! formed; at most one is held, newest wins. Stream frames queue in the
//! ring and are expendable under backpressure: whole frames are removed
//! from the read end until the new frame fits.

use log::{debug, trace, warn};

use crate::buffer::ByteQueue;
use crate::frame::{head_frame_len, write_frame, FrameType, CRC_LEN, FRAME_MAX_BYTES, HDR_LEN};
use crate::interface::{Transport, TxWrite};

pub struct TxQueue<'a> {
    name: String,
    queue: &'a dyn ByteQueue,
    resp: [u8; FRAME_MAX_BYTES],
    resp_len: usize,
    resp_pending: bool,
    /// Upper bound on stream payload length; 0 disables the cap.
    max_payload: u16,
    frames_dropped: u32,
    resp_overwrites: u32,
}

impl<'a> TxQueue<'a> {
    pub fn new(queue: &'a dyn ByteQueue, max_payload: u16, name: String) -> Self {
        TxQueue {
            name,
            queue,
            resp: [0; FRAME_MAX_BYTES],
            resp_len: 0,
            resp_pending: false,
            max_payload,
            frames_dropped: 0,
            resp_overwrites: 0,
        }
    }

    pub fn max_payload(&self) -> u16 {
        self.max_payload
    }

    pub fn response_pending(&self) -> bool {
        self.resp_pending
    }

    /// Whole stream frames removed by the drop-oldest policy.
    pub fn frames_dropped(&self) -> u32 {
        self.frames_dropped
    }

    /// Responses that were replaced in the slot before being transmitted.
    pub fn response_overwrites(&self) -> u32 {
        self.resp_overwrites
    }

    /// Removes one whole frame from the read end of the stream queue.
    /// An unrecognizable head costs a single byte instead (resync).
    /// Returns false when the head is a recognizable but incomplete frame,
    /// which only `clear` can recover.
    fn drop_one_frame(&mut self) -> bool {
        let used = self.queue.used();
        if used < HDR_LEN + CRC_LEN {
            return false;
        }
        let mut head = [0u8; HDR_LEN];
        self.queue.copy_from_tail(&mut head);
        match head_frame_len(&head) {
            Some(frame_len) => {
                if used < frame_len {
                    return false;
                }
                self.queue.pop(frame_len);
                self.frames_dropped += 1;
                true
            }
            None => {
                self.queue.pop(1);
                true
            }
        }
    }

    /// Queues an already-formatted frame, evicting whole old frames until
    /// it fits. Returns false only for an empty or oversized frame.
    pub fn enqueue_frame(&mut self, frame: &[u8]) -> bool {
        let len = frame.len();
        if len == 0 || len > self.queue.capacity() - 1 {
            return false;
        }
        while self.queue.free() < len {
            if !self.drop_one_frame() {
                // Incomplete frame at the head; last resort.
                warn!(target: self.name.as_str(), "tx queue unrecoverable, clearing {} bytes", self.queue.used());
                self.queue.clear();
                break;
            }
        }
        self.queue.append(frame)
    }

    /// Formats an ACK/NACK into the response slot, replacing any response
    /// still waiting there. Responses are per-command; a newer one
    /// obsoletes an older one.
    pub fn send_response(
        &mut self,
        frame_type: FrameType,
        cmd_id: u8,
        req_seq: u32,
        ts_ms: u32,
        payload: &[u8],
    ) -> bool {
        let overwriting = self.resp_pending;
        let Some(len) = write_frame(&mut self.resp, frame_type, cmd_id, payload, req_seq, ts_ms)
        else {
            return false;
        };
        if overwriting {
            self.resp_overwrites += 1;
            debug!(target: self.name.as_str(), "response slot overwritten, cmd_id={}", cmd_id);
        }
        self.resp_len = len;
        self.resp_pending = true;
        true
    }

    /// Builds a STREAM frame and queues it best-effort. Payloads above the
    /// configured cap are dropped silently.
    pub fn send_stream(&mut self, payload: &[u8], ts_ms: u32, seq: u32) -> bool {
        if self.max_payload != 0 && payload.len() > self.max_payload as usize {
            return false;
        }
        let mut buf = [0u8; FRAME_MAX_BYTES];
        let Some(len) = write_frame(&mut buf, FrameType::Stream, 0, payload, seq, ts_ms) else {
            return false;
        };
        self.enqueue_frame(&buf[..len])
    }

    /// Writes at most one frame to the transport. The response slot drains
    /// strictly before the stream queue; a busy or short write leaves the
    /// frame in place for the next pump.
    pub fn pump<T: Transport>(&mut self, transport: &T) {
        if !transport.link_ready() {
            return;
        }
        let best_chunk = transport.best_chunk() as usize;

        if self.resp_pending && self.resp_len <= best_chunk {
            if let TxWrite::Sent(n) = transport.tx_write(&self.resp[..self.resp_len]) {
                if n == self.resp_len {
                    trace!(target: self.name.as_str(), "sent response, {} bytes", n);
                    self.resp_pending = false;
                }
            }
            return;
        }

        let used = self.queue.used();
        if used < HDR_LEN + CRC_LEN {
            return;
        }
        let mut head = [0u8; HDR_LEN];
        self.queue.copy_from_tail(&mut head);
        let Some(frame_len) = head_frame_len(&head) else {
            // Queue head is not a frame; shed one byte and retry later.
            self.queue.pop(1);
            return;
        };
        if used < frame_len || frame_len > best_chunk {
            return;
        }

        let linear = self.queue.peek_linear();
        let wrote = if linear.len() >= frame_len {
            transport.tx_write(&linear[..frame_len])
        } else {
            // Frame wraps the ring boundary; stage it.
            let mut staged = [0u8; FRAME_MAX_BYTES];
            let n = self.queue.copy_from_tail(&mut staged[..frame_len]);
            transport.tx_write(&staged[..n])
        };
        if let TxWrite::Sent(n) = wrote {
            if n == frame_len {
                trace!(target: self.name.as_str(), "sent stream frame, {} bytes", n);
                self.queue.pop(frame_len);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::parse_frame;
    use crate::ring::RingBuffer;
    use std::cell::{Cell, RefCell};

    struct MockLink {
        sent: RefCell<Vec<Vec<u8>>>,
        busy: Cell<bool>,
        chunk: Cell<u16>,
    }

    impl MockLink {
        fn new() -> Self {
            MockLink {
                sent: RefCell::new(Vec::new()),
                busy: Cell::new(false),
                chunk: Cell::new(FRAME_MAX_BYTES as u16),
            }
        }

        fn sent_count(&self) -> usize {
            self.sent.borrow().len()
        }
    }

    impl Transport for MockLink {
        fn tx_write(&self, data: &[u8]) -> TxWrite {
            if self.busy.get() {
                return TxWrite::Busy;
            }
            self.sent.borrow_mut().push(data.to_vec());
            TxWrite::Sent(data.len())
        }

        fn link_ready(&self) -> bool {
            true
        }

        fn best_chunk(&self) -> u16 {
            self.chunk.get()
        }
    }

    fn stream_frame(seq: u32, payload: &[u8]) -> Vec<u8> {
        let mut buf = [0u8; FRAME_MAX_BYTES];
        let len = write_frame(&mut buf, FrameType::Stream, 0, payload, seq, 0).unwrap();
        buf[..len].to_vec()
    }

    #[test]
    fn drop_oldest_evicts_whole_frames() {
        let ring = RingBuffer::new(128).unwrap();
        let mut tx = TxQueue::new(&ring, 0, String::from("tx"));
        // 26-byte frames; 4 fit in 127 usable bytes, a 5th needs eviction
        for seq in 0..5 {
            assert!(tx.enqueue_frame(&stream_frame(seq, &[0xee; 8])));
        }
        assert_eq!(tx.frames_dropped(), 1);
        // head of the queue is now seq=1, a whole frame
        let mut head = [0u8; FRAME_MAX_BYTES];
        let n = ring.copy_from_tail(&mut head);
        let parsed = parse_frame(&head[..n]).unwrap().unwrap();
        assert_eq!(parsed.header.seq, 1);
    }

    #[test]
    fn garbage_head_resyncs_per_byte() {
        let ring = RingBuffer::new(64).unwrap();
        let mut tx = TxQueue::new(&ring, 0, String::from("tx"));
        assert!(ring.append(&[0x11; 50]));
        assert!(tx.enqueue_frame(&stream_frame(0, &[1, 2])));
        // 20-byte frame needed 7 garbage bytes shed one at a time
        assert_eq!(ring.used(), 43 + 20);
        assert_eq!(tx.frames_dropped(), 0);
    }

    #[test]
    fn incomplete_head_forces_clear() {
        let ring = RingBuffer::new(64).unwrap();
        let mut tx = TxQueue::new(&ring, 0, String::from("tx"));
        // valid header declaring 38 bytes, but only 30 buffered
        let frame = stream_frame(0, &[7; 20]);
        assert!(ring.append(&frame[..30]));
        let next = stream_frame(1, &[8; 22]); // 40 bytes
        assert!(tx.enqueue_frame(&next));
        assert_eq!(ring.used(), 40);
        let mut head = [0u8; FRAME_MAX_BYTES];
        let n = ring.copy_from_tail(&mut head);
        let parsed = parse_frame(&head[..n]).unwrap().unwrap();
        assert_eq!(parsed.header.seq, 1);
    }

    #[test]
    fn oversize_and_empty_frames_refused() {
        let ring = RingBuffer::new(64).unwrap();
        let mut tx = TxQueue::new(&ring, 0, String::from("tx"));
        assert!(!tx.enqueue_frame(&[]));
        assert!(!tx.enqueue_frame(&[0u8; 64]));
    }

    #[test]
    fn response_slot_overwrites() {
        let ring = RingBuffer::new(128).unwrap();
        let mut tx = TxQueue::new(&ring, 0, String::from("tx"));
        let link = MockLink::new();

        assert!(tx.send_response(FrameType::Ack, 0x05, 1, 0, &[]));
        assert!(tx.send_response(FrameType::Nack, 0x06, 2, 0, &[3]));
        assert_eq!(tx.response_overwrites(), 1);

        tx.pump(&link);
        assert_eq!(link.sent_count(), 1);
        assert!(!tx.response_pending());
        let sent = link.sent.borrow();
        let parsed = parse_frame(&sent[0]).unwrap().unwrap();
        assert_eq!(parsed.header.frame_type, FrameType::Nack);
        assert_eq!(parsed.header.cmd_id, 0x06);
        assert_eq!(parsed.header.seq, 2);
    }

    #[test]
    fn response_drains_before_stream() {
        let ring = RingBuffer::new(128).unwrap();
        let mut tx = TxQueue::new(&ring, 0, String::from("tx"));
        let link = MockLink::new();

        assert!(tx.enqueue_frame(&stream_frame(0, &[1])));
        assert!(tx.enqueue_frame(&stream_frame(1, &[2])));
        assert!(tx.send_response(FrameType::Ack, 0x05, 9, 0, &[]));

        // one frame per pump, response first
        tx.pump(&link);
        tx.pump(&link);
        tx.pump(&link);
        tx.pump(&link);
        let sent = link.sent.borrow();
        assert_eq!(sent.len(), 3);
        let types: Vec<FrameType> = sent
            .iter()
            .map(|f| parse_frame(f).unwrap().unwrap().header.frame_type)
            .collect();
        assert_eq!(types, [FrameType::Ack, FrameType::Stream, FrameType::Stream]);
    }

    #[test]
    fn busy_link_retries_next_pump() {
        let ring = RingBuffer::new(128).unwrap();
        let mut tx = TxQueue::new(&ring, 0, String::from("tx"));
        let link = MockLink::new();
        link.busy.set(true);

        assert!(tx.send_response(FrameType::Ack, 0x05, 1, 0, &[]));
        tx.pump(&link);
        assert!(tx.response_pending());
        assert_eq!(link.sent_count(), 0);

        link.busy.set(false);
        tx.pump(&link);
        assert!(!tx.response_pending());
        assert_eq!(link.sent_count(), 1);
    }

    #[test]
    fn stream_payload_cap_drops_silently() {
        let ring = RingBuffer::new(128).unwrap();
        let mut tx = TxQueue::new(&ring, 8, String::from("tx"));
        assert!(!tx.send_stream(&[0; 9], 0, 0));
        assert_eq!(ring.used(), 0);
        assert!(tx.send_stream(&[0; 8], 0, 0));
        assert!(ring.used() > 0);
    }

    #[test]
    fn wrapped_frame_is_staged_and_sent() {
        let ring = RingBuffer::new(64).unwrap();
        let mut tx = TxQueue::new(&ring, 0, String::from("tx"));
        let link = MockLink::new();

        // push the write index near the physical end, then consume
        assert!(ring.append(&[0; 40]));
        ring.pop(40);
        let frame = stream_frame(7, &[5; 12]); // 30 bytes, wraps at 64
        assert!(tx.enqueue_frame(&frame));
        assert!(ring.peek_linear().len() < frame.len());

        tx.pump(&link);
        let sent = link.sent.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0], frame);
        assert_eq!(ring.used(), 0);
    }

    #[test]
    fn contiguous_frame_sent_without_staging() {
        let ring = RingBuffer::new(128).unwrap();
        let mut tx = TxQueue::new(&ring, 0, String::from("tx"));
        let link = MockLink::new();
        let frame = stream_frame(3, &[1, 2, 3]);
        assert!(tx.enqueue_frame(&frame));
        tx.pump(&link);
        assert_eq!(link.sent.borrow()[0], frame);
    }
}
