#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    use stream_core::{ByteQueue, RingBuffer};

    /// Interrupt-context producer against a tick-context consumer: every
    /// byte of a known pattern must arrive exactly once, in order, with
    /// the fill level never exceeding the usable capacity.
    #[test]
    fn spsc_interleaving_preserves_byte_stream() {
        const TOTAL: usize = 100_000;

        let ring = RingBuffer::new(256).unwrap();
        let done = AtomicBool::new(false);

        thread::scope(|scope| {
            scope.spawn(|| {
                let mut sent = 0usize;
                while sent < TOTAL {
                    let chunk = (1 + sent % 13).min(TOTAL - sent);
                    let data: Vec<u8> = (sent..sent + chunk).map(|i| i as u8).collect();
                    if ring.append(&data) {
                        sent += chunk;
                    } else {
                        std::hint::spin_loop();
                    }
                }
                done.store(true, Ordering::Release);
            });

            let mut received = 0usize;
            let mut buf = [0u8; 64];
            while received < TOTAL {
                let used = ring.used();
                assert!(used <= ring.capacity() - 1);
                if used == 0 {
                    if done.load(Ordering::Acquire) && ring.used() == 0 {
                        break;
                    }
                    std::hint::spin_loop();
                    continue;
                }
                let n = ring.copy_from_tail(&mut buf);
                for (offset, &byte) in buf[..n].iter().enumerate() {
                    assert_eq!(
                        byte,
                        (received + offset) as u8,
                        "byte stream torn at offset {}",
                        received + offset
                    );
                }
                ring.pop(n);
                received += n;
            }
            assert_eq!(received, TOTAL);
        });

        assert_eq!(ring.used(), 0);
        assert!(ring.highwater() <= ring.capacity() - 1);
    }

    /// The producer's refusals are visible to the consumer side as the
    /// rejected-bytes metric, with nothing partially written.
    #[test]
    fn rejected_writes_leave_no_partial_data() {
        let ring = RingBuffer::new(64).unwrap();
        assert!(ring.append(&[0xab; 60]));
        assert!(!ring.append(&[0xcd; 10]));
        assert_eq!(ring.rejected(), 10);

        let mut buf = [0u8; 64];
        let n = ring.copy_from_tail(&mut buf);
        assert_eq!(n, 60);
        assert!(buf[..60].iter().all(|&b| b == 0xab));
    }
}
