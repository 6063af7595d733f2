//! Outbound pacing.
//!
//! The device's inbound path has very little buffering: a frame written in one
//! burst overruns it. Every outbound frame is therefore cut into pieces of at
//! most `max_fragment_len` bytes and consecutive pieces are spaced by the
//! configured delay. The spacing is enforced with a single-token leaky bucket,
//! so an idle link sends its first piece immediately.

use std::{fmt, num::NonZeroUsize, time::Duration};

use bytes::Bytes;
use leaky_bucket::RateLimiter;

use crate::link::TransportLink;

/// Splits frames into pieces and spaces them out in time.
pub struct Pacer {
    max_fragment_len: NonZeroUsize,
    limiter: Option<RateLimiter>,
}

impl fmt::Debug for Pacer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pacer")
            .field("max_fragment_len", &self.max_fragment_len)
            .field("paced", &self.limiter.is_some())
            .finish()
    }
}

impl Pacer {
    /// Create a pacer. A zero `delay` disables spacing.
    #[must_use]
    pub fn new(max_fragment_len: NonZeroUsize, delay: Duration) -> Self {
        let limiter = (!delay.is_zero()).then(|| {
            RateLimiter::builder()
                .initial(1)
                .refill(1)
                .interval(delay)
                .max(1)
                .build()
        });
        Self {
            max_fragment_len,
            limiter,
        }
    }

    /// Number of pieces `len` bytes are split into.
    #[must_use]
    pub fn piece_count(&self, len: usize) -> usize { len.div_ceil(self.max_fragment_len.get()) }

    /// Send `frame` over `link` piece by piece.
    ///
    /// # Errors
    ///
    /// Returns the first I/O error reported by the link. Pieces already sent
    /// stay sent.
    pub async fn send<L>(&self, link: &mut L, mut frame: Bytes) -> std::io::Result<()>
    where
        L: TransportLink + ?Sized,
    {
        let pieces = self.piece_count(frame.len());
        let mut index = 0_usize;
        while !frame.is_empty() {
            if let Some(limiter) = &self.limiter {
                limiter.acquire(1).await;
            }
            let piece = frame.split_to(frame.len().min(self.max_fragment_len.get()));
            index += 1;
            tracing::trace!(piece = index, pieces, len = piece.len(), "sending piece");
            link.send(piece).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        num::NonZeroUsize,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use async_trait::async_trait;
    use bytes::Bytes;
    use rstest::rstest;
    use tokio::time::Instant;

    use super::Pacer;
    use crate::link::TransportLink;

    #[derive(Clone, Default)]
    struct Recorder {
        pieces: Arc<Mutex<Vec<(Instant, Bytes)>>>,
    }

    #[async_trait]
    impl TransportLink for Recorder {
        async fn send(&mut self, piece: Bytes) -> io::Result<()> {
            self.pieces
                .lock()
                .expect("recorder lock")
                .push((Instant::now(), piece));
            Ok(())
        }
    }

    fn pacer(len: usize, delay: Duration) -> Pacer {
        Pacer::new(NonZeroUsize::new(len).expect("non-zero"), delay)
    }

    #[rstest]
    #[case(0, 0)]
    #[case(1, 1)]
    #[case(20, 1)]
    #[case(21, 2)]
    #[case(60, 3)]
    fn counts_pieces(#[case] len: usize, #[case] expected: usize) {
        assert_eq!(pacer(20, Duration::ZERO).piece_count(len), expected);
    }

    #[tokio::test(start_paused = true)]
    async fn pieces_are_bounded_and_spaced() {
        let recorder = Recorder::default();
        let mut link = recorder.clone();
        let pacer = pacer(4, Duration::from_millis(100));
        let start = Instant::now();

        pacer
            .send(&mut link, Bytes::from_static(b"0123456789"))
            .await
            .expect("send");

        let pieces = recorder.pieces.lock().expect("recorder lock").clone();
        let payloads: Vec<&[u8]> = pieces.iter().map(|(_, p)| &p[..]).collect();
        assert_eq!(payloads, [&b"0123"[..], &b"4567"[..], &b"89"[..]]);
        assert_eq!(pieces[0].0, start, "first piece goes out immediately");
        for pair in pieces.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= Duration::from_millis(100));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_sends_back_to_back() {
        let recorder = Recorder::default();
        let mut link = recorder.clone();
        let start = Instant::now();
        pacer(2, Duration::ZERO)
            .send(&mut link, Bytes::from_static(b"abcdef"))
            .await
            .expect("send");
        let pieces = recorder.pieces.lock().expect("recorder lock").clone();
        assert_eq!(pieces.len(), 3);
        assert!(pieces.iter().all(|(at, _)| *at == start));
    }
}
