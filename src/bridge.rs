//! Stream bridge between two executors.
//!
//! A [`Bridge`] is the only state shared by the USB domain and the synthesis
//! domain. It is a bounded single-producer/single-consumer queue of
//! [`StreamWord`]s: the [`BridgeWriter`] is owned by the producing domain, the
//! [`BridgeReader`] by the consuming one.
//!
//! The writer never waits. A packet that does not fit in the free space is
//! dropped as a whole and counted as an [`Overrun`]; a partial packet is never
//! enqueued, so the 4-byte USB-MIDI framing survives an overrun.

use core::convert::Infallible;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use heapless::spsc::{Consumer, Producer, Queue};
use portable_atomic::{AtomicU32, Ordering};

/// Holds three full high-speed packets.
pub const DEFAULT_DEPTH: usize = 2048;

/// One byte of the stream, with the boundaries of the packet it arrived in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StreamWord {
    pub data: u8,
    pub first: bool,
    pub last: bool,
}

/// A packet was dropped because the bridge was too full to take it whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Overrun {
    pub dropped: usize,
}

/// Holds `N - 1` words.
pub struct Bridge<const N: usize> {
    queue: Queue<StreamWord, N>,
    readable: Signal<CriticalSectionRawMutex, ()>,
    overruns: AtomicU32,
}

impl<const N: usize> Default for Bridge<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Bridge<N> {
    pub const fn new() -> Self {
        Self {
            queue: Queue::new(),
            readable: Signal::new(),
            overruns: AtomicU32::new(0),
        }
    }

    pub fn split(&mut self) -> (BridgeWriter<'_, N>, BridgeReader<'_, N>) {
        let (producer, consumer) = self.queue.split();
        let readable = &self.readable;
        let overruns = &self.overruns;
        (
            BridgeWriter {
                producer,
                readable,
                overruns,
            },
            BridgeReader {
                consumer,
                readable,
                overruns,
            },
        )
    }
}

/// Producing end.
pub struct BridgeWriter<'a, const N: usize> {
    producer: Producer<'a, StreamWord, N>,
    readable: &'a Signal<CriticalSectionRawMutex, ()>,
    overruns: &'a AtomicU32,
}

impl<'a, const N: usize> BridgeWriter<'a, N> {
    /// Words that can be pushed right now.
    pub fn free(&self) -> usize {
        self.producer.capacity() - self.producer.len()
    }

    /// Enqueues one packet, all or nothing. Empty packets are ignored.
    pub fn push_packet(&mut self, bytes: &[u8]) -> Result<(), Overrun> {
        if bytes.is_empty() {
            return Ok(());
        }
        // Only this end adds words, so the free space can only grow between
        // the check and the enqueues.
        if self.free() < bytes.len() {
            self.overruns.fetch_add(1, Ordering::Relaxed);
            return Err(Overrun {
                dropped: bytes.len(),
            });
        }
        let last = bytes.len() - 1;
        for (i, &data) in bytes.iter().enumerate() {
            let word = StreamWord {
                data,
                first: i == 0,
                last: i == last,
            };
            if self.producer.enqueue(word).is_err() {
                break;
            }
        }
        self.readable.signal(());
        Ok(())
    }

    pub fn overruns(&self) -> u32 {
        self.overruns.load(Ordering::Relaxed)
    }
}

/// Consuming end.
pub struct BridgeReader<'a, const N: usize> {
    consumer: Consumer<'a, StreamWord, N>,
    readable: &'a Signal<CriticalSectionRawMutex, ()>,
    overruns: &'a AtomicU32,
}

impl<'a, const N: usize> BridgeReader<'a, N> {
    pub fn try_read_word(&mut self) -> Option<StreamWord> {
        self.consumer.dequeue()
    }

    pub async fn read_word(&mut self) -> StreamWord {
        loop {
            if let Some(word) = self.consumer.dequeue() {
                return word;
            }
            // A stale signal only costs one extra empty poll.
            self.readable.wait().await;
        }
    }

    /// Waits for at least one word, then drains up to `buf.len()` bytes
    /// without waiting further. Returns the number of bytes and whether the
    /// last of them closed a packet.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> (usize, bool) {
        if buf.is_empty() {
            return (0, false);
        }
        let word = self.read_word().await;
        buf[0] = word.data;
        let mut n = 1;
        let mut closed = word.last;
        while n < buf.len() {
            match self.consumer.dequeue() {
                Some(word) => {
                    buf[n] = word.data;
                    closed = word.last;
                    n += 1;
                }
                None => break,
            }
        }
        (n, closed)
    }

    pub fn is_empty(&self) -> bool {
        !self.consumer.ready()
    }

    pub fn len(&self) -> usize {
        self.consumer.len()
    }

    pub fn overruns(&self) -> u32 {
        self.overruns.load(Ordering::Relaxed)
    }
}

impl<'a, const N: usize> embedded_io::ErrorType for BridgeReader<'a, N> {
    type Error = Infallible;
}

impl<'a, const N: usize> embedded_io_async::Read for BridgeReader<'a, N> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        Ok(self.read_chunk(buf).await.0)
    }
}
