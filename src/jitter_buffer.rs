//! Latency-bounded packet reordering plus RFC 3550 receiver-report stats.
//!
//! `JitterBuffer` wraps a [`BufferStore`], classifying it as the single
//! owner of a stream's reordering window. It holds no interior mutability
//! and spawns nothing: every state transition is a plain `&mut self`
//! method, and timers are represented as data (`next_deadline`) rather than
//! scheduled tasks, so the host event loop stays in control of when things
//! actually run.

use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::buffer_store::{Buffer, BufferStore, Drained};
use crate::error::ConfigError;

/// Required configuration for a jitter buffer.
#[derive(Debug, Clone, Copy)]
pub struct JitterBufferConfig {
    /// RTP clock rate in Hz, used to convert wall-clock arrival time into
    /// RTP-timestamp ticks for the jitter estimate.
    pub clock_rate: u32,
    /// Dwell bound: packets are released once they've sat in the store for
    /// this long, even if a preceding gap never fills in.
    pub latency: Duration,
}

/// An output of the release pipeline.
#[derive(Debug, Clone)]
pub enum Event {
    Buffer(Buffer),
    Discontinuity,
    EndOfStream,
}

/// RFC 3550 A.3/A.8 receiver-report statistics, refreshed on demand.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Stats {
    pub fraction_lost: f64,
    pub total_lost: i32,
    pub highest_seq_num: u32,
    pub interarrival_jitter: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Waiting,
    Running,
    Drained,
}

/// RFC 3550 A.8 jitter accumulator plus the A.3 loss-interval bookkeeping.
#[derive(Debug, Default)]
struct LossStats {
    expected_prior: i64,
    received_prior: u64,
    last_transit: Option<i64>,
    jitter: f64,
}

pub struct JitterBuffer {
    config: JitterBufferConfig,
    store: BufferStore,
    state: State,
    /// Deadline for the one-shot `latency` timer armed at stream start.
    initial_timer: Option<Instant>,
    /// Deadline for the lazily re-armed eviction timer, `None` when no
    /// timer is currently outstanding.
    eviction_timer: Option<Instant>,
    loss: LossStats,
    dropped_packets: u64,
}

impl JitterBuffer {
    pub fn new(config: JitterBufferConfig, now: Instant) -> Result<Self, ConfigError> {
        if config.latency.is_zero() {
            return Err(ConfigError::MissingLatency);
        }
        Ok(JitterBuffer {
            config,
            store: BufferStore::new(),
            state: State::Waiting,
            initial_timer: Some(now + config.latency),
            eviction_timer: None,
            loss: LossStats::default(),
            dropped_packets: 0,
        })
    }

    /// Running count of packets dropped as late arrivals, exposed for
    /// diagnostics.
    pub fn dropped_packets(&self) -> u64 {
        self.dropped_packets
    }

    /// The next instant this buffer needs to be woken up at, if any. The
    /// host event loop is expected to sleep until this point and then call
    /// [`Self::poll_timer`].
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            State::Waiting => self.initial_timer,
            State::Running => self.eviction_timer,
            State::Drained => None,
        }
    }

    /// Admits an inbound RTP packet. `wire_seq`/`rtp_timestamp` come from
    /// the RTP header; `arrival_ts` is the transport's own arrival clock
    /// when it tracks one, otherwise `None` to fall back to `now`.
    pub fn insert(
        &mut self,
        wire_seq: u16,
        rtp_timestamp: u32,
        payload: bytes::Bytes,
        arrival_ts: Option<Instant>,
        now: Instant,
    ) -> Vec<Event> {
        if self.state == State::Drained {
            trace!(wire_seq, "insert after end-of-stream ignored");
            return Vec::new();
        }

        let arrival = arrival_ts.unwrap_or(now);
        self.update_loss_stats(rtp_timestamp, arrival);

        let buffer = Buffer {
            payload,
            rtp_timestamp,
            arrival_ts,
        };
        match self.store.insert(wire_seq, buffer, now) {
            Ok(index) => {
                trace!(wire_seq, index, "packet admitted");
            }
            Err(err) => {
                warn!(wire_seq, %err, "dropping late packet");
                self.dropped_packets += 1;
                return Vec::new();
            }
        }

        match self.state {
            State::Waiting => Vec::new(),
            State::Running => self.send_buffers(now),
            State::Drained => unreachable!("checked above"),
        }
    }

    /// Fires the armed timer, if any is due. Returns the release cycle's
    /// output for the initial timer's transition into `running`, or the
    /// eviction timer's own output otherwise. Firings after end-of-stream,
    /// or a firing for a timer that was never armed, are ignored rather
    /// than treated as an error.
    pub fn poll_timer(&mut self, now: Instant) -> Vec<Event> {
        match self.state {
            State::Waiting => {
                if self.initial_timer.is_some_and(|t| now >= t) {
                    debug!("initial latency elapsed, entering running state");
                    self.initial_timer = None;
                    self.state = State::Running;
                    self.send_buffers(now)
                } else {
                    Vec::new()
                }
            }
            State::Running => {
                if self.eviction_timer.is_some_and(|t| now >= t) {
                    self.eviction_timer = None;
                    self.send_buffers(now)
                } else {
                    Vec::new()
                }
            }
            State::Drained => Vec::new(),
        }
    }

    /// The release cycle: drain timed-out packets, then drain whatever is
    /// now contiguous, then re-arm the eviction timer if the store still
    /// holds anything and nothing is already armed.
    fn send_buffers(&mut self, now: Instant) -> Vec<Event> {
        let too_old = self.store.shift_older_than(self.config.latency, now);
        let ordered = self.store.shift_ordered();

        let mut out = Vec::with_capacity(too_old.len() + ordered.len());
        out.extend(too_old.into_iter().map(drained_to_event));
        out.extend(ordered.into_iter().map(|r| Event::Buffer(r.buffer)));

        if self.eviction_timer.is_none() {
            if let Some(oldest) = self.store.first_record_timestamp() {
                let elapsed = now.saturating_duration_since(oldest);
                let send_after = self.config.latency.saturating_sub(elapsed);
                self.eviction_timer = Some(now + send_after);
                trace!(?send_after, "re-armed eviction timer");
            }
        }

        out
    }

    /// Drains everything remaining (including gap markers) and transitions
    /// to the terminal state. No further input is accepted afterward.
    pub fn end_of_stream(&mut self) -> Vec<Event> {
        let remaining = self.store.dump();
        let mut out: Vec<Event> = remaining.into_iter().map(drained_to_event).collect();
        out.push(Event::EndOfStream);
        self.state = State::Drained;
        self.initial_timer = None;
        self.eviction_timer = None;
        out
    }

    fn update_loss_stats(&mut self, rtp_timestamp: u32, arrival_ts: Instant) {
        let arrival_ticks = arrival_ticks(arrival_ts, self.config.clock_rate);
        let transit = arrival_ticks.wrapping_sub(rtp_timestamp as i64);

        match self.loss.last_transit {
            None => {
                self.loss.last_transit = Some(transit);
            }
            Some(last) => {
                let d = (transit - last).abs();
                self.loss.jitter += (d as f64 - self.loss.jitter) / 16.0;
                self.loss.last_transit = Some(transit);
            }
        }
    }

    /// Recomputes and returns the RFC 3550 stats, rolling the A.3
    /// loss-interval counters forward.
    pub fn get_and_update_stats(&mut self) -> Stats {
        let base_first = self.store.base_seq_first().unwrap_or(0);
        let end_index = self.store.end_index().unwrap_or(base_first - 1);
        let received = self.store.received();

        let expected = end_index - base_first + 1;
        let lost = expected - received as i64;
        let total_lost = lost.clamp(-(1 << 23), (1 << 23) - 1) as i32;

        let expected_interval = expected - self.loss.expected_prior;
        let received_interval = received as i64 - self.loss.received_prior as i64;
        let lost_interval = expected_interval - received_interval;

        let fraction_lost = if expected_interval == 0 || lost_interval <= 0 {
            0.0
        } else {
            lost_interval as f64 / expected_interval as f64
        };

        self.loss.expected_prior = expected;
        self.loss.received_prior = received;

        Stats {
            fraction_lost,
            total_lost,
            highest_seq_num: end_index.max(0) as u32,
            interarrival_jitter: self.loss.jitter,
        }
    }
}

fn drained_to_event(d: Drained) -> Event {
    match d {
        Drained::Record(r) => Event::Buffer(r.buffer),
        Drained::Discontinuity => Event::Discontinuity,
    }
}

/// Local arrival time converted to integer RTP-clock ticks, widened to
/// `i64` so the subsequent `transit` subtraction can't overflow. Only
/// differences of this value are ever compared, so an arbitrary
/// thread-local epoch is as good as a real one.
fn arrival_ticks(arrival_ts: Instant, clock_rate: u32) -> i64 {
    thread_local! {
        static EPOCH: Instant = Instant::now();
    }
    EPOCH.with(|epoch| {
        let elapsed = arrival_ts.saturating_duration_since(*epoch);
        (elapsed.as_secs_f64() * clock_rate as f64).trunc() as i64
    })
}
