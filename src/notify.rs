use crate::sensor::CallbackHandle;
use crate::sysfs::{Attribute, ControlInterface};
use crate::types::DmpEvent;
use crate::{MplError, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How long one wait may block before the stop flag is checked again.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Producer of DMP side-channel notifications.
pub trait DmpEventSource: Send {
    /// Wait up to `timeout` for the next notification. `BrokenPipe` means
    /// the source is gone for good.
    fn next_event(&mut self, timeout: Duration) -> io::Result<Option<DmpEvent>>;
}

/// Decode the small ASCII integer the kernel puts in an event attribute.
pub fn parse_event_payload(attribute: Attribute, text: &str, timestamp: i64) -> Result<Option<DmpEvent>> {
    let value: i64 = text.trim().parse().map_err(|_| {
        MplError::InvalidArgument(format!("{:?} payload '{}'", attribute, text.trim()))
    })?;
    match attribute {
        Attribute::EventDisplayOrientation => match u8::try_from(value) {
            Ok(code) if code <= 3 => Ok(Some(DmpEvent::DisplayOrientation(code))),
            _ => Err(MplError::InvalidArgument(format!(
                "display orientation code {}",
                value
            ))),
        },
        Attribute::EventSmd => Ok((value != 0).then_some(DmpEvent::SignificantMotion { timestamp })),
        other => Err(MplError::InvalidArgument(format!(
            "{:?} is not an event attribute",
            other
        ))),
    }
}

/// Timebase for events that do not come with a kernel timestamp.
pub trait EventClock: Send {
    fn now_ns(&self) -> i64;
}

/// Nanoseconds since boot, the timebase the driver stamps records with.
///
/// Anchored once on `/proc/uptime` and advanced with `Instant`, so the
/// offset to the kernel clock is bounded by the uptime resolution.
#[derive(Debug, Clone, Copy)]
pub struct BootClock {
    anchor: Instant,
    anchor_ns: i64,
}

impl BootClock {
    pub fn new() -> Self {
        let anchor_ns = match std::fs::read_to_string("/proc/uptime") {
            Ok(text) => parse_uptime_ns(&text).unwrap_or_else(|| {
                log::warn!("unexpected /proc/uptime contents '{}'", text.trim());
                0
            }),
            Err(e) => {
                log::warn!("/proc/uptime unreadable ({}), event times start at zero", e);
                0
            }
        };
        Self {
            anchor: Instant::now(),
            anchor_ns,
        }
    }
}

impl Default for BootClock {
    fn default() -> Self {
        Self::new()
    }
}

impl EventClock for BootClock {
    fn now_ns(&self) -> i64 {
        self.anchor_ns + self.anchor.elapsed().as_nanos() as i64
    }
}

fn parse_uptime_ns(text: &str) -> Option<i64> {
    let secs: f64 = text.split_whitespace().next()?.parse().ok()?;
    Some((secs * 1e9) as i64)
}

/// Polls the event attributes.
///
/// Display orientation is reported on every change. The significant-motion
/// attribute latches at non-zero, so it is reported once per arming: the
/// first non-zero read after `SmdEnable` goes to 1 fires, later reads wait
/// for the next arming.
pub struct AttributeEventSource {
    control: Box<dyn ControlInterface>,
    clock: Box<dyn EventClock>,
    last_orientation: Option<String>,
    smd_armed: Option<bool>,
    smd_fired: bool,
}

impl AttributeEventSource {
    pub fn new(control: impl ControlInterface + 'static) -> Self {
        Self::with_clock(control, BootClock::new())
    }

    pub fn with_clock(control: impl ControlInterface + 'static, clock: impl EventClock + 'static) -> Self {
        Self {
            control: Box::new(control),
            clock: Box::new(clock),
            last_orientation: None,
            smd_armed: None,
            smd_fired: false,
        }
    }

    fn poll_orientation(&mut self) -> Option<DmpEvent> {
        let attr = Attribute::EventDisplayOrientation;
        let text = match self.control.read_string(attr) {
            Ok(t) => t,
            Err(e) => {
                log::trace!("{:?} unreadable: {}", attr, e);
                return None;
            }
        };
        if self.last_orientation.as_deref() == Some(text.as_str()) {
            return None;
        }
        // the first read only establishes the baseline
        if self.last_orientation.replace(text.clone()).is_none() {
            return None;
        }
        match parse_event_payload(attr, &text, self.clock.now_ns()) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("dropping DMP event: {}", e);
                None
            }
        }
    }

    fn poll_significant_motion(&mut self) -> Option<DmpEvent> {
        let attr = Attribute::EventSmd;
        // without a readable enable attribute the detector counts as armed
        let armed = self.control.read_int(Attribute::SmdEnable).map_or(true, |v| v != 0);
        let text = match self.control.read_string(attr) {
            Ok(t) => t,
            Err(e) => {
                log::trace!("{:?} unreadable: {}", attr, e);
                return None;
            }
        };
        let event = match parse_event_payload(attr, &text, self.clock.now_ns()) {
            Ok(event) => event,
            Err(e) => {
                log::warn!("dropping DMP event: {}", e);
                return None;
            }
        };

        let was_armed = self.smd_armed.replace(armed);
        if !armed {
            self.smd_fired = false;
            return None;
        }
        match was_armed {
            // a trigger already latched at startup is the baseline
            None => {
                self.smd_fired = event.is_some();
                return None;
            }
            Some(false) => self.smd_fired = false,
            Some(true) => {}
        }
        if event.is_none() {
            self.smd_fired = false;
            return None;
        }
        if self.smd_fired {
            return None;
        }
        self.smd_fired = true;
        event
    }

    fn poll_once(&mut self) -> Option<DmpEvent> {
        self.poll_orientation()
            .or_else(|| self.poll_significant_motion())
    }
}

impl DmpEventSource for AttributeEventSource {
    fn next_event(&mut self, timeout: Duration) -> io::Result<Option<DmpEvent>> {
        if let Some(event) = self.poll_once() {
            return Ok(Some(event));
        }
        std::thread::sleep(timeout);
        Ok(self.poll_once())
    }
}

/// Events pushed by another part of the host through a channel.
pub struct ChannelEventSource {
    receiver: Receiver<DmpEvent>,
}

impl ChannelEventSource {
    pub fn new(receiver: Receiver<DmpEvent>) -> Self {
        Self { receiver }
    }
}

impl DmpEventSource for ChannelEventSource {
    fn next_event(&mut self, timeout: Duration) -> io::Result<Option<DmpEvent>> {
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "event channel closed"))
            }
        }
    }
}

/// Background thread forwarding DMP notifications into a core.
pub struct DmpEventReader {
    stop_flag: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl DmpEventReader {
    pub fn start(source: impl DmpEventSource + 'static, handle: CallbackHandle) -> Result<DmpEventReader> {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let delivered = Arc::new(AtomicU64::new(0));
        let stop_clone = stop_flag.clone();
        let delivered_clone = delivered.clone();

        let thread = std::thread::Builder::new()
            .name("mpl-dmp-events".into())
            .spawn(move || {
                event_loop(source, handle, stop_clone, delivered_clone);
            })?;

        Ok(DmpEventReader {
            stop_flag,
            delivered,
            thread: Some(thread),
        })
    }

    /// Notifications handed to the core so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn is_active(&self) -> bool {
        !self.stop_flag.load(Ordering::Relaxed)
            && self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the thread and wait for it.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for DmpEventReader {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn event_loop(
    mut source: impl DmpEventSource,
    handle: CallbackHandle,
    stop_flag: Arc<AtomicBool>,
    delivered: Arc<AtomicU64>,
) {
    log::info!("DMP event reader started");
    loop {
        if stop_flag.load(Ordering::Relaxed) {
            log::info!("DMP event reader stopping (stop flag set)");
            break;
        }
        let event = match source.next_event(POLL_INTERVAL) {
            Ok(Some(event)) => event,
            Ok(None) => continue,
            Err(e) if e.kind() == io::ErrorKind::BrokenPipe => {
                log::info!("DMP event source closed, stopping reader");
                break;
            }
            Err(e) => {
                log::warn!("DMP event read error: {}", e);
                continue;
            }
        };
        match handle.deliver(event) {
            Ok(()) => {
                delivered.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => log::warn!("DMP event {:?} not applied: {}", event, e),
        }
    }
}
