//! The sensor core: client API, callback path and the two-lock guard
//! between them.

use crate::builders::{self, BuildContext, Orientations, BUILDERS};
use crate::calibration::{CalibrationStorage, CalibrationStore, NoStorage};
use crate::compass::{CompassSensor, NoCompass};
use crate::config::MplConfig;
use crate::demux::{RawSample, RecordReader};
use crate::descriptor::{self, DescriptorContext, SensorDescriptor};
use crate::dmp::{DmpState, DmpStateMachine};
use crate::mask::{check_supported, compute_local_mask, requirements_for, Capabilities, LocalMask};
use crate::protocol::RecordKind;
use crate::sysfs::{read_attr, write_attr, Attribute, ControlInterface, SysfsAttributes, SysfsControl};
use crate::types::{
    DmpEvent, HardwareMask, OrientationMatrix, PhysicalSensor, RawFd, SensorEvent, SensorMask,
    SensorType, NUM_SENSORS,
};
use crate::{MplError, Result};
use crossbeam_channel::{Receiver, Sender};
use std::collections::VecDeque;
use std::io::{self, Read};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// `batch` flag: validate only.
pub const BATCH_DRY_RUN: i32 = 0x1;
/// `batch` flag: wake the host when the hardware FIFO fills.
pub const BATCH_WAKE_UPON_FIFO_FULL: i32 = 0x2;

/// Delay of a type nobody configured yet, 200 ms.
pub const DEFAULT_DELAY_NS: i64 = 200_000_000;

/// Kernel ring buffer length in records.
const KERNEL_BUFFER_LENGTH: i64 = 480;

/// Binary motion stream.
pub trait DataSource: Send {
    /// Read whatever is available. `WouldBlock` and `Interrupted` are
    /// treated as an empty read.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    fn fd(&self) -> Option<RawFd> {
        None
    }

    /// True once the stream can never deliver more bytes, e.g. a capture
    /// file read to the end. Device streams never end.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// Adapts any reader, e.g. the opened character device or a capture file.
pub struct ReaderSource<R> {
    inner: R,
    fd: Option<RawFd>,
    eof: bool,
}

impl<R: Read + Send> ReaderSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, fd: None, eof: false }
    }

    pub fn with_fd(inner: R, fd: RawFd) -> Self {
        Self { inner, fd: Some(fd), eof: false }
    }
}

impl<R: Read + Send> DataSource for ReaderSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        if n == 0 && !buf.is_empty() && self.fd.is_none() {
            self.eof = true;
        }
        Ok(n)
    }

    fn fd(&self) -> Option<RawFd> {
        self.fd
    }

    fn is_exhausted(&self) -> bool {
        self.eof
    }
}

/// In-memory stream; clones share the queue. Empty reads report
/// `WouldBlock` like a non-blocking device.
#[derive(Debug, Default, Clone)]
pub struct MemorySource {
    queue: Arc<Mutex<VecDeque<u8>>>,
    chunk: Option<usize>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out at most `chunk` bytes per read.
    pub fn with_chunk(chunk: usize) -> Self {
        Self {
            chunk: Some(chunk.max(1)),
            ..Self::default()
        }
    }

    pub fn push(&self, bytes: &[u8]) {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend(bytes.iter().copied());
    }

    pub fn len(&self) -> usize {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DataSource for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut q = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        if q.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(q.len()).min(self.chunk.unwrap_or(usize::MAX));
        for (dst, src) in buf.iter_mut().zip(q.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }
}

/// Collaborators a core runs against.
pub struct Backends {
    pub control: Box<dyn ControlInterface>,
    pub data: Box<dyn DataSource>,
    pub compass: Box<dyn CompassSensor>,
    pub storage: Box<dyn CalibrationStorage>,
}

impl Backends {
    /// No compass and no calibration persistence.
    pub fn new(control: impl ControlInterface + 'static, data: impl DataSource + 'static) -> Self {
        Self {
            control: Box::new(control),
            data: Box::new(data),
            compass: Box::new(NoCompass),
            storage: Box::new(NoStorage),
        }
    }

    pub fn with_compass(mut self, compass: impl CompassSensor + 'static) -> Self {
        self.compass = Box::new(compass);
        self
    }

    pub fn with_storage(mut self, storage: impl CalibrationStorage + 'static) -> Self {
        self.storage = Box::new(storage);
        self
    }
}

/// Masks, DMP model, calibration, caches and the control backend.
struct CoreState {
    config: MplConfig,
    control: Box<dyn ControlInterface>,
    compass: Box<dyn CompassSensor>,
    storage: Box<dyn CalibrationStorage>,
    caps: Capabilities,
    master: SensorMask,
    batched: SensorMask,
    /// Engines the device is known to have on.
    hardware: HardwareMask,
    /// Last value written to `BufferEnable`.
    buffer_on: bool,
    dmp: DmpStateMachine,
    delays: [i64; NUM_SENSORS],
    ctx: BuildContext,
    display_orientation: Option<u8>,
}

impl CoreState {
    fn local_mask(&self) -> LocalMask {
        LocalMask::new(self.hardware, self.dmp.armed())
    }

    /// Recompute the local mask from the master mask and drive the device
    /// there. Engines come up before DMP features are armed and go down
    /// after they are disarmed. The kernel buffer is off while engines
    /// change and back on afterwards for whatever engines ended up running,
    /// even when a write failed half way.
    fn apply_masks(&mut self) -> Result<()> {
        let target = compute_local_mask(self.master, self.batched, &self.caps);
        let current = self.local_mask();
        if target != current {
            log::debug!(
                "local mask {:?}/{:?} -> {:?}/{:?}",
                current.hardware,
                current.features,
                target.hardware,
                target.features
            );
            self.set_buffer(false)?;
            let driven = self.drive(target);
            let reached = self.local_mask();
            self.ctx.invalidate(reached.hardware, reached.features);
            let restored = self.set_buffer(!reached.hardware.is_empty());
            driven?;
            restored?;
        } else {
            // settle leftovers of an earlier failed write
            if self.caps.dmp {
                self.dmp.apply(self.control.as_mut(), target.features)?;
            }
            self.set_buffer(!target.hardware.is_empty())?;
        }
        self.update_delay()
    }

    fn drive(&mut self, target: LocalMask) -> Result<()> {
        self.set_engines(self.hardware | target.hardware)?;
        if self.caps.dmp {
            self.dmp.apply(self.control.as_mut(), target.features)?;
        }
        self.set_engines(target.hardware)
    }

    fn set_buffer(&mut self, on: bool) -> Result<()> {
        if on != self.buffer_on {
            write_attr(self.control.as_mut(), Attribute::BufferEnable, on as i64)?;
            self.buffer_on = on;
        }
        Ok(())
    }

    fn set_engines(&mut self, want: HardwareMask) -> Result<()> {
        for (engine, enable, fifo) in [
            (HardwareMask::GYRO, Attribute::GyroEnable, Attribute::GyroFifoEnable),
            (HardwareMask::ACCEL, Attribute::AccelEnable, Attribute::AccelFifoEnable),
        ] {
            let on = want.contains(engine);
            if on != self.hardware.contains(engine) {
                write_attr(self.control.as_mut(), enable, on as i64)?;
                write_attr(self.control.as_mut(), fifo, on as i64)?;
                self.hardware.set(engine, on);
            }
        }
        let on = want.contains(HardwareMask::COMPASS);
        if on != self.hardware.contains(HardwareMask::COMPASS) {
            self.compass
                .enable(on)
                .map_err(|e| MplError::NoDevice(format!("compass: {}", e)))?;
            self.hardware.set(HardwareMask::COMPASS, on);
        }
        Ok(())
    }

    /// Shortest delay among enabled types matching `pred`.
    fn min_delay(&self, pred: impl Fn(&LocalMask) -> bool) -> Option<i64> {
        self.master
            .types()
            .filter(|t| !t.is_one_shot() && pred(&requirements_for(*t, &self.caps)))
            .map(|t| self.delays[t.index()])
            .min()
    }

    /// Program sampling rates from the per-type delays.
    fn update_delay(&mut self) -> Result<()> {
        let hz = |ns: i64| (1_000_000_000 / ns.max(1)).max(1);
        let gyro = self.min_delay(|r| r.hardware.contains(HardwareMask::GYRO));
        let accel = self.min_delay(|r| r.hardware.contains(HardwareMask::ACCEL));
        let compass = self.min_delay(|r| r.hardware.contains(HardwareMask::COMPASS));
        let dmp = self.min_delay(|r| !r.features.is_empty());

        if let (true, Some(ns)) = (self.hardware.contains(HardwareMask::GYRO), gyro) {
            write_attr(self.control.as_mut(), Attribute::GyroFifoRate, hz(ns))?;
        }
        if let (true, Some(ns)) = (self.hardware.contains(HardwareMask::ACCEL), accel) {
            write_attr(self.control.as_mut(), Attribute::AccelFifoRate, hz(ns))?;
        }
        if let (true, Some(ns)) = (!self.dmp.armed().is_empty(), dmp) {
            write_attr(self.control.as_mut(), Attribute::DmpOutputRate, hz(ns))?;
        }
        if let (true, Some(ns)) = (self.hardware.contains(HardwareMask::COMPASS), compass) {
            self.compass.set_delay(ns)?;
        }
        Ok(())
    }

    fn orientation_of(&self, sensor: PhysicalSensor) -> OrientationMatrix {
        *self.ctx.orientation.get(sensor)
    }

    fn push_bias(&mut self, sensor: PhysicalSensor) -> Result<()> {
        let orientation = self.orientation_of(sensor);
        self.ctx
            .calibration
            .write_to_device(sensor, &orientation, self.control.as_mut())
    }
}

/// One `Option` per type; a newer event overwrites an undelivered one.
#[derive(Debug, Default)]
struct PendingEvents {
    slots: [Option<SensorEvent>; NUM_SENSORS],
}

/// State shared between the client thread and the callback path.
///
/// Lock hierarchy: `state` is level 1, `events` level 2. `events` may be
/// taken while `state` is held, never the other way round. `publish` is
/// the only code holding both.
struct Shared {
    state: Mutex<CoreState>,
    events: Mutex<PendingEvents>,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, CoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_events(&self) -> MutexGuard<'_, PendingEvents> {
        self.events.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Store an event for delivery. The caller proves it holds the state
    /// lock by passing the guarded state.
    fn publish(&self, state: &CoreState, event: SensorEvent) {
        if !state.master.contains(event.sensor.mask()) {
            return;
        }
        self.lock_events().slots[event.sensor.index()] = Some(event);
        let _ = self.wake_tx.try_send(());
    }

    /// Run the builders over decoded samples.
    fn process(&self, samples: &[RawSample]) {
        let mut guard = self.lock_state();
        let state = &mut *guard;

        let mut extra = Vec::new();
        if state.hardware.contains(HardwareMask::COMPASS) && !state.compass.is_integrated() {
            loop {
                match state.compass.read_sample() {
                    Ok(Some((data, timestamp))) => extra.push(RawSample {
                        kind: RecordKind::Compass,
                        data,
                        step: false,
                        timestamp,
                    }),
                    Ok(None) => break,
                    Err(e) => {
                        log::warn!("compass read failed: {}", e);
                        break;
                    }
                }
            }
        }

        for sample in samples.iter().chain(extra.iter()) {
            state.ctx.absorb(sample);
            for t in builders::targets(sample.kind) {
                if !state.master.contains(t.mask()) {
                    continue;
                }
                if let Some(event) = BUILDERS[t.index()](&state.ctx, sample) {
                    self.publish(state, event);
                }
            }
        }
    }

    fn drain(&self, out: &mut [SensorEvent]) -> usize {
        let mut events = self.lock_events();
        let mut n = 0;
        for slot in events.slots.iter_mut() {
            if n == out.len() {
                break;
            }
            if let Some(event) = slot.take() {
                out[n] = event;
                n += 1;
            }
        }
        n
    }

    fn has_pending(&self) -> bool {
        self.lock_events().slots.iter().any(Option::is_some)
    }
}

/// Entry point for the thread delivering DMP results and calibration.
///
/// Cheap to clone; bound to the core it was taken from.
#[derive(Clone)]
pub struct CallbackHandle {
    shared: Arc<Shared>,
}

impl CallbackHandle {
    pub fn deliver(&self, event: DmpEvent) -> Result<()> {
        let mut state = self.shared.lock_state();
        match event {
            DmpEvent::DisplayOrientation(code) => {
                log::debug!("display orientation {}", code);
                state.display_orientation = Some(code);
                Ok(())
            }
            DmpEvent::SignificantMotion { timestamp } => {
                let smd = SensorType::SignificantMotion.mask();
                if !state.master.contains(smd) {
                    log::debug!("significant motion while disabled, ignored");
                    return Ok(());
                }
                self.shared
                    .publish(&state, builders::significant_motion_event(timestamp));
                // one-shot: disarm after the first trigger
                state.master.remove(smd);
                log::info!("significant motion at {}, disarming", timestamp);
                state.apply_masks()
            }
        }
    }

    /// Record a bias computed by a calibration algorithm and push it to
    /// the device where the chip can apply it.
    pub fn update_calibration(&self, sensor: PhysicalSensor, bias: [f32; 3], accuracy: i8) -> Result<()> {
        let mut state = self.shared.lock_state();
        state.ctx.calibration.update(sensor, bias, accuracy);
        state.push_bias(sensor)
    }
}

/// Sensor-fusion core for one motion chip.
pub struct MplSensor {
    shared: Arc<Shared>,
    data: Box<dyn DataSource>,
    reader: RecordReader,
    read_buf: Vec<u8>,
    poll_time_ms: i32,
}

fn read_orientation(ctl: &mut dyn ControlInterface, attribute: Attribute) -> Result<OrientationMatrix> {
    match ctl.read_string(attribute) {
        Ok(text) => OrientationMatrix::parse(&text),
        Err(e) => {
            log::warn!("{:?} unreadable ({}), assuming identity", attribute, e);
            Ok(OrientationMatrix::IDENTITY)
        }
    }
}

impl MplSensor {
    /// Open the device described by `config` through sysfs and its
    /// character device.
    pub fn open(
        config: MplConfig,
        compass: impl CompassSensor + 'static,
        storage: impl CalibrationStorage + 'static,
    ) -> Result<MplSensor> {
        let file = std::fs::File::open(&config.data_device).map_err(|e| {
            MplError::NoDevice(format!("{}: {}", config.data_device.display(), e))
        })?;
        #[cfg(unix)]
        let data = {
            use std::os::unix::io::AsRawFd;
            let fd = file.as_raw_fd();
            ReaderSource::with_fd(file, fd)
        };
        #[cfg(not(unix))]
        let data = ReaderSource::new(file);

        let control = SysfsControl::new(SysfsAttributes::standard(&config.sysfs_root));
        let backends = Backends::new(control, data)
            .with_compass(compass)
            .with_storage(storage);
        Self::new(config, backends)
    }

    /// Bring the chip into its initial state and load calibration.
    pub fn new(config: MplConfig, backends: Backends) -> Result<MplSensor> {
        config.validate()?;
        let Backends {
            mut control,
            data,
            compass,
            mut storage,
        } = backends;
        let ctl = control.as_mut();

        write_attr(ctl, Attribute::PowerState, 1)?;
        write_attr(ctl, Attribute::BufferEnable, 0)?;
        write_attr(ctl, Attribute::InTimestampEnable, 1)?;
        write_attr(ctl, Attribute::BufferLength, KERNEL_BUFFER_LENGTH)?;
        write_attr(ctl, Attribute::ChipEnable, 1)?;
        write_attr(ctl, Attribute::GyroFsr, config.gyro_fsr_dps as i64)?;
        write_attr(ctl, Attribute::AccelFsr, config.accel_fsr_g as i64)?;
        for attr in [
            Attribute::GyroEnable,
            Attribute::GyroFifoEnable,
            Attribute::AccelEnable,
            Attribute::AccelFifoEnable,
        ] {
            write_attr(ctl, attr, 0)?;
        }

        let orientation = Orientations {
            gyro: read_orientation(ctl, Attribute::GyroOrient)?,
            accel: read_orientation(ctl, Attribute::AccelOrient)?,
            compass: compass.orientation(),
        };

        let mut dmp = DmpStateMachine::new(config.smd);
        let dmp_ok = if config.dmp {
            match config.load_firmware_image()? {
                Some(image) => {
                    dmp.load_firmware(ctl, &image)?;
                    true
                }
                None => match read_attr(ctl, Attribute::FirmwareLoaded) {
                    Ok(1) => {
                        dmp.load_firmware(ctl, &[])?;
                        true
                    }
                    _ => {
                        log::warn!("no DMP firmware available, running without DMP features");
                        false
                    }
                },
            }
        } else {
            false
        };

        let caps = Capabilities {
            dmp: dmp_ok,
            compass: compass.is_present(),
            low_power_quaternion: config.low_power_quaternion,
        };

        let mut calibration =
            CalibrationStore::new(config.gyro_scale(), config.accel_scale(), compass.sensitivity());
        calibration.load_from(storage.as_mut());
        for sensor in [PhysicalSensor::Gyro, PhysicalSensor::Accel] {
            calibration.write_to_device(sensor, orientation.get(sensor), ctl)?;
        }

        log::info!(
            "{} ready: dmp={} compass={} ({}) gyroFsr={}dps accelFsr={}g",
            config.chip_id,
            caps.dmp,
            caps.compass,
            compass.chip_name(),
            config.gyro_fsr_dps,
            config.accel_fsr_g
        );

        let (wake_tx, wake_rx) = crossbeam_channel::bounded(1);
        let read_buf = vec![0u8; config.read_buffer];
        let poll_time_ms = config.poll_time_ms;
        let state = CoreState {
            config,
            control,
            compass,
            storage,
            caps,
            master: SensorMask::empty(),
            batched: SensorMask::empty(),
            hardware: HardwareMask::empty(),
            buffer_on: false,
            dmp,
            delays: [DEFAULT_DELAY_NS; NUM_SENSORS],
            ctx: BuildContext::new(calibration, orientation),
            display_orientation: None,
        };

        Ok(MplSensor {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                events: Mutex::new(PendingEvents::default()),
                wake_tx,
                wake_rx,
            }),
            data,
            reader: RecordReader::with_capacity(read_buf.len() + crate::protocol::MAX_RECORD_SIZE),
            read_buf,
            poll_time_ms,
        })
    }

    /// Turn a logical sensor on or off. Shared engines stay on while any
    /// enabled type still needs them.
    pub fn enable(&mut self, handle: i32, on: bool) -> Result<()> {
        let sensor = SensorType::from_handle(handle)?;
        let mut state = self.shared.lock_state();
        if on {
            check_supported(sensor, &state.caps)?;
        }
        let prev = state.master;
        state.master.set(sensor.mask(), on);
        if let Err(e) = state.apply_masks() {
            log::warn!("{} {} failed: {}", sensor.name(), if on { "enable" } else { "disable" }, e);
            state.master = prev;
            return Err(e);
        }
        log::info!("{} {}", sensor.name(), if on { "enabled" } else { "disabled" });
        Ok(())
    }

    pub fn set_delay(&mut self, handle: i32, ns: i64) -> Result<()> {
        let sensor = SensorType::from_handle(handle)?;
        let mut state = self.shared.lock_state();
        let ns = state.config.clamp_delay(ns)?;
        state.delays[sensor.index()] = ns;
        log::debug!("{} delay {} ns", sensor.name(), ns);
        if state.master.contains(sensor.mask()) {
            state.update_delay()?;
        }
        Ok(())
    }

    /// Configure batching. A zero timeout stops batching the type.
    pub fn batch(&mut self, handle: i32, flags: i32, period_ns: i64, timeout_ns: i64) -> Result<()> {
        let sensor = SensorType::from_handle(handle)?;
        if flags & !(BATCH_DRY_RUN | BATCH_WAKE_UPON_FIFO_FULL) != 0 {
            return Err(MplError::InvalidArgument(format!("batch flags 0x{:x}", flags)));
        }
        if timeout_ns < 0 {
            return Err(MplError::InvalidArgument(format!("negative batch timeout {}", timeout_ns)));
        }
        let mut state = self.shared.lock_state();
        let period = state.config.clamp_delay(period_ns)?;
        if timeout_ns > 0 {
            if sensor.is_one_shot() {
                return Err(MplError::InvalidArgument(format!(
                    "{} cannot be batched",
                    sensor.name()
                )));
            }
            if !state.caps.dmp {
                return Err(MplError::Unsupported("batching needs the DMP".into()));
            }
        }
        if flags & BATCH_DRY_RUN != 0 {
            return Ok(());
        }

        let prev_batched = state.batched;
        let prev_delay = state.delays[sensor.index()];
        state.batched.set(sensor.mask(), timeout_ns > 0);
        state.delays[sensor.index()] = period;
        if let Err(e) = state.apply_masks() {
            state.batched = prev_batched;
            state.delays[sensor.index()] = prev_delay;
            return Err(e);
        }
        log::debug!(
            "{} batch period={} timeout={}",
            sensor.name(),
            period,
            timeout_ns
        );
        Ok(())
    }

    /// Read once from the data source, build events and hand out as many
    /// as fit. Undelivered events stay pending.
    pub fn read_events(&mut self, out: &mut [SensorEvent]) -> Result<usize> {
        let n = match self.data.read(&mut self.read_buf) {
            Ok(n) => n,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => 0,
            Err(e) => return Err(e.into()),
        };
        if n > 0 {
            self.reader.feed(&self.read_buf[..n]);
        }
        let samples: Vec<RawSample> = self.reader.records().collect();
        log::trace!("read {} bytes, {} records", n, samples.len());
        self.shared.process(&samples);
        Ok(self.drain_events(out))
    }

    /// Hand out pending events without touching the data source.
    pub fn drain_events(&self, out: &mut [SensorEvent]) -> usize {
        self.shared.drain(out)
    }

    pub fn has_pending_events(&self) -> bool {
        self.shared.has_pending()
    }

    /// The data source reached its end; no new records will arrive.
    pub fn source_exhausted(&self) -> bool {
        self.data.is_exhausted()
    }

    /// Sleep until an event is published or `timeout` passes.
    pub fn wait_pending(&self, timeout: Duration) -> bool {
        if self.shared.has_pending() {
            return true;
        }
        let _ = self.shared.wake_rx.recv_timeout(timeout);
        self.shared.has_pending()
    }

    /// Descriptor of the main motion stream.
    pub fn fd(&self) -> Option<RawFd> {
        self.data.fd()
    }

    /// Accel samples share the main stream; its descriptor while the accel
    /// engine runs.
    pub fn accel_fd(&self) -> Option<RawFd> {
        let on = self.shared.lock_state().hardware.contains(HardwareMask::ACCEL);
        if on {
            self.data.fd()
        } else {
            None
        }
    }

    /// Descriptor of a standalone compass.
    pub fn compass_fd(&self) -> Option<RawFd> {
        let state = self.shared.lock_state();
        if state.compass.is_integrated() {
            None
        } else {
            state.compass.fd()
        }
    }

    pub fn poll_time(&self) -> i32 {
        self.poll_time_ms
    }

    pub fn handle_info(&self, handle: i32) -> Result<(SensorType, &'static str)> {
        let sensor = SensorType::from_handle(handle)?;
        Ok((sensor, sensor.name()))
    }

    pub fn populate_sensor_list(&self) -> Vec<SensorDescriptor> {
        let state = self.shared.lock_state();
        let compass = state.compass.is_present().then(|| {
            (
                state.compass.chip_name(),
                state.compass.max_range(),
                state.compass.sensitivity(),
            )
        });
        descriptor::populate_sensor_list(&DescriptorContext {
            chip_id: &state.config.chip_id,
            caps: state.caps,
            gyro_fsr_dps: state.config.gyro_fsr_dps,
            accel_fsr_g: state.config.accel_fsr_g,
            compass,
            min_delay_us: state.config.min_delay_us as i32,
        })
    }

    pub fn callback_handle(&self) -> CallbackHandle {
        CallbackHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.shared.lock_state().caps
    }

    /// Resources the device currently has on.
    pub fn local_mask(&self) -> LocalMask {
        self.shared.lock_state().local_mask()
    }

    pub fn master_mask(&self) -> SensorMask {
        self.shared.lock_state().master
    }

    pub fn dmp_state(&self) -> DmpState {
        self.shared.lock_state().dmp.state()
    }

    /// Re-read the DMP model from the device after a failed write.
    pub fn resync_dmp(&mut self) -> Result<()> {
        let mut state = self.shared.lock_state();
        let CoreState { dmp, control, .. } = &mut *state;
        dmp.resync(control.as_mut())
    }

    /// Steps flagged by the pedometer since construction.
    pub fn steps_detected(&self) -> u64 {
        self.shared.lock_state().ctx.cache.steps
    }

    pub fn last_pressure(&self) -> Option<f32> {
        self.shared.lock_state().ctx.cache.pressure
    }

    pub fn display_orientation(&self) -> Option<u8> {
        self.shared.lock_state().display_orientation
    }

    /// Records skipped behind unknown tags, in bytes.
    pub fn skipped_bytes(&self) -> u64 {
        self.reader.skipped_bytes()
    }
}

impl Drop for MplSensor {
    fn drop(&mut self) {
        let mut state = self.shared.lock_state();
        let CoreState { ctx, storage, .. } = &mut *state;
        ctx.calibration.flush(storage.as_mut());
    }
}
