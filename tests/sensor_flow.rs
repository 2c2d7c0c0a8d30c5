use mplsensor::error::EIO;
use mplsensor::mask::compute_local_mask;
use mplsensor::protocol::{encode_record, RecordKind};
use mplsensor::{
    Attribute, Backends, CalibrationBlob, ChannelEventSource, DataSource, DmpEvent, DmpEventReader,
    DmpState, FeatureMask, HardwareMask, IntegratedCompass, MemoryControl, MemorySource,
    MemoryStorage, MplConfig, MplError, MplSensor, PhysicalSensor, ReaderSource, SensorEvent,
    SensorMask, SensorType, ACCURACY_HIGH, GRAVITY_EARTH,
};
use proptest::prelude::*;
use std::time::{Duration, Instant};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

struct Rig {
    ctl: MemoryControl,
    src: MemorySource,
    sensor: MplSensor,
}

fn rig_with(config: MplConfig, compass: bool, storage: MemoryStorage, chunk: Option<usize>) -> Rig {
    init_logging();
    let ctl = MemoryControl::new();
    ctl.set(Attribute::FirmwareLoaded, "1");
    let src = match chunk {
        Some(n) => MemorySource::with_chunk(n),
        None => MemorySource::new(),
    };
    let mut backends = Backends::new(ctl.clone(), src.clone()).with_storage(storage);
    if compass {
        backends = backends.with_compass(IntegratedCompass::ak8975());
    }
    let sensor = MplSensor::new(config, backends).unwrap();
    Rig { ctl, src, sensor }
}

fn rig(compass: bool) -> Rig {
    rig_with(MplConfig::default(), compass, MemoryStorage::new(), None)
}

fn blank() -> SensorEvent {
    SensorEvent::new(SensorType::Gyro, 0, [0.0; 6], 0)
}

fn read_all(sensor: &mut MplSensor) -> Vec<SensorEvent> {
    let mut out = vec![blank(); 16];
    let n = sensor.read_events(&mut out).unwrap();
    out.truncate(n);
    out
}

fn approx(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-3
}

#[test]
fn orientation_only_arms_display_orientation() {
    let mut r = rig(true);
    r.sensor.enable(SensorType::Orientation.handle(), true).unwrap();

    let armed = FeatureMask::DISPL_ORIENTATION | FeatureMask::SIX_AXIS_QUATERNION;
    let local = r.sensor.local_mask();
    assert_eq!(local.hardware, HardwareMask::ACCEL | HardwareMask::GYRO);
    assert_eq!(local.features, armed);
    assert_eq!(r.sensor.dmp_state(), DmpState::Armed(armed));
    assert_eq!(r.ctl.int(Attribute::DmpOn), Some(1));
    assert_eq!(r.ctl.int(Attribute::DisplayOrientationOn), Some(1));
    assert_eq!(r.ctl.int(Attribute::SixAxisQuaternionOn), Some(1));
    assert_eq!(r.ctl.int(Attribute::DmpEventIntOn), Some(1));
    assert_eq!(r.ctl.int(Attribute::BufferEnable), Some(1));

    r.sensor.enable(SensorType::Orientation.handle(), false).unwrap();
    assert!(r.sensor.local_mask().is_empty());
    assert_eq!(r.sensor.dmp_state(), DmpState::LoadedIdle);
    assert_eq!(r.ctl.int(Attribute::DmpOn), Some(0));
    assert_eq!(r.ctl.int(Attribute::GyroEnable), Some(0));
    assert_eq!(r.ctl.int(Attribute::AccelEnable), Some(0));
}

#[test]
fn orientation_azimuth_follows_quaternion_yaw() {
    let mut r = rig(false);
    r.sensor.enable(SensorType::Orientation.handle(), true).unwrap();

    // 90 degrees about z, Q30 imaginary part sin(45°)
    r.src.push(&encode_record(RecordKind::SixAxisQuaternion, false, [0, 0, 759_250_125], 10));
    let events = read_all(&mut r.sensor);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].sensor, SensorType::Orientation);
    assert!((events[0].values[0] - 270.0).abs() < 0.01);
    assert!(events[0].values[1].abs() < 0.01 && events[0].values[2].abs() < 0.01);

    r.src.push(&encode_record(RecordKind::SixAxisQuaternion, false, [0, 0, 0], 20));
    let events = read_all(&mut r.sensor);
    assert_eq!(events.len(), 1);
    assert!(events[0].values[0].abs() < 0.01);

    // accel records no longer drive orientation once a quaternion is cached
    r.src.push(&encode_record(RecordKind::Accel, false, [0, 0, 16384], 30));
    assert!(read_all(&mut r.sensor).is_empty());
}

#[test]
fn accel_and_compass_records_become_events() {
    let mut r = rig(true);
    r.sensor.enable(SensorType::Accelerometer.handle(), true).unwrap();
    r.sensor.enable(SensorType::MagneticField.handle(), true).unwrap();

    r.src.push(&encode_record(RecordKind::Accel, false, [0, 0, 16384], 1000));
    r.src.push(&encode_record(RecordKind::Compass, false, [10, 20, 30], 1005));
    let events = read_all(&mut r.sensor);
    assert_eq!(events.len(), 2);

    let accel = events.iter().find(|e| e.sensor == SensorType::Accelerometer).unwrap();
    assert_eq!(accel.timestamp, 1000);
    assert!(approx(accel.values[2], GRAVITY_EARTH));
    assert!(approx(accel.values[0], 0.0));

    let mag = events.iter().find(|e| e.sensor == SensorType::MagneticField).unwrap();
    assert_eq!(mag.timestamp, 1005);
    assert!(approx(mag.values[0], 3.0) && approx(mag.values[1], 6.0) && approx(mag.values[2], 9.0));
    assert!(!r.sensor.has_pending_events());
}

#[test]
fn shared_gyro_survives_partial_disable() {
    let mut r = rig(true);
    let gyro = SensorType::Gyro.handle();
    let grv = SensorType::GameRotationVector.handle();
    r.sensor.enable(gyro, true).unwrap();
    r.sensor.enable(grv, true).unwrap();
    assert!(r.sensor.local_mask().features.contains(FeatureMask::SIX_AXIS_QUATERNION));

    r.sensor.enable(grv, false).unwrap();
    let local = r.sensor.local_mask();
    assert_eq!(local.hardware, HardwareMask::GYRO);
    assert!(local.features.is_empty());
    assert_eq!(r.ctl.int(Attribute::GyroEnable), Some(1));
    assert_eq!(r.ctl.int(Attribute::SixAxisQuaternionOn), Some(0));

    r.sensor.enable(grv, true).unwrap();
    r.sensor.enable(gyro, false).unwrap();
    assert!(r.sensor.local_mask().hardware.contains(HardwareMask::GYRO));
    assert_eq!(r.ctl.int(Attribute::GyroEnable), Some(1));
}

#[test]
fn quaternion_drives_game_rotation_vector_gravity_and_linear_accel() {
    let mut r = rig(false);
    for t in [SensorType::GameRotationVector, SensorType::Gravity, SensorType::LinearAccel] {
        r.sensor.enable(t.handle(), true).unwrap();
    }
    r.src.push(&encode_record(RecordKind::SixAxisQuaternion, false, [0, 0, 0], 50));
    r.src.push(&encode_record(RecordKind::Accel, false, [8192, 0, 16384], 51));
    let events = read_all(&mut r.sensor);

    let grv = events.iter().find(|e| e.sensor == SensorType::GameRotationVector).unwrap();
    assert!(approx(grv.values[3], 1.0));
    let gravity = events.iter().find(|e| e.sensor == SensorType::Gravity).unwrap();
    assert!(approx(gravity.values[2], GRAVITY_EARTH));
    let linear = events.iter().find(|e| e.sensor == SensorType::LinearAccel).unwrap();
    assert!(approx(linear.values[0], GRAVITY_EARTH / 2.0));
    assert!(approx(linear.values[2], 0.0));
    assert_eq!(linear.timestamp, 51);
}

#[test]
fn short_output_buffer_keeps_the_rest_pending() {
    let mut r = rig(false);
    r.sensor.enable(SensorType::Gyro.handle(), true).unwrap();
    r.sensor.enable(SensorType::Accelerometer.handle(), true).unwrap();
    r.src.push(&encode_record(RecordKind::Gyro, false, [1, 2, 3], 10));
    r.src.push(&encode_record(RecordKind::Accel, false, [4, 5, 6], 11));

    let mut one = [blank(); 1];
    assert_eq!(r.sensor.read_events(&mut one).unwrap(), 1);
    assert!(r.sensor.has_pending_events());

    let mut rest = [blank(); 4];
    assert_eq!(r.sensor.drain_events(&mut rest), 1);
    assert_ne!(one[0].sensor, rest[0].sensor);
    assert!(!r.sensor.has_pending_events());
}

#[test]
fn split_reads_produce_the_same_events() {
    let mut r = rig_with(MplConfig::default(), false, MemoryStorage::new(), Some(5));
    r.sensor.enable(SensorType::Accelerometer.handle(), true).unwrap();
    r.src.push(&[0xef, 0xbe]);
    r.src.push(&encode_record(RecordKind::Accel, false, [0, 16384, 0], 77));

    let mut got = Vec::new();
    for _ in 0..10 {
        got.extend(read_all(&mut r.sensor));
    }
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].timestamp, 77);
    assert!(approx(got[0].values[1], GRAVITY_EARTH));
    assert_eq!(r.sensor.skipped_bytes(), 2);
}

#[test]
fn significant_motion_fires_once_and_disarms() {
    let mut r = rig(false);
    let smd = SensorType::SignificantMotion.handle();
    r.sensor.enable(smd, true).unwrap();
    assert_eq!(r.ctl.int(Attribute::SmdEnable), Some(1));
    assert_eq!(r.ctl.int(Attribute::SmdThreshold), Some(3000));

    let cb = r.sensor.callback_handle();
    cb.deliver(DmpEvent::SignificantMotion { timestamp: 123 }).unwrap();

    let mut out = [blank(); 4];
    assert_eq!(r.sensor.drain_events(&mut out), 1);
    assert_eq!(out[0].sensor, SensorType::SignificantMotion);
    assert_eq!(out[0].timestamp, 123);
    assert_eq!(out[0].values[0], 1.0);

    assert!(!r.sensor.master_mask().contains(SensorMask::SIGNIFICANT_MOTION));
    assert!(r.sensor.local_mask().is_empty());
    assert_eq!(r.ctl.int(Attribute::SmdEnable), Some(0));

    cb.deliver(DmpEvent::SignificantMotion { timestamp: 456 }).unwrap();
    assert_eq!(r.sensor.drain_events(&mut out), 0);
}

#[test]
fn failed_control_write_reports_eio_and_keeps_state() {
    let mut r = rig(false);
    r.ctl.fail_writes(Attribute::GyroEnable);
    let err = r.sensor.enable(SensorType::Gyro.handle(), true).unwrap_err();
    assert!(matches!(err, MplError::Device { attribute: Attribute::GyroEnable, .. }));
    assert_eq!(err.errno(), -5);
    assert!(r.sensor.master_mask().is_empty());
    assert!(!r.sensor.local_mask().hardware.contains(HardwareMask::GYRO));

    r.ctl.clear_failures();
    r.sensor.enable(SensorType::Gyro.handle(), true).unwrap();
    assert_eq!(r.sensor.local_mask().hardware, HardwareMask::GYRO);
}

#[test]
fn failed_enable_keeps_running_engines_streaming() {
    let mut r = rig(false);
    let gyro = SensorType::Gyro.handle();
    r.sensor.enable(gyro, true).unwrap();
    assert_eq!(r.ctl.int(Attribute::BufferEnable), Some(1));

    r.ctl.fail_writes(Attribute::AccelEnable);
    assert!(r.sensor.enable(SensorType::Accelerometer.handle(), true).is_err());
    assert_eq!(r.sensor.master_mask(), SensorMask::GYRO);
    assert_eq!(r.sensor.local_mask().hardware, HardwareMask::GYRO);
    assert_eq!(r.ctl.int(Attribute::BufferEnable), Some(1));

    r.src.push(&encode_record(RecordKind::Gyro, false, [1, 0, 0], 5));
    let events = read_all(&mut r.sensor);
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].sensor, SensorType::Gyro);

    r.ctl.clear_failures();
    r.sensor.enable(gyro, true).unwrap();
    assert_eq!(r.ctl.int(Attribute::BufferEnable), Some(1));
}

struct FailingSource {
    first: Option<Vec<u8>>,
}

impl DataSource for FailingSource {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        match self.first.take() {
            Some(bytes) => {
                buf[..bytes.len()].copy_from_slice(&bytes);
                Ok(bytes.len())
            }
            None => Err(std::io::Error::new(std::io::ErrorKind::Other, "device unplugged")),
        }
    }
}

#[test]
fn data_source_error_is_eio_and_keeps_pending() {
    init_logging();
    let ctl = MemoryControl::new();
    ctl.set(Attribute::FirmwareLoaded, "1");
    let mut bytes = encode_record(RecordKind::Gyro, false, [1, 2, 3], 10);
    bytes.extend(encode_record(RecordKind::Accel, false, [4, 5, 6], 11));
    let source = FailingSource { first: Some(bytes) };
    let mut sensor = MplSensor::new(MplConfig::default(), Backends::new(ctl, source)).unwrap();
    sensor.enable(SensorType::Gyro.handle(), true).unwrap();
    sensor.enable(SensorType::Accelerometer.handle(), true).unwrap();

    let mut one = [blank(); 1];
    assert_eq!(sensor.read_events(&mut one).unwrap(), 1);

    let err = sensor.read_events(&mut one).unwrap_err();
    assert!(matches!(err, MplError::Io(_)));
    assert_eq!(err.errno(), -EIO);
    assert!(sensor.has_pending_events());
    assert_eq!(sensor.drain_events(&mut one), 1);
}

#[test]
fn failed_batch_rolls_back_mode_and_delay() {
    let mut r = rig(false);
    let accel = SensorType::Accelerometer.handle();
    r.sensor.enable(accel, true).unwrap();
    assert_eq!(r.ctl.int(Attribute::AccelFifoRate), Some(5));

    r.ctl.fail_writes(Attribute::BatchMode);
    let err = r.sensor.batch(accel, 0, 10_000_000, 1_000_000_000).unwrap_err();
    assert_eq!(err.errno(), -EIO);
    assert!(!r.sensor.local_mask().features.contains(FeatureMask::BATCH_MODE));

    // the next mask change must see neither the batch flag nor the period
    r.ctl.clear_failures();
    r.sensor.enable(SensorType::Gyro.handle(), true).unwrap();
    assert!(r.sensor.local_mask().features.is_empty());
    assert_eq!(r.ctl.int(Attribute::BatchMode), None);
    assert_eq!(r.ctl.int(Attribute::AccelFifoRate), Some(5));
    assert_eq!(r.ctl.int(Attribute::DmpOn), Some(0));
}

#[test]
fn capture_replay_runs_until_end_of_file() {
    init_logging();
    let ctl = MemoryControl::new();
    ctl.set(Attribute::FirmwareLoaded, "1");
    let mut capture = encode_record(RecordKind::Pressure, false, [1 << 16, 0, 0], 1);
    capture.extend(encode_record(RecordKind::Pressure, false, [2 << 16, 0, 0], 2));
    capture.extend(encode_record(RecordKind::Accel, false, [0, 0, 16384], 3));
    let config = MplConfig {
        read_buffer: 24,
        ..MplConfig::default()
    };
    let source = ReaderSource::new(std::io::Cursor::new(capture));
    let mut sensor = MplSensor::new(config, Backends::new(ctl, source)).unwrap();
    sensor.enable(SensorType::Accelerometer.handle(), true).unwrap();

    let mut out = [blank(); 4];
    assert_eq!(sensor.read_events(&mut out).unwrap(), 0);
    assert!(!sensor.source_exhausted());

    let mut got = Vec::new();
    loop {
        let n = sensor.read_events(&mut out).unwrap();
        got.extend_from_slice(&out[..n]);
        if n == 0 && sensor.source_exhausted() && !sensor.has_pending_events() {
            break;
        }
    }
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].timestamp, 3);
    assert!(approx(sensor.last_pressure().unwrap(), 2.0));
}

#[test]
fn configuration_errors_are_einval() {
    let mut r = rig(false);
    let bad = r.sensor.enable(99, true).unwrap_err();
    assert_eq!(bad.errno(), -22);
    let no_compass = r.sensor.enable(SensorType::MagneticField.handle(), true).unwrap_err();
    assert!(matches!(no_compass, MplError::Unsupported(_)));
    assert_eq!(no_compass.errno(), -22);
    assert!(r.sensor.master_mask().is_empty());
    assert!(r.sensor.handle_info(99).is_err());
    assert_eq!(
        r.sensor.handle_info(5).unwrap(),
        (SensorType::Orientation, "Orientation")
    );
}

#[test]
fn calibration_loads_applies_and_flushes() {
    let storage = MemoryStorage::with_blob(CalibrationBlob {
        gyro: [1 << 16, 0, 0],
        accel: [0; 3],
        compass: [0; 3],
    });
    let mut r = rig_with(MplConfig::default(), false, storage.clone(), None);
    r.sensor.enable(SensorType::Gyro.handle(), true).unwrap();
    r.sensor.enable(SensorType::RawGyro.handle(), true).unwrap();
    r.src.push(&encode_record(RecordKind::Gyro, false, [0, 0, 0], 1));
    let events = read_all(&mut r.sensor);
    let gyro = events.iter().find(|e| e.sensor == SensorType::Gyro).unwrap();
    assert!(approx(gyro.values[0], -1.0));
    let raw = events.iter().find(|e| e.sensor == SensorType::RawGyro).unwrap();
    assert!(approx(raw.values[0], 0.0) && approx(raw.values[3], 1.0));

    let cb = r.sensor.callback_handle();
    cb.update_calibration(PhysicalSensor::Accel, [0.0, 0.0, 0.5], ACCURACY_HIGH)
        .unwrap();
    assert!(r.ctl.int(Attribute::InAccelZOffset).is_some());

    drop(r);
    let saved = storage.blob().unwrap();
    assert_eq!(saved.accel, [0, 0, 1 << 15]);
    assert_eq!(saved.gyro, [1 << 16, 0, 0]);
}

#[test]
fn dmp_event_reader_forwards_notifications() {
    let r = rig(false);
    let mut sensor = r.sensor;
    sensor.enable(SensorType::SignificantMotion.handle(), true).unwrap();

    let (tx, rx) = crossbeam_channel::unbounded();
    let reader = DmpEventReader::start(ChannelEventSource::new(rx), sensor.callback_handle()).unwrap();
    tx.send(DmpEvent::DisplayOrientation(2)).unwrap();
    tx.send(DmpEvent::SignificantMotion { timestamp: 9 }).unwrap();

    assert!(sensor.wait_pending(Duration::from_secs(5)));
    let deadline = Instant::now() + Duration::from_secs(5);
    while reader.delivered() < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(reader.delivered(), 2);
    assert_eq!(sensor.display_orientation(), Some(2));

    let mut out = [blank(); 2];
    assert_eq!(sensor.drain_events(&mut out), 1);
    assert_eq!(out[0].sensor, SensorType::SignificantMotion);

    drop(tx);
    reader.stop();
}

#[test]
fn callback_thread_and_client_do_not_deadlock() {
    let mut r = rig(false);
    r.sensor.enable(SensorType::Gyro.handle(), true).unwrap();
    let cb = r.sensor.callback_handle();
    let worker = std::thread::spawn(move || {
        for i in 0..200 {
            cb.update_calibration(PhysicalSensor::Gyro, [i as f32 * 1e-4, 0.0, 0.0], ACCURACY_HIGH)
                .unwrap();
            cb.deliver(DmpEvent::DisplayOrientation((i % 4) as u8)).unwrap();
        }
    });
    for ts in 0..200 {
        r.src.push(&encode_record(RecordKind::Gyro, false, [1, 1, 1], ts));
        let _ = read_all(&mut r.sensor);
    }
    worker.join().unwrap();
    assert_eq!(r.sensor.display_orientation(), Some(3));
}

#[test]
fn pedometer_steps_and_pressure_are_tracked() {
    let mut r = rig(false);
    r.sensor.enable(SensorType::Accelerometer.handle(), true).unwrap();
    r.src.push(&encode_record(RecordKind::Accel, true, [0, 0, 16384], 1));
    r.src.push(&encode_record(RecordKind::PedQuaternion, true, [0, 0, 0], 2));
    r.src.push(&encode_record(RecordKind::Pressure, false, [3 << 16, 0, 0], 3));
    let events = read_all(&mut r.sensor);
    assert_eq!(events.len(), 1);
    assert_eq!(r.sensor.steps_detected(), 2);
    assert!(approx(r.sensor.last_pressure().unwrap(), 3.0));
}

#[test]
fn sensor_list_matches_hardware() {
    let with = rig(true);
    assert_eq!(with.sensor.populate_sensor_list().len(), 11);
    let without = rig(false);
    let list = without.sensor.populate_sensor_list();
    assert_eq!(list.len(), 9);
    assert!(list.iter().all(|d| d.name.starts_with("MPU6500")));
}

fn arb_toggles() -> impl Strategy<Value = Vec<(usize, bool)>> {
    prop::collection::vec((0usize..11, any::<bool>()), 1..24)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn local_mask_is_always_recomputed_from_scratch(toggles in arb_toggles()) {
        let mut r = rig(true);
        let caps = r.sensor.capabilities();
        for (i, on) in toggles {
            r.sensor.enable(SensorType::ALL[i].handle(), on).unwrap();
            let master = r.sensor.master_mask();
            prop_assert_eq!(
                r.sensor.local_mask(),
                compute_local_mask(master, SensorMask::empty(), &caps)
            );
        }
    }

    #[test]
    fn quaternions_never_armed_together(toggles in prop::collection::vec((any::<bool>(), any::<bool>()), 1..16)) {
        let mut r = rig(false);
        for (rv, grv) in toggles {
            r.sensor.enable(SensorType::RotationVector.handle(), rv).unwrap();
            r.sensor.enable(SensorType::GameRotationVector.handle(), grv).unwrap();
        }
        let (mut lp, mut full) = (false, false);
        for (attr, value) in r.ctl.writes() {
            match attr {
                Attribute::QuaternionOn => lp = value == "1",
                Attribute::SixAxisQuaternionOn => full = value == "1",
                _ => {}
            }
            prop_assert!(!(lp && full));
        }
    }
}
