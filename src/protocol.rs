//! Wire format of the buffered motion stream and the fixed-point helpers
//! shared by the decoders and event builders.
//!
//! Every record is little-endian and starts with a 2-byte tag:
//!
//! | tag | payload | record |
//! |---|---|---|
//! | `0x0800` QUAT | 2 pad + 3 x i32 (Q30) | 24 |
//! | `0x0400` 6_AXIS | 2 pad + 3 x i32 (Q30) | 24 |
//! | `0x0200`/`0x0201` PED_QUAT | 3 x i16 (Q14) | 16 |
//! | `0x2000` GYRO | 3 x i16 counts | 16 |
//! | `0x4000`/`0x4001` ACCEL | 3 x i16 counts | 16 |
//! | `0x1000` COMPASS | 3 x i16 counts | 16 |
//! | `0x8000` PRESSURE | 2 pad + i32 (Q16) | 16 |
//!
//! followed by an i64 timestamp in nanoseconds. The low tag bit marks a
//! step detected by the pedometer and is only legal on PED_QUAT and ACCEL.

// -- Data header tags --
pub const DATA_FORMAT_PED_QUAT: u16 = 0x0200;
pub const DATA_FORMAT_PED_QUAT_STEP: u16 = 0x0201;
pub const DATA_FORMAT_6_AXIS: u16 = 0x0400;
pub const DATA_FORMAT_QUAT: u16 = 0x0800;
pub const DATA_FORMAT_COMPASS: u16 = 0x1000;
pub const DATA_FORMAT_GYRO: u16 = 0x2000;
pub const DATA_FORMAT_ACCEL: u16 = 0x4000;
pub const DATA_FORMAT_ACCEL_STEP: u16 = 0x4001;
pub const DATA_FORMAT_PRESSURE: u16 = 0x8000;
pub const DATA_FORMAT_MASK: u16 = 0xffff;
pub const STEP_FLAG: u16 = 0x0001;

// -- Record geometry --
pub const HEADER_SIZE: usize = 2;
pub const TIMESTAMP_SIZE: usize = 8;
/// Longest record (32-bit quaternions).
pub const MAX_RECORD_SIZE: usize = 24;

/// Unit quaternion `[w, x, y, z]`.
pub type Quaternion = [f32; 4];

/// Data kinds carried by the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    /// Low-power quaternion.
    Quaternion,
    /// Full 6-axis quaternion.
    SixAxisQuaternion,
    PedQuaternion,
    Gyro,
    Accel,
    Compass,
    Pressure,
}

/// Fixed-point representation of a payload element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixedPoint {
    /// Plain sensor counts, scaled later by the engine sensitivity.
    Counts,
    Q14,
    Q16,
    Q30,
}

impl FixedPoint {
    pub fn shift(self) -> u32 {
        match self {
            FixedPoint::Counts => 0,
            FixedPoint::Q14 => 14,
            FixedPoint::Q16 => 16,
            FixedPoint::Q30 => 30,
        }
    }

    pub fn to_f32(self, raw: i32) -> f32 {
        (raw as f64 / (1u64 << self.shift()) as f64) as f32
    }

    pub fn from_f32(self, value: f32) -> i32 {
        let scaled = (value as f64 * (1u64 << self.shift()) as f64).round();
        scaled.clamp(i32::MIN as f64, i32::MAX as f64) as i32
    }
}

impl RecordKind {
    /// Decode a tag into its kind and step flag. `None` for unknown tags.
    pub fn from_tag(tag: u16) -> Option<(RecordKind, bool)> {
        match tag & DATA_FORMAT_MASK {
            DATA_FORMAT_QUAT => Some((RecordKind::Quaternion, false)),
            DATA_FORMAT_6_AXIS => Some((RecordKind::SixAxisQuaternion, false)),
            DATA_FORMAT_PED_QUAT => Some((RecordKind::PedQuaternion, false)),
            DATA_FORMAT_PED_QUAT_STEP => Some((RecordKind::PedQuaternion, true)),
            DATA_FORMAT_GYRO => Some((RecordKind::Gyro, false)),
            DATA_FORMAT_ACCEL => Some((RecordKind::Accel, false)),
            DATA_FORMAT_ACCEL_STEP => Some((RecordKind::Accel, true)),
            DATA_FORMAT_COMPASS => Some((RecordKind::Compass, false)),
            DATA_FORMAT_PRESSURE => Some((RecordKind::Pressure, false)),
            _ => None,
        }
    }

    pub fn tag(self, step: bool) -> u16 {
        let base = match self {
            RecordKind::Quaternion => DATA_FORMAT_QUAT,
            RecordKind::SixAxisQuaternion => DATA_FORMAT_6_AXIS,
            RecordKind::PedQuaternion => DATA_FORMAT_PED_QUAT,
            RecordKind::Gyro => DATA_FORMAT_GYRO,
            RecordKind::Accel => DATA_FORMAT_ACCEL,
            RecordKind::Compass => DATA_FORMAT_COMPASS,
            RecordKind::Pressure => DATA_FORMAT_PRESSURE,
        };
        if step && self.carries_step() {
            base | STEP_FLAG
        } else {
            base
        }
    }

    pub fn carries_step(self) -> bool {
        matches!(self, RecordKind::PedQuaternion | RecordKind::Accel)
    }

    pub fn is_quaternion(self) -> bool {
        matches!(
            self,
            RecordKind::Quaternion | RecordKind::SixAxisQuaternion | RecordKind::PedQuaternion
        )
    }

    /// Bytes between the tag and the timestamp.
    pub fn payload_len(self) -> usize {
        match self {
            RecordKind::Quaternion | RecordKind::SixAxisQuaternion => 14,
            _ => 6,
        }
    }

    pub fn record_len(self) -> usize {
        HEADER_SIZE + self.payload_len() + TIMESTAMP_SIZE
    }

    pub fn fixed_point(self) -> FixedPoint {
        match self {
            RecordKind::Quaternion | RecordKind::SixAxisQuaternion => FixedPoint::Q30,
            RecordKind::PedQuaternion => FixedPoint::Q14,
            RecordKind::Pressure => FixedPoint::Q16,
            RecordKind::Gyro | RecordKind::Accel | RecordKind::Compass => FixedPoint::Counts,
        }
    }
}

fn i16_at(b: &[u8], at: usize) -> i32 {
    i16::from_le_bytes([b[at], b[at + 1]]) as i32
}

fn i32_at(b: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

/// Decode the payload that follows the tag. `payload` must hold at least
/// `kind.payload_len()` bytes.
pub fn decode_payload(kind: RecordKind, payload: &[u8]) -> [i32; 3] {
    match kind {
        // [0..2] padding keeps the 32-bit words aligned
        RecordKind::Quaternion | RecordKind::SixAxisQuaternion => [
            i32_at(payload, 2),
            i32_at(payload, 6),
            i32_at(payload, 10),
        ],
        RecordKind::Pressure => [i32_at(payload, 2), 0, 0],
        _ => [
            i16_at(payload, 0),
            i16_at(payload, 2),
            i16_at(payload, 4),
        ],
    }
}

pub fn decode_timestamp(bytes: &[u8]) -> i64 {
    let mut ts = [0u8; TIMESTAMP_SIZE];
    ts.copy_from_slice(&bytes[..TIMESTAMP_SIZE]);
    i64::from_le_bytes(ts)
}

/// Serialise one record, e.g. for simulated streams and captures.
///
/// 16-bit payload elements are truncated to their low 16 bits.
pub fn encode_record(kind: RecordKind, step: bool, data: [i32; 3], timestamp: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(kind.record_len());
    out.extend_from_slice(&kind.tag(step).to_le_bytes());
    match kind {
        RecordKind::Quaternion | RecordKind::SixAxisQuaternion => {
            out.extend_from_slice(&[0, 0]);
            for v in data {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        RecordKind::Pressure => {
            out.extend_from_slice(&[0, 0]);
            out.extend_from_slice(&data[0].to_le_bytes());
        }
        _ => {
            for v in data {
                out.extend_from_slice(&(v as i16).to_le_bytes());
            }
        }
    }
    out.extend_from_slice(&timestamp.to_le_bytes());
    out
}

/// Rebuild a unit quaternion from its three imaginary parts.
pub fn quaternion_from_imaginary(x: f32, y: f32, z: f32) -> Quaternion {
    let w2 = 1.0 - (x * x + y * y + z * z);
    let w = if w2 > 0.0 { w2.sqrt() } else { 0.0 };
    normalize([w, x, y, z])
}

pub fn normalize(q: Quaternion) -> Quaternion {
    let n = (q[0] * q[0] + q[1] * q[1] + q[2] * q[2] + q[3] * q[3]).sqrt();
    if n < 1e-9 {
        return [1.0, 0.0, 0.0, 0.0];
    }
    [q[0] / n, q[1] / n, q[2] / n, q[3] / n]
}

/// Hamilton product `a * b`.
pub fn multiply(a: Quaternion, b: Quaternion) -> Quaternion {
    let [aw, ax, ay, az] = a;
    let [bw, bx, by, bz] = b;
    [
        aw * bw - ax * bx - ay * by - az * bz,
        aw * bx + ax * bw + ay * bz - az * by,
        aw * by - ax * bz + ay * bw + az * bx,
        aw * bz + ax * by - ay * bx + az * bw,
    ]
}

/// Rotation matrix (row-major) taking device-frame vectors to world frame.
pub fn quaternion_to_rotation(q: Quaternion) -> [[f32; 3]; 3] {
    let [w, x, y, z] = q;
    [
        [1.0 - 2.0*(y*y + z*z), 2.0*(x*y - z*w),       2.0*(x*z + y*w)],
        [2.0*(x*y + z*w),       1.0 - 2.0*(x*x + z*z), 2.0*(y*z - x*w)],
        [2.0*(x*z - y*w),       2.0*(y*z + x*w),       1.0 - 2.0*(x*x + y*y)],
    ]
}

/// World up axis seen from the device, scaled to `g`.
pub fn gravity_from_quaternion(q: Quaternion, g: f32) -> [f32; 3] {
    let m = quaternion_to_rotation(q);
    [m[2][0] * g, m[2][1] * g, m[2][2] * g]
}

/// Direction-cosine-matrix decomposition into `[azimuth, pitch, roll]`
/// degrees, azimuth in `[0, 360)`.
pub fn rotation_to_orientation(m: &[[f32; 3]; 3]) -> [f32; 3] {
    let azimuth = m[0][1].atan2(m[1][1]).to_degrees();
    let pitch = (-m[2][1]).clamp(-1.0, 1.0).asin().to_degrees();
    let roll = (-m[2][0]).atan2(m[2][2]).to_degrees();
    let azimuth = if azimuth < 0.0 { azimuth + 360.0 } else { azimuth };
    [azimuth, pitch, roll]
}

/// Shortest-arc rotation taking the measured up vector onto world Z.
/// Heading is undefined and left at zero.
pub fn tilt_quaternion(up: [f32; 3]) -> Option<Quaternion> {
    let n = (up[0] * up[0] + up[1] * up[1] + up[2] * up[2]).sqrt();
    if n < 1e-6 {
        return None;
    }
    let u = [up[0] / n, up[1] / n, up[2] / n];
    let dot = u[2];
    if dot < -1.0 + 1e-6 {
        return Some([0.0, 1.0, 0.0, 0.0]);
    }
    // u x z
    Some(normalize([1.0 + dot, u[1], -u[0], 0.0]))
}

/// Rotate a device-frame vector into the world frame.
pub fn rotate(q: Quaternion, v: [f32; 3]) -> [f32; 3] {
    let m = quaternion_to_rotation(q);
    let mut out = [0f32; 3];
    for (r, o) in out.iter_mut().enumerate() {
        *o = m[r][0] * v[0] + m[r][1] * v[1] + m[r][2] * v[2];
    }
    out
}
