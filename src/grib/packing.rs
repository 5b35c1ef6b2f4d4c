//! GRIB2 simple packing (data representation template 5.0) with an
//! optional bitmap for missing values.

use crate::constants::FILL_VALUE;

/// Packed representation of one message's values
#[derive(Debug, Clone, PartialEq)]
pub struct SimplePacking {
    pub reference_value: f32,
    pub binary_scale_factor: i16,
    pub decimal_scale_factor: i16,
    pub bits_per_value: u8,
    /// Number of values actually packed (missing values excluded)
    pub packed_count: u32,
    /// Bitmap with one bit per grid point, set when the value is present
    pub bitmap: Option<Vec<u8>>,
    pub data: Vec<u8>,
}

impl SimplePacking {
    /// Pack `values` with `bits` bits per value; NaN or the fill value
    /// marks a missing value
    pub fn pack(values: &[f32], bits: u8) -> Self {
        let present: Vec<f32> = values.iter().copied().filter(|&v| !is_missing(v)).collect();
        let bitmap = (present.len() < values.len()).then(|| bitmap_of(values));

        let (min, max) = present
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            });
        if present.is_empty() || max == min || bits == 0 {
            return Self {
                reference_value: if present.is_empty() { 0.0 } else { min },
                binary_scale_factor: 0,
                decimal_scale_factor: 0,
                bits_per_value: 0,
                packed_count: present.len() as u32,
                bitmap,
                data: Vec::new(),
            };
        }

        let max_packed = ((1u64 << bits) - 1) as f64;
        let range = (max - min) as f64;
        let binary_scale_factor = (range / max_packed).log2().ceil() as i16;
        let scale = 2f64.powi(binary_scale_factor as i32);

        let mut writer = BitWriter::with_capacity(present.len() * bits as usize);
        for &v in &present {
            let packed = (((v - min) as f64) / scale).round().clamp(0.0, max_packed) as u64;
            writer.write(packed, bits);
        }

        Self {
            reference_value: min,
            binary_scale_factor,
            decimal_scale_factor: 0,
            bits_per_value: bits,
            packed_count: present.len() as u32,
            bitmap,
            data: writer.finish(),
        }
    }

    /// Value recovered for the `index`-th packed value
    pub fn unpack_value(&self, index: usize) -> f32 {
        if self.bits_per_value == 0 {
            return self.reference_value;
        }
        let bits = self.bits_per_value as usize;
        let mut raw = 0u64;
        for bit in index * bits..(index + 1) * bits {
            let byte = self.data[bit / 8];
            raw = (raw << 1) | ((byte >> (7 - bit % 8)) & 1) as u64;
        }
        let scale = 2f64.powi(self.binary_scale_factor as i32);
        (self.reference_value as f64 + raw as f64 * scale) as f32
    }
}

fn is_missing(value: f32) -> bool {
    value.is_nan() || value.abs() >= FILL_VALUE as f32
}

fn bitmap_of(values: &[f32]) -> Vec<u8> {
    let mut writer = BitWriter::with_capacity(values.len());
    for &v in values {
        writer.write(u64::from(!is_missing(v)), 1);
    }
    writer.finish()
}

/// MSB-first bit stream, padded with zeros to a whole octet
struct BitWriter {
    bytes: Vec<u8>,
    current: u8,
    filled: u8,
}

impl BitWriter {
    fn with_capacity(bits: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(bits.div_ceil(8)),
            current: 0,
            filled: 0,
        }
    }

    fn write(&mut self, value: u64, bits: u8) {
        for shift in (0..bits).rev() {
            self.current = (self.current << 1) | ((value >> shift) & 1) as u8;
            self.filled += 1;
            if self.filled == 8 {
                self.bytes.push(self.current);
                self.current = 0;
                self.filled = 0;
            }
        }
    }

    fn finish(mut self) -> Vec<u8> {
        if self.filled > 0 {
            self.bytes.push(self.current << (8 - self.filled));
        }
        self.bytes
    }
}
