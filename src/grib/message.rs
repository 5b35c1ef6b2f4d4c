//! Keyed GRIB2 edition 2 message.
//!
//! Metadata is addressed by ecCodes key names. Only the keys of the
//! templates written by this crate are known: grid template 3.0, product
//! templates 4.0, 4.1, 4.8 and 4.11, and data template 5.0.

use super::packing::SimplePacking;
use crate::constants::MISSING_OCTET;
use crate::constants::grib2_params::{BITS_PER_VALUE, EARTH_SHAPE_SPHERICAL};
use crate::error::{ConversionError, Result};
use chrono::{Datelike, NaiveDateTime, Timelike};
use std::collections::BTreeMap;

/// Known key: (name, width in octets, signed, default)
type KeySpec = (&'static str, u8, bool, i64);

const KEYS: &[KeySpec] = &[
    // section 0
    ("discipline", 1, false, 0),
    // section 1
    ("centre", 2, false, 255),
    ("subCentre", 2, false, 0),
    ("tablesVersion", 1, false, 4),
    ("localTablesVersion", 1, false, 0),
    ("significanceOfReferenceTime", 1, false, 1),
    ("year", 2, false, 1970),
    ("month", 1, false, 1),
    ("day", 1, false, 1),
    ("hour", 1, false, 0),
    ("minute", 1, false, 0),
    ("second", 1, false, 0),
    ("productionStatusOfProcessedData", 1, false, 0),
    ("typeOfProcessedData", 1, false, 255),
    // section 3
    ("shapeOfTheEarth", 1, false, EARTH_SHAPE_SPHERICAL as i64),
    // section 4
    ("productDefinitionTemplateNumber", 2, false, 0),
    ("parameterCategory", 1, false, 0),
    ("parameterNumber", 1, false, 0),
    ("typeOfGeneratingProcess", 1, false, 2),
    ("backgroundProcess", 1, false, 255),
    ("generatingProcessIdentifier", 1, false, 255),
    ("hoursAfterDataCutoff", 2, false, 0),
    ("minutesAfterDataCutoff", 1, false, 0),
    ("indicatorOfUnitOfTimeRange", 1, false, 1),
    ("forecastTime", 4, true, 0),
    ("typeOfFirstFixedSurface", 1, false, 1),
    ("scaleFactorOfFirstFixedSurface", 1, true, 0),
    ("scaledValueOfFirstFixedSurface", 4, false, 0),
    ("typeOfSecondFixedSurface", 1, false, 255),
    ("scaleFactorOfSecondFixedSurface", 1, true, 0),
    ("scaledValueOfSecondFixedSurface", 4, false, 0),
    ("typeOfEnsembleForecast", 1, false, 255),
    ("perturbationNumber", 1, false, 0),
    ("numberOfForecastsInEnsemble", 1, false, 255),
    ("yearOfEndOfOverallTimeInterval", 2, false, 1970),
    ("monthOfEndOfOverallTimeInterval", 1, false, 1),
    ("dayOfEndOfOverallTimeInterval", 1, false, 1),
    ("hourOfEndOfOverallTimeInterval", 1, false, 0),
    ("minuteOfEndOfOverallTimeInterval", 1, false, 0),
    ("secondOfEndOfOverallTimeInterval", 1, false, 0),
    ("typeOfStatisticalProcessing", 1, false, 255),
    ("typeOfTimeIncrement", 1, false, 255),
    ("indicatorOfUnitForTimeRange", 1, false, 1),
    ("lengthOfTimeRange", 4, false, 0),
    ("indicatorOfUnitForTimeIncrement", 1, false, 255),
    ("timeIncrement", 4, false, 0),
    // section 5
    ("bitsPerValue", 1, false, BITS_PER_VALUE as i64),
];

/// Product definition templates this crate can write
const PRODUCT_TEMPLATES: &[i64] = &[0, 1, 8, 11];

fn key_spec(key: &str) -> Result<&'static KeySpec> {
    KEYS.iter()
        .find(|(name, ..)| *name == key)
        .ok_or_else(|| ConversionError::UnknownKey {
            key: key.to_string(),
        })
}

/// One GRIB2 message: keyed metadata plus a regular lat/lon slice
#[derive(Debug, Clone, PartialEq)]
pub struct GribMessage {
    keys: BTreeMap<&'static str, i64>,
    latitudes: Vec<f64>,
    longitudes: Vec<f64>,
    values: Vec<f32>,
}

impl GribMessage {
    /// Create a message over a regular grid; `values` are row-major by latitude
    pub fn new(latitudes: Vec<f64>, longitudes: Vec<f64>, values: Vec<f32>) -> Result<Self> {
        if latitudes.len() * longitudes.len() != values.len() {
            return Err(ConversionError::encoding(
                "",
                format!(
                    "{} values do not fill a {}x{} grid",
                    values.len(),
                    latitudes.len(),
                    longitudes.len()
                ),
            ));
        }
        Ok(Self {
            keys: BTreeMap::new(),
            latitudes,
            longitudes,
            values,
        })
    }

    pub fn set_long(&mut self, key: &str, value: i64) -> Result<()> {
        let (name, width, signed, _) = *key_spec(key)?;
        let bits = width as u32 * 8;
        let in_range = if signed {
            let limit = (1i64 << (bits - 1)) - 1;
            (-limit..=limit).contains(&value)
        } else {
            (0..=((1i64 << bits) - 1)).contains(&value)
        };
        let valid_template =
            name != "productDefinitionTemplateNumber" || PRODUCT_TEMPLATES.contains(&value);
        if !in_range || !valid_template {
            return Err(ConversionError::KeyValueOutOfRange {
                key: key.to_string(),
                value,
            });
        }
        self.keys.insert(name, value);
        Ok(())
    }

    /// Current value of a key, its default when never set
    pub fn get_long(&self, key: &str) -> Result<i64> {
        let (name, _, _, default) = *key_spec(key)?;
        Ok(self.keys.get(name).copied().unwrap_or(default))
    }

    fn get(&self, key: &str) -> i64 {
        self.get_long(key).unwrap_or_default()
    }

    pub fn set_reference_time(&mut self, time: NaiveDateTime) -> Result<()> {
        self.set_long("year", time.year() as i64)?;
        self.set_long("month", time.month() as i64)?;
        self.set_long("day", time.day() as i64)?;
        self.set_long("hour", time.hour() as i64)?;
        self.set_long("minute", time.minute() as i64)?;
        self.set_long("second", time.second() as i64)
    }

    pub fn set_end_of_interval(&mut self, time: NaiveDateTime) -> Result<()> {
        self.set_long("yearOfEndOfOverallTimeInterval", time.year() as i64)?;
        self.set_long("monthOfEndOfOverallTimeInterval", time.month() as i64)?;
        self.set_long("dayOfEndOfOverallTimeInterval", time.day() as i64)?;
        self.set_long("hourOfEndOfOverallTimeInterval", time.hour() as i64)?;
        self.set_long("minuteOfEndOfOverallTimeInterval", time.minute() as i64)?;
        self.set_long("secondOfEndOfOverallTimeInterval", time.second() as i64)
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    /// Serialise sections 0 to 8
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let packing = SimplePacking::pack(&self.values, self.get("bitsPerValue") as u8);

        let sections = [
            self.section1(),
            self.section3(),
            self.section4(),
            section5(&packing, self.values.len()),
            section6(&packing),
            section7(&packing),
        ];
        let total = 16 + sections.iter().map(Vec::len).sum::<usize>() + 4;

        let mut message = Vec::with_capacity(total);
        message.extend_from_slice(b"GRIB");
        message.extend_from_slice(&[0, 0]);
        message.push(self.get("discipline") as u8);
        message.push(2);
        message.extend_from_slice(&(total as u64).to_be_bytes());
        for section in &sections {
            message.extend_from_slice(section);
        }
        message.extend_from_slice(b"7777");
        Ok(message)
    }

    fn section1(&self) -> Vec<u8> {
        let mut s = Section::new(1);
        s.u16(self.get("centre"));
        s.u16(self.get("subCentre"));
        s.u8(self.get("tablesVersion"));
        s.u8(self.get("localTablesVersion"));
        s.u8(self.get("significanceOfReferenceTime"));
        s.u16(self.get("year"));
        for key in ["month", "day", "hour", "minute", "second"] {
            s.u8(self.get(key));
        }
        s.u8(self.get("productionStatusOfProcessedData"));
        s.u8(self.get("typeOfProcessedData"));
        s.finish()
    }

    fn section3(&self) -> Vec<u8> {
        let microdegrees = |v: f64| (v * 1e6).round() as i64;
        let longitude = |v: f64| microdegrees(if v < 0.0 { v + 360.0 } else { v });
        let increment = |points: &[f64]| match points {
            [a, b, ..] => microdegrees((b - a).abs()),
            _ => 0xFFFF_FFFF,
        };
        let (lats, lons) = (&self.latitudes, &self.longitudes);
        let first = |p: &[f64]| p.first().copied().unwrap_or_default();
        let last = |p: &[f64]| p.last().copied().unwrap_or_default();

        let mut s = Section::new(3);
        s.u8(0); // grid defined by template
        s.u32(self.values.len() as i64);
        s.u8(0);
        s.u8(0);
        s.u16(0); // template 3.0
        s.u8(self.get("shapeOfTheEarth"));
        s.u8(0);
        s.u32(0);
        s.u8(0);
        s.u32(0);
        s.u8(0);
        s.u32(0);
        s.u32(lons.len() as i64);
        s.u32(lats.len() as i64);
        s.u32(0); // basic angle
        s.u32(0xFFFF_FFFF);
        s.i32(microdegrees(first(lats)));
        s.u32(longitude(first(lons)));
        s.u8(48); // resolution and component flags
        s.i32(microdegrees(last(lats)));
        s.u32(longitude(last(lons)));
        s.u32(increment(lons));
        s.u32(increment(lats));
        // +i, and +j when latitudes ascend
        let ascending = lats.len() > 1 && lats[1] > lats[0];
        s.u8(if ascending { 0x40 } else { 0x00 });
        s.finish()
    }

    fn section4(&self) -> Vec<u8> {
        let template = self.get("productDefinitionTemplateNumber");
        let ensemble = matches!(template, 1 | 11);
        let interval = matches!(template, 8 | 11);

        let mut s = Section::new(4);
        s.u16(0); // no coordinate values
        s.u16(template);
        s.u8(self.get("parameterCategory"));
        s.u8(self.get("parameterNumber"));
        s.u8(self.get("typeOfGeneratingProcess"));
        s.u8(self.get("backgroundProcess"));
        s.u8(self.get("generatingProcessIdentifier"));
        s.u16(self.get("hoursAfterDataCutoff"));
        s.u8(self.get("minutesAfterDataCutoff"));
        s.u8(self.get("indicatorOfUnitOfTimeRange"));
        s.i32(self.get("forecastTime"));
        s.u8(self.get("typeOfFirstFixedSurface"));
        s.i8(self.get("scaleFactorOfFirstFixedSurface"));
        s.u32(self.get("scaledValueOfFirstFixedSurface"));
        s.u8(self.get("typeOfSecondFixedSurface"));
        s.i8(self.get("scaleFactorOfSecondFixedSurface"));
        s.u32(self.get("scaledValueOfSecondFixedSurface"));

        if ensemble {
            s.u8(self.get("typeOfEnsembleForecast"));
            s.u8(self.get("perturbationNumber"));
            s.u8(self.get("numberOfForecastsInEnsemble"));
        }
        if interval {
            s.u16(self.get("yearOfEndOfOverallTimeInterval"));
            for key in [
                "monthOfEndOfOverallTimeInterval",
                "dayOfEndOfOverallTimeInterval",
                "hourOfEndOfOverallTimeInterval",
                "minuteOfEndOfOverallTimeInterval",
                "secondOfEndOfOverallTimeInterval",
            ] {
                s.u8(self.get(key));
            }
            s.u8(1); // one time range
            s.u32(0); // no missing values in the statistical process
            s.u8(self.get("typeOfStatisticalProcessing"));
            s.u8(self.get("typeOfTimeIncrement"));
            s.u8(self.get("indicatorOfUnitForTimeRange"));
            s.u32(self.get("lengthOfTimeRange"));
            s.u8(self.get("indicatorOfUnitForTimeIncrement"));
            s.u32(self.get("timeIncrement"));
        }
        s.finish()
    }
}

fn section5(packing: &SimplePacking, _points: usize) -> Vec<u8> {
    let mut s = Section::new(5);
    s.u32(packing.packed_count as i64);
    s.u16(0); // template 5.0
    s.bytes(&packing.reference_value.to_be_bytes());
    s.i16(packing.binary_scale_factor as i64);
    s.i16(packing.decimal_scale_factor as i64);
    s.u8(packing.bits_per_value as i64);
    s.u8(0); // floating point values
    s.finish()
}

fn section6(packing: &SimplePacking) -> Vec<u8> {
    let mut s = Section::new(6);
    match &packing.bitmap {
        Some(bitmap) => {
            s.u8(0);
            s.bytes(bitmap);
        }
        None => s.u8(MISSING_OCTET as i64),
    }
    s.finish()
}

fn section7(packing: &SimplePacking) -> Vec<u8> {
    let mut s = Section::new(7);
    s.bytes(&packing.data);
    s.finish()
}

/// Section body builder; signed integers use GRIB's sign-and-magnitude form
struct Section {
    body: Vec<u8>,
}

impl Section {
    fn new(number: u8) -> Self {
        // length placeholder, patched in finish
        Self {
            body: vec![0, 0, 0, 0, number],
        }
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.body.extend_from_slice(bytes);
    }

    fn unsigned(&mut self, value: i64, width: usize) {
        let raw = (value as u64).to_be_bytes();
        self.body.extend_from_slice(&raw[8 - width..]);
    }

    fn signed(&mut self, value: i64, width: usize) {
        let sign = if value < 0 { 1u64 << (width * 8 - 1) } else { 0 };
        self.unsigned((value.unsigned_abs() | sign) as i64, width);
    }

    fn u8(&mut self, value: i64) {
        self.unsigned(value, 1);
    }

    fn u16(&mut self, value: i64) {
        self.unsigned(value, 2);
    }

    fn u32(&mut self, value: i64) {
        self.unsigned(value, 4);
    }

    fn i8(&mut self, value: i64) {
        self.signed(value, 1);
    }

    fn i16(&mut self, value: i64) {
        self.signed(value, 2);
    }

    fn i32(&mut self, value: i64) {
        self.signed(value, 4);
    }

    fn finish(mut self) -> Vec<u8> {
        let length = (self.body.len() as u32).to_be_bytes();
        self.body[..4].copy_from_slice(&length);
        self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message() -> GribMessage {
        GribMessage::new(
            vec![0.0, 1.0],
            vec![0.0, 1.0, 2.0],
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0],
        )
        .unwrap()
    }

    /// Offsets of each section in a serialised message
    fn sections(bytes: &[u8]) -> Vec<(u8, usize, usize)> {
        let mut found = Vec::new();
        let mut offset = 16;
        while &bytes[offset..offset + 4] != b"7777" {
            let len = u32::from_be_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
            found.push((bytes[offset + 4], offset, len));
            offset += len;
        }
        found
    }

    #[test]
    fn test_unknown_and_out_of_range_keys() {
        let mut msg = message();
        assert!(matches!(
            msg.set_long("shortName", 1),
            Err(ConversionError::UnknownKey { .. })
        ));
        assert!(matches!(
            msg.set_long("perturbationNumber", 256),
            Err(ConversionError::KeyValueOutOfRange { .. })
        ));
        assert!(msg.set_long("productDefinitionTemplateNumber", 2).is_err());
        assert!(msg.get_long("nope").is_err());
    }

    #[test]
    fn test_defaults_and_overrides() {
        let mut msg = message();
        assert_eq!(msg.get_long("numberOfForecastsInEnsemble").unwrap(), 255);
        msg.set_long("centre", 29).unwrap();
        assert_eq!(msg.get_long("centre").unwrap(), 29);
    }

    #[test]
    fn test_message_layout_point_template() {
        let mut msg = message();
        msg.set_long("productDefinitionTemplateNumber", 1).unwrap();
        msg.set_long("perturbationNumber", 7).unwrap();
        let bytes = msg.to_bytes().unwrap();

        assert_eq!(&bytes[..4], b"GRIB");
        assert_eq!(bytes[7], 2);
        let total = u64::from_be_bytes(bytes[8..16].try_into().unwrap()) as usize;
        assert_eq!(total, bytes.len());
        assert_eq!(&bytes[bytes.len() - 4..], b"7777");

        let layout = sections(&bytes);
        let numbers: Vec<u8> = layout.iter().map(|(n, ..)| *n).collect();
        assert_eq!(numbers, vec![1, 3, 4, 5, 6, 7]);
        assert_eq!(layout[0].2, 21);
        assert_eq!(layout[1].2, 72);
        assert_eq!(layout[2].2, 37);
        assert_eq!(layout[3].2, 21);

        let (_, sec4, _) = layout[2];
        assert_eq!(bytes[sec4 + 35], 7);
        // ascending latitudes scan +j
        let (_, sec3, len3) = layout[1];
        assert_eq!(bytes[sec3 + len3 - 1], 0x40);
    }

    #[test]
    fn test_interval_template_length() {
        let mut msg = message();
        msg.set_long("productDefinitionTemplateNumber", 11).unwrap();
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(sections(&bytes)[2].2, 61);

        msg.set_long("productDefinitionTemplateNumber", 8).unwrap();
        let bytes = msg.to_bytes().unwrap();
        assert_eq!(sections(&bytes)[2].2, 58);
    }

    #[test]
    fn test_negative_values_use_sign_and_magnitude() {
        let msg = GribMessage::new(vec![-1.0, 0.0], vec![0.0], vec![1.0, 2.0]).unwrap();
        let bytes = msg.to_bytes().unwrap();
        let (_, sec3, _) = sections(&bytes)[1];
        // La1 at octet 47 of section 3
        assert_eq!(&bytes[sec3 + 46..sec3 + 50], &[0x80, 0x0F, 0x42, 0x40]);
    }

    #[test]
    fn test_bitmap_section_when_values_missing() {
        let msg = GribMessage::new(vec![0.0, 1.0], vec![0.0], vec![1.0, f32::NAN]).unwrap();
        let bytes = msg.to_bytes().unwrap();
        let layout = sections(&bytes);
        let (_, sec6, len6) = layout[4];
        assert_eq!(len6, 7);
        assert_eq!(bytes[sec6 + 5], 0);
        assert_eq!(bytes[sec6 + 6], 0b1000_0000);
    }
}
