use chrono::Utc;
use fitparser::profile::MesgNum;
use fitparser::{FitDataField, FitDataRecord, Value};

use crate::error::ParseError;
use crate::import::validation::TrackValidator;
use crate::import::{decompress_if_gzipped, Format, TrackAdapter};
use crate::models::{ParsedTrack, TrackPoint};

const FORMAT: &str = "FIT";

/// Degrees per semicircle: 180 / 2^31
const SEMICIRCLE_TO_DEGREES: f64 = 180.0 / 2_147_483_648.0;

/// FIT importer for device telemetry, plain or gzip-wrapped
pub struct FitAdapter;

impl TrackAdapter for FitAdapter {
    fn format(&self) -> Format {
        Format::BinaryTelemetry
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParsedTrack, ParseError> {
        let bytes = decompress_if_gzipped(bytes, Format::BinaryTelemetry)?;
        let messages: Vec<FitDataRecord> =
            fitparser::from_bytes(&bytes).map_err(|e| ParseError::malformed(FORMAT, e))?;

        let mut points = Vec::new();
        let mut activity_type = None;

        for message in &messages {
            match message.kind() {
                MesgNum::Record => {
                    let mut point = Self::record_to_point(message.fields())?;
                    TrackValidator::clean_point(&mut point);
                    points.push(point);
                }
                MesgNum::Session | MesgNum::Sport if activity_type.is_none() => {
                    activity_type = Self::sport(message.fields());
                }
                _ => {}
            }
        }

        // Device clock corrections can emit records slightly out of order
        if points.iter().all(|p| p.timestamp.is_some()) {
            points.sort_by_key(|p| p.timestamp);
        }

        let mut track = ParsedTrack::new(points)?;
        track.activity_type = activity_type;

        tracing::debug!(
            records = messages.len(),
            points = track.points.len(),
            "Parsed FIT activity"
        );
        Ok(track)
    }
}

impl FitAdapter {
    fn record_to_point(fields: &[FitDataField]) -> Result<TrackPoint, ParseError> {
        let mut point = TrackPoint::default();
        let mut lat = None;
        let mut lon = None;

        for field in fields {
            let value = field.value();
            match field.name() {
                "timestamp" => {
                    if let Value::Timestamp(ts) = value {
                        point.timestamp = Some(ts.with_timezone(&Utc));
                    }
                }
                "position_lat" => lat = fit_value_to_f64(value).map(|v| v * SEMICIRCLE_TO_DEGREES),
                "position_long" => lon = fit_value_to_f64(value).map(|v| v * SEMICIRCLE_TO_DEGREES),
                // Enhanced fields carry the same quantity at higher range
                "enhanced_altitude" => point.elevation = finite("altitude", value)?,
                "altitude" if point.elevation.is_none() => point.elevation = finite("altitude", value)?,
                "enhanced_speed" => point.speed = finite("speed", value)?,
                "speed" if point.speed.is_none() => point.speed = finite("speed", value)?,
                "heart_rate" => point.heart_rate = sensor(value),
                "cadence" => point.cadence = sensor(value),
                "power" => point.power = sensor(value),
                "temperature" => point.temperature = finite("temperature", value)?,
                "grade" => point.grade = finite("grade", value)?,
                "vertical_speed" => point.vertical_speed = finite("vertical_speed", value)?,
                _ => {}
            }
        }

        // A record with only one coordinate is not a position
        if let (Some(lat), Some(lon)) = (lat, lon) {
            TrackValidator::check_coordinate(lat, lon)?;
            point.latitude = Some(lat);
            point.longitude = Some(lon);
        }

        Ok(point)
    }

    fn sport(fields: &[FitDataField]) -> Option<String> {
        fields
            .iter()
            .find(|field| field.name() == "sport")
            .and_then(|field| match field.value() {
                Value::String(s) => Some(s.clone()),
                Value::Enum(1) | Value::UInt8(1) => Some("running".to_string()),
                other => fit_value_to_f64(other).map(|v| format!("sport {}", v)),
            })
    }
}

fn finite(field: &str, value: &Value) -> Result<Option<f64>, ParseError> {
    match fit_value_to_f64(value) {
        Some(v) if !v.is_finite() => Err(ParseError::InvalidNumericValue {
            field: field.to_string(),
            value: v.to_string(),
        }),
        other => Ok(other),
    }
}

fn sensor(value: &Value) -> Option<u16> {
    fit_value_to_f64(value)
        .filter(|v| v.is_finite() && *v >= 0.0 && *v <= f64::from(u16::MAX))
        .map(|v| v.round() as u16)
}

fn fit_value_to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Float32(v) => Some(*v as f64),
        Value::Float64(v) => Some(*v),
        Value::SInt8(v) => Some(*v as f64),
        Value::SInt16(v) => Some(*v as f64),
        Value::SInt32(v) => Some(*v as f64),
        Value::SInt64(v) => Some(*v as f64),
        Value::UInt8(v) | Value::UInt8z(v) | Value::Byte(v) | Value::Enum(v) => Some(*v as f64),
        Value::UInt16(v) | Value::UInt16z(v) => Some(*v as f64),
        Value::UInt32(v) | Value::UInt32z(v) => Some(*v as f64),
        Value::UInt64(v) | Value::UInt64z(v) => Some(*v as f64),
        Value::Array(values) => values.iter().find_map(fit_value_to_f64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const FIT_EPOCH_OFFSET: i64 = 631_065_600;

    const CRC_TABLE: [u16; 16] = [
        0x0000, 0xCC01, 0xD801, 0x1400, 0xF001, 0x3C00, 0x2800, 0xE401, 0xA001, 0x6C00, 0x7800,
        0xB401, 0x5000, 0x9C01, 0x8801, 0x4400,
    ];

    fn crc(bytes: &[u8]) -> u16 {
        bytes.iter().fold(0u16, |mut crc, &byte| {
            let tmp = CRC_TABLE[(crc & 0xF) as usize];
            crc = (crc >> 4) & 0x0FFF;
            crc = crc ^ tmp ^ CRC_TABLE[(byte & 0xF) as usize];
            let tmp = CRC_TABLE[(crc & 0xF) as usize];
            crc = (crc >> 4) & 0x0FFF;
            crc ^ tmp ^ CRC_TABLE[((byte >> 4) & 0xF) as usize]
        })
    }

    /// Minimal FIT file: record messages with timestamp, position and heart
    /// rate, followed by a session message carrying the sport.
    fn build_fit(samples: &[(u32, i32, i32, u8)], sport: u8) -> Vec<u8> {
        let mut data = Vec::new();

        // Definition, local 0 -> record (20)
        data.extend_from_slice(&[0x40, 0, 0]);
        data.extend_from_slice(&20u16.to_le_bytes());
        data.push(4);
        data.extend_from_slice(&[253, 4, 0x86, 0, 4, 0x85, 1, 4, 0x85, 3, 1, 0x02]);

        for &(ts, lat, lon, hr) in samples {
            data.push(0x00);
            data.extend_from_slice(&ts.to_le_bytes());
            data.extend_from_slice(&lat.to_le_bytes());
            data.extend_from_slice(&lon.to_le_bytes());
            data.push(hr);
        }

        // Definition, local 1 -> session (18)
        data.extend_from_slice(&[0x41, 0, 0]);
        data.extend_from_slice(&18u16.to_le_bytes());
        data.push(1);
        data.extend_from_slice(&[5, 1, 0x00]);
        data.extend_from_slice(&[0x01, sport]);

        let mut file = vec![14u8, 0x20];
        file.extend_from_slice(&2093u16.to_le_bytes());
        file.extend_from_slice(&(data.len() as u32).to_le_bytes());
        file.extend_from_slice(b".FIT");
        let header_crc = crc(&file);
        file.extend_from_slice(&header_crc.to_le_bytes());
        file.extend_from_slice(&data);
        let file_crc = crc(&file);
        file.extend_from_slice(&file_crc.to_le_bytes());
        file
    }

    fn semicircles(degrees: f64) -> i32 {
        (degrees / SEMICIRCLE_TO_DEGREES).round() as i32
    }

    #[test]
    fn test_semicircle_conversion() {
        assert_eq!(2_147_483_647.0 * SEMICIRCLE_TO_DEGREES, 180.0 - SEMICIRCLE_TO_DEGREES);
        assert!((semicircles(45.0) as f64 * SEMICIRCLE_TO_DEGREES - 45.0).abs() < 1e-7);
    }

    #[test]
    fn test_parse_records() {
        let base = 1_000_000_000u32;
        let bytes = build_fit(
            &[
                (base, semicircles(45.0), semicircles(7.0), 120),
                (base + 5, semicircles(45.0001), semicircles(7.0), 125),
                (base + 10, semicircles(45.0002), semicircles(7.0), 131),
            ],
            1,
        );

        let track = FitAdapter.parse(&bytes).unwrap();
        assert_eq!(track.points.len(), 3);
        assert!(track.is_timed());
        assert_eq!(track.activity_type.as_deref(), Some("running"));

        let first = &track.points[0];
        assert_eq!(
            first.timestamp,
            Some(Utc.timestamp_opt(FIT_EPOCH_OFFSET + base as i64, 0).unwrap())
        );
        let (lat, lon) = first.position().unwrap();
        assert!((lat - 45.0).abs() < 1e-6);
        assert!((lon - 7.0).abs() < 1e-6);
        assert_eq!(first.heart_rate, Some(120));
        // Missing fields stay unset
        assert_eq!(first.power, None);
        assert_eq!(first.elevation, None);
        assert_eq!(first.speed, None);
    }

    #[test]
    fn test_gzip_wrapped_file() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let bytes = build_fit(
            &[
                (1_000_000_000, semicircles(45.0), semicircles(7.0), 120),
                (1_000_000_005, semicircles(45.0001), semicircles(7.0), 121),
            ],
            1,
        );
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&bytes).unwrap();
        let compressed = encoder.finish().unwrap();

        let track = FitAdapter.parse(&compressed).unwrap();
        assert_eq!(track.points.len(), 2);
    }

    #[test]
    fn test_non_run_sport_is_reported() {
        let bytes = build_fit(
            &[
                (1_000_000_000, semicircles(45.0), semicircles(7.0), 120),
                (1_000_000_005, semicircles(45.0001), semicircles(7.0), 121),
            ],
            2,
        );
        let track = FitAdapter.parse(&bytes).unwrap();
        assert_eq!(track.activity_type.as_deref(), Some("cycling"));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let err = FitAdapter.parse(b"definitely not a fit file").unwrap_err();
        assert!(matches!(err, ParseError::MalformedFile { .. }));
    }

    #[test]
    fn test_single_record_is_insufficient() {
        let bytes = build_fit(&[(1_000_000_000, semicircles(45.0), semicircles(7.0), 120)], 1);
        assert_eq!(
            FitAdapter.parse(&bytes),
            Err(ParseError::InsufficientPoints { found: 1 })
        );
    }
}
