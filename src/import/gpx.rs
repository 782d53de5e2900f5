use chrono::{DateTime, NaiveDateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

use crate::error::ParseError;
use crate::import::validation::TrackValidator;
use crate::import::{decompress_if_gzipped, Format, TrackAdapter};
use crate::models::{ParsedTrack, TrackPoint};

const FORMAT: &str = "GPX";

/// GPX importer built on a streaming XML event reader.
///
/// Reads `trkpt`/`rtept` elements of a namespaced `gpx` document. Sensor
/// values are taken from per-point `extensions` blocks by local name, so
/// Garmin `TrackPointExtension`, Cluetrust and plain `power` layouts all
/// merge into the same point.
pub struct GpxAdapter;

impl TrackAdapter for GpxAdapter {
    fn format(&self) -> Format {
        Format::Trackpoint
    }

    fn parse(&self, bytes: &[u8]) -> Result<ParsedTrack, ParseError> {
        let bytes = decompress_if_gzipped(bytes, Format::Trackpoint)?;
        let parsed = GpxDocument::read(&bytes)?;

        let mut track = ParsedTrack::new(parsed.points)?;
        track.name = parsed.name;
        track.activity_type = parsed.activity_type;

        tracing::debug!(
            points = track.points.len(),
            timed = track.is_timed(),
            "Parsed GPX track"
        );
        Ok(track)
    }
}

#[derive(Default)]
struct GpxDocument {
    points: Vec<TrackPoint>,
    name: Option<String>,
    activity_type: Option<String>,
}

impl GpxDocument {
    fn read(bytes: &[u8]) -> Result<Self, ParseError> {
        let mut reader = Reader::from_reader(bytes);
        reader.trim_text(true);

        let mut doc = GpxDocument::default();
        let mut buf = Vec::new();
        let mut stack: Vec<String> = Vec::new();
        let mut text = String::new();
        let mut current: Option<TrackPoint> = None;
        let mut seen_root = false;

        loop {
            let event = reader.read_event_into(&mut buf).map_err(|e| {
                ParseError::malformed(
                    FORMAT,
                    format!("XML error at position {}: {}", reader.buffer_position(), e),
                )
            })?;

            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let is_empty = matches!(event, Event::Empty(_));
                    let name = local_name(e);
                    if !seen_root {
                        Self::check_root(e, &name)?;
                        seen_root = true;
                    }

                    if name == "trkpt" || name == "rtept" {
                        let point = Self::start_point(e)?;
                        if is_empty {
                            doc.push_point(point);
                        } else {
                            current = Some(point);
                        }
                    }

                    if !is_empty {
                        stack.push(name);
                    }
                    text.clear();
                }

                Event::Text(ref e) => {
                    let unescaped = e
                        .unescape()
                        .map_err(|err| ParseError::malformed(FORMAT, err))?;
                    text.push_str(&unescaped);
                }

                Event::CData(ref e) => {
                    text.push_str(&String::from_utf8_lossy(e));
                }

                Event::End(_) => {
                    let name = stack.pop().unwrap_or_default();
                    let parent = stack.last().map(String::as_str).unwrap_or("");

                    if name == "trkpt" || name == "rtept" {
                        if let Some(point) = current.take() {
                            doc.push_point(point);
                        }
                    } else if let Some(point) = current.as_mut() {
                        Self::apply_point_field(point, &name, &text)?;
                    } else if parent == "trk" || parent == "rte" {
                        let value = text.trim();
                        if !value.is_empty() {
                            match name.as_str() {
                                "name" => doc.name = Some(value.to_string()),
                                "type" => doc.activity_type = Some(value.to_string()),
                                _ => {}
                            }
                        }
                    }
                    text.clear();
                }

                Event::Eof => break,
                _ => {}
            }

            buf.clear();
        }

        if !seen_root {
            return Err(ParseError::malformed(FORMAT, "document is empty"));
        }
        if !stack.is_empty() {
            return Err(ParseError::malformed(
                FORMAT,
                format!("unexpected end of document inside <{}>", stack.join("/")),
            ));
        }

        Ok(doc)
    }

    fn push_point(&mut self, mut point: TrackPoint) {
        TrackValidator::clean_point(&mut point);
        self.points.push(point);
    }

    fn check_root(e: &BytesStart, name: &str) -> Result<(), ParseError> {
        if name != "gpx" {
            return Err(ParseError::malformed(
                FORMAT,
                format!("root element is <{}>, expected <gpx>", name),
            ));
        }
        let namespaced = e.attributes().flatten().any(|attr| {
            let key = attr.key.as_ref();
            key == b"xmlns" || key.starts_with(b"xmlns:")
        });
        if !namespaced {
            return Err(ParseError::malformed(FORMAT, "<gpx> carries no namespace"));
        }
        Ok(())
    }

    fn start_point(e: &BytesStart) -> Result<TrackPoint, ParseError> {
        let mut lat = None;
        let mut lon = None;

        for attr in e.attributes() {
            let attr = attr.map_err(|err| ParseError::malformed(FORMAT, err))?;
            let value = attr
                .unescape_value()
                .map_err(|err| ParseError::malformed(FORMAT, err))?;
            match attr.key.local_name().as_ref() {
                b"lat" => lat = Some(TrackValidator::parse_finite("latitude", &value)?),
                b"lon" => lon = Some(TrackValidator::parse_finite("longitude", &value)?),
                _ => {}
            }
        }

        match (lat, lon) {
            (Some(lat), Some(lon)) => {
                TrackValidator::check_coordinate(lat, lon)?;
                Ok(TrackPoint::at(lat, lon))
            }
            _ => Err(ParseError::malformed(
                FORMAT,
                "track point without lat/lon attributes",
            )),
        }
    }

    /// Merge a closed child element of a point into it
    fn apply_point_field(point: &mut TrackPoint, name: &str, text: &str) -> Result<(), ParseError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        match name {
            "ele" => point.elevation = Some(TrackValidator::parse_finite("elevation", text)?),
            "time" => point.timestamp = Some(parse_time(text)?),
            "hr" | "heartrate" => {
                point.heart_rate = Some(TrackValidator::parse_sensor("heart_rate", text)?)
            }
            "cad" | "cadence" => point.cadence = Some(TrackValidator::parse_sensor("cadence", text)?),
            "power" | "PowerInWatts" | "watts" => {
                point.power = Some(TrackValidator::parse_sensor("power", text)?)
            }
            "atemp" | "temp" | "temperature" => {
                point.temperature = Some(TrackValidator::parse_finite("temperature", text)?)
            }
            "speed" => point.speed = Some(TrackValidator::parse_finite("speed", text)?),
            _ => {}
        }
        Ok(())
    }
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// RFC 3339 timestamps; zone-less timestamps are taken as UTC
fn parse_time(text: &str) -> Result<DateTime<Utc>, ParseError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|_| ParseError::malformed(FORMAT, format!("invalid timestamp '{}'", text)))
}
