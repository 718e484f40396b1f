use serde::{Deserialize, Serialize};

use crate::xml::{Element, TagMatcher};
use crate::TcxError;

/// Fields found on one `<Trackpoint>`. Missing children stay `None`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackpointFields {
    pub time: Option<String>,
    pub distance: Option<f64>,
    pub altitude: Option<f64>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub hr_bpm: Option<u32>,
}

impl TrackpointFields {
    /// True when time, distance, altitude and both coordinates are present.
    pub fn is_complete(&self) -> bool {
        self.time.is_some()
            && self.distance.is_some()
            && self.altitude.is_some()
            && self.lat.is_some()
            && self.lon.is_some()
    }

    /// `(lat, lon)` when both coordinates are present.
    pub fn position(&self) -> Option<(f64, f64)> {
        Some((self.lat?, self.lon?))
    }
}

/// Read the sample fields of one trackpoint. Absent children are not an
/// error; numeric text that fails to parse is.
pub fn read_trackpoint(tp: &Element, tags: &TagMatcher) -> Result<TrackpointFields, TcxError> {
    let mut fields = TrackpointFields::default();
    for child in &tp.children {
        if tags.is(child, "Time") {
            fields.time = child.text().map(str::to_string);
        } else if tags.is(child, "DistanceMeters") {
            fields.distance = parse_f64(child, "DistanceMeters")?;
        } else if tags.is(child, "AltitudeMeters") {
            fields.altitude = parse_f64(child, "AltitudeMeters")?;
        } else if tags.is(child, "Position") {
            if let Some(lat) = child.child(tags, "LatitudeDegrees") {
                fields.lat = parse_f64(lat, "LatitudeDegrees")?;
            }
            if let Some(lon) = child.child(tags, "LongitudeDegrees") {
                fields.lon = parse_f64(lon, "LongitudeDegrees")?;
            }
        } else if tags.is(child, "HeartRateBpm") {
            // TCX nests the value in <Value>; some exporters write it inline.
            let value = child.child(tags, "Value").unwrap_or(child);
            fields.hr_bpm = parse_u32(value, "HeartRateBpm")?;
        }
    }
    Ok(fields)
}

fn parse_f64(el: &Element, element: &'static str) -> Result<Option<f64>, TcxError> {
    el.text()
        .map(|text| {
            text.parse::<f64>().map_err(|_| TcxError::InvalidNumber {
                element,
                value: text.to_string(),
            })
        })
        .transpose()
}

fn parse_u32(el: &Element, element: &'static str) -> Result<Option<u32>, TcxError> {
    el.text()
        .map(|text| {
            text.parse::<u32>().map_err(|_| TcxError::InvalidNumber {
                element,
                value: text.to_string(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParseOptions;
    use crate::xml::Document;

    fn first_trackpoint(xml: &str) -> TrackpointFields {
        let doc = Document::parse(xml, &ParseOptions::default()).unwrap();
        let tp = doc.descendants_named("Trackpoint").next().unwrap();
        read_trackpoint(tp, doc.tags()).unwrap()
    }

    #[test]
    fn test_read_full_trackpoint() {
        let fields = first_trackpoint(
            r#"<TrainingCenterDatabase xmlns="http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2">
  <Trackpoint>
    <Time>2013-06-06T16:02:31Z</Time>
    <Position>
      <LatitudeDegrees>40.020631</LatitudeDegrees>
      <LongitudeDegrees>-105.296255</LongitudeDegrees>
    </Position>
    <AltitudeMeters>1712.4</AltitudeMeters>
    <DistanceMeters>12.5</DistanceMeters>
    <HeartRateBpm><Value>141</Value></HeartRateBpm>
  </Trackpoint>
</TrainingCenterDatabase>"#,
        );
        assert!(fields.is_complete());
        assert_eq!(fields.time.as_deref(), Some("2013-06-06T16:02:31Z"));
        assert_eq!(fields.lat, Some(40.020631));
        assert_eq!(fields.lon, Some(-105.296255));
        assert_eq!(fields.position(), Some((40.020631, -105.296255)));
        assert_eq!(fields.altitude, Some(1712.4));
        assert_eq!(fields.distance, Some(12.5));
        assert_eq!(fields.hr_bpm, Some(141));
    }

    #[test]
    fn test_missing_children_are_omitted() {
        let fields = first_trackpoint(
            "<Db><Trackpoint><Time>2013-06-06T16:02:31Z</Time><AltitudeMeters/></Trackpoint></Db>",
        );
        assert!(!fields.is_complete());
        assert_eq!(fields.position(), None);
        assert_eq!(fields.altitude, None);
        assert_eq!(fields.distance, None);
        assert_eq!(fields.hr_bpm, None);
    }

    #[test]
    fn test_inline_heart_rate() {
        let fields =
            first_trackpoint("<Db><Trackpoint><HeartRateBpm>128</HeartRateBpm></Trackpoint></Db>");
        assert_eq!(fields.hr_bpm, Some(128));
    }

    #[test]
    fn test_malformed_number_propagates() {
        let doc = Document::parse(
            "<Db><Trackpoint><DistanceMeters>twelve</DistanceMeters></Trackpoint></Db>",
            &ParseOptions::default(),
        )
        .unwrap();
        let tp = doc.descendants_named("Trackpoint").next().unwrap();
        let err = read_trackpoint(tp, doc.tags()).unwrap_err();
        assert!(matches!(
            err,
            TcxError::InvalidNumber {
                element: "DistanceMeters",
                ..
            }
        ));
    }
}
