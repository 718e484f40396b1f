use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::table::{columns_to_array, TabularArray};
use crate::trackpoint::{read_trackpoint, TrackpointFields};
use crate::xml::{Element, TagMatcher};
use crate::TcxError;

/// Parallel per-field sequences for one activity. Every sequence has one
/// entry per complete trackpoint.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleColumns {
    pub lon: Vec<f64>,
    pub lat: Vec<f64>,
    pub altitude: Vec<f64>,
    pub distance: Vec<f64>,
    pub time: Vec<String>,
}

impl SampleColumns {
    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    /// Append a trackpoint when all five fields are present; partial
    /// trackpoints are dropped as a whole.
    pub fn push(&mut self, fields: TrackpointFields) -> bool {
        match fields {
            TrackpointFields {
                time: Some(time),
                distance: Some(distance),
                altitude: Some(altitude),
                lat: Some(lat),
                lon: Some(lon),
                ..
            } => {
                self.lon.push(lon);
                self.lat.push(lat);
                self.altitude.push(altitude);
                self.distance.push(distance);
                self.time.push(time);
                true
            }
            _ => false,
        }
    }
}

/// Walk every trackpoint below `activity` in document order.
pub fn activity_to_columns(
    activity: &Element,
    tags: &TagMatcher,
) -> Result<SampleColumns, TcxError> {
    let mut columns = SampleColumns::default();
    for tp in activity.descendants_named(tags, "Trackpoint") {
        let fields = read_trackpoint(tp, tags)?;
        if !columns.push(fields) {
            debug!("Dropping partial trackpoint: {}", tp.describe_children());
        }
    }
    Ok(columns)
}

/// Borrowed view of one `<Activity>` element.
#[derive(Clone, Copy, Debug)]
pub struct Activity<'a> {
    element: &'a Element,
    tags: &'a TagMatcher,
}

impl<'a> Activity<'a> {
    pub fn new(element: &'a Element, tags: &'a TagMatcher) -> Self {
        Self { element, tags }
    }

    pub fn laps(&self) -> impl Iterator<Item = &'a Element> + 'a {
        self.element.children_named(self.tags, "Lap")
    }

    pub fn first_lap(&self) -> Option<&'a Element> {
        self.laps().next()
    }

    pub fn lap_start_times(&self) -> Vec<&'a str> {
        self.laps()
            .filter_map(|lap| lap.attribute("StartTime"))
            .collect()
    }

    pub fn to_columns(&self) -> Result<SampleColumns, TcxError> {
        activity_to_columns(self.element, self.tags)
    }

    pub fn to_array(&self) -> Result<TabularArray, TcxError> {
        columns_to_array(&self.to_columns()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ParseOptions;
    use crate::xml::Document;

    const ACTIVITY: &str = r#"<TrainingCenterDatabase xmlns="http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2">
<Activities><Activity Sport="Running">
  <Lap StartTime="2013-06-06T16:02:31Z"><Track>
    <Trackpoint>
      <Time>2013-06-06T16:02:31Z</Time>
      <Position><LatitudeDegrees>40.0</LatitudeDegrees><LongitudeDegrees>-105.0</LongitudeDegrees></Position>
      <AltitudeMeters>1700.0</AltitudeMeters>
      <DistanceMeters>0.0</DistanceMeters>
    </Trackpoint>
    <Trackpoint>
      <Time>2013-06-06T16:02:41Z</Time>
      <AltitudeMeters>1701.0</AltitudeMeters>
      <DistanceMeters>30.0</DistanceMeters>
    </Trackpoint>
  </Track></Lap>
  <Lap StartTime="2013-06-06T16:10:00Z"><Track>
    <Trackpoint>
      <Time>2013-06-06T16:10:00Z</Time>
      <Position><LatitudeDegrees>40.1</LatitudeDegrees><LongitudeDegrees>-105.1</LongitudeDegrees></Position>
      <AltitudeMeters>1710.0</AltitudeMeters>
      <DistanceMeters>900.0</DistanceMeters>
    </Trackpoint>
  </Track></Lap>
</Activity></Activities>
</TrainingCenterDatabase>"#;

    #[test]
    fn test_partial_trackpoints_are_dropped_whole() {
        let doc = Document::parse(ACTIVITY, &ParseOptions::default()).unwrap();
        let activity = doc.descendants_named("Activity").next().unwrap();
        let columns = activity_to_columns(activity, doc.tags()).unwrap();

        assert_eq!(columns.len(), 2);
        assert_eq!(columns.lat, vec![40.0, 40.1]);
        assert_eq!(columns.lon, vec![-105.0, -105.1]);
        assert_eq!(columns.altitude, vec![1700.0, 1710.0]);
        assert_eq!(columns.distance, vec![0.0, 900.0]);
        assert_eq!(
            columns.time,
            vec!["2013-06-06T16:02:31Z", "2013-06-06T16:10:00Z"]
        );
    }

    #[test]
    fn test_lap_start_times() {
        let doc = Document::parse(ACTIVITY, &ParseOptions::default()).unwrap();
        let el = doc.descendants_named("Activity").next().unwrap();
        let activity = Activity::new(el, doc.tags());
        assert_eq!(
            activity.lap_start_times(),
            vec!["2013-06-06T16:02:31Z", "2013-06-06T16:10:00Z"]
        );
        assert_eq!(
            activity.first_lap().and_then(|lap| lap.attribute("StartTime")),
            Some("2013-06-06T16:02:31Z")
        );
        assert_eq!(activity.to_array().unwrap().len(), 2);
    }
}
