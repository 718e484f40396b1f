//! Activity search by start and end coordinate.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::activity::Activity;
use crate::config::{LocatorParams, Metric, ParseOptions};
use crate::table::TabularArray;
use crate::trackpoint::read_trackpoint;
use crate::xml::{Document, Element, TagMatcher};
use crate::TcxError;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct GeoPoint {
    pub lat: f64,
    pub lon: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }
}

/// `(Δlon)² + (Δlat)²` in degrees. Only meaningful over small areas.
pub fn squared_degree_distance(a: GeoPoint, b: GeoPoint) -> f64 {
    (a.lon - b.lon).powi(2) + (a.lat - b.lat).powi(2)
}

impl Metric {
    pub fn distance(self, point: GeoPoint, target: GeoPoint) -> f64 {
        match self {
            Metric::SquaredDegrees => squared_degree_distance(point, target),
            Metric::ScaledDegrees => {
                let dlon = (point.lon - target.lon) * target.lat.to_radians().cos();
                dlon.powi(2) + (point.lat - target.lat).powi(2)
            }
        }
    }
}

/// An activity whose first lap starts near the search target.
#[derive(Clone, Debug)]
pub struct LocatedActivity<'a> {
    pub start_time: String,
    pub start: GeoPoint,
    pub distance: f64,
    pub activity: Activity<'a>,
}

/// A parsed master file holding every recorded activity.
#[derive(Clone, Debug)]
pub struct TrainingCenter {
    document: Document,
}

impl TrainingCenter {
    pub fn open(params: &LocatorParams) -> Result<Self, TcxError> {
        let document = Document::open(&params.master_file, &params.parse)?;
        Ok(Self { document })
    }

    pub fn parse(input: &str, opts: &ParseOptions) -> Result<Self, TcxError> {
        Ok(Self {
            document: Document::parse(input, opts)?,
        })
    }

    pub fn activities(&self) -> impl Iterator<Item = Activity<'_>> + '_ {
        let tags = self.document.tags();
        self.document
            .descendants_named("Activity")
            .map(move |el| Activity::new(el, tags))
    }

    /// First-lap start time → start coordinate for every activity. Entries
    /// without a coordinate are logged and dropped; a later activity with
    /// the same start time replaces an earlier one.
    pub fn lap_starts(&self) -> Result<BTreeMap<String, (Activity<'_>, GeoPoint)>, TcxError> {
        let tags = self.document.tags();
        let mut found: BTreeMap<String, (Activity<'_>, Option<GeoPoint>)> = BTreeMap::new();
        for activity in self.activities() {
            let Some(lap) = activity.first_lap() else {
                continue;
            };
            let start_time = lap
                .attribute("StartTime")
                .ok_or(TcxError::MissingAttribute {
                    element: "Lap",
                    attribute: "StartTime",
                })?
                .to_string();
            let start = lap_start_point(lap, tags)?;
            found.insert(start_time, (activity, start));
        }

        let mut starts = BTreeMap::new();
        for (start_time, (activity, start)) in found {
            match start {
                Some(point) => {
                    starts.insert(start_time, (activity, point));
                }
                None => warn!("Skipped {}: first lap has no position", start_time),
            }
        }
        Ok(starts)
    }

    /// Activities whose first lap starts strictly within `tolerance` of
    /// `target`.
    pub fn find_workouts_by_start(
        &self,
        target: GeoPoint,
        tolerance: f64,
        metric: Metric,
    ) -> Result<Vec<LocatedActivity<'_>>, TcxError> {
        let mut located = Vec::new();
        for (start_time, (activity, start)) in self.lap_starts()? {
            let distance = metric.distance(start, target);
            if distance < tolerance {
                info!("Activity {} is a location run", start_time);
                located.push(LocatedActivity {
                    start_time,
                    start,
                    distance,
                    activity,
                });
            }
        }
        Ok(located)
    }

    /// Tabular arrays of activities that start near `params.start` and end
    /// near `params.end`, keyed by their first sample's timestamp.
    pub fn location_arrays(
        &self,
        params: &LocatorParams,
    ) -> Result<BTreeMap<String, TabularArray>, TcxError> {
        let located = self.find_workouts_by_start(params.start, params.tolerance, params.metric)?;
        let mut indexed = BTreeMap::new();
        for run in located {
            let array = run.activity.to_array()?;
            let key = array
                .first()
                .map(|record| record.time.to_rfc3339_opts(SecondsFormat::Secs, true))
                .ok_or_else(|| TcxError::EmptyActivity(run.start_time.clone()))?;
            indexed.insert(key, array);
        }
        retain_ending_near(&mut indexed, params.end, params.tolerance, params.metric);
        Ok(indexed)
    }
}

/// Drop, in place, runs whose last record lies farther than `tolerance`
/// from `end`. Returns the removed keys.
pub fn retain_ending_near(
    runs: &mut BTreeMap<String, TabularArray>,
    end: GeoPoint,
    tolerance: f64,
    metric: Metric,
) -> Vec<String> {
    let mut removed = Vec::new();
    runs.retain(|key, array| {
        let keep = array
            .last()
            .map(|last| metric.distance(GeoPoint::new(last.lat, last.lon), end) <= tolerance)
            .unwrap_or(false);
        if !keep {
            removed.push(key.clone());
        }
        keep
    });
    if !removed.is_empty() {
        info!("{} runs do not end near the target", removed.len());
    }
    removed
}

/// Coordinate of the earliest positioned trackpoint in `lap`. Trackpoints
/// without a time sort after timed ones, ties keep document order.
fn lap_start_point(lap: &Element, tags: &TagMatcher) -> Result<Option<GeoPoint>, TcxError> {
    let mut best: Option<(bool, Option<DateTime<Utc>>, GeoPoint)> = None;
    for tp in lap.descendants_named(tags, "Trackpoint") {
        let fields = read_trackpoint(tp, tags)?;
        let Some((lat, lon)) = fields.position() else {
            continue;
        };
        let time = fields
            .time
            .as_deref()
            .map(|text| {
                DateTime::parse_from_rfc3339(text)
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|_| TcxError::InvalidTimestamp(text.to_string()))
            })
            .transpose()?;
        let candidate = (time.is_none(), time, GeoPoint::new(lat, lon));
        let earlier = match &best {
            None => true,
            Some((untimed, best_time, _)) => (candidate.0, candidate.1) < (*untimed, *best_time),
        };
        if earlier {
            best = Some(candidate);
        }
    }
    Ok(best.map(|(_, _, point)| point))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activity_xml(start: &str, points: &[(&str, f64, f64)]) -> String {
        let trackpoints: String = points
            .iter()
            .map(|(time, lat, lon)| {
                format!(
                    "<Trackpoint><Time>{time}</Time><Position><LatitudeDegrees>{lat}</LatitudeDegrees>\
                     <LongitudeDegrees>{lon}</LongitudeDegrees></Position>\
                     <AltitudeMeters>1700</AltitudeMeters><DistanceMeters>0</DistanceMeters></Trackpoint>"
                )
            })
            .collect();
        format!(
            "<Activity Sport=\"Running\"><Id>{start}</Id><Lap StartTime=\"{start}\"><Track>{trackpoints}</Track></Lap></Activity>"
        )
    }

    fn center(activities: &[String]) -> TrainingCenter {
        let xml = format!(
            "<TrainingCenterDatabase xmlns=\"http://www.garmin.com/xmlschemas/TrainingCenterDatabase/v2\"><Activities>{}</Activities></TrainingCenterDatabase>",
            activities.concat()
        );
        TrainingCenter::parse(&xml, &ParseOptions::default()).unwrap()
    }

    #[test]
    fn test_squared_degree_distance() {
        let target = GeoPoint::new(40.020631, -105.296255);
        assert_eq!(squared_degree_distance(target, target), 0.0);
        let off = GeoPoint::new(40.030631, -105.296255);
        assert!((squared_degree_distance(off, target) - 1e-4).abs() < 1e-12);
    }

    #[test]
    fn test_tolerance_accepts_exact_and_rejects_offsets() {
        let target = GeoPoint::new(40.020631, -105.296255);
        let tc = center(&[
            activity_xml("2013-06-01T10:00:00Z", &[("2013-06-01T10:00:00Z", 40.020631, -105.296255)]),
            activity_xml("2013-06-02T10:00:00Z", &[("2013-06-02T10:00:00Z", 40.030631, -105.296255)]),
            activity_xml("2013-06-03T10:00:00Z", &[("2013-06-03T10:00:00Z", 40.020631, -105.286255)]),
        ]);
        let found = tc
            .find_workouts_by_start(target, 1e-5, Metric::SquaredDegrees)
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].start_time, "2013-06-01T10:00:00Z");
        assert_eq!(found[0].distance, 0.0);
    }

    #[test]
    fn test_start_point_is_earliest_trackpoint() {
        let tc = center(&[activity_xml(
            "2013-06-01T10:00:00Z",
            &[
                ("2013-06-01T10:00:20Z", 41.0, -106.0),
                ("2013-06-01T10:00:00Z", 40.0, -105.0),
            ],
        )]);
        let starts = tc.lap_starts().unwrap();
        let (_, point) = &starts["2013-06-01T10:00:00Z"];
        assert_eq!(*point, GeoPoint::new(40.0, -105.0));
    }

    #[test]
    fn test_lap_without_position_is_skipped() {
        let xml = "<Activity><Lap StartTime=\"2013-06-01T10:00:00Z\"><Track><Trackpoint>\
                   <Time>2013-06-01T10:00:00Z</Time></Trackpoint></Track></Lap></Activity>";
        let tc = center(&[xml.to_string()]);
        assert!(tc.lap_starts().unwrap().is_empty());
    }

    #[test]
    fn test_start_point_skips_earlier_trackpoint_without_position() {
        let xml = "<Activity><Lap StartTime=\"2013-06-01T10:00:00Z\"><Track>\
                   <Trackpoint><Time>2013-06-01T10:00:00Z</Time>\
                   <Position><LatitudeDegrees>39.0</LatitudeDegrees></Position></Trackpoint>\
                   <Trackpoint><Time>2013-06-01T10:00:05Z</Time>\
                   <Position><LatitudeDegrees>40.0</LatitudeDegrees>\
                   <LongitudeDegrees>-105.0</LongitudeDegrees></Position></Trackpoint>\
                   </Track></Lap></Activity>";
        let tc = center(&[xml.to_string()]);
        let starts = tc.lap_starts().unwrap();
        let (_, point) = &starts["2013-06-01T10:00:00Z"];
        assert_eq!(*point, GeoPoint::new(40.0, -105.0));
    }

    #[test]
    fn test_lap_without_start_time_is_an_error() {
        let tc = center(&["<Activity><Lap/></Activity>".to_string()]);
        assert!(matches!(
            tc.lap_starts(),
            Err(TcxError::MissingAttribute { element: "Lap", .. })
        ));
    }

    #[test]
    fn test_scaled_metric_shrinks_longitude() {
        let target = GeoPoint::new(60.0, 10.0);
        let point = GeoPoint::new(60.0, 10.004);
        let raw = Metric::SquaredDegrees.distance(point, target);
        let scaled = Metric::ScaledDegrees.distance(point, target);
        assert!(raw > 1e-5);
        assert!(scaled < 1e-5);
    }

    #[test]
    fn test_location_arrays_filters_by_end() {
        let start = GeoPoint::new(40.0, -105.0);
        let end = GeoPoint::new(40.01, -105.01);
        let tc = center(&[
            activity_xml(
                "2013-06-01T10:00:00Z",
                &[
                    ("2013-06-01T10:00:00Z", 40.0, -105.0),
                    ("2013-06-01T10:20:00Z", 40.01, -105.01),
                ],
            ),
            activity_xml(
                "2013-06-02T10:00:00Z",
                &[
                    ("2013-06-02T10:00:00Z", 40.0, -105.0),
                    ("2013-06-02T10:20:00Z", 40.5, -105.5),
                ],
            ),
        ]);
        let params = LocatorParams {
            start,
            end,
            ..LocatorParams::default()
        };
        let runs = tc.location_arrays(&params).unwrap();
        assert_eq!(runs.len(), 1);
        let run = &runs["2013-06-01T10:00:00Z"];
        assert_eq!(run.len(), 2);
    }
}
