//! Training Center XML (TCX) activity parsing, location search and
//! comparison plotting.
//!
//! The usual path through the crate is
//! [`TrainingCenter::find_workouts_by_start`] → [`activity_to_columns`] →
//! [`columns_to_array`] → [`render_comparison_plots`], with
//! [`TrainingCenter::location_arrays`] bundling the first three steps.

use std::path::PathBuf;

use thiserror::Error;

pub mod activity;
pub mod config;
pub mod locator;
pub mod plot;
pub mod table;
pub mod trackpoint;
pub mod xml;

pub use activity::{activity_to_columns, Activity, SampleColumns};
pub use config::{ImageFormat, LocatorParams, Metric, ParseOptions, PlotOptions, TagMode};
pub use locator::{
    retain_ending_near, squared_degree_distance, GeoPoint, LocatedActivity, TrainingCenter,
};
pub use plot::render_comparison_plots;
pub use table::{
    columns_to_array, parse_document, parse_file, parse_file_with, Field, FieldKind, Record,
    TabularArray,
};
pub use trackpoint::{read_trackpoint, TrackpointFields};
pub use xml::{Document, Element, TagMatcher, TCX_NAMESPACE};

#[derive(Error, Debug)]
pub enum TcxError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("failed to parse XML: {0}")]
    Xml(#[from] quick_xml::Error),
    #[error("malformed XML: {0}")]
    MalformedXml(String),
    #[error("invalid number in <{element}>: {value:?}")]
    InvalidNumber { element: &'static str, value: String },
    #[error("invalid timestamp: {0:?}")]
    InvalidTimestamp(String),
    #[error("<{element}> is missing the {attribute} attribute")]
    MissingAttribute {
        element: &'static str,
        attribute: &'static str,
    },
    #[error("column {field} has {actual} values, expected {expected}")]
    ShapeMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("no complete trackpoints found")]
    NoTrackpoints,
    #[error("activity {0} has no complete trackpoints")]
    EmptyActivity(String),
    #[error("plotting error: {0}")]
    Plot(String),
    #[error("failed to write CSV: {0}")]
    Csv(#[from] csv::Error),
}
