use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::locator::GeoPoint;
use crate::xml::TCX_NAMESPACE;

/// How element names are compared against TCX tag names.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum TagMode {
    /// Qualified when the root element is in the configured namespace,
    /// substring otherwise.
    Auto,
    /// Namespace URI and local name must both match.
    Qualified,
    /// Local name contains the wanted tag name.
    Substring,
}

impl Default for TagMode {
    fn default() -> Self {
        TagMode::Auto
    }
}

/// Distance used when comparing a coordinate with a target point.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Metric {
    /// `(Δlon)² + (Δlat)²` on raw degrees.
    SquaredDegrees,
    /// As `SquaredDegrees` with Δlon scaled by `cos(target latitude)`.
    /// Changes which activities match; opt in explicitly.
    ScaledDegrees,
}

impl Default for Metric {
    fn default() -> Self {
        Metric::SquaredDegrees
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParseOptions {
    pub namespace: String,
    pub tag_mode: TagMode,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            namespace: TCX_NAMESPACE.to_string(),
            tag_mode: TagMode::Auto,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocatorParams {
    pub master_file: PathBuf,
    pub start: GeoPoint,
    pub end: GeoPoint,
    /// Compared against the metric's squared-degree value.
    pub tolerance: f64,
    pub metric: Metric,
    pub parse: ParseOptions,
}

impl Default for LocatorParams {
    fn default() -> Self {
        Self {
            master_file: PathBuf::from("All Training Center Data.tcx"),
            start: GeoPoint::new(40.020631, -105.296255),
            end: GeoPoint::new(40.034425, -105.305303),
            tolerance: 1e-5,
            metric: Metric::SquaredDegrees,
            parse: ParseOptions::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Svg,
}

impl ImageFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Svg => "svg",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PlotOptions {
    /// Base path; each figure is written next to it as `stem_<figure>.<ext>`.
    pub output: PathBuf,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    /// Reference paces in minutes per `pace_distance_m`.
    pub pace_minutes: Vec<f64>,
    pub pace_distance_m: f64,
    pub pace_span_s: f64,
}

impl Default for PlotOptions {
    fn default() -> Self {
        Self {
            output: PathBuf::from("runs.png"),
            format: ImageFormat::Png,
            width: 1280,
            height: 760,
            pace_minutes: vec![24.0, 21.0, 18.0],
            pace_distance_m: 1600.0,
            pace_span_s: 1500.0,
        }
    }
}
