//! Comparison charts for a set of runs.
//!
//! Every figure gets its own backend and drawing area; nothing is shared
//! between figures.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ndarray::Array1;
use plotters::coord::Shift;
use plotters::drawing::DrawingAreaErrorKind;
use plotters::prelude::*;
use plotters::series::DashedLineSeries;
use plotters::style::{FontDesc, FontFamily, FontStyle, HSLColor, RGBAColor};
use tracing::{debug, info};

use crate::config::{ImageFormat, PlotOptions};
use crate::table::{Field, TabularArray};
use crate::TcxError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Figure {
    DistanceAltitude,
    TimeDistance,
    AltitudeDistance,
    TimeAltitude,
}

impl Figure {
    pub const ALL: [Figure; 4] = [
        Figure::DistanceAltitude,
        Figure::TimeDistance,
        Figure::AltitudeDistance,
        Figure::TimeAltitude,
    ];

    pub fn suffix(self) -> &'static str {
        match self {
            Figure::DistanceAltitude => "distance_altitude",
            Figure::TimeDistance => "time_distance",
            Figure::AltitudeDistance => "altitude_distance",
            Figure::TimeAltitude => "time_altitude",
        }
    }

    fn axis_labels(self) -> (&'static str, &'static str) {
        match self {
            Figure::DistanceAltitude => ("Distance (m)", "Altitude (m)"),
            Figure::TimeDistance => ("Time (s)", "Distance (m)"),
            Figure::AltitudeDistance => ("Altitude (m)", "Distance (m)"),
            Figure::TimeAltitude => ("Time (s)", "Altitude (m)"),
        }
    }

    /// x/y values for one run. Distance and time are offsets from the first
    /// sample everywhere; altitude is absolute only in `DistanceAltitude`.
    fn series(self, run: &TabularArray) -> Option<(Array1<f64>, Array1<f64>)> {
        let time = run.elapsed_seconds();
        let distance = run.offsets(Field::Distance)?;
        let altitude_offset = run.offsets(Field::Altitude)?;
        match self {
            Figure::DistanceAltitude => Some((distance, run.column(Field::Altitude)?)),
            Figure::TimeDistance => Some((time, distance)),
            Figure::AltitudeDistance => Some((altitude_offset, distance)),
            Figure::TimeAltitude => Some((time, altitude_offset)),
        }
    }
}

#[derive(Clone, Debug)]
struct RunSeries<'a> {
    label: &'a str,
    xs: Vec<f64>,
    ys: Vec<f64>,
    color: RGBColor,
}

#[derive(Clone, Debug)]
struct PaceLine {
    label: String,
    points: Vec<(f64, f64)>,
    dash: (u32, u32),
}

/// `stem_<figure>.<ext>` next to `base` for each figure.
pub fn figure_paths(base: &Path, format: ImageFormat) -> Vec<PathBuf> {
    let stem = base.file_stem().and_then(|s| s.to_str()).unwrap_or("runs");
    Figure::ALL
        .iter()
        .map(|figure| {
            base.with_file_name(format!(
                "{}_{}.{}",
                stem,
                figure.suffix(),
                format.extension()
            ))
        })
        .collect()
}

/// `n` colours swept across the spectrum from red to violet.
pub fn spectral_palette(n: usize) -> Vec<RGBColor> {
    (0..n)
        .map(|i| {
            let hue = 0.8 * i as f64 / n.max(1) as f64;
            let RGBAColor(r, g, b, _) = HSLColor(hue, 0.85, 0.45).to_rgba();
            RGBColor(r, g, b)
        })
        .collect()
}

/// Distance covered at a constant pace of `minutes` per `pace_distance_m`,
/// from 0 to `span_s` seconds.
pub fn pace_line(minutes: f64, pace_distance_m: f64, span_s: f64) -> [(f64, f64); 2] {
    [(0.0, 0.0), (span_s, span_s * pace_distance_m / (minutes * 60.0))]
}

fn pace_lines(opts: &PlotOptions) -> Vec<PaceLine> {
    const DASHES: [(u32, u32); 3] = [(10, 6), (2, 4), (16, 4)];
    opts.pace_minutes
        .iter()
        .enumerate()
        .map(|(idx, &minutes)| PaceLine {
            label: format!("{} minute miles", minutes),
            points: pace_line(minutes, opts.pace_distance_m, opts.pace_span_s).to_vec(),
            dash: DASHES[idx % DASHES.len()],
        })
        .collect()
}

fn bounds<'a>(values: impl Iterator<Item = &'a f64>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if !lo.is_finite() || !hi.is_finite() {
        return (0.0, 1.0);
    }
    if (hi - lo).abs() < f64::EPSILON {
        return (lo - 1.0, hi + 1.0);
    }
    let pad = (hi - lo) * 0.03;
    (lo - pad, hi + pad)
}

/// Render the four comparison figures for `runs`. Returns the written paths;
/// an empty map writes nothing.
pub fn render_comparison_plots(
    runs: &BTreeMap<String, TabularArray>,
    opts: &PlotOptions,
) -> Result<Vec<PathBuf>, TcxError> {
    if runs.is_empty() {
        return Ok(Vec::new());
    }

    let palette = spectral_palette(runs.len());
    let paths = figure_paths(&opts.output, opts.format);
    for (figure, path) in Figure::ALL.iter().copied().zip(paths.iter()) {
        let series: Vec<RunSeries> = runs
            .iter()
            .zip(palette.iter().copied())
            .filter_map(|((label, run), color)| {
                let (xs, ys) = figure.series(run)?;
                Some(RunSeries {
                    label: label.as_str(),
                    xs: xs.to_vec(),
                    ys: ys.to_vec(),
                    color,
                })
            })
            .collect();
        let paces = if figure == Figure::TimeDistance {
            pace_lines(opts)
        } else {
            Vec::new()
        };

        debug!("Drawing {} ({} runs)", path.display(), series.len());
        let size = (opts.width, opts.height);
        match opts.format {
            ImageFormat::Png => {
                let root = BitMapBackend::new(path, size).into_drawing_area();
                draw_figure(root, figure, &series, &paces)
                    .map_err(|e| TcxError::Plot(format!("{}: {}", path.display(), e)))?;
            }
            ImageFormat::Svg => {
                let root = SVGBackend::new(path, size).into_drawing_area();
                draw_figure(root, figure, &series, &paces)
                    .map_err(|e| TcxError::Plot(format!("{}: {}", path.display(), e)))?;
            }
        }
        info!("Wrote plot: {}", path.display());
    }
    Ok(paths)
}

fn draw_figure<DB>(
    area: DrawingArea<DB, Shift>,
    figure: Figure,
    series: &[RunSeries],
    paces: &[PaceLine],
) -> Result<(), DrawingAreaErrorKind<DB::ErrorType>>
where
    DB: DrawingBackend,
{
    area.fill(&WHITE)?;

    let (x_min, x_max) = bounds(
        series
            .iter()
            .flat_map(|s| s.xs.iter())
            .chain(paces.iter().flat_map(|p| p.points.iter().map(|(x, _)| x))),
    );
    let (y_min, y_max) = bounds(
        series
            .iter()
            .flat_map(|s| s.ys.iter())
            .chain(paces.iter().flat_map(|p| p.points.iter().map(|(_, y)| y))),
    );

    let mut chart = ChartBuilder::on(&area)
        .margin(25)
        .set_label_area_size(LabelAreaPosition::Left, 70)
        .set_label_area_size(LabelAreaPosition::Bottom, 50)
        .build_cartesian_2d(x_min..x_max, y_min..y_max)?;

    let axis_font = FontDesc::new(FontFamily::SansSerif, 18.0, FontStyle::Normal);
    let (x_desc, y_desc) = figure.axis_labels();
    chart
        .configure_mesh()
        .light_line_style(&TRANSPARENT)
        .x_desc(x_desc)
        .y_desc(y_desc)
        .x_label_formatter(&|v| format!("{:.0}", v))
        .y_label_formatter(&|v| format!("{:.0}", v))
        .label_style(axis_font.clone().color(&BLACK.mix(0.85)))
        .axis_desc_style(axis_font.color(&BLACK))
        .draw()?;

    for run in series {
        let color = run.color;
        chart
            .draw_series(LineSeries::new(
                run.xs.iter().copied().zip(run.ys.iter().copied()),
                color.stroke_width(2),
            ))?
            .label(run.label)
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], color));
    }

    for pace in paces {
        chart
            .draw_series(DashedLineSeries::new(
                pace.points.iter().copied(),
                pace.dash.0,
                pace.dash.1,
                BLACK.stroke_width(1),
            ))?
            .label(pace.label.as_str())
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 30, y)], BLACK));
    }

    let legend_font = FontDesc::new(FontFamily::SansSerif, 16.0, FontStyle::Normal);
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.7))
        .border_style(&BLACK.mix(0.3))
        .label_font(legend_font.color(&BLACK))
        .position(SeriesLabelPosition::UpperLeft)
        .draw()?;

    area.present()?;
    Ok(())
}
