//! Chart data preparation and PNG rendering.
//!
//! A stage produces either both charts or neither. Each chart draws into
//! its own pixel buffer, which is encoded and dropped before the next one.

use std::io::Cursor;
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use image::{ImageFormat, RgbImage};
use plotters::coord::ranged1d::SegmentValue;
use plotters::element::Pie;
use plotters::prelude::*;
use plotters::style::{FontDesc, FontFamily, FontStyle};
use thiserror::Error;
use tracing::{info, warn};

use crate::funnel::StageAnalysis;
use crate::stage::StageDescriptor;

pub const DEFAULT_CHART_FONT: &str = "sans-serif";
pub const DEFAULT_CHART_WIDTH: u32 = 1280;
pub const DEFAULT_CHART_HEIGHT: u32 = 720;

const UPGRADED_AFTER_SECOND: &str = "upgraded after second deposit";
const UPGRADED_WITHOUT_SECOND: &str = "upgraded without second deposit";

const SLICE_COLORS: [RGBColor; 8] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
];

static CHART_FONT: OnceLock<String> = OnceLock::new();

#[derive(Debug, Error)]
pub enum ChartError {
    #[error("chart drawing failed: {0}")]
    Draw(String),
    #[error("chart encoding failed: {0}")]
    Encode(String),
}

impl<E: std::error::Error + Send + Sync> From<DrawingAreaErrorKind<E>> for ChartError {
    fn from(err: DrawingAreaErrorKind<E>) -> Self {
        ChartError::Draw(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartSeries {
    pub title: String,
    pub points: Vec<(String, u64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChartData {
    pub bar: ChartSeries,
    pub pie: ChartSeries,
}

impl ChartData {
    /// Bar = the distribution in stage order. Pie = the distribution, or the
    /// upgrade-source split when the stage tracks one.
    pub fn for_stage(desc: &StageDescriptor, analysis: &StageAnalysis) -> Option<Self> {
        if !analysis.has_charts() {
            return None;
        }
        let report = &analysis.report;
        let distribution: Vec<(String, u64)> = report
            .distribution
            .iter()
            .map(|share| (share.bucket.clone(), share.count))
            .collect();

        let pie_points = match report.upgrade_sources {
            Some(sources) if desc.tracks_upgrade_sources => vec![
                (UPGRADED_AFTER_SECOND.to_string(), sources.after_second_deposit),
                (
                    UPGRADED_WITHOUT_SECOND.to_string(),
                    sources.without_second_deposit,
                ),
            ],
            _ => distribution.clone(),
        };

        Some(Self {
            bar: ChartSeries {
                title: desc.bar_title.to_string(),
                points: distribution,
            },
            pie: ChartSeries {
                title: desc.pie_title.to_string(),
                points: pie_points,
            },
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedCharts {
    pub bar_png_base64: String,
    pub pie_png_base64: String,
}

pub trait ChartRenderer: Send + Sync + 'static {
    fn render_bar(&self, series: &ChartSeries) -> Result<Vec<u8>, ChartError>;
    fn render_pie(&self, series: &ChartSeries) -> Result<Vec<u8>, ChartError>;
}

/// Renders both charts or fails as a whole.
pub fn render_charts(
    renderer: &dyn ChartRenderer,
    data: &ChartData,
) -> Result<RenderedCharts, ChartError> {
    let bar = renderer.render_bar(&data.bar)?;
    let bar_png_base64 = STANDARD.encode(bar);
    let pie = renderer.render_pie(&data.pie)?;
    let pie_png_base64 = STANDARD.encode(pie);

    Ok(RenderedCharts {
        bar_png_base64,
        pie_png_base64,
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartConfig {
    pub font_family: String,
    pub width: u32,
    pub height: u32,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            font_family: DEFAULT_CHART_FONT.to_string(),
            width: DEFAULT_CHART_WIDTH,
            height: DEFAULT_CHART_HEIGHT,
        }
    }
}

/// Process-wide chart font. The first call resolves `requested` against the
/// installed fonts (falling back to the generic sans-serif family); later
/// calls return the same family.
pub fn configure_chart_font(requested: &str) -> &'static str {
    CHART_FONT.get_or_init(|| {
        let probe = FontDesc::new(FontFamily::from(requested), 12.0, FontStyle::Normal);
        match probe.box_size("0") {
            Ok(_) => {
                info!(
                    component = "charts",
                    event = "chart.font.selected",
                    font = requested
                );
                requested.to_string()
            }
            Err(err) => {
                warn!(
                    component = "charts",
                    event = "chart.font.fallback",
                    requested,
                    fallback = DEFAULT_CHART_FONT,
                    error = %err
                );
                DEFAULT_CHART_FONT.to_string()
            }
        }
    })
}

#[derive(Debug, Clone)]
pub struct PlottersRenderer {
    config: ChartConfig,
}

impl PlottersRenderer {
    pub fn new(config: ChartConfig) -> Self {
        Self { config }
    }

    fn font(&self) -> &'static str {
        configure_chart_font(&self.config.font_family)
    }

    fn buffer(&self) -> Vec<u8> {
        vec![0u8; self.config.width as usize * self.config.height as usize * 3]
    }

    fn encode_png(&self, buffer: Vec<u8>) -> Result<Vec<u8>, ChartError> {
        let image = RgbImage::from_raw(self.config.width, self.config.height, buffer)
            .ok_or_else(|| ChartError::Encode("pixel buffer size mismatch".to_string()))?;
        let mut out = Cursor::new(Vec::new());
        image
            .write_to(&mut out, ImageFormat::Png)
            .map_err(|err| ChartError::Encode(err.to_string()))?;
        Ok(out.into_inner())
    }
}

impl Default for PlottersRenderer {
    fn default() -> Self {
        Self::new(ChartConfig::default())
    }
}

impl ChartRenderer for PlottersRenderer {
    fn render_bar(&self, series: &ChartSeries) -> Result<Vec<u8>, ChartError> {
        let font = self.font();
        let size = (self.config.width, self.config.height);
        let mut buffer = self.buffer();
        {
            let root = BitMapBackend::with_buffer(&mut buffer, size).into_drawing_area();
            root.fill(&WHITE)?;

            let labels: Vec<&str> = series.points.iter().map(|(label, _)| label.as_str()).collect();
            let max = series.points.iter().map(|(_, count)| *count).max().unwrap_or(0);
            let y_top = max + max / 10 + 1;

            let mut chart = ChartBuilder::on(&root)
                .caption(&series.title, (font, 30.0).into_font())
                .margin(20)
                .x_label_area_size(60)
                .y_label_area_size(60)
                .build_cartesian_2d((0..labels.len()).into_segmented(), 0u64..y_top)?;

            chart
                .configure_mesh()
                .disable_x_mesh()
                .x_desc("time range")
                .y_desc("users")
                .x_labels(labels.len())
                .x_label_formatter(&|value| match value {
                    SegmentValue::CenterOf(idx) | SegmentValue::Exact(idx) => {
                        labels.get(*idx).map(|label| label.to_string()).unwrap_or_default()
                    }
                    SegmentValue::Last => String::new(),
                })
                .label_style((font, 14.0).into_font())
                .axis_desc_style((font, 18.0).into_font())
                .draw()?;

            chart
                .draw_series(
                    Histogram::vertical(&chart)
                        .style(SLICE_COLORS[0].filled())
                        .margin(12)
                        .data(series.points.iter().enumerate().map(|(idx, (_, count))| (idx, *count))),
                )?;

            chart
                .draw_series(series.points.iter().enumerate().map(|(idx, (_, count))| {
                    Text::new(
                        count.to_string(),
                        (SegmentValue::CenterOf(idx), *count),
                        (font, 16.0).into_font().color(&BLACK),
                    )
                }))?;

            root.present()?;
        }
        self.encode_png(buffer)
    }

    fn render_pie(&self, series: &ChartSeries) -> Result<Vec<u8>, ChartError> {
        let font = self.font();
        let (width, height) = (self.config.width, self.config.height);
        let mut buffer = self.buffer();
        {
            let root = BitMapBackend::with_buffer(&mut buffer, (width, height)).into_drawing_area();
            root.fill(&WHITE)?;
            let root = root.titled(&series.title, (font, 30.0).into_font())?;

            let (area_w, area_h) = root.dim_in_pixel();
            let center = (area_w as i32 / 2, area_h as i32 / 2);
            let radius = f64::from(area_w.min(area_h)) * 0.35;

            let sizes: Vec<f64> = series.points.iter().map(|(_, value)| *value as f64).collect();
            let total: f64 = sizes.iter().sum();

            if total > 0.0 {
                let colors: Vec<RGBColor> = (0..sizes.len())
                    .map(|idx| SLICE_COLORS[idx % SLICE_COLORS.len()])
                    .collect();
                let labels: Vec<&str> = series.points.iter().map(|(label, _)| label.as_str()).collect();
                let mut pie = Pie::new(&center, &radius, &sizes, &colors, &labels);
                pie.start_angle(-90.0);
                pie.label_style((font, 16.0).into_font().color(&BLACK));
                root.draw(&pie)?;
            } else {
                root.draw(&Text::new(
                    "no data",
                    center,
                    (font, 24.0).into_font().color(&BLACK),
                ))?;
            }

            root.present()?;
        }
        self.encode_png(buffer)
    }
}
