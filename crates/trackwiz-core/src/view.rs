//! View models for the presentation layer.
//!
//! [`WizardView::from_wizard`] is a pure mapping from wizard state to what a
//! front end shows: step indicators, the point list with its summary, job
//! progress and the results panel. Nothing here renders.

use serde::Serialize;
use std::fmt;

use crate::points::{Point, PointId, PointKind, PointSet};
use crate::service::TrackingResults;
use crate::wizard::{JobProgress, Step, Wizard};

/// Display box the preview frame is fitted into.
pub const DISPLAY_MAX_WIDTH: u32 = 800;
pub const DISPLAY_MAX_HEIGHT: u32 = 600;

/// Shown in place of the point list while it is empty.
pub const EMPTY_POINTS_HINT: &str = "Click the frame to select points";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorState {
    Done,
    Active,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepIndicator {
    pub step: Step,
    pub number: u8,
    pub label: &'static str,
    pub state: IndicatorState,
}

/// One entry of the point list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PointRow {
    pub id: PointId,
    pub x: u32,
    pub y: u32,
    pub kind: PointKind,
    pub marker: char,
}

impl From<&Point> for PointRow {
    fn from(point: &Point) -> Self {
        Self {
            id: point.id,
            x: point.x,
            y: point.y,
            kind: point.kind,
            marker: marker(point.kind),
        }
    }
}

impl fmt::Display for PointRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.marker, self.x, self.y)
    }
}

const fn marker(kind: PointKind) -> char {
    match kind {
        PointKind::Positive => '✓',
        PointKind::Negative => '✗',
    }
}

/// Counts of tracked-object and excluded-region points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PointSummary {
    pub positive: usize,
    pub negative: usize,
}

impl PointSummary {
    #[must_use]
    pub fn of(points: &PointSet) -> Self {
        Self {
            positive: points.count(PointKind::Positive),
            negative: points.count(PointKind::Negative),
        }
    }

    #[must_use]
    pub const fn total(&self) -> usize {
        self.positive + self.negative
    }
}

impl fmt::Display for PointSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} tracked, {} excluded",
            self.positive, self.negative
        )
    }
}

/// Completed-job statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultsPanel {
    pub total_frames: u64,
    pub processed_frames: u64,
    pub processing_time: String,
    pub model_size: String,
    /// `(object id, frames detected in)`, ordered by object id.
    pub detections: Vec<(String, u64)>,
    pub demo_mode: bool,
}

impl From<&TrackingResults> for ResultsPanel {
    fn from(results: &TrackingResults) -> Self {
        Self {
            total_frames: results.total_frames,
            processed_frames: results.processed_frames,
            processing_time: results.processing_time.clone(),
            model_size: results.model_size.clone(),
            detections: results
                .objects_detected
                .iter()
                .map(|(id, count)| (id.clone(), *count))
                .collect(),
            demo_mode: results.demo_mode,
        }
    }
}

/// Everything a front end needs to draw the wizard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WizardView {
    pub step: Step,
    pub session_id: Option<String>,
    pub indicators: Vec<StepIndicator>,
    /// URL of the frame used for point selection.
    pub frame_url: Option<String>,
    pub total_frames: Option<u64>,
    pub points: Vec<PointRow>,
    pub summary: PointSummary,
    pub empty_hint: Option<&'static str>,
    pub can_confirm: bool,
    pub progress: Option<JobProgress>,
    pub results: Option<ResultsPanel>,
    pub failure: Option<String>,
}

impl WizardView {
    #[must_use]
    pub fn from_wizard(wizard: &Wizard) -> Self {
        let step = wizard.step();
        let indicators = Step::ALL
            .iter()
            .map(|&s| StepIndicator {
                step: s,
                number: s.number(),
                label: s.label(),
                state: match s.cmp(&step) {
                    std::cmp::Ordering::Less => IndicatorState::Done,
                    std::cmp::Ordering::Equal => IndicatorState::Active,
                    std::cmp::Ordering::Greater => IndicatorState::Pending,
                },
            })
            .collect();

        let points: Vec<PointRow> = wizard.points().iter().map(PointRow::from).collect();
        let summary = PointSummary::of(wizard.points());
        let frames = wizard.frames();

        Self {
            step,
            session_id: wizard.session().map(|s| s.as_str().to_string()),
            indicators,
            frame_url: frames
                .and_then(|listing| listing.first_preview())
                .map(|frame| frame.url.clone()),
            total_frames: frames.map(|listing| listing.total_frames),
            empty_hint: points.is_empty().then_some(EMPTY_POINTS_HINT),
            can_confirm: step == Step::PointSelection && summary.total() > 0 && !wizard.is_failed(),
            summary,
            points,
            progress: wizard.progress().cloned(),
            results: wizard.results().map(ResultsPanel::from),
            failure: wizard.failure().map(|f| f.message.clone()),
        }
    }
}

/// Placement of a frame inside the display box, used to map clicks on the
/// displayed image back to frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameViewport {
    pub frame_width: u32,
    pub frame_height: u32,
    pub scale: f64,
}

impl FrameViewport {
    /// Fit a frame into [`DISPLAY_MAX_WIDTH`] × [`DISPLAY_MAX_HEIGHT`].
    #[must_use]
    pub fn fit(frame_width: u32, frame_height: u32) -> Option<Self> {
        Self::fit_within(frame_width, frame_height, DISPLAY_MAX_WIDTH, DISPLAY_MAX_HEIGHT)
    }

    /// Scale the frame to the largest size that fits the box, keeping its
    /// aspect ratio. `None` for an empty frame or box.
    #[must_use]
    pub fn fit_within(frame_width: u32, frame_height: u32, max_width: u32, max_height: u32) -> Option<Self> {
        if frame_width == 0 || frame_height == 0 || max_width == 0 || max_height == 0 {
            return None;
        }
        let scale = (f64::from(max_width) / f64::from(frame_width))
            .min(f64::from(max_height) / f64::from(frame_height));
        Some(Self {
            frame_width,
            frame_height,
            scale,
        })
    }

    /// Displayed size in whole pixels.
    #[must_use]
    pub fn display_size(&self) -> (u32, u32) {
        (
            (f64::from(self.frame_width) * self.scale).round() as u32,
            (f64::from(self.frame_height) * self.scale).round() as u32,
        )
    }

    /// Frame pixel under a click at `(x, y)` on the displayed image.
    /// `None` when the click lies outside the image.
    #[must_use]
    pub fn to_frame(&self, x: f64, y: f64) -> Option<(u32, u32)> {
        if !x.is_finite() || !y.is_finite() || x < 0.0 || y < 0.0 {
            return None;
        }
        let fx = (x / self.scale).round();
        let fy = (y / self.scale).round();
        if fx > f64::from(self.frame_width) || fy > f64::from(self.frame_height) {
            return None;
        }
        // a click on the far edge maps to the last pixel
        Some((
            (fx as u32).min(self.frame_width - 1),
            (fy as u32).min(self.frame_height - 1),
        ))
    }

    /// Where a frame pixel is drawn on the display.
    #[must_use]
    pub fn to_display(&self, x: u32, y: u32) -> (f64, f64) {
        (f64::from(x) * self.scale, f64::from(y) * self.scale)
    }
}
