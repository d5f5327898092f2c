//! Productivity report: one line chart per metric over the historical
//! snapshots, one series per developer.

pub mod pdf;

use std::collections::BTreeSet;

use chrono::NaiveDate;

use crate::metrics::Metrics;
use pdf::{text_width, Color, Font, Page, PdfDocument, PAGE_HEIGHT, PAGE_WIDTH};

type Extract = fn(&Metrics) -> f64;

/// Chart label and value for every reported metric, in report order.
pub const METRICS: [(&str, Extract); 8] = [
    ("Closed Issues", |m: &Metrics| m.counters.closed_issues as f64),
    ("Open Issues", |m: &Metrics| m.counters.open_issues as f64),
    ("Merged Pull Requests", |m: &Metrics| m.counters.merged_prs as f64),
    ("Open Pull Requests", |m: &Metrics| m.counters.open_prs as f64),
    ("Issue Cycle Time", |m: &Metrics| m.durations.issue_cycle_time_days),
    ("Code Review Time", |m: &Metrics| m.durations.code_review_time_minutes),
    ("Commits", |m: &Metrics| m.counters.commits as f64),
    ("Lines of Code", |m: &Metrics| m.counters.lines_of_code as f64),
];

const DATE_FORMAT: &str = "%m/%d/%Y";
const CHARTS_PER_PAGE: usize = 2;
const MARGIN: f64 = 40.0;
const MAX_DATE_LABELS: usize = 8;

const PALETTE: [Color; 6] = [
    Color(0.12, 0.47, 0.71),
    Color(1.0, 0.5, 0.05),
    Color(0.17, 0.63, 0.17),
    Color(0.84, 0.15, 0.16),
    Color(0.58, 0.4, 0.74),
    Color(0.55, 0.34, 0.29),
];

/// One developer's values for a metric as `(date index, value)` points.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub username: String,
    pub points: Vec<(usize, f64)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub metric: &'static str,
    /// Distinct snapshot dates (`last_modified`), ascending.
    pub dates: Vec<NaiveDate>,
    /// Series in order of each developer's first appearance in the rows.
    pub series: Vec<Series>,
}

/// Pivot snapshot rows into one chart per metric.
pub fn build_charts(rows: &[Metrics]) -> Vec<Chart> {
    let dates: Vec<NaiveDate> = rows
        .iter()
        .map(|m| m.last_modified.date_naive())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let mut usernames: Vec<&str> = Vec::new();
    for m in rows {
        if !usernames.contains(&m.username.as_str()) {
            usernames.push(&m.username);
        }
    }

    METRICS
        .iter()
        .map(|&(metric, extract)| Chart {
            metric,
            dates: dates.clone(),
            series: usernames
                .iter()
                .map(|name| {
                    let mut points: Vec<(usize, f64)> = rows
                        .iter()
                        .filter(|m| m.username == *name)
                        .filter_map(|m| {
                            let day = m.last_modified.date_naive();
                            dates.binary_search(&day).ok().map(|i| (i, extract(m)))
                        })
                        .collect();
                    points.sort_by_key(|(i, _)| *i);
                    Series {
                        username: name.to_string(),
                        points,
                    }
                })
                .collect(),
        })
        .collect()
}

/// Render `rows` as a PDF: the title followed by every metric chart.
pub fn render_report(repository: &str, rows: &[Metrics]) -> Vec<u8> {
    let charts = build_charts(rows);
    let mut doc = PdfDocument::new();

    let slot_height = (PAGE_HEIGHT - 2.0 * MARGIN - 40.0) / CHARTS_PER_PAGE as f64;
    for (page_index, group) in charts.chunks(CHARTS_PER_PAGE).enumerate() {
        let page = doc.add_page();
        if page_index == 0 {
            let subtitle = if rows.is_empty() {
                format!("{repository}: no historical snapshots")
            } else {
                repository.to_string()
            };
            let cx = PAGE_WIDTH / 2.0;
            page.text_centered(cx, PAGE_HEIGHT - MARGIN - 15.0, Font::Bold, 15.0, "Productivity Report");
            page.text_centered(cx, PAGE_HEIGHT - MARGIN - 32.0, Font::Regular, 10.0, &subtitle);
        }
        for (slot, chart) in group.iter().enumerate() {
            let top = PAGE_HEIGHT - MARGIN - 40.0 - slot as f64 * slot_height;
            let bounds = Bounds {
                left: MARGIN,
                right: PAGE_WIDTH - MARGIN,
                bottom: top - slot_height + 10.0,
                top,
            };
            draw_chart(page, chart, bounds);
        }
    }

    log::debug!(
        "Rendered report for {repository}: {} row(s), {} page(s)",
        rows.len(),
        doc.page_count()
    );
    doc.to_bytes()
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    left: f64,
    right: f64,
    bottom: f64,
    top: f64,
}

fn draw_chart(page: &mut Page, chart: &Chart, b: Bounds) {
    let title = format!("{} Productivity Metrics", chart.metric);
    page.text_centered((b.left + b.right) / 2.0, b.top - 14.0, Font::Bold, 11.0, &title);

    let plot = Bounds {
        left: b.left + 45.0,
        right: b.right - 10.0,
        bottom: b.bottom + 35.0,
        top: b.top - 45.0,
    };
    page.line((plot.left, plot.bottom), (plot.right, plot.bottom), Color::BLACK, 0.8);
    page.line((plot.left, plot.bottom), (plot.left, plot.top), Color::BLACK, 0.8);

    let max = chart
        .series
        .iter()
        .flat_map(|s| s.points.iter().map(|(_, v)| *v))
        .fold(0.0_f64, f64::max);
    let y_max = if max > 0.0 { max } else { 1.0 };
    let y_of = |v: f64| plot.bottom + (v / y_max) * (plot.top - plot.bottom);

    for tick in [0.0, y_max / 2.0, y_max] {
        let y = y_of(tick);
        let label = value_label(tick);
        page.line((plot.left - 3.0, y), (plot.left, y), Color::BLACK, 0.5);
        if tick > 0.0 {
            page.line((plot.left, y), (plot.right, y), Color::GREY, 0.3);
        }
        page.text(plot.left - 6.0 - text_width(&label, 7.0), y - 2.5, Font::Regular, 7.0, &label);
    }
    page.text(b.left, b.top - 32.0, Font::Regular, 8.0, chart.metric);

    let n = chart.dates.len();
    let x_of = |i: usize| {
        if n <= 1 {
            (plot.left + plot.right) / 2.0
        } else {
            plot.left + i as f64 * (plot.right - plot.left) / (n - 1) as f64
        }
    };
    let step = n.div_ceil(MAX_DATE_LABELS).max(1);
    for (i, date) in chart.dates.iter().enumerate() {
        if i % step == 0 || i == n - 1 {
            let label = date.format(DATE_FORMAT).to_string();
            page.text_centered(x_of(i), plot.bottom - 12.0, Font::Regular, 7.0, &label);
        }
    }
    page.text_centered((plot.left + plot.right) / 2.0, b.bottom + 5.0, Font::Regular, 8.0, "Last Modified");

    let mut legend_y = plot.top - 8.0;
    for (s, series) in chart.series.iter().enumerate() {
        let color = PALETTE[s % PALETTE.len()];
        let points: Vec<(f64, f64)> = series.points.iter().map(|(i, v)| (x_of(*i), y_of(*v))).collect();
        page.polyline(&points, color, 1.2);
        for (x, y) in &points {
            page.fill_rect(x - 2.0, y - 2.0, 4.0, 4.0, color);
        }

        let legend_x = plot.right - 90.0;
        page.line((legend_x, legend_y + 3.0), (legend_x + 12.0, legend_y + 3.0), color, 1.5);
        page.text(legend_x + 16.0, legend_y, Font::Regular, 7.0, &series.username);
        legend_y -= 9.0;
    }
}

fn value_label(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{v:.0}")
    } else {
        format!("{v:.1}")
    }
}
