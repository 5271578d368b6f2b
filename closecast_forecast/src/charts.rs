//! Chart artifacts rendered as standalone SVG documents.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::models::KnnSweep;

#[derive(Error, Debug)]
pub enum ChartError {
    #[error("nothing to plot for {0}")]
    NoData(&'static str),

    #[error("failed to write chart {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

const FONT: &str = "font-family=\"sans-serif\"";
const PALETTE: [&str; 4] = ["#1f77b4", "#ff7f0e", "#2ca02c", "#d62728"];

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn finite_range(values: impl IntoIterator<Item = f64>) -> Option<(f64, f64)> {
    let (min, max) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if min > max {
        return None;
    }
    if (max - min).abs() < f64::EPSILON {
        let pad = if min.abs() > f64::EPSILON { min.abs() * 0.05 } else { 1.0 };
        return Some((min - pad, max + pad));
    }
    let pad = (max - min) * 0.05;
    Some((min - pad, max + pad))
}

struct SvgCanvas {
    width: f64,
    height: f64,
    body: String,
}

impl SvgCanvas {
    fn new(width: f64, height: f64) -> Self {
        let mut canvas = Self {
            width,
            height,
            body: String::new(),
        };
        canvas.rect(0.0, 0.0, width, height, "white", "none");
        canvas
    }

    fn rect(&mut self, x: f64, y: f64, w: f64, h: f64, fill: &str, stroke: &str) {
        self.body.push_str(&format!(
            "  <rect x=\"{x:.1}\" y=\"{y:.1}\" width=\"{w:.1}\" height=\"{h:.1}\" fill=\"{fill}\" stroke=\"{stroke}\"/>\n"
        ));
    }

    fn line(&mut self, from: (f64, f64), to: (f64, f64), stroke: &str, dashed: bool) {
        let dash = if dashed { " stroke-dasharray=\"6 4\"" } else { "" };
        self.body.push_str(&format!(
            "  <line x1=\"{:.1}\" y1=\"{:.1}\" x2=\"{:.1}\" y2=\"{:.1}\" stroke=\"{stroke}\" stroke-width=\"1.5\"{dash}/>\n",
            from.0, from.1, to.0, to.1
        ));
    }

    fn polyline(&mut self, points: &[(f64, f64)], stroke: &str, width: f64) {
        if points.is_empty() {
            return;
        }
        let coords: Vec<String> = points
            .iter()
            .map(|(x, y)| format!("{x:.1},{y:.1}"))
            .collect();
        self.body.push_str(&format!(
            "  <polyline points=\"{}\" fill=\"none\" stroke=\"{stroke}\" stroke-width=\"{width}\"/>\n",
            coords.join(" ")
        ));
    }

    fn circle(&mut self, center: (f64, f64), radius: f64, fill: &str) {
        self.body.push_str(&format!(
            "  <circle cx=\"{:.1}\" cy=\"{:.1}\" r=\"{radius}\" fill=\"{fill}\" fill-opacity=\"0.6\"/>\n",
            center.0, center.1
        ));
    }

    fn text(&mut self, x: f64, y: f64, size: u32, anchor: &str, content: &str) {
        self.body.push_str(&format!(
            "  <text x=\"{x:.1}\" y=\"{y:.1}\" text-anchor=\"{anchor}\" {FONT} font-size=\"{size}\">{}</text>\n",
            escape(content)
        ));
    }

    fn title(&mut self, content: &str) {
        self.body.push_str(&format!(
            "  <text x=\"{:.1}\" y=\"24\" text-anchor=\"middle\" {FONT} font-size=\"16\" font-weight=\"bold\">{}</text>\n",
            self.width / 2.0,
            escape(content)
        ));
    }

    fn finish(self) -> String {
        format!(
            "<svg xmlns=\"http://www.w3.org/2000/svg\" viewBox=\"0 0 {w} {h}\" width=\"{w}\" height=\"{h}\">\n{}</svg>\n",
            self.body,
            w = self.width,
            h = self.height
        )
    }
}

/// A plotting area mapping data coordinates onto canvas pixels.
struct Panel {
    left: f64,
    top: f64,
    width: f64,
    height: f64,
    x_range: (f64, f64),
    y_range: (f64, f64),
}

impl Panel {
    fn map(&self, x: f64, y: f64) -> (f64, f64) {
        let (x0, x1) = self.x_range;
        let (y0, y1) = self.y_range;
        let px = self.left + (x - x0) / (x1 - x0) * self.width;
        let py = self.top + self.height - (y - y0) / (y1 - y0) * self.height;
        (px, py)
    }

    fn draw_axes(&self, canvas: &mut SvgCanvas, title: &str, x_label: &str, y_label: &str) {
        canvas.rect(self.left, self.top, self.width, self.height, "none", "#333333");
        for tick in 0..=4 {
            let frac = tick as f64 / 4.0;
            let y_value = self.y_range.0 + frac * (self.y_range.1 - self.y_range.0);
            let (_, py) = self.map(self.x_range.0, y_value);
            canvas.line((self.left, py), (self.left + self.width, py), "#e5e5e5", false);
            canvas.text(self.left - 6.0, py + 4.0, 10, "end", &format_tick(y_value));

            let x_value = self.x_range.0 + frac * (self.x_range.1 - self.x_range.0);
            let (px, _) = self.map(x_value, self.y_range.0);
            canvas.text(px, self.top + self.height + 16.0, 10, "middle", &format_tick(x_value));
        }
        canvas.text(self.left + self.width / 2.0, self.top - 8.0, 13, "middle", title);
        canvas.text(
            self.left + self.width / 2.0,
            self.top + self.height + 34.0,
            11,
            "middle",
            x_label,
        );
        let y_mid = self.top + self.height / 2.0;
        let x_pos = self.left - 52.0;
        canvas.body.push_str(&format!(
            "  <text x=\"{x_pos:.1}\" y=\"{y_mid:.1}\" text-anchor=\"middle\" {FONT} font-size=\"11\" transform=\"rotate(-90 {x_pos:.1} {y_mid:.1})\">{}</text>\n",
            escape(y_label)
        ));
    }

    fn legend(&self, canvas: &mut SvgCanvas, entries: &[(&str, &str)]) {
        for (idx, (label, color)) in entries.iter().enumerate() {
            let y = self.top + 14.0 + idx as f64 * 16.0;
            let x = self.left + 10.0;
            canvas.line((x, y - 4.0), (x + 18.0, y - 4.0), color, false);
            canvas.text(x + 24.0, y, 10, "start", label);
        }
    }
}

fn format_tick(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude >= 1000.0 {
        format!("{value:.0}")
    } else if magnitude >= 10.0 {
        format!("{value:.1}")
    } else {
        format!("{value:.3}")
    }
}

/// A named series drawn as a line.
pub struct LineSeries<'a> {
    pub label: &'a str,
    pub values: &'a [f64],
}

/// Closing price with its moving averages over the cleaned table.
pub fn trend_chart(dates: &[String], series: &[LineSeries<'_>]) -> Result<String, ChartError> {
    let len = series.iter().map(|s| s.values.len()).max().unwrap_or(0);
    let y_range = finite_range(series.iter().flat_map(|s| s.values.iter().copied()))
        .ok_or(ChartError::NoData("price trend"))?;
    if len == 0 {
        return Err(ChartError::NoData("price trend"));
    }

    let mut canvas = SvgCanvas::new(1000.0, 480.0);
    canvas.title("Closing price trend");
    let panel = Panel {
        left: 80.0,
        top: 60.0,
        width: 880.0,
        height: 340.0,
        x_range: (0.0, (len.max(2) - 1) as f64),
        y_range,
    };
    panel.draw_axes(&mut canvas, "", "Trading day (index)", "Price");

    let mut legend = Vec::new();
    for (idx, line) in series.iter().enumerate() {
        let color = PALETTE[idx % PALETTE.len()];
        let points: Vec<(f64, f64)> = line
            .values
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, v)| panel.map(i as f64, *v))
            .collect();
        canvas.polyline(&points, color, if idx == 0 { 2.0 } else { 1.5 });
        legend.push((line.label, color));
    }
    panel.legend(&mut canvas, &legend);

    if let (Some(first), Some(last)) = (dates.first(), dates.last()) {
        canvas.text(panel.left, 450.0, 10, "start", first);
        canvas.text(panel.left + panel.width, 450.0, 10, "end", last);
    }
    Ok(canvas.finish())
}

/// Summary statistics of a return series (sample standard deviation).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReturnStats {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl ReturnStats {
    pub fn compute(values: &[f64]) -> Option<Self> {
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return None;
        }
        let count = finite.len();
        let mean = finite.iter().sum::<f64>() / count as f64;
        let std = if count > 1 {
            (finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64).sqrt()
        } else {
            0.0
        };
        let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            count,
            mean,
            std,
            min,
            max,
        })
    }
}

/// Equal-width bins over `[min, max]`; the last bin is closed on the right.
pub fn histogram(values: &[f64], bins: usize) -> Option<(Vec<f64>, Vec<usize>)> {
    let stats = ReturnStats::compute(values)?;
    let bins = bins.max(1);
    let (lo, hi) = if stats.max > stats.min {
        (stats.min, stats.max)
    } else {
        (stats.min - 0.5, stats.max + 0.5)
    };
    let width = (hi - lo) / bins as f64;
    let edges: Vec<f64> = (0..=bins).map(|i| lo + width * i as f64).collect();
    let mut counts = vec![0usize; bins];
    for value in values.iter().filter(|v| v.is_finite()) {
        let idx = (((value - lo) / width).floor() as usize).min(bins - 1);
        counts[idx] += 1;
    }
    Some((edges, counts))
}

fn normal_pdf(x: f64, mean: f64, std: f64) -> f64 {
    let z = (x - mean) / std;
    (-0.5 * z * z).exp() / (std * (2.0 * std::f64::consts::PI).sqrt())
}

/// Daily-return histogram with the fitted normal curve scaled to counts.
pub fn return_histogram(returns: &[f64], bins: usize) -> Result<String, ChartError> {
    let stats = ReturnStats::compute(returns).ok_or(ChartError::NoData("daily return"))?;
    let (edges, counts) = histogram(returns, bins).ok_or(ChartError::NoData("daily return"))?;
    let bin_width = edges[1] - edges[0];
    let curve_scale = stats.count as f64 * bin_width;

    let x_lo = edges[0].min(stats.mean - 3.0 * stats.std);
    let x_hi = edges[edges.len() - 1].max(stats.mean + 3.0 * stats.std);
    let curve: Vec<(f64, f64)> = if stats.std > 0.0 {
        (0..=200)
            .map(|i| {
                let x = x_lo + (x_hi - x_lo) * i as f64 / 200.0;
                (x, normal_pdf(x, stats.mean, stats.std) * curve_scale)
            })
            .collect()
    } else {
        Vec::new()
    };
    let peak = counts
        .iter()
        .map(|c| *c as f64)
        .chain(curve.iter().map(|(_, y)| *y))
        .fold(1.0, f64::max);

    let mut canvas = SvgCanvas::new(900.0, 520.0);
    canvas.title("Daily return distribution");
    let panel = Panel {
        left: 80.0,
        top: 60.0,
        width: 600.0,
        height: 380.0,
        x_range: (x_lo, x_hi),
        y_range: (0.0, peak * 1.1),
    };
    panel.draw_axes(&mut canvas, "", "Daily return", "Frequency");

    for (idx, count) in counts.iter().enumerate() {
        if *count == 0 {
            continue;
        }
        let (x0, y_top) = panel.map(edges[idx], *count as f64);
        let (x1, y_base) = panel.map(edges[idx + 1], 0.0);
        canvas.rect(x0, y_top, (x1 - x0).max(0.5), y_base - y_top, "#9ecae1", "#3182bd");
    }
    let points: Vec<(f64, f64)> = curve.iter().map(|(x, y)| panel.map(*x, *y)).collect();
    canvas.polyline(&points, PALETTE[3], 2.0);

    let top = panel.y_range.1;
    let (mx, _) = panel.map(stats.mean, 0.0);
    canvas.line((mx, panel.top), (mx, panel.top + panel.height), PALETTE[2], true);
    for offset in [-stats.std, stats.std] {
        let (sx, _) = panel.map(stats.mean + offset, top);
        canvas.line((sx, panel.top), (sx, panel.top + panel.height), PALETTE[1], true);
    }
    panel.legend(
        &mut canvas,
        &[
            ("Normal fit", PALETTE[3]),
            ("Mean", PALETTE[2]),
            ("Mean \u{b1} 1\u{3c3}", PALETTE[1]),
        ],
    );

    let box_left = 700.0;
    canvas.rect(box_left, 60.0, 180.0, 110.0, "#f7f7f7", "#999999");
    let lines = [
        format!("Count: {}", stats.count),
        format!("Mean: {:.5}", stats.mean),
        format!("Std: {:.5}", stats.std),
        format!("Min: {:.5}", stats.min),
        format!("Max: {:.5}", stats.max),
    ];
    for (idx, line) in lines.iter().enumerate() {
        canvas.text(box_left + 10.0, 80.0 + idx as f64 * 18.0, 11, "start", line);
    }
    Ok(canvas.finish())
}

/// One actual-vs-predicted panel.
pub struct PredictionPanel<'a> {
    pub title: String,
    pub actual: &'a [f64],
    pub predicted: &'a [f64],
    pub r2: Option<f64>,
}

/// Side-by-side actual-vs-predicted scatter plots with the y = x line.
pub fn prediction_scatter(panels: &[PredictionPanel<'_>]) -> Result<String, ChartError> {
    let panels: Vec<&PredictionPanel<'_>> = panels
        .iter()
        .filter(|p| !p.actual.is_empty() && p.actual.len() == p.predicted.len())
        .collect();
    if panels.is_empty() {
        return Err(ChartError::NoData("actual vs predicted"));
    }

    let panel_width = 420.0;
    let width = 120.0 + panels.len() as f64 * (panel_width + 100.0);
    let mut canvas = SvgCanvas::new(width, 560.0);
    canvas.title("Actual vs predicted next-day close (test set)");

    for (idx, entry) in panels.iter().enumerate() {
        let range = finite_range(entry.actual.iter().chain(entry.predicted.iter()).copied())
            .ok_or(ChartError::NoData("actual vs predicted"))?;
        let panel = Panel {
            left: 100.0 + idx as f64 * (panel_width + 100.0),
            top: 80.0,
            width: panel_width,
            height: 400.0,
            x_range: range,
            y_range: range,
        };
        panel.draw_axes(&mut canvas, &entry.title, "Actual", "Predicted");
        let color = PALETTE[idx % PALETTE.len()];
        for (a, p) in entry.actual.iter().zip(entry.predicted) {
            if a.is_finite() && p.is_finite() {
                canvas.circle(panel.map(*a, *p), 3.5, color);
            }
        }
        canvas.line(
            panel.map(range.0, range.0),
            panel.map(range.1, range.1),
            PALETTE[3],
            true,
        );
        if let Some(r2) = entry.r2 {
            canvas.text(panel.left + 10.0, panel.top + 20.0, 12, "start", &format!("R\u{b2} = {r2:.4}"));
        }
    }
    Ok(canvas.finish())
}

fn min_max_normalize(values: &[f64]) -> Vec<f64> {
    let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if hi <= lo || !(hi - lo).is_finite() {
        return vec![0.5; values.len()];
    }
    values.iter().map(|v| (v - lo) / (hi - lo)).collect()
}

/// R², RMSE, MAE per neighbourhood size plus a normalized overlay, with
/// the selected k marked on every panel.
pub fn knn_sweep_chart(sweep: &KnnSweep, best_k: usize) -> Result<String, ChartError> {
    if sweep.entries.is_empty() {
        return Err(ChartError::NoData("KNN k comparison"));
    }
    let ks: Vec<f64> = sweep.entries.iter().map(|e| e.k as f64).collect();
    let r2: Vec<f64> = sweep.entries.iter().map(|e| e.metrics.r2).collect();
    let rmse: Vec<f64> = sweep.entries.iter().map(|e| e.metrics.rmse).collect();
    let mae: Vec<f64> = sweep.entries.iter().map(|e| e.metrics.mae).collect();
    let x_range = finite_range(ks.iter().copied()).ok_or(ChartError::NoData("KNN k comparison"))?;

    let mut canvas = SvgCanvas::new(1000.0, 820.0);
    canvas.title(&format!("KNN neighbourhood size comparison (best k = {best_k})"));

    let normalized = [min_max_normalize(&r2), min_max_normalize(&rmse), min_max_normalize(&mae)];
    let panels: [(&str, Vec<&[f64]>, (f64, f64)); 4] = [
        ("Test R\u{b2}", vec![&r2[..]], finite_range(r2.iter().copied()).unwrap_or((0.0, 1.0))),
        ("Test RMSE", vec![&rmse[..]], finite_range(rmse.iter().copied()).unwrap_or((0.0, 1.0))),
        ("Test MAE", vec![&mae[..]], finite_range(mae.iter().copied()).unwrap_or((0.0, 1.0))),
        (
            "Normalized metrics",
            normalized.iter().map(Vec::as_slice).collect(),
            (-0.05, 1.05),
        ),
    ];

    for (idx, (title, lines, y_range)) in panels.iter().enumerate() {
        let panel = Panel {
            left: 90.0 + (idx % 2) as f64 * 480.0,
            top: 80.0 + (idx / 2) as f64 * 360.0,
            width: 380.0,
            height: 260.0,
            x_range,
            y_range: *y_range,
        };
        panel.draw_axes(&mut canvas, title, "k", title);
        for (line_idx, values) in lines.iter().enumerate() {
            let color = PALETTE[(idx + line_idx) % PALETTE.len()];
            let points: Vec<(f64, f64)> = ks
                .iter()
                .zip(values.iter())
                .filter(|(_, v)| v.is_finite())
                .map(|(k, v)| panel.map(*k, *v))
                .collect();
            canvas.polyline(&points, color, 2.0);
            for point in &points {
                canvas.circle(*point, 3.0, color);
            }
        }
        if lines.len() > 1 {
            panel.legend(
                &mut canvas,
                &[("R\u{b2}", PALETTE[3]), ("RMSE", PALETTE[0]), ("MAE", PALETTE[1])],
            );
        }
        let (bx, _) = panel.map(best_k as f64, y_range.0);
        if bx >= panel.left && bx <= panel.left + panel.width {
            canvas.line((bx, panel.top), (bx, panel.top + panel.height), "#d62728", true);
        }
    }
    Ok(canvas.finish())
}

pub fn write_svg(path: &Path, svg: &str) -> Result<(), ChartError> {
    std::fs::write(path, svg).map_err(|source| ChartError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::RegressionMetrics;
    use crate::models::KnnSweepEntry;

    #[test]
    fn histogram_counts_every_finite_value() {
        let values = [0.0, 1.0, 2.0, 3.0, 4.0, f64::NAN];
        let (edges, counts) = histogram(&values, 4).unwrap();
        assert_eq!(edges.len(), 5);
        assert_eq!(counts.iter().sum::<usize>(), 5);
        assert_eq!(counts[3], 2);
    }

    #[test]
    fn return_stats_use_sample_deviation() {
        let stats = ReturnStats::compute(&[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(stats.count, 4);
        assert!((stats.mean - 2.5).abs() < 1e-12);
        assert!((stats.std - (5.0f64 / 3.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn charts_render_complete_svg_documents() {
        let dates = vec!["2024-01-01".to_string(), "2024-01-02".to_string(), "2024-01-03".to_string()];
        let close = [10.0, 11.0, 12.0];
        let ma = [10.0, 10.5, 11.0];
        let svg = trend_chart(
            &dates,
            &[
                LineSeries { label: "Close", values: &close },
                LineSeries { label: "MA 5", values: &ma },
            ],
        )
        .unwrap();
        assert!(svg.starts_with("<svg"));
        assert!(svg.trim_end().ends_with("</svg>"));
        assert_eq!(svg.matches("<polyline").count(), 2);

        let returns = [0.01, -0.02, 0.005, 0.0, 0.015];
        let svg = return_histogram(&returns, 50).unwrap();
        assert!(svg.contains("Mean:"));

        let scatter = prediction_scatter(&[PredictionPanel {
            title: "Linear <OLS>".to_string(),
            actual: &close,
            predicted: &ma,
            r2: Some(0.5),
        }])
        .unwrap();
        assert!(scatter.contains("Linear &lt;OLS&gt;"));
        assert_eq!(scatter.matches("<circle").count(), 3);
    }

    #[test]
    fn sweep_chart_marks_the_best_k() {
        let metrics = |r2: f64| RegressionMetrics {
            mse: 1.0 - r2,
            rmse: (1.0 - r2).sqrt(),
            mae: 1.0 - r2,
            r2,
        };
        let sweep = KnnSweep {
            entries: vec![
                KnnSweepEntry { k: 3, metrics: metrics(0.4) },
                KnnSweepEntry { k: 5, metrics: metrics(0.6) },
                KnnSweepEntry { k: 7, metrics: metrics(0.5) },
            ],
            skipped: Vec::new(),
        };
        let svg = knn_sweep_chart(&sweep, 5).unwrap();
        assert!(svg.contains("best k = 5"));
        assert_eq!(svg.matches("<polyline").count(), 6);
    }

    #[test]
    fn empty_inputs_are_reported_not_rendered() {
        assert!(matches!(
            trend_chart(&[], &[]),
            Err(ChartError::NoData(_))
        ));
        assert!(matches!(return_histogram(&[f64::NAN], 10), Err(ChartError::NoData(_))));
        assert!(matches!(
            knn_sweep_chart(&KnnSweep::default(), 5),
            Err(ChartError::NoData(_))
        ));
    }
}
