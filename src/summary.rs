use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::json;

use crate::file::RunMetadata;
use crate::report::stats::{A280_MOLAR_REDUCED, CHARGE, ISOELECTRIC_POINT, MOLECULAR_WEIGHT};
use crate::table::FinalTable;

// encode the template HTML file at compile time as a string literal
const TEMPLATE_HTML: &str = include_str!("summary_template.html");

/// The statistics plotted by default, one chart each.
pub const DEFAULT_STATS_COLUMNS: &[&str] =
    &[MOLECULAR_WEIGHT, CHARGE, ISOELECTRIC_POINT, A280_MOLAR_REDUCED];

const PALETTE: &[&str] = &[
    "#4e79a7", "#f28e2b", "#e15759", "#76b7b2", "#59a14f", "#edc948", "#b07aa1", "#ff9da7",
    "#9c755f", "#bab0ac",
];

const MARGIN_LEFT: f64 = 80.0;
const MARGIN_RIGHT: f64 = 20.0;
const MARGIN_TOP: f64 = 20.0;
const MARGIN_BOTTOM: f64 = 120.0;
const PLOT_HEIGHT: f64 = 280.0;
const BAR_WIDTH: f64 = 14.0;
const GROUP_GAP: f64 = 10.0;
const TICKS: usize = 5;

/// How the bars of one row are arranged.
#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BarLayout {
    /// side by side
    Grouped,
    /// on top of each other
    Stacked,
}

#[derive(Serialize, Debug, PartialEq)]
struct Bar {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
    colour: &'static str,
    title: String,
}

#[derive(Serialize, Debug, PartialEq)]
struct Tick {
    y: f64,
    label: String,
}

#[derive(Serialize, Debug, PartialEq)]
struct Label {
    x: f64,
    y: f64,
    text: String,
}

#[derive(Serialize, Debug, PartialEq)]
struct LegendEntry {
    colour: &'static str,
    name: String,
}

/// An SVG bar chart, laid out in pixel coordinates and ready for the template.
#[derive(Serialize, Debug)]
pub struct Chart {
    title: String,
    layout: BarLayout,
    width: f64,
    height: f64,
    plot_left: f64,
    plot_right: f64,
    plot_top: f64,
    plot_bottom: f64,
    zero_y: f64,
    bars: Vec<Bar>,
    ticks: Vec<Tick>,
    labels: Vec<Label>,
    legend: Vec<LegendEntry>,
}

fn format_tick(value: f64, span: f64) -> String {
    if span >= 10.0 {
        format!("{value:.0}")
    } else {
        format!("{value:.2}")
    }
}

/// Lays out a bar chart of `columns` with one bar group per row of `table`. Missing cells draw
/// nothing and negative values extend below the zero line.
///
/// # Returns
///
/// `None` when the table has no rows or none of `columns`.
pub fn build_chart(
    table: &FinalTable,
    columns: &[&str],
    layout: BarLayout,
    title: &str,
) -> Option<Chart> {
    let selected: Vec<(usize, &str)> = columns
        .iter()
        .filter_map(|name| table.column_index(name).map(|i| (i, *name)))
        .collect();

    if selected.is_empty() || table.is_empty() {
        return None;
    }

    let values: Vec<Vec<Option<f64>>> = table
        .rows
        .iter()
        .map(|row| selected.iter().map(|(i, _)| row.cells[*i].as_f64()).collect())
        .collect();

    // the value range always includes zero
    let (mut low, mut high) = (0.0f64, 0.0f64);
    for row in &values {
        match layout {
            BarLayout::Grouped => {
                for v in row.iter().flatten() {
                    low = low.min(*v);
                    high = high.max(*v);
                }
            }
            BarLayout::Stacked => {
                let positive: f64 = row.iter().flatten().filter(|v| **v > 0.0).sum();
                let negative: f64 = row.iter().flatten().filter(|v| **v < 0.0).sum();
                low = low.min(negative);
                high = high.max(positive);
            }
        }
    }
    if high == low {
        high = low + 1.0;
    }

    let group_width = match layout {
        BarLayout::Grouped => BAR_WIDTH * selected.len() as f64,
        BarLayout::Stacked => BAR_WIDTH,
    };
    let plot_width = (group_width + GROUP_GAP) * values.len() as f64 + GROUP_GAP;
    let plot_bottom = MARGIN_TOP + PLOT_HEIGHT;
    let scale = |v: f64| MARGIN_TOP + (high - v) / (high - low) * PLOT_HEIGHT;
    let zero_y = scale(0.0);

    let mut bars = Vec::new();
    let mut labels = Vec::new();

    for (r, (row, cells)) in table.rows.iter().zip(&values).enumerate() {
        let group_x = MARGIN_LEFT + GROUP_GAP + r as f64 * (group_width + GROUP_GAP);
        let (mut above, mut below) = (0.0f64, 0.0f64);

        for (j, value) in cells.iter().enumerate() {
            let Some(v) = *value else { continue };

            let (x, from, to) = match layout {
                BarLayout::Grouped => (group_x + j as f64 * BAR_WIDTH, 0.0, v),
                BarLayout::Stacked if v >= 0.0 => {
                    above += v;
                    (group_x, above - v, above)
                }
                BarLayout::Stacked => {
                    below += v;
                    (group_x, below - v, below)
                }
            };

            let (y0, y1) = (scale(from), scale(to));
            bars.push(Bar {
                x,
                y: y0.min(y1),
                width: BAR_WIDTH,
                height: (y1 - y0).abs(),
                colour: PALETTE[j % PALETTE.len()],
                title: format!("{}: {} = {}", row.identifier, selected[j].1, v),
            });
        }

        labels.push(Label {
            x: group_x + group_width / 2.0,
            y: plot_bottom + 8.0,
            text: row.identifier.clone(),
        });
    }

    let ticks = (0..=TICKS)
        .map(|i| {
            let v = low + (high - low) * i as f64 / TICKS as f64;
            Tick {
                y: scale(v),
                label: format_tick(v, high - low),
            }
        })
        .collect();

    let legend = selected
        .iter()
        .enumerate()
        .map(|(j, (_, name))| LegendEntry {
            colour: PALETTE[j % PALETTE.len()],
            name: name.to_string(),
        })
        .collect();

    Some(Chart {
        title: title.to_string(),
        layout,
        width: MARGIN_LEFT + plot_width + MARGIN_RIGHT,
        height: plot_bottom + MARGIN_BOTTOM,
        plot_left: MARGIN_LEFT,
        plot_right: MARGIN_LEFT + plot_width,
        plot_top: MARGIN_TOP,
        plot_bottom,
        zero_y,
        bars,
        ticks,
        labels,
        legend,
    })
}

/// One chart of every motif column.
pub fn motif_charts(table: &FinalTable, layout: BarLayout) -> Vec<Chart> {
    let columns = table.columns.iter().map(String::as_str).collect::<Vec<_>>();
    build_chart(table, &columns, layout, "Motif occurrences")
        .into_iter()
        .collect()
}

/// One chart per statistic in `columns` that the table holds.
pub fn stats_charts(table: &FinalTable, columns: &[&str], layout: BarLayout) -> Vec<Chart> {
    columns
        .iter()
        .filter_map(|name| build_chart(table, &[*name], layout, name))
        .collect()
}

/// Renders the HTML summary of a finalized table: the run metadata, its charts and the values.
pub fn write_summary(
    path: &Path,
    title: &str,
    metadata: &RunMetadata,
    table: &FinalTable,
    charts: &[Chart],
) -> Result<()> {
    info!("Writing summary to {}", path.display());

    let rows = table
        .rows
        .iter()
        .map(|row| {
            json!({
                "identifier": row.identifier,
                "cells": row.cells.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
                "flag": row.flag,
            })
        })
        .collect::<Vec<_>>();

    let data = json!({
        "title": title,
        "metadata": metadata,
        "policy": table.policy,
        "columns": table.columns,
        "rows": rows,
        "charts": charts,
    });

    let file = File::create(path)
        .with_context(|| format!("Unable to create summary {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    let reg = handlebars::Handlebars::new();
    reg.render_template_to_write(TEMPLATE_HTML, &data, &mut writer)?;
    writer.flush()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::AttributeValue;
    use crate::table::{Cell, FinalRow};

    fn table(rows: &[(&str, &[Option<f64>])], columns: &[&str]) -> FinalTable {
        FinalTable {
            policy: "missing-marker",
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: rows
                .iter()
                .map(|(id, cells)| FinalRow {
                    identifier: id.to_string(),
                    cells: cells
                        .iter()
                        .map(|c| match c {
                            Some(v) => Cell::Value(AttributeValue::Float(*v)),
                            None => Cell::Missing,
                        })
                        .collect(),
                    flag: None,
                })
                .collect(),
        }
    }

    #[test]
    fn missing_cells_draw_nothing() {
        let t = table(&[("a", &[Some(2.0)]), ("b", &[None])], &["Charge"]);
        let chart = build_chart(&t, &["Charge"], BarLayout::Grouped, "Charge").unwrap();

        assert_eq!(chart.bars.len(), 1);
        assert_eq!(chart.labels.len(), 2);
        assert_eq!(chart.legend.len(), 1);
    }

    #[test]
    fn negative_values_hang_below_zero() {
        let t = table(&[("a", &[Some(4.0)]), ("b", &[Some(-4.0)])], &["Charge"]);
        let chart = build_chart(&t, &["Charge"], BarLayout::Grouped, "Charge").unwrap();

        let (up, down) = (&chart.bars[0], &chart.bars[1]);
        assert_eq!(up.y + up.height, chart.zero_y);
        assert_eq!(down.y, chart.zero_y);
        assert_eq!(up.height, down.height);
        // zero sits halfway down the plot
        assert_eq!(chart.zero_y, MARGIN_TOP + PLOT_HEIGHT / 2.0);
    }

    #[test]
    fn stacked_bars_sit_on_each_other() {
        let t = table(&[("a", &[Some(1.0), Some(3.0)])], &["X", "Y"]);
        let chart = build_chart(&t, &["X", "Y"], BarLayout::Stacked, "motifs").unwrap();

        let (first, second) = (&chart.bars[0], &chart.bars[1]);
        assert_eq!(first.x, second.x);
        assert_eq!(second.y + second.height, first.y);
        assert_eq!(chart.plot_top, second.y);
    }

    #[test]
    fn skips_absent_columns() {
        let t = table(&[("a", &[Some(1.0)])], &["Charge"]);
        assert!(build_chart(&t, &["Nope"], BarLayout::Grouped, "x").is_none());

        let charts = stats_charts(&t, DEFAULT_STATS_COLUMNS, BarLayout::Grouped);
        assert_eq!(charts.len(), 1);
        assert_eq!(charts[0].title, "Charge");
    }

    #[test]
    fn renders_html() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.html");
        let t = table(&[("XP_<1>", &[Some(1.0)])], &["Charge"]);
        let charts = stats_charts(&t, &["Charge"], BarLayout::Grouped);

        write_summary(&path, "stats", &RunMetadata::default(), &t, &charts).unwrap();

        let html = std::fs::read_to_string(&path).unwrap();
        assert!(html.contains("<svg"));
        assert!(html.contains("XP_&lt;1&gt;"));
    }
}
