//! SVG rendering of chart specifications with plotters.

use super::{ChartSpec, Layer, Panel, Rgb};
use crate::error::{Result, TiterError};
use plotters::backend::{DrawingBackend, SVGBackend};
use plotters::chart::ChartBuilder;
use plotters::coord::Shift;
use plotters::drawing::{DrawingArea, IntoDrawingArea};
use plotters::element::{Circle, Text};
use plotters::series::LineSeries;
use plotters::style::colors::WHITE;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use plotters::style::{Color, IntoFont, RGBColor, TextStyle};
use std::path::Path;
use tracing::debug;

const FONT: &str = "sans-serif";
const FONT_SIZE_TITLE: u32 = 20;
const FONT_SIZE_PANEL: u32 = 14;
const FONT_SIZE_AXIS: u32 = 12;

fn plot_err<E: std::fmt::Display>(e: E) -> TiterError {
    TiterError::Plot(e.to_string())
}

impl From<Rgb> for RGBColor {
    fn from(c: Rgb) -> Self {
        RGBColor(c.0, c.1, c.2)
    }
}

impl ChartSpec {
    /// Render to an SVG file.
    pub fn render_svg<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        if self.panels.is_empty() {
            return Err(TiterError::EmptyData(format!(
                "Chart '{}' has no panels",
                self.title
            )));
        }
        let path = path.as_ref();
        let root = SVGBackend::new(path, (self.width, self.height)).into_drawing_area();
        self.draw(&root)?;
        root.present().map_err(plot_err)?;
        debug!("Wrote chart '{}' to {}", self.title, path.display());
        Ok(())
    }

    fn draw<DB: DrawingBackend>(&self, root: &DrawingArea<DB, Shift>) -> Result<()> {
        root.fill(&WHITE).map_err(plot_err)?;
        let body = root
            .titled(&self.title, (FONT, FONT_SIZE_TITLE).into_font())
            .map_err(plot_err)?;
        let areas = body.split_evenly((self.rows(), self.columns.max(1)));
        for (panel, area) in self.panels.iter().zip(areas.iter()) {
            draw_panel(panel, area)?;
        }
        Ok(())
    }
}

fn draw_panel<DB: DrawingBackend>(panel: &Panel, area: &DrawingArea<DB, Shift>) -> Result<()> {
    let (x0, x1) = panel.x_range;
    let (y0, y1) = panel.y_range;

    let mut chart = ChartBuilder::on(area)
        .caption(&panel.title, (FONT, FONT_SIZE_PANEL))
        .margin(8)
        .x_label_area_size(if panel.x_categories.is_empty() { 36 } else { 52 })
        .y_label_area_size(44)
        .build_cartesian_2d(x0..x1, y0..y1)
        .map_err(plot_err)?;

    let categories = &panel.x_categories;
    let blank = |_: &f64| String::new();

    {
        let mut mesh = chart.configure_mesh();
        mesh.x_desc(&panel.x_label)
            .y_desc(&panel.y_label)
            .label_style((FONT, FONT_SIZE_AXIS))
            .light_line_style(WHITE.mix(0.7));
        if !categories.is_empty() {
            mesh.disable_x_mesh().x_label_formatter(&blank);
        }
        mesh.draw().map_err(plot_err)?;
    }

    // One label per category index.
    let base = area.get_base_pixel();
    let style = TextStyle::from((FONT, FONT_SIZE_AXIS).into_font())
        .pos(Pos::new(HPos::Center, VPos::Top));
    for (i, name) in categories.iter().enumerate() {
        let (px, py) = chart.backend_coord(&(i as f64, y0));
        area.draw(&Text::new(
            name.as_str(),
            (px - base.0, py - base.1 + 4),
            style.clone(),
        ))
        .map_err(plot_err)?;
    }

    for layer in &panel.layers {
        match layer {
            Layer::Points { data, color, size, .. } => {
                let color = RGBColor::from(*color);
                chart
                    .draw_series(
                        data.iter()
                            .filter(|(x, y)| x.is_finite() && y.is_finite())
                            .map(|&(x, y)| Circle::new((x, y), *size, color.filled())),
                    )
                    .map_err(plot_err)?;
            }
            Layer::Line { data, color, width, .. } => {
                let color = RGBColor::from(*color);
                chart
                    .draw_series(LineSeries::new(
                        data.iter().copied().filter(|(x, y)| x.is_finite() && y.is_finite()),
                        color.stroke_width(*width),
                    ))
                    .map_err(plot_err)?;
            }
            Layer::Rule { y, color, width } => {
                let color = RGBColor::from(*color);
                chart
                    .draw_series(LineSeries::new(
                        vec![(x0, *y), (x1, *y)],
                        color.stroke_width(*width),
                    ))
                    .map_err(plot_err)?;
            }
        }
    }
    Ok(())
}
