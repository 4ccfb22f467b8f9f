use std::error::Error;

use itertools::izip;
use plotters::prelude::*;

use crate::types::Float;

/// Draw named time series over a shared time axis into a PNG at `path`,
/// one panel per series.
pub fn plot_series(
    path: &str,
    title: &str,
    times: &[Float],
    series: &[(String, Vec<Float>)],
) -> Result<(), Box<dyn Error>> {
    let (Some(start), Some(end)) = (times.first(), times.last()) else {
        return Ok(());
    };

    let root = BitMapBackend::new(path, (900, 240 * series.len().max(1) as u32))
        .into_drawing_area();
    root.fill(&WHITE)?;
    let root = root.titled(title, ("sans-serif", 24))?;
    let panels = root.split_evenly((series.len().max(1), 1));

    let colors = [BLUE, RED, GREEN, MAGENTA, CYAN, BLACK];
    for (panel, (name, data), color) in izip!(panels.iter(), series.iter(), colors.iter().cycle()) {
        let mut min_y = data.iter().cloned().fold(Float::INFINITY, Float::min);
        let mut max_y = data.iter().cloned().fold(Float::NEG_INFINITY, Float::max);
        if !(max_y > min_y) {
            min_y -= 1.0;
            max_y += 1.0;
        }

        let mut chart = ChartBuilder::on(panel)
            .caption(name, ("sans-serif", 16))
            .margin(8)
            .x_label_area_size(30)
            .y_label_area_size(50)
            .build_cartesian_2d(*start..*end, min_y..max_y)?;
        chart.configure_mesh().draw()?;
        chart.draw_series(LineSeries::new(
            times.iter().cloned().zip(data.iter().cloned()),
            color,
        ))?;
    }

    root.present()?;
    Ok(())
}
