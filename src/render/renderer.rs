//! Road grid rendering system
//!
//! Implements frame rendering with tiny-skia. Layout calculation is kept
//! apart from rasterisation so the geometry can be tested without pixels.

use std::fs;
use std::path::Path;

use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, Rect as SkiaRect, Stroke, Transform};

use crate::app::traffic::{CarColor, CarInfo};
use crate::domain::{Cell, LaneCode, RoadGrid};

const EMPTY_COLOR: (u8, u8, u8) = (34, 34, 38);
const ROAD_COLOR: (u8, u8, u8) = (92, 92, 100);
const CROSSING_COLOR: (u8, u8, u8) = (140, 140, 150);
const ARROW_COLOR: (u8, u8, u8, u8) = (230, 230, 230, 200);
const GRID_LINE_COLOR: (u8, u8, u8, u8) = (0, 0, 0, 120);

/// Rendering errors
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Failed to create a {width}x{height} pixmap")]
    PixmapCreationFailed { width: u32, height: u32 },

    #[error("A {rows}x{cols} grid at {cell_px} px per cell does not fit in a pixmap")]
    CanvasTooLarge { rows: usize, cols: usize, cell_px: u32 },

    #[error("Invalid cell size: {0} px")]
    InvalidCellSize(u32),

    #[error("Failed to encode PNG: {0}")]
    Encode(String),

    #[error("Failed to write frame: {0}")]
    Io(#[from] std::io::Error),
}

/// A filled cell background
#[derive(Debug, Clone)]
pub struct CellFill {
    pub rect: SkiaRect,
    pub color: Color,
}

/// Represents a single line segment
#[derive(Debug, Clone)]
pub struct Line {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub width: f32,
    pub color: Color,
}

/// A car drawn as a filled circle
#[derive(Debug, Clone)]
pub struct CarMarker {
    pub x: f32,
    pub y: f32,
    pub radius: f32,
    pub color: Color,
}

/// Pre-calculated geometry of one frame
#[derive(Debug, Clone)]
pub struct FrameLayout {
    /// Cell backgrounds by lane kind
    pub cells: Vec<CellFill>,

    /// Travel direction marks on road cells
    pub arrows: Vec<Line>,

    /// Grid lines between cells
    pub lines: Vec<Line>,

    pub cars: Vec<CarMarker>,

    pub canvas_width: u32,
    pub canvas_height: u32,
}

impl FrameLayout {
    /// Lays out `grid` with one marker per car in `cars`
    ///
    /// Cars outside the grid are skipped.
    pub fn from_grid(grid: &RoadGrid, cars: &[CarInfo], cell_px: u32) -> Result<Self, RenderError> {
        if cell_px == 0 {
            return Err(RenderError::InvalidCellSize(cell_px));
        }

        let (rows, cols) = grid.dimensions();
        let canvas_side = |count: usize| u32::try_from(count).ok().and_then(|n| n.checked_mul(cell_px));
        let (Some(canvas_width), Some(canvas_height)) = (canvas_side(cols), canvas_side(rows)) else {
            return Err(RenderError::CanvasTooLarge { rows, cols, cell_px });
        };

        let mut layout = Self {
            cells: Vec::with_capacity(rows * cols),
            arrows: Vec::new(),
            lines: Vec::new(),
            cars: Vec::with_capacity(cars.len()),
            canvas_width,
            canvas_height,
        };

        layout.calculate_cells(grid, cell_px as f32)?;
        layout.calculate_grid_lines(rows, cols, cell_px as f32);
        layout.calculate_cars(grid, cars, cell_px as f32);

        Ok(layout)
    }

    fn calculate_cells(&mut self, grid: &RoadGrid, size: f32) -> Result<(), RenderError> {
        let arrow_color = rgba(ARROW_COLOR);

        for (cell, lane) in grid.iter() {
            let (x, y) = origin(cell, size);
            let rect = SkiaRect::from_xywh(x, y, size, size)
                .ok_or(RenderError::InvalidCellSize(size as u32))?;
            self.cells.push(CellFill {
                rect,
                color: lane_color(lane),
            });

            if let Some(direction) = lane.road_direction() {
                let (cx, cy) = (x + size / 2.0, y + size / 2.0);
                let (dr, dc) = direction.delta();
                let reach = size * 0.35;
                self.arrows.push(Line {
                    x1: cx,
                    y1: cy,
                    x2: cx + dc as f32 * reach,
                    y2: cy + dr as f32 * reach,
                    width: (size * 0.08).max(1.0),
                    color: arrow_color,
                });
            }
        }
        Ok(())
    }

    /// Calculate horizontal and vertical grid lines
    fn calculate_grid_lines(&mut self, rows: usize, cols: usize, size: f32) {
        let width = (size * 0.04).max(1.0);
        let color = rgba(GRID_LINE_COLOR);
        let canvas_width = cols as f32 * size;
        let canvas_height = rows as f32 * size;

        for col in 1..cols {
            let x = col as f32 * size;
            self.lines.push(Line {
                x1: x,
                y1: 0.0,
                x2: x,
                y2: canvas_height,
                width,
                color,
            });
        }

        for row in 1..rows {
            let y = row as f32 * size;
            self.lines.push(Line {
                x1: 0.0,
                y1: y,
                x2: canvas_width,
                y2: y,
                width,
                color,
            });
        }
    }

    fn calculate_cars(&mut self, grid: &RoadGrid, cars: &[CarInfo], size: f32) {
        for car in cars.iter().filter(|car| grid.contains(car.position)) {
            let (x, y) = origin(car.position, size);
            self.cars.push(CarMarker {
                x: x + size / 2.0,
                y: y + size / 2.0,
                radius: size * 0.35,
                color: car_color(car.color),
            });
        }
    }
}

/// Frame renderer using tiny-skia
#[derive(Debug, Default)]
pub struct FrameRenderer;

impl FrameRenderer {
    pub fn new() -> Self {
        Self
    }

    /// Lays out and renders one frame
    pub fn render(&self, grid: &RoadGrid, cars: &[CarInfo], cell_px: u32) -> Result<Pixmap, RenderError> {
        let layout = FrameLayout::from_grid(grid, cars, cell_px)?;
        self.render_layout(&layout)
    }

    /// Render a frame layout to a pixmap
    pub fn render_layout(&self, layout: &FrameLayout) -> Result<Pixmap, RenderError> {
        let mut pixmap = Pixmap::new(layout.canvas_width, layout.canvas_height).ok_or(
            RenderError::PixmapCreationFailed {
                width: layout.canvas_width,
                height: layout.canvas_height,
            },
        )?;
        pixmap.fill(rgb(EMPTY_COLOR));

        for fill in &layout.cells {
            let mut paint = Paint::default();
            paint.set_color(fill.color);
            pixmap.fill_rect(fill.rect, &paint, Transform::identity(), None);
        }

        self.render_lines(&mut pixmap, &layout.arrows);
        self.render_lines(&mut pixmap, &layout.lines);
        self.render_cars(&mut pixmap, &layout.cars);

        Ok(pixmap)
    }

    fn render_lines(&self, pixmap: &mut Pixmap, lines: &[Line]) {
        for line in lines {
            let mut path_builder = PathBuilder::new();
            path_builder.move_to(line.x1, line.y1);
            path_builder.line_to(line.x2, line.y2);

            if let Some(path) = path_builder.finish() {
                let mut paint = Paint::default();
                paint.set_color(line.color);

                let stroke = Stroke {
                    width: line.width,
                    ..Stroke::default()
                };

                pixmap.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
            }
        }
    }

    fn render_cars(&self, pixmap: &mut Pixmap, cars: &[CarMarker]) {
        for car in cars {
            let Some(path) = PathBuilder::from_circle(car.x, car.y, car.radius) else {
                continue;
            };
            let mut paint = Paint::default();
            paint.set_color(car.color);
            pixmap.fill_path(&path, &paint, FillRule::Winding, Transform::identity(), None);
        }
    }
}

/// Writes a rendered frame as PNG
pub fn save_png(pixmap: &Pixmap, path: impl AsRef<Path>) -> Result<(), RenderError> {
    let bytes = pixmap
        .encode_png()
        .map_err(|err| RenderError::Encode(err.to_string()))?;
    fs::write(path, bytes)?;
    Ok(())
}

fn origin(cell: Cell, size: f32) -> (f32, f32) {
    (cell.col as f32 * size, cell.row as f32 * size)
}

fn lane_color(lane: LaneCode) -> Color {
    if lane.is_crossing() {
        rgb(CROSSING_COLOR)
    } else if lane == LaneCode::Empty {
        rgb(EMPTY_COLOR)
    } else {
        rgb(ROAD_COLOR)
    }
}

fn car_color(color: CarColor) -> Color {
    Color::from_rgba8(color.r, color.g, color.b, 255)
}

fn rgb((r, g, b): (u8, u8, u8)) -> Color {
    Color::from_rgba8(r, g, b, 255)
}

fn rgba((r, g, b, a): (u8, u8, u8, u8)) -> Color {
    Color::from_rgba8(r, g, b, a)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLUS: &str = "3\n4\n0 3 0 0\n2 11 2 2\n0 3 0 0\n";

    fn car(id: u64, row: usize, col: usize) -> CarInfo {
        CarInfo {
            id,
            position: Cell::new(row, col),
            color: CarColor::for_id(id),
        }
    }

    fn pixel(pixmap: &Pixmap, x: u32, y: u32) -> (u8, u8, u8) {
        let p = pixmap.pixel(x, y).unwrap();
        (p.red(), p.green(), p.blue())
    }

    #[test]
    fn layout_covers_every_cell() {
        let grid: RoadGrid = PLUS.parse().unwrap();
        let layout = FrameLayout::from_grid(&grid, &[], 10).unwrap();

        assert_eq!(layout.cells.len(), 12);
        assert_eq!(layout.canvas_width, 40);
        assert_eq!(layout.canvas_height, 30);
        // 3 inner vertical lines + 2 inner horizontal lines
        assert_eq!(layout.lines.len(), 5);
        // one mark per plain road cell
        assert_eq!(layout.arrows.len(), 5);
    }

    #[test]
    fn arrows_point_along_the_road() {
        let grid: RoadGrid = "1\n2\n4 3\n".parse().unwrap();
        let layout = FrameLayout::from_grid(&grid, &[], 20).unwrap();

        let left = &layout.arrows[0];
        assert!(left.x2 < left.x1);
        assert_eq!(left.y2, left.y1);

        let down = &layout.arrows[1];
        assert!(down.y2 > down.y1);
        assert_eq!(down.x2, down.x1);
    }

    #[test]
    fn zero_cell_size_is_rejected() {
        let grid: RoadGrid = PLUS.parse().unwrap();
        let result = FrameLayout::from_grid(&grid, &[], 0);
        assert!(matches!(result, Err(RenderError::InvalidCellSize(0))));
    }

    #[test]
    fn oversized_canvas_is_an_error() {
        let grid: RoadGrid = "1\n12\n2 2 2 2 2 2 2 2 2 2 2 2\n".parse().unwrap();
        let result = FrameLayout::from_grid(&grid, &[], 400_000_000);
        assert!(matches!(
            result,
            Err(RenderError::CanvasTooLarge { rows: 1, cols: 12, cell_px: 400_000_000 })
        ));
    }

    #[test]
    fn cars_outside_the_grid_are_skipped() {
        let grid: RoadGrid = PLUS.parse().unwrap();
        let layout = FrameLayout::from_grid(&grid, &[car(1, 1, 1), car(2, 9, 9)], 10).unwrap();
        assert_eq!(layout.cars.len(), 1);
    }

    #[test]
    fn render_paints_lanes_and_cars() {
        let grid: RoadGrid = PLUS.parse().unwrap();
        let cars = [car(3, 1, 2)];
        let pixmap = FrameRenderer::new().render(&grid, &cars, 20).unwrap();

        assert_eq!((pixmap.width(), pixmap.height()), (80, 60));

        // empty cell (0, 0)
        assert_eq!(pixel(&pixmap, 10, 10), EMPTY_COLOR);
        // crossing (1, 1), away from the centre
        assert_eq!(pixel(&pixmap, 23, 23), CROSSING_COLOR);
        // car at (1, 2)
        let expected = CarColor::for_id(3);
        assert_eq!(pixel(&pixmap, 50, 30), (expected.r, expected.g, expected.b));
    }

    #[test]
    fn save_png_writes_a_png_file() {
        let grid: RoadGrid = PLUS.parse().unwrap();
        let pixmap = FrameRenderer::new().render(&grid, &[car(1, 0, 1)], 8).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        save_png(&pixmap, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }

    #[test]
    fn save_png_reports_io_errors() {
        let grid: RoadGrid = PLUS.parse().unwrap();
        let pixmap = FrameRenderer::new().render(&grid, &[], 4).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("frame.png");
        assert!(matches!(save_png(&pixmap, &path), Err(RenderError::Io(_))));
    }
}
