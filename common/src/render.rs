use core::convert::Infallible;

use embedded_graphics::{
    image::Image,
    mono_font::{ascii::FONT_10X20, MonoTextStyle},
    pixelcolor::Rgb888,
    prelude::*,
    primitives::{PrimitiveStyle, Rectangle},
    text::{Alignment, Text},
};
use log::{info, warn};
use tinybmp::Bmp;

use crate::error::RenderError;

/// Landscape width of the 2.9" panel.
pub const WIDTH: usize = 296;
/// Landscape height of the 2.9" panel.
pub const HEIGHT: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelColor {
    White,
    Black,
    Red,
}

impl PanelColor {
    const PALETTE: [(PanelColor, Rgb888); 3] = [
        (PanelColor::White, Rgb888::WHITE),
        (PanelColor::Black, Rgb888::BLACK),
        (PanelColor::Red, Rgb888::RED),
    ];

    /// Closest panel ink by squared RGB distance.
    pub fn nearest(color: Rgb888) -> Self {
        let distance = |ink: Rgb888| {
            let dr = i32::from(color.r()) - i32::from(ink.r());
            let dg = i32::from(color.g()) - i32::from(ink.g());
            let db = i32::from(color.b()) - i32::from(ink.b());
            dr * dr + dg * dg + db * db
        };

        Self::PALETTE
            .iter()
            .min_by_key(|(_, ink)| distance(*ink))
            .map_or(PanelColor::White, |(panel, _)| *panel)
    }
}

/// Bit planes in the controller's native portrait orientation, one bit per
/// pixel, MSB first. A set bit means the pixel does not carry that ink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanelPlanes {
    pub black: Vec<u8>,
    pub red: Vec<u8>,
}

/// Landscape tri-color frame for the whole panel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    pixels: Vec<PanelColor>,
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self {
            pixels: vec![PanelColor::White; WIDTH * HEIGHT],
        }
    }
}

impl FrameBuffer {
    pub fn pixel(&self, x: usize, y: usize) -> Option<PanelColor> {
        if x >= WIDTH || y >= HEIGHT {
            return None;
        }
        self.pixels.get(y * WIDTH + x).copied()
    }

    pub fn fill(&mut self, color: PanelColor) {
        self.pixels.fill(color);
    }

    pub fn count(&self, color: PanelColor) -> usize {
        self.pixels.iter().filter(|pixel| **pixel == color).count()
    }

    /// Rotates the frame onto the panel's 128x296 portrait memory layout.
    /// Landscape pixel (x, y) lands at native column `127 - y`, row `x`.
    pub fn to_planes(&self) -> PanelPlanes {
        const NATIVE_WIDTH: usize = HEIGHT;
        const NATIVE_HEIGHT: usize = WIDTH;
        const ROW_BYTES: usize = NATIVE_WIDTH / 8;

        let mut black = vec![0xFF_u8; ROW_BYTES * NATIVE_HEIGHT];
        let mut red = vec![0xFF_u8; ROW_BYTES * NATIVE_HEIGHT];

        for (index, pixel) in self.pixels.iter().enumerate() {
            let (x, y) = (index % WIDTH, index / WIDTH);
            let (column, row) = (NATIVE_WIDTH - 1 - y, x);
            let byte = row * ROW_BYTES + column / 8;
            let mask = 0x80_u8 >> (column % 8);

            match pixel {
                PanelColor::White => {}
                PanelColor::Black => black[byte] &= !mask,
                PanelColor::Red => red[byte] &= !mask,
            }
        }

        PanelPlanes { black, red }
    }
}

impl OriginDimensions for FrameBuffer {
    fn size(&self) -> Size {
        Size::new(WIDTH as u32, HEIGHT as u32)
    }
}

impl DrawTarget for FrameBuffer {
    type Color = Rgb888;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            let (Ok(x), Ok(y)) = (usize::try_from(point.x), usize::try_from(point.y)) else {
                continue;
            };
            if x < WIDTH && y < HEIGHT {
                self.pixels[y * WIDTH + x] = PanelColor::nearest(color);
            }
        }
        Ok(())
    }
}

/// The e-paper panel, or whatever stands in for it.
pub trait Display {
    /// Pushes the whole frame and triggers a full refresh.
    fn show(&mut self, frame: &FrameBuffer) -> Result<(), RenderError>;
}

/// Parses a BMP and draws it at the origin of a white frame.
pub fn decode_bitmap(bytes: &[u8]) -> Result<FrameBuffer, RenderError> {
    let bmp = Bmp::<Rgb888>::from_slice(bytes)
        .map_err(|err| RenderError::Decode(format!("{err:?}")))?;

    let size = bmp.bounding_box().size;
    if size != Size::new(WIDTH as u32, HEIGHT as u32) {
        warn!(
            "bitmap is {}x{} but the panel is {WIDTH}x{HEIGHT}; drawing it anyway",
            size.width, size.height
        );
    }

    let mut frame = FrameBuffer::default();
    Image::new(&bmp, Point::zero()).draw(&mut frame)?;
    Ok(frame)
}

pub fn draw_low_battery(frame: &mut FrameBuffer) -> Result<(), RenderError> {
    frame.fill(PanelColor::White);

    let outline = PrimitiveStyle::with_stroke(Rgb888::BLACK, 4);
    Rectangle::new(Point::new(98, 24), Size::new(84, 40))
        .into_styled(outline)
        .draw(frame)?;
    // Terminal nub.
    Rectangle::new(Point::new(182, 36), Size::new(10, 16))
        .into_styled(PrimitiveStyle::with_fill(Rgb888::BLACK))
        .draw(frame)?;
    Rectangle::new(Point::new(104, 30), Size::new(12, 28))
        .into_styled(PrimitiveStyle::with_fill(Rgb888::RED))
        .draw(frame)?;

    let style = MonoTextStyle::new(&FONT_10X20, Rgb888::BLACK);
    Text::with_alignment(
        "LOW BATTERY",
        Point::new(WIDTH as i32 / 2, 92),
        style,
        Alignment::Center,
    )
    .draw(frame)?;
    Text::with_alignment(
        "please recharge",
        Point::new(WIDTH as i32 / 2, 116),
        MonoTextStyle::new(&FONT_10X20, Rgb888::RED),
        Alignment::Center,
    )
    .draw(frame)?;

    Ok(())
}

/// Decodes `image` and puts it on the panel.
pub fn render(display: &mut dyn Display, image: &[u8]) -> Result<(), RenderError> {
    let frame = decode_bitmap(image)?;
    info!("drawing bitmap to display");
    display.show(&frame)?;
    info!("finished drawing bitmap");
    Ok(())
}

pub fn render_low_battery(display: &mut dyn Display) -> Result<(), RenderError> {
    let mut frame = FrameBuffer::default();
    draw_low_battery(&mut frame)?;
    info!("drawing low battery screen");
    display.show(&frame)
}

/// Builds an uncompressed 24-bit BMP from top-down rows of pixels.
#[cfg(test)]
pub(crate) fn test_bitmap(width: u32, height: u32, color: impl Fn(u32, u32) -> Rgb888) -> Vec<u8> {
    let row_len = (width * 3).div_ceil(4) * 4;
    let data_len = row_len * height;
    let offset: u32 = 14 + 40;

    let mut bytes = Vec::with_capacity((offset + data_len) as usize);
    bytes.extend_from_slice(b"BM");
    bytes.extend_from_slice(&(offset + data_len).to_le_bytes());
    bytes.extend_from_slice(&[0; 4]);
    bytes.extend_from_slice(&offset.to_le_bytes());

    bytes.extend_from_slice(&40_u32.to_le_bytes());
    bytes.extend_from_slice(&(width as i32).to_le_bytes());
    bytes.extend_from_slice(&(height as i32).to_le_bytes());
    bytes.extend_from_slice(&1_u16.to_le_bytes());
    bytes.extend_from_slice(&24_u16.to_le_bytes());
    bytes.extend_from_slice(&0_u32.to_le_bytes());
    bytes.extend_from_slice(&data_len.to_le_bytes());
    bytes.extend_from_slice(&2835_i32.to_le_bytes());
    bytes.extend_from_slice(&2835_i32.to_le_bytes());
    bytes.extend_from_slice(&0_u32.to_le_bytes());
    bytes.extend_from_slice(&0_u32.to_le_bytes());

    // Bottom-up rows, BGR order.
    for y in (0..height).rev() {
        let start = bytes.len();
        for x in 0..width {
            let pixel = color(x, y);
            bytes.extend_from_slice(&[pixel.b(), pixel.g(), pixel.r()]);
        }
        bytes.resize(start + row_len as usize, 0);
    }

    bytes
}
