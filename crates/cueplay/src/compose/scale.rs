use std::sync::{Arc, OnceLock};

use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};

use crate::media::Size;

const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

/// Shared 1x1 opaque black frame shown before the first decode and after fatal errors.
pub fn placeholder() -> Arc<RgbaImage> {
    static PLACEHOLDER: OnceLock<Arc<RgbaImage>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Arc::new(RgbaImage::from_pixel(1, 1, BLACK)))
        .clone()
}

pub fn is_placeholder(image: &Arc<RgbaImage>) -> bool {
    Arc::ptr_eq(image, &placeholder())
}

/// Opaque black image of the given size.
pub fn blank(size: Size) -> RgbaImage {
    RgbaImage::from_pixel(size.width, size.height, BLACK)
}

/// Fit `src` inside `size` preserving aspect ratio, centered on black.
pub fn letterbox(src: &RgbaImage, size: Size) -> RgbaImage {
    if src.dimensions() == (size.width, size.height) {
        return src.clone();
    }
    let mut canvas = blank(size);
    if size.is_empty() || src.width() == 0 || src.height() == 0 {
        return canvas;
    }

    let scale = f64::min(
        f64::from(size.width) / f64::from(src.width()),
        f64::from(size.height) / f64::from(src.height()),
    );
    let w = ((f64::from(src.width()) * scale).round() as u32).clamp(1, size.width);
    let h = ((f64::from(src.height()) * scale).round() as u32).clamp(1, size.height);

    let scaled = imageops::resize(src, w, h, FilterType::Triangle);
    let x = (size.width - w) / 2;
    let y = (size.height - h) / 2;
    imageops::replace(&mut canvas, &scaled, i64::from(x), i64::from(y));
    canvas
}

/// Shared frame at `size`: reused when it already fits, blank for the placeholder.
pub fn fit(frame: Arc<RgbaImage>, size: Size) -> Arc<RgbaImage> {
    if is_placeholder(&frame) {
        return Arc::new(blank(size));
    }
    if frame.dimensions() == (size.width, size.height) {
        return frame;
    }
    Arc::new(letterbox(&frame, size))
}

/// Composite `incoming` over `outgoing` with opacity `alpha` in [0, 1].
///
/// The endpoints return exact copies of the respective input.
pub fn blend(outgoing: &RgbaImage, incoming: &RgbaImage, alpha: f32) -> RgbaImage {
    let alpha = alpha.clamp(0.0, 1.0);
    let size = Size::new(outgoing.width(), outgoing.height());
    let incoming = if incoming.dimensions() == outgoing.dimensions() {
        std::borrow::Cow::Borrowed(incoming)
    } else {
        std::borrow::Cow::Owned(letterbox(incoming, size))
    };
    if alpha <= 0.0 {
        return outgoing.clone();
    }
    if alpha >= 1.0 {
        return incoming.into_owned();
    }

    let mut out = outgoing.clone();
    for (dst, src) in out.pixels_mut().zip(incoming.pixels()) {
        for c in 0..4 {
            let a = f32::from(dst.0[c]);
            let b = f32::from(src.0[c]);
            dst.0[c] = (a + (b - a) * alpha).round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}
