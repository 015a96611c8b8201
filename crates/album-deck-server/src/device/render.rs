//! Key image rendering.

use album_deck_types::PlayerState;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};

use super::{ControlGlyph, KeyFace};
use crate::library::Artwork;

const CONTROL_BACKGROUND: Rgb<u8> = Rgb([0, 128, 128]);
const GLYPH: Rgb<u8> = Rgb([255, 255, 255]);
const EMPTY_BACKGROUND: Rgb<u8> = Rgb([24, 24, 24]);
/// Inset applied to every glyph, as a fraction of the key edge.
const MARGIN: f32 = 0.2;

/// Draw `face` as a square `size`×`size` image.
pub fn render_face(face: &KeyFace, size: u32) -> DynamicImage {
    let image = match face {
        KeyFace::Blank => RgbImage::from_pixel(size, size, Rgb([0, 0, 0])),
        KeyFace::Album { album_id, artwork } => album_tile(*album_id, artwork.as_ref(), size),
        KeyFace::NowPlaying {
            album_id,
            artwork,
            state,
        } => now_playing(*album_id, artwork.as_ref(), *state, size),
        KeyFace::Control(glyph) => control(*glyph, size),
    };
    DynamicImage::ImageRgb8(image)
}

fn album_tile(album_id: u32, artwork: Option<&Artwork>, size: u32) -> RgbImage {
    if let Some(art) = artwork {
        match image::load_from_memory(&art.data) {
            Ok(decoded) => {
                return decoded
                    .resize_to_fill(size, size, FilterType::Triangle)
                    .to_rgb8();
            }
            Err(e) => {
                tracing::debug!(album_id, error = %e, "artwork decode failed; using colour tile");
            }
        }
    }
    RgbImage::from_pixel(size, size, tile_colour(album_id))
}

/// Deterministic, mid-brightness colour for albums without artwork.
fn tile_colour(album_id: u32) -> Rgb<u8> {
    let [a, b, c, _] = album_id.to_le_bytes();
    Rgb([64 + a % 160, 64 + b % 160, 64 + c % 160])
}

fn now_playing(
    album_id: Option<u32>,
    artwork: Option<&Artwork>,
    state: PlayerState,
    size: u32,
) -> RgbImage {
    let mut image = match album_id {
        Some(id) => {
            let mut tile = album_tile(id, artwork, size);
            dim(&mut tile);
            tile
        }
        None => RgbImage::from_pixel(size, size, EMPTY_BACKGROUND),
    };
    let s = size as f32;
    let lo = s * MARGIN;
    let hi = s * (1.0 - MARGIN);
    match state {
        PlayerState::Playing => fill_triangle(&mut image, [(lo, lo), (lo, hi), (hi, s / 2.0)]),
        PlayerState::Paused => {
            let bar = (hi - lo) / 3.0;
            fill_rect(&mut image, lo, lo, lo + bar, hi);
            fill_rect(&mut image, hi - bar, lo, hi, hi);
        }
        PlayerState::Stopped | PlayerState::Unknown => fill_rect(&mut image, lo, lo, hi, hi),
    }
    image
}

fn control(glyph: ControlGlyph, size: u32) -> RgbImage {
    let mut image = RgbImage::from_pixel(size, size, CONTROL_BACKGROUND);
    let s = size as f32;
    let lo = s * MARGIN;
    let hi = s * (1.0 - MARGIN);
    let mid = s / 2.0;
    match glyph {
        ControlGlyph::NextTrack => {
            fill_triangle(&mut image, [(lo, lo), (lo, hi), (hi - s * 0.1, mid)]);
            fill_rect(&mut image, hi - s * 0.1, lo, hi, hi);
        }
        ControlGlyph::PreviousTrack => {
            fill_rect(&mut image, lo, lo, lo + s * 0.1, hi);
            fill_triangle(&mut image, [(hi, lo), (hi, hi), (lo + s * 0.1, mid)]);
        }
        ControlGlyph::CarouselForward => {
            fill_triangle(&mut image, [(lo, lo), (lo, hi), (hi, mid)]);
        }
        ControlGlyph::CarouselBack => {
            fill_triangle(&mut image, [(hi, lo), (hi, hi), (lo, mid)]);
        }
    }
    image
}

fn dim(image: &mut RgbImage) {
    for pixel in image.pixels_mut() {
        for channel in pixel.0.iter_mut() {
            *channel /= 2;
        }
    }
}

fn fill_rect(image: &mut RgbImage, x0: f32, y0: f32, x1: f32, y1: f32) {
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let (px, py) = (x as f32 + 0.5, y as f32 + 0.5);
        if px >= x0 && px <= x1 && py >= y0 && py <= y1 {
            *pixel = GLYPH;
        }
    }
}

fn fill_triangle(image: &mut RgbImage, points: [(f32, f32); 3]) {
    let edge = |a: (f32, f32), b: (f32, f32), p: (f32, f32)| {
        (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0)
    };
    let [a, b, c] = points;
    for (x, y, pixel) in image.enumerate_pixels_mut() {
        let p = (x as f32 + 0.5, y as f32 + 0.5);
        let d1 = edge(a, b, p);
        let d2 = edge(b, c, p);
        let d3 = edge(c, a, p);
        let has_neg = d1 < 0.0 || d2 < 0.0 || d3 < 0.0;
        let has_pos = d1 > 0.0 || d2 > 0.0 || d3 > 0.0;
        if !(has_neg && has_pos) {
            *pixel = GLYPH;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;

    use super::*;

    #[test]
    fn album_without_artwork_gets_stable_colour_tile() {
        let face = KeyFace::Album {
            album_id: 0x00_30_20_10,
            artwork: None,
        };
        let a = render_face(&face, 16).to_rgb8();
        let b = render_face(&face, 16).to_rgb8();
        assert_eq!(a, b);
        assert_eq!(a.get_pixel(0, 0), &tile_colour(0x00_30_20_10));
    }

    #[test]
    fn artwork_is_scaled_to_key_size() {
        let source = RgbImage::from_pixel(40, 20, Rgb([200, 10, 10]));
        let mut png = Vec::new();
        DynamicImage::ImageRgb8(source)
            .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();
        let face = KeyFace::Album {
            album_id: 1,
            artwork: Some(Artwork {
                mime_type: "image/png".to_string(),
                data: Arc::from(png),
            }),
        };
        let image = render_face(&face, 24).to_rgb8();
        assert_eq!(image.dimensions(), (24, 24));
        assert_eq!(image.get_pixel(12, 12), &Rgb([200, 10, 10]));
    }

    #[test]
    fn controls_draw_glyph_over_background() {
        let image = render_face(&KeyFace::Control(ControlGlyph::CarouselForward), 72).to_rgb8();
        assert_eq!(image.get_pixel(0, 0), &CONTROL_BACKGROUND);
        assert_eq!(image.get_pixel(30, 36), &GLYPH);
    }

    #[test]
    fn now_playing_shows_state_glyph() {
        let face = KeyFace::NowPlaying {
            album_id: None,
            artwork: None,
            state: PlayerState::Stopped,
        };
        let image = render_face(&face, 72).to_rgb8();
        assert_eq!(image.get_pixel(36, 36), &GLYPH);
        assert_eq!(image.get_pixel(2, 2), &EMPTY_BACKGROUND);
    }
}
