//! Zero-mean normalised cross-correlation template matching
//! (`TM_CCOEFF_NORMED`) over 8-bit grayscale images.

use image::GrayImage;
use image::imageops::{self, FilterType};
use thiserror::Error;

/// Above this many multiply-adds the search runs coarse-to-fine.
const FULL_SEARCH_BUDGET: f64 = 5.0e7;

/// Smallest template side kept when downscaling.
const MIN_TEMPLATE_SIDE: u32 = 8;

/// Variance below this counts as a flat window.
const FLAT_EPSILON: f64 = 1e-6;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum NccError {
    #[error("template {template_w}x{template_h} is larger than screen {screen_w}x{screen_h}")]
    TemplateTooLarge {
        template_w: u32,
        template_h: u32,
        screen_w: u32,
        screen_h: u32,
    },

    #[error("empty image")]
    Empty,
}

/// Best placement of the template.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NccMatch {
    pub x: u32,
    pub y: u32,
    /// Correlation in `[-1, 1]`; 0 for flat template or window.
    pub score: f64,
}

/// Summed-area tables of pixel values and squared values.
struct Integral {
    width: usize,
    sum: Vec<f64>,
    sq: Vec<f64>,
}

impl Integral {
    fn new(image: &GrayImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0.0; stride * (h + 1)];
        let mut sq = vec![0.0; stride * (h + 1)];
        let raw = image.as_raw();

        for y in 0..h {
            let (mut row_sum, mut row_sq) = (0.0, 0.0);
            for x in 0..w {
                let v = raw[y * w + x] as f64;
                row_sum += v;
                row_sq += v * v;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row_sum;
                sq[(y + 1) * stride + x + 1] = sq[y * stride + x + 1] + row_sq;
            }
        }

        Self { width: w, sum, sq }
    }

    /// Sum and squared sum of the `w`x`h` window at `(x, y)`.
    fn window(&self, x: usize, y: usize, w: usize, h: usize) -> (f64, f64) {
        let stride = self.width + 1;
        let at = |table: &[f64], xx: usize, yy: usize| table[yy * stride + xx];
        let rect = |table: &[f64]| {
            at(table, x + w, y + h) - at(table, x, y + h) - at(table, x + w, y) + at(table, x, y)
        };
        (rect(&self.sum), rect(&self.sq))
    }
}

/// Zero-mean template, its squared norm and its dimensions.
struct Template {
    width: usize,
    height: usize,
    centered: Vec<f64>,
    norm_sq: f64,
}

impl Template {
    fn new(image: &GrayImage) -> Self {
        let n = image.as_raw().len() as f64;
        let mean = image.as_raw().iter().map(|&v| v as f64).sum::<f64>() / n;
        let centered: Vec<f64> = image.as_raw().iter().map(|&v| v as f64 - mean).collect();
        let norm_sq = centered.iter().map(|v| v * v).sum();
        Self {
            width: image.width() as usize,
            height: image.height() as usize,
            centered,
            norm_sq,
        }
    }

    fn score_at(&self, screen: &GrayImage, integral: &Integral, x: usize, y: usize) -> f64 {
        if self.norm_sq < FLAT_EPSILON {
            return 0.0;
        }
        let n = (self.width * self.height) as f64;
        let (sum, sq) = integral.window(x, y, self.width, self.height);
        let window_var = sq - sum * sum / n;
        if window_var < FLAT_EPSILON {
            return 0.0;
        }

        let raw = screen.as_raw();
        let stride = screen.width() as usize;
        let mut cross = 0.0;
        for ty in 0..self.height {
            let row = (y + ty) * stride + x;
            let t_row = ty * self.width;
            for tx in 0..self.width {
                cross += raw[row + tx] as f64 * self.centered[t_row + tx];
            }
        }

        (cross / (self.norm_sq * window_var).sqrt()).clamp(-1.0, 1.0)
    }
}

fn search(
    screen: &GrayImage,
    template: &Template,
    xs: std::ops::RangeInclusive<usize>,
    ys: std::ops::RangeInclusive<usize>,
) -> NccMatch {
    let integral = Integral::new(screen);
    let mut best = NccMatch {
        x: 0,
        y: 0,
        score: f64::NEG_INFINITY,
    };

    for y in ys {
        for x in xs.clone() {
            let score = template.score_at(screen, &integral, x, y);
            if score > best.score {
                best = NccMatch {
                    x: x as u32,
                    y: y as u32,
                    score,
                };
            }
        }
    }

    if best.score == f64::NEG_INFINITY {
        best.score = 0.0;
    }
    best
}

fn search_cost(screen: &GrayImage, template: &GrayImage) -> f64 {
    let positions = (screen.width() - template.width() + 1) as f64
        * (screen.height() - template.height() + 1) as f64;
    positions * template.width() as f64 * template.height() as f64
}

/// Integer downscale factor keeping the search within budget.
fn scale_factor(screen: &GrayImage, template: &GrayImage) -> u32 {
    let cost = search_cost(screen, template);
    if cost <= FULL_SEARCH_BUDGET {
        return 1;
    }
    // Cost shrinks roughly with the fourth power of the factor.
    let wanted = (cost / FULL_SEARCH_BUDGET).powf(0.25).ceil() as u32;
    let max_by_template = (template.width().min(template.height()) / MIN_TEMPLATE_SIDE).max(1);
    wanted.clamp(1, max_by_template)
}

fn downscale(image: &GrayImage, factor: u32) -> GrayImage {
    imageops::resize(
        image,
        (image.width() / factor).max(1),
        (image.height() / factor).max(1),
        FilterType::Triangle,
    )
}

/// Find the best placement of `template` in `screen`.
///
/// Large searches run on downscaled copies first and are then refined at
/// full resolution around the coarse hit.
pub fn match_template(screen: &GrayImage, template: &GrayImage) -> Result<NccMatch, NccError> {
    if screen.width() == 0 || screen.height() == 0 || template.width() == 0 || template.height() == 0 {
        return Err(NccError::Empty);
    }
    if template.width() > screen.width() || template.height() > screen.height() {
        return Err(NccError::TemplateTooLarge {
            template_w: template.width(),
            template_h: template.height(),
            screen_w: screen.width(),
            screen_h: screen.height(),
        });
    }

    let max_x = (screen.width() - template.width()) as usize;
    let max_y = (screen.height() - template.height()) as usize;
    let full_template = Template::new(template);

    let factor = scale_factor(screen, template);
    if factor == 1 {
        return Ok(search(screen, &full_template, 0..=max_x, 0..=max_y));
    }

    let small_screen = downscale(screen, factor);
    let small_template = downscale(template, factor);
    let coarse = if small_template.width() <= small_screen.width()
        && small_template.height() <= small_screen.height()
    {
        let max_sx = (small_screen.width() - small_template.width()) as usize;
        let max_sy = (small_screen.height() - small_template.height()) as usize;
        search(
            &small_screen,
            &Template::new(&small_template),
            0..=max_sx,
            0..=max_sy,
        )
    } else {
        NccMatch {
            x: 0,
            y: 0,
            score: 0.0,
        }
    };

    let f = factor as usize;
    let radius = 2 * f;
    let cx = (coarse.x as usize * f).min(max_x);
    let cy = (coarse.y as usize * f).min(max_y);
    let xs = cx.saturating_sub(radius)..=(cx + radius).min(max_x);
    let ys = cy.saturating_sub(radius)..=(cy + radius).min(max_y);

    tracing::trace!(factor, coarse_x = coarse.x, coarse_y = coarse.y, "Refining coarse match");
    Ok(search(screen, &full_template, xs, ys))
}
