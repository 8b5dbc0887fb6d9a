//! Monte Carlo member sampling.
//!
//! Every member draws a cultivar, a weather pixel and a soil pixel uniformly
//! with replacement. Weather and soil come from the same pixel set but are
//! drawn independently, so a member's soil may sit in a different pixel than
//! its weather.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::error::{EnsembleError, RecordKind, Result};
use crate::tables::{CultivarRecord, PixelRecord};

/// One sampled (cultivar, weather pixel, soil pixel) combination.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleMember<'a> {
    pub cultivar: &'a CultivarRecord,
    pub weather: &'a PixelRecord,
    pub soil: &'a PixelRecord,
}

/// Draw `n` independent members for `district`.
///
/// Both sets are checked for emptiness before the first draw.
pub fn sample_members<'a, R: Rng + ?Sized>(
    rng: &mut R,
    district: &str,
    cultivars: &'a [CultivarRecord],
    pixels: &'a [PixelRecord],
    n: usize,
) -> Result<Vec<EnsembleMember<'a>>> {
    if cultivars.is_empty() {
        return Err(empty(district, RecordKind::Cultivar));
    }
    if pixels.is_empty() {
        return Err(empty(district, RecordKind::Pixel));
    }

    let mut members = Vec::with_capacity(n);
    for _ in 0..n {
        // Draw order is cultivar, weather, soil; seeded runs depend on it.
        let cultivar = cultivars.choose(rng).ok_or_else(|| empty(district, RecordKind::Cultivar))?;
        let weather = pixels.choose(rng).ok_or_else(|| empty(district, RecordKind::Pixel))?;
        let soil = pixels.choose(rng).ok_or_else(|| empty(district, RecordKind::Pixel))?;
        members.push(EnsembleMember { cultivar, weather, soil });
    }
    Ok(members)
}

fn empty(district: &str, kind: RecordKind) -> EnsembleError {
    EnsembleError::EmptySet { district: district.to_string(), kind }
}
