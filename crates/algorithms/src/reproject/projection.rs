//! Point projection between CRSs with proj4rs
//!
//! Definitions come from the bundled EPSG database (`crs-definitions`) or an
//! explicit PROJ string. proj4rs works in radians for geographic CRSs, so
//! degrees are converted on the way in and out.

use geoshift_core::error::Bounds;
use geoshift_core::{Error, Result, CRS};
use proj4rs::proj::Proj;
use proj4rs::transform::transform;

/// Points sampled along each footprint edge when projecting a bbox.
const EDGE_SAMPLES: usize = 21;

/// A resolved `from -> to` coordinate transformation.
pub struct Projector {
    from: String,
    to: String,
    /// `None` when both CRSs are equivalent
    projs: Option<(Proj, Proj)>,
    from_geographic: bool,
    to_geographic: bool,
}

impl std::fmt::Debug for Projector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Projector")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("identity", &self.is_identity())
            .finish()
    }
}

fn load(crs: &CRS, from: &str, to: &str) -> Result<Proj> {
    let def = crs.proj4().ok_or_else(|| Error::Projection {
        from: from.to_string(),
        to: to.to_string(),
        reason: format!("{} is not in the EPSG database", crs.identifier()),
    })?;
    Proj::from_proj_string(def).map_err(|e| Error::Projection {
        from: from.to_string(),
        to: to.to_string(),
        reason: format!("invalid definition for {}: {:?}", crs.identifier(), e),
    })
}

impl Projector {
    pub fn new(from: &CRS, to: &CRS) -> Result<Self> {
        let (from_id, to_id) = (from.identifier(), to.identifier());
        let projs = if from.is_equivalent(to) {
            None
        } else {
            Some((load(from, &from_id, &to_id)?, load(to, &from_id, &to_id)?))
        };
        Ok(Self {
            from: from_id,
            to: to_id,
            projs,
            from_geographic: from.is_geographic(),
            to_geographic: to.is_geographic(),
        })
    }

    pub fn is_identity(&self) -> bool {
        self.projs.is_none()
    }

    /// Project one point. Points outside the projection's domain fail.
    pub fn project(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let Some((src, dst)) = &self.projs else {
            return Ok((x, y));
        };
        let mut point = if self.from_geographic {
            (x.to_radians(), y.to_radians(), 0.0)
        } else {
            (x, y, 0.0)
        };
        transform(src, dst, &mut point).map_err(|e| Error::Projection {
            from: self.from.clone(),
            to: self.to.clone(),
            reason: format!("({}, {}): {:?}", x, y, e),
        })?;
        let out = if self.to_geographic {
            (point.0.to_degrees(), point.1.to_degrees())
        } else {
            (point.0, point.1)
        };
        if out.0.is_finite() && out.1.is_finite() {
            Ok(out)
        } else {
            Err(Error::Projection {
                from: self.from.clone(),
                to: self.to.clone(),
                reason: format!("({}, {}) has no finite image", x, y),
            })
        }
    }

    /// Envelope of a bbox in the target CRS.
    ///
    /// Each edge is densified before projecting so curved edges are enclosed.
    pub fn project_bounds(&self, bounds: Bounds) -> Result<Bounds> {
        if self.is_identity() {
            return Ok(bounds);
        }
        let (min_x, min_y, max_x, max_y) = bounds;
        let mut env = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        let mut projected = 0usize;
        for i in 0..EDGE_SAMPLES {
            let t = i as f64 / (EDGE_SAMPLES - 1) as f64;
            let x = min_x + t * (max_x - min_x);
            let y = min_y + t * (max_y - min_y);
            for (px, py) in [(x, min_y), (x, max_y), (min_x, y), (max_x, y)] {
                // Edge points outside the projection's domain are skipped.
                if let Ok((qx, qy)) = self.project(px, py) {
                    env.0 = env.0.min(qx);
                    env.1 = env.1.min(qy);
                    env.2 = env.2.max(qx);
                    env.3 = env.3.max(qy);
                    projected += 1;
                }
            }
        }
        if projected == 0 {
            return Err(Error::Projection {
                from: self.from.clone(),
                to: self.to.clone(),
                reason: format!("no point of {:?} could be projected", bounds),
            });
        }
        Ok(env)
    }
}
