//! Coordinate Reference System handling

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// EPSG code of WGS84 geographic coordinates, the common analysis frame.
pub const WGS84_EPSG: u32 = 4326;

/// Coordinate Reference System representation.
///
/// A CRS is known either by EPSG code (resolved through the bundled
/// `crs-definitions` database) or by an explicit PROJ string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CRS {
    /// EPSG code if known
    epsg: Option<u32>,
    /// PROJ string if available
    proj: Option<String>,
}

impl CRS {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self {
            epsg: Some(code),
            proj: None,
        }
    }

    /// Create a CRS from a PROJ string
    pub fn from_proj(proj: impl Into<String>) -> Self {
        Self {
            epsg: None,
            proj: Some(proj.into()),
        }
    }

    /// WGS84 geographic CRS (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::from_epsg(WGS84_EPSG)
    }

    /// Parse a user-supplied CRS: `EPSG:32633`, a bare code, or a PROJ string.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let code = s
            .strip_prefix("EPSG:")
            .or_else(|| s.strip_prefix("epsg:"))
            .unwrap_or(s);
        if let Ok(epsg) = code.parse::<u32>() {
            return Ok(Self::from_epsg(epsg));
        }
        if s.starts_with("+proj=") {
            return Ok(Self::from_proj(s));
        }
        Err(Error::InvalidParameter {
            name: "crs",
            value: s.to_string(),
            reason: "expected EPSG:<code> or a +proj= string".into(),
        })
    }

    /// Get EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// PROJ definition, looked up from the EPSG database when not given explicitly.
    pub fn proj4(&self) -> Option<&str> {
        if let Some(proj) = &self.proj {
            return Some(proj.as_str());
        }
        let code = u16::try_from(self.epsg?).ok()?;
        crs_definitions::from_code(code).map(|def| def.proj4)
    }

    /// Whether coordinates are longitude/latitude in degrees.
    pub fn is_geographic(&self) -> bool {
        match self.proj4() {
            Some(p) => p.contains("+proj=longlat") || p.contains("+proj=latlong"),
            None => self.epsg == Some(WGS84_EPSG),
        }
    }

    /// Whether this CRS is WGS84 geographic.
    pub fn is_wgs84(&self) -> bool {
        if self.epsg == Some(WGS84_EPSG) {
            return true;
        }
        match self.proj4() {
            Some(p) => p.contains("+proj=longlat") && p.contains("+datum=WGS84"),
            None => false,
        }
    }

    /// Size of one projected unit in metres (1.0 for metric or unknown units).
    pub fn linear_unit_metres(&self) -> f64 {
        let Some(proj) = self.proj4() else {
            return 1.0;
        };
        for token in proj.split_whitespace() {
            if let Some(v) = token.strip_prefix("+to_meter=") {
                if let Ok(f) = v.parse::<f64>() {
                    return f;
                }
            }
            match token {
                "+units=us-ft" => return 1200.0 / 3937.0,
                "+units=ft" => return 0.3048,
                "+units=km" => return 1000.0,
                _ => {}
            }
        }
        1.0
    }

    /// Check if two CRS are equivalent
    pub fn is_equivalent(&self, other: &CRS) -> bool {
        if let (Some(a), Some(b)) = (self.epsg, other.epsg) {
            return a == b;
        }
        match (self.proj4(), other.proj4()) {
            (Some(a), Some(b)) => a.trim() == b.trim(),
            _ => false,
        }
    }

    /// Get a string identifier for this CRS
    pub fn identifier(&self) -> String {
        if let Some(code) = self.epsg {
            return format!("EPSG:{}", code);
        }
        if let Some(proj) = &self.proj {
            return proj.clone();
        }
        "Unknown".to_string()
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl Default for CRS {
    fn default() -> Self {
        Self::wgs84()
    }
}
