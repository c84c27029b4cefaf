//! Point-in-territory filtering in the working coordinate system.

use crate::address::{Address, AddressCollection};
use crate::geometry::{self, InvalidReason};
use crate::projection::Reproject;
use crate::territory::Territory;
use geo::{BoundingRect, Contains, Polygon};
use territory_env::Crs;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    #[error("Addresses are in {addresses} but the territory is in {territory}")]
    CrsMismatch { addresses: Crs, territory: Crs },
    
    #[error("Territory polygon cannot be repaired: {0}")]
    InvalidPolygon(InvalidReason),
}

/// The addresses lying strictly inside one territory, in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct FilteredAddressSet {
    pub crs: Crs,
    pub addresses: Vec<Address>,
}

impl FilteredAddressSet {
    pub fn empty(crs: Crs) -> Self {
        Self {
            crs,
            addresses: Vec::new(),
        }
    }
    
    pub fn len(&self) -> usize {
        self.addresses.len()
    }
    
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

/// Holds the address collection projected once into the working CRS and
/// answers containment queries per territory.
#[derive(Debug, Clone)]
pub struct SpatialFilter {
    projected: AddressCollection,
    
    /// Addresses dropped because they could not be projected
    unprojectable: usize,
}

impl SpatialFilter {
    /// Projects `addresses` into `working`.
    ///
    /// An address that cannot be projected is dropped with a warning; the
    /// rest keep their order.
    pub fn new(addresses: &AddressCollection, working: Crs) -> Self {
        let mut unprojectable = 0;
        let projected = addresses
            .iter()
            .filter_map(|a| match a.point.reproject(addresses.crs, working) {
                Ok(point) => Some(a.with_point(point)),
                Err(e) => {
                    warn!("Dropping address {:?}: {}", a.house_number(), e);
                    unprojectable += 1;
                    None
                }
            })
            .collect();
        
        Self {
            projected: AddressCollection::new(working, projected),
            unprojectable,
        }
    }
    
    pub fn crs(&self) -> Crs {
        self.projected.crs
    }
    
    /// Projected addresses available for filtering.
    pub fn len(&self) -> usize {
        self.projected.len()
    }
    
    pub fn is_empty(&self) -> bool {
        self.projected.is_empty()
    }
    
    pub fn unprojectable(&self) -> usize {
        self.unprojectable
    }
    
    /// Addresses strictly inside the territory's projected boundary.
    pub fn filter(&self, territory: &Territory) -> Result<FilteredAddressSet, FilterError> {
        self.within(&territory.projected, territory.working_crs)
    }
    
    /// Addresses strictly inside `polygon`, which must be in the working CRS.
    ///
    /// Points on the boundary are excluded. An invalid polygon is repaired
    /// once before testing.
    pub fn within(&self, polygon: &Polygon<f64>, crs: Crs) -> Result<FilteredAddressSet, FilterError> {
        if self.projected.is_empty() {
            return Ok(FilteredAddressSet::empty(crs));
        }
        if crs != self.projected.crs {
            return Err(FilterError::CrsMismatch {
                addresses: self.projected.crs,
                territory: crs,
            });
        }
        
        let repaired;
        let polygon = match geometry::check(polygon) {
            Ok(()) => polygon,
            Err(reason) => {
                debug!("Repairing territory polygon before filtering: {}", reason);
                repaired = geometry::repair(polygon);
                geometry::check(&repaired).map_err(FilterError::InvalidPolygon)?;
                &repaired
            }
        };
        
        let Some(bounds) = polygon.bounding_rect() else {
            return Ok(FilteredAddressSet::empty(crs));
        };
        let (min, max) = (bounds.min(), bounds.max());
        
        let addresses = self
            .projected
            .iter()
            .filter(|a| {
                let (x, y) = a.point.x_y();
                x > min.x && x < max.x && y > min.y && y < max.y
            })
            .filter(|a| polygon.contains(&a.point))
            .cloned()
            .collect();
        
        Ok(FilteredAddressSet { crs, addresses })
    }
}
