//! Address entities and collections.

use geo::Point;
use serde::{Deserialize, Serialize};
use std::fmt;
use territory_env::Crs;

/// Logical address components, in display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressComponent {
    HouseNumber,
    StreetPrefix,
    StreetName,
    StreetType,
    StreetSuffix,
    UnitType,
    UnitNumber,
    City,
    State,
    Zip,
}

impl AddressComponent {
    pub const ALL: [AddressComponent; 10] = [
        AddressComponent::HouseNumber,
        AddressComponent::StreetPrefix,
        AddressComponent::StreetName,
        AddressComponent::StreetType,
        AddressComponent::StreetSuffix,
        AddressComponent::UnitType,
        AddressComponent::UnitNumber,
        AddressComponent::City,
        AddressComponent::State,
        AddressComponent::Zip,
    ];
    
    pub fn name(&self) -> &'static str {
        match self {
            AddressComponent::HouseNumber => "house_number",
            AddressComponent::StreetPrefix => "street_prefix",
            AddressComponent::StreetName => "street_name",
            AddressComponent::StreetType => "street_type",
            AddressComponent::StreetSuffix => "street_suffix",
            AddressComponent::UnitType => "unit_type",
            AddressComponent::UnitNumber => "unit_number",
            AddressComponent::City => "city",
            AddressComponent::State => "state",
            AddressComponent::Zip => "zip",
        }
    }
    
    fn slot(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for AddressComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A geocoded street address.
///
/// Components are stored trimmed; blank values are absent. An address
/// always has a house number.
#[derive(Debug, Clone, PartialEq)]
pub struct Address {
    /// Location in the owning collection's CRS
    pub point: Point<f64>,
    
    components: [Option<String>; 10],
}

impl Address {
    /// Creates an address; returns `None` when the house number is blank.
    pub fn new(point: Point<f64>, house_number: &str) -> Option<Self> {
        let mut address = Self {
            point,
            components: Default::default(),
        };
        address.set(AddressComponent::HouseNumber, house_number);
        address.house_number()?;
        Some(address)
    }
    
    /// Builder-style setter for a component.
    pub fn with(mut self, component: AddressComponent, value: &str) -> Self {
        self.set(component, value);
        self
    }
    
    pub(crate) fn set(&mut self, component: AddressComponent, value: &str) {
        let value = value.trim();
        if value.is_empty() && component == AddressComponent::HouseNumber {
            return;
        }
        self.components[component.slot()] = (!value.is_empty()).then(|| value.to_string());
    }
    
    /// Returns a component value, if present.
    pub fn get(&self, component: AddressComponent) -> Option<&str> {
        self.components[component.slot()].as_deref()
    }
    
    pub fn house_number(&self) -> Option<&str> {
        self.get(AddressComponent::HouseNumber)
    }
    
    /// Same address at a new location.
    pub fn with_point(&self, point: Point<f64>) -> Self {
        Self {
            point,
            components: self.components.clone(),
        }
    }
}

/// An ordered set of addresses sharing one coordinate system.
#[derive(Debug, Clone, PartialEq)]
pub struct AddressCollection {
    pub crs: Crs,
    pub addresses: Vec<Address>,
}

impl AddressCollection {
    pub fn new(crs: Crs, addresses: Vec<Address>) -> Self {
        Self { crs, addresses }
    }
    
    pub fn empty(crs: Crs) -> Self {
        Self::new(crs, Vec::new())
    }
    
    pub fn len(&self) -> usize {
        self.addresses.len()
    }
    
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
    
    pub fn iter(&self) -> std::slice::Iter<'_, Address> {
        self.addresses.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_requires_house_number() {
        assert!(Address::new(Point::new(0.0, 0.0), "  ").is_none());
        assert!(Address::new(Point::new(0.0, 0.0), "12B").is_some());
    }
    
    #[test]
    fn test_components_are_trimmed() {
        let address = Address::new(Point::new(0.0, 0.0), " 12 ")
            .unwrap()
            .with(AddressComponent::StreetName, "  Oak ")
            .with(AddressComponent::UnitType, "   ");
        
        assert_eq!(address.house_number(), Some("12"));
        assert_eq!(address.get(AddressComponent::StreetName), Some("Oak"));
        assert_eq!(address.get(AddressComponent::UnitType), None);
    }
    
    #[test]
    fn test_component_names() {
        assert_eq!(AddressComponent::ALL.len(), 10);
        assert_eq!(AddressComponent::StreetSuffix.to_string(), "street_suffix");
    }
}
