//! Loads geocoded address points from a KML document.

use crate::address::{Address, AddressCollection, AddressComponent};
use crate::config::AddressConfig;
use geo::Point;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::path::Path;
use territory_env::Crs;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum AddressSourceError {
    #[error("Address source not found: {0}")]
    NotFound(String),
    
    #[error("Malformed address source {path} at byte {position}: {reason}")]
    Malformed {
        path: String,
        position: u64,
        reason: String,
    },
    
    #[error("Cannot read address source {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// Outcome of a successful load.
#[derive(Debug, Clone)]
pub struct AddressLoad {
    pub collection: AddressCollection,
    
    /// Placemarks seen in the document, with or without a usable address
    pub placemark_count: usize,
}

/// One placemark as found in the document, before interpretation.
#[derive(Debug, Default)]
struct RawPlacemark {
    label: Option<String>,
    coordinates: Option<String>,
    attributes: Vec<(String, String)>,
}

impl RawPlacemark {
    /// Records an attribute; the first occurrence of a name wins.
    fn add_attribute(&mut self, name: String, value: &str) {
        if !self.attributes.iter().any(|(k, _)| *k == name) {
            self.attributes.push((name, value.trim().to_string()));
        }
    }
    
    fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Parses `lon,lat[,alt]`; extra tuples after the first are ignored.
fn parse_point(text: &str) -> Option<Point<f64>> {
    let mut parts = text.trim().split(',');
    let lon: f64 = parts.next()?.trim().parse().ok()?;
    let lat: f64 = parts.next()?.split_whitespace().next()?.parse().ok()?;
    (lon.is_finite() && lat.is_finite()).then(|| Point::new(lon, lat))
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

/// Reads placemark points and resolves address components through the
/// configured attribute aliases.
#[derive(Debug, Clone)]
pub struct AddressStore {
    config: AddressConfig,
    crs: Crs,
}

impl AddressStore {
    /// Creates a store producing addresses tagged with `crs`.
    pub fn new(config: AddressConfig, crs: Crs) -> Self {
        Self { config, crs }
    }
    
    /// Loads a KML file.
    pub fn load(&self, path: &Path) -> Result<AddressLoad, AddressSourceError> {
        info!("Loading address source {}", path.display());
        let text = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                AddressSourceError::NotFound(path.display().to_string())
            } else {
                AddressSourceError::Io {
                    path: path.display().to_string(),
                    source,
                }
            }
        })?;
        self.parse(&text, &path.display().to_string())
    }
    
    /// Parses KML text; `origin` names the source in errors.
    pub fn parse(&self, xml: &str, origin: &str) -> Result<AddressLoad, AddressSourceError> {
        let placemarks = read_placemarks(xml).map_err(|(position, reason)| {
            AddressSourceError::Malformed {
                path: origin.to_string(),
                position,
                reason,
            }
        })?;
        let placemark_count = placemarks.len();
        
        let addresses: Vec<Address> = placemarks
            .into_iter()
            .filter_map(|p| self.interpret(p))
            .collect();
        
        info!(
            "Found {} placemarks, extracted {} addresses with house numbers",
            placemark_count,
            addresses.len()
        );
        Ok(AddressLoad {
            collection: AddressCollection::new(self.crs, addresses),
            placemark_count,
        })
    }
    
    fn resolve<'p>(&self, placemark: &'p RawPlacemark, component: AddressComponent) -> Option<&'p str> {
        self.config
            .aliases(component)
            .iter()
            .filter_map(|alias| placemark.attribute(alias))
            .find(|value| !value.is_empty())
    }
    
    fn interpret(&self, placemark: RawPlacemark) -> Option<Address> {
        let point = match placemark.coordinates.as_deref().and_then(parse_point) {
            Some(point) => point,
            None => {
                debug!("Skipping placemark without usable point: {:?}", placemark.label);
                return None;
            }
        };
        
        let house_number = self.resolve(&placemark, AddressComponent::HouseNumber).or_else(|| {
            placemark
                .label
                .as_deref()
                .map(str::trim)
                .filter(|l| {
                    self.config.label_fallback
                        && !l.is_empty()
                        && l.chars().all(|c| c.is_ascii_digit())
                })
        })?;
        
        let mut address = Address::new(point, house_number)?;
        for component in AddressComponent::ALL.into_iter().skip(1) {
            if let Some(value) = self.resolve(&placemark, component) {
                address.set(component, value);
            }
        }
        Some(address)
    }
}

/// Streams the document collecting raw placemarks.
///
/// Errors carry the byte position and reason.
fn read_placemarks(xml: &str) -> Result<Vec<RawPlacemark>, (u64, String)> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    
    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<RawPlacemark> = None;
    let mut attribute_name: Option<String> = None;
    let mut text = String::new();
    let mut placemarks = Vec::new();
    
    loop {
        let position = reader.buffer_position() as u64;
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = local_name(&e);
                if name == "Placemark" {
                    current = Some(RawPlacemark::default());
                } else if current.is_some() && (name == "SimpleData" || name == "Data") {
                    attribute_name = e
                        .try_get_attribute("name")
                        .map_err(|err| (position, err.to_string()))?
                        .map(|a| a.unescape_value().map(|v| v.into_owned()))
                        .transpose()
                        .map_err(|err| (position, err.to_string()))?;
                }
                stack.push(name);
                text.clear();
            }
            Ok(Event::Text(e)) => {
                let chunk = e.unescape().map_err(|err| (position, err.to_string()))?;
                text.push_str(&chunk);
            }
            Ok(Event::CData(e)) => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Ok(Event::End(_)) => {
                let name = stack.pop().unwrap_or_default();
                let parent = stack.last().map(String::as_str);
                
                if let Some(placemark) = current.as_mut() {
                    match (name.as_str(), parent) {
                        ("name", Some("Placemark")) => {
                            placemark.label = Some(text.trim().to_string());
                        }
                        ("coordinates", Some("Point")) if placemark.coordinates.is_none() => {
                            placemark.coordinates = Some(text.trim().to_string());
                        }
                        ("SimpleData", _) => {
                            if let Some(attr) = attribute_name.take() {
                                placemark.add_attribute(attr, &text);
                            }
                        }
                        ("value", Some("Data")) => {
                            if let Some(attr) = attribute_name.clone() {
                                placemark.add_attribute(attr, &text);
                            }
                        }
                        ("Data", _) => attribute_name = None,
                        ("Placemark", _) => placemarks.extend(current.take()),
                        _ => {}
                    }
                }
                text.clear();
            }
            Ok(Event::Eof) => {
                if let Some(open) = stack.last() {
                    return Err((position, format!("unexpected end of document inside <{}>", open)));
                }
                break;
            }
            Ok(_) => {}
            Err(err) => return Err((position, err.to_string())),
        }
    }
    
    Ok(placemarks)
}
