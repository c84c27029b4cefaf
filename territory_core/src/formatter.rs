//! Display strings, natural ordering and street grouping for table rows.

use crate::address::{Address, AddressComponent as C};
use std::cmp::Ordering;

// =============================================================================
// NATURAL SORT KEY
// =============================================================================

/// One token of a natural sort key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPart {
    /// A run of ASCII digits, leading zeros removed (`"0"` for all zeros)
    Number(String),
    /// A non-digit run, lowercased
    Text(String),
}

impl Ord for KeyPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyPart::Number(a), KeyPart::Number(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (KeyPart::Text(a), KeyPart::Text(b)) => a.cmp(b),
            (KeyPart::Number(_), KeyPart::Text(_)) => Ordering::Less,
            (KeyPart::Text(_), KeyPart::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for KeyPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Tuple-like key comparing embedded numbers by value.
///
/// Keys compare part by part; a key that is a prefix of another sorts
/// first, so the empty key sorts before everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NaturalKey(pub Vec<KeyPart>);

/// Splits `text` into digit and non-digit runs.
///
/// `None` yields the empty key.
pub fn natural_sort_key(text: Option<&str>) -> NaturalKey {
    let Some(text) = text else {
        return NaturalKey::default();
    };
    
    let mut parts = Vec::new();
    let mut rest = text;
    while let Some(first) = rest.chars().next() {
        let digits = first.is_ascii_digit();
        let end = rest
            .find(|c: char| c.is_ascii_digit() != digits)
            .unwrap_or(rest.len());
        let (token, tail) = rest.split_at(end);
        parts.push(if digits {
            let trimmed = token.trim_start_matches('0');
            KeyPart::Number(if trimmed.is_empty() { "0" } else { trimmed }.to_string())
        } else {
            KeyPart::Text(token.to_lowercase())
        });
        rest = tail;
    }
    NaturalKey(parts)
}

// =============================================================================
// DISPLAY FIELDS
// =============================================================================

/// Table-ready strings for one address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedAddress {
    /// Uppercased street, used for grouping
    pub full_street: String,
    pub address: String,
    pub unit: String,
    pub locality: String,
    pub sort_key: NaturalKey,
}

fn join<'a>(parts: impl IntoIterator<Item = Option<&'a str>>, separator: &str) -> String {
    parts
        .into_iter()
        .flatten()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(separator)
}

pub fn format_address(address: &Address) -> FormattedAddress {
    let get = move |c| address.get(c);
    let street = [C::StreetPrefix, C::StreetName, C::StreetType, C::StreetSuffix];
    
    let state_zip = join([get(C::State), get(C::Zip)], " ");
    
    FormattedAddress {
        full_street: join(street.map(get), " ").to_uppercase(),
        address: join(std::iter::once(get(C::HouseNumber)).chain(street.map(get)), " "),
        unit: join([get(C::UnitType), get(C::UnitNumber)], " "),
        locality: join([get(C::City), Some(state_zip.as_str())], ", "),
        sort_key: natural_sort_key(address.house_number()),
    }
}

// =============================================================================
// GROUPING
// =============================================================================

/// Consecutive rows sharing one street.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreetGroup {
    pub street: String,
    pub rows: Vec<FormattedAddress>,
}

/// Formats, sorts by street then house number, and groups by street.
pub fn sort_and_group<'a>(addresses: impl IntoIterator<Item = &'a Address>) -> Vec<StreetGroup> {
    let mut rows: Vec<FormattedAddress> = addresses.into_iter().map(format_address).collect();
    rows.sort_by(|a, b| {
        a.full_street
            .cmp(&b.full_street)
            .then_with(|| a.sort_key.cmp(&b.sort_key))
    });
    
    let mut groups: Vec<StreetGroup> = Vec::new();
    for row in rows {
        match groups.last_mut() {
            Some(group) if group.street == row.full_street => group.rows.push(row),
            _ => groups.push(StreetGroup {
                street: row.full_street.clone(),
                rows: vec![row],
            }),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Point;
    use proptest::prelude::*;
    
    fn key(s: &str) -> NaturalKey {
        natural_sort_key(Some(s))
    }
    
    fn on_street(number: &str, name: &str, kind: &str) -> Address {
        Address::new(Point::new(0.0, 0.0), number)
            .unwrap()
            .with(C::StreetName, name)
            .with(C::StreetType, kind)
    }
    
    #[test]
    fn test_natural_order() {
        assert!(key("Unit 2") < key("Unit 10"));
        assert!(key("2") < key("10"));
        assert!(key("12A") < key("12B"));
        assert!(key("12") < key("12A"));
        assert_eq!(key("007"), key("7"));
        assert_eq!(key("Apt"), key("APT"));
    }
    
    #[test]
    fn test_empty_and_missing_sort_first() {
        assert_eq!(natural_sort_key(None), NaturalKey::default());
        assert_eq!(key(""), NaturalKey::default());
        assert!(natural_sort_key(None) < key("0"));
        assert!(natural_sort_key(None) < key("a"));
    }
    
    #[test]
    fn test_numbers_before_text_at_same_position() {
        assert!(key("5") < key("A"));
        assert!(key("99") < key("-1"));
    }
    
    #[test]
    fn test_huge_numbers_compare_by_value() {
        assert!(key("99999999999999999999") < key("100000000000000000000"));
    }
    
    #[test]
    fn test_format_fields() {
        let address = Address::new(Point::new(0.0, 0.0), "1208")
            .unwrap()
            .with(C::StreetPrefix, "N")
            .with(C::StreetName, "Oak")
            .with(C::StreetType, "St")
            .with(C::UnitType, "Apt")
            .with(C::UnitNumber, "2")
            .with(C::City, "Springfield")
            .with(C::State, "IL")
            .with(C::Zip, "62701");
        let f = format_address(&address);
        
        assert_eq!(f.full_street, "N OAK ST");
        assert_eq!(f.address, "1208 N Oak St");
        assert_eq!(f.unit, "Apt 2");
        assert_eq!(f.locality, "Springfield, IL 62701");
        assert_eq!(format_address(&address), f);
    }
    
    #[test]
    fn test_sparse_locality() {
        let zip_only = Address::new(Point::new(0.0, 0.0), "1").unwrap().with(C::Zip, "62701");
        assert_eq!(format_address(&zip_only).locality, "62701");
        
        let city_only = Address::new(Point::new(0.0, 0.0), "1").unwrap().with(C::City, "Salem");
        let f = format_address(&city_only);
        assert_eq!(f.locality, "Salem");
        assert_eq!(f.unit, "");
        assert_eq!(f.full_street, "");
    }
    
    #[test]
    fn test_group_oak_and_elm() {
        let addresses = vec![
            on_street("10", "Oak", "St"),
            on_street("3", "Elm", "Ave"),
            on_street("2", "Oak", "St"),
            on_street("21", "Elm", "Ave"),
            on_street("9", "Oak", "St"),
            on_street("3B", "Elm", "Ave"),
        ];
        let groups = sort_and_group(&addresses);
        
        let streets: Vec<_> = groups.iter().map(|g| g.street.as_str()).collect();
        assert_eq!(streets, vec!["ELM AVE", "OAK ST"]);
        
        let numbers = |g: &StreetGroup| g.rows.iter().map(|r| r.address.clone()).collect::<Vec<_>>();
        assert_eq!(numbers(&groups[0]), vec!["3 Elm Ave", "3B Elm Ave", "21 Elm Ave"]);
        assert_eq!(numbers(&groups[1]), vec!["2 Oak St", "9 Oak St", "10 Oak St"]);
    }
    
    #[test]
    fn test_empty_input_has_no_groups() {
        assert!(sort_and_group(&[]).is_empty());
    }
    
    proptest! {
        #[test]
        fn test_numeric_keys_follow_value(a in any::<u64>(), b in any::<u64>()) {
            let (ka, kb) = (key(&a.to_string()), key(&b.to_string()));
            prop_assert_eq!(ka.cmp(&kb), a.cmp(&b));
            
            let (ua, ub) = (key(&format!("Unit {}", a)), key(&format!("Unit {}", b)));
            prop_assert_eq!(ua.cmp(&ub), a.cmp(&b));
        }
        
        #[test]
        fn test_key_is_deterministic(s in "\\PC{0,12}") {
            prop_assert_eq!(key(&s), key(&s));
        }
        
        #[test]
        fn test_grouping_keeps_every_address(streets in proptest::collection::vec(0usize..4, 0..20)) {
            let names = ["Oak", "Elm", "Main", "Pine"];
            let addresses: Vec<Address> = streets
                .iter()
                .enumerate()
                .map(|(i, s)| on_street(&(i + 1).to_string(), names[*s], "St"))
                .collect();
            let groups = sort_and_group(&addresses);
            
            prop_assert_eq!(groups.iter().map(|g| g.rows.len()).sum::<usize>(), addresses.len());
            for pair in groups.windows(2) {
                prop_assert!(pair[0].street < pair[1].street);
            }
        }
    }
}
