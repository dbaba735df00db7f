//! Domain types for the Harvester archive.
//!
//! Identifiers are opaque newtypes: application, package and depot ids are
//! numeric, manifest version ids are comparison-only strings (never ordered).
//! All types are serializable/deserializable via serde + serde_json.

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed application identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AppId(pub u32);

impl fmt::Display for AppId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for AppId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// A strongly-typed depot identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DepotId(pub u32);

impl fmt::Display for DepotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for DepotId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// A strongly-typed license-package identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageId(pub u32);

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for PackageId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// An opaque manifest version identifier.
///
/// Version ids are compared for equality only; there is no ordering between
/// two versions of the same depot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ManifestId(pub String);

impl fmt::Display for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for ManifestId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ManifestId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Classification enums
// ---------------------------------------------------------------------------

/// The content category of an application, as reported by product metadata.
///
/// Only games, DLC and plain applications carry archivable depots; everything
/// else (tools, videos, music, demos, …) is skipped. Unrecognized categories
/// are preserved verbatim instead of being string-matched at call sites.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppCategory {
    Game,
    Dlc,
    Application,
    Unknown(String),
}

impl AppCategory {
    /// Parse a raw category string from product metadata (case-insensitive).
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_lowercase().as_str() {
            "game" => AppCategory::Game,
            "dlc" => AppCategory::Dlc,
            "application" => AppCategory::Application,
            _ => AppCategory::Unknown(raw.to_owned()),
        }
    }

    /// Whether depots of this category are archived.
    pub fn is_archivable(&self) -> bool {
        matches!(
            self,
            AppCategory::Game | AppCategory::Dlc | AppCategory::Application
        )
    }
}

impl fmt::Display for AppCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppCategory::Game => write!(f, "game"),
            AppCategory::Dlc => write!(f, "dlc"),
            AppCategory::Application => write!(f, "application"),
            AppCategory::Unknown(raw) => write!(f, "unknown({raw})"),
        }
    }
}

/// The billing class of a license package.
///
/// Numeric billing codes from package metadata map onto a closed set of
/// variants; codes outside the known range land in `Unknown` and never grant
/// ownership.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BillingClass {
    NoCost,
    BillOnceOnly,
    BillMonthly,
    ProofOfPrepurchase,
    GuestPass,
    HardwarePromo,
    Gift,
    AutoGrant,
    OemTicket,
    RecurringOption,
    BillOnceOrCdKey,
    Repurchaseable,
    FreeOnDemand,
    Rental,
    CommercialLicense,
    FreeCommercialLicense,
    Unknown(u32),
}

impl BillingClass {
    pub fn from_code(code: u32) -> Self {
        match code {
            0 => BillingClass::NoCost,
            1 => BillingClass::BillOnceOnly,
            2 => BillingClass::BillMonthly,
            3 => BillingClass::ProofOfPrepurchase,
            4 => BillingClass::GuestPass,
            5 => BillingClass::HardwarePromo,
            6 => BillingClass::Gift,
            7 => BillingClass::AutoGrant,
            8 => BillingClass::OemTicket,
            9 => BillingClass::RecurringOption,
            10 => BillingClass::BillOnceOrCdKey,
            11 => BillingClass::Repurchaseable,
            12 => BillingClass::FreeOnDemand,
            13 => BillingClass::Rental,
            14 => BillingClass::CommercialLicense,
            15 => BillingClass::FreeCommercialLicense,
            other => BillingClass::Unknown(other),
        }
    }

    /// Whether this billing class marks a package the account paid for.
    ///
    /// Paid packages are the ones worth an authenticated fetch pass; free and
    /// promotional grants are ignored.
    pub fn grants_ownership(&self) -> bool {
        matches!(
            self,
            BillingClass::BillOnceOnly
                | BillingClass::BillMonthly
                | BillingClass::ProofOfPrepurchase
                | BillingClass::Gift
                | BillingClass::BillOnceOrCdKey
                | BillingClass::Repurchaseable
                | BillingClass::Rental
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn newtype_display() {
        assert_eq!(AppId(730).to_string(), "730");
        assert_eq!(DepotId(731).to_string(), "731");
        assert_eq!(ManifestId::from("8044").to_string(), "8044");
    }

    #[test]
    fn manifest_ids_compare_for_equality_only() {
        let a = ManifestId::from("123");
        let b = ManifestId::from(String::from("123"));
        assert_eq!(a, b);
        assert_ne!(a, ManifestId::from("124"));
    }

    #[rstest]
    #[case("game", AppCategory::Game)]
    #[case("Game", AppCategory::Game)]
    #[case("DLC", AppCategory::Dlc)]
    #[case("application", AppCategory::Application)]
    fn category_parse_known(#[case] raw: &str, #[case] expected: AppCategory) {
        assert_eq!(AppCategory::parse(raw), expected);
        assert!(AppCategory::parse(raw).is_archivable());
    }

    #[test]
    fn category_parse_unknown_is_not_archivable() {
        let parsed = AppCategory::parse("music");
        assert_eq!(parsed, AppCategory::Unknown("music".to_string()));
        assert!(!parsed.is_archivable());
    }

    #[rstest]
    #[case(1, true)]
    #[case(2, true)]
    #[case(3, true)]
    #[case(6, true)]
    #[case(10, true)]
    #[case(11, true)]
    #[case(13, true)]
    #[case(0, false)]
    #[case(7, false)]
    #[case(12, false)]
    fn billing_ownership(#[case] code: u32, #[case] paid: bool) {
        assert_eq!(BillingClass::from_code(code).grants_ownership(), paid);
    }

    #[test]
    fn billing_unknown_code_never_grants_ownership() {
        let billing = BillingClass::from_code(99);
        assert_eq!(billing, BillingClass::Unknown(99));
        assert!(!billing.grants_ownership());
    }

    #[test]
    fn id_serde_roundtrip_as_map_key() {
        use std::collections::BTreeMap;

        let mut versions = BTreeMap::new();
        versions.insert(DepotId(731), ManifestId::from("abc"));
        let json = serde_json::to_string(&versions).expect("serialize");
        assert_eq!(json, r#"{"731":"abc"}"#);
        let back: BTreeMap<DepotId, ManifestId> =
            serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, versions);
    }
}
