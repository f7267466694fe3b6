//! The authored bundle source model.
//!
//! A bundle is declared in one or more TOML documents; serde is the
//! parsing front end, so by the time a [`BundleSource`] exists the
//! markup is already a typed object model. Cross-field legality
//! (mutual exclusions, required companions, reference integrity) is
//! deliberately *not* enforced here; that is the bind pipeline's job,
//! which reports every violation instead of failing on the first.
//!
//! ```toml
//! [bundle]
//! name = "MyProduct"
//! version = "1.0.0"
//!
//! [[ux.payload]]
//! source_file = "ba.exe"
//!
//! [[chain]]
//! package = "MsiA"
//!
//! [[package]]
//! type = "msi"
//! id = "MsiA"
//! source_file = "test.msi"
//! product_code = "{040011E1-F84C-4927-AD62-50A5EC19CA32}"
//! version = "1.0.0.0"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{BoundaryId, CachePolicy, PackageId, PackageKind, Version};

/// Errors loading or parsing a bundle source document.
#[derive(thiserror::Error, Debug)]
pub enum SourceError {
    /// An I/O error occurred while reading a source file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML content could not be deserialized into a bundle source.
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A single payload declaration.
///
/// All fields optional at parse time; the payload resolver enforces
/// the mutual-exclusion matrix.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PayloadSource {
    /// Final on-disk name, when it differs from the source file name.
    #[serde(default)]
    pub name: Option<String>,
    /// Path of the authored file, resolved against the bind paths.
    #[serde(default)]
    pub source_file: Option<String>,
    /// Fetch location for payloads verified at download time.
    #[serde(default)]
    pub download_url: Option<String>,
    /// Externally supplied SHA-512 digest (uppercase hex).
    #[serde(default)]
    pub hash: Option<String>,
    /// Declared uncompressed size for remote payloads.
    #[serde(default)]
    pub size: Option<u64>,
    /// Pinned signing certificate public key.
    #[serde(default)]
    pub certificate_public_key: Option<String>,
    /// Pinned signing certificate thumbprint.
    #[serde(default)]
    pub certificate_thumbprint: Option<String>,
    /// Force embedded (`true`) or external (`false`) packaging.
    #[serde(default)]
    pub compressed: Option<bool>,
}

impl PayloadSource {
    /// Whether any payload attribute was authored at all.
    pub fn is_declared(&self) -> bool {
        self.name.is_some()
            || self.source_file.is_some()
            || self.download_url.is_some()
            || self.hash.is_some()
            || self.certificate_public_key.is_some()
            || self.certificate_thumbprint.is_some()
    }
}

/// A typed primary-payload descriptor (`MsiPackagePayload`, ...).
///
/// May be declared inline under a package or inside a payload group;
/// the validator rejects descriptors whose type does not match the
/// referencing package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackagePayloadSource {
    /// The package kind this descriptor is legal for.
    pub package_type: PackageKind,
    /// The payload attributes.
    #[serde(flatten)]
    pub payload: PayloadSource,
}

/// A named group of payloads shared between packages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayloadGroupSource {
    /// Group identity referenced from packages.
    pub id: String,
    /// Plain payloads contributed to every referencing package.
    #[serde(default, rename = "payload")]
    pub payloads: Vec<PayloadSource>,
    /// Typed primary-payload descriptors contributed to referencing
    /// packages of the matching type.
    #[serde(default, rename = "package_payload")]
    pub package_payloads: Vec<PackagePayloadSource>,
}

/// Fields shared by all four package kinds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageCommonSource {
    /// Package identity.
    pub id: PackageId,
    /// Human-readable display name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Cache policy (defaults to `keep`).
    #[serde(default)]
    pub cache: CachePolicy,
    /// Whether the package is never an uninstall target.
    #[serde(default)]
    pub permanent: bool,
    /// Whether a failure of this package fails the chain.
    #[serde(default = "default_true")]
    pub vital: bool,
    /// Whether the package installs per-machine.
    #[serde(default = "default_true")]
    pub per_machine: bool,
    /// Estimated installed size in bytes.
    #[serde(default)]
    pub install_size: Option<u64>,
    /// Override for the log path variable name.
    #[serde(default)]
    pub log_path_variable: Option<String>,
    /// Override for the rollback log path variable name.
    #[serde(default)]
    pub rollback_log_path_variable: Option<String>,
    /// Inline primary payload attributes, shorthand for a typed
    /// payload descriptor of the package's own kind.
    #[serde(flatten)]
    pub payload: PayloadSource,
    /// Additional owned payloads.
    #[serde(default, rename = "payload")]
    pub payloads: Vec<PayloadSource>,
    /// Payload groups contributing payloads to this package.
    #[serde(default)]
    pub payload_group_refs: Vec<String>,
    /// Published dependency keys.
    #[serde(default, rename = "provides")]
    pub provides: Vec<ProvidesSource>,
    /// Detection rules against related products.
    #[serde(default, rename = "related")]
    pub related: Vec<RelatedPackageSource>,
}

fn default_true() -> bool {
    true
}

/// A published dependency key declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvidesSource {
    /// Dependency key other bundles detect.
    pub key: String,
    /// Published version.
    #[serde(default)]
    pub version: Option<Version>,
    /// Display name shown by dependent bundles.
    #[serde(default)]
    pub display_name: Option<String>,
}

/// A related-product detection rule declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelatedPackageSource {
    /// Identity (product/upgrade code) of the related product.
    pub id: String,
    /// Lower version bound.
    #[serde(default)]
    pub min_version: Option<Version>,
    /// Whether the lower bound is inclusive.
    #[serde(default)]
    pub min_inclusive: bool,
    /// Upper version bound.
    #[serde(default)]
    pub max_version: Option<Version>,
    /// Whether the upper bound is inclusive.
    #[serde(default)]
    pub max_inclusive: bool,
    /// Applicable languages; empty means all languages.
    #[serde(default, rename = "language")]
    pub languages: Vec<String>,
    /// Whether the language list is inclusive or exclusive.
    #[serde(default = "default_true")]
    pub lang_inclusive: bool,
    /// Pure-detection entry, never planned itself.
    #[serde(default)]
    pub only_detect: bool,
}

/// A feature declaration under an MSI package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsiFeatureSource {
    /// Feature identity.
    pub id: String,
    /// Display name.
    #[serde(default)]
    pub display_name: Option<String>,
    /// Installed size contribution in bytes.
    #[serde(default)]
    pub size: Option<u64>,
    /// Display ordering.
    #[serde(default)]
    pub display: Option<i32>,
    /// Install level.
    #[serde(default)]
    pub level: Option<i32>,
    /// Directory override; `Some("")` is a meaningful empty override,
    /// distinct from no override at all.
    #[serde(default)]
    pub directory: Option<String>,
    /// Feature attribute bitmask.
    #[serde(default)]
    pub attributes: Option<u32>,
}

/// A property override declaration under an MSI package.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsiPropertySource {
    /// Property name.
    pub id: String,
    /// Property value.
    pub value: String,
}

/// An installer-database package declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsiPackageSource {
    /// Common package fields.
    #[serde(flatten)]
    pub common: PackageCommonSource,
    /// Product code of the installer database.
    #[serde(default)]
    pub product_code: Option<String>,
    /// Product language.
    #[serde(default)]
    pub language: Option<String>,
    /// Product version.
    #[serde(default)]
    pub version: Option<Version>,
    /// Upgrade code.
    #[serde(default)]
    pub upgrade_code: Option<String>,
    /// Owned feature declarations, in order.
    #[serde(default, rename = "feature")]
    pub features: Vec<MsiFeatureSource>,
    /// Property overrides, in order.
    #[serde(default, rename = "property")]
    pub properties: Vec<MsiPropertySource>,
}

/// An executable package declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExePackageSource {
    /// Common package fields.
    #[serde(flatten)]
    pub common: PackageCommonSource,
    /// Detect condition expression.
    #[serde(default)]
    pub detect_condition: Option<String>,
    /// Detection type override; defaults to condition-based.
    #[serde(default)]
    pub detection_type: Option<crate::DetectionType>,
    /// Arguments appended for install.
    #[serde(default)]
    pub install_arguments: Option<String>,
    /// Arguments appended for repair.
    #[serde(default)]
    pub repair_arguments: Option<String>,
    /// Arguments appended for uninstall.
    #[serde(default)]
    pub uninstall_arguments: Option<String>,
    /// Whether the package supports repair.
    #[serde(default)]
    pub repairable: bool,
}

/// A patch package declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MspPackageSource {
    /// Common package fields.
    #[serde(flatten)]
    pub common: PackageCommonSource,
    /// Patch code, when known at author time.
    #[serde(default)]
    pub patch_code: Option<String>,
}

/// An OS-update package declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MsuPackageSource {
    /// Common package fields.
    #[serde(flatten)]
    pub common: PackageCommonSource,
    /// Detect condition expression.
    #[serde(default)]
    pub detect_condition: Option<String>,
    /// Knowledge-base article identifier.
    #[serde(default)]
    pub kb: Option<String>,
}

/// A package declaration, tagged by kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PackageSource {
    /// An installer-database package.
    Msi(MsiPackageSource),
    /// An executable package.
    Exe(ExePackageSource),
    /// A patch package.
    Msp(MspPackageSource),
    /// An OS-update package.
    Msu(MsuPackageSource),
}

impl PackageSource {
    /// The common fields shared by every kind.
    pub fn common(&self) -> &PackageCommonSource {
        match self {
            Self::Msi(p) => &p.common,
            Self::Exe(p) => &p.common,
            Self::Msp(p) => &p.common,
            Self::Msu(p) => &p.common,
        }
    }

    /// The declared package kind.
    pub fn kind(&self) -> PackageKind {
        match self {
            Self::Msi(_) => PackageKind::Msi,
            Self::Exe(_) => PackageKind::Exe,
            Self::Msp(_) => PackageKind::Msp,
            Self::Msu(_) => PackageKind::Msu,
        }
    }

    /// The package identity.
    pub fn id(&self) -> &PackageId {
        &self.common().id
    }
}

/// One entry of the authored chain or of a package group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChainItemSource {
    /// Reference to a package declaration.
    Package {
        /// Referenced package id.
        package: PackageId,
    },
    /// Reference to a package group, expanded in place.
    Group {
        /// Referenced group id.
        package_group: String,
    },
    /// A rollback boundary cut point.
    Boundary {
        /// Boundary id; must be unique across the chain.
        rollback_boundary: BoundaryId,
    },
}

/// A named, reusable sequence of chain entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageGroupSource {
    /// Group identity referenced from the chain or other groups.
    pub id: String,
    /// Ordered members; groups may reference other groups.
    #[serde(default, rename = "member")]
    pub members: Vec<ChainItemSource>,
}

/// Bundle identity metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleMetaSource {
    /// Bundle display name.
    pub name: String,
    /// Bundle version.
    pub version: Version,
    /// Publisher name.
    #[serde(default)]
    pub manufacturer: Option<String>,
    /// Bundle upgrade code.
    #[serde(default)]
    pub upgrade_code: Option<String>,
}

/// The bootstrapper-application payload set declaration.
///
/// The first payload is the UX entry point.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UxSource {
    /// UX payloads, entry point first.
    #[serde(default, rename = "payload")]
    pub payloads: Vec<PayloadSource>,
}

/// A bundle variable declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableSource {
    /// Variable name.
    pub name: String,
    /// Initial value.
    #[serde(default)]
    pub value: Option<String>,
    /// Whether the value persists across operations.
    #[serde(default)]
    pub persisted: bool,
    /// Whether the value is hidden from logs.
    #[serde(default)]
    pub hidden: bool,
}

/// A complete authored bundle, possibly merged from several documents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleSource {
    /// Bundle identity metadata.
    pub bundle: BundleMetaSource,
    /// The bootstrapper-application payload set.
    #[serde(default)]
    pub ux: UxSource,
    /// The authored chain, in declaration order.
    #[serde(default)]
    pub chain: Vec<ChainItemSource>,
    /// Package declarations.
    #[serde(default, rename = "package")]
    pub packages: Vec<PackageSource>,
    /// Package group declarations.
    #[serde(default, rename = "package_group")]
    pub package_groups: Vec<PackageGroupSource>,
    /// Payload group declarations.
    #[serde(default, rename = "payload_group")]
    pub payload_groups: Vec<PayloadGroupSource>,
    /// Bundle variable declarations.
    #[serde(default, rename = "variable")]
    pub variables: Vec<VariableSource>,
}

impl BundleSource {
    /// Parse a bundle source from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Parse`] if the TOML content is invalid
    /// or does not match the source schema.
    pub fn parse(content: &str) -> Result<Self, SourceError> {
        Ok(toml::from_str(content)?)
    }

    /// Load and parse a bundle source from a file on disk.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::Io`] if the file cannot be read, or
    /// [`SourceError::Parse`] if its contents are invalid.
    pub fn from_file(path: &Path) -> Result<Self, SourceError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Merge another source document into this one.
    ///
    /// The first document owns the bundle identity and chain; later
    /// documents contribute package, group, payload-group, and
    /// variable definitions (fragment libraries). A non-empty chain in
    /// a later document is appended after the existing chain.
    pub fn merge(&mut self, other: BundleSource) {
        self.chain.extend(other.chain);
        self.packages.extend(other.packages);
        self.package_groups.extend(other.package_groups);
        self.payload_groups.extend(other.payload_groups);
        self.variables.extend(other.variables);
        self.ux.payloads.extend(other.ux.payloads);
    }

    /// Look up a package declaration by id.
    pub fn package(&self, id: &PackageId) -> Option<&PackageSource> {
        self.packages.iter().find(|p| p.id() == id)
    }

    /// Look up a package group declaration by id.
    pub fn package_group(&self, id: &str) -> Option<&PackageGroupSource> {
        self.package_groups.iter().find(|g| g.id == id)
    }

    /// Look up a payload group declaration by id.
    pub fn payload_group(&self, id: &str) -> Option<&PayloadGroupSource> {
        self.payload_groups.iter().find(|g| g.id == id)
    }
}
