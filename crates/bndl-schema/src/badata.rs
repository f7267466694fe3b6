//! The bootstrapper-application data document.
//!
//! A separate document embedded alongside the manifest, carrying the
//! presentation-facing records a bootstrapper application needs
//! without walking the manifest itself. The records are derived from,
//! but not identical to, the manifest's package and feature records.

use serde::{Deserialize, Serialize};

use crate::manifest::{ElementLine, decode_framed, encode_framed, yes_no};
use crate::{CachePolicy, DocumentError, PackageId, PackageKind, Version};

/// Presentation-facing summary of one chain package.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageProperties {
    /// The summarized package.
    pub package: PackageId,
    /// Whether a failure of the package fails the chain.
    pub vital: bool,
    /// Display name, when declared.
    pub display_name: Option<String>,
    /// Bytes that must be fetched for the package.
    pub download_size: u64,
    /// Total payload size in bytes.
    pub package_size: u64,
    /// Estimated installed size in bytes.
    pub installed_size: u64,
    /// The package kind.
    pub package_type: PackageKind,
    /// Whether the package is never an uninstall target.
    pub permanent: bool,
    /// Variable name receiving the package log path.
    pub log_path_variable: Option<String>,
    /// Variable name receiving the rollback log path.
    pub rollback_log_path_variable: Option<String>,
    /// Whether every payload of the package is embedded.
    pub compressed: bool,
    /// Product code, for installer-database packages.
    pub product_code: Option<String>,
    /// Upgrade code, for installer-database packages.
    pub upgrade_code: Option<String>,
    /// Package version, when known.
    pub version: Option<Version>,
    /// Cache policy.
    pub cache: CachePolicy,
}

impl PackageProperties {
    /// Render this record to its canonical element line.
    pub fn to_element_line(&self) -> String {
        ElementLine::new("PackageProperties")
            .attr("Package", &self.package)
            .attr("Vital", yes_no(self.vital))
            .attr_opt("DisplayName", self.display_name.as_ref())
            .attr("DownloadSize", self.download_size)
            .attr("PackageSize", self.package_size)
            .attr("InstalledSize", self.installed_size)
            .attr("PackageType", self.package_type.short_name())
            .attr("Permanent", yes_no(self.permanent))
            .attr_opt("LogPathVariable", self.log_path_variable.as_ref())
            .attr_opt(
                "RollbackLogPathVariable",
                self.rollback_log_path_variable.as_ref(),
            )
            .attr("Compressed", yes_no(self.compressed))
            .attr_opt("ProductCode", self.product_code.as_ref())
            .attr_opt("UpgradeCode", self.upgrade_code.as_ref())
            .attr_opt("Version", self.version.as_ref())
            .attr("Cache", self.cache.as_str())
            .finish()
    }
}

/// Flattened feature record, usable independently of the owning
/// package's payload records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageFeatureInfo {
    /// The owning package.
    pub package: PackageId,
    /// Feature identity.
    pub feature: String,
    /// Installed size contribution in bytes.
    pub size: u64,
    /// Display ordering.
    pub display: i32,
    /// Install level.
    pub level: i32,
    /// Directory override; an empty string is a meaningful override.
    pub directory: String,
    /// Feature attribute bitmask.
    pub attributes: u32,
}

impl PackageFeatureInfo {
    /// Render this record to its canonical element line.
    pub fn to_element_line(&self) -> String {
        ElementLine::new("PackageFeatureInfo")
            .attr("Package", &self.package)
            .attr("Feature", &self.feature)
            .attr("Size", self.size)
            .attr("Display", self.display)
            .attr("Level", self.level)
            .attr("Directory", &self.directory)
            .attr("Attributes", self.attributes)
            .finish()
    }
}

/// The complete bootstrapper-application data document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BootstrapperApplicationData {
    /// One record per chain package, in chain order.
    pub package_properties: Vec<PackageProperties>,
    /// One record per MSI feature, in chain then feature order.
    pub feature_infos: Vec<PackageFeatureInfo>,
}

impl BootstrapperApplicationData {
    /// Serialize to the framed binary form embedded in the artifact.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Codec`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, DocumentError> {
        encode_framed(self)
    }

    /// Recover a document from its framed binary form.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError`] if the frame or payload is invalid.
    pub fn decode(bytes: &[u8]) -> Result<Self, DocumentError> {
        decode_framed(bytes)
    }
}
