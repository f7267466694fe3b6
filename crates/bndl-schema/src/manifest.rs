//! The bound bundle manifest.
//!
//! A [`BundleManifest`] is the immutable serialization of a linked
//! chain, its payload/container graph, and bundle-level metadata. It
//! is produced once at bind time, embedded in the bundle artifact, and
//! recovered byte-for-byte by the extractor. The original loosely
//! typed document tree becomes a closed set of tagged record variants
//! here; attribute presence in the model is attribute presence in the
//! encoding (`Option` fields are omitted, never emitted empty).
//!
//! Encoding is postcard framed by [`crate::DOCUMENT_MAGIC`] and
//! [`crate::FORMAT_VERSION`]. The module also renders canonical
//! element lines (`<MsiPackage Id='...' .../>`) used by the
//! extractor's selector queries and the integration tests.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{
    BoundaryId, ContainerId, DOCUMENT_MAGIC, FORMAT_VERSION, PackageId, PayloadHash, PayloadId,
    Version, VersionBound,
};

/// Cache policy for a package's payloads after a successful operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// Keep the cached payloads for repair and uninstall.
    #[default]
    Keep,
    /// Remove the cached payloads once the operation completes.
    Remove,
}

impl CachePolicy {
    /// Canonical lowercase attribute value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Keep => "keep",
            Self::Remove => "remove",
        }
    }
}

/// The four installable unit kinds a chain can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageKind {
    /// A full installer database package.
    Msi,
    /// A self-contained executable package.
    Exe,
    /// A patch package applied to an installed product.
    Msp,
    /// An operating-system update package.
    Msu,
}

impl PackageKind {
    /// Element name of the package in the manifest chain (`MsiPackage`, ...).
    pub fn package_element(self) -> &'static str {
        match self {
            Self::Msi => "MsiPackage",
            Self::Exe => "ExePackage",
            Self::Msp => "MspPackage",
            Self::Msu => "MsuPackage",
        }
    }

    /// Element name of the typed payload descriptor (`MsiPackagePayload`, ...).
    pub fn payload_element(self) -> &'static str {
        match self {
            Self::Msi => "MsiPackagePayload",
            Self::Exe => "ExePackagePayload",
            Self::Msp => "MspPackagePayload",
            Self::Msu => "MsuPackagePayload",
        }
    }

    /// Short type name used in bootstrapper-application data (`Msi`, ...).
    pub fn short_name(self) -> &'static str {
        match self {
            Self::Msi => "Msi",
            Self::Exe => "Exe",
            Self::Msp => "Msp",
            Self::Msu => "Msu",
        }
    }

    /// Plural package element name used in type-mismatch messages.
    pub fn package_element_plural(self) -> &'static str {
        match self {
            Self::Msi => "MsiPackages",
            Self::Exe => "ExePackages",
            Self::Msp => "MspPackages",
            Self::Msu => "MsuPackages",
        }
    }
}

impl std::fmt::Display for PackageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.short_name())
    }
}

/// How a payload travels with the bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Packaging {
    /// Carried inside one of the bundle's containers.
    Embedded,
    /// Fetched from its download URL at run time and verified by hash.
    Download,
}

impl Packaging {
    /// Canonical lowercase attribute value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Embedded => "embedded",
            Self::Download => "download",
        }
    }
}

/// How an exe package's installed state is detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DetectionType {
    /// Evaluate the package's detect condition.
    #[default]
    Condition,
    /// The package has no detection; it is always planned.
    None,
}

impl DetectionType {
    /// Canonical lowercase attribute value.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Condition => "condition",
            Self::None => "none",
        }
    }
}

/// Bundle-level metadata carried in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleInfo {
    /// Bundle display name.
    pub name: String,
    /// Bundle version.
    pub version: Version,
    /// Publisher name, when declared.
    pub manufacturer: Option<String>,
    /// Bundle upgrade code, when declared.
    pub upgrade_code: Option<String>,
    /// Bundle variables available to the bootstrapper application.
    pub variables: Vec<BundleVariable>,
}

/// A bundle variable definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleVariable {
    /// Variable name.
    pub name: String,
    /// Initial value, when declared.
    pub value: Option<String>,
    /// Whether the value persists across operations.
    pub persisted: bool,
    /// Whether the value is hidden from logs.
    pub hidden: bool,
}

/// The bootstrapper-application payload set.
///
/// The first referenced payload is the UX entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UxManifest {
    /// Payload ids in the distinguished UX container, entry point first.
    pub payload_refs: Vec<PayloadId>,
}

/// Physical role of a container inside the artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerKind {
    /// The distinguished bootstrapper-application container.
    Ux,
    /// An attached container holding package payloads.
    Attached,
}

/// Layout record for one container.
///
/// Byte offsets of individual payloads within the container live on
/// the [`Payload`] records; the absolute position of the container in
/// the artifact lives in the artifact header, so extraction never
/// scans.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerLayout {
    /// Container identity (`UxContainer`, `AttachedContainer`).
    pub id: ContainerId,
    /// Whether this is the UX container or an attached container.
    pub kind: ContainerKind,
    /// Total size in bytes of the container's packed data.
    pub size: u64,
    /// Number of payload frames packed in the container.
    pub payload_count: u32,
}

/// One file contributed to the bundle or one of its packages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Payload identity.
    pub id: PayloadId,
    /// Final on-disk relative path at extraction/installation time.
    pub file_path: String,
    /// Uncompressed size in bytes (0 when unknown for remote payloads).
    pub file_size: u64,
    /// SHA-512 content digest, when known at bind time or declared.
    pub hash: Option<PayloadHash>,
    /// Whether the payload is embedded or downloaded.
    pub packaging: Packaging,
    /// Slot name inside the owning container (`a0`, `u1`, ...).
    pub source_path: Option<String>,
    /// The container the payload resides in, when embedded.
    pub container: Option<ContainerId>,
    /// Fetch location for download payloads.
    pub download_url: Option<String>,
    /// Pinned signing certificate public key (always paired with the
    /// thumbprint).
    pub certificate_public_key: Option<String>,
    /// Pinned signing certificate thumbprint (always paired with the
    /// public key).
    pub certificate_thumbprint: Option<String>,
    /// Byte offset of the payload's frame within its container.
    pub source_offset: Option<u64>,
    /// Compressed size of the payload's frame within its container.
    pub packed_size: Option<u64>,
}

/// Fields common to all four package kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackageBase {
    /// Package identity.
    pub id: PackageId,
    /// Cache policy for the package's payloads.
    pub cache: CachePolicy,
    /// Deterministic cache identifier.
    pub cache_id: String,
    /// Estimated installed size in bytes.
    pub install_size: u64,
    /// Total payload size in bytes.
    pub size: u64,
    /// Whether the package installs per-machine (vs per-user).
    pub per_machine: bool,
    /// Whether the package is never an uninstall target.
    pub permanent: bool,
    /// Whether a failure of this package fails the chain.
    pub vital: bool,
    /// Boundary immediately before this package, set on the first
    /// package of a recovery scope.
    pub rollback_boundary_forward: Option<BoundaryId>,
    /// Boundary closing this package's scope, set on the last package
    /// of a recovery scope.
    pub rollback_boundary_backward: Option<BoundaryId>,
    /// Variable name receiving the package log path.
    pub log_path_variable: Option<String>,
    /// Variable name receiving the rollback log path.
    pub rollback_log_path_variable: Option<String>,
    /// Human-readable display name.
    pub display_name: Option<String>,
    /// Dependency keys this package publishes.
    pub provides: Vec<Provides>,
    /// Detection rules against related products.
    pub related: Vec<RelatedPackage>,
    /// Ordered payload references, primary payload first.
    pub payload_refs: Vec<PayloadId>,
}

/// A published dependency key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provides {
    /// Dependency key other bundles detect.
    pub key: String,
    /// Published version, when declared.
    pub version: Option<Version>,
    /// Display name shown by dependent bundles.
    pub display_name: Option<String>,
}

/// A detection rule referencing another product by identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedPackage {
    /// Identity (product/upgrade code) of the related product.
    pub id: String,
    /// Lower version bound, when declared.
    pub min_version: Option<VersionBound>,
    /// Upper version bound, when declared.
    pub max_version: Option<VersionBound>,
    /// Applicable languages; empty means all languages.
    pub languages: Vec<String>,
    /// Whether the language list is inclusive or exclusive.
    pub lang_inclusive: bool,
    /// Pure-detection entry: influences upgrade decisions but is never
    /// itself planned.
    pub only_detect: bool,
}

impl RelatedPackage {
    /// Whether a detected product version and language match this rule.
    pub fn matches(&self, version: &Version, language: Option<&str>) -> bool {
        if let Some(min) = &self.min_version
            && !min.admits_as_min(version)
        {
            return false;
        }
        if let Some(max) = &self.max_version
            && !max.admits_as_max(version)
        {
            return false;
        }
        if self.languages.is_empty() {
            return true;
        }
        let listed = language.is_some_and(|lang| self.languages.iter().any(|l| l == lang));
        if self.lang_inclusive { listed } else { !listed }
    }
}

/// An installer-database package in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsiPackage {
    /// Common package fields.
    pub base: PackageBase,
    /// Product code of the installer database.
    pub product_code: String,
    /// Product language, when declared.
    pub language: Option<String>,
    /// Product version.
    pub version: Version,
    /// Upgrade code, when declared.
    pub upgrade_code: Option<String>,
    /// Ordered feature references.
    pub features: Vec<MsiFeature>,
    /// Ordered property overrides.
    pub properties: Vec<MsiProperty>,
}

/// A feature reference inside an MSI chain package.
///
/// The manifest carries only the feature identity; the flattened
/// feature-info records (size, display, level, ...) travel in the
/// bootstrapper-application data document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsiFeature {
    /// Feature identity.
    pub id: String,
}

/// A property override passed to the installer database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsiProperty {
    /// Property name.
    pub id: String,
    /// Property value.
    pub value: String,
}

/// A self-contained executable package in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExePackage {
    /// Common package fields.
    pub base: PackageBase,
    /// How installed state is detected.
    pub detection_type: DetectionType,
    /// Detect condition expression, when detection is condition-based.
    pub detect_condition: Option<String>,
    /// Arguments appended for install.
    pub install_arguments: Option<String>,
    /// Arguments appended for repair.
    pub repair_arguments: Option<String>,
    /// Arguments appended for uninstall.
    pub uninstall_arguments: Option<String>,
    /// Whether the package supports repair at all.
    pub repairable: bool,
}

/// A patch package in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MspPackage {
    /// Common package fields.
    pub base: PackageBase,
    /// Patch code, when known at bind time.
    pub patch_code: Option<String>,
}

/// An operating-system update package in the chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MsuPackage {
    /// Common package fields.
    pub base: PackageBase,
    /// Detect condition expression, when declared.
    pub detect_condition: Option<String>,
    /// Knowledge-base article identifier, when declared.
    pub kb: Option<String>,
}

/// A named cut point delimiting an atomic recovery scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackBoundary {
    /// Boundary identity.
    pub id: BoundaryId,
}

/// One entry of the bound chain, in installation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ChainEntry {
    /// An installer-database package.
    Msi(MsiPackage),
    /// An executable package.
    Exe(ExePackage),
    /// A patch package.
    Msp(MspPackage),
    /// An OS-update package.
    Msu(MsuPackage),
    /// A rollback boundary.
    RollbackBoundary(RollbackBoundary),
}

impl ChainEntry {
    /// The common package fields, or `None` for a boundary entry.
    pub fn base(&self) -> Option<&PackageBase> {
        match self {
            Self::Msi(p) => Some(&p.base),
            Self::Exe(p) => Some(&p.base),
            Self::Msp(p) => Some(&p.base),
            Self::Msu(p) => Some(&p.base),
            Self::RollbackBoundary(_) => None,
        }
    }

    /// Mutable access to the common package fields.
    pub fn base_mut(&mut self) -> Option<&mut PackageBase> {
        match self {
            Self::Msi(p) => Some(&mut p.base),
            Self::Exe(p) => Some(&mut p.base),
            Self::Msp(p) => Some(&mut p.base),
            Self::Msu(p) => Some(&mut p.base),
            Self::RollbackBoundary(_) => None,
        }
    }

    /// The package kind, or `None` for a boundary entry.
    pub fn kind(&self) -> Option<PackageKind> {
        match self {
            Self::Msi(_) => Some(PackageKind::Msi),
            Self::Exe(_) => Some(PackageKind::Exe),
            Self::Msp(_) => Some(PackageKind::Msp),
            Self::Msu(_) => Some(PackageKind::Msu),
            Self::RollbackBoundary(_) => None,
        }
    }

    /// Manifest element name of this entry.
    pub fn element_name(&self) -> &'static str {
        match self {
            Self::Msi(_) => "MsiPackage",
            Self::Exe(_) => "ExePackage",
            Self::Msp(_) => "MspPackage",
            Self::Msu(_) => "MsuPackage",
            Self::RollbackBoundary(_) => "RollbackBoundary",
        }
    }
}

/// The bound, immutable manifest of one bundle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BundleManifest {
    /// Bundle-level metadata.
    pub info: BundleInfo,
    /// The bootstrapper-application payload set.
    pub ux: UxManifest,
    /// Container layout table, in artifact order (UX container first).
    pub containers: Vec<ContainerLayout>,
    /// All payloads, bundle-wide.
    pub payloads: Vec<Payload>,
    /// The chain, in installation order with boundaries interleaved.
    pub chain: Vec<ChainEntry>,
}

/// Errors decoding or encoding a bound document.
#[derive(thiserror::Error, Debug)]
pub enum DocumentError {
    /// The document does not start with the expected magic bytes.
    #[error("Not a bound bundle document (bad magic)")]
    BadMagic,

    /// The document was produced by an unsupported format version.
    #[error("Unsupported document format version {0}")]
    UnsupportedVersion(u16),

    /// The document is shorter than its fixed header.
    #[error("Truncated bound document")]
    Truncated,

    /// The postcard payload could not be (de)serialized.
    #[error("Document codec error: {0}")]
    Codec(#[from] postcard::Error),
}

/// Frame a postcard-serializable value with magic and format version.
pub(crate) fn encode_framed<T: Serialize>(value: &T) -> Result<Vec<u8>, DocumentError> {
    let body = postcard::to_allocvec(value)?;
    let mut out = Vec::with_capacity(6 + body.len());
    out.extend_from_slice(&DOCUMENT_MAGIC);
    out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Recover a framed postcard value, checking magic and format version.
pub(crate) fn decode_framed<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DocumentError> {
    if bytes.len() < 6 {
        return Err(DocumentError::Truncated);
    }
    if bytes[..4] != DOCUMENT_MAGIC {
        return Err(DocumentError::BadMagic);
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != FORMAT_VERSION {
        return Err(DocumentError::UnsupportedVersion(version));
    }
    Ok(postcard::from_bytes(&bytes[6..])?)
}

impl BundleManifest {
    /// Serialize to the framed binary form embedded in the artifact.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Codec`] if serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, DocumentError> {
        encode_framed(self)
    }

    /// Recover a manifest from its framed binary form.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError`] if the frame or payload is invalid.
    pub fn decode(bytes: &[u8]) -> Result<Self, DocumentError> {
        decode_framed(bytes)
    }

    /// Look up a payload record by id.
    pub fn payload(&self, id: &PayloadId) -> Option<&Payload> {
        self.payloads.iter().find(|p| &p.id == id)
    }

    /// Iterate the chain's package entries (boundaries skipped).
    pub fn packages(&self) -> impl Iterator<Item = &ChainEntry> {
        self.chain.iter().filter(|e| e.base().is_some())
    }
}

// ---------------------------------------------------------------------------
// Canonical element-line rendering
// ---------------------------------------------------------------------------

/// Render `true`/`false` as the manifest's `yes`/`no` attribute form.
pub fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

/// An element being rendered to its canonical single-line form.
///
/// Attributes keep insertion order; absent attributes are simply not
/// pushed, preserving presence-vs-absence fidelity in the rendered
/// output.
#[derive(Debug, Default)]
pub struct ElementLine {
    name: &'static str,
    attrs: Vec<(&'static str, String)>,
    children: Vec<String>,
}

impl ElementLine {
    /// Start rendering an element with the given name.
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Append an attribute.
    pub fn attr(mut self, name: &'static str, value: impl std::fmt::Display) -> Self {
        self.attrs.push((name, value.to_string()));
        self
    }

    /// Append an attribute only when the value is present.
    pub fn attr_opt(mut self, name: &'static str, value: Option<impl std::fmt::Display>) -> Self {
        if let Some(value) = value {
            self.attrs.push((name, value.to_string()));
        }
        self
    }

    /// Append an already-rendered child element.
    pub fn child(mut self, line: String) -> Self {
        self.children.push(line);
        self
    }

    /// Finish rendering to the canonical single-line form.
    pub fn finish(self) -> String {
        let mut out = String::new();
        out.push('<');
        out.push_str(self.name);
        for (name, value) in &self.attrs {
            out.push(' ');
            out.push_str(name);
            out.push_str("='");
            out.push_str(value);
            out.push('\'');
        }
        if self.children.is_empty() {
            out.push_str(" />");
        } else {
            out.push('>');
            for child in &self.children {
                out.push_str(child);
            }
            out.push_str("</");
            out.push_str(self.name);
            out.push('>');
        }
        out
    }
}

fn render_base_attrs(line: ElementLine, base: &PackageBase) -> ElementLine {
    line.attr("Id", &base.id)
        .attr("Cache", base.cache.as_str())
        .attr("CacheId", &base.cache_id)
        .attr("InstallSize", base.install_size)
        .attr("Size", base.size)
        .attr("PerMachine", yes_no(base.per_machine))
        .attr("Permanent", yes_no(base.permanent))
        .attr("Vital", yes_no(base.vital))
        .attr_opt(
            "RollbackBoundaryForward",
            base.rollback_boundary_forward.as_ref(),
        )
        .attr_opt(
            "RollbackBoundaryBackward",
            base.rollback_boundary_backward.as_ref(),
        )
        .attr_opt("LogPathVariable", base.log_path_variable.as_ref())
        .attr_opt(
            "RollbackLogPathVariable",
            base.rollback_log_path_variable.as_ref(),
        )
}

fn render_base_children(mut line: ElementLine, base: &PackageBase) -> ElementLine {
    for provides in &base.provides {
        line = line.child(
            ElementLine::new("Provides")
                .attr("Key", &provides.key)
                .attr_opt("Version", provides.version.as_ref())
                .attr_opt("DisplayName", provides.display_name.as_ref())
                .finish(),
        );
    }
    for related in &base.related {
        let mut rel = ElementLine::new("RelatedPackage").attr("Id", &related.id);
        if let Some(min) = &related.min_version {
            rel = rel
                .attr("MinVersion", &min.version)
                .attr("MinInclusive", yes_no(min.inclusive));
        }
        if let Some(max) = &related.max_version {
            rel = rel
                .attr("MaxVersion", &max.version)
                .attr("MaxInclusive", yes_no(max.inclusive));
        }
        rel = rel
            .attr("OnlyDetect", yes_no(related.only_detect))
            .attr("LangInclusive", yes_no(related.lang_inclusive));
        for lang in &related.languages {
            rel = rel.child(ElementLine::new("Language").attr("Id", lang).finish());
        }
        line = line.child(rel.finish());
    }
    for payload_ref in &base.payload_refs {
        line = line.child(
            ElementLine::new("PayloadRef")
                .attr("Id", payload_ref)
                .finish(),
        );
    }
    line
}

impl ChainEntry {
    /// Render this entry to its canonical element line.
    pub fn to_element_line(&self) -> String {
        match self {
            Self::Msi(p) => {
                let mut line = render_base_attrs(ElementLine::new("MsiPackage"), &p.base)
                    .attr("ProductCode", &p.product_code)
                    .attr_opt("Language", p.language.as_ref())
                    .attr("Version", &p.version)
                    .attr_opt("UpgradeCode", p.upgrade_code.as_ref());
                for feature in &p.features {
                    line = line.child(
                        ElementLine::new("MsiFeature")
                            .attr("Id", &feature.id)
                            .finish(),
                    );
                }
                for property in &p.properties {
                    line = line.child(
                        ElementLine::new("MsiProperty")
                            .attr("Id", &property.id)
                            .attr("Value", &property.value)
                            .finish(),
                    );
                }
                render_base_children(line, &p.base).finish()
            }
            Self::Exe(p) => {
                let line = render_base_attrs(ElementLine::new("ExePackage"), &p.base)
                    .attr_opt("InstallArguments", p.install_arguments.as_ref())
                    .attr_opt("RepairArguments", p.repair_arguments.as_ref())
                    .attr_opt("UninstallArguments", p.uninstall_arguments.as_ref())
                    .attr("Repairable", yes_no(p.repairable))
                    .attr("DetectionType", p.detection_type.as_str())
                    .attr_opt("DetectCondition", p.detect_condition.as_ref());
                render_base_children(line, &p.base).finish()
            }
            Self::Msp(p) => {
                let line = render_base_attrs(ElementLine::new("MspPackage"), &p.base)
                    .attr_opt("PatchCode", p.patch_code.as_ref());
                render_base_children(line, &p.base).finish()
            }
            Self::Msu(p) => {
                let line = render_base_attrs(ElementLine::new("MsuPackage"), &p.base)
                    .attr_opt("DetectCondition", p.detect_condition.as_ref())
                    .attr_opt("KB", p.kb.as_ref());
                render_base_children(line, &p.base).finish()
            }
            Self::RollbackBoundary(b) => ElementLine::new("RollbackBoundary")
                .attr("Id", &b.id)
                .finish(),
        }
    }
}

impl Payload {
    /// Render this payload to its canonical element line.
    pub fn to_element_line(&self) -> String {
        ElementLine::new("Payload")
            .attr("Id", &self.id)
            .attr("FilePath", &self.file_path)
            .attr("FileSize", self.file_size)
            .attr_opt("Hash", self.hash.as_ref())
            .attr("Packaging", self.packaging.as_str())
            .attr_opt("SourcePath", self.source_path.as_ref())
            .attr_opt("Container", self.container.as_ref())
            .attr_opt("DownloadUrl", self.download_url.as_ref())
            .attr_opt(
                "CertificatePublicKey",
                self.certificate_public_key.as_ref(),
            )
            .attr_opt(
                "CertificateThumbprint",
                self.certificate_thumbprint.as_ref(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_base(id: &str) -> PackageBase {
        PackageBase {
            id: PackageId::new(id),
            cache: CachePolicy::Keep,
            cache_id: format!("{id}-cache"),
            install_size: 34,
            size: 32803,
            per_machine: true,
            permanent: false,
            vital: true,
            rollback_boundary_forward: Some(BoundaryId::new("DefaultBoundary")),
            rollback_boundary_backward: None,
            log_path_variable: Some(format!("BundleLog_{id}")),
            rollback_log_path_variable: Some(format!("BundleRollbackLog_{id}")),
            display_name: None,
            provides: Vec::new(),
            related: Vec::new(),
            payload_refs: vec![PayloadId::new("test.msi")],
        }
    }

    fn sample_manifest() -> BundleManifest {
        BundleManifest {
            info: BundleInfo {
                name: "Test".into(),
                version: Version::new("1.0.0"),
                manufacturer: None,
                upgrade_code: None,
                variables: Vec::new(),
            },
            ux: UxManifest {
                payload_refs: vec![PayloadId::new("ba.exe")],
            },
            containers: vec![ContainerLayout {
                id: ContainerId::new("UxContainer"),
                kind: ContainerKind::Ux,
                size: 0,
                payload_count: 1,
            }],
            payloads: vec![Payload {
                id: PayloadId::new("ba.exe"),
                file_path: "ba.exe".into(),
                file_size: 10,
                hash: Some(PayloadHash::compute(b"ba")),
                packaging: Packaging::Embedded,
                source_path: Some("u0".into()),
                container: Some(ContainerId::new("UxContainer")),
                download_url: None,
                certificate_public_key: None,
                certificate_thumbprint: None,
                source_offset: Some(0),
                packed_size: Some(10),
            }],
            chain: vec![ChainEntry::Msi(MsiPackage {
                base: sample_base("MsiA"),
                product_code: "{0000-1111}".into(),
                language: Some("1033".into()),
                version: Version::new("1.0.0.0"),
                upgrade_code: None,
                features: vec![MsiFeature {
                    id: "ProductFeature".into(),
                }],
                properties: Vec::new(),
            })],
        }
    }

    #[test]
    fn encode_decode_round_trips() {
        let manifest = sample_manifest();
        let bytes = manifest.encode().unwrap();
        let decoded = BundleManifest::decode(&bytes).unwrap();
        assert_eq!(manifest, decoded);
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let mut bytes = sample_manifest().encode().unwrap();
        bytes[0] = b'X';
        assert!(matches!(
            BundleManifest::decode(&bytes),
            Err(DocumentError::BadMagic)
        ));
    }

    #[test]
    fn decode_rejects_future_version() {
        let mut bytes = sample_manifest().encode().unwrap();
        bytes[4] = 0xFF;
        bytes[5] = 0xFF;
        assert!(matches!(
            BundleManifest::decode(&bytes),
            Err(DocumentError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn msi_element_line_shape() {
        let manifest = sample_manifest();
        let line = manifest.chain[0].to_element_line();
        assert!(line.starts_with("<MsiPackage Id='MsiA' Cache='keep'"));
        assert!(line.contains("RollbackBoundaryForward='DefaultBoundary'"));
        assert!(!line.contains("RollbackBoundaryBackward"));
        assert!(line.contains("<MsiFeature Id='ProductFeature' />"));
        assert!(line.contains("<PayloadRef Id='test.msi' />"));
        assert!(line.ends_with("</MsiPackage>"));
    }

    #[test]
    fn absent_attributes_are_omitted() {
        let payload = Payload {
            id: PayloadId::new("p"),
            file_path: "p.bin".into(),
            file_size: 1,
            hash: None,
            packaging: Packaging::Download,
            source_path: None,
            container: None,
            download_url: Some("https://example.test/p.bin".into()),
            certificate_public_key: None,
            certificate_thumbprint: None,
            source_offset: None,
            packed_size: None,
        };
        let line = payload.to_element_line();
        assert!(!line.contains("Hash="));
        assert!(!line.contains("Container="));
        assert!(line.contains("Packaging='download'"));
    }

    #[test]
    fn related_package_version_and_language_matching() {
        let rule = RelatedPackage {
            id: "{UP}".into(),
            min_version: None,
            max_version: Some(VersionBound::new(Version::new("1.0.0"), false)),
            languages: vec!["1033".into()],
            lang_inclusive: true,
            only_detect: false,
        };
        assert!(rule.matches(&Version::new("0.9.0"), Some("1033")));
        assert!(!rule.matches(&Version::new("1.0.0"), Some("1033")));
        assert!(!rule.matches(&Version::new("0.9.0"), Some("1036")));
    }
}
