//! Package validation.
//!
//! Aggregates each package's payload declarations (inline primary,
//! owned payloads, payload-group contributions), rejects typed
//! descriptors decorating the wrong package kind, and requires every
//! package to end up with at least one payload of an acceptable type.
//! Resolution of the individual declarations is delegated to
//! [`crate::resolve`].

use std::collections::HashSet;

use bndl_schema::{BundleSource, PackageId, PackageKind, PackageSource};

use crate::diag::{Diagnostics, codes};
use crate::resolve::{BindPaths, ResolvedPayload, resolve_payload};

/// A package whose payload set has been aggregated and resolved.
///
/// The first payload is the package's primary payload.
#[derive(Debug, Clone)]
pub struct ValidatedPackage {
    /// The authored declaration.
    pub source: PackageSource,
    /// Resolved payloads in aggregation order, primary first.
    pub payloads: Vec<ResolvedPayload>,
}

impl ValidatedPackage {
    /// The package identity.
    pub fn id(&self) -> &PackageId {
        self.source.id()
    }

    /// The package kind.
    pub fn kind(&self) -> PackageKind {
        self.source.kind()
    }

    /// Total size in bytes of all resolved payloads.
    pub fn total_size(&self) -> u64 {
        self.payloads.iter().map(|p| p.payload.file_size).sum()
    }

    /// Whether every payload of the package is embedded.
    pub fn compressed(&self) -> bool {
        self.payloads
            .iter()
            .all(|p| p.payload.packaging == bndl_schema::Packaging::Embedded)
    }
}

/// Validate every package declaration of a bundle source.
///
/// Packages that fail validation are omitted from the result; their
/// failures are recorded in `diag`. Validation never short-circuits,
/// so one pass reports every broken package.
pub fn validate_packages(
    source: &BundleSource,
    bind_paths: &BindPaths,
    diag: &mut Diagnostics,
) -> Vec<ValidatedPackage> {
    let mut seen = HashSet::new();
    let mut validated = Vec::new();

    for package in &source.packages {
        if !seen.insert(package.id().clone()) {
            diag.error(
                codes::DUPLICATE_SYMBOL,
                format!("Duplicate package id '{}'.", package.id()),
            );
            continue;
        }
        if let Some(pkg) = validate_package(source, package, bind_paths, diag) {
            validated.push(pkg);
        }
    }

    validated
}

fn validate_package(
    source: &BundleSource,
    package: &PackageSource,
    bind_paths: &BindPaths,
    diag: &mut Diagnostics,
) -> Option<ValidatedPackage> {
    let kind = package.kind();
    let common = package.common();
    let errors_before = diag.max_error_code();

    // Declarations aggregate in authoring order: the inline primary
    // first, then owned payloads, then group contributions.
    let mut payloads = Vec::new();
    let mut acceptable_declared = false;

    if common.payload.is_declared() {
        acceptable_declared = true;
        if let Some(resolved) =
            resolve_payload(&common.payload, kind.payload_element(), bind_paths, diag)
        {
            payloads.push(resolved);
        }
    }

    for decl in &common.payloads {
        acceptable_declared = true;
        if let Some(resolved) = resolve_payload(decl, "Payload", bind_paths, diag) {
            payloads.push(resolved);
        }
    }

    for group_ref in &common.payload_group_refs {
        let Some(group) = source.payload_group(group_ref) else {
            diag.error(
                codes::UNKNOWN_REFERENCE,
                format!(
                    "The payload group '{group_ref}' referenced by package '{}' is not defined.",
                    common.id
                ),
            );
            continue;
        };
        for descriptor in &group.package_payloads {
            if descriptor.package_type != kind {
                diag.error(
                    codes::WRONG_PACKAGE_PAYLOAD_TYPE,
                    format!(
                        "The {} element can only be used for {}.",
                        descriptor.package_type.payload_element(),
                        descriptor.package_type.package_element_plural()
                    ),
                );
                diag.related("The location of the package related to previous error.");
                continue;
            }
            acceptable_declared = true;
            if let Some(resolved) =
                resolve_payload(&descriptor.payload, kind.payload_element(), bind_paths, diag)
            {
                payloads.push(resolved);
            }
        }
        for decl in &group.payloads {
            acceptable_declared = true;
            if let Some(resolved) = resolve_payload(decl, "Payload", bind_paths, diag) {
                payloads.push(resolved);
            }
        }
    }

    if !acceptable_declared {
        diag.error(
            codes::MISSING_PACKAGE_PAYLOAD,
            format!(
                "There is no payload defined for package '{}'. This is specified on the {} \
                 element or a child {} element.",
                common.id,
                kind.package_element(),
                kind.payload_element()
            ),
        );
        return None;
    }

    // Declarations existed but none survived resolution; the per-
    // declaration diagnostics already explain why.
    if payloads.is_empty() {
        debug_assert!(diag.max_error_code() > errors_before || diag.has_errors());
        return None;
    }

    tracing::debug!(
        package = %common.id,
        kind = %kind,
        payloads = payloads.len(),
        "validated package"
    );

    Some(ValidatedPackage {
        source: package.clone(),
        payloads,
    })
}
